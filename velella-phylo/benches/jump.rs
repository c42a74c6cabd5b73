use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use velella_phylo::jump::JumpProcess;
use velella_phylo::model::PhyloModel;
use velella_phylo::msa::Msa;
use velella_phylo::subst;
use velella_phylo::tree::PhyloTree;

fn eight_leaf_model() -> PhyloModel {
    let newick = "((((A:0.05,B:0.05):0.05,(C:0.05,D:0.05):0.05):0.05,\
                  ((E:0.05,F:0.05):0.05,(G:0.05,H:0.05):0.05):0.05):0.01,X:0.01);";
    // Nine leaves total; the outgroup keeps the root binary.
    let tree = PhyloTree::from_newick(newick).unwrap();
    PhyloModel::jukes_cantor(tree).unwrap()
}

fn random_dna(len: usize, seed: u64) -> Vec<u8> {
    let bases = [b'A', b'C', b'G', b'T'];
    // Deterministic pseudo-random for reproducibility.
    let mut seq = Vec::with_capacity(len);
    let mut state: u64 = seed;
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        seq.push(bases[((state >> 33) % 4) as usize]);
    }
    seq
}

fn bench_jump_process(c: &mut Criterion) {
    let model = eight_leaf_model();
    c.bench_function("jump_process_build", |b| {
        b.iter(|| JumpProcess::new(black_box(&model)).unwrap())
    });
}

fn bench_site_posterior(c: &mut Criterion) {
    let model = eight_leaf_model();
    let jp = JumpProcess::new(&model).unwrap();

    let names: Vec<String> = ["A", "B", "C", "D", "E", "F", "G", "H", "X"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut group = c.benchmark_group("site_posterior");
    for &ncols in &[50usize, 200] {
        let seqs: Vec<Vec<u8>> = (0..9).map(|i| random_dna(ncols, 42 + i)).collect();
        let msa = Msa::new(names.clone(), seqs, b"ACGT").unwrap();
        group.bench_with_input(BenchmarkId::new("scalar", ncols), &ncols, |b, _| {
            b.iter(|| subst::posterior_site_distrib(black_box(&jp), black_box(&msa), 0).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("joint", ncols), &ncols, |b, _| {
            b.iter(|| subst::joint_site_distrib(black_box(&jp), Some(black_box(&msa)), 0).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_jump_process, bench_site_posterior);
criterion_main!(benches);
