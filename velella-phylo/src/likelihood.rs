//! Per-column likelihoods by Felsenstein pruning.
//!
//! Small collaborator for the relative-entropy tool: computes the base-2
//! log-probability of each column tuple under a model, marginalizing gaps
//! and missing data as all-ones partials.

use velella_core::{Result, VelellaError};
use velella_stats::Matrix;

use crate::model::PhyloModel;
use crate::msa::{Msa, GAP_CHAR};

/// Base-2 log-likelihood of every column tuple of `msa` under `model`.
///
/// Returns one value per tuple, in tuple order (first occurrence order of
/// the columns).
pub fn col_log2_likelihoods(model: &PhyloModel, msa: &Msa) -> Result<Vec<f64>> {
    if model.alphabet() != msa.alphabet() {
        return Err(VelellaError::InvalidInput(format!(
            "model alphabet {:?} does not match alignment alphabet {:?}",
            String::from_utf8_lossy(model.alphabet()),
            String::from_utf8_lossy(msa.alphabet()),
        )));
    }

    let tree = model.tree();
    let size = model.n_states();
    let freqs = model.backgd_freqs();
    let seq_idx = model.msa_seq_idx(msa)?;

    // Transition matrices per non-root node, reused across tuples.
    let mut probs: Vec<Option<Matrix>> = vec![None; tree.node_count()];
    for node in tree.nodes() {
        if !node.is_root() {
            probs[node.id] = Some(model.transition_probs(tree.branch_length(node.id))?);
        }
    }

    let postorder: Vec<_> = tree.iter_postorder().collect();
    let mut partials = vec![vec![0.0f64; size]; tree.node_count()];
    let mut result = Vec::with_capacity(msa.ntuples());

    for tuple in 0..msa.ntuples() {
        for id in &postorder {
            let node = tree.node(*id);
            if node.is_leaf() {
                let row = PhyloModel::bound_row(seq_idx, *id)?;
                let c = msa.char_at_tuple(tuple, row);
                if msa.is_missing(c) || c == GAP_CHAR {
                    partials[*id].fill(1.0);
                } else {
                    let state = msa.alphabet_index(c).ok_or_else(|| {
                        VelellaError::InvalidInput(format!(
                            "unrecognized character '{}' in alignment",
                            c as char
                        ))
                    })?;
                    partials[*id].fill(0.0);
                    partials[*id][state] = 1.0;
                }
            } else {
                let lc = node.lchild.expect("internal node");
                let rc = node.rchild.expect("internal node");
                for a in 0..size {
                    let mut left = 0.0;
                    let mut right = 0.0;
                    let p_left = probs[lc].as_ref().expect("non-root child");
                    let p_right = probs[rc].as_ref().expect("non-root child");
                    for b in 0..size {
                        left += p_left[a][b] * partials[lc][b];
                        right += p_right[a][b] * partials[rc][b];
                    }
                    partials[*id][a] = left * right;
                }
            }
        }

        let mut lik = 0.0;
        for a in 0..size {
            lik += freqs[a] * partials[tree.root()][a];
        }
        if !(lik > 0.0) {
            return Err(VelellaError::Numerical(format!(
                "non-positive column likelihood {} at tuple {}",
                lik, tuple
            )));
        }
        result.push(lik.log2());
    }

    Ok(result)
}
