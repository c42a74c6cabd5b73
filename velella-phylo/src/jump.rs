//! Uniformized jump-process representation of a substitution model.
//!
//! A continuous-time substitution process with rate matrix `Q` is recast as
//! a discrete chain of "jumps" arriving at Poisson rate
//! `lambda = max_i(-Q[i][i])`, each jump moving by the stochastic matrix
//! `R = I + Q/lambda`. A jump may keep the state (no substitution) or change
//! it (one substitution), which makes substitution *counts* tractable by
//! combinatorial recurrence. All tables are precomputed once per
//! (model, tree) pair and shared read-only afterwards.

use velella_core::{Result, VelellaError};
use velella_stats::{distribution, prob_matrix, prob_vector, Matrix};

use crate::model::PhyloModel;
use crate::tree::NodeId;

/// How the jump recurrence is seeded.
enum StartBase<'a> {
    /// Marginalize the starting base over the equilibrium frequencies.
    Marginal(&'a [f64]),
    /// Condition on a fixed starting base.
    Fixed(usize),
}

/// Precomputed jump-process tables for one (model, tree) pair.
///
/// Immutable after construction; borrow it freely across consumers.
pub struct JumpProcess<'m> {
    model: &'m PhyloModel,
    lambda: f64,
    jmax: usize,
    r: Matrix,
    /// `a[i][n][j] = P(end base i, n substitutions | j jumps)`.
    a: Vec<Matrix>,
    /// `b[s][i][n][j] = P(end base i, n substitutions | j jumps, start s)`.
    b: Vec<Vec<Matrix>>,
    /// `m[n][j] = P(n substitutions | j jumps)`, marginal of `a`.
    m: Matrix,
    /// Branch-conditional tables per non-root node; None at the root.
    branch_distrib: Vec<Option<Vec<Matrix>>>,
}

impl<'m> JumpProcess<'m> {
    /// Build the jump process for a model and its tree.
    pub fn new(model: &'m PhyloModel) -> Result<Self> {
        let size = model.n_states();
        let q = model.rate_matrix();
        let tree = model.tree();

        let totlen = tree.total_branch_length();
        let jmax = ((15.0 * totlen).ceil() as usize).max(20);

        let mut lambda = 0.0f64;
        for i in 0..size {
            lambda = lambda.max(-q[i][i]);
        }
        if !(lambda > 0.0) {
            return Err(VelellaError::InvalidInput(
                "rate matrix has zero diagonal; uniformization rate is zero".into(),
            ));
        }

        let mut r = Matrix::zeros(size, size);
        for i in 0..size {
            for j in 0..size {
                r[i][j] = q[i][j] / lambda + if i == j { 1.0 } else { 0.0 };
            }
            let row_sum: f64 = r[i].iter().sum();
            if (row_sum - 1.0).abs() > 1e-9 {
                return Err(VelellaError::Numerical(format!(
                    "jump matrix row {} sums to {}, expected 1",
                    i, row_sum
                )));
            }
        }

        let a = substs_and_bases_given_jumps(&r, jmax, StartBase::Marginal(model.backgd_freqs()));
        let b: Vec<Vec<Matrix>> = (0..size)
            .map(|s| substs_and_bases_given_jumps(&r, jmax, StartBase::Fixed(s)))
            .collect();

        let mut m = Matrix::zeros(jmax, jmax);
        for n in 0..jmax {
            for j in 0..jmax {
                for table in &a {
                    m[n][j] += table[n][j];
                }
            }
        }

        let mut jp = Self {
            model,
            lambda,
            jmax,
            r,
            a,
            b,
            m,
            branch_distrib: vec![None; tree.node_count()],
        };

        for node in tree.nodes() {
            if node.is_root() {
                continue;
            }
            let tables = jp.branch_conditional(tree.branch_length(node.id))?;
            jp.branch_distrib[node.id] = Some(tables);
        }

        Ok(jp)
    }

    /// The model this process was built from.
    pub fn model(&self) -> &PhyloModel {
        self.model
    }

    /// Uniformization rate `lambda = max_i(-Q[i][i])`.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Truncation bound on the jump count.
    pub fn jmax(&self) -> usize {
        self.jmax
    }

    /// The stochastic jump matrix `R = I + Q/lambda`.
    pub fn jump_matrix(&self) -> &Matrix {
        &self.r
    }

    /// Precomputed branch-conditional tables for a node; None at the root.
    pub fn branch_distrib(&self, node: NodeId) -> Option<&[Matrix]> {
        self.branch_distrib[node].as_deref()
    }

    /// Branch-conditional distributions for an arbitrary branch length.
    ///
    /// Returns `d` with `d[a][b][n] = P(end base b, n substitutions |
    /// start base a, length t)`, each `d[a]` normalized over `(b, n)`.
    /// Fails if the Poisson truncation reaches `jmax` (very long branches
    /// need the jump process rebuilt with a larger jump bound).
    pub fn branch_conditional(&self, t: f64) -> Result<Vec<Matrix>> {
        if t < 0.0 || !t.is_finite() {
            return Err(VelellaError::InvalidInput(format!(
                "branch length {} must be finite and non-negative",
                t
            )));
        }
        let pois = distribution::poisson_vector(self.lambda * t)?;
        let npois = self.check_truncation(&pois)?;
        let size = self.model.n_states();

        // p(b, n | a, t) = sum_j p(b, n | j, a) * p(j | t)
        let mut d = vec![Matrix::zeros(size, npois); size];
        for start in 0..size {
            for n in 0..npois {
                for j in 0..npois {
                    for end in 0..size {
                        d[start][end][n] += self.b[start][end][n][j] * pois[j];
                    }
                }
            }
            prob_matrix::normalize(&mut d[start])?;
        }
        Ok(d)
    }

    /// Distribution of the substitution count on a branch of length `t`,
    /// marginal over bases: `p[n] = P(n substitutions | t)`.
    pub fn branch_substs(&self, t: f64) -> Result<Vec<f64>> {
        if t < 0.0 || !t.is_finite() {
            return Err(VelellaError::InvalidInput(format!(
                "branch length {} must be finite and non-negative",
                t
            )));
        }
        let pois = distribution::poisson_vector(self.lambda * t)?;
        let npois = self.check_truncation(&pois)?;

        let mut distrib = vec![0.0; npois];
        for n in 0..npois {
            for j in 0..npois {
                distrib[n] += self.m[n][j] * pois[j];
            }
        }
        prob_vector::normalize(&mut distrib)?;
        prob_vector::trim_tail(&mut distrib);
        Ok(distrib)
    }

    fn check_truncation(&self, pois: &[f64]) -> Result<usize> {
        if pois.len() >= self.jmax {
            return Err(VelellaError::InvalidInput(format!(
                "Poisson truncation {} reaches the jump bound {}; rebuild the \
                 jump process with a larger bound for branches this long",
                pois.len(),
                self.jmax
            )));
        }
        Ok(pois.len())
    }
}

/// Tables `A[i][n][j] = P(end base i, n substitutions | j jumps)` for all
/// `n, j < jmax`, seeded either from the equilibrium frequencies or from a
/// fixed starting base.
///
/// Recurrence over `(n, j)`: a jump either stays put (the `R[i][i]` term,
/// count unchanged) or arrives from another base (one more substitution).
fn substs_and_bases_given_jumps(r: &Matrix, jmax: usize, start: StartBase<'_>) -> Vec<Matrix> {
    let size = r.nrows();
    let mut a = vec![Matrix::zeros(jmax, jmax); size];

    match start {
        StartBase::Marginal(freqs) => {
            for (i, table) in a.iter_mut().enumerate() {
                table[0][0] = freqs[i];
            }
        }
        StartBase::Fixed(s) => {
            a[s][0][0] = 1.0;
        }
    }

    for j in 1..jmax {
        for n in 0..=j {
            for i in 0..size {
                let mut val = a[i][n][j - 1] * r[i][i];
                if n > 0 {
                    for k in 0..size {
                        if k == i {
                            continue;
                        }
                        val += a[k][n - 1][j - 1] * r[k][i];
                    }
                }
                a[i][n][j] = val;
            }
        }
    }

    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::PhyloTree;

    fn jc_model() -> PhyloModel {
        let tree = PhyloTree::from_newick("(A:0.1,B:0.1);").unwrap();
        PhyloModel::jukes_cantor(tree).unwrap()
    }

    #[test]
    fn lambda_and_jump_matrix() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        assert!((jp.lambda() - 1.0).abs() < 1e-12);
        let r = jp.jump_matrix();
        for i in 0..4 {
            let s: f64 = r[i].iter().sum();
            assert!((s - 1.0).abs() < 1e-12);
            assert!((r[i][i] - 0.0).abs() < 1e-12); // JC: diagonal fully absorbed
        }
    }

    #[test]
    fn jmax_floor_is_twenty() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        // total branch length 0.2 -> ceil(3) well below the floor of 20
        assert_eq!(jp.jmax(), 20);
    }

    #[test]
    fn a_tables_sum_to_one_for_every_jump_count() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        for j in 0..jp.jmax() {
            let mut sum = 0.0;
            for table in &jp.a {
                for n in 0..jp.jmax() {
                    sum += table[n][j];
                }
            }
            assert!((sum - 1.0).abs() < 1e-9, "A mass at j = {} is {}", j, sum);
        }
    }

    #[test]
    fn b_tables_sum_to_one_for_every_start_and_jump_count() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        for (start, tables) in jp.b.iter().enumerate() {
            for j in 0..jp.jmax() {
                let mut sum = 0.0;
                for table in tables {
                    for n in 0..jp.jmax() {
                        sum += table[n][j];
                    }
                }
                assert!(
                    (sum - 1.0).abs() < 1e-9,
                    "B mass at start = {}, j = {} is {}",
                    start,
                    j,
                    sum
                );
            }
        }
    }

    #[test]
    fn m_is_the_base_marginal_of_a() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        for n in 0..jp.jmax() {
            for j in 0..jp.jmax() {
                let expected: f64 = jp.a.iter().map(|t| t[n][j]).sum();
                assert!((jp.m[n][j] - expected).abs() < 1e-15);
            }
        }
    }

    #[test]
    fn substitutions_cannot_exceed_jumps() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        for j in 0..jp.jmax() {
            for n in (j + 1)..jp.jmax() {
                assert_eq!(jp.m[n][j], 0.0, "n = {} > j = {} has mass", n, j);
            }
        }
    }

    #[test]
    fn branch_conditional_is_normalized_per_start() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        let d = jp.branch_conditional(0.1).unwrap();
        for (start, table) in d.iter().enumerate() {
            let sum = table.sum();
            assert!(
                (sum - 1.0).abs() < 1e-6,
                "start = {}: mass {}",
                start,
                sum
            );
        }
    }

    #[test]
    fn zero_length_branch_concentrates_at_identity() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        let d = jp.branch_conditional(0.0).unwrap();
        for (start, table) in d.iter().enumerate() {
            assert_eq!(table.ncols(), 1);
            for end in 0..4 {
                let expected = if end == start { 1.0 } else { 0.0 };
                assert!((table[end][0] - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn precomputed_branch_tables_cover_non_root_nodes() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        let tree = model.tree();
        assert!(jp.branch_distrib(tree.root()).is_none());
        for node in tree.nodes() {
            if !node.is_root() {
                assert!(jp.branch_distrib(node.id).is_some());
            }
        }
    }

    #[test]
    fn branch_substs_matches_expected_rate() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        let p = jp.branch_substs(0.1).unwrap();
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        // With rate 1 and t = 0.1, the expected count is close to 0.1.
        let (mean, _) = prob_vector::stats(&p);
        assert!((mean - 0.1).abs() < 0.01, "mean {}", mean);
        // Mostly no substitutions at all.
        assert!(p[0] > 0.85);
    }

    #[test]
    fn long_branch_exceeding_truncation_fails() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        // lambda * t = 30 needs far more than jmax = 20 Poisson terms.
        let err = jp.branch_conditional(30.0).unwrap_err();
        assert!(matches!(err, VelellaError::InvalidInput(_)));
    }

    #[test]
    fn negative_branch_length_rejected() {
        let model = jc_model();
        let jp = JumpProcess::new(&model).unwrap();
        assert!(jp.branch_conditional(-0.1).is_err());
        assert!(jp.branch_substs(-0.1).is_err());
    }
}
