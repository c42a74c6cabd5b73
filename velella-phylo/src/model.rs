//! Phylogenetic substitution models.
//!
//! A [`PhyloModel`] bundles what every downstream computation needs: the
//! substitution alphabet, a continuous-time rate matrix, its equilibrium
//! frequencies, and the rooted binary tree the model lives on. The binding
//! from tree leaves to alignment rows is built lazily on first use and
//! cached for the model's lifetime.

use std::sync::OnceLock;

use velella_core::{Result, VelellaError};
use velella_stats::Matrix;

use crate::msa::Msa;
use crate::tree::{NodeId, PhyloTree};

/// A substitution model over a rooted binary tree.
#[derive(Debug)]
pub struct PhyloModel {
    alphabet: Vec<u8>,
    rate_matrix: Matrix,
    backgd_freqs: Vec<f64>,
    tree: PhyloTree,
    /// Leaf id -> alignment row, built on first use (None at internal nodes).
    seq_idx: OnceLock<Vec<Option<usize>>>,
}

impl PhyloModel {
    /// Create a model from a tree, alphabet, rate matrix, and equilibrium
    /// frequencies.
    ///
    /// The rate matrix must be square over the alphabet, with non-negative
    /// off-diagonal entries and rows summing to zero; the frequencies must
    /// be a probability vector. Branch lengths are validated by the tree.
    pub fn new(
        tree: PhyloTree,
        alphabet: &[u8],
        rate_matrix: Matrix,
        backgd_freqs: Vec<f64>,
    ) -> Result<Self> {
        if alphabet.is_empty() {
            return Err(VelellaError::InvalidInput("empty alphabet".into()));
        }
        let size = alphabet.len();
        if rate_matrix.nrows() != size || rate_matrix.ncols() != size {
            return Err(VelellaError::InvalidInput(format!(
                "rate matrix is {}x{} for alphabet of size {}",
                rate_matrix.nrows(),
                rate_matrix.ncols(),
                size
            )));
        }
        for i in 0..size {
            let mut row_sum = 0.0;
            for j in 0..size {
                let q = rate_matrix[i][j];
                if !q.is_finite() {
                    return Err(VelellaError::InvalidInput(format!(
                        "non-finite rate at ({}, {})",
                        i, j
                    )));
                }
                if i != j && q < 0.0 {
                    return Err(VelellaError::InvalidInput(format!(
                        "negative off-diagonal rate {} at ({}, {})",
                        q, i, j
                    )));
                }
                row_sum += q;
            }
            if row_sum.abs() > 1e-9 {
                return Err(VelellaError::InvalidInput(format!(
                    "rate matrix row {} sums to {}, expected 0",
                    i, row_sum
                )));
            }
        }
        if backgd_freqs.len() != size {
            return Err(VelellaError::InvalidInput(format!(
                "{} background frequencies for alphabet of size {}",
                backgd_freqs.len(),
                size
            )));
        }
        let freq_sum: f64 = backgd_freqs.iter().sum();
        if backgd_freqs.iter().any(|&f| f < 0.0) || (freq_sum - 1.0).abs() > 1e-4 {
            return Err(VelellaError::InvalidInput(format!(
                "background frequencies sum to {}, expected 1",
                freq_sum
            )));
        }

        Ok(Self {
            alphabet: alphabet.iter().map(|c| c.to_ascii_uppercase()).collect(),
            rate_matrix,
            backgd_freqs,
            tree,
            seq_idx: OnceLock::new(),
        })
    }

    /// Jukes-Cantor model on the nucleotide alphabet: uniform frequencies,
    /// all off-diagonal rates 1/3 (one expected substitution per unit time).
    pub fn jukes_cantor(tree: PhyloTree) -> Result<Self> {
        let mut q = Matrix::zeros(4, 4);
        for i in 0..4 {
            for j in 0..4 {
                q[i][j] = if i == j { -1.0 } else { 1.0 / 3.0 };
            }
        }
        Self::new(tree, b"ACGT", q, vec![0.25; 4])
    }

    /// Number of character states.
    pub fn n_states(&self) -> usize {
        self.alphabet.len()
    }

    /// The substitution alphabet.
    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    /// The rate matrix `Q`.
    pub fn rate_matrix(&self) -> &Matrix {
        &self.rate_matrix
    }

    /// Equilibrium frequencies, one per state.
    pub fn backgd_freqs(&self) -> &[f64] {
        &self.backgd_freqs
    }

    /// The tree the model lives on.
    pub fn tree(&self) -> &PhyloTree {
        &self.tree
    }

    /// Transition probability matrix `P(t) = exp(Qt)`.
    ///
    /// Computed by eigendecomposition of the pi-symmetrized rate matrix, so
    /// the model must be time-reversible (all the standard nucleotide models
    /// are). Small negative entries from roundoff are clamped to zero.
    pub fn transition_probs(&self, t: f64) -> Result<Matrix> {
        if t < 0.0 || !t.is_finite() {
            return Err(VelellaError::InvalidInput(format!(
                "branch length {} must be finite and non-negative",
                t
            )));
        }
        let n = self.n_states();
        let sqrt_pi: Vec<f64> = self.backgd_freqs.iter().map(|&f| f.sqrt()).collect();
        if sqrt_pi.iter().any(|&s| s == 0.0) {
            return Err(VelellaError::Numerical(
                "zero equilibrium frequency; cannot symmetrize rate matrix".into(),
            ));
        }

        // B = diag(sqrt(pi)) * Q * diag(1/sqrt(pi)) is symmetric for
        // reversible Q.
        let mut b = Matrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                b[i][j] = sqrt_pi[i] * self.rate_matrix[i][j] / sqrt_pi[j];
            }
        }
        let (eigenvalues, eigenvectors) = jacobi_eigen(&b);

        // P(t) = diag(1/sqrt(pi)) * U * exp(Lambda t) * U^T * diag(sqrt(pi))
        let mut p = Matrix::zeros(n, n);
        for i in 0..n {
            for j in 0..n {
                let mut sum = 0.0;
                for k in 0..n {
                    sum += eigenvectors[i][k] * (eigenvalues[k] * t).exp() * eigenvectors[j][k];
                }
                p[i][j] = (sum * sqrt_pi[j] / sqrt_pi[i]).max(0.0);
            }
        }
        Ok(p)
    }

    /// Leaf-to-alignment-row binding, built once per model and reused.
    ///
    /// Entry `id` is `Some(row)` at leaves, `None` at internal nodes.
    pub(crate) fn msa_seq_idx(&self, msa: &Msa) -> Result<&[Option<usize>]> {
        if self.seq_idx.get().is_none() {
            let mut idx: Vec<Option<usize>> = vec![None; self.tree.node_count()];
            for leaf in self.tree.leaves() {
                let name = self.tree.node(leaf).name.as_deref().ok_or_else(|| {
                    VelellaError::InvalidInput(format!("leaf node {} has no name", leaf))
                })?;
                let row = msa.seq_index(name).ok_or_else(|| {
                    VelellaError::InvalidInput(format!(
                        "no alignment row for leaf '{}'",
                        name
                    ))
                })?;
                idx[leaf] = Some(row);
            }
            let _ = self.seq_idx.set(idx);
        }
        Ok(self.seq_idx.get().expect("initialized above").as_slice())
    }

    /// Alignment row bound to a leaf, after [`Self::msa_seq_idx`] has run.
    pub(crate) fn bound_row(idx: &[Option<usize>], leaf: NodeId) -> Result<usize> {
        idx[leaf].ok_or_else(|| {
            VelellaError::InvalidInput(format!("node {} is not a bound leaf", leaf))
        })
    }
}

/// Jacobi eigendecomposition of a symmetric matrix.
///
/// Returns `(eigenvalues, eigenvectors)` with `eigenvectors[i][k]` the i-th
/// component of the k-th eigenvector.
fn jacobi_eigen(m: &Matrix) -> (Vec<f64>, Matrix) {
    let n = m.nrows();
    let mut a = m.clone();
    let mut v = Matrix::zeros(n, n);
    for i in 0..n {
        v[i][i] = 1.0;
    }

    for _ in 0..200 {
        // Largest off-diagonal element.
        let mut max_val = 0.0f64;
        let (mut p, mut q) = (0, 1);
        for i in 0..n {
            for j in (i + 1)..n {
                if a[i][j].abs() > max_val {
                    max_val = a[i][j].abs();
                    p = i;
                    q = j;
                }
            }
        }
        if max_val < 1e-15 {
            break;
        }

        let theta = if (a[p][p] - a[q][q]).abs() < 1e-30 {
            std::f64::consts::FRAC_PI_4
        } else {
            0.5 * (2.0 * a[p][q] / (a[p][p] - a[q][q])).atan()
        };
        let c = theta.cos();
        let s = theta.sin();

        // Givens rotation on columns p and q, then rows p and q.
        for i in 0..n {
            let (aip, aiq) = (a[i][p], a[i][q]);
            a[i][p] = c * aip + s * aiq;
            a[i][q] = -s * aip + c * aiq;
        }
        for j in 0..n {
            let (apj, aqj) = (a[p][j], a[q][j]);
            a[p][j] = c * apj + s * aqj;
            a[q][j] = -s * apj + c * aqj;
        }
        a[p][q] = 0.0;
        a[q][p] = 0.0;

        for i in 0..n {
            let (vip, viq) = (v[i][p], v[i][q]);
            v[i][p] = c * vip + s * viq;
            v[i][q] = -s * vip + c * viq;
        }
    }

    let eigenvalues = (0..n).map(|i| a[i][i]).collect();
    (eigenvalues, v)
}
