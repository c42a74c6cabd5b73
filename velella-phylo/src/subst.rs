//! Prior and posterior distributions of substitution counts.
//!
//! The central dynamic program runs postorder over the tree, maintaining per
//! node `v` a table `L_v[a][n]`: the joint probability of the data beneath
//! `v` and `n` substitutions beneath `v`, given that `v` is labeled `a`.
//! Branch-conditional tables come precomputed from the [`JumpProcess`];
//! combining a node's children is a convolution over the split of the count
//! between the two subtrees.

use velella_core::{Result, VelellaError};
use velella_stats::{prob_matrix, prob_vector, Matrix};

use crate::jump::JumpProcess;
use crate::model::PhyloModel;
use crate::msa::{Msa, GAP_CHAR};

/// Initial column capacity of per-node DP tables, replaced by the true
/// `maxsubst + 1` count once known.
const DP_INIT_COLS: usize = 500;

/// Marginal posterior moments of a bivariate alignment distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JointStats {
    pub mean_tot: f64,
    pub var_tot: f64,
    pub mean_left: f64,
    pub var_left: f64,
    pub mean_right: f64,
    pub var_right: f64,
}

/// Per-node DP state for one site.
struct DpTables {
    /// `l[v][a][n]`, sized `n_states x (maxsubst[v] + 1)`.
    l: Vec<Matrix>,
    /// Largest substitution count with support beneath each node.
    maxsubst: Vec<usize>,
}

/// Run the postorder recursion for one column tuple (`None` alignment means
/// leaves are unobserved, yielding the prior).
fn fill_tables(jp: &JumpProcess, msa: Option<&Msa>, tuple: usize) -> Result<DpTables> {
    let model = jp.model();
    let tree = model.tree();
    let size = model.n_states();
    let seq_idx = match msa {
        Some(m) => Some(model.msa_seq_idx(m)?),
        None => None,
    };

    let mut l: Vec<Matrix> = Vec::with_capacity(tree.node_count());
    for _ in 0..tree.node_count() {
        l.push(Matrix::zeros(0, 0));
    }
    let mut maxsubst = vec![0usize; tree.node_count()];

    for id in tree.iter_postorder() {
        let node = tree.node(id);

        if node.is_leaf() {
            let mut table = Matrix::zeros(size, DP_INIT_COLS);
            table.resize(size, 1);
            match (msa, seq_idx) {
                (Some(msa), Some(idx)) => {
                    let row = PhyloModel::bound_row(idx, id)?;
                    let c = msa.char_at_tuple(tuple, row);
                    if msa.is_missing(c) || c == GAP_CHAR {
                        // Marginalize the leaf out.
                        for a in 0..size {
                            table[a][0] = 1.0;
                        }
                    } else {
                        match msa.alphabet_index(c) {
                            Some(a) => table[a][0] = 1.0,
                            None => {
                                return Err(VelellaError::InvalidInput(format!(
                                    "unrecognized character '{}' in alignment",
                                    c as char
                                )))
                            }
                        }
                    }
                }
                _ => {
                    for a in 0..size {
                        table[a][0] = 1.0;
                    }
                }
            }
            maxsubst[id] = 0;
            l[id] = table;
        } else {
            let lc = node.lchild.expect("internal node");
            let rc = node.rchild.expect("internal node");
            let d_left = jp.branch_distrib(lc).expect("non-root node has branch tables");
            let d_right = jp.branch_distrib(rc).expect("non-root node has branch tables");
            let ncols_l = d_left[0].ncols();
            let ncols_r = d_right[0].ncols();

            let ms = (maxsubst[lc] + ncols_l - 1).max(maxsubst[rc] + ncols_r - 1);
            maxsubst[id] = ms;

            let mut table = Matrix::zeros(size, DP_INIT_COLS);
            table.resize(size, ms + 1);

            for n in 0..=ms {
                for j in 0..=n {
                    let m = n - j;
                    // Clip the inner sums to where both factors have support.
                    let min_i = j.saturating_sub(ncols_l - 1);
                    let max_i = j.min(maxsubst[lc]);
                    let min_k = m.saturating_sub(ncols_r - 1);
                    let max_k = m.min(maxsubst[rc]);

                    for a in 0..size {
                        let mut left = 0.0;
                        for b in 0..size {
                            for i in min_i..=max_i {
                                left += l[lc][b][i] * d_left[a][b][j - i];
                            }
                        }
                        let mut right = 0.0;
                        for c in 0..size {
                            for k in min_k..=max_k {
                                right += l[rc][c][k] * d_right[a][c][m - k];
                            }
                        }
                        table[a][n] += left * right;
                    }
                }
            }
            l[id] = table;
        }
    }

    Ok(DpTables { l, maxsubst })
}

// ── Scalar distributions ───────────────────────────────────────────────────

/// Prior distribution of the substitution count at a single site.
pub fn prior_site_distrib(jp: &JumpProcess) -> Result<Vec<f64>> {
    jp.branch_substs(jp.model().tree().total_branch_length())
}

/// Prior distribution of the substitution count over `nsites` sites.
pub fn prior_alignment_distrib(jp: &JumpProcess, nsites: usize) -> Result<Vec<f64>> {
    let p = prior_site_distrib(jp)?;
    prob_vector::convolve(&p, nsites)
}

/// Posterior distribution of the substitution count for one column tuple.
pub fn posterior_site_distrib(jp: &JumpProcess, msa: &Msa, tuple: usize) -> Result<Vec<f64>> {
    let model = jp.model();
    let tree = model.tree();
    let size = model.n_states();
    let freqs = model.backgd_freqs();

    let tables = fill_tables(jp, Some(msa), tuple)?;
    let root = tree.root();
    let ms = tables.maxsubst[root];

    let mut result = vec![0.0; ms + 1];
    for (n, slot) in result.iter_mut().enumerate() {
        for a in 0..size {
            *slot += tables.l[root][a][n] * freqs[a];
        }
    }

    prob_vector::normalize(&mut result)?;
    prob_vector::trim_tail(&mut result);
    prob_vector::normalize(&mut result)?;
    Ok(result)
}

/// Posterior distribution of the substitution count over a whole alignment.
pub fn posterior_alignment_distrib(jp: &JumpProcess, msa: &Msa) -> Result<Vec<f64>> {
    let mut tuple_p = Vec::with_capacity(msa.ntuples());
    for tuple in 0..msa.ntuples() {
        tuple_p.push(posterior_site_distrib(jp, msa, tuple)?);
    }
    let refs: Vec<&[f64]> = tuple_p.iter().map(|p| p.as_slice()).collect();
    prob_vector::convolve_many(&refs, Some(msa.counts()))
}

/// Posterior mean and variance over a whole alignment, without the explicit
/// convolution (moments of independent sites add).
pub fn posterior_alignment_stats(jp: &JumpProcess, msa: &Msa) -> Result<(f64, f64)> {
    let mut mean = 0.0;
    let mut var = 0.0;
    for tuple in 0..msa.ntuples() {
        let p = posterior_site_distrib(jp, msa, tuple)?;
        let (m, v) = prob_vector::stats(&p);
        let count = msa.counts()[tuple] as f64;
        mean += m * count;
        var += v * count;
    }
    Ok((mean, var))
}

// ── Bivariate (left subtree x right subtree) distributions ─────────────────

/// Joint distribution of the substitution counts in the left and right
/// subtrees beneath the root, for one column tuple.
///
/// With `msa = None` the leaves are unobserved and the prior is returned.
/// The left count includes the root's left branch; the right subtree is
/// treated as attached by a zero-length branch, so counts on the root's
/// right branch are not attributed (reroot the tree beforehand to move the
/// partition).
pub fn joint_site_distrib(jp: &JumpProcess, msa: Option<&Msa>, tuple: usize) -> Result<Matrix> {
    let model = jp.model();
    let tree = model.tree();
    let size = model.n_states();
    let freqs = model.backgd_freqs();

    let root = tree.node(tree.root());
    let (lc, rc) = match (root.lchild, root.rchild) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            return Err(VelellaError::InvalidInput(
                "joint distribution requires an internal root".into(),
            ))
        }
    };

    let tables = fill_tables(jp, msa, tuple)?;
    let d_left = jp.branch_distrib(lc).expect("root child has branch tables");
    let ncols_l = d_left[0].ncols();
    let d_right = jp.branch_distrib(rc).expect("root child has branch tables");

    let n1_max = tables.maxsubst[lc] + ncols_l;
    let n2_max = tables.maxsubst[rc] + d_right[0].ncols();

    let mut result = Matrix::zeros(n1_max, n2_max);
    for n1 in 0..n1_max {
        let min_i = n1.saturating_sub(ncols_l - 1);
        let max_i = n1.min(tables.maxsubst[lc]);
        for a in 0..size {
            let mut left = 0.0;
            for b in 0..size {
                for i in min_i..=max_i {
                    left += tables.l[lc][b][i] * d_left[a][b][n1 - i];
                }
            }
            let weighted = left * freqs[a];
            for n2 in 0..=tables.maxsubst[rc] {
                result[n1][n2] += weighted * tables.l[rc][a][n2];
            }
        }
    }

    prob_matrix::normalize(&mut result)?;
    prob_matrix::trim(&mut result);
    prob_matrix::normalize(&mut result)?;
    Ok(result)
}

/// Prior joint distribution over `nsites` sites.
pub fn prior_joint_alignment_distrib(jp: &JumpProcess, nsites: usize) -> Result<Matrix> {
    let p = joint_site_distrib(jp, None, 0)?;
    let (max_rows, max_cols) = if nsites > 25 {
        prob_matrix::clt_bounds(&p, nsites)
    } else {
        (usize::MAX, usize::MAX)
    };
    prob_matrix::convolve_with_bounds(&p, nsites, max_rows, max_cols)
}

/// Posterior joint distribution over a whole alignment.
pub fn posterior_joint_alignment_distrib(jp: &JumpProcess, msa: &Msa) -> Result<Matrix> {
    let mut parts = Vec::with_capacity(msa.ntuples());
    for tuple in 0..msa.ntuples() {
        let p = joint_site_distrib(jp, Some(msa), tuple)?;
        parts.push(prob_matrix::convolve(&p, msa.counts()[tuple])?);
    }
    let refs: Vec<&Matrix> = parts.iter().collect();
    prob_matrix::convolve_many_bounded(&refs, usize::MAX, usize::MAX)
}

/// Marginal posterior moments (left, right, total) over a whole alignment,
/// without the explicit convolution.
pub fn posterior_joint_alignment_stats(jp: &JumpProcess, msa: &Msa) -> Result<JointStats> {
    let mut stats = JointStats {
        mean_tot: 0.0,
        var_tot: 0.0,
        mean_left: 0.0,
        var_left: 0.0,
        mean_right: 0.0,
        var_right: 0.0,
    };
    for tuple in 0..msa.ntuples() {
        let p = joint_site_distrib(jp, Some(msa), tuple)?;
        let count = msa.counts()[tuple] as f64;

        let (m, v) = prob_vector::stats(&prob_matrix::marg_x(&p));
        stats.mean_left += m * count;
        stats.var_left += v * count;

        let (m, v) = prob_vector::stats(&prob_matrix::marg_y(&p));
        stats.mean_right += m * count;
        stats.var_right += v * count;

        let (m, v) = prob_vector::stats(&prob_matrix::marg_tot(&p));
        stats.mean_tot += m * count;
        stats.var_tot += v * count;
    }
    Ok(stats)
}
