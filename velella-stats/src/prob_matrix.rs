//! Bivariate probability distributions over a grid of integer support.
//!
//! A probability matrix `p` has entry `p[x][y] = P(X = x, Y = y)` for
//! `x < nrows`, `y < ncols`. Operations mirror the vector layer: results are
//! normalized, trailing all-below-threshold rows and columns are trimmed,
//! and accumulations run in index-ascending order for reproducibility.

use velella_core::{Result, VelellaError};

use crate::matrix::Matrix;
use crate::prob_vector::{self, TRIM_THRESHOLD};

/// Normalize `m` in place so all entries sum to 1.
pub fn normalize(m: &mut Matrix) -> Result<()> {
    let sum = m.sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return Err(VelellaError::Numerical(format!(
            "cannot normalize bivariate distribution with mass {}",
            sum
        )));
    }
    m.scale(1.0 / sum);
    Ok(())
}

/// Trim trailing rows and columns whose entries are all below the threshold.
///
/// At least one row and one column are kept; interior zeros survive.
pub fn trim(m: &mut Matrix) {
    let mut nrows = m.nrows();
    while nrows > 1 && m[nrows - 1].iter().all(|&v| v < TRIM_THRESHOLD) {
        nrows -= 1;
    }
    let mut ncols = m.ncols();
    while ncols > 1
        && (0..nrows).all(|i| m[i][ncols - 1] < TRIM_THRESHOLD)
    {
        ncols -= 1;
    }
    if nrows != m.nrows() || ncols != m.ncols() {
        m.resize(nrows, ncols);
    }
}

/// Marginal distribution of `X` (row sums).
pub fn marg_x(m: &Matrix) -> Vec<f64> {
    m.rows().iter().map(|row| row.iter().sum()).collect()
}

/// Marginal distribution of `Y` (column sums).
pub fn marg_y(m: &Matrix) -> Vec<f64> {
    let mut out = vec![0.0; m.ncols()];
    for row in m.rows() {
        for (j, &v) in row.iter().enumerate() {
            out[j] += v;
        }
    }
    out
}

/// Distribution of the total `X + Y` (anti-diagonal sums).
pub fn marg_tot(m: &Matrix) -> Vec<f64> {
    let mut out = vec![0.0; m.nrows() + m.ncols() - 1];
    for (i, row) in m.rows().iter().enumerate() {
        for (j, &v) in row.iter().enumerate() {
            out[i + j] += v;
        }
    }
    out
}

/// Conditional distribution of `X` given `X + Y = tot`.
///
/// Entry `x` is `p[x][tot - x] / P(X + Y = tot)`. Fails if the total has no
/// mass (the orchestrator never asks for such a total).
pub fn x_given_tot(m: &Matrix, tot: usize) -> Result<Vec<f64>> {
    if tot >= m.nrows() + m.ncols() - 1 {
        return Err(VelellaError::InvalidInput(format!(
            "total {} outside support of {}x{} distribution",
            tot,
            m.nrows(),
            m.ncols()
        )));
    }
    let mut cond = vec![0.0; (tot + 1).min(m.nrows())];
    for (x, slot) in cond.iter_mut().enumerate() {
        let y = tot - x;
        if y < m.ncols() {
            *slot = m[x][y];
        }
    }
    prob_vector::normalize(&mut cond)?;
    Ok(cond)
}

/// Conditional distribution of `Y` given `X + Y = tot`.
pub fn y_given_tot(m: &Matrix, tot: usize) -> Result<Vec<f64>> {
    if tot >= m.nrows() + m.ncols() - 1 {
        return Err(VelellaError::InvalidInput(format!(
            "total {} outside support of {}x{} distribution",
            tot,
            m.nrows(),
            m.ncols()
        )));
    }
    let mut cond = vec![0.0; (tot + 1).min(m.ncols())];
    for (y, slot) in cond.iter_mut().enumerate() {
        let x = tot - y;
        if x < m.nrows() {
            *slot = m[x][y];
        }
    }
    prob_vector::normalize(&mut cond)?;
    Ok(cond)
}

/// Conditional of `X` given `X + Y = tot`, assuming `X` and `Y` independent
/// with the given marginals.
///
/// Entry `x` is `px[x] * py[tot - x]`, normalized. Used in place of
/// [`x_given_tot`] when the explicit joint was never materialized.
pub fn x_given_tot_indep(tot: usize, px: &[f64], py: &[f64]) -> Result<Vec<f64>> {
    if tot >= px.len() + py.len() - 1 {
        return Err(VelellaError::InvalidInput(format!(
            "total {} outside combined support {} + {}",
            tot,
            px.len(),
            py.len()
        )));
    }
    let mut cond = vec![0.0; (tot + 1).min(px.len())];
    for (x, slot) in cond.iter_mut().enumerate() {
        let y = tot - x;
        if y < py.len() {
            *slot = px[x] * py[y];
        }
    }
    prob_vector::normalize(&mut cond)?;
    Ok(cond)
}

/// Conditional of `Y` given `X + Y = tot` under independence.
pub fn y_given_tot_indep(tot: usize, px: &[f64], py: &[f64]) -> Result<Vec<f64>> {
    x_given_tot_indep(tot, py, px)
}

/// Bivariate moments: `(mean_x, mean_y, var_x, var_y, cov)`.
pub fn stats(m: &Matrix) -> (f64, f64, f64, f64, f64) {
    let mut mean_x = 0.0;
    let mut mean_y = 0.0;
    let mut ex2 = 0.0;
    let mut ey2 = 0.0;
    let mut exy = 0.0;
    for (i, row) in m.rows().iter().enumerate() {
        let x = i as f64;
        for (j, &v) in row.iter().enumerate() {
            let y = j as f64;
            mean_x += x * v;
            mean_y += y * v;
            ex2 += x * x * v;
            ey2 += y * y * v;
            exy += x * y * v;
        }
    }
    (
        mean_x,
        mean_y,
        ex2 - mean_x * mean_x,
        ey2 - mean_y * mean_y,
        exy - mean_x * mean_y,
    )
}

/// 2-D convolution of two bivariate distributions, truncated to at most
/// `max_rows x max_cols`.
pub fn convolve_pair_bounded(
    a: &Matrix,
    b: &Matrix,
    max_rows: usize,
    max_cols: usize,
) -> Matrix {
    let nrows = (a.nrows() + b.nrows() - 1).min(max_rows.max(1));
    let ncols = (a.ncols() + b.ncols() - 1).min(max_cols.max(1));
    let mut c = Matrix::zeros(nrows, ncols);
    for (i, arow) in a.rows().iter().enumerate() {
        if i >= nrows {
            break;
        }
        for (j, &aij) in arow.iter().enumerate() {
            if j >= ncols || aij == 0.0 {
                continue;
            }
            let kmax = (nrows - i).min(b.nrows());
            for (k, brow) in b.rows().iter().take(kmax).enumerate() {
                let lmax = (ncols - j).min(b.ncols());
                for (l, &bkl) in brow.iter().take(lmax).enumerate() {
                    c[i + k][j + l] += aij * bkl;
                }
            }
        }
    }
    c
}

/// `k`-fold self-convolution (`k >= 1`) by repeated squaring, normalized and
/// trimmed.
pub fn convolve(m: &Matrix, k: usize) -> Result<Matrix> {
    convolve_with_bounds(m, k, usize::MAX, usize::MAX)
}

/// `k`-fold self-convolution with every intermediate truncated to
/// `max_rows x max_cols`.
///
/// The bounds are typically derived from a central-limit-theorem estimate of
/// the final support; see [`clt_bounds`].
pub fn convolve_with_bounds(
    m: &Matrix,
    k: usize,
    max_rows: usize,
    max_cols: usize,
) -> Result<Matrix> {
    if k == 0 {
        return Err(VelellaError::InvalidInput(
            "convolution count must be >= 1".into(),
        ));
    }

    let mut base = m.clone();
    let mut acc: Option<Matrix> = None;
    let mut k = k;
    loop {
        if k & 1 == 1 {
            acc = Some(match acc {
                None => base.clone(),
                Some(prev) => {
                    let mut c = convolve_pair_bounded(&prev, &base, max_rows, max_cols);
                    trim(&mut c);
                    c
                }
            });
        }
        k >>= 1;
        if k == 0 {
            break;
        }
        base = convolve_pair_bounded(&base, &base, max_rows, max_cols);
        trim(&mut base);
    }

    let mut result = acc.expect("k >= 1 sets the accumulator");
    normalize(&mut result)?;
    trim(&mut result);
    Ok(result)
}

/// Convolve a collection of bivariate distributions, truncating every
/// intermediate to `max_rows x max_cols`.
///
/// Folds smallest-area-first to keep intermediate supports small.
pub fn convolve_many_bounded(
    ms: &[&Matrix],
    max_rows: usize,
    max_cols: usize,
) -> Result<Matrix> {
    if ms.is_empty() {
        return Err(VelellaError::InvalidInput(
            "convolve_many requires at least one distribution".into(),
        ));
    }

    let mut parts: Vec<Matrix> = ms.iter().map(|&m| m.clone()).collect();
    parts.sort_by_key(|m| m.nrows() * m.ncols());
    let mut iter = parts.into_iter();
    let mut acc = iter.next().expect("checked non-empty");
    for next in iter {
        acc = convolve_pair_bounded(&acc, &next, max_rows, max_cols);
        trim(&mut acc);
    }

    normalize(&mut acc)?;
    trim(&mut acc);
    Ok(acc)
}

/// Central-limit-theorem bounds on the support of a `k`-fold convolution:
/// `ceil(k*mean + 6*sqrt(k*var))` entries per axis.
pub fn clt_bounds(m: &Matrix, k: usize) -> (usize, usize) {
    let (mean_x, mean_y, var_x, var_y, _) = stats(m);
    let kf = k as f64;
    let rows = (kf * mean_x + 6.0 * (kf * var_x).sqrt()).ceil() as usize;
    let cols = (kf * mean_y + 6.0 * (kf * var_y).sqrt()).ceil() as usize;
    (rows.max(1), cols.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Independent joint from two marginals (outer product).
    fn outer(px: &[f64], py: &[f64]) -> Matrix {
        let rows = px
            .iter()
            .map(|&a| py.iter().map(|&b| a * b).collect())
            .collect();
        Matrix::from_rows(rows).unwrap()
    }

    #[test]
    fn marginals_are_consistent() {
        let m = Matrix::from_rows(vec![vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap();
        let mx = marg_x(&m);
        let my = marg_y(&m);
        assert!((mx[0] - 0.3).abs() < 1e-15);
        assert!((mx[1] - 0.7).abs() < 1e-15);
        assert!((my[0] - 0.4).abs() < 1e-15);
        assert!((my[1] - 0.6).abs() < 1e-15);
        for (i, row) in m.rows().iter().enumerate() {
            let s: f64 = row.iter().sum();
            assert!((s - mx[i]).abs() < 1e-15);
        }
    }

    #[test]
    fn marg_tot_sums_antidiagonals() {
        let m = Matrix::from_rows(vec![vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap();
        let tot = marg_tot(&m);
        assert_eq!(tot.len(), 3);
        assert!((tot[0] - 0.1).abs() < 1e-15);
        assert!((tot[1] - 0.5).abs() < 1e-15);
        assert!((tot[2] - 0.4).abs() < 1e-15);
    }

    #[test]
    fn independent_joint_total_is_marginal_convolution() {
        let px = [0.2, 0.5, 0.3];
        let py = [0.6, 0.4];
        let m = outer(&px, &py);
        let tot = marg_tot(&m);
        let conv = prob_vector::convolve_pair(&px, &py);
        for (a, b) in tot.iter().zip(&conv) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn conditional_on_total() {
        let m = Matrix::from_rows(vec![vec![0.1, 0.2], vec![0.3, 0.4]]).unwrap();
        // X + Y = 1 has mass 0.5 split as p[0][1] = 0.2, p[1][0] = 0.3.
        let cond = x_given_tot(&m, 1).unwrap();
        assert_eq!(cond.len(), 2);
        assert!((cond[0] - 0.4).abs() < 1e-12);
        assert!((cond[1] - 0.6).abs() < 1e-12);

        let cond_y = y_given_tot(&m, 1).unwrap();
        assert!((cond_y[0] - 0.6).abs() < 1e-12);
        assert!((cond_y[1] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn conditional_fails_outside_support() {
        let m = Matrix::from_rows(vec![vec![1.0]]).unwrap();
        assert!(x_given_tot(&m, 1).is_err());
    }

    #[test]
    fn conditional_fails_on_zero_mass_total() {
        let m = Matrix::from_rows(vec![vec![0.5, 0.0], vec![0.0, 0.5]]).unwrap();
        assert!(x_given_tot(&m, 1).is_err());
    }

    #[test]
    fn indep_conditional_matches_exact_for_independent_joint() {
        let px = [0.2, 0.5, 0.3];
        let py = [0.6, 0.4];
        let m = outer(&px, &py);
        for tot in 0..4 {
            let exact = x_given_tot(&m, tot).unwrap();
            let indep = x_given_tot_indep(tot, &px, &py).unwrap();
            assert_eq!(exact.len(), indep.len());
            for (a, b) in exact.iter().zip(&indep) {
                assert!((a - b).abs() < 1e-12, "tot = {}", tot);
            }
        }
    }

    #[test]
    fn stats_of_independent_joint_has_zero_cov() {
        let m = outer(&[0.3, 0.7], &[0.5, 0.25, 0.25]);
        let (mx, my, vx, vy, cov) = stats(&m);
        assert!((mx - 0.7).abs() < 1e-12);
        assert!((my - 0.75).abs() < 1e-12);
        assert!((vx - 0.21).abs() < 1e-12);
        assert!(vy > 0.0);
        assert!(cov.abs() < 1e-12);
    }

    #[test]
    fn marginal_commutes_with_convolution() {
        // marg_x(P * P) == marg_x(P) * marg_x(P), including for dependent P.
        let mut m =
            Matrix::from_rows(vec![vec![0.4, 0.1], vec![0.1, 0.4]]).unwrap();
        normalize(&mut m).unwrap();
        let conv = convolve(&m, 2).unwrap();
        let lhs = marg_x(&conv);
        let mx = marg_x(&m);
        let rhs = prob_vector::convolve(&mx, 2).unwrap();
        assert_eq!(lhs.len(), rhs.len());
        for (a, b) in lhs.iter().zip(&rhs) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn bounded_convolution_matches_unbounded_with_loose_bounds() {
        let m = outer(&[0.5, 0.5], &[0.9, 0.1]);
        let exact = convolve(&m, 4).unwrap();
        let bounded = convolve_with_bounds(&m, 4, 100, 100).unwrap();
        assert_eq!(exact.nrows(), bounded.nrows());
        assert_eq!(exact.ncols(), bounded.ncols());
        for (ra, rb) in exact.rows().iter().zip(bounded.rows()) {
            for (a, b) in ra.iter().zip(rb) {
                assert!((a - b).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn convolve_many_bounded_matches_powers() {
        let m = outer(&[0.5, 0.5], &[0.7, 0.3]);
        let p2 = convolve(&m, 2).unwrap();
        let via_many = convolve_many_bounded(&[&m, &p2], 100, 100).unwrap();
        let direct = convolve(&m, 3).unwrap();
        assert_eq!(via_many.nrows(), direct.nrows());
        for (ra, rb) in via_many.rows().iter().zip(direct.rows()) {
            for (a, b) in ra.iter().zip(rb) {
                assert!((a - b).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn trim_drops_trailing_noise() {
        let mut m = Matrix::from_rows(vec![
            vec![0.5, 0.5, 1e-12],
            vec![1e-12, 0.0, 1e-13],
        ])
        .unwrap();
        trim(&mut m);
        assert_eq!(m.nrows(), 1);
        assert_eq!(m.ncols(), 2);
    }

    #[test]
    fn clt_bounds_scale_with_length() {
        let m = outer(&[0.5, 0.5], &[0.5, 0.5]);
        let (r1, c1) = clt_bounds(&m, 4);
        let (r2, c2) = clt_bounds(&m, 100);
        assert!(r2 > r1);
        assert!(c2 > c1);
        // Mean of the 100-fold total is 50 per axis; bounds must exceed it.
        assert!(r2 >= 50 && c2 >= 50);
    }
}
