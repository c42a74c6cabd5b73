//! Probability vectors over contiguous integer support `0..n`.
//!
//! A probability vector is a plain `&[f64]` whose entry `i` is `P(X = i)`.
//! All operations that return a distribution normalize it and trim trailing
//! entries below 1e-10; interior zeros are kept. Every accumulation runs in
//! index-ascending order so results are bit-reproducible across runs.

use velella_core::{Result, VelellaError};

/// Trailing entries below this value are trimmed after normalization.
pub const TRIM_THRESHOLD: f64 = 1e-10;

/// Which tail of a discrete distribution a p-value covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    /// `P(X <= x)`
    Lower,
    /// `P(X >= x)`
    Upper,
}

/// Normalize `p` in place so it sums to 1.
///
/// Fails if the mass is zero, negative, or non-finite.
pub fn normalize(p: &mut [f64]) -> Result<()> {
    let sum: f64 = p.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        return Err(VelellaError::Numerical(format!(
            "cannot normalize distribution with mass {}",
            sum
        )));
    }
    for v in p.iter_mut() {
        *v /= sum;
    }
    Ok(())
}

/// Drop trailing entries below [`TRIM_THRESHOLD`], keeping at least one.
pub fn trim_tail(p: &mut Vec<f64>) {
    while p.len() > 1 && p[p.len() - 1] < TRIM_THRESHOLD {
        p.pop();
    }
}

/// Mean and variance of the distribution.
pub fn stats(p: &[f64]) -> (f64, f64) {
    let mut mean = 0.0;
    let mut ex2 = 0.0;
    for (i, &v) in p.iter().enumerate() {
        let x = i as f64;
        mean += x * v;
        ex2 += x * x * v;
    }
    (mean, ex2 - mean * mean)
}

/// Smallest equal-tail two-sided interval `(lo, hi)` containing mass >= `cl`.
///
/// Each tail outside the interval carries at most `(1 - cl) / 2`; on ties
/// the earlier lower bound wins.
pub fn confidence_interval(p: &[f64], cl: f64) -> Result<(usize, usize)> {
    if p.is_empty() {
        return Err(VelellaError::InvalidInput(
            "confidence interval of empty distribution".into(),
        ));
    }
    if !(0.0 < cl && cl < 1.0) {
        return Err(VelellaError::InvalidInput(format!(
            "confidence level {} not in (0, 1)",
            cl
        )));
    }
    let tail = (1.0 - cl) / 2.0;

    let mut lo = 0;
    let mut cum = 0.0;
    while lo + 1 < p.len() && cum + p[lo] <= tail {
        cum += p[lo];
        lo += 1;
    }

    let mut hi = p.len() - 1;
    cum = 0.0;
    while hi > lo && cum + p[hi] <= tail {
        cum += p[hi];
        hi -= 1;
    }

    Ok((lo, hi))
}

/// One-sided p-value over discrete support: `P(X <= x)` or `P(X >= x)`.
pub fn p_value(p: &[f64], x: f64, tail: Tail) -> f64 {
    let mut sum = 0.0;
    for (i, &v) in p.iter().enumerate() {
        let keep = match tail {
            Tail::Lower => i as f64 <= x,
            Tail::Upper => i as f64 >= x,
        };
        if keep {
            sum += v;
        }
    }
    sum
}

/// Convolution of two probability vectors.
///
/// `c[s] = sum_i a[i] * b[s - i]`, accumulated with `i` ascending in the
/// outer loop and `j` ascending in the inner loop.
pub fn convolve_pair(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut c = vec![0.0; a.len() + b.len() - 1];
    for (i, &ai) in a.iter().enumerate() {
        if ai == 0.0 {
            continue;
        }
        for (j, &bj) in b.iter().enumerate() {
            c[i + j] += ai * bj;
        }
    }
    c
}

/// `k`-fold convolution of `p` with itself (`k >= 1`), by repeated squaring.
///
/// The result is normalized and tail-trimmed.
pub fn convolve(p: &[f64], k: usize) -> Result<Vec<f64>> {
    if p.is_empty() {
        return Err(VelellaError::InvalidInput(
            "convolution of empty distribution".into(),
        ));
    }
    if k == 0 {
        return Err(VelellaError::InvalidInput(
            "convolution count must be >= 1".into(),
        ));
    }

    let mut base = p.to_vec();
    let mut acc: Option<Vec<f64>> = None;
    let mut k = k;
    loop {
        if k & 1 == 1 {
            acc = Some(match acc {
                None => base.clone(),
                Some(prev) => {
                    let mut c = convolve_pair(&prev, &base);
                    trim_tail(&mut c);
                    c
                }
            });
        }
        k >>= 1;
        if k == 0 {
            break;
        }
        base = convolve_pair(&base, &base);
        trim_tail(&mut base);
    }

    let mut result = acc.expect("k >= 1 sets the accumulator");
    normalize(&mut result)?;
    trim_tail(&mut result);
    Ok(result)
}

/// Convolve a collection of probability vectors into one.
///
/// Without `counts` each vector enters once; with `counts`, vector `i` is
/// first convolved with itself `counts[i]` times. Vectors are folded
/// smallest-support-first to keep intermediate supports small (convolution
/// is commutative, so the order does not change the result).
pub fn convolve_many(ps: &[&[f64]], counts: Option<&[usize]>) -> Result<Vec<f64>> {
    if ps.is_empty() {
        return Err(VelellaError::InvalidInput(
            "convolve_many requires at least one distribution".into(),
        ));
    }
    if let Some(c) = counts {
        if c.len() != ps.len() {
            return Err(VelellaError::InvalidInput(format!(
                "counts length {} does not match {} distributions",
                c.len(),
                ps.len()
            )));
        }
    }

    let mut parts: Vec<Vec<f64>> = Vec::with_capacity(ps.len());
    for (i, p) in ps.iter().enumerate() {
        if p.is_empty() {
            return Err(VelellaError::InvalidInput(
                "convolve_many: empty distribution".into(),
            ));
        }
        match counts.map(|c| c[i]) {
            Some(0) => continue,
            Some(c) => parts.push(convolve(p, c)?),
            None => parts.push(p.to_vec()),
        }
    }
    if parts.is_empty() {
        return Err(VelellaError::InvalidInput(
            "convolve_many: all counts are zero".into(),
        ));
    }

    parts.sort_by_key(|p| p.len());
    let mut iter = parts.into_iter();
    let mut acc = iter.next().expect("checked non-empty");
    for next in iter {
        acc = convolve_pair(&acc, &next);
        trim_tail(&mut acc);
    }

    normalize(&mut acc)?;
    trim_tail(&mut acc);
    Ok(acc)
}
