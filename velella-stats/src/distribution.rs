//! Numerical special functions and reference distributions.
//!
//! Provides [`erf`], [`ln_gamma`], the normal quantile, Gaussian confidence
//! intervals, and truncated Poisson probability vectors used by the
//! substitution-count machinery.

use std::f64::consts::PI;

use velella_core::{Result, VelellaError};

/// Tail mass below which a Poisson vector is truncated.
const POISSON_TAIL: f64 = 1e-12;

// ── Special functions ──────────────────────────────────────────────────────

/// Error function, by the Abramowitz & Stegun 7.1.26 rational
/// approximation (absolute error below 1.5e-7).
pub fn erf(x: f64) -> f64 {
    const A: [f64; 5] = [
        0.254829592,
        -0.284496736,
        1.421413741,
        -1.453152027,
        1.061405429,
    ];
    const P: f64 = 0.3275911;

    // Odd function: evaluate on |x| and restore the sign.
    let negative = x < 0.0;
    let x = x.abs();

    let u = 1.0 / (1.0 + P * x);
    let mut series = 0.0;
    for &a in A.iter().rev() {
        series = (series + a) * u;
    }
    let value = 1.0 - series * (-x * x).exp();

    if negative {
        -value
    } else {
        value
    }
}

/// Natural log of the gamma function, by the Lanczos approximation with
/// g = 7 and 9 coefficients.
pub fn ln_gamma(x: f64) -> f64 {
    const LANCZOS_G: f64 = 7.0;
    const LANCZOS: [f64; 9] = [
        0.99999999999980993,
        676.5203681218851,
        -1259.1392167224028,
        771.32342877765313,
        -176.61502916214059,
        12.507343278686905,
        -0.13857109526572012,
        9.9843695780195716e-6,
        1.5056327351493116e-7,
    ];

    if x < 0.5 {
        // Γ(x) Γ(1-x) = π / sin(πx), so small arguments reflect.
        (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x)
    } else {
        let z = x - 1.0;
        let mut series = LANCZOS[0];
        for (k, &c) in LANCZOS.iter().enumerate().skip(1) {
            series += c / (z + k as f64);
        }
        let w = z + LANCZOS_G + 0.5;
        0.5 * (2.0 * PI).ln() + (z + 0.5) * w.ln() - w + series.ln()
    }
}

/// Standard normal CDF.
pub fn norm_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Inverse standard normal CDF (probit function).
///
/// Abramowitz & Stegun 26.2.23 rational approximation, accurate to
/// ~4.5e-4 over `(0, 1)`.
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    // Symmetry: for p < 0.5 compute -quantile(1 - p).
    let (sign, q) = if p < 0.5 { (-1.0, 1.0 - p) } else { (1.0, p) };

    const C0: f64 = 2.515517;
    const C1: f64 = 0.802853;
    const C2: f64 = 0.010328;
    const D1: f64 = 1.432788;
    const D2: f64 = 0.189269;
    const D3: f64 = 0.001308;

    let t = (-2.0 * (1.0 - q).ln()).sqrt();
    let z = t - (C0 + C1 * t + C2 * t * t) / (1.0 + D1 * t + D2 * t * t + D3 * t * t * t);

    sign * z
}

/// Two-sided Gaussian confidence interval `mean ± z·sd` at level `cl`.
pub fn norm_confidence_interval(mean: f64, sd: f64, cl: f64) -> Result<(f64, f64)> {
    if !(0.0 < cl && cl < 1.0) {
        return Err(VelellaError::InvalidInput(format!(
            "confidence level {} not in (0, 1)",
            cl
        )));
    }
    if sd < 0.0 {
        return Err(VelellaError::InvalidInput(format!(
            "negative standard deviation {}",
            sd
        )));
    }
    let z = normal_quantile(0.5 * (1.0 + cl));
    Ok((mean - z * sd, mean + z * sd))
}

// ── Poisson vectors ────────────────────────────────────────────────────────

/// Poisson probability vector for the given rate, truncated where the
/// remaining tail mass drops below 1e-12.
///
/// The vector's length *is* the truncation point, visible to callers that
/// need to bound their own tables against it. `rate = 0` yields the point
/// mass `[1.0]`. The result is normalized so the truncated mass is folded
/// back in.
pub fn poisson_vector(rate: f64) -> Result<Vec<f64>> {
    if rate < 0.0 || !rate.is_finite() {
        return Err(VelellaError::InvalidInput(format!(
            "Poisson rate {} must be finite and non-negative",
            rate
        )));
    }
    if rate == 0.0 {
        return Ok(vec![1.0]);
    }

    // Evaluate the pmf in log space so large rates cannot underflow the
    // e^{-rate} prefactor.
    let mut p = Vec::new();
    let mut cum = 0.0;
    let mut j = 0usize;
    loop {
        let ln_pj = -rate + j as f64 * rate.ln() - ln_gamma(j as f64 + 1.0);
        let pj = ln_pj.exp();
        p.push(pj);
        cum += pj;
        // Stop once past the mode with negligible tail remaining.
        if j as f64 > rate && 1.0 - cum < POISSON_TAIL {
            break;
        }
        j += 1;
    }

    let sum: f64 = p.iter().sum();
    for v in &mut p {
        *v /= sum;
    }
    Ok(p)
}
