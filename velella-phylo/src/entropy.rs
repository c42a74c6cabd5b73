//! Relative entropy of two tree models and conserved-element length bounds.
//!
//! For conserved/non-conserved model pairs this computes the per-site
//! relative entropy `H` by brute force (enumerating every possible leaf
//! labeling as a synthetic alignment column) and derives the expected
//! minimum conserved-element length `L_min` and maximum tolerated
//! non-conserved gap `L_max` for a given target coverage and expected
//! length. A Newton iteration inverts the relationship to recommend a new
//! expected length for a target value of `L_min * H`.
//!
//! The enumeration is exponential in the leaf count; it is intended for the
//! small trees these tuning runs use.

use std::f64::consts::LN_2;

use velella_core::{Result, VelellaError};

use crate::likelihood;
use crate::model::PhyloModel;
use crate::msa::Msa;

/// Checksum tolerance for the enumerated column distributions.
const CHECKSUM_TOL: f64 = 1e-4;

/// Relative entropy and length bounds for a conserved/non-conserved pair.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntropyStats {
    /// Relative entropy of the conserved model w.r.t. the non-conserved one
    /// (bits per site).
    pub h: f64,
    /// Relative entropy of the non-conserved model w.r.t. the conserved one.
    pub h_alt: f64,
    /// Transition rate out of a conserved element, `1/omega`.
    pub mu: f64,
    /// Transition rate into a conserved element, `mu * gamma / (1 - gamma)`.
    pub nu: f64,
    /// Expected minimum number of conserved sites needed to predict an
    /// element.
    pub l_min: f64,
    /// Expected maximum number of non-conserved sites tolerated within an
    /// element.
    pub l_max: f64,
}

/// Relative entropies `(H, H_alt)` of two models over the same tree and
/// alphabet, in bits per site.
///
/// Enumerates all `S^leaves` leaf labelings, obtains base-2 column
/// log-likelihoods from the pruning collaborator, and verifies that *both*
/// column distributions sum to 1 within 1e-4.
pub fn relative_entropy(cons: &PhyloModel, noncons: &PhyloModel) -> Result<(f64, f64)> {
    if cons.alphabet() != noncons.alphabet() {
        return Err(VelellaError::InvalidInput(
            "models have different alphabets".into(),
        ));
    }
    let mut cons_names: Vec<&str> = leaf_names(cons)?;
    let mut noncons_names: Vec<&str> = leaf_names(noncons)?;
    cons_names.sort_unstable();
    noncons_names.sort_unstable();
    if cons_names != noncons_names {
        return Err(VelellaError::InvalidInput(
            "models have different leaf sets".into(),
        ));
    }

    let msa = enumerate_labelings(cons)?;
    let cons_ll = likelihood::col_log2_likelihoods(cons, &msa)?;
    let noncons_ll = likelihood::col_log2_likelihoods(noncons, &msa)?;

    let mut h = 0.0;
    let mut h_alt = 0.0;
    let mut checksum_cons = 0.0;
    let mut checksum_noncons = 0.0;
    for (c, n) in cons_ll.iter().zip(&noncons_ll) {
        let p_cons = c.exp2();
        let p_noncons = n.exp2();
        checksum_cons += p_cons;
        checksum_noncons += p_noncons;
        h += p_cons * (c - n);
        h_alt += p_noncons * (n - c);
    }

    if (checksum_cons - 1.0).abs() > CHECKSUM_TOL || (checksum_noncons - 1.0).abs() > CHECKSUM_TOL
    {
        return Err(VelellaError::Numerical(format!(
            "column distribution checksums failed ({} and {}, expected 1 +/- {})",
            checksum_cons, checksum_noncons, CHECKSUM_TOL
        )));
    }

    Ok((h, h_alt))
}

/// Relative entropy plus the `L_min`/`L_max` bounds for target coverage
/// `gamma` and expected element length `omega`.
pub fn entropy_stats(
    cons: &PhyloModel,
    noncons: &PhyloModel,
    gamma: f64,
    omega: f64,
) -> Result<EntropyStats> {
    let (h, h_alt) = relative_entropy(cons, noncons)?;
    let (mu, nu, l_min, l_max) = length_bounds(h, h_alt, gamma, omega)?;
    Ok(EntropyStats {
        h,
        h_alt,
        mu,
        nu,
        l_min,
        l_max,
    })
}

/// `(mu, nu, L_min, L_max)` from entropies and transition parameters.
pub fn length_bounds(h: f64, h_alt: f64, gamma: f64, omega: f64) -> Result<(f64, f64, f64, f64)> {
    if !(0.0 < gamma && gamma < 1.0) {
        return Err(VelellaError::InvalidInput(format!(
            "target coverage {} not in (0, 1)",
            gamma
        )));
    }
    if !(omega > 0.0) {
        return Err(VelellaError::InvalidInput(format!(
            "expected length {} must be positive",
            omega
        )));
    }
    let mu = 1.0 / omega;
    let nu = mu * gamma / (1.0 - gamma);
    if nu >= 1.0 || mu >= 1.0 {
        return Err(VelellaError::InvalidInput(format!(
            "transition rates out of range (mu = {}, nu = {})",
            mu, nu
        )));
    }

    let numer = nu.log2() + mu.log2() - (1.0 - nu).log2() - (1.0 - mu).log2();
    let denom_min = (1.0 - nu).log2() - (1.0 - mu).log2() - h;
    let denom_max = (1.0 - mu).log2() - (1.0 - nu).log2() - h_alt;
    if denom_min == 0.0 || denom_max == 0.0 {
        return Err(VelellaError::Numerical(
            "length bound denominator vanished".into(),
        ));
    }

    Ok((mu, nu, numer / denom_min, numer / denom_max))
}

/// Solve for the expected element length that yields `lmin_h = L_min * H`
/// (both in bits), holding `h` and the coverage fixed.
///
/// Newton iteration on `mu = 1/omega`, starting from `1/omega` (unclamped);
/// every subsequent iterate is clamped to `[1e-3, 1 - 1e-3]`. Converges
/// when the step drops below 1e-4 and fails after 30 iterations.
pub fn solve_expected_length(omega: f64, gamma: f64, h: f64, lmin_h: f64) -> Result<f64> {
    if !(0.0 < gamma && gamma < 1.0) {
        return Err(VelellaError::InvalidInput(format!(
            "target coverage {} not in (0, 1)",
            gamma
        )));
    }
    if !(omega > 0.0) || !(h > 0.0) || !(lmin_h > 0.0) {
        return Err(VelellaError::InvalidInput(format!(
            "omega ({}), H ({}), and L_min*H ({}) must be positive",
            omega, h, lmin_h
        )));
    }

    // Natural-log scale keeps the derivative simple.
    let h_nat = h * LN_2;
    let target = lmin_h * LN_2;
    let l_min = target / h_nat;
    let odds = gamma / (1.0 - gamma);

    let mut mu = 1.0 / omega;
    for _ in 0..30 {
        let one_minus_odds_mu = 1.0 - odds * mu;
        if one_minus_odds_mu <= 0.0 || mu <= 0.0 || mu >= 1.0 {
            return Err(VelellaError::Numerical(format!(
                "Newton iterate mu = {} left the feasible region",
                mu
            )));
        }
        let func = (l_min + 1.0) * one_minus_odds_mu.ln() - (l_min - 1.0) * (1.0 - mu).ln()
            - (odds * mu).ln()
            - mu.ln()
            - target;
        let deriv = -(l_min + 1.0) * odds / one_minus_odds_mu + (l_min - 1.0) / (1.0 - mu)
            - 2.0 / mu;
        let next = (mu - func / deriv).clamp(1e-3, 1.0 - 1e-3);
        if (next - mu).abs() < 1e-4 {
            return Ok(1.0 / next);
        }
        mu = next;
    }

    Err(VelellaError::NoConvergence(
        "Newton iteration for expected length (30 steps)".into(),
    ))
}

/// Leaf names of a model's tree, erroring on unnamed leaves.
fn leaf_names(model: &PhyloModel) -> Result<Vec<&str>> {
    model
        .tree()
        .leaves()
        .into_iter()
        .map(|id| {
            model.tree().node(id).name.as_deref().ok_or_else(|| {
                VelellaError::InvalidInput(format!("leaf node {} has no name", id))
            })
        })
        .collect()
}

/// Synthetic alignment holding every possible leaf labeling as a column.
fn enumerate_labelings(model: &PhyloModel) -> Result<Msa> {
    let alphabet = model.alphabet();
    let size = alphabet.len();
    let names: Vec<String> = leaf_names(model)?
        .into_iter()
        .map(str::to_owned)
        .collect();
    let nleaves = names.len();

    let nlabels = size.checked_pow(nleaves as u32).ok_or_else(|| {
        VelellaError::InvalidInput(format!(
            "{}^{} leaf labelings overflow; tree too large for brute-force entropy",
            size, nleaves
        ))
    })?;

    let mut rows = vec![Vec::with_capacity(nlabels); nleaves];
    for label in 0..nlabels {
        let mut rem = label;
        for row in rows.iter_mut() {
            row.push(alphabet[rem % size]);
            rem /= size;
        }
    }
    Msa::new(names, rows, alphabet)
}
