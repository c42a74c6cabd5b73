//! Per-feature substitution-count statistics and p-values.
//!
//! A feature is a contiguous span of alignment columns. For each feature
//! the orchestrator compares the prior distribution of the substitution
//! count (model + tree alone) against posterior moments aggregated from the
//! per-column posteriors, yielding conservation (`p_cons`) and acceleration
//! (`p_anti_cons`) p-values.
//!
//! Priors for arbitrary feature lengths are assembled from precomputed
//! powers-of-two convolutions of the per-site prior, selected by the binary
//! digits of the length. The bivariate version additionally guards the
//! joint-prior size: features longer than the tractable bound fall back to
//! 1-D marginal convolutions plus an independence approximation for the
//! conditional p-values.

use velella_core::{Result, VelellaError};
use velella_stats::{distribution, prob_matrix, prob_vector, Matrix, Tail};

use crate::jump::JumpProcess;
use crate::msa::Msa;
use crate::subst;

/// A contiguous span of alignment columns, 1-based and inclusive on both
/// ends (the orchestrators translate to 0-based internally).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Feature {
    pub start: usize,
    pub end: usize,
}

impl Feature {
    /// Create a feature, validating `1 <= start <= end`.
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start == 0 || end < start {
            return Err(VelellaError::InvalidInput(format!(
                "bad feature span {}..{} (1-based, inclusive)",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of columns covered.
    pub fn length(&self) -> usize {
        self.end - self.start + 1
    }

    /// 0-based column range.
    fn cols(&self) -> std::ops::Range<usize> {
        (self.start - 1)..self.end
    }
}

/// Scalar per-feature statistics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PValueStats {
    pub prior_mean: f64,
    pub prior_var: f64,
    /// 95% equal-tail interval of the prior.
    pub prior_min: usize,
    pub prior_max: usize,
    pub post_mean: f64,
    pub post_var: f64,
    /// Integer posterior interval (Gaussian when a confidence level is
    /// given, else the mean on both ends).
    pub post_min: f64,
    pub post_max: f64,
    /// `P(prior <= post_max)`; small when the feature is conserved.
    pub p_cons: f64,
    /// `P(prior >= post_min)`; small when the feature is accelerated.
    pub p_anti_cons: f64,
}

/// Bivariate (left/right subtree) per-feature statistics.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PValueJointStats {
    pub prior_mean_left: f64,
    pub prior_var_left: f64,
    pub prior_min_left: usize,
    pub prior_max_left: usize,
    pub prior_mean_right: f64,
    pub prior_var_right: f64,
    pub prior_min_right: usize,
    pub prior_max_right: usize,
    pub prior_mean_tot: f64,
    pub prior_var_tot: f64,
    pub prior_min_tot: usize,
    pub prior_max_tot: usize,

    pub post_mean_left: f64,
    pub post_var_left: f64,
    pub post_min_left: f64,
    pub post_max_left: f64,
    pub post_mean_right: f64,
    pub post_var_right: f64,
    pub post_min_right: f64,
    pub post_max_right: f64,
    pub post_mean_tot: f64,
    pub post_var_tot: f64,
    pub post_min_tot: f64,
    pub post_max_tot: f64,

    pub p_cons_left: f64,
    pub p_anti_cons_left: f64,
    pub p_cons_right: f64,
    pub p_anti_cons_right: f64,

    pub cond_p_cons_left: f64,
    pub cond_p_anti_cons_left: f64,
    pub cond_p_cons_right: f64,
    pub cond_p_anti_cons_right: f64,

    /// True when the joint prior convolution was skipped and the
    /// conditional p-values used the independence approximation.
    pub cond_p_approx: bool,
}

/// Mark which column tuples any feature touches and find the longest span.
fn scan_features(msa: &Msa, feats: &[Feature]) -> Result<(usize, Vec<bool>)> {
    let mut used = vec![false; msa.ntuples()];
    let mut maxlen = 0;
    for f in feats {
        if f.end > msa.length() {
            return Err(VelellaError::InvalidInput(format!(
                "feature {}..{} beyond alignment of length {}",
                f.start,
                f.end,
                msa.length()
            )));
        }
        maxlen = maxlen.max(f.length());
        for col in f.cols() {
            used[msa.tuple_idx()[col]] = true;
        }
    }
    Ok((maxlen, used))
}

/// Indices of set bits of `len`, i.e. which powers of two compose it.
fn set_bits(len: usize) -> Vec<usize> {
    (0..=len.ilog2() as usize)
        .filter(|&i| (len >> i) & 1 == 1)
        .collect()
}

/// Posterior integer interval: Gaussian at level `ci` when given, else the
/// mean on both ends. Floored/ceilinged and clamped to the non-negative
/// counts the prior is defined over.
fn posterior_interval(mean: f64, var: f64, ci: Option<f64>) -> Result<(f64, f64)> {
    let (lo, hi) = match ci {
        Some(level) => distribution::norm_confidence_interval(mean, var.sqrt(), level)?,
        None => (mean, mean),
    };
    Ok((lo.floor().max(0.0), hi.ceil().max(0.0)))
}

/// Scalar per-feature p-values over an alignment.
///
/// `ci` selects the posterior interval: `Some(level)` uses a Gaussian
/// interval at that level, `None` collapses the interval to the posterior
/// mean. Results are in input feature order.
pub fn p_value_many(
    jp: &JumpProcess,
    msa: &Msa,
    feats: &[Feature],
    ci: Option<f64>,
) -> Result<Vec<PValueStats>> {
    if feats.is_empty() {
        return Ok(Vec::new());
    }
    let (maxlen, used) = scan_features(msa, feats)?;

    // Powers of the per-site prior: pow_p[i] = prior convolved 2^i times.
    let logmaxlen = maxlen.ilog2() as usize;
    let mut pow_p: Vec<Vec<f64>> = Vec::with_capacity(logmaxlen + 1);
    pow_p.push(subst::prior_site_distrib(jp)?);
    for i in 1..=logmaxlen {
        pow_p.push(prob_vector::convolve(&pow_p[i - 1], 2)?);
    }

    // Posterior moments for every tuple any feature touches.
    let mut post_mean = vec![0.0; msa.ntuples()];
    let mut post_var = vec![0.0; msa.ntuples()];
    for tuple in 0..msa.ntuples() {
        if !used[tuple] {
            continue;
        }
        let p = subst::posterior_site_distrib(jp, msa, tuple)?;
        let (m, v) = prob_vector::stats(&p);
        post_mean[tuple] = m;
        post_var[tuple] = v;
    }

    let mut stats = Vec::with_capacity(feats.len());
    for f in feats {
        let len = f.length();
        let pows: Vec<&[f64]> = set_bits(len).into_iter().map(|i| pow_p[i].as_slice()).collect();
        let prior = prob_vector::convolve_many(&pows, None)?;

        let (prior_mean, prior_var) = prob_vector::stats(&prior);
        let (prior_min, prior_max) = prob_vector::confidence_interval(&prior, 0.95)?;

        let mut mean = 0.0;
        let mut var = 0.0;
        for col in f.cols() {
            let tuple = msa.tuple_idx()[col];
            mean += post_mean[tuple];
            var += post_var[tuple];
        }
        let (post_min, post_max) = posterior_interval(mean, var, ci)?;

        stats.push(PValueStats {
            prior_mean,
            prior_var,
            prior_min,
            prior_max,
            post_mean: mean,
            post_var: var,
            post_min,
            post_max,
            p_cons: prob_vector::p_value(&prior, post_max, Tail::Lower),
            p_anti_cons: prob_vector::p_value(&prior, post_min, Tail::Upper),
        });
    }

    Ok(stats)
}

/// Largest feature length whose joint prior, bounded by the central limit
/// theorem, still fits in `max_convolve_size` matrix entries.
///
/// Solved by iterating upward from a closed-form lower bound; an exact
/// solution exists but involves a messy polynomial.
pub fn max_convolve_len(
    max_convolve_size: usize,
    mean_l: f64,
    sd_l: f64,
    mean_r: f64,
    sd_r: f64,
) -> usize {
    let denom = (mean_l + 6.0 * sd_l) * (mean_r + 6.0 * sd_r);
    if denom <= 0.0 {
        // Degenerate prior: the joint support never grows.
        return usize::MAX;
    }
    let mut l = (max_convolve_size as f64 / denom).sqrt() as usize;
    loop {
        l += 1;
        let lf = l as f64;
        let maxsize = (lf * mean_l + 6.0 * sd_l * lf.sqrt())
            * (lf * mean_r + 6.0 * sd_r * lf.sqrt());
        if maxsize >= max_convolve_size as f64 {
            break;
        }
    }
    l - 1
}

/// Bivariate per-feature p-values over an alignment.
///
/// The tree model is assumed to have been rooted so the partition of
/// interest is the root's left/right split. `max_convolve_size` caps the
/// `rows x cols` size of any explicitly computed joint prior; longer
/// features use marginal convolutions and the independence approximation
/// for conditional p-values (flagged via `cond_p_approx`).
pub fn p_value_joint_many(
    jp: &JumpProcess,
    msa: &Msa,
    feats: &[Feature],
    ci: Option<f64>,
    max_convolve_size: usize,
) -> Result<Vec<PValueJointStats>> {
    if feats.is_empty() {
        return Ok(Vec::new());
    }
    let (maxlen, used) = scan_features(msa, feats)?;

    // Per-site joint prior and its marginals.
    let prior_site = subst::joint_site_distrib(jp, None, 0)?;
    let (site_mean_l, site_mean_r, site_var_l, site_var_r, _) = prob_matrix::stats(&prior_site);
    let site_marg_left = prob_matrix::marg_x(&prior_site);
    let site_marg_right = prob_matrix::marg_y(&prior_site);

    let max_conv_len = max_convolve_len(
        max_convolve_size,
        site_mean_l,
        site_var_l.sqrt(),
        site_mean_r,
        site_var_r.sqrt(),
    );

    // Powers of the joint prior, only up to the tractable length.
    let cap_len = maxlen.min(max_conv_len).max(1);
    let logmaxlen = cap_len.ilog2() as usize;
    let mut pow_p: Vec<Matrix> = Vec::with_capacity(logmaxlen + 1);
    pow_p.push(prior_site.clone());
    for i in 1..=logmaxlen {
        pow_p.push(prob_matrix::convolve(&pow_p[i - 1], 2)?);
    }

    // Marginal posterior moments for every tuple any feature touches.
    let n = msa.ntuples();
    let mut post_mean_left = vec![0.0; n];
    let mut post_var_left = vec![0.0; n];
    let mut post_mean_right = vec![0.0; n];
    let mut post_var_right = vec![0.0; n];
    let mut post_mean_tot = vec![0.0; n];
    let mut post_var_tot = vec![0.0; n];
    for tuple in 0..n {
        if !used[tuple] {
            continue;
        }
        let p = subst::joint_site_distrib(jp, Some(msa), tuple)?;
        let (m, v) = prob_vector::stats(&prob_matrix::marg_x(&p));
        post_mean_left[tuple] = m;
        post_var_left[tuple] = v;
        let (m, v) = prob_vector::stats(&prob_matrix::marg_y(&p));
        post_mean_right[tuple] = m;
        post_var_right[tuple] = v;
        let (m, v) = prob_vector::stats(&prob_matrix::marg_tot(&p));
        post_mean_tot[tuple] = m;
        post_var_tot[tuple] = v;
    }

    let mut stats = Vec::with_capacity(feats.len());
    for f in feats {
        let len = f.length();

        // Joint prior for this length, or marginals only when too long.
        let (prior, prior_marg_left, prior_marg_right) = if len <= max_conv_len {
            let pows: Vec<&Matrix> = set_bits(len).into_iter().map(|i| &pow_p[i]).collect();
            let (max_nrows, max_ncols) = if len > 25 {
                let lf = len as f64;
                (
                    (lf * site_mean_l + 6.0 * (lf * site_var_l).sqrt()).ceil() as usize,
                    (lf * site_mean_r + 6.0 * (lf * site_var_r).sqrt()).ceil() as usize,
                )
            } else {
                (prior_site.nrows() * len, prior_site.ncols() * len)
            };
            let prior = prob_matrix::convolve_many_bounded(&pows, max_nrows, max_ncols)?;
            let left = prob_matrix::marg_x(&prior);
            let right = prob_matrix::marg_y(&prior);
            (Some(prior), left, right)
        } else {
            (
                None,
                prob_vector::convolve(&site_marg_left, len)?,
                prob_vector::convolve(&site_marg_right, len)?,
            )
        };

        // Total-count prior: anti-diagonal sums when the joint is explicit,
        // else the independent convolution of the marginals.
        let prior_tot = match &prior {
            Some(p) => prob_matrix::marg_tot(p),
            None => {
                let mut t = prob_vector::convolve_pair(&prior_marg_left, &prior_marg_right);
                prob_vector::normalize(&mut t)?;
                t
            }
        };

        let (prior_mean_left, prior_var_left) = prob_vector::stats(&prior_marg_left);
        let (prior_min_left, prior_max_left) =
            prob_vector::confidence_interval(&prior_marg_left, 0.95)?;
        let (prior_mean_right, prior_var_right) = prob_vector::stats(&prior_marg_right);
        let (prior_min_right, prior_max_right) =
            prob_vector::confidence_interval(&prior_marg_right, 0.95)?;
        let (prior_mean_tot, prior_var_tot) = prob_vector::stats(&prior_tot);
        let (prior_min_tot, prior_max_tot) =
            prob_vector::confidence_interval(&prior_tot, 0.95)?;

        let mut mean_left = 0.0;
        let mut var_left = 0.0;
        let mut mean_right = 0.0;
        let mut var_right = 0.0;
        let mut mean_tot = 0.0;
        let mut var_tot = 0.0;
        for col in f.cols() {
            let tuple = msa.tuple_idx()[col];
            mean_left += post_mean_left[tuple];
            var_left += post_var_left[tuple];
            mean_right += post_mean_right[tuple];
            var_right += post_var_right[tuple];
            mean_tot += post_mean_tot[tuple];
            var_tot += post_var_tot[tuple];
        }

        let (post_min_left, post_max_left) = posterior_interval(mean_left, var_left, ci)?;
        let (post_min_right, post_max_right) = posterior_interval(mean_right, var_right, ci)?;
        let (post_min_tot, post_max_tot) = posterior_interval(mean_tot, var_tot, ci)?;

        // Conditional-on-total p-values.
        let cond_low = match &prior {
            Some(p) => prob_matrix::x_given_tot(p, post_min_tot as usize)?,
            None => prob_matrix::x_given_tot_indep(
                post_min_tot as usize,
                &prior_marg_left,
                &prior_marg_right,
            )?,
        };
        let cond_p_cons_left = prob_vector::p_value(&cond_low, post_max_left, Tail::Lower);

        let cond_high = match &prior {
            Some(p) => prob_matrix::x_given_tot(p, post_max_tot as usize)?,
            None => prob_matrix::x_given_tot_indep(
                post_max_tot as usize,
                &prior_marg_left,
                &prior_marg_right,
            )?,
        };
        let cond_p_anti_cons_left = prob_vector::p_value(&cond_high, post_min_left, Tail::Upper);

        let cond_low = match &prior {
            Some(p) => prob_matrix::y_given_tot(p, post_min_tot as usize)?,
            None => prob_matrix::y_given_tot_indep(
                post_min_tot as usize,
                &prior_marg_left,
                &prior_marg_right,
            )?,
        };
        let cond_p_cons_right = prob_vector::p_value(&cond_low, post_max_right, Tail::Lower);

        let cond_high = match &prior {
            Some(p) => prob_matrix::y_given_tot(p, post_max_tot as usize)?,
            None => prob_matrix::y_given_tot_indep(
                post_max_tot as usize,
                &prior_marg_left,
                &prior_marg_right,
            )?,
        };
        let cond_p_anti_cons_right = prob_vector::p_value(&cond_high, post_min_right, Tail::Upper);

        stats.push(PValueJointStats {
            prior_mean_left,
            prior_var_left,
            prior_min_left,
            prior_max_left,
            prior_mean_right,
            prior_var_right,
            prior_min_right,
            prior_max_right,
            prior_mean_tot,
            prior_var_tot,
            prior_min_tot,
            prior_max_tot,
            post_mean_left: mean_left,
            post_var_left: var_left,
            post_min_left,
            post_max_left,
            post_mean_right: mean_right,
            post_var_right: var_right,
            post_min_right,
            post_max_right,
            post_mean_tot: mean_tot,
            post_var_tot: var_tot,
            post_min_tot,
            post_max_tot,
            p_cons_left: prob_vector::p_value(&prior_marg_left, post_max_left, Tail::Lower),
            p_anti_cons_left: prob_vector::p_value(&prior_marg_left, post_min_left, Tail::Upper),
            p_cons_right: prob_vector::p_value(&prior_marg_right, post_max_right, Tail::Lower),
            p_anti_cons_right: prob_vector::p_value(
                &prior_marg_right,
                post_min_right,
                Tail::Upper,
            ),
            cond_p_cons_left,
            cond_p_anti_cons_left,
            cond_p_cons_right,
            cond_p_anti_cons_right,
            cond_p_approx: prior.is_none(),
        });
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PhyloModel;
    use crate::tree::PhyloTree;

    fn jc_on(newick: &str) -> PhyloModel {
        PhyloModel::jukes_cantor(PhyloTree::from_newick(newick).unwrap()).unwrap()
    }

    fn dna_msa(names: &[&str], rows: &[String]) -> Msa {
        Msa::new(
            names.iter().map(|s| s.to_string()).collect(),
            rows.iter().map(|r| r.as_bytes().to_vec()).collect(),
            b"ACGT",
        )
        .unwrap()
    }

    #[test]
    fn feature_validation() {
        assert!(Feature::new(0, 5).is_err());
        assert!(Feature::new(5, 4).is_err());
        let f = Feature::new(3, 7).unwrap();
        assert_eq!(f.length(), 5);
    }

    #[test]
    fn length_one_feature_prior_is_site_prior() {
        let model = jc_on("(A:0.1,B:0.1);");
        let jp = JumpProcess::new(&model).unwrap();
        let msa = dna_msa(&["A", "B"], &["ACGT".into(), "ACGT".into()]);
        let stats =
            p_value_many(&jp, &msa, &[Feature::new(1, 1).unwrap()], None).unwrap();
        let site = subst::prior_site_distrib(&jp).unwrap();
        let (mean, var) = prob_vector::stats(&site);
        assert!((stats[0].prior_mean - mean).abs() < 1e-12);
        assert!((stats[0].prior_var - var).abs() < 1e-12);
    }

    #[test]
    fn conserved_feature_scores_conserved() {
        let model = jc_on("(A:0.3,B:0.3);");
        let jp = JumpProcess::new(&model).unwrap();
        // Perfectly conserved 40-column alignment.
        let row = "ACGT".repeat(10);
        let msa = dna_msa(&["A", "B"], &[row.clone(), row]);
        let stats =
            p_value_many(&jp, &msa, &[Feature::new(1, 40).unwrap()], None).unwrap();
        let s = &stats[0];
        assert!(s.post_mean < s.prior_mean);
        assert!(s.p_cons < s.p_anti_cons);
        assert!(s.p_cons < 0.5);
        assert!((0.0..=1.0).contains(&s.p_cons));
        assert!((0.0..=1.0).contains(&s.p_anti_cons));
        assert!(s.prior_min <= s.prior_max);
    }

    #[test]
    fn confidence_level_widens_posterior_interval() {
        let model = jc_on("(A:0.2,B:0.2);");
        let jp = JumpProcess::new(&model).unwrap();
        let row = "ACGTTGCA".repeat(4);
        let other: String = row
            .chars()
            .map(|c| if c == 'A' { 'G' } else { c })
            .collect();
        let msa = dna_msa(&["A", "B"], &[row, other]);
        let feats = [Feature::new(1, 32).unwrap()];

        let point = p_value_many(&jp, &msa, &feats, None).unwrap();
        assert!((point[0].post_max - point[0].post_min).abs() < 1.0 + 1e-9);

        let wide = p_value_many(&jp, &msa, &feats, Some(0.95)).unwrap();
        assert!(wide[0].post_min < wide[0].post_max);
        assert!(wide[0].post_min <= point[0].post_min);
        assert!(wide[0].post_max >= point[0].post_max);
        // Wider interval can only make both p-values larger.
        assert!(wide[0].p_cons >= point[0].p_cons);
        assert!(wide[0].p_anti_cons >= point[0].p_anti_cons);
    }

    #[test]
    fn results_follow_input_feature_order() {
        let model = jc_on("(A:0.1,B:0.1);");
        let jp = JumpProcess::new(&model).unwrap();
        let row = "ACGT".repeat(5);
        let msa = dna_msa(&["A", "B"], &[row.clone(), row]);
        let feats = [
            Feature::new(5, 20).unwrap(),
            Feature::new(1, 4).unwrap(),
            Feature::new(1, 20).unwrap(),
        ];
        let stats = p_value_many(&jp, &msa, &feats, None).unwrap();
        assert_eq!(stats.len(), 3);
        assert!(stats[0].prior_mean > stats[1].prior_mean);
        assert!(stats[2].prior_mean > stats[0].prior_mean);
    }

    #[test]
    fn feature_beyond_alignment_fails() {
        let model = jc_on("(A:0.1,B:0.1);");
        let jp = JumpProcess::new(&model).unwrap();
        let msa = dna_msa(&["A", "B"], &["ACGT".into(), "ACGT".into()]);
        assert!(p_value_many(&jp, &msa, &[Feature::new(2, 5).unwrap()], None).is_err());
    }

    #[test]
    fn max_convolve_len_is_monotone_in_budget() {
        let small = max_convolve_len(1_000, 0.1, 0.3, 0.1, 0.3);
        let large = max_convolve_len(1_000_000, 0.1, 0.3, 0.1, 0.3);
        assert!(small < large);
        // The bound at the returned length fits; one longer does not.
        let check = |l: usize| {
            let lf = l as f64;
            (lf * 0.1 + 6.0 * 0.3 * lf.sqrt()) * (lf * 0.1 + 6.0 * 0.3 * lf.sqrt())
        };
        assert!(check(small) < 1_000.0);
        assert!(check(small + 1) >= 1_000.0);
    }

    #[test]
    fn max_convolve_len_degenerate_prior_is_unbounded() {
        assert_eq!(max_convolve_len(100, 0.0, 0.0, 0.0, 0.0), usize::MAX);
    }

    fn four_leaf_setup(ncols: usize) -> (PhyloModel, Msa) {
        let model = jc_on("((A:0.05,B:0.05):0.05,(C:0.05,D:0.05):0);");
        let row: String = "ACGT".chars().cycle().take(ncols).collect();
        let msa = dna_msa(&["A", "B", "C", "D"], &[row.clone(), row.clone(), row.clone(), row]);
        (model, msa)
    }

    #[test]
    fn joint_boundary_lengths_toggle_approximation() {
        let (model, msa) = four_leaf_setup(400);
        let jp = JumpProcess::new(&model).unwrap();

        let prior_site = subst::joint_site_distrib(&jp, None, 0).unwrap();
        let (ml, mr, vl, vr, _) = prob_matrix::stats(&prior_site);
        let max_convolve_size = 400;
        let max_len = max_convolve_len(max_convolve_size, ml, vl.sqrt(), mr, vr.sqrt());
        assert!(max_len >= 1 && max_len < 400, "max_len = {}", max_len);

        let feats = [
            Feature::new(1, max_len).unwrap(),
            Feature::new(1, max_len + 1).unwrap(),
        ];
        let stats = p_value_joint_many(&jp, &msa, &feats, None, max_convolve_size).unwrap();
        assert!(!stats[0].cond_p_approx, "length == bound must stay exact");
        assert!(stats[1].cond_p_approx, "length == bound + 1 must approximate");
        // Both paths still produce marginal p-values.
        for s in &stats {
            assert!((0.0..=1.0).contains(&s.p_cons_left));
            assert!((0.0..=1.0).contains(&s.p_anti_cons_right));
        }
    }

    // Deterministic xorshift for simulation (state must be nonzero).
    struct Xorshift64 {
        state: u64,
    }

    impl Xorshift64 {
        fn new(seed: u64) -> Self {
            Self {
                state: if seed == 0 { 1 } else { seed },
            }
        }

        fn next_f64(&mut self) -> f64 {
            let mut x = self.state;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.state = x;
            x as f64 / u64::MAX as f64
        }
    }

    /// One JC step along a branch with P(same) = `p_same`.
    fn jc_step(rng: &mut Xorshift64, p_same: f64, state: usize) -> usize {
        let u = rng.next_f64();
        if u < p_same {
            state
        } else {
            // The three other bases are equally likely.
            let pick = ((u - p_same) / ((1.0 - p_same) / 3.0)) as usize % 3;
            (state + 1 + pick) % 4
        }
    }

    #[test]
    fn approximate_marginals_match_exact_joint() {
        const BASES: [char; 4] = ['A', 'C', 'G', 'T'];
        const T: f64 = 0.05;
        const NCOLS: usize = 1000;

        // Neutral data on the four-leaf tree, so posterior totals stay well
        // inside the prior support and the conditional slices carry mass.
        let e = (-4.0 * T / 3.0).exp();
        let p_same = 0.25 + 0.75 * e;
        let mut rng = Xorshift64::new(7151);
        let mut rows = vec![String::new(); 4];
        for _ in 0..NCOLS {
            let root = (rng.next_f64() * 4.0) as usize % 4;
            let left_internal = jc_step(&mut rng, p_same, root);
            let leaf_states = [
                jc_step(&mut rng, p_same, left_internal),
                jc_step(&mut rng, p_same, left_internal),
                jc_step(&mut rng, p_same, root), // right internal branch is 0
                jc_step(&mut rng, p_same, root),
            ];
            for (row, &s) in rows.iter_mut().zip(&leaf_states) {
                row.push(BASES[s]);
            }
        }

        let model = jc_on("((A:0.05,B:0.05):0.05,(C:0.05,D:0.05):0);");
        let jp = JumpProcess::new(&model).unwrap();
        let msa = dna_msa(&["A", "B", "C", "D"], &rows);
        let feats = [Feature::new(1, 1000).unwrap()];

        let exact = p_value_joint_many(&jp, &msa, &feats, Some(0.95), 10_000_000).unwrap();
        assert!(!exact[0].cond_p_approx);
        let approx = p_value_joint_many(&jp, &msa, &feats, Some(0.95), 500).unwrap();
        assert!(approx[0].cond_p_approx);

        for (a, b) in [
            (exact[0].p_cons_left, approx[0].p_cons_left),
            (exact[0].p_anti_cons_left, approx[0].p_anti_cons_left),
            (exact[0].p_cons_right, approx[0].p_cons_right),
            (exact[0].p_anti_cons_right, approx[0].p_anti_cons_right),
        ] {
            assert!((a - b).abs() < 0.01, "marginal p-values differ: {} vs {}", a, b);
        }
        assert!((exact[0].post_mean_tot - approx[0].post_mean_tot).abs() < 1e-9);
    }

    #[test]
    fn neutral_features_have_roughly_uniform_p_values() {
        const BASES: [char; 4] = ['A', 'C', 'G', 'T'];
        const T: f64 = 0.1;
        const NFEATS: usize = 500;
        const FLEN: usize = 100;

        // Simulate a two-leaf alignment under the same JC model used for
        // scoring: root base from equilibrium, each leaf by P(t).
        let e = (-4.0 * T / 3.0).exp();
        let p_same = 0.25 + 0.75 * e;
        let mut rng = Xorshift64::new(20240917);
        let mut row_a = String::with_capacity(NFEATS * FLEN);
        let mut row_b = String::with_capacity(NFEATS * FLEN);
        for _ in 0..NFEATS * FLEN {
            let root = (rng.next_f64() * 4.0) as usize % 4;
            row_a.push(BASES[jc_step(&mut rng, p_same, root)]);
            row_b.push(BASES[jc_step(&mut rng, p_same, root)]);
        }

        let model = jc_on("(A:0.1,B:0.1);");
        let jp = JumpProcess::new(&model).unwrap();
        let msa = dna_msa(&["A", "B"], &[row_a, row_b]);
        let feats: Vec<Feature> = (0..NFEATS)
            .map(|i| Feature::new(i * FLEN + 1, (i + 1) * FLEN).unwrap())
            .collect();
        let stats = p_value_many(&jp, &msa, &feats, None).unwrap();

        let mut pvals: Vec<f64> = stats.iter().map(|s| s.p_cons).collect();
        pvals.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mean: f64 = pvals.iter().sum::<f64>() / pvals.len() as f64;
        assert!(
            (0.35..=0.65).contains(&mean),
            "p-value mean {} far from 0.5",
            mean
        );

        // Kolmogorov-Smirnov distance against Uniform(0, 1); the lenient
        // threshold absorbs the discreteness of the prior support and the
        // shrinkage of posterior means relative to prior counts.
        let n = pvals.len() as f64;
        let mut d = 0.0f64;
        for (i, &p) in pvals.iter().enumerate() {
            d = d.max((p - i as f64 / n).abs());
            d = d.max(((i + 1) as f64 / n - p).abs());
        }
        assert!(d < 0.2, "KS distance {} too large for uniformity", d);
        assert!(pvals[0] < 0.3, "no small p-values (min {})", pvals[0]);
        assert!(
            *pvals.last().unwrap() > 0.7,
            "no large p-values (max {})",
            pvals.last().unwrap()
        );
    }
}
