//! Discrete distribution algebra for the Velella phylogenetics engine.
//!
//! Provides the numeric substrate the substitution-count machinery is built
//! on:
//!
//! - **Matrices** — a dense 2-D real matrix ([`Matrix`])
//! - **Special functions** — [`distribution::erf`], [`distribution::ln_gamma`],
//!   the normal quantile, and truncated Poisson vectors
//! - **Probability vectors** — normalization, moments, confidence intervals,
//!   p-values, and n-fold convolution over `&[f64]`
//! - **Probability matrices** — marginals, conditionals, bivariate moments,
//!   and bounded 2-D convolution

pub mod distribution;
pub mod matrix;
pub mod prob_matrix;
pub mod prob_vector;

pub use matrix::Matrix;
pub use prob_vector::Tail;
