//! Shared primitives for the Velella phylogenetics engine.
//!
//! `velella-core` provides the foundation the other Velella crates build on:
//!
//! - **Error types** — [`VelellaError`] and [`Result`] for structured error
//!   handling across the workspace

pub mod error;

pub use error::{Result, VelellaError};
