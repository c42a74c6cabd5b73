//! Substitution-count distributions on phylogenetic trees.
//!
//! `velella-phylo` computes prior and posterior probability distributions
//! over the *number of nucleotide substitutions* on a rooted binary tree,
//! per alignment column, per alignment, and per annotated feature, and the
//! p-values and confidence intervals used to score candidate conserved or
//! accelerated regions.
//!
//! The pipeline:
//!
//! 1. A [`model::PhyloModel`] (rate matrix + equilibrium frequencies + tree)
//!    is turned into a [`jump::JumpProcess`]: a uniformized discrete-jump
//!    representation with precomputed substitution-count tables.
//! 2. Per-branch conditional tables feed a postorder dynamic program
//!    ([`subst`]) yielding scalar or bivariate (left/right subtree)
//!    substitution-count distributions per site.
//! 3. The feature orchestrator ([`pvalue`]) aggregates per-column posteriors
//!    and powers-of-two prior convolutions into per-feature statistics.
//! 4. The entropy tool ([`entropy`]) scores conserved/non-conserved model
//!    pairs by brute-force relative entropy and Newton inversion.
//!
//! # Quick start
//!
//! ```
//! use velella_phylo::model::PhyloModel;
//! use velella_phylo::jump::JumpProcess;
//! use velella_phylo::msa::Msa;
//! use velella_phylo::subst;
//! use velella_phylo::tree::PhyloTree;
//!
//! let tree = PhyloTree::from_newick("(human:0.1,mouse:0.1);").unwrap();
//! let model = PhyloModel::jukes_cantor(tree).unwrap();
//! let jp = JumpProcess::new(&model).unwrap();
//!
//! let msa = Msa::new(
//!     vec!["human".into(), "mouse".into()],
//!     vec![b"ACGT".to_vec(), b"ACGT".to_vec()],
//!     b"ACGT",
//! )
//! .unwrap();
//! let posterior = subst::posterior_site_distrib(&jp, &msa, 0).unwrap();
//! assert!(posterior[0] > 0.8); // identical column: almost surely 0 substitutions
//! ```

pub mod entropy;
pub mod jump;
pub mod likelihood;
pub mod model;
pub mod msa;
pub mod newick;
pub mod pvalue;
pub mod subst;
pub mod tree;

pub use entropy::{entropy_stats, relative_entropy, solve_expected_length, EntropyStats};
pub use jump::JumpProcess;
pub use model::PhyloModel;
pub use msa::Msa;
pub use pvalue::{p_value_joint_many, p_value_many, Feature, PValueJointStats, PValueStats};
pub use subst::JointStats;
pub use tree::{Node, NodeId, PhyloTree};
