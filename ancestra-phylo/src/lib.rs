//! Phylogenetic trees and rate models for the Ancestra reconstruction engine.
//!
//! Provides the arena-based rooted tree consumed by the progressive aligner
//! (post-order traversal, branch lengths, closest-leaf lookup) and the
//! mixture substitution model with insertion/deletion rates that drives both
//! residue evolution and the indel transducer.
//!
//! # Quick start
//!
//! ```
//! use ancestra_phylo::{PhyloTree, RateModel};
//!
//! let mut tree = PhyloTree::new();
//! let root = tree.root();
//! tree.add_child(root, Some("X".into()), Some(0.1)).unwrap();
//! tree.add_child(root, Some("Y".into()), Some(0.2)).unwrap();
//! assert_eq!(tree.leaf_count(), 2);
//!
//! let model = RateModel::dna_default();
//! let p = model.branch_matrix(0.1);
//! assert_eq!(p.len(), 1); // one mixture component
//! ```

pub mod rate_model;
pub mod tree;

pub use rate_model::{MixtureComponent, RateModel};
pub use tree::{Node, NodeId, PhyloTree};
