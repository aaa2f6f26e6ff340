//! Progressive profile alignment and ancestral reconstruction for the
//! Ancestra toolkit.
//!
//! Implements probabilistic ancestral sequence reconstruction under a
//! continuous-time substitution model with a geometric-length indel model:
//! leaves become profile automata, internal nodes align their children's
//! profiles with a banded pair-transducer Forward/Backward pass, and the
//! root traceback yields the multiple alignment with ancestral rows.
//!
//! # Quick start
//!
//! ```
//! use ancestra_align::{reconstruct, LeafSequence, ReconOpts};
//! use ancestra_core::Xorshift64;
//! use ancestra_phylo::{PhyloTree, RateModel};
//!
//! let mut tree = PhyloTree::new();
//! let root = tree.root();
//! tree.add_child(root, Some("X".into()), Some(0.1)).unwrap();
//! tree.add_child(root, Some("Y".into()), Some(0.1)).unwrap();
//!
//! let sequences = vec![
//!     LeafSequence::new("X", b"ACGT".to_vec()),
//!     LeafSequence::new("Y", b"ACGT".to_vec()),
//! ];
//! let mut rng = Xorshift64::new(42);
//! let rec = reconstruct(
//!     &tree,
//!     &sequences,
//!     &RateModel::dna_default(),
//!     &ReconOpts::default(),
//!     None,
//!     &mut rng,
//! )
//! .unwrap();
//! assert!(rec.forward_log_likelihood().is_finite());
//! ```

pub mod alignpath;
pub mod backward;
pub mod envelope;
pub mod forward;
pub mod guide;
mod matrix;
pub mod pair_hmm;
pub mod profile;
pub mod reconstruct;

pub use alignpath::{
    column_count, gapped_row, path_concat, path_residues, path_union, single_column, AlignPath,
    RowIndex,
};
pub use backward::BackwardMatrix;
pub use envelope::{DiagEnvParams, DiagonalEnvelope};
pub use forward::ForwardMatrix;
pub use guide::GuideAlignmentEnvelope;
pub use matrix::CELL_BYTES;
pub use pair_hmm::{BranchProbs, PairHmm, PairState, N_STATES};
pub use profile::{Profile, ProfileState, ProfileTransition, StateIndex, TransIndex};
pub use reconstruct::{reconstruct, LeafSequence, ReconOpts, Reconstruction};

#[cfg(test)]
mod proptests {
    use super::*;
    use ancestra_phylo::RateModel;
    use proptest::prelude::*;

    fn dna_seq(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
        proptest::collection::vec(
            prop_oneof![Just(b'A'), Just(b'C'), Just(b'G'), Just(b'T')],
            1..=max_len,
        )
    }

    fn full_forward<'a>(
        x: &'a Profile,
        y: &'a Profile,
        hmm: &'a PairHmm,
    ) -> ForwardMatrix<'a> {
        let x_len = x.states[x.end_index()].seq_coords[&1];
        let y_len = y.states[y.end_index()].seq_coords[&2];
        ForwardMatrix::new(x, y, hmm, DiagonalEnvelope::full(x_len, y_len), None, 1, 2).unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Leaf profiles always satisfy every structural invariant, and
        /// wait/ready normalisation is a fixpoint on them.
        #[test]
        fn leaf_profiles_are_valid_and_normal(seq in dna_seq(24)) {
            let model = RateModel::dna_default();
            let p = Profile::from_leaf(&model, "leaf", &seq, 0).unwrap();
            prop_assert!(p.validate().is_ok());
            prop_assert_eq!(p.size(), seq.len() + 2);
            let q = p.add_ready_states();
            prop_assert_eq!(q.size(), p.size());
        }

        /// Forward and Backward totals agree on random sequence pairs.
        #[test]
        fn forward_backward_agree(a in dna_seq(10), b in dna_seq(10)) {
            let model = RateModel::dna_default();
            let x = Profile::from_leaf(&model, "x", &a, 1).unwrap();
            let y = Profile::from_leaf(&model, "y", &b, 2).unwrap();
            let hmm = PairHmm::new(&model, 0.2, 0.3);
            let f = full_forward(&x, &y, &hmm);
            let bwd = BackwardMatrix::new(&f);
            let rel = (bwd.lp_start - f.lp_end).abs() / f.lp_end.abs().max(1.0);
            prop_assert!(rel < 1e-6, "B[start]={} F[end]={}", bwd.lp_start, f.lp_end);
        }

        /// Posterior-decoded profiles honour every structural invariant.
        #[test]
        fn posterior_profiles_are_valid(a in dna_seq(8), b in dna_seq(8)) {
            let model = RateModel::dna_default();
            let x = Profile::from_leaf(&model, "x", &a, 1).unwrap();
            let y = Profile::from_leaf(&model, "y", &b, 2).unwrap();
            let hmm = PairHmm::new(&model, 0.3, 0.3);
            let f = full_forward(&x, &y, &hmm);
            let bwd = BackwardMatrix::new(&f);
            let p = bwd.post_prob_profile(0.05, 0, true, false, 9, "node").unwrap();
            prop_assert!(p.validate().is_ok());
            let q = p.add_ready_states();
            prop_assert_eq!(q.size(), p.size());
        }

        /// The best alignment path consumes each sequence exactly.
        #[test]
        fn best_path_consumes_all_residues(a in dna_seq(10), b in dna_seq(10)) {
            let model = RateModel::dna_default();
            let x = Profile::from_leaf(&model, "x", &a, 1).unwrap();
            let y = Profile::from_leaf(&model, "y", &b, 2).unwrap();
            let hmm = PairHmm::new(&model, 0.2, 0.2);
            let f = full_forward(&x, &y, &hmm);
            let path = f.best_align_path(9).unwrap();
            prop_assert_eq!(path_residues(&path, 1), a.len());
            prop_assert_eq!(path_residues(&path, 2), b.len());
            let cols = column_count(&path);
            for bits in path.values() {
                prop_assert_eq!(bits.len(), cols);
            }
        }
    }
}
