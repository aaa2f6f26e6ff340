//! The seven-state pair transducer driving profile-profile alignment.
//!
//! At each internal tree node, two child profiles X and Y are aligned under
//! a transducer whose states describe what happened to one ancestral column:
//!
//! - **Match** — the ancestral residue survives in both children,
//! - **DeleteX** / **DeleteY** — it survives in only one child (the named
//!   child deleted it),
//! - **InsertX** / **InsertY** — a residue was inserted on the named child's
//!   branch and has no ancestral counterpart,
//!
//! plus Start and End. All probabilities are natural logs.
//!
//! The generative order per column slot is: insertions on the X branch, then
//! insertions on the Y branch, then the next ancestral residue (the ancestral
//! sequence continues with probability λ/μ), which each child independently
//! deletes or keeps. Consecutive deletions on a branch use the geometric
//! extension probability. A residue deleted by *both* children emits nothing
//! and is invisible to the alignment, so that outcome is collapsed
//! analytically (a geometric series over root-continue × both-extend),
//! keeping every transition row stochastic.

use ancestra_core::{log_accum_exp, log_inner_product, LOG_ZERO};
use ancestra_phylo::RateModel;

/// Number of transducer states.
pub const N_STATES: usize = 7;

/// Transducer state. The discriminant order is the tie-break order used by
/// best-path traceback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum PairState {
    /// Before the first column.
    Start = 0,
    /// Both children absorb a column.
    Match = 1,
    /// Ancestral residue deleted in X; Y absorbs alone.
    DeleteX = 2,
    /// Ancestral residue deleted in Y; X absorbs alone.
    DeleteY = 3,
    /// Insertion on the X branch; X absorbs alone.
    InsertX = 4,
    /// Insertion on the Y branch; Y absorbs alone.
    InsertY = 5,
    /// After the last column.
    End = 6,
}

impl PairState {
    /// All states in discriminant order.
    pub const ALL: [PairState; N_STATES] = [
        PairState::Start,
        PairState::Match,
        PairState::DeleteX,
        PairState::DeleteY,
        PairState::InsertX,
        PairState::InsertY,
        PairState::End,
    ];

    /// The five emitting states, in tie-break order.
    pub const EMITTING: [PairState; 5] = [
        PairState::Match,
        PairState::DeleteX,
        PairState::DeleteY,
        PairState::InsertX,
        PairState::InsertY,
    ];

    /// Dense index of this state.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this state consumes a column of profile X.
    #[inline]
    pub fn absorbs_x(self) -> bool {
        matches!(self, PairState::Match | PairState::DeleteY | PairState::InsertX)
    }

    /// Whether this state consumes a column of profile Y.
    #[inline]
    pub fn absorbs_y(self) -> bool {
        matches!(self, PairState::Match | PairState::DeleteX | PairState::InsertY)
    }

    /// Whether this state emits an alignment column at all.
    #[inline]
    pub fn is_emitting(self) -> bool {
        self.absorbs_x() || self.absorbs_y()
    }

    /// Whether the emitted column carries an ancestral residue.
    #[inline]
    pub fn has_ancestral_residue(self) -> bool {
        matches!(
            self,
            PairState::Match | PairState::DeleteX | PairState::DeleteY
        )
    }
}

/// Per-branch indel event probabilities for one branch length.
#[derive(Debug, Clone, Copy)]
pub struct BranchProbs {
    /// Probability an insertion opens at a column slot.
    pub ins_open: f64,
    /// Probability an open insertion extends by one more residue.
    pub ins_extend: f64,
    /// Probability an ancestral residue is deleted on this branch.
    pub del_open: f64,
    /// Probability a deletion swallows the next ancestral residue too.
    pub del_extend: f64,
}

impl BranchProbs {
    /// Derive branch probabilities from the model rates for branch length `t`.
    pub fn new(model: &RateModel, t: f64) -> Self {
        Self {
            ins_open: -(-model.ins_rate() * t).exp_m1(),
            ins_extend: model.ins_extend(),
            del_open: -(-model.del_rate() * t).exp_m1(),
            del_extend: model.del_extend(),
        }
    }
}

/// The pair transducer for one (left branch, right branch) pair: a dense
/// log-probability transition matrix plus the emission machinery shared by
/// the Forward and Backward passes.
#[derive(Debug, Clone)]
pub struct PairHmm {
    lp_trans: [[f64; N_STATES]; N_STATES],
    /// Per-component log root/insert residue distribution.
    pub log_root: Vec<Vec<f64>>,
    /// Log mixture weights.
    pub log_weights: Vec<f64>,
}

impl PairHmm {
    /// Build the transducer for child branch lengths `t_x` and `t_y`.
    pub fn new(model: &RateModel, t_x: f64, t_y: f64) -> Self {
        let x = BranchProbs::new(model, t_x);
        let y = BranchProbs::new(model, t_y);
        Self {
            lp_trans: transition_matrix(&x, &y, model.root_extend()),
            log_root: model.log_root_distribution(),
            log_weights: model.log_weights(),
        }
    }

    /// Log transition probability between transducer states.
    #[inline]
    pub fn lp_trans(&self, from: PairState, to: PairState) -> f64 {
        self.lp_trans[from.index()][to.index()]
    }

    /// Emission log-probability of a double absorption: the ancestral
    /// residue is drawn from the root distribution and both children's
    /// (already branch-multiplied) emission vectors condition on it.
    pub fn lp_emit_both(&self, lp_x: &[Vec<f64>], lp_y: &[Vec<f64>]) -> f64 {
        let mut lp = LOG_ZERO;
        for (cpt, lw) in self.log_weights.iter().enumerate() {
            let mut inner = LOG_ZERO;
            for (tok, &root) in self.log_root[cpt].iter().enumerate() {
                log_accum_exp(&mut inner, root + lp_x[cpt][tok] + lp_y[cpt][tok]);
            }
            log_accum_exp(&mut lp, lw + inner);
        }
        lp
    }

    /// Emission log-probability of a single-sided absorption through the
    /// root/insert distribution.
    pub fn lp_emit_single(&self, lp_child: &[Vec<f64>]) -> f64 {
        let mut lp = LOG_ZERO;
        for (cpt, lw) in self.log_weights.iter().enumerate() {
            log_accum_exp(&mut lp, lw + log_inner_product(&self.log_root[cpt], &lp_child[cpt]));
        }
        lp
    }
}

/// Derive the dense transition matrix. `r` is the ancestral-sequence
/// continuation probability λ/μ.
fn transition_matrix(x: &BranchProbs, y: &BranchProbs, r: f64) -> [[f64; N_STATES]; N_STATES] {
    let mut m = [[LOG_ZERO; N_STATES]; N_STATES];

    // Collapsed both-deleted outcome: once a residue is deleted on both
    // branches, subsequent residues are deleted with the extension
    // probabilities until something visible happens or the sequence ends.
    let z = 1.0 / (1.0 - r * x.del_extend * y.del_extend);
    let inf_match = r * (1.0 - x.del_extend) * (1.0 - y.del_extend) * z;
    let inf_del_x = r * x.del_extend * (1.0 - y.del_extend) * z;
    let inf_del_y = r * (1.0 - x.del_extend) * y.del_extend * z;
    let inf_end = (1.0 - r) * z;

    for from in PairState::ALL {
        if from == PairState::End {
            continue;
        }
        // Chance of an(other) insertion on each branch; the generative order
        // forbids returning to an X insertion after a Y insertion.
        let ax = match from {
            PairState::InsertX => x.ins_extend,
            PairState::InsertY => 0.0,
            _ => x.ins_open,
        };
        let ay = if from == PairState::InsertY {
            y.ins_extend
        } else {
            y.ins_open
        };
        // Deletion probability of the next ancestral residue on each branch,
        // with extension when the previous residue was deleted there.
        let px = if from == PairState::DeleteX {
            x.del_extend
        } else {
            x.del_open
        };
        let py = if from == PairState::DeleteY {
            y.del_extend
        } else {
            y.del_open
        };

        let p_match = r * (1.0 - px) * (1.0 - py) + r * px * py * inf_match;
        let p_del_x = r * px * (1.0 - py) + r * px * py * inf_del_x;
        let p_del_y = r * (1.0 - px) * py + r * px * py * inf_del_y;
        let p_end = (1.0 - r) + r * px * py * inf_end;

        let stay = (1.0 - ax) * (1.0 - ay);
        let row = &mut m[from.index()];
        row[PairState::InsertX.index()] = lp(ax);
        row[PairState::InsertY.index()] = lp((1.0 - ax) * ay);
        row[PairState::Match.index()] = lp(stay * p_match);
        row[PairState::DeleteX.index()] = lp(stay * p_del_x);
        row[PairState::DeleteY.index()] = lp(stay * p_del_y);
        row[PairState::End.index()] = lp(stay * p_end);
    }

    m
}

#[inline]
fn lp(p: f64) -> f64 {
    if p > 0.0 {
        p.ln()
    } else {
        LOG_ZERO
    }
}
