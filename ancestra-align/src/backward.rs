//! The Backward matrix: posterior decoding over Forward cells.
//!
//! `B[c]` is the log-probability of completing the alignment from cell `c`
//! onward, excluding `c`'s own emission, so `F[c] + B[c] − lp_end` is the
//! log-posterior of passing through `c`. Filled by scattering: cells are
//! visited in reverse envelope order, and each finished cell pushes its mass
//! back through every in-move. `B[start] = F[end]` up to rounding.

use std::collections::{BTreeMap, BTreeSet};

use ancestra_core::{log_sum_exp, AncestraError, Result, LOG_ZERO};

use crate::alignpath::RowIndex;
use crate::forward::ForwardMatrix;
use crate::matrix::{synthesize_profile, SynthCell};
use crate::pair_hmm::PairState;
use crate::profile::Profile;

/// The Backward matrix, borrowing the Forward pass it complements.
pub struct BackwardMatrix<'a, 'f> {
    fwd: &'f ForwardMatrix<'a>,
    cells: Vec<f64>,
    /// Backward value at the origin; equals `lp_end` up to rounding.
    pub lp_start: f64,
}

impl<'a, 'f> BackwardMatrix<'a, 'f> {
    /// Fill the Backward matrix for a completed Forward pass.
    pub fn new(fwd: &'f ForwardMatrix<'a>) -> Self {
        let geom = &fwd.geom;
        let mut cells = vec![LOG_ZERO; geom.n_slots];

        let mut accum = |slot: Option<usize>, lp: f64| {
            if let Some(slot) = slot {
                cells[slot] = log_sum_exp(cells[slot], lp);
            }
        };

        // Seed: the final move into the end cell.
        geom.for_each_end_source(|sx, sy, lp_chain, _, _| {
            for h1 in PairState::ALL {
                let lp_t = geom.hmm.lp_trans(h1, PairState::End);
                if lp_t != LOG_ZERO {
                    accum(geom.slot_of(sx, sy, h1), lp_t + lp_chain);
                }
            }
        });
        drop(accum);

        // Reverse sweep: once a cell's own backward mass is final, scatter
        // it to every predecessor.
        let x_end = geom.x.end_cell();
        let y_end = geom.y.end_cell();
        for j in (0..=geom.y.seq_len).rev() {
            for i in geom.env.reverse_i(j) {
                if !geom.computed(i, j) {
                    continue;
                }
                for &xc in geom.x.states_at_coord[i].iter().rev() {
                    if xc == x_end {
                        continue;
                    }
                    for &yc in geom.y.states_at_coord[j].iter().rev() {
                        if yc == y_end {
                            continue;
                        }
                        for h2 in PairState::EMITTING {
                            let b2 = match geom.slot_of(xc, yc, h2) {
                                Some(slot) => cells[slot],
                                None => LOG_ZERO,
                            };
                            if b2 == LOG_ZERO {
                                continue;
                            }
                            let emit = geom.emission(xc, yc, h2);
                            if emit == LOG_ZERO {
                                continue;
                            }
                            geom.for_each_in_source(xc, yc, h2, |sx, sy, lp_chain, _, _| {
                                for h1 in PairState::ALL {
                                    let lp_t = geom.hmm.lp_trans(h1, h2);
                                    if lp_t == LOG_ZERO {
                                        continue;
                                    }
                                    if let Some(slot) = geom.slot_of(sx, sy, h1) {
                                        cells[slot] = log_sum_exp(
                                            cells[slot],
                                            lp_t + lp_chain + emit + b2,
                                        );
                                    }
                                }
                            });
                        }
                    }
                }
            }
        }

        let lp_start = match geom.slot_of(
            geom.x.start_cell(),
            geom.y.start_cell(),
            PairState::Start,
        ) {
            Some(slot) => cells[slot],
            None => LOG_ZERO,
        };

        Self {
            fwd,
            cells,
            lp_start,
        }
    }

    /// Stored backward value of a cell, `-inf` outside storage.
    pub(crate) fn get(&self, x_cell: usize, y_cell: usize, h: PairState) -> f64 {
        match self.fwd.geom.slot_of(x_cell, y_cell, h) {
            Some(slot) => self.cells[slot],
            None => LOG_ZERO,
        }
    }

    /// Log-posterior of passing through a cell.
    pub(crate) fn cell_log_post(&self, x_cell: usize, y_cell: usize, h: PairState) -> f64 {
        self.fwd.get(x_cell, y_cell, h) + self.get(x_cell, y_cell, h) - self.fwd.lp_end
    }

    /// Build the parent profile from posterior mass.
    ///
    /// Retains every emitting cell whose posterior reaches `min_post_prob`,
    /// plus the best-trace cells when `include_best_trace` is set. With
    /// `keep_gaps_open`, a retained indel cell also retains the cells that
    /// continue the same indel state, so profile gaps can extend without
    /// reopening. `node_limit` caps the absorbing states (0 = unlimited),
    /// keeping best-trace cells and then the highest posteriors.
    pub fn post_prob_profile(
        &self,
        min_post_prob: f64,
        node_limit: usize,
        include_best_trace: bool,
        keep_gaps_open: bool,
        parent_row: RowIndex,
        name: &str,
    ) -> Result<Profile> {
        if self.fwd.lp_end == LOG_ZERO {
            return Err(AncestraError::ZeroLikelihood(
                "cannot decode posteriors of a zero-likelihood matrix".into(),
            ));
        }
        let geom = &self.fwd.geom;
        let lp_min = if min_post_prob > 0.0 {
            min_post_prob.ln()
        } else {
            f64::MIN
        };

        // Posterior of every reachable emitting cell, in DP order.
        let mut post: BTreeMap<SynthCell, f64> = BTreeMap::new();
        let x_end = geom.x.end_cell();
        let y_end = geom.y.end_cell();
        for j in 0..=geom.y.seq_len {
            for i in geom.env.forward_i(j) {
                if !geom.computed(i, j) {
                    continue;
                }
                for &xc in &geom.x.states_at_coord[i] {
                    if xc == x_end {
                        continue;
                    }
                    for &yc in &geom.y.states_at_coord[j] {
                        if yc == y_end {
                            continue;
                        }
                        for h in PairState::EMITTING {
                            let lp = self.cell_log_post(xc, yc, h);
                            if lp > LOG_ZERO {
                                post.insert(SynthCell::new(xc, yc, h), lp);
                            }
                        }
                    }
                }
            }
        }

        let mut retained: BTreeSet<SynthCell> = post
            .iter()
            .filter(|&(_, &lp)| lp >= lp_min)
            .map(|(&c, _)| c)
            .collect();

        let trace_cells: BTreeSet<SynthCell> = if include_best_trace {
            self.fwd
                .best_trace()?
                .iter()
                .filter(|s| s.h.is_emitting())
                .map(|s| SynthCell::new(s.x, s.y, s.h))
                .collect()
        } else {
            BTreeSet::new()
        };
        retained.extend(trace_cells.iter().copied());

        if keep_gaps_open {
            // One forward sweep: a gap cell joins if a retained cell feeds
            // it through the same indel state.
            let candidates: Vec<SynthCell> = post.keys().copied().collect();
            for c2 in candidates {
                if c2.h == PairState::Match || retained.contains(&c2) {
                    continue;
                }
                let mut feeds = false;
                geom.for_each_in_source(c2.x, c2.y, c2.h, |sx, sy, _, _, _| {
                    if retained.contains(&SynthCell::new(sx, sy, c2.h)) {
                        feeds = true;
                    }
                });
                if feeds && geom.hmm.lp_trans(c2.h, c2.h) != LOG_ZERO {
                    retained.insert(c2);
                }
            }
        }

        if node_limit > 0 && retained.len() > node_limit {
            let mut others: Vec<SynthCell> = retained
                .iter()
                .copied()
                .filter(|c| !trace_cells.contains(c))
                .collect();
            others.sort_by(|a, b| {
                post[b]
                    .partial_cmp(&post[a])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(b))
            });
            others.truncate(node_limit.saturating_sub(trace_cells.len()));
            retained = trace_cells.iter().copied().chain(others).collect();
        }

        let cells: Vec<SynthCell> = retained.into_iter().collect();
        match synthesize_profile(geom, &cells, parent_row, name) {
            Ok(p) => Ok(p),
            Err(_) if !include_best_trace => {
                // Thresholding disconnected the profile; anchor on the best
                // trace and retry.
                let mut cells: BTreeSet<SynthCell> = cells.into_iter().collect();
                for step in self.fwd.best_trace()? {
                    if step.h.is_emitting() {
                        cells.insert(SynthCell::new(step.x, step.y, step.h));
                    }
                }
                let cells: Vec<SynthCell> = cells.into_iter().collect();
                synthesize_profile(geom, &cells, parent_row, name)
            }
            Err(e) => Err(e),
        }
    }
}
