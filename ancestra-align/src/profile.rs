//! The profile automaton: a weighted DAG summarising the likely alignments
//! and residues of one subtree's descendants.
//!
//! States are start (index 0), end (last index), null (no emission), or
//! absorbing (emits one alignment column with per-component log-emission
//! vectors). Transitions go from lower to higher state indices. A state
//! whose out-transitions all lead to absorbing states is *Ready*; one whose
//! out-transitions all lead to null states is *Wait*; [`Profile::add_ready_states`]
//! splits any state that has both kinds so the pair transducer can always
//! alternate cleanly between waiting and absorbing.

use std::collections::{BTreeMap, BTreeSet};

use ancestra_core::{log_accum_exp, log_inner_product, AncestraError, Result, LOG_ZERO};
use ancestra_phylo::rate_model::WILDCARD_CHAR;
use ancestra_phylo::RateModel;

use crate::alignpath::{column_count, path_residues, residues_in_row, AlignPath, RowIndex};

/// Index of a state within its profile.
pub type StateIndex = usize;
/// Index of a transition within its profile.
pub type TransIndex = usize;

/// Suffix appended to the wait half of a split state.
const WAIT_SUFFIX: &str = ";";
/// Suffix appended to the ready half of a split state.
const READY_SUFFIX: &str = ".";

/// A transition between profile states.
#[derive(Debug, Clone)]
pub struct ProfileTransition {
    pub src: StateIndex,
    pub dest: StateIndex,
    /// Log-probability of taking this transition.
    pub lp_trans: f64,
    /// Alignment columns traversed by the transition itself (usually empty).
    pub path: AlignPath,
}

/// A profile state.
#[derive(Debug, Clone)]
pub struct ProfileState {
    pub name: String,
    /// Per-component, per-token log-emission vectors; `None` for start, end,
    /// and null states.
    pub lp_absorb: Option<Vec<Vec<f64>>>,
    /// The emitted column (absorbing states only; exactly one column).
    pub path: AlignPath,
    /// Cumulative residue count per leaf row when this state is entered.
    pub seq_coords: BTreeMap<RowIndex, usize>,
    pub in_trans: Vec<TransIndex>,
    pub null_out: Vec<TransIndex>,
    pub absorb_out: Vec<TransIndex>,
}

impl ProfileState {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            lp_absorb: None,
            path: AlignPath::new(),
            seq_coords: BTreeMap::new(),
            in_trans: Vec::new(),
            null_out: Vec::new(),
            absorb_out: Vec::new(),
        }
    }

    /// Whether this state emits nothing.
    pub fn is_null(&self) -> bool {
        self.lp_absorb.is_none()
    }

    /// Ready: every out-transition leads to an absorbing state.
    pub fn is_ready(&self) -> bool {
        self.null_out.is_empty()
    }

    /// Wait: every out-transition leads to a null state.
    pub fn is_wait(&self) -> bool {
        self.absorb_out.is_empty()
    }
}

/// The profile automaton.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub n_components: usize,
    pub n_tokens: usize,
    pub states: Vec<ProfileState>,
    pub trans: Vec<ProfileTransition>,
    /// Raw sequences of the leaf rows summarised by this profile.
    pub seqs: BTreeMap<RowIndex, Vec<u8>>,
}

impl Profile {
    /// Build the linear-chain profile of one leaf sequence.
    ///
    /// A sequence of length L becomes START → s_1 → … → s_L → END with L+1
    /// transitions of log-probability 0. Each s_i emits the observed token
    /// (one-hot in log space) or a wildcard (all log 1).
    pub fn from_leaf(model: &RateModel, name: &str, seq: &[u8], row: RowIndex) -> Result<Self> {
        let tokens = model.tokenize(seq)?;
        let n_components = model.n_components();
        let n_tokens = model.n_tokens();
        let len = tokens.len();

        let mut states = Vec::with_capacity(len + 2);
        let mut start = ProfileState::new("START".into());
        start.seq_coords.insert(row, 0);
        states.push(start);
        for (pos, tok) in tokens.iter().enumerate() {
            let mut s = ProfileState::new(format!("{}{}", seq[pos] as char, pos + 1));
            let mut lp = vec![vec![LOG_ZERO; n_tokens]; n_components];
            match tok {
                Some(t) => {
                    for cpt in lp.iter_mut() {
                        cpt[*t] = 0.0;
                    }
                }
                None => {
                    for cpt in lp.iter_mut() {
                        cpt.fill(0.0);
                    }
                }
            }
            s.lp_absorb = Some(lp);
            s.path.insert(row, vec![true]);
            s.seq_coords.insert(row, pos + 1);
            states.push(s);
        }
        let mut end = ProfileState::new("END".into());
        end.seq_coords.insert(row, len);
        states.push(end);

        let trans = (0..=len)
            .map(|pos| ProfileTransition {
                src: pos,
                dest: pos + 1,
                lp_trans: 0.0,
                path: AlignPath::new(),
            })
            .collect();

        let mut prof = Self {
            name: name.to_string(),
            n_components,
            n_tokens,
            states,
            trans,
            seqs: BTreeMap::from([(row, seq.to_vec())]),
        };
        prof.rebuild_transition_lists();
        prof.validate()?;
        Ok(prof)
    }

    /// Index of the start state.
    pub fn start_index(&self) -> StateIndex {
        0
    }

    /// Index of the end state.
    pub fn end_index(&self) -> StateIndex {
        self.states.len() - 1
    }

    /// Number of states.
    pub fn size(&self) -> usize {
        self.states.len()
    }

    /// All rows this profile knows about: leaf rows with sequences plus any
    /// row mentioned by a state or transition path (internal nodes).
    pub fn rows(&self) -> BTreeSet<RowIndex> {
        let mut rows: BTreeSet<RowIndex> = self.seqs.keys().copied().collect();
        for s in &self.states {
            rows.extend(s.path.keys().copied());
        }
        for t in &self.trans {
            rows.extend(t.path.keys().copied());
        }
        rows
    }

    /// A copy whose absorbing emissions are pushed through one substitution
    /// matrix per component: `lp'[c] = ln Σ_d P[c][d]·exp(lp[d])`.
    ///
    /// Topology, paths, and coordinates are untouched.
    pub fn left_multiply(&self, sub: &[Vec<Vec<f64>>]) -> Self {
        let ln_sub: Vec<Vec<Vec<f64>>> = sub
            .iter()
            .map(|m| m.iter().map(|row| ancestra_core::ln_vec(row)).collect())
            .collect();
        let mut prof = self.clone();
        for state in prof.states.iter_mut() {
            if let Some(lp) = state.lp_absorb.as_mut() {
                for (cpt, vec) in lp.iter_mut().enumerate() {
                    let old = vec.clone();
                    for (c, out) in vec.iter_mut().enumerate() {
                        *out = log_inner_product(&ln_sub[cpt][c], &old);
                    }
                }
            }
        }
        prof
    }

    /// Normalise to wait/ready form.
    ///
    /// Any state with both null and absorbing out-transitions is split: the
    /// original keeps the null transitions (Wait), a fresh null state takes
    /// over the absorbing ones (Ready), joined by a zero-cost null
    /// transition. States are renumbered to preserve topological order.
    /// Idempotent.
    pub fn add_ready_states(&self) -> Self {
        let n = self.states.len();
        let mixed: Vec<bool> = self
            .states
            .iter()
            .map(|s| !s.is_ready() && !s.is_wait())
            .collect();
        if mixed.iter().all(|&m| !m) {
            return self.clone();
        }

        let mut old2new = vec![0; n];
        let mut next = 0;
        for s in 0..n {
            old2new[s] = next;
            next += if mixed[s] { 2 } else { 1 };
        }

        let is_absorbing_dest: Vec<bool> = self
            .trans
            .iter()
            .map(|t| !self.states[t.dest].is_null())
            .collect();

        let mut trans: Vec<ProfileTransition> = self
            .trans
            .iter()
            .enumerate()
            .map(|(ti, t)| ProfileTransition {
                // Absorbing transitions out of a split state depart from its
                // ready half.
                src: old2new[t.src] + (mixed[t.src] && is_absorbing_dest[ti]) as usize,
                dest: old2new[t.dest],
                lp_trans: t.lp_trans,
                path: t.path.clone(),
            })
            .collect();

        let mut states = Vec::with_capacity(next);
        for (s, old) in self.states.iter().enumerate() {
            let mut wait = old.clone();
            wait.in_trans.clear();
            wait.null_out.clear();
            wait.absorb_out.clear();
            if mixed[s] {
                wait.name = format!("{}{}", old.name, WAIT_SUFFIX);
                let mut ready = ProfileState::new(format!("{}{}", old.name, READY_SUFFIX));
                ready.seq_coords = old.seq_coords.clone();
                trans.push(ProfileTransition {
                    src: old2new[s],
                    dest: old2new[s] + 1,
                    lp_trans: 0.0,
                    path: AlignPath::new(),
                });
                states.push(wait);
                states.push(ready);
            } else {
                states.push(wait);
            }
        }

        let mut prof = Self {
            name: self.name.clone(),
            n_components: self.n_components,
            n_tokens: self.n_tokens,
            states,
            trans,
            seqs: self.seqs.clone(),
        };
        prof.rebuild_transition_lists();
        prof
    }

    /// Recompute every state's in/out transition lists from the transition
    /// table. A transition's kind is the kind of its destination state.
    pub(crate) fn rebuild_transition_lists(&mut self) {
        for s in self.states.iter_mut() {
            s.in_trans.clear();
            s.null_out.clear();
            s.absorb_out.clear();
        }
        for ti in 0..self.trans.len() {
            let (src, dest) = (self.trans[ti].src, self.trans[ti].dest);
            if self.states[dest].is_null() {
                self.states[src].null_out.push(ti);
            } else {
                self.states[src].absorb_out.push(ti);
            }
            self.states[dest].in_trans.push(ti);
        }
    }

    /// The single alignment column of an absorbing state as a row → char
    /// map: the stored sequence character for leaf rows, the wildcard for
    /// rows without a sequence (internal nodes).
    pub fn align_column(&self, s: StateIndex) -> BTreeMap<RowIndex, u8> {
        let mut col = BTreeMap::new();
        for (&row, bits) in &self.states[s].path {
            if bits.first().copied() != Some(true) {
                continue;
            }
            let c = match (self.states[s].seq_coords.get(&row), self.seqs.get(&row)) {
                (Some(&coord), Some(seq)) => seq[coord - 1],
                _ => WILDCARD_CHAR,
            };
            col.insert(row, c);
        }
        col
    }

    /// Total log-likelihood of all start→end paths, each weighted by its
    /// transitions and by the absorption of every visited emitting state
    /// against `log_ins` under the mixture weights.
    pub fn sum_path_absorb(&self, log_weights: &[f64], log_ins: &[Vec<f64>]) -> f64 {
        let mut lp_cum = vec![LOG_ZERO; self.states.len()];
        lp_cum[0] = 0.0;
        for pos in 1..self.states.len() {
            let state = &self.states[pos];
            let lp_abs = match &state.lp_absorb {
                None => 0.0,
                Some(lp) => {
                    let mut acc = LOG_ZERO;
                    for (cpt, &lw) in log_weights.iter().enumerate() {
                        log_accum_exp(&mut acc, lw + log_inner_product(&log_ins[cpt], &lp[cpt]));
                    }
                    acc
                }
            };
            for &ti in &state.in_trans {
                let t = &self.trans[ti];
                let delta = lp_cum[t.src] + t.lp_trans + lp_abs;
                log_accum_exp(&mut lp_cum[pos], delta);
            }
        }
        *lp_cum.last().expect("profile has states")
    }

    /// Check every structural invariant; failures are internal bugs.
    ///
    /// Verified: start/end placement, topological transition order,
    /// wait-or-ready form, per-row sequence-coordinate consistency across
    /// every transition, single-column absorbing paths, empty null paths,
    /// and absence of NaN log-probabilities.
    pub fn validate(&self) -> Result<()> {
        let n = self.states.len();
        if n < 2 {
            return Err(AncestraError::Invariant(
                "profile needs at least start and end states".into(),
            ));
        }
        let start = &self.states[0];
        if !start.in_trans.is_empty() || !start.is_null() {
            return Err(AncestraError::Invariant("start state malformed".into()));
        }
        let end = &self.states[n - 1];
        if !end.null_out.is_empty() || !end.absorb_out.is_empty() || !end.is_null() {
            return Err(AncestraError::Invariant("end state malformed".into()));
        }

        for (ti, t) in self.trans.iter().enumerate() {
            if t.src >= t.dest || t.dest >= n {
                return Err(AncestraError::Invariant(format!(
                    "transition #{} from {} to {} is not toposorted",
                    ti, t.src, t.dest
                )));
            }
            if t.lp_trans.is_nan() {
                return Err(AncestraError::Invariant(format!(
                    "transition #{} has NaN log-probability",
                    ti
                )));
            }
        }

        for (si, s) in self.states.iter().enumerate() {
            if !s.is_ready() && !s.is_wait() {
                return Err(AncestraError::Invariant(format!(
                    "state {} ({}) has {} null and {} absorbing out-transitions, \
                     so is neither Wait nor Ready",
                    si,
                    s.name,
                    s.null_out.len(),
                    s.absorb_out.len()
                )));
            }
            match &s.lp_absorb {
                Some(lp) => {
                    if column_count(&s.path) != 1 {
                        return Err(AncestraError::Invariant(format!(
                            "absorbing state {} must carry exactly one column",
                            si
                        )));
                    }
                    if lp.len() != self.n_components
                        || lp.iter().any(|v| v.len() != self.n_tokens)
                    {
                        return Err(AncestraError::Invariant(format!(
                            "state {} emission table has wrong shape",
                            si
                        )));
                    }
                    if lp.iter().flatten().any(|x| x.is_nan()) {
                        return Err(AncestraError::Invariant(format!(
                            "state {} emission table contains NaN",
                            si
                        )));
                    }
                }
                None => {
                    if !s.path.is_empty() {
                        return Err(AncestraError::Invariant(format!(
                            "null state {} carries an alignment column",
                            si
                        )));
                    }
                }
            }
        }

        self.assert_seq_coords_consistent()
    }

    /// Coordinate consistency: along every transition, the destination's
    /// coordinate of each row equals the source coordinate plus the residues
    /// contributed by the transition path and the destination's own column.
    fn assert_seq_coords_consistent(&self) -> Result<()> {
        for (ti, t) in self.trans.iter().enumerate() {
            let src = &self.states[t.src];
            let dest = &self.states[t.dest];
            let mut expected = src.seq_coords.clone();
            for (&row, bits) in &t.path {
                *expected.entry(row).or_insert(0) += residues_in_row(bits);
            }
            for (&row, bits) in &dest.path {
                *expected.entry(row).or_insert(0) += residues_in_row(bits);
            }
            for (&row, &coord) in &dest.seq_coords {
                match expected.get(&row) {
                    None => {
                        return Err(AncestraError::Invariant(format!(
                            "transition #{}: no source coordinate for row {}",
                            ti, row
                        )))
                    }
                    Some(&e) if e != coord => {
                        return Err(AncestraError::Invariant(format!(
                            "transition #{}: row {} coordinate {} + paths ({}) != {}",
                            ti,
                            row,
                            src.seq_coords.get(&row).copied().unwrap_or(0),
                            path_residues(&t.path, row) + path_residues(&dest.path, row),
                            coord
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}
