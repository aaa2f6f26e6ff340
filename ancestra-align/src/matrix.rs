//! Shared geometry for the banded pair dynamic programs.
//!
//! The Forward and Backward matrices operate on *cells* `(x, y, h)`: `x` and
//! `y` range over each profile's absorbing states plus its start and end,
//! and `h` over the transducer states. Null states never appear as cell
//! coordinates; chains of null transitions are eliminated up front into
//! per-state closures (`absorb_in` / `end_in`), so every joint path through
//! the two profiles is counted exactly once.
//!
//! Storage is banded: a cell is materialised only when the diagonal envelope
//! stores its pair of reference-row coordinates, and cells sharing a
//! coordinate pair are packed into one block addressed through the
//! envelope's flat cell index.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ancestra_core::{AncestraError, Result, LOG_ZERO};

use crate::alignpath::{path_concat, single_column, AlignPath, RowIndex};
use crate::envelope::DiagonalEnvelope;
use crate::guide::GuideAlignmentEnvelope;
use crate::pair_hmm::{PairHmm, PairState, N_STATES};
use crate::profile::{Profile, ProfileState, ProfileTransition, StateIndex};

/// Bytes of DP storage per coordinate cell pair of resting states.
pub const CELL_BYTES: usize = N_STATES * std::mem::size_of::<f64>();

/// One eliminated null chain: the cell state it departs from, the summed
/// transition log-probability, and the align-path annotations collected
/// along the way.
#[derive(Debug, Clone)]
pub(crate) struct ChainEntry {
    /// Cell id of the source (an absorbing state or start).
    pub src: usize,
    pub lp: f64,
    pub path: AlignPath,
}

/// Per-profile index: cell states, reference-row coordinates, and null-chain
/// closures.
#[derive(Debug)]
pub(crate) struct ProfileIndex<'a> {
    pub profile: &'a Profile,
    pub rows: BTreeSet<RowIndex>,
    /// Reference-row residue count (the envelope axis length).
    pub seq_len: usize,
    /// State index of each cell id; cell 0 is start, the last cell is end.
    pub cell_states: Vec<StateIndex>,
    /// Reference-row coordinate of each cell id.
    pub coord: Vec<usize>,
    /// Position of each cell id within its coordinate group.
    pub slot: Vec<usize>,
    /// Cell ids resting at each coordinate, ascending.
    pub states_at_coord: Vec<Vec<usize>>,
    /// For each cell id, the chains that absorb into it. Empty for start
    /// and end.
    pub absorb_in: Vec<Vec<ChainEntry>>,
    /// Chains from cell states into the end state.
    pub end_in: Vec<ChainEntry>,
}

impl<'a> ProfileIndex<'a> {
    pub fn new(profile: &'a Profile, ref_row: RowIndex) -> Result<Self> {
        let n = profile.size();
        let end_state = profile.end_index();

        let mut cell_states = Vec::new();
        let mut cell_of_state: Vec<Option<usize>> = vec![None; n];
        for (s, state) in profile.states.iter().enumerate() {
            if s == 0 || s == end_state || !state.is_null() {
                cell_of_state[s] = Some(cell_states.len());
                cell_states.push(s);
            }
        }

        let coord_of = |s: StateIndex| -> Result<usize> {
            profile.states[s]
                .seq_coords
                .get(&ref_row)
                .copied()
                .ok_or_else(|| {
                    AncestraError::Invariant(format!(
                        "state {} of profile {} lacks a coordinate for reference row {}",
                        s, profile.name, ref_row
                    ))
                })
        };

        let seq_len = coord_of(end_state)?;
        let mut coord = Vec::with_capacity(cell_states.len());
        for &s in &cell_states {
            let c = coord_of(s)?;
            if c > seq_len {
                return Err(AncestraError::Invariant(format!(
                    "state {} coordinate {} exceeds reference length {}",
                    s, c, seq_len
                )));
            }
            coord.push(c);
        }

        let mut states_at_coord: Vec<Vec<usize>> = vec![Vec::new(); seq_len + 1];
        let mut slot = vec![0usize; cell_states.len()];
        for (cell, &c) in coord.iter().enumerate() {
            slot[cell] = states_at_coord[c].len();
            states_at_coord[c].push(cell);
        }

        // Null-chain elimination. `null_in[s]` lists, for each interior null
        // state, every path from a cell state to `s` through null states
        // only, with summed log-probability and concatenated paths.
        let mut null_in: HashMap<StateIndex, Vec<ChainEntry>> = HashMap::new();
        let into_state = |s: StateIndex, null_in: &HashMap<StateIndex, Vec<ChainEntry>>| {
            let mut entries = Vec::new();
            for &ti in &profile.states[s].in_trans {
                let t = &profile.trans[ti];
                match cell_of_state[t.src] {
                    Some(cell) if t.src != end_state => entries.push(ChainEntry {
                        src: cell,
                        lp: t.lp_trans,
                        path: t.path.clone(),
                    }),
                    _ => {
                        for e in null_in.get(&t.src).into_iter().flatten() {
                            entries.push(ChainEntry {
                                src: e.src,
                                lp: e.lp + t.lp_trans,
                                path: path_concat(&e.path, &t.path),
                            });
                        }
                    }
                }
            }
            entries
        };
        for s in 1..end_state {
            if cell_of_state[s].is_none() {
                let entries = into_state(s, &null_in);
                null_in.insert(s, entries);
            }
        }

        let mut absorb_in = vec![Vec::new(); cell_states.len()];
        for (cell, &s) in cell_states.iter().enumerate() {
            if s != 0 && s != end_state {
                absorb_in[cell] = into_state(s, &null_in);
            }
        }
        let end_in = into_state(end_state, &null_in);

        Ok(Self {
            profile,
            rows: profile.rows(),
            seq_len,
            cell_states,
            coord,
            slot,
            states_at_coord,
            absorb_in,
            end_in,
        })
    }

    /// Cell id of the start state.
    pub fn start_cell(&self) -> usize {
        0
    }

    /// Cell id of the end state.
    pub fn end_cell(&self) -> usize {
        self.cell_states.len() - 1
    }

    /// The profile state behind a cell id.
    pub fn state(&self, cell: usize) -> &ProfileState {
        &self.profile.states[self.cell_states[cell]]
    }
}

/// Geometry shared by one Forward/Backward pair: profile indices, the
/// transducer, the envelopes, and the block layout of the flat cell array.
#[derive(Debug)]
pub(crate) struct PairGeometry<'a> {
    pub x: ProfileIndex<'a>,
    pub y: ProfileIndex<'a>,
    pub hmm: &'a PairHmm,
    pub env: DiagonalEnvelope,
    pub guide: Option<GuideAlignmentEnvelope>,
    /// Per envelope storage cell: offset of its block in the flat array.
    block_offset: Vec<usize>,
    /// Total number of f64 slots.
    pub n_slots: usize,
    /// Precomputed single-absorption emissions per cell id.
    emit_x: Vec<f64>,
    emit_y: Vec<f64>,
}

impl<'a> PairGeometry<'a> {
    pub fn new(
        x_profile: &'a Profile,
        y_profile: &'a Profile,
        hmm: &'a PairHmm,
        env: DiagonalEnvelope,
        guide: Option<GuideAlignmentEnvelope>,
        x_ref_row: RowIndex,
        y_ref_row: RowIndex,
    ) -> Result<Self> {
        let x = ProfileIndex::new(x_profile, x_ref_row)?;
        let y = ProfileIndex::new(y_profile, y_ref_row)?;
        if env.x_len != x.seq_len || env.y_len != y.seq_len {
            return Err(AncestraError::Invariant(format!(
                "envelope is {}x{} but reference rows are {}x{}",
                env.x_len, env.y_len, x.seq_len, y.seq_len
            )));
        }

        // Lay out one block per stored coordinate pair, sized by the number
        // of states resting at each coordinate.
        let mut block_offset = vec![0usize; env.total_storage_size];
        let mut n_slots = 0usize;
        for j in 0..=env.y_len {
            for &d in &env.storage_diagonals {
                if env.intersects(j, d) {
                    let i = (j as i64 + d) as usize;
                    let cell = env.cell_index(i, j);
                    block_offset[cell] = n_slots;
                    n_slots +=
                        x.states_at_coord[i].len() * y.states_at_coord[j].len() * N_STATES;
                }
            }
        }

        let emit_single = |idx: &ProfileIndex| -> Vec<f64> {
            (0..idx.cell_states.len())
                .map(|cell| match &idx.state(cell).lp_absorb {
                    Some(lp) => hmm.lp_emit_single(lp),
                    None => LOG_ZERO,
                })
                .collect()
        };
        let emit_x = emit_single(&x);
        let emit_y = emit_single(&y);

        Ok(Self {
            x,
            y,
            hmm,
            env,
            guide,
            block_offset,
            n_slots,
            emit_x,
            emit_y,
        })
    }

    /// Whether coordinate pair `(i, j)` is computed (diagonal envelope ∩
    /// guide band).
    #[inline]
    pub fn computed(&self, i: usize, j: usize) -> bool {
        self.env.contains(i, j)
            && self.guide.as_ref().map_or(true, |g| g.in_band(i, j))
    }

    /// Flat slot of `(x cell, y cell, h)`, or `None` when outside storage.
    #[inline]
    pub fn slot_of(&self, x_cell: usize, y_cell: usize, h: PairState) -> Option<usize> {
        let i = self.x.coord[x_cell];
        let j = self.y.coord[y_cell];
        if !self.env.in_storage(i, j) {
            return None;
        }
        let base = self.block_offset[self.env.cell_index(i, j)];
        let ny = self.y.states_at_coord[j].len();
        Some(base + (self.x.slot[x_cell] * ny + self.y.slot[y_cell]) * N_STATES + h.index())
    }

    /// Emission log-probability of entering `(x, y, h)`.
    pub fn emission(&self, x_cell: usize, y_cell: usize, h: PairState) -> f64 {
        match h {
            PairState::Match => {
                match (
                    &self.x.state(x_cell).lp_absorb,
                    &self.y.state(y_cell).lp_absorb,
                ) {
                    (Some(lpx), Some(lpy)) => self.hmm.lp_emit_both(lpx, lpy),
                    _ => LOG_ZERO,
                }
            }
            PairState::DeleteY | PairState::InsertX => self.emit_x[x_cell],
            PairState::DeleteX | PairState::InsertY => self.emit_y[y_cell],
            PairState::Start | PairState::End => 0.0,
        }
    }

    /// Enumerate the chain sources of every move into `(x, y, h)`, in the
    /// deterministic tie-break order (x chains outermost, then y chains).
    /// The callback receives the source cell pair, the summed chain
    /// log-probability, and the chains themselves (absent on the resting
    /// side).
    pub fn for_each_in_source<F>(&self, x_cell: usize, y_cell: usize, h: PairState, mut f: F)
    where
        F: FnMut(usize, usize, f64, Option<&ChainEntry>, Option<&ChainEntry>),
    {
        match (h.absorbs_x(), h.absorbs_y()) {
            (true, true) => {
                for ex in &self.x.absorb_in[x_cell] {
                    for ey in &self.y.absorb_in[y_cell] {
                        f(ex.src, ey.src, ex.lp + ey.lp, Some(ex), Some(ey));
                    }
                }
            }
            (true, false) => {
                for ex in &self.x.absorb_in[x_cell] {
                    f(ex.src, y_cell, ex.lp, Some(ex), None);
                }
            }
            (false, true) => {
                for ey in &self.y.absorb_in[y_cell] {
                    f(x_cell, ey.src, ey.lp, None, Some(ey));
                }
            }
            (false, false) => {}
        }
    }

    /// Enumerate the chain sources of the final move into the end cell.
    pub fn for_each_end_source<F>(&self, mut f: F)
    where
        F: FnMut(usize, usize, f64, &ChainEntry, &ChainEntry),
    {
        for ex in &self.x.end_in {
            for ey in &self.y.end_in {
                f(ex.src, ey.src, ex.lp + ey.lp, ex, ey);
            }
        }
    }

    /// The alignment column emitted by cell `(x, y, h)`: the absorbing
    /// side's column bits, explicit gaps for every row of the resting side,
    /// and the ancestral row's presence bit.
    pub fn column_of_cell(
        &self,
        x_cell: usize,
        y_cell: usize,
        h: PairState,
        parent_row: RowIndex,
    ) -> AlignPath {
        debug_assert!(h.is_emitting());
        let mut bits: Vec<(RowIndex, bool)> = Vec::new();
        if h.absorbs_x() {
            for (&row, b) in &self.x.state(x_cell).path {
                bits.push((row, b[0]));
            }
        } else {
            bits.extend(self.x.rows.iter().map(|&row| (row, false)));
        }
        if h.absorbs_y() {
            for (&row, b) in &self.y.state(y_cell).path {
                bits.push((row, b[0]));
            }
        } else {
            bits.extend(self.y.rows.iter().map(|&row| (row, false)));
        }
        bits.push((parent_row, h.has_ancestral_residue()));
        single_column(bits)
    }
}

/// A retained emitting cell, the unit of profile synthesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct SynthCell {
    /// Topological sort key: moves strictly increase `x + y`.
    pub depth: usize,
    pub x: usize,
    pub y: usize,
    pub h: PairState,
}

impl SynthCell {
    pub fn new(x: usize, y: usize, h: PairState) -> Self {
        Self { depth: x + y, x, y, h }
    }
}

/// Build the parent profile from a sorted, deduplicated set of retained
/// emitting cells.
///
/// Each cell becomes one absorbing state; transitions are the direct moves
/// between retained cells (and from start / to end), weighted by transducer
/// transition plus chain log-probabilities, with chain align-paths attached.
/// States unreachable from start or not co-reachable to end are dropped;
/// the result is normalised to wait/ready form and validated.
pub(crate) fn synthesize_profile(
    geom: &PairGeometry,
    cells: &[SynthCell],
    parent_row: RowIndex,
    name: &str,
) -> Result<Profile> {
    let n_components = geom.x.profile.n_components;
    let n_tokens = geom.x.profile.n_tokens;

    // State index per retained cell (start = 0, end = last).
    let mut index: BTreeMap<(usize, usize, usize), StateIndex> = BTreeMap::new();
    for (pos, c) in cells.iter().enumerate() {
        index.insert((c.x, c.y, c.h.index()), pos + 1);
    }
    let end_index = cells.len() + 1;
    let start_key = (
        geom.x.start_cell(),
        geom.y.start_cell(),
        PairState::Start.index(),
    );

    let merged_coords = |xs: &ProfileState, ys: &ProfileState| {
        let mut coords = xs.seq_coords.clone();
        coords.extend(ys.seq_coords.iter().map(|(&r, &c)| (r, c)));
        coords
    };

    let mut states = Vec::with_capacity(cells.len() + 2);
    let mut start = ProfileState::new("START".into());
    start.seq_coords = merged_coords(
        geom.x.state(geom.x.start_cell()),
        geom.y.state(geom.y.start_cell()),
    );
    states.push(start);

    for c in cells {
        let xs = geom.x.state(c.x);
        let ys = geom.y.state(c.y);
        let lp_absorb = match c.h {
            PairState::Match => {
                let lpx = xs.lp_absorb.as_ref().expect("match cell absorbs x");
                let lpy = ys.lp_absorb.as_ref().expect("match cell absorbs y");
                (0..n_components)
                    .map(|cpt| {
                        (0..n_tokens)
                            .map(|tok| lpx[cpt][tok] + lpy[cpt][tok])
                            .collect()
                    })
                    .collect()
            }
            PairState::DeleteY | PairState::InsertX => {
                xs.lp_absorb.clone().expect("cell absorbs x")
            }
            PairState::DeleteX | PairState::InsertY => {
                ys.lp_absorb.clone().expect("cell absorbs y")
            }
            PairState::Start | PairState::End => unreachable!("cells are emitting"),
        };
        let mut s = ProfileState::new(cell_name(xs, ys, c.h));
        s.lp_absorb = Some(lp_absorb);
        s.path = geom.column_of_cell(c.x, c.y, c.h, parent_row);
        s.seq_coords = merged_coords(xs, ys);
        states.push(s);
    }

    let mut end = ProfileState::new("END".into());
    end.seq_coords = merged_coords(
        geom.x.state(geom.x.end_cell()),
        geom.y.state(geom.y.end_cell()),
    );
    states.push(end);

    // Moves between retained cells become transitions.
    let mut trans: Vec<ProfileTransition> = Vec::new();
    for c2 in cells {
        let dest = index[&(c2.x, c2.y, c2.h.index())];
        geom.for_each_in_source(c2.x, c2.y, c2.h, |sx, sy, lp_chain, ex, ey| {
            for h1 in PairState::ALL {
                let lp_h = geom.hmm.lp_trans(h1, c2.h);
                if lp_h == LOG_ZERO {
                    continue;
                }
                let key = (sx, sy, h1.index());
                let src = if key == start_key {
                    0
                } else {
                    match index.get(&key) {
                        Some(&s) => s,
                        None => continue,
                    }
                };
                trans.push(ProfileTransition {
                    src,
                    dest,
                    lp_trans: lp_chain + lp_h,
                    path: chain_paths(ex, ey),
                });
            }
        });
    }
    geom.for_each_end_source(|sx, sy, lp_chain, ex, ey| {
        for h1 in PairState::ALL {
            let lp_h = geom.hmm.lp_trans(h1, PairState::End);
            if lp_h == LOG_ZERO {
                continue;
            }
            let key = (sx, sy, h1.index());
            let src = if key == start_key {
                0
            } else {
                match index.get(&key) {
                    Some(&s) => s,
                    None => continue,
                }
            };
            trans.push(ProfileTransition {
                src,
                dest: end_index,
                lp_trans: lp_chain + lp_h,
                path: chain_paths(Some(ex), Some(ey)),
            });
        }
    });

    // Drop states with no start-to-end path through them.
    let n = states.len();
    let mut from_start = vec![false; n];
    from_start[0] = true;
    for t in &trans {
        if from_start[t.src] {
            from_start[t.dest] = true;
        }
    }
    let mut to_end = vec![false; n];
    to_end[n - 1] = true;
    for t in trans.iter().rev() {
        if to_end[t.dest] {
            to_end[t.src] = true;
        }
    }
    if !from_start[n - 1] {
        return Err(AncestraError::Invariant(
            "synthesized profile has no start-to-end path".into(),
        ));
    }
    let keep: Vec<bool> = (0..n)
        .map(|s| (from_start[s] && to_end[s]) || s == 0 || s == n - 1)
        .collect();
    let mut remap = vec![usize::MAX; n];
    let mut kept_states = Vec::new();
    for (s, state) in states.into_iter().enumerate() {
        if keep[s] {
            remap[s] = kept_states.len();
            kept_states.push(state);
        }
    }
    let kept_trans: Vec<ProfileTransition> = trans
        .into_iter()
        .filter(|t| keep[t.src] && keep[t.dest])
        .map(|t| ProfileTransition {
            src: remap[t.src],
            dest: remap[t.dest],
            lp_trans: t.lp_trans,
            path: t.path,
        })
        .collect();

    let mut seqs = geom.x.profile.seqs.clone();
    seqs.extend(geom.y.profile.seqs.iter().map(|(&r, s)| (r, s.clone())));

    let mut prof = Profile {
        name: name.to_string(),
        n_components,
        n_tokens,
        states: kept_states,
        trans: kept_trans,
        seqs,
    };
    prof.rebuild_transition_lists();
    let prof = prof.add_ready_states();
    prof.validate()?;
    Ok(prof)
}

fn chain_paths(ex: Option<&ChainEntry>, ey: Option<&ChainEntry>) -> AlignPath {
    match (ex, ey) {
        (Some(a), Some(b)) => path_concat(&a.path, &b.path),
        (Some(a), None) => a.path.clone(),
        (None, Some(b)) => b.path.clone(),
        (None, None) => AlignPath::new(),
    }
}

fn cell_name(xs: &ProfileState, ys: &ProfileState, h: PairState) -> String {
    match h {
        PairState::Match => format!("{}~{}", xs.name, ys.name),
        PairState::DeleteY => format!("{}~del", xs.name),
        PairState::DeleteX => format!("del~{}", ys.name),
        PairState::InsertX => format!("{}~ins", xs.name),
        PairState::InsertY => format!("ins~{}", ys.name),
        PairState::Start | PairState::End => unreachable!("only emitting cells are named"),
    }
}
