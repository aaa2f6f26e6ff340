//! Alignment paths: per-row gap structure over a shared column axis.
//!
//! An [`AlignPath`] maps a row index (a tree node id) to a sequence of
//! residue-present bits. All rows of a well-formed path have the same number
//! of columns; a column is the tuple of row bits at one position. The map is
//! a `BTreeMap` so iteration order, and every output derived from it, is
//! deterministic.

use std::collections::BTreeMap;

use ancestra_core::{AncestraError, Result};

/// Row index into an alignment: the id of the tree node the row belongs to.
pub type RowIndex = usize;

/// Per-row residue-present bits over a common column axis.
pub type AlignPath = BTreeMap<RowIndex, Vec<bool>>;

/// Gap character used when rendering rows.
pub const GAP_CHAR: u8 = b'-';

/// Number of residues (true bits) in one row of a path.
pub fn residues_in_row(bits: &[bool]) -> usize {
    bits.iter().filter(|&&b| b).count()
}

/// Number of residues a path holds for `row` (0 if the row is absent).
pub fn path_residues(path: &AlignPath, row: RowIndex) -> usize {
    path.get(&row).map_or(0, |bits| residues_in_row(bits))
}

/// Number of columns of a path. Debug-asserts that all rows agree.
pub fn column_count(path: &AlignPath) -> usize {
    let cols = path.values().next().map_or(0, |bits| bits.len());
    debug_assert!(
        path.values().all(|bits| bits.len() == cols),
        "align path rows have unequal lengths"
    );
    cols
}

/// Union of two paths over disjoint row sets.
///
/// # Errors
///
/// Returns an error if the paths share a row, or if both are non-empty with
/// differing column counts.
pub fn path_union(a: &AlignPath, b: &AlignPath) -> Result<AlignPath> {
    if !a.is_empty() && !b.is_empty() && column_count(a) != column_count(b) {
        return Err(AncestraError::InvalidInput(format!(
            "cannot union paths of {} and {} columns",
            column_count(a),
            column_count(b)
        )));
    }
    let mut out = a.clone();
    for (&row, bits) in b {
        if out.insert(row, bits.clone()).is_some() {
            return Err(AncestraError::InvalidInput(format!(
                "row {} present in both paths",
                row
            )));
        }
    }
    Ok(out)
}

/// Lengthwise concatenation of two paths.
///
/// Rows present on only one side are padded with gap columns on the other,
/// so the result is always well-formed over the union of the row sets.
pub fn path_concat(a: &AlignPath, b: &AlignPath) -> AlignPath {
    let ca = column_count(a);
    let cb = column_count(b);
    let mut out = AlignPath::new();
    for &row in a.keys().chain(b.keys()) {
        if out.contains_key(&row) {
            continue;
        }
        let mut bits = Vec::with_capacity(ca + cb);
        match a.get(&row) {
            Some(r) => bits.extend_from_slice(r),
            None => bits.resize(ca, false),
        }
        match b.get(&row) {
            Some(r) => bits.extend_from_slice(r),
            None => bits.resize(ca + cb, false),
        }
        out.insert(row, bits);
    }
    out
}

/// Build a single-column path from explicit row bits.
pub fn single_column<I: IntoIterator<Item = (RowIndex, bool)>>(bits: I) -> AlignPath {
    bits.into_iter().map(|(row, bit)| (row, vec![bit])).collect()
}

/// Render one row of a path as gapped characters.
///
/// Residue characters are taken in order from `seq` when given; rows without
/// a sequence (internal nodes) render their residues as `wildcard`.
pub fn gapped_row(path: &AlignPath, row: RowIndex, seq: Option<&[u8]>, wildcard: u8) -> Vec<u8> {
    let bits = match path.get(&row) {
        Some(b) => b,
        None => return Vec::new(),
    };
    let mut pos = 0;
    bits.iter()
        .map(|&bit| {
            if !bit {
                GAP_CHAR
            } else {
                let c = match seq {
                    Some(s) => s.get(pos).copied().unwrap_or(wildcard),
                    None => wildcard,
                };
                pos += 1;
                c
            }
        })
        .collect()
}
