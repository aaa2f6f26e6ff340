//! Guide-alignment envelope: banding the DP around a reference alignment.
//!
//! Given a guide alignment and the two reference rows being aligned, a cell
//! `(i, j)` is admitted iff the guide column holding residue `i` of the first
//! row and the column holding residue `j` of the second row lie within
//! `max_distance` columns of each other. A negative distance disables the
//! constraint. When both this and the diagonal envelope apply, their
//! intersection gates the DP.

use ancestra_core::{AncestraError, Result};

use crate::alignpath::{column_count, AlignPath, RowIndex};

/// Band constraint derived from a guide alignment.
#[derive(Debug, Clone)]
pub struct GuideAlignmentEnvelope {
    max_distance: i64,
    /// Guide column of residue ordinal i of row x (entry 0 is column 0).
    col_of_x: Vec<usize>,
    /// Same for row y.
    col_of_y: Vec<usize>,
}

impl GuideAlignmentEnvelope {
    /// Build the band for rows `row_x` and `row_y` of `guide`.
    ///
    /// # Errors
    ///
    /// Returns an error if either row is missing from the guide.
    pub fn new(
        guide: &AlignPath,
        row_x: RowIndex,
        row_y: RowIndex,
        max_distance: i64,
    ) -> Result<Self> {
        let col_of_x = residue_columns(guide, row_x)?;
        let col_of_y = residue_columns(guide, row_y)?;
        Ok(Self {
            max_distance,
            col_of_x,
            col_of_y,
        })
    }

    /// Whether `(i, j)` lies within the band. Always true when disabled.
    #[inline]
    pub fn in_band(&self, i: usize, j: usize) -> bool {
        if self.max_distance < 0 {
            return true;
        }
        let ci = self.col_of_x[i] as i64;
        let cj = self.col_of_y[j] as i64;
        (ci - cj).abs() <= self.max_distance
    }
}

/// For each residue ordinal of `row` (0..=count), the guide column holding
/// it; ordinal 0 maps to column 0.
fn residue_columns(guide: &AlignPath, row: RowIndex) -> Result<Vec<usize>> {
    let bits = guide.get(&row).ok_or_else(|| {
        AncestraError::InvalidInput(format!("row {} is missing from the guide alignment", row))
    })?;
    let mut cols = Vec::with_capacity(bits.len() + 1);
    cols.push(0);
    for (col, &bit) in bits.iter().enumerate() {
        if bit {
            cols.push(col);
        }
    }
    Ok(cols)
}

/// Number of columns of a guide alignment (used by the band retry policy).
pub fn guide_columns(guide: &AlignPath) -> usize {
    column_count(guide)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignpath::AlignPath;

    /// Guide:
    /// ```text
    /// row 0: X X - X
    /// row 1: X - X X
    /// ```
    fn guide() -> AlignPath {
        let mut g = AlignPath::new();
        g.insert(0, vec![true, true, false, true]);
        g.insert(1, vec![true, false, true, true]);
        g
    }

    #[test]
    fn band_zero_admits_only_same_column_residues() {
        let env = GuideAlignmentEnvelope::new(&guide(), 0, 1, 0).unwrap();
        // Residue 1 of each row is in column 0 on both rows.
        assert!(env.in_band(1, 1));
        // Residue 2 of row 0 is column 1; residue 2 of row 1 is column 2.
        assert!(!env.in_band(2, 2));
        // Residue 3 of both rows share column 3.
        assert!(env.in_band(3, 3));
    }

    #[test]
    fn wider_band_admits_displaced_residues() {
        let env = GuideAlignmentEnvelope::new(&guide(), 0, 1, 1).unwrap();
        assert!(env.in_band(2, 2));
        assert!(env.in_band(0, 1));
    }

    #[test]
    fn negative_distance_disables_the_band() {
        let env = GuideAlignmentEnvelope::new(&guide(), 0, 1, -1).unwrap();
        for i in 0..=3 {
            for j in 0..=3 {
                assert!(env.in_band(i, j));
            }
        }
    }

    #[test]
    fn missing_row_is_an_error() {
        assert!(GuideAlignmentEnvelope::new(&guide(), 0, 9, 2).is_err());
    }

    #[test]
    fn guide_column_count() {
        assert_eq!(guide_columns(&guide()), 4);
    }
}
