//! Anti-diagonal envelope restricting the pair DP to promising cells.
//!
//! The Forward/Backward matrices only materialise cells whose reference-row
//! coordinates `(i, j)` fall on a retained anti-diagonal `d = i − j`.
//! Diagonals are seeded from shared k-mers between the two reference
//! sequences, widened into bands, and admitted from the highest match count
//! downward until either a fixed count threshold or a memory budget is hit.
//! A one-diagonal storage halo around every retained diagonal lets the DP
//! recurrence read its neighbour cells with plain indexing.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ancestra_core::{AncestraError, Result};

/// Require at least this ratio of sequence length over (k + threshold)
/// before a sparse envelope is attempted.
const MIN_KMERS_FOR_SPARSE_ENVELOPE: usize = 2;

/// Fallback memory budget when the physical size cannot be determined.
const DEFAULT_MAX_SIZE: usize = 1 << 30;

/// Default seed k-mer length.
pub const DEFAULT_KMER_LENGTH: usize = 6;
/// Default k-mer count threshold for seeding a diagonal.
pub const DEFAULT_KMER_THRESHOLD: i32 = 14;
/// Default band width around a seeded diagonal.
pub const DEFAULT_BAND_SIZE: usize = 64;

/// Envelope construction parameters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagEnvParams {
    /// Use k-mer seeding; `false` always materialises the full DP.
    pub sparse: bool,
    /// Seed k-mer length, in `[5, 32]`.
    pub kmer_len: usize,
    /// Minimum k-mer matches to seed a diagonal; −1 picks the threshold
    /// automatically from the memory budget.
    pub kmer_threshold: i32,
    /// Memory budget in bytes; 0 autodetects physical memory.
    pub max_size: usize,
    /// Width of the band opened around each seeded diagonal (even, ≥ 2).
    pub band_size: usize,
}

impl Default for DiagEnvParams {
    fn default() -> Self {
        Self {
            sparse: true,
            kmer_len: DEFAULT_KMER_LENGTH,
            kmer_threshold: DEFAULT_KMER_THRESHOLD,
            max_size: 0,
            band_size: DEFAULT_BAND_SIZE,
        }
    }
}

impl DiagEnvParams {
    /// Validate parameter ranges.
    pub fn validate(&self) -> Result<()> {
        if !(5..=32).contains(&self.kmer_len) {
            return Err(AncestraError::InvalidInput(format!(
                "kmer_len out of range ({}). Try 5 to 32",
                self.kmer_len
            )));
        }
        if self.band_size < 2 || self.band_size % 2 != 0 {
            return Err(AncestraError::InvalidInput(format!(
                "band_size must be even and at least 2 (got {})",
                self.band_size
            )));
        }
        if self.kmer_threshold < -1 {
            return Err(AncestraError::InvalidInput(format!(
                "kmer_threshold must be -1 (memory-bound) or non-negative (got {})",
                self.kmer_threshold
            )));
        }
        Ok(())
    }

    /// The memory budget in bytes, autodetecting physical memory when
    /// `max_size` is 0.
    pub fn effective_max_size(&self) -> usize {
        if self.max_size > 0 {
            self.max_size
        } else {
            physical_memory_bytes().unwrap_or(DEFAULT_MAX_SIZE)
        }
    }
}

/// Total physical memory, when the platform exposes it.
fn physical_memory_bytes() -> Option<usize> {
    let info = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in info.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: usize = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

/// The set of retained anti-diagonals plus the flat-storage index tables.
///
/// Coordinates run `i ∈ [0, x_len]`, `j ∈ [0, y_len]`; diagonal `d = i − j`.
/// `diagonals` are the computed diagonals; `storage_diagonals` additionally
/// include the one-diagonal halo so neighbour reads stay in bounds.
#[derive(Debug, Clone)]
pub struct DiagonalEnvelope {
    pub x_len: usize,
    pub y_len: usize,
    /// Computed diagonals, ascending. Always contains 0.
    pub diagonals: Vec<i64>,
    /// Computed diagonals plus halo, ascending.
    pub storage_diagonals: Vec<i64>,
    /// For each diagonal offset `y_len + d`: its index in
    /// `storage_diagonals`, or −1 when not stored.
    storage_index: Vec<i32>,
    /// For each `j`: index in `storage_diagonals` of the first diagonal
    /// intersecting column `j` (−1 when none).
    storage_offset: Vec<i32>,
    /// For each `j`: number of stored diagonals intersecting column `j`.
    pub storage_size: Vec<usize>,
    /// Exclusive prefix sums of `storage_size`.
    pub cumul_storage_size: Vec<usize>,
    /// Total number of stored coordinate cells.
    pub total_storage_size: usize,
}

impl DiagonalEnvelope {
    /// The full envelope: every diagonal, no seeding heuristic.
    pub fn full(x_len: usize, y_len: usize) -> Self {
        let diagonals: Vec<i64> = (-(y_len as i64)..=x_len as i64).collect();
        Self::from_diagonals(x_len, y_len, diagonals)
    }

    /// Build an envelope for reference token sequences `x_tokens` and
    /// `y_tokens` (entries are `None` for wildcards, which never seed).
    ///
    /// `cell_bytes` is the DP storage cost per coordinate cell. Recoverable
    /// degradations push a note onto `warnings`; with `strict` set, failing
    /// to fit any seeding threshold into the memory budget is an error
    /// instead.
    pub fn build(
        x_tokens: &[Option<usize>],
        y_tokens: &[Option<usize>],
        alphabet_size: usize,
        params: &DiagEnvParams,
        cell_bytes: usize,
        strict: bool,
        warnings: &mut Vec<String>,
    ) -> Result<Self> {
        params.validate()?;
        let x_len = x_tokens.len();
        let y_len = y_tokens.len();
        let max_size = params.effective_max_size();

        if !params.sparse {
            return Ok(Self::full(x_len, y_len));
        }
        if params.kmer_threshold >= 0 {
            let min_len =
                MIN_KMERS_FOR_SPARSE_ENVELOPE * (params.kmer_len + params.kmer_threshold as usize);
            if x_len < min_len || y_len < min_len {
                return Ok(Self::full(x_len, y_len));
            }
        } else if x_len.saturating_mul(y_len).saturating_mul(cell_bytes) < max_size {
            // Memory-bound mode and the full DP already fits.
            return Ok(Self::full(x_len, y_len));
        }

        let k = params.kmer_len;
        let token_bits = usize::BITS - (alphabet_size.max(2) - 1).leading_zeros();
        if (k as u32) * token_bits > 64 {
            warnings.push(format!(
                "k-mer length {} over a {}-letter alphabet does not fit a packed word; \
                 using the full envelope",
                k, alphabet_size
            ));
            return Ok(Self::full(x_len, y_len));
        }

        // Index every packed k-mer of Y by position, then count shared
        // k-mers per diagonal of X against it.
        let y_index = kmer_index(y_tokens, k, token_bits);
        let mut diag_count: HashMap<i64, u32> = HashMap::new();
        if x_len >= k {
            for i in 0..=(x_len - k) {
                if let Some(kmer) = pack_kmer(&x_tokens[i..i + k], token_bits) {
                    if let Some(js) = y_index.get(&kmer) {
                        for &j in js {
                            *diag_count.entry(i as i64 - j as i64).or_insert(0) += 1;
                        }
                    }
                }
            }
        }

        // Bucket diagonals by count, highest first.
        let mut count_distrib: BTreeMap<u32, BTreeSet<i64>> = BTreeMap::new();
        for (d, c) in diag_count {
            count_distrib.entry(c).or_default().insert(d);
        }

        // Diagonal 0 is always retained so at least one path exists.
        let mut diags: BTreeSet<i64> = BTreeSet::from([0]);
        let mut storage_diags: BTreeSet<i64> = BTreeSet::from([0]);

        let half_band = (params.band_size / 2) as i64;
        let diag_size = x_len.min(y_len).saturating_mul(cell_bytes).max(1);
        let min_d = -(y_len as i64);
        let max_d = x_len as i64;

        let mut found_threshold = params.kmer_threshold >= 0;
        for (&count, seeds) in count_distrib.iter().rev() {
            if params.kmer_threshold >= 0 && (count as i64) < params.kmer_threshold as i64 {
                break;
            }
            let mut more_diags = diags.clone();
            let mut more_storage = storage_diags.clone();
            for &seed in seeds {
                let lo = (seed - half_band).max(min_d);
                let hi = (seed + half_band).min(max_d);
                more_diags.extend(lo..=hi);
                more_storage.extend((lo - 1).max(min_d)..=(hi + 1).min(max_d));
            }
            if params.kmer_threshold < 0 {
                if more_storage.len() * diag_size >= max_size {
                    break;
                }
                found_threshold = true;
            }
            diags = more_diags;
            storage_diags = more_storage;
        }

        if !found_threshold {
            let msg = format!(
                "no k-mer seeding threshold fits the {}-byte memory budget; \
                 proceeding with the minimal envelope",
                max_size
            );
            if strict {
                return Err(AncestraError::InvalidInput(msg));
            }
            warnings.push(msg);
        }

        Ok(Self::from_diagonals(x_len, y_len, diags.into_iter().collect()))
    }

    /// Finalize the storage tables for a set of computed diagonals.
    fn from_diagonals(x_len: usize, y_len: usize, diagonals: Vec<i64>) -> Self {
        let min_d = -(y_len as i64);
        let max_d = x_len as i64;
        let mut storage: BTreeSet<i64> = BTreeSet::new();
        for &d in &diagonals {
            for h in [d - 1, d, d + 1] {
                if (min_d..=max_d).contains(&h) {
                    storage.insert(h);
                }
            }
        }
        let storage_diagonals: Vec<i64> = storage.into_iter().collect();

        let mut storage_index = vec![-1i32; x_len + y_len + 1];
        for (n, &d) in storage_diagonals.iter().enumerate() {
            storage_index[(y_len as i64 + d) as usize] = n as i32;
        }

        let mut storage_offset = vec![-1i32; y_len + 1];
        let mut storage_size = vec![0usize; y_len + 1];
        let mut cumul_storage_size = vec![0usize; y_len + 1];
        let mut total_storage_size = 0usize;
        for j in 0..=y_len {
            // Diagonals intersecting column j form a contiguous run of the
            // sorted list: d ∈ [−j, x_len − j].
            let lo = storage_diagonals.partition_point(|&d| d < -(j as i64));
            let hi = storage_diagonals.partition_point(|&d| d <= (x_len - j) as i64);
            storage_size[j] = hi - lo;
            cumul_storage_size[j] = total_storage_size;
            total_storage_size += storage_size[j];
            if lo < hi {
                storage_offset[j] = lo as i32;
            }
        }

        Self {
            x_len,
            y_len,
            diagonals,
            storage_diagonals,
            storage_index,
            storage_offset,
            storage_size,
            cumul_storage_size,
            total_storage_size,
        }
    }

    /// Smallest representable diagonal.
    pub fn min_diagonal(&self) -> i64 {
        -(self.y_len as i64)
    }

    /// Largest representable diagonal.
    pub fn max_diagonal(&self) -> i64 {
        self.x_len as i64
    }

    /// Whether diagonal `d` crosses column `j`.
    #[inline]
    pub fn intersects(&self, j: usize, d: i64) -> bool {
        let i = j as i64 + d;
        (0..=self.x_len as i64).contains(&i)
    }

    /// Whether `(i, j)` lies on a computed diagonal.
    pub fn contains(&self, i: usize, j: usize) -> bool {
        i <= self.x_len
            && j <= self.y_len
            && self.diagonals.binary_search(&(i as i64 - j as i64)).is_ok()
    }

    /// Whether `(i, j)` has a storage slot (computed or halo).
    #[inline]
    pub fn in_storage(&self, i: usize, j: usize) -> bool {
        if i > self.x_len || j > self.y_len {
            return false;
        }
        let offset = self.y_len as i64 + i as i64 - j as i64;
        self.storage_index[offset as usize] >= 0
    }

    /// Flat index of stored cell `(i, j)` in a dense array of
    /// `total_storage_size` cells. The cell must be in storage.
    #[inline]
    pub fn cell_index(&self, i: usize, j: usize) -> usize {
        debug_assert!(self.in_storage(i, j));
        let offset = self.y_len as i64 + i as i64 - j as i64;
        let n = self.storage_index[offset as usize];
        self.cumul_storage_size[j] + (n - self.storage_offset[j]) as usize
    }

    /// The admitted `i` coordinates for column `j`, ascending.
    pub fn forward_i(&self, j: usize) -> Vec<usize> {
        let mut i_vec = Vec::with_capacity(self.diagonals.len());
        for &d in &self.diagonals {
            if self.intersects(j, d) {
                i_vec.push((j as i64 + d) as usize);
            }
        }
        i_vec
    }

    /// The admitted `i` coordinates for column `j`, descending.
    pub fn reverse_i(&self, j: usize) -> Vec<usize> {
        let mut i_vec = self.forward_i(j);
        i_vec.reverse();
        i_vec
    }
}

/// Pack a k-mer window into a word, or `None` if it contains a wildcard.
#[inline]
fn pack_kmer(window: &[Option<usize>], token_bits: u32) -> Option<u64> {
    let mut kmer = 0u64;
    for tok in window {
        kmer = (kmer << token_bits) | (*tok)? as u64;
    }
    Some(kmer)
}

/// Map every packed k-mer of `tokens` to its occurrence positions.
fn kmer_index(tokens: &[Option<usize>], k: usize, token_bits: u32) -> HashMap<u64, Vec<usize>> {
    let mut index: HashMap<u64, Vec<usize>> = HashMap::new();
    if tokens.len() < k {
        return index;
    }
    for j in 0..=(tokens.len() - k) {
        if let Some(kmer) = pack_kmer(&tokens[j..j + k], token_bits) {
            index.entry(kmer).or_default().push(j);
        }
    }
    index
}
