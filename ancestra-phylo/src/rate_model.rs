//! Mixture substitution model with insertion/deletion rates.
//!
//! A [`RateModel`] holds an ordered alphabet, M mixture components (each a
//! K×K rate generator with its equilibrium distribution), component weights,
//! and the two indel rates with their geometric extension probabilities.
//! Transition probability matrices `P(t) = exp(Qt)` are computed per
//! component by eigendecomposition of the equilibrium-symmetrized generator,
//! which requires each component to be reversible with respect to its
//! equilibrium (true for any generator built from exchangeabilities).

use ancestra_core::{AncestraError, Result};

/// Character standing for an unknown residue. Matches every token with
/// probability one.
pub const WILDCARD_CHAR: u8 = b'*';

/// One mixture component: a K×K rate generator and its equilibrium.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MixtureComponent {
    /// Instantaneous rate matrix Q (rows sum to zero).
    pub rates: Vec<Vec<f64>>,
    /// Equilibrium frequencies, one per alphabet token.
    pub equilibrium: Vec<f64>,
}

/// Substitution mixture model plus geometric-length indel model.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateModel {
    alphabet: Vec<u8>,
    components: Vec<MixtureComponent>,
    weights: Vec<f64>,
    ins_rate: f64,
    del_rate: f64,
    ins_extend: f64,
    del_extend: f64,
}

impl RateModel {
    /// Build and validate a model.
    ///
    /// `mean_ins_len` / `mean_del_len` are the expected indel lengths; the
    /// geometric extension probabilities are `1 − 1/len`.
    ///
    /// # Errors
    ///
    /// Returns an error for empty alphabets, dimension mismatches, weights
    /// not summing to one, equilibria not summing to one, non-positive
    /// rates/lengths, or `ins_rate >= del_rate` (the equilibrium sequence
    /// length `λ/μ / (1 − λ/μ)` must be finite).
    pub fn new(
        alphabet: &[u8],
        components: Vec<MixtureComponent>,
        weights: Vec<f64>,
        ins_rate: f64,
        del_rate: f64,
        mean_ins_len: f64,
        mean_del_len: f64,
    ) -> Result<Self> {
        let k = alphabet.len();
        if k == 0 {
            return Err(AncestraError::InvalidInput("empty alphabet".into()));
        }
        if components.is_empty() {
            return Err(AncestraError::InvalidInput(
                "model needs at least one mixture component".into(),
            ));
        }
        if components.len() != weights.len() {
            return Err(AncestraError::InvalidInput(format!(
                "{} components but {} weights",
                components.len(),
                weights.len()
            )));
        }
        let wsum: f64 = weights.iter().sum();
        if (wsum - 1.0).abs() > 1e-6 || weights.iter().any(|&w| w < 0.0) {
            return Err(AncestraError::InvalidInput(format!(
                "component weights must be non-negative and sum to 1 (got {})",
                wsum
            )));
        }
        for (i, cpt) in components.iter().enumerate() {
            if cpt.rates.len() != k || cpt.rates.iter().any(|row| row.len() != k) {
                return Err(AncestraError::InvalidInput(format!(
                    "component {} rate matrix is not {}x{}",
                    i, k, k
                )));
            }
            if cpt.equilibrium.len() != k {
                return Err(AncestraError::InvalidInput(format!(
                    "component {} equilibrium has wrong length",
                    i
                )));
            }
            let esum: f64 = cpt.equilibrium.iter().sum();
            if (esum - 1.0).abs() > 1e-6 || cpt.equilibrium.iter().any(|&p| p <= 0.0) {
                return Err(AncestraError::InvalidInput(format!(
                    "component {} equilibrium must be positive and sum to 1",
                    i
                )));
            }
        }
        if !(ins_rate > 0.0) || !(del_rate > 0.0) {
            return Err(AncestraError::InvalidInput(
                "indel rates must be positive".into(),
            ));
        }
        if ins_rate >= del_rate {
            return Err(AncestraError::InvalidInput(format!(
                "insertion rate ({}) must be below deletion rate ({})",
                ins_rate, del_rate
            )));
        }
        if !(mean_ins_len >= 1.0) || !(mean_del_len >= 1.0) {
            return Err(AncestraError::InvalidInput(
                "expected indel lengths must be at least 1".into(),
            ));
        }
        Ok(Self {
            alphabet: alphabet.to_vec(),
            components,
            weights,
            ins_rate,
            del_rate,
            ins_extend: 1.0 - 1.0 / mean_ins_len,
            del_extend: 1.0 - 1.0 / mean_del_len,
        })
    }

    /// A single-component uniform reversible DNA model with mild indel rates.
    pub fn dna_default() -> Self {
        let exch = vec![vec![1.0; 4]; 4];
        let freqs = [0.25; 4];
        let rates = build_rate_matrix(&exch, &freqs);
        Self::new(
            b"ACGT",
            vec![MixtureComponent {
                rates,
                equilibrium: freqs.to_vec(),
            }],
            vec![1.0],
            0.01,
            0.02,
            1.5,
            1.5,
        )
        .expect("default DNA model is valid")
    }

    /// Alphabet size K.
    pub fn n_tokens(&self) -> usize {
        self.alphabet.len()
    }

    /// Number of mixture components M.
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    /// The ordered alphabet.
    pub fn alphabet(&self) -> &[u8] {
        &self.alphabet
    }

    /// Component weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Natural logs of the component weights.
    pub fn log_weights(&self) -> Vec<f64> {
        ancestra_core::ln_vec(&self.weights)
    }

    /// Per-component equilibrium distributions, in log space. This doubles
    /// as the root residue distribution and the insertion distribution.
    pub fn log_root_distribution(&self) -> Vec<Vec<f64>> {
        self.components
            .iter()
            .map(|c| ancestra_core::ln_vec(&c.equilibrium))
            .collect()
    }

    /// Insertion rate λ.
    pub fn ins_rate(&self) -> f64 {
        self.ins_rate
    }

    /// Deletion rate μ.
    pub fn del_rate(&self) -> f64 {
        self.del_rate
    }

    /// Geometric insertion-extension probability.
    pub fn ins_extend(&self) -> f64 {
        self.ins_extend
    }

    /// Geometric deletion-extension probability.
    pub fn del_extend(&self) -> f64 {
        self.del_extend
    }

    /// Continuation probability of the geometric ancestral-sequence length
    /// distribution: λ/μ.
    pub fn root_extend(&self) -> f64 {
        self.ins_rate / self.del_rate
    }

    /// Transition probability matrices `exp(Q·t)`, one per component.
    pub fn branch_matrix(&self, t: f64) -> Vec<Vec<Vec<f64>>> {
        self.components
            .iter()
            .map(|c| transition_probs_eigen(&c.rates, &c.equilibrium, t))
            .collect()
    }

    /// Token index of an alphabet character (case-insensitive), or `None`
    /// for the wildcard.
    ///
    /// # Errors
    ///
    /// Returns an error for characters outside the alphabet.
    pub fn tokenize_char(&self, c: u8) -> Result<Option<usize>> {
        if c == WILDCARD_CHAR {
            return Ok(None);
        }
        let upper = c.to_ascii_uppercase();
        match self.alphabet.iter().position(|&a| a.to_ascii_uppercase() == upper) {
            Some(tok) => Ok(Some(tok)),
            None => Err(AncestraError::InvalidInput(format!(
                "character '{}' is not in the model alphabet",
                c as char
            ))),
        }
    }

    /// Tokenize a whole sequence; `None` entries are wildcards.
    pub fn tokenize(&self, seq: &[u8]) -> Result<Vec<Option<usize>>> {
        seq.iter().map(|&c| self.tokenize_char(c)).collect()
    }
}

/// Build a normalized rate matrix Q from exchangeabilities S and frequencies.
///
/// `Q[i][j] = S[i][j] · π[j]` for i ≠ j, rows sum to zero, scaled so the
/// expected substitution rate `−Σ π_i Q_ii` is 1.
pub fn build_rate_matrix(exchangeabilities: &[Vec<f64>], freqs: &[f64]) -> Vec<Vec<f64>> {
    let n = freqs.len();
    let mut q = vec![vec![0.0; n]; n];

    for i in 0..n {
        for j in 0..n {
            if i != j {
                q[i][j] = exchangeabilities[i][j] * freqs[j];
            }
        }
        let off_diag: f64 = (0..n).filter(|&j| j != i).map(|j| q[i][j]).sum();
        q[i][i] = -off_diag;
    }

    let mu: f64 = (0..n).map(|i| -freqs[i] * q[i][i]).sum();
    if mu > 0.0 {
        for row in q.iter_mut() {
            for x in row.iter_mut() {
                *x /= mu;
            }
        }
    }

    q
}

/// Jacobi eigendecomposition for an N×N real symmetric matrix.
///
/// Returns (eigenvalues, eigenvectors) where `eigenvectors[i][k]` is the
/// i-th component of the k-th eigenvector.
fn jacobi_eigen(matrix: &[Vec<f64>]) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = matrix.len();
    let mut a: Vec<Vec<f64>> = matrix.to_vec();

    let mut v: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let mut row = vec![0.0; n];
            row[i] = 1.0;
            row
        })
        .collect();

    for _ in 0..200 {
        // Find largest off-diagonal element.
        let mut max_val = 0.0f64;
        let mut p = 0;
        let mut q = 1;
        for i in 0..n {
            for j in (i + 1)..n {
                if a[i][j].abs() > max_val {
                    max_val = a[i][j].abs();
                    p = i;
                    q = j;
                }
            }
        }
        if max_val < 1e-15 {
            break;
        }

        let theta = if (a[p][p] - a[q][q]).abs() < 1e-30 {
            std::f64::consts::FRAC_PI_4
        } else {
            0.5 * (2.0 * a[p][q] / (a[p][p] - a[q][q])).atan()
        };
        let c = theta.cos();
        let s = theta.sin();

        // Givens rotation on rows/columns p and q.
        let mut new_a = a.clone();
        for i in 0..n {
            new_a[i][p] = c * a[i][p] + s * a[i][q];
            new_a[i][q] = -s * a[i][p] + c * a[i][q];
        }
        let tmp = new_a.clone();
        for j in 0..n {
            new_a[p][j] = c * tmp[p][j] + s * tmp[q][j];
            new_a[q][j] = -s * tmp[p][j] + c * tmp[q][j];
        }
        new_a[p][q] = 0.0;
        new_a[q][p] = 0.0;
        a = new_a;

        let mut new_v = v.clone();
        for i in 0..n {
            new_v[i][p] = c * v[i][p] + s * v[i][q];
            new_v[i][q] = -s * v[i][p] + c * v[i][q];
        }
        v = new_v;
    }

    let eigenvalues: Vec<f64> = (0..n).map(|i| a[i][i]).collect();
    (eigenvalues, v)
}

/// Compute `P(t) = exp(Qt)` for a reversible rate matrix Q.
///
/// Symmetrizes `B = diag(√π) · Q · diag(1/√π)`, decomposes B, then
/// reconstructs `P(t) = diag(1/√π) · U · exp(Λt) · Uᵀ · diag(√π)`.
/// Tiny negative entries from floating rounding are clamped to zero.
pub fn transition_probs_eigen(q: &[Vec<f64>], freqs: &[f64], t: f64) -> Vec<Vec<f64>> {
    let n = q.len();

    let sqrt_pi: Vec<f64> = freqs.iter().map(|&f| f.sqrt()).collect();
    let inv_sqrt_pi: Vec<f64> = sqrt_pi.iter().map(|&sp| 1.0 / sp).collect();

    let mut b = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            b[i][j] = sqrt_pi[i] * q[i][j] * inv_sqrt_pi[j];
        }
    }

    let (eigenvalues, eigenvectors) = jacobi_eigen(&b);

    let mut p = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0;
            for k in 0..n {
                sum += eigenvectors[i][k] * (eigenvalues[k] * t).exp() * eigenvectors[j][k];
            }
            p[i][j] = inv_sqrt_pi[i] * sum * sqrt_pi[j];
            if p[i][j] < 0.0 {
                p[i][j] = 0.0;
            }
        }
    }
    p
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn transition_rows_are_stochastic(t in 0.0f64..10.0) {
            let model = RateModel::dna_default();
            let p = model.branch_matrix(t);
            for row in &p[0] {
                let sum: f64 = row.iter().sum();
                prop_assert!((sum - 1.0).abs() < 1e-6);
                for &x in row {
                    prop_assert!((0.0..=1.0 + 1e-9).contains(&x));
                }
            }
        }

        #[test]
        fn chapman_kolmogorov(t in 0.01f64..2.0) {
            // P(2t) = P(t)·P(t) for a time-homogeneous chain.
            let model = RateModel::dna_default();
            let p1 = &model.branch_matrix(t)[0];
            let p2 = &model.branch_matrix(2.0 * t)[0];
            for i in 0..4 {
                for j in 0..4 {
                    let composed: f64 = (0..4).map(|k| p1[i][k] * p1[k][j]).sum();
                    prop_assert!((composed - p2[i][j]).abs() < 1e-6);
                }
            }
        }
    }
}
