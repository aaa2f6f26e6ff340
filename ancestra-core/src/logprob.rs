//! Log-space probability arithmetic for numerically stable computation.
//!
//! All probabilities in the reconstruction engine are natural logarithms:
//! 0.0 is certainty, [`LOG_ZERO`] (negative infinity) is impossibility.
//! Sums of probabilities are computed with the log-sum-exp trick so that
//! chains of very small probabilities never underflow.

/// `ln(0)`: the log-probability of an impossible event.
pub const LOG_ZERO: f64 = f64::NEG_INFINITY;

/// Numerically stable `ln(exp(a) + exp(b))`.
///
/// Either argument may be [`LOG_ZERO`]; the other is returned unchanged.
#[inline]
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == LOG_ZERO {
        return b;
    }
    if b == LOG_ZERO {
        return a;
    }
    let (max, min) = if a >= b { (a, b) } else { (b, a) };
    max + (min - max).exp().ln_1p()
}

/// In-place accumulator form: `*acc = log_sum_exp(*acc, x)`.
#[inline]
pub fn log_accum_exp(acc: &mut f64, x: f64) {
    *acc = log_sum_exp(*acc, x);
}

/// Stable `ln(Σ_i exp(xs[i]))` over a slice.
///
/// Returns [`LOG_ZERO`] for an empty slice or a slice of all-impossible
/// entries.
pub fn log_sum_exp_slice(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(LOG_ZERO, f64::max);
    if max == LOG_ZERO {
        return LOG_ZERO;
    }
    let sum: f64 = xs.iter().map(|&x| (x - max).exp()).sum();
    max + sum.ln()
}

/// Log-space inner product: `ln(Σ_i exp(a[i]) · exp(b[i]))`.
///
/// The slices must have equal length.
pub fn log_inner_product(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    let mut lp = LOG_ZERO;
    for (&x, &y) in a.iter().zip(b.iter()) {
        log_accum_exp(&mut lp, x + y);
    }
    lp
}

/// Element-wise natural log of a probability vector. Zeros map to
/// [`LOG_ZERO`].
pub fn ln_vec(probs: &[f64]) -> Vec<f64> {
    probs
        .iter()
        .map(|&p| if p > 0.0 { p.ln() } else { LOG_ZERO })
        .collect()
}
