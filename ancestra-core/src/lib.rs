//! Shared foundations for the Ancestra ancestral reconstruction toolkit.
//!
//! Provides the unified error type, log-space probability arithmetic, and a
//! small deterministic pseudo-random generator used by sampling routines.

pub mod error;
pub mod logprob;
pub mod rng;

pub use error::{AncestraError, Result};
pub use logprob::{
    log_accum_exp, log_inner_product, log_sum_exp, log_sum_exp_slice, ln_vec, LOG_ZERO,
};
pub use rng::Xorshift64;
