//! Deterministic pseudo-random generation for sampling routines.
//!
//! Sampling (stochastic tracebacks, sampled profiles) must be reproducible
//! bit-for-bit given an external seed, so the generator is a plain xorshift64
//! passed by mutable reference; no global state.

/// Simple xorshift64 PRNG.
#[derive(Debug, Clone)]
pub struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    /// Create a generator from a seed. Seed 0 is mapped to 1 (the all-zero
    /// state is a fixed point of xorshift).
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next raw 64-bit value.
    pub fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Uniform in `[0, 1)` with 53 bits of precision.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}
