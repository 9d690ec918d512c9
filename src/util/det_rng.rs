//! Deterministic pseudo-random number generator.
//!
//! A tiny xorshift64 PRNG with no external dependencies. Given the same
//! seed, the generated sequence is identical on every platform, which is
//! what the randomized stress tests need to stay reproducible. It is NOT
//! cryptographically secure.

/// Deterministic xorshift64 PRNG.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// Creates a PRNG from `seed`. A zero seed is replaced with 1, since
    /// xorshift has a fixed point at zero.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Next pseudo-random `u64`.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Next pseudo-random `usize` in `[0, bound)`, using rejection
    /// sampling to avoid modulo bias.
    ///
    /// # Panics
    /// Panics if `bound` is zero.
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    pub fn next_usize(&mut self, bound: usize) -> usize {
        assert!(bound > 0, "bound must be non-zero");
        let bound_u64 = bound as u64;
        let zone = u64::MAX - (u64::MAX % bound_u64);
        loop {
            let value = self.next_u64();
            if value < zone {
                return (value % bound_u64) as usize;
            }
        }
    }

    /// True once in `n` draws on average.
    ///
    /// # Panics
    /// Panics if `n` is zero.
    #[inline]
    pub fn one_in(&mut self, n: usize) -> bool {
        self.next_usize(n) == 0
    }
}
