//! Laplace-distributed cover counts.
//!
//! Each mix draws the number of cover onions to inject per round from a
//! Laplace distribution with configured location `mu` and scale `b`; the
//! pair determines the (epsilon, delta) differential-privacy guarantee of
//! the shuffle. Draws are clamped to nonnegative integers; zero is a valid
//! draw.
//!
//! A Laplace(mu, b) variate is the difference of two independent
//! exponentials with rate `1/b`, shifted by `mu`.

use rand::Rng;
use rand_distr::{Distribution, Exp};

/// Laplace distribution over nonnegative integer cover counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Laplace {
    /// Location parameter; the mean cover count.
    pub mu: f64,
    /// Scale parameter; `b = 0` makes the draw deterministic at `mu`.
    pub b: f64,
}

impl Laplace {
    /// Draw a cover count. Negative samples clamp to 0.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        let x = if self.b > 0.0 {
            let exp = Exp::new(1.0 / self.b)
                .unwrap_or_else(|_| unreachable!("rate is positive and finite when b > 0"));
            self.mu + exp.sample(rng) - exp.sample(rng)
        } else {
            self.mu
        };

        if x <= 0.0 {
            0
        } else {
            x.round() as usize
        }
    }
}
