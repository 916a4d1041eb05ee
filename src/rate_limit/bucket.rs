//! Continuous-time bucket state shared by both admission algorithms.

// self
use crate::{_prelude::*, rate_limit::RateLimitStrategy};

const EPSILON: f64 = 1e-9;

#[derive(Debug)]
pub(crate) struct Bucket {
	strategy: RateLimitStrategy,
	rate: f64,
	burst: f64,
	// Token bucket: tokens on hand. Leaky bucket: current water level.
	amount: f64,
	last: Instant,
}
impl Bucket {
	pub(crate) fn new(strategy: RateLimitStrategy, rate: f64, burst: u32, now: Instant) -> Self {
		let burst = f64::from(burst);
		let amount = match strategy {
			RateLimitStrategy::TokenBucket => burst,
			RateLimitStrategy::LeakyBucket => 0.,
		};

		Self { strategy, rate, burst, amount, last: now }
	}

	pub(crate) fn capacity(&self) -> u32 {
		self.burst as u32
	}

	/// Consumes one unit, or returns how long until one is available.
	pub(crate) fn try_take(&mut self, now: Instant) -> Result<(), StdDuration> {
		self.advance(now);

		let available = self.available();

		if available + EPSILON >= 1. {
			match self.strategy {
				RateLimitStrategy::TokenBucket => self.amount = (self.amount - 1.).max(0.),
				RateLimitStrategy::LeakyBucket => self.amount = (self.amount + 1.).min(self.burst),
			}

			Ok(())
		} else {
			Err(self.wait_for(available))
		}
	}

	/// Returns an unused unit.
	pub(crate) fn refund(&mut self) {
		match self.strategy {
			RateLimitStrategy::TokenBucket => self.amount = (self.amount + 1.).min(self.burst),
			RateLimitStrategy::LeakyBucket => self.amount = (self.amount - 1.).max(0.),
		}
	}

	/// Whole units available and the wait until at least one is.
	pub(crate) fn snapshot(&mut self, now: Instant) -> (u32, StdDuration) {
		self.advance(now);

		let available = self.available();
		let wait =
			if available + EPSILON >= 1. { StdDuration::ZERO } else { self.wait_for(available) };

		((available + EPSILON).floor() as u32, wait)
	}

	fn available(&self) -> f64 {
		match self.strategy {
			RateLimitStrategy::TokenBucket => self.amount,
			RateLimitStrategy::LeakyBucket => self.burst - self.amount,
		}
	}

	fn wait_for(&self, available: f64) -> StdDuration {
		StdDuration::try_from_secs_f64(((1. - available) / self.rate).max(0.))
			.unwrap_or(StdDuration::MAX)
	}

	fn advance(&mut self, now: Instant) {
		let elapsed = now.saturating_duration_since(self.last).as_secs_f64();

		if elapsed <= 0. {
			return;
		}

		let delta = elapsed * self.rate;

		match self.strategy {
			RateLimitStrategy::TokenBucket => self.amount = (self.amount + delta).min(self.burst),
			RateLimitStrategy::LeakyBucket => self.amount = (self.amount - delta).max(0.),
		}

		self.last = now;
	}
}
