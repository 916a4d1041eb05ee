//! Per-rule admission control.
//!
//! Each request is matched to the most specific [`RateLimitRule`] (falling back to the
//! default rule) and consumes one unit from that rule's bucket. Denial is a value, not an
//! error: callers decide whether to surface it as [`Error::RateLimitExceeded`].

pub mod bucket;
pub mod rule;

pub use rule::{MIN_RATE, RateLimitRule, RateLimitStrategy};

// self
use crate::{
	_prelude::*,
	descriptor::RequestDescriptor,
	error::ConfigError,
	rate_limit::{bucket::Bucket, rule::CompiledRule},
};

/// Outcome of [`RateLimiter::admit`].
#[derive(Debug)]
pub enum Admission {
	/// The request may proceed; the permit refunds its unit unless committed.
	Allowed(AdmissionPermit),
	/// The bucket is empty.
	Denied {
		/// Pattern of the rule that denied the request.
		rule: String,
		/// Time until one more request can be admitted.
		retry_after: StdDuration,
	},
}
impl Admission {
	/// Returns `true` for [`Admission::Allowed`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allowed(_))
	}

	/// Converts a denial into [`Error::RateLimitExceeded`].
	pub fn into_result(self) -> Result<AdmissionPermit> {
		match self {
			Self::Allowed(permit) => Ok(permit),
			Self::Denied { rule, retry_after } =>
				Err(Error::RateLimitExceeded { rule, retry_after }),
		}
	}
}

/// Unit consumed from a bucket.
///
/// Dropping an uncommitted permit gives the unit back, so a request cancelled before it
/// reaches the network does not count against the limit.
#[must_use = "dropping the permit refunds the admitted request"]
pub struct AdmissionPermit {
	rule: Option<String>,
	bucket: Option<Arc<Mutex<Bucket>>>,
}
impl AdmissionPermit {
	fn unlimited() -> Self {
		Self { rule: None, bucket: None }
	}

	/// Pattern of the rule that admitted the request; `None` when no rule applies.
	pub fn rule(&self) -> Option<&str> {
		self.rule.as_deref()
	}

	/// Keeps the unit consumed.
	pub fn commit(mut self) {
		self.bucket = None;
	}
}
impl Debug for AdmissionPermit {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AdmissionPermit")
			.field("rule", &self.rule)
			.field("pending", &self.bucket.is_some())
			.finish()
	}
}
impl Drop for AdmissionPermit {
	fn drop(&mut self) {
		if let Some(bucket) = self.bucket.take() {
			bucket.lock().refund();

			tracing::debug!(
				rule = self.rule.as_deref().unwrap_or_default(),
				"refunded rate-limit permit"
			);
		}
	}
}

/// Snapshot returned by [`RateLimiter::status`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketStatus {
	/// Whole units available right now.
	pub remaining: u32,
	/// Bucket capacity.
	pub capacity: u32,
	/// Instant at which at least one unit is available.
	pub next_available_at: Instant,
}

#[derive(Debug)]
struct RuleSlot {
	rule: CompiledRule,
	bucket: Arc<Mutex<Bucket>>,
}
impl RuleSlot {
	fn new(rule: RateLimitRule, now: Instant) -> Result<Self, ConfigError> {
		let rule = CompiledRule::compile(rule)?;
		let bucket = Bucket::new(rule.rule.strategy, rule.rule.rate, rule.rule.burst, now);

		Ok(Self { rule, bucket: Arc::new(Mutex::new(bucket)) })
	}
}

/// Admission controller owning one bucket per rule.
#[derive(Debug, Default)]
pub struct RateLimiter {
	rules: Vec<RuleSlot>,
	default: Option<RuleSlot>,
}
impl RateLimiter {
	/// Builds a limiter from an optional catch-all rule plus per-endpoint overrides.
	pub fn new(
		default: Option<RateLimitRule>,
		rules: impl IntoIterator<Item = RateLimitRule>,
	) -> Result<Self, ConfigError> {
		let now = Instant::now();
		let default = default.map(|rule| RuleSlot::new(rule, now)).transpose()?;
		let rules =
			rules.into_iter().map(|rule| RuleSlot::new(rule, now)).collect::<Result<_, _>>()?;

		Ok(Self { rules, default })
	}

	/// Limiter that admits everything.
	pub fn unlimited() -> Self {
		Self::default()
	}

	/// Returns `true` when no rule is configured.
	pub fn is_unlimited(&self) -> bool {
		self.rules.is_empty() && self.default.is_none()
	}

	/// Rule that governs `descriptor`.
	pub fn rule_for(&self, descriptor: &RequestDescriptor) -> Option<&RateLimitRule> {
		self.slot_for(descriptor).map(|slot| &slot.rule.rule)
	}

	/// Admits or denies `descriptor` against the monotonic clock.
	pub fn admit(&self, descriptor: &RequestDescriptor) -> Admission {
		self.admit_at(descriptor, Instant::now())
	}

	/// Admits or denies `descriptor` as of `now`.
	pub fn admit_at(&self, descriptor: &RequestDescriptor, now: Instant) -> Admission {
		let Some(slot) = self.slot_for(descriptor) else {
			return Admission::Allowed(AdmissionPermit::unlimited());
		};
		let rule = slot.rule.rule.endpoint_pattern.clone();
		let taken = slot.bucket.lock().try_take(now);

		match taken {
			Ok(()) => Admission::Allowed(AdmissionPermit {
				rule: Some(rule),
				bucket: Some(slot.bucket.clone()),
			}),
			Err(retry_after) => {
				tracing::debug!(
					rule = %rule,
					endpoint = %descriptor.endpoint_id,
					?retry_after,
					"rate limit denied request"
				);

				Admission::Denied { rule, retry_after }
			},
		}
	}

	/// Remaining units for the rule whose pattern is `rule` (`"default"` names the catch-all).
	pub fn status(&self, rule: &str) -> Option<BucketStatus> {
		self.status_at(rule, Instant::now())
	}

	/// Remaining units as of `now`.
	pub fn status_at(&self, rule: &str, now: Instant) -> Option<BucketStatus> {
		let slot = self
			.rules
			.iter()
			.chain(self.default.as_ref())
			.find(|slot| slot.rule.rule.endpoint_pattern == rule)?;
		let mut bucket = slot.bucket.lock();
		let (remaining, wait) = bucket.snapshot(now);

		Some(BucketStatus { remaining, capacity: bucket.capacity(), next_available_at: now + wait })
	}

	fn slot_for(&self, descriptor: &RequestDescriptor) -> Option<&RuleSlot> {
		let mut best: Option<(usize, &RuleSlot)> = None;

		for slot in &self.rules {
			if let Some(score) = slot.rule.specificity(descriptor) {
				if best.is_none_or(|(current, _)| score > current) {
					best = Some((score, slot));
				}
			}
		}

		best.map(|(_, slot)| slot).or(self.default.as_ref())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::request, descriptor::Method};

	fn limiter() -> RateLimiter {
		RateLimiter::new(
			Some(RateLimitRule::new("default", 1., 3)),
			[
				RateLimitRule::new("users.*", 10., 1),
				RateLimitRule::new("users.list", 1., 2)
					.with_strategy(RateLimitStrategy::LeakyBucket),
			],
		)
		.expect("Limiter should build.")
	}

	#[test]
	fn burst_then_deny_then_one_more_after_interval() {
		let limiter = limiter();
		let descriptor = request("pets.list", Method::Get, "https://api.example.com/pets");
		let start = Instant::now();

		for _ in 0..3 {
			match limiter.admit_at(&descriptor, start) {
				Admission::Allowed(permit) => permit.commit(),
				denied => panic!("Burst should be admitted, got {denied:?}."),
			}
		}

		let Admission::Denied { rule, retry_after } = limiter.admit_at(&descriptor, start) else {
			panic!("Fourth request should be denied.");
		};

		assert_eq!(rule, "default");
		assert!(retry_after > StdDuration::ZERO);

		let later = start + StdDuration::from_secs(1);

		limiter.admit_at(&descriptor, later).into_result().expect("One more should pass.").commit();

		assert!(!limiter.admit_at(&descriptor, later).is_allowed());
	}

	#[test]
	fn most_specific_rule_wins() {
		let limiter = limiter();
		let list = request("users.list", Method::Get, "https://api.example.com/users");
		let get = request("users.get", Method::Get, "https://api.example.com/users/1");

		let pattern = |descriptor: &RequestDescriptor| {
			limiter.rule_for(descriptor).map(|rule| rule.endpoint_pattern.clone())
		};

		assert_eq!(pattern(&list).as_deref(), Some("users.list"));
		assert_eq!(pattern(&get).as_deref(), Some("users.*"));
	}

	#[test]
	fn dropped_permit_refunds_its_unit() {
		let limiter = limiter();
		let descriptor = request("users.get", Method::Get, "https://api.example.com/users/1");
		let start = Instant::now();
		let permit =
			limiter.admit_at(&descriptor, start).into_result().expect("First should pass.");

		assert_eq!(permit.rule(), Some("users.*"));
		assert_eq!(limiter.status_at("users.*", start).map(|status| status.remaining), Some(0));

		drop(permit);

		assert_eq!(limiter.status_at("users.*", start).map(|status| status.remaining), Some(1));

		limiter
			.admit_at(&descriptor, start)
			.into_result()
			.expect("Refunded unit should pass.")
			.commit();

		let err = limiter
			.admit_at(&descriptor, start)
			.into_result()
			.expect_err("Bucket should be empty.");
		let wait = err.retry_after().expect("Denial should carry a retry hint.");

		assert!(wait > StdDuration::from_millis(99) && wait <= StdDuration::from_millis(101));
	}

	#[test]
	fn status_reports_next_availability() {
		let limiter = limiter();
		let descriptor = request("users.list", Method::Get, "https://api.example.com/users");
		let start = Instant::now();

		limiter.admit_at(&descriptor, start).into_result().expect("Should pass.").commit();
		limiter.admit_at(&descriptor, start).into_result().expect("Should pass.").commit();

		let status = limiter.status_at("users.list", start).expect("Rule should exist.");

		assert_eq!(status.remaining, 0);
		assert_eq!(status.capacity, 2);
		assert_eq!(status.next_available_at, start + StdDuration::from_secs(1));
		assert!(limiter.status("missing").is_none());
	}

	#[test]
	fn unlimited_admits_everything() {
		let limiter = RateLimiter::unlimited();
		let descriptor = request("pets.list", Method::Get, "https://api.example.com/pets");

		assert!(limiter.is_unlimited());

		for _ in 0..100 {
			assert!(limiter.admit(&descriptor).is_allowed());
		}
	}
}
