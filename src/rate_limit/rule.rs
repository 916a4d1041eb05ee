//! Rate-limit rules and glob specificity.

// crates.io
use glob::Pattern;
// self
use crate::{_prelude::*, descriptor::RequestDescriptor, error::ConfigError};

/// Slowest accepted rate: one request per ~11.6 days.
pub const MIN_RATE: f64 = 1e-6;

/// Bucket algorithm backing a rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
	/// Tokens refill continuously up to `burst`; a full bucket admits a burst at once.
	#[default]
	TokenBucket,
	/// Each admit adds to a level that drains at `rate`; admits are refused while the level
	/// would exceed `burst`.
	LeakyBucket,
}
impl RateLimitStrategy {
	/// Configuration label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::TokenBucket => "token_bucket",
			Self::LeakyBucket => "leaky_bucket",
		}
	}
}

/// Admission rule for endpoints matching `endpoint_pattern`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
	/// Glob matched against the endpoint id and the URL path.
	pub endpoint_pattern: String,
	/// Sustained requests per second.
	#[serde(alias = "requests_per_second")]
	pub rate: f64,
	/// Bucket capacity.
	#[serde(alias = "burst_size")]
	pub burst: u32,
	/// Bucket algorithm.
	#[serde(default)]
	pub strategy: RateLimitStrategy,
}
impl RateLimitRule {
	/// Creates a token-bucket rule.
	pub fn new(endpoint_pattern: impl Into<String>, rate: f64, burst: u32) -> Self {
		Self {
			endpoint_pattern: endpoint_pattern.into(),
			rate,
			burst,
			strategy: RateLimitStrategy::TokenBucket,
		}
	}

	/// Selects the bucket algorithm.
	pub fn with_strategy(mut self, strategy: RateLimitStrategy) -> Self {
		self.strategy = strategy;

		self
	}

	/// Checks that `rate` is a positive finite number and `burst` is at least one.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !self.rate.is_finite() || self.rate < MIN_RATE {
			return Err(ConfigError::invalid(
				"rate_limit.requests_per_second",
				format!("rule `{}` needs a rate of at least {MIN_RATE}", self.endpoint_pattern),
			));
		}
		if self.burst == 0 {
			return Err(ConfigError::invalid(
				"rate_limit.burst_size",
				format!("rule `{}` needs a burst of at least 1", self.endpoint_pattern),
			));
		}

		Ok(())
	}
}

#[derive(Debug)]
pub(crate) struct CompiledRule {
	pub(crate) rule: RateLimitRule,
	pattern: Pattern,
	literals: usize,
}
impl CompiledRule {
	pub(crate) fn compile(rule: RateLimitRule) -> Result<Self, ConfigError> {
		rule.validate()?;

		let pattern = Pattern::new(&rule.endpoint_pattern).map_err(|source| {
			ConfigError::InvalidPattern { pattern: rule.endpoint_pattern.clone(), source }
		})?;
		let literals = literal_count(&rule.endpoint_pattern);

		Ok(Self { rule, pattern, literals })
	}

	/// Ranks how closely this rule matches, or `None` when it does not match at all.
	pub(crate) fn specificity(&self, descriptor: &RequestDescriptor) -> Option<usize> {
		let raw = self.rule.endpoint_pattern.as_str();
		let path = descriptor.url.path();

		if raw == &*descriptor.endpoint_id || raw == path {
			return Some(usize::MAX);
		}
		if self.pattern.matches(&descriptor.endpoint_id) || self.pattern.matches(path) {
			return Some(self.literals);
		}

		None
	}
}

/// Number of characters in `pattern` that must match literally.
fn literal_count(pattern: &str) -> usize {
	let mut count = 0;
	let mut in_class = false;
	let mut chars = pattern.chars();

	while let Some(c) = chars.next() {
		match c {
			']' if in_class => in_class = false,
			_ if in_class => (),
			'[' => {
				// `[?]`, `[*]` and `[[]` escape a single metacharacter.
				let rest = chars.as_str();
				let mut lookahead = rest.chars();

				if let (Some(inner), Some(']')) = (lookahead.next(), lookahead.next()) {
					if matches!(inner, '?' | '*' | '[') {
						count += 1;
						chars = lookahead;

						continue;
					}
				}

				in_class = true;
			},
			'*' | '?' => (),
			_ => count += 1,
		}
	}

	count
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::request, descriptor::Method};

	#[test]
	fn literal_count_skips_wildcards_and_classes() {
		assert_eq!(literal_count("users.*"), 6);
		assert_eq!(literal_count("/v1/**/items"), 10);
		assert_eq!(literal_count("user[0-9]"), 4);
		assert_eq!(literal_count("a[*]b"), 3);
	}

	#[test]
	fn exact_match_outranks_any_glob() {
		let exact = CompiledRule::compile(RateLimitRule::new("users.list", 1., 1))
			.expect("Exact rule should compile.");
		let glob = CompiledRule::compile(RateLimitRule::new("users.lis?", 1., 1))
			.expect("Glob rule should compile.");
		let descriptor = request("users.list", Method::Get, "https://api.example.com/users");

		assert_eq!(exact.specificity(&descriptor), Some(usize::MAX));
		assert_eq!(glob.specificity(&descriptor), Some(9));
		assert_eq!(
			CompiledRule::compile(RateLimitRule::new("/users", 1., 1))
				.expect("Path rule should compile.")
				.specificity(&descriptor),
			Some(usize::MAX)
		);
		assert!(
			CompiledRule::compile(RateLimitRule::new("orders.*", 1., 1))
				.expect("Rule should compile.")
				.specificity(&descriptor)
				.is_none()
		);
	}

	#[test]
	fn invalid_rules_are_rejected() {
		assert!(RateLimitRule::new("*", 0., 1).validate().is_err());
		assert!(RateLimitRule::new("*", f64::NAN, 1).validate().is_err());
		assert!(RateLimitRule::new("*", 1e-300, 1).validate().is_err());
		assert!(RateLimitRule::new("*", MIN_RATE, 1).validate().is_ok());
		assert!(RateLimitRule::new("*", 1., 0).validate().is_err());
		assert!(matches!(
			CompiledRule::compile(RateLimitRule::new("[", 1., 1)),
			Err(ConfigError::InvalidPattern { .. })
		));
	}
}
