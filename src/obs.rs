//! Stage events, observers, and the tracing/metrics hooks built on them.
//!
//! The pipeline emits one [`StageEvent`] after every stage it runs plus a final
//! [`Stage::Complete`] summary. Observers are passive: they cannot alter the request or the
//! outcome, and they never see another invocation's context.
//!
//! # Feature Flags
//!
//! - Spans named `oapi_pipeline.invocation` carry the `endpoint` and `method` fields.
//! - Enable `metrics` to increment `oapi_pipeline_stage_total` (labeled by `stage` +
//!   `outcome`) and record `oapi_pipeline_stage_seconds` through [`MetricsObserver`].

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::{
	_prelude::*,
	descriptor::{Method, RequestDescriptor},
};

/// Pipeline stages, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
	/// Credential injection.
	Auth,
	/// Rate-limit admission.
	RateLimit,
	/// Response cache lookup.
	CacheLookup,
	/// HTTP send.
	Transport,
	/// Response cache write.
	CacheStore,
	/// End-of-invocation summary.
	Complete,
}
impl Stage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Stage::Auth => "auth",
			Stage::RateLimit => "rate_limit",
			Stage::CacheLookup => "cache_lookup",
			Stage::Transport => "transport",
			Stage::CacheStore => "cache_store",
			Stage::Complete => "complete",
		}
	}
}
impl Display for Stage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageOutcome {
	/// Stage finished normally.
	Success,
	/// Cache lookup found a fresh entry.
	Hit,
	/// Cache lookup found nothing usable.
	Miss,
	/// Stage did not apply to this request (excluded path, unsafe method, cache off).
	Bypassed,
	/// Rate limiter refused admission.
	Denied,
	/// Stage failed and aborted the invocation.
	Failure,
}
impl StageOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			StageOutcome::Success => "success",
			StageOutcome::Hit => "hit",
			StageOutcome::Miss => "miss",
			StageOutcome::Bypassed => "bypassed",
			StageOutcome::Denied => "denied",
			StageOutcome::Failure => "failure",
		}
	}
}
impl Display for StageOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Notification delivered to observers after a stage completes.
#[derive(Clone, Copy, Debug)]
pub struct StageEvent<'a> {
	/// Stage that just finished.
	pub stage: Stage,
	/// Request as seen by the stage. Carries injected credentials after [`Stage::Auth`];
	/// observers must not log headers verbatim.
	pub descriptor: &'a RequestDescriptor,
	/// How the stage ended.
	pub outcome: StageOutcome,
	/// Time spent in the stage (or the whole invocation for [`Stage::Complete`]).
	pub latency: StdDuration,
	/// Response status, once known.
	pub status: Option<u16>,
}
impl StageEvent<'_> {
	/// Shortcut for the request method.
	pub fn method(&self) -> Method {
		self.descriptor.method
	}
}

/// Passive listener registered on a [`Pipeline`](crate::Pipeline).
pub trait Observer
where
	Self: Send + Sync,
{
	/// Receives one stage event. Must not block.
	fn on_event(&self, event: &StageEvent<'_>);
}
