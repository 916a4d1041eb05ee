//! Per-invocation scratch state.

// self
use crate::{_prelude::*, descriptor::RequestDescriptor, id::CredentialId};

/// State owned by one [`Pipeline::execute`](crate::Pipeline::execute) call.
///
/// Stages record what they decided here; middleware may read it and stash its own values in
/// [`attributes`](Self::attributes). Nothing in a context outlives its invocation.
#[derive(Debug)]
pub struct InvocationContext {
	/// The request, credentials included once the auth stage has run.
	pub descriptor: RequestDescriptor,
	/// Credential applied by the auth stage.
	pub credential: Option<CredentialId>,
	/// Pattern of the rate-limit rule that admitted the request.
	pub rate_limit_rule: Option<String>,
	/// Cache key, set when the request was eligible for caching and missed.
	pub cache_key: Option<String>,
	/// Free-form values shared between middleware hooks.
	pub attributes: BTreeMap<String, String>,
	started_at: Instant,
}
impl InvocationContext {
	/// Starts a context for `descriptor`.
	pub fn new(descriptor: RequestDescriptor) -> Self {
		Self {
			descriptor,
			credential: None,
			rate_limit_rule: None,
			cache_key: None,
			attributes: BTreeMap::new(),
			started_at: Instant::now(),
		}
	}

	/// Instant the invocation began.
	pub fn started_at(&self) -> Instant {
		self.started_at
	}

	/// Time since the invocation began.
	pub fn elapsed(&self) -> StdDuration {
		self.started_at.elapsed()
	}

	/// Reads an attribute.
	pub fn attribute(&self, name: &str) -> Option<&str> {
		self.attributes.get(name).map(String::as_str)
	}

	/// Sets an attribute, returning the previous value.
	pub fn set_attribute(
		&mut self,
		name: impl Into<String>,
		value: impl Into<String>,
	) -> Option<String> {
		self.attributes.insert(name.into(), value.into())
	}
}
