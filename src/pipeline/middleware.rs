//! Hooks that run around the transport call.

// self
use crate::{
	_prelude::*,
	descriptor::ResponseDescriptor,
	pipeline::InvocationContext,
};

/// Boxed future returned by [`Middleware`] hooks.
pub type MiddlewareFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + 'a + Send>>;

/// Fixed-interface stage registered on a [`Pipeline`](crate::Pipeline) at build time.
///
/// `before` hooks run in registration order after a cache miss, immediately before the
/// request is sent. `after` hooks run in reverse order on the fresh response, before it is
/// cached. An error from either hook aborts the invocation; an error from `before` also
/// refunds the rate-limit permit since nothing was sent.
pub trait Middleware
where
	Self: Send + Sync,
{
	/// Label used in logs.
	fn name(&self) -> &str;

	/// Inspects or rewrites the outbound request.
	fn before<'a>(&'a self, ctx: &'a mut InvocationContext) -> MiddlewareFuture<'a> {
		let _ = ctx;

		Box::pin(async { Ok::<_, Error>(()) })
	}

	/// Inspects or rewrites the response.
	fn after<'a>(
		&'a self,
		ctx: &'a InvocationContext,
		response: &'a mut ResponseDescriptor,
	) -> MiddlewareFuture<'a> {
		let _ = (ctx, response);

		Box::pin(async { Ok::<_, Error>(()) })
	}
}

/// Adds headers the request does not already carry, such as `user-agent` or `accept`.
#[derive(Clone, Debug, Default)]
pub struct DefaultHeaders {
	headers: BTreeMap<String, String>,
}
impl DefaultHeaders {
	/// Creates the middleware from `(name, value)` pairs.
	pub fn new<I, K, V>(headers: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: AsRef<str>,
		V: Into<String>,
	{
		Self {
			headers: headers
				.into_iter()
				.map(|(name, value)| (name.as_ref().to_ascii_lowercase(), value.into()))
				.collect(),
		}
	}

	/// Returns `true` when no header is configured.
	pub fn is_empty(&self) -> bool {
		self.headers.is_empty()
	}
}
impl Middleware for DefaultHeaders {
	fn name(&self) -> &str {
		"default_headers"
	}

	fn before<'a>(&'a self, ctx: &'a mut InvocationContext) -> MiddlewareFuture<'a> {
		for (name, value) in &self.headers {
			ctx.descriptor.headers.entry(name.clone()).or_insert_with(|| value.clone());
		}

		Box::pin(async { Ok::<_, Error>(()) })
	}
}
