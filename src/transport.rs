//! The final hop: sending an authorized request to the API.

// self
use crate::{
	_prelude::*,
	descriptor::{RequestDescriptor, ResponseDescriptor},
	error::TransportError,
};

/// Boxed future returned by [`Transport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ResponseDescriptor, TransportError>> + 'a + Send>>;

/// Sends one request and collects the whole response.
pub trait Transport
where
	Self: Send + Sync,
{
	/// Dispatches `request`. Non-2xx statuses are responses, not errors.
	fn send(&self, request: RequestDescriptor) -> TransportFuture<'_>;
}

/// reqwest-backed [`Transport`].
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn send(&self, request: RequestDescriptor) -> TransportFuture<'_> {
		Box::pin(async move {
			let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes()).map_err(
				|e| TransportError::InvalidRequest { reason: e.to_string() },
			)?;
			let mut builder = self.0.request(method, request.url.clone());

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if !request.body.is_empty() {
				builder = builder.body(request.body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let headers = collect_headers(response.headers());
			let body = response.bytes().await?.to_vec();
			let mut converted = ResponseDescriptor::new(status, body);

			converted.headers = headers;

			Ok(converted)
		})
	}
}

/// Folds repeated header lines into one comma-separated value, in arrival order.
#[cfg(feature = "reqwest")]
fn collect_headers(map: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
	let mut headers = BTreeMap::<String, String>::new();

	for (name, value) in map {
		let value = String::from_utf8_lossy(value.as_bytes());

		headers
			.entry(name.as_str().to_owned())
			.and_modify(|joined| {
				joined.push_str(", ");
				joined.push_str(&value);
			})
			.or_insert_with(|| value.to_string());
	}

	headers
}
