//! Request and response descriptors exchanged with the command layer.
//!
//! A [`RequestDescriptor`] arrives fully resolved: path and query parameters are already
//! substituted into the URL and the body is serialized. The pipeline only ever adds
//! credentials to it. Header names are kept lowercase so lookups and signatures are
//! case-insensitive.

// self
use crate::_prelude::*;

pub use crate::id::EndpointId;

/// HTTP methods the generated commands can issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`.
	Get,
	/// `HEAD`.
	Head,
	/// `OPTIONS`.
	Options,
	/// `POST`.
	Post,
	/// `PUT`.
	Put,
	/// `PATCH`.
	Patch,
	/// `DELETE`.
	Delete,
}
impl Method {
	/// Returns the canonical uppercase token.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Head => "HEAD",
			Method::Options => "OPTIONS",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}

	/// Methods without side effects; the only ones cached unless configured otherwise.
	pub const fn is_safe(self) -> bool {
		matches!(self, Method::Get | Method::Head | Method::Options)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Method {
	type Err = UnsupportedMethod;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"GET" => Ok(Method::Get),
			"HEAD" => Ok(Method::Head),
			"OPTIONS" => Ok(Method::Options),
			"POST" => Ok(Method::Post),
			"PUT" => Ok(Method::Put),
			"PATCH" => Ok(Method::Patch),
			"DELETE" => Ok(Method::Delete),
			_ => Err(UnsupportedMethod(s.to_owned())),
		}
	}
}

/// Raised when parsing an HTTP method the pipeline does not dispatch.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("HTTP method `{0}` is not supported.")]
pub struct UnsupportedMethod(pub String);

/// Outbound request handed to the pipeline by the command layer.
#[derive(Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
	/// Operation the request belongs to; drives rule and credential matching.
	pub endpoint_id: EndpointId,
	/// HTTP method.
	pub method: Method,
	/// Fully resolved URL, including the query string.
	pub url: Url,
	/// Request headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Serialized request body; empty when the request has none.
	pub body: Vec<u8>,
}
impl RequestDescriptor {
	/// Creates a descriptor without headers or body.
	pub fn new(endpoint_id: EndpointId, method: Method, url: Url) -> Self {
		Self { endpoint_id, method, url, headers: BTreeMap::new(), body: Vec::new() }
	}

	/// Adds a header, normalizing its name to lowercase.
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.set_header(name, value);

		self
	}

	/// Replaces the body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}

	/// Inserts or replaces a header, normalizing its name to lowercase.
	pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());
	}

	/// Looks up a header case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Appends a query parameter to the URL.
	pub fn append_query(&mut self, name: &str, value: &str) {
		self.url.query_pairs_mut().append_pair(name, value);
	}
}
impl Debug for RequestDescriptor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let headers = self
			.headers
			.iter()
			.map(|(name, value)| {
				let shown = if is_sensitive_header(name) { "<redacted>" } else { value.as_str() };

				(name.as_str(), shown)
			})
			.collect::<BTreeMap<_, _>>();
		// Query strings carry API keys and signatures; only parameter names are shown.
		let mut url = self.url.clone();
		let query = self.url.query_pairs().map(|(name, _)| name).collect::<Vec<_>>();

		url.set_query(None);

		f.debug_struct("RequestDescriptor")
			.field("endpoint_id", &self.endpoint_id)
			.field("method", &self.method)
			.field("url", &url.as_str())
			.field("query", &query)
			.field("headers", &headers)
			.field("body_len", &self.body.len())
			.finish()
	}
}

/// Result of one pipeline invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseDescriptor {
	/// HTTP status code.
	pub status: u16,
	/// Response headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Raw response body.
	pub body: Vec<u8>,
	/// `true` when the response came from the cache and no transport call was made.
	pub served_from_cache: bool,
	/// Wall time spent inside the pipeline.
	pub elapsed: StdDuration,
}
impl ResponseDescriptor {
	/// Creates a fresh (non-cached) response.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self {
			status,
			headers: BTreeMap::new(),
			body: body.into(),
			served_from_cache: false,
			elapsed: StdDuration::ZERO,
		}
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Looks up a header case-insensitively.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Decodes the body as JSON.
	pub fn json<T>(&self) -> Result<T, serde_json::Error>
	where
		T: serde::de::DeserializeOwned,
	{
		serde_json::from_slice(&self.body)
	}
}

fn is_sensitive_header(name: &str) -> bool {
	matches!(name, "authorization" | "proxy-authorization" | "cookie" | "x-amz-security-token")
		|| name.contains("api-key")
		|| name.contains("apikey")
		|| name.contains("token")
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn descriptor() -> RequestDescriptor {
		RequestDescriptor::new(
			EndpointId::new("users.list").expect("Endpoint fixture should be valid."),
			Method::Get,
			Url::parse("https://api.example.com/users").expect("URL fixture should parse."),
		)
	}

	#[test]
	fn headers_are_case_insensitive() {
		let request = descriptor().with_header("X-Trace-Id", "abc");

		assert_eq!(request.header("x-trace-id"), Some("abc"));
		assert_eq!(request.header("X-TRACE-ID"), Some("abc"));
	}

	#[test]
	fn debug_redacts_credentials() {
		let request = descriptor()
			.with_header("Authorization", "Bearer secret-token")
			.with_header("X-API-Key", "k-123");
		let rendered = format!("{request:?}");

		assert!(!rendered.contains("secret-token"));
		assert!(!rendered.contains("k-123"));
		assert!(rendered.contains("<redacted>"));
	}

	#[test]
	fn debug_hides_query_values() {
		let mut request = descriptor();

		request.append_query("api_key", "k-123");
		request.append_query("limit", "10");

		let rendered = format!("{request:?}");

		assert!(!rendered.contains("k-123"));
		assert!(rendered.contains("\"https://api.example.com/users\""));
		assert!(rendered.contains("\"api_key\""));
		assert!(rendered.contains("\"limit\""));
	}

	#[test]
	fn methods_parse_case_insensitively() {
		assert_eq!("patch".parse::<Method>(), Ok(Method::Patch));
		assert!("TRACE".parse::<Method>().is_err());
		assert!(Method::Get.is_safe());
		assert!(!Method::Delete.is_safe());
	}
}
