//! Cache key derivation.

// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, descriptor::RequestDescriptor};

/// Maps a request to the key its response is cached under.
pub trait CacheKeyGenerator
where
	Self: Send + Sync,
{
	/// Derives the key for `descriptor`.
	fn key_for(&self, descriptor: &RequestDescriptor) -> String;
}
impl<F> CacheKeyGenerator for F
where
	F: Fn(&RequestDescriptor) -> String + Send + Sync,
{
	fn key_for(&self, descriptor: &RequestDescriptor) -> String {
		self(descriptor)
	}
}

/// SHA-256 over method, normalized URL, body, and opted-in headers, hex encoded.
#[derive(Clone, Debug, Default)]
pub struct DefaultKeyGenerator {
	vary_headers: Vec<String>,
}
impl DefaultKeyGenerator {
	/// Includes the named request headers in every key.
	pub fn with_vary_headers<I, S>(mut self, headers: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self.vary_headers =
			headers.into_iter().map(|name| name.as_ref().to_ascii_lowercase()).collect();
		self.vary_headers.sort();
		self.vary_headers.dedup();

		self
	}
}
impl CacheKeyGenerator for DefaultKeyGenerator {
	fn key_for(&self, descriptor: &RequestDescriptor) -> String {
		let mut hasher = Sha256::new();

		hasher.update(descriptor.method.as_str());
		hasher.update(b"\n");
		hasher.update(normalize_url(&descriptor.url));
		hasher.update(b"\n");

		for name in &self.vary_headers {
			hasher.update(name);
			hasher.update(b":");

			if let Some(value) = descriptor.header(name) {
				hasher.update(value);
			}

			hasher.update(b"\n");
		}

		if !descriptor.body.is_empty() {
			hasher.update(Sha256::digest(&descriptor.body));
		}

		hex(&hasher.finalize())
	}
}

/// Lowercases scheme and host, sorts the query, and drops the fragment.
pub fn normalize_url(url: &Url) -> String {
	let mut normalized = url.clone();
	let mut pairs = url.query_pairs().into_owned().collect::<Vec<_>>();

	normalized.set_fragment(None);

	if pairs.is_empty() {
		normalized.set_query(None);
	} else {
		pairs.sort();
		normalized.query_pairs_mut().clear().extend_pairs(pairs);
	}

	// `Url` already lowercases the scheme and any domain host.
	normalized.into()
}

pub(crate) fn hex(bytes: &[u8]) -> String {
	bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::request, descriptor::Method};

	#[test]
	fn equivalent_urls_share_a_key() {
		let generator = DefaultKeyGenerator::default();
		let a = request("pets.list", Method::Get, "HTTPS://API.Example.com/pets?b=2&a=1#top");
		let b = request("pets.list", Method::Get, "https://api.example.com/pets?a=1&b=2");

		assert_eq!(generator.key_for(&a), generator.key_for(&b));
		assert_eq!(generator.key_for(&a).len(), 64);
		assert_eq!(normalize_url(&a.url), "https://api.example.com/pets?a=1&b=2");
	}

	#[test]
	fn method_body_and_vary_headers_split_keys() {
		let generator = DefaultKeyGenerator::default().with_vary_headers(["Accept"]);
		let base = request("pets.list", Method::Get, "https://api.example.com/pets");
		let json = base.clone().with_header("accept", "application/json");
		let xml = base.clone().with_header("accept", "application/xml");
		let post = request("pets.create", Method::Post, "https://api.example.com/pets");

		assert_ne!(generator.key_for(&json), generator.key_for(&xml));
		assert_ne!(generator.key_for(&base), generator.key_for(&post));
		assert_ne!(
			generator.key_for(&post.clone().with_body("{\"name\":\"a\"}")),
			generator.key_for(&post.with_body("{\"name\":\"b\"}"))
		);
		assert_eq!(
			DefaultKeyGenerator::default().key_for(&json),
			DefaultKeyGenerator::default().key_for(&xml)
		);
	}

	#[test]
	fn closures_are_generators() {
		let generator = |descriptor: &RequestDescriptor| descriptor.endpoint_id.to_string();
		let descriptor = request("pets.list", Method::Get, "https://api.example.com/pets");

		assert_eq!(CacheKeyGenerator::key_for(&generator, &descriptor), "pets.list");
	}
}
