//! AWS Signature Version 4 request signing.

// crates.io
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use time::UtcOffset;
// self
use crate::{
	_prelude::*,
	auth::{
		Secret,
		credential::{AwsCredential, required, required_secret},
	},
	descriptor::RequestDescriptor,
	error::{AuthError, ConfigError},
};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Signs requests with AWS SigV4 headers.
#[derive(Clone, Debug)]
pub struct AwsSigner {
	access_key: String,
	secret_key: Secret,
	session_token: Option<Secret>,
	region: String,
	service: String,
}
impl AwsSigner {
	/// Validates the configured fields.
	pub fn from_credential(fields: &AwsCredential) -> Result<Self, ConfigError> {
		Ok(Self {
			access_key: required(&fields.access_key, "aws_sig", "access_key")?.clone(),
			secret_key: required_secret(&fields.secret_key, "aws_sig", "secret_key")?.clone(),
			session_token: fields.session_token.clone().filter(|token| !token.is_empty()),
			region: required(&fields.region, "aws_sig", "region")?.clone(),
			service: required(&fields.service, "aws_sig", "service")?.clone(),
		})
	}

	/// Signs with the current time.
	pub fn sign(&self, descriptor: &mut RequestDescriptor) -> Result<(), AuthError> {
		self.sign_at(descriptor, OffsetDateTime::now_utc())
	}

	/// Signs as of `now`. Identical inputs and timestamp always yield identical headers.
	///
	/// Every header already on the descriptor is signed, along with `host`, `x-amz-date`,
	/// `x-amz-content-sha256`, and `x-amz-security-token` when a session token is configured.
	pub fn sign_at(
		&self,
		descriptor: &mut RequestDescriptor,
		now: OffsetDateTime,
	) -> Result<(), AuthError> {
		let (amz_date, date_stamp) = amz_timestamps(now);
		let payload_hash = hex_sha256(&descriptor.body);

		descriptor.headers.remove("authorization");
		descriptor.set_header("x-amz-date", amz_date.as_str());
		descriptor.set_header("x-amz-content-sha256", payload_hash.as_str());

		if let Some(token) = &self.session_token {
			descriptor.set_header("x-amz-security-token", token.expose());
		}

		let canonical_headers = canonical_headers(descriptor)?;
		let signed_headers =
			canonical_headers.keys().map(String::as_str).collect::<Vec<_>>().join(";");
		let canonical_request = [
			descriptor.method.as_str().to_owned(),
			canonical_uri(descriptor.url.path()),
			canonical_query(&descriptor.url),
			canonical_headers.iter().map(|(name, value)| format!("{name}:{value}\n")).collect(),
			signed_headers.clone(),
			payload_hash,
		]
		.join("\n");
		let scope = format!("{date_stamp}/{}/{}/aws4_request", self.region, self.service);
		let hashed_request = hex_sha256(canonical_request.as_bytes());
		let string_to_sign =
			[ALGORITHM, amz_date.as_str(), scope.as_str(), hashed_request.as_str()].join("\n");
		let signing_key = self.signing_key(&date_stamp)?;
		let signature = format!("{:x}", hmac(&signing_key, string_to_sign.as_bytes())?);

		descriptor.set_header(
			"authorization",
			format!(
				"{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
				self.access_key
			),
		);

		Ok(())
	}

	fn signing_key(&self, date_stamp: &str) -> Result<Vec<u8>, AuthError> {
		let seed = format!("AWS4{}", self.secret_key.expose());
		let k_date = hmac(seed.as_bytes(), date_stamp.as_bytes())?;
		let k_region = hmac(&k_date, self.region.as_bytes())?;
		let k_service = hmac(&k_region, self.service.as_bytes())?;

		Ok(hmac(&k_service, b"aws4_request")?.to_vec())
	}
}

fn hmac(
	key: &[u8],
	message: &[u8],
) -> Result<hmac::digest::Output<HmacSha256>, AuthError> {
	let mut mac = HmacSha256::new_from_slice(key)
		.map_err(|_| AuthError::Signing { reason: "invalid HMAC key length".into() })?;

	mac.update(message);

	Ok(mac.finalize().into_bytes())
}

fn hex_sha256(bytes: &[u8]) -> String {
	format!("{:x}", Sha256::digest(bytes))
}

fn amz_timestamps(now: OffsetDateTime) -> (String, String) {
	let utc = now.to_offset(UtcOffset::UTC);
	let date_stamp = format!("{:04}{:02}{:02}", utc.year(), u8::from(utc.month()), utc.day());
	let amz_date =
		format!("{date_stamp}T{:02}{:02}{:02}Z", utc.hour(), utc.minute(), utc.second());

	(amz_date, date_stamp)
}

fn canonical_headers(
	descriptor: &RequestDescriptor,
) -> Result<BTreeMap<String, String>, AuthError> {
	let mut headers = descriptor
		.headers
		.iter()
		.map(|(name, value)| (name.clone(), value.split_whitespace().collect::<Vec<_>>().join(" ")))
		.collect::<BTreeMap<_, _>>();

	if !headers.contains_key("host") {
		let host = descriptor
			.url
			.host_str()
			.ok_or_else(|| AuthError::Signing { reason: "request URL has no host".into() })?;
		let host = match descriptor.url.port() {
			Some(port) => format!("{host}:{port}"),
			None => host.to_owned(),
		};

		headers.insert("host".into(), host);
	}

	Ok(headers)
}

fn canonical_uri(path: &str) -> String {
	if path.is_empty() {
		return "/".into();
	}

	let bytes = path.as_bytes();
	let mut out = String::with_capacity(path.len());
	let mut i = 0;

	while i < bytes.len() {
		let byte = bytes[i];

		// Keep existing escapes, normalized to uppercase hex.
		if byte == b'%'
			&& i + 2 < bytes.len()
			&& bytes[i + 1].is_ascii_hexdigit()
			&& bytes[i + 2].is_ascii_hexdigit()
		{
			out.push('%');
			out.push(char::from(bytes[i + 1].to_ascii_uppercase()));
			out.push(char::from(bytes[i + 2].to_ascii_uppercase()));
			i += 3;

			continue;
		}
		if byte == b'/' || is_unreserved(byte) {
			out.push(char::from(byte));
		} else {
			out.push_str(&format!("%{byte:02X}"));
		}

		i += 1;
	}

	out
}

fn canonical_query(url: &Url) -> String {
	let mut pairs = url
		.query_pairs()
		.map(|(name, value)| (aws_uri_encode(&name), aws_uri_encode(&value)))
		.collect::<Vec<_>>();

	pairs.sort();

	pairs.into_iter().map(|(name, value)| format!("{name}={value}")).collect::<Vec<_>>().join("&")
}

fn aws_uri_encode(value: &str) -> String {
	let mut out = String::with_capacity(value.len());

	for byte in value.bytes() {
		if is_unreserved(byte) {
			out.push(char::from(byte));
		} else {
			out.push_str(&format!("%{byte:02X}"));
		}
	}

	out
}

fn is_unreserved(byte: u8) -> bool {
	byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}
