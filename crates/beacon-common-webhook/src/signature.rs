// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Scheme prefix used in the signature header.
pub const SIGNATURE_SCHEME: &str = "v1";

/// Default clock skew accepted by [`verify`].
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
	#[error("timestamp header is not a unix timestamp")]
	MalformedTimestamp,

	#[error("timestamp is outside the tolerance window ({skew_secs}s skew)")]
	StaleTimestamp { skew_secs: u64 },

	#[error("signature header has no v1 entry")]
	MalformedSignature,

	#[error("no signature matched")]
	SignatureMismatch,
}

fn mac_for(secret: &[u8], payload: &[u8], timestamp: i64) -> HmacSha256 {
	let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
	mac.update(timestamp.to_string().as_bytes());
	mac.update(payload);
	mac
}

/// Compute the lowercase hex HMAC-SHA256 of `timestamp || payload`.
pub fn sign(secret: &[u8], payload: &[u8], timestamp: i64) -> String {
	hex::encode(mac_for(secret, payload, timestamp).finalize().into_bytes())
}

/// Format the full `X-Webhook-Signature` header value.
pub fn signature_header(secret: &[u8], payload: &[u8], timestamp: i64) -> String {
	format!("{SIGNATURE_SCHEME}={}", sign(secret, payload, timestamp))
}

/// Parsed `X-Webhook-Signature` header.
///
/// The header may carry several comma separated `scheme=value` pairs so that
/// senders can sign with both the old and new secret during rotation. Only
/// `v1` entries are kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
	pub signatures: Vec<String>,
}

impl SignatureHeader {
	pub fn parse(header: &str) -> Result<Self, VerifyError> {
		let signatures: Vec<String> = header
			.split(',')
			.filter_map(|part| part.trim().split_once('='))
			.filter(|(scheme, value)| *scheme == SIGNATURE_SCHEME && !value.is_empty())
			.map(|(_, value)| value.to_string())
			.collect();

		if signatures.is_empty() {
			return Err(VerifyError::MalformedSignature);
		}
		Ok(Self { signatures })
	}
}

/// Receiver-side check of a delivery.
///
/// `now` is the receiver's current unix time in seconds. Timestamps further
/// than `tolerance` from `now` in either direction are rejected before any
/// HMAC work is done. Comparison is constant-time.
pub fn verify(
	secret: &[u8],
	payload: &[u8],
	timestamp_header: &str,
	signature_header: &str,
	now: i64,
	tolerance: Duration,
) -> Result<(), VerifyError> {
	let timestamp: i64 = timestamp_header
		.trim()
		.parse()
		.map_err(|_| VerifyError::MalformedTimestamp)?;

	let skew = now.abs_diff(timestamp);
	if skew > tolerance.as_secs() {
		return Err(VerifyError::StaleTimestamp { skew_secs: skew });
	}

	let header = SignatureHeader::parse(signature_header)?;
	let mac = mac_for(secret, payload, timestamp);

	for candidate in &header.signatures {
		let Ok(bytes) = hex::decode(candidate) else {
			continue;
		};
		if mac.clone().verify_slice(&bytes).is_ok() {
			return Ok(());
		}
	}

	Err(VerifyError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
	use super::*;

	const SECRET: &[u8] = b"whsec_test";
	const PAYLOAD: &[u8] = br#"{"event":"report.generated","timestamp":1700000000,"data":{}}"#;
	const TS: i64 = 1_700_000_000;

	#[test]
	fn test_sign_is_64_lowercase_hex() {
		let sig = sign(SECRET, PAYLOAD, TS);
		assert_eq!(sig.len(), 64);
		assert!(sig.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
	}

	#[test]
	fn test_sign_covers_timestamp_then_payload() {
		let mut mac = HmacSha256::new_from_slice(SECRET).unwrap();
		mac.update(format!("{TS}").as_bytes());
		mac.update(PAYLOAD);
		let expected = hex::encode(mac.finalize().into_bytes());
		assert_eq!(sign(SECRET, PAYLOAD, TS), expected);
	}

	#[test]
	fn test_signature_header_has_scheme() {
		let header = signature_header(SECRET, PAYLOAD, TS);
		assert!(header.starts_with("v1="));
		assert_eq!(&header[3..], sign(SECRET, PAYLOAD, TS));
	}

	#[test]
	fn test_verify_accepts_valid_signature() {
		let header = signature_header(SECRET, PAYLOAD, TS);
		assert_eq!(
			verify(SECRET, PAYLOAD, &TS.to_string(), &header, TS + 10, DEFAULT_TOLERANCE),
			Ok(())
		);
	}

	#[test]
	fn test_verify_rejects_stale_timestamp() {
		let header = signature_header(SECRET, PAYLOAD, TS);
		let result = verify(SECRET, PAYLOAD, &TS.to_string(), &header, TS + 301, DEFAULT_TOLERANCE);
		assert_eq!(result, Err(VerifyError::StaleTimestamp { skew_secs: 301 }));
	}

	#[test]
	fn test_verify_rejects_future_timestamp() {
		let header = signature_header(SECRET, PAYLOAD, TS);
		let result = verify(SECRET, PAYLOAD, &TS.to_string(), &header, TS - 600, DEFAULT_TOLERANCE);
		assert!(matches!(result, Err(VerifyError::StaleTimestamp { .. })));
	}

	#[test]
	fn test_verify_rejects_malformed_timestamp() {
		let header = signature_header(SECRET, PAYLOAD, TS);
		let result = verify(SECRET, PAYLOAD, "yesterday", &header, TS, DEFAULT_TOLERANCE);
		assert_eq!(result, Err(VerifyError::MalformedTimestamp));
	}

	#[test]
	fn test_verify_rejects_tampered_payload() {
		let header = signature_header(SECRET, PAYLOAD, TS);
		let result = verify(SECRET, b"{}", &TS.to_string(), &header, TS, DEFAULT_TOLERANCE);
		assert_eq!(result, Err(VerifyError::SignatureMismatch));
	}

	#[test]
	fn test_verify_rejects_replayed_timestamp_swap() {
		let header = signature_header(SECRET, PAYLOAD, TS);
		let result = verify(SECRET, PAYLOAD, &(TS + 1).to_string(), &header, TS, DEFAULT_TOLERANCE);
		assert_eq!(result, Err(VerifyError::SignatureMismatch));
	}

	#[test]
	fn test_verify_accepts_any_rotated_signature() {
		let old = sign(b"old-secret", PAYLOAD, TS);
		let new = sign(SECRET, PAYLOAD, TS);
		let header = format!("v1={old}, v1={new}");
		assert!(verify(SECRET, PAYLOAD, &TS.to_string(), &header, TS, DEFAULT_TOLERANCE).is_ok());
	}

	#[test]
	fn test_parse_ignores_unknown_schemes() {
		let parsed = SignatureHeader::parse("v0=abc,v1=def").unwrap();
		assert_eq!(parsed.signatures, vec!["def".to_string()]);
		assert_eq!(SignatureHeader::parse("v0=abc"), Err(VerifyError::MalformedSignature));
		assert_eq!(SignatureHeader::parse(""), Err(VerifyError::MalformedSignature));
	}
}
