// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-subscription signing secrets.

use std::fmt;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// The redaction placeholder used in all output.
pub const REDACTED: &str = "[REDACTED]";

/// Prefix carried by every generated secret.
pub const SECRET_PREFIX: &str = "whsec_";

const SECRET_RANDOM_LEN: usize = 48;

/// HMAC key for a single subscription.
///
/// Debug, Display and Serialize never reveal the value, and the memory is
/// zeroized on drop. Call [`SigningSecret::expose`] to get at the bytes.
#[derive(Clone, Zeroize, PartialEq, Eq)]
#[zeroize(drop)]
pub struct SigningSecret {
	inner: String,
}

impl SigningSecret {
	pub fn new(inner: impl Into<String>) -> Self {
		Self { inner: inner.into() }
	}

	/// Generate a fresh `whsec_` secret with 48 random alphanumeric characters.
	pub fn generate() -> Self {
		let random: String = rand::thread_rng()
			.sample_iter(&Alphanumeric)
			.take(SECRET_RANDOM_LEN)
			.map(char::from)
			.collect();
		Self::new(format!("{SECRET_PREFIX}{random}"))
	}

	pub fn expose(&self) -> &str {
		&self.inner
	}

	pub fn as_bytes(&self) -> &[u8] {
		self.inner.as_bytes()
	}
}

impl fmt::Debug for SigningSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SigningSecret").field(&REDACTED).finish()
	}
}

impl fmt::Display for SigningSecret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(REDACTED)
	}
}

impl Serialize for SigningSecret {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(REDACTED)
	}
}

impl<'de> Deserialize<'de> for SigningSecret {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer).map(SigningSecret::new)
	}
}
