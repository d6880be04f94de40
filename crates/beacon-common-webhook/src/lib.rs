// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared webhook signing utilities.
//!
//! Outbound deliveries are signed with HMAC-SHA256 over the ASCII decimal
//! unix timestamp immediately followed by the raw request body. The result is
//! sent as `X-Webhook-Signature: v1=<hex>` alongside `X-Webhook-Timestamp`.
//! Receivers can use [`verify`] as a reference implementation.

pub mod secret;
pub mod signature;

pub use secret::{SigningSecret, REDACTED, SECRET_PREFIX};
pub use signature::{
	sign, signature_header, verify, SignatureHeader, VerifyError, DEFAULT_TOLERANCE, SIGNATURE_SCHEME,
};

/// Header carrying the event name.
pub const HEADER_EVENT: &str = "X-Webhook-Event";
/// Header carrying the unix timestamp (seconds) that was signed.
pub const HEADER_TIMESTAMP: &str = "X-Webhook-Timestamp";
/// Header carrying the `v1=<hex>` signature.
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
/// Header carrying the delivery id receivers dedupe on.
pub const HEADER_DELIVERY_ID: &str = "X-Webhook-Delivery-Id";
