// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use base64::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

pub const KEY_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
	#[error("invalid base64: {0}")]
	Base64(String),

	#[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
	Length(usize),
}

/// A WireGuard (Curve25519) public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WgPublicKey([u8; KEY_LEN]);

impl WgPublicKey {
	pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
		Self(bytes)
	}

	pub fn from_base64(s: &str) -> Result<Self, KeyError> {
		let bytes = BASE64_STANDARD
			.decode(s.trim())
			.map_err(|e| KeyError::Base64(e.to_string()))?;
		let len = bytes.len();
		let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| KeyError::Length(len))?;
		Ok(Self(bytes))
	}

	pub fn to_base64(&self) -> String {
		BASE64_STANDARD.encode(self.0)
	}

	pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
		&self.0
	}
}

impl fmt::Display for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.to_base64())
	}
}

impl fmt::Debug for WgPublicKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "WgPublicKey({})", self.to_base64())
	}
}

impl std::str::FromStr for WgPublicKey {
	type Err = KeyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::from_base64(s)
	}
}

impl Serialize for WgPublicKey {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.to_base64())
	}
}

impl<'de> Deserialize<'de> for WgPublicKey {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Self::from_base64(&s).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn base64_roundtrip() {
		let key = WgPublicKey::from_bytes([7u8; KEY_LEN]);
		let parsed = WgPublicKey::from_base64(&key.to_base64()).unwrap();
		assert_eq!(key, parsed);
	}

	#[test]
	fn rejects_short_key() {
		let short = BASE64_STANDARD.encode([1u8; 16]);
		assert_eq!(WgPublicKey::from_base64(&short), Err(KeyError::Length(16)));
	}

	#[test]
	fn rejects_garbage() {
		assert!(matches!(
			WgPublicKey::from_base64("not base64!!"),
			Err(KeyError::Base64(_))
		));
	}

	#[test]
	fn serializes_as_string() {
		let key = WgPublicKey::from_bytes([0u8; KEY_LEN]);
		let json = serde_json::to_string(&key).unwrap();
		assert_eq!(json, format!("\"{}\"", key.to_base64()));
	}
}
