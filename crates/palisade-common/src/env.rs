// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsing helpers for `PALISADE_*` environment overrides.

/// Accepts `1/0`, `true/false`, `yes/no` and `on/off`, case-insensitively.
pub fn parse_bool(value: &str) -> Option<bool> {
	match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_common_spellings() {
		for v in ["1", "true", "YES", " on "] {
			assert_eq!(parse_bool(v), Some(true), "{v}");
		}
		for v in ["0", "False", "no", "OFF"] {
			assert_eq!(parse_bool(v), Some(false), "{v}");
		}
		assert_eq!(parse_bool("maybe"), None);
		assert_eq!(parse_bool(""), None);
	}
}
