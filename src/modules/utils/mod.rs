// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use base64::{engine::general_purpose, Engine};
use rand::{rng, Rng};
use std::sync::LazyLock;

use super::error::code::ErrorCode;

pub mod shutdown;

static IDENTIFIER_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").unwrap());

#[macro_export]
macro_rules! rollup_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

#[macro_export]
macro_rules! utc_now {
    () => {{
        use chrono::Utc;
        Utc::now().timestamp_millis()
    }};
}

#[macro_export]
macro_rules! raise_error {
    ($msg:expr, $code:expr) => {
        $crate::modules::error::RollupError::Generic {
            message: $msg,
            location: snafu::Location::default(),
            code: $code,
        }
    };
}

#[macro_export]
macro_rules! validate_identifier {
    ($input:expr, $param_name:expr) => {{
        $crate::modules::utils::validate_id($input, $param_name)
    }};
}

pub fn validate_id(input: &str, param_name: &str) -> crate::modules::error::RollupResult<()> {
    if input.is_empty() {
        return Err(raise_error!(
            format!("'{}' cannot be empty.", param_name),
            ErrorCode::InvalidParameter
        ));
    }

    if input.len() > 64 {
        return Err(raise_error!(
            format!("'{}' cannot be longer than 64 characters.", param_name),
            ErrorCode::InvalidParameter
        ));
    }

    if IDENTIFIER_PATTERN.is_match(input) {
        Ok(())
    } else {
        Err(raise_error!(
            format!("'{}' must start with a letter and can only contain letters, numbers, underscores, or dashes.", param_name),
            ErrorCode::InvalidParameter
        ))
    }
}

pub(crate) fn generate_token_impl(bit_strength: usize) -> String {
    let byte_length = (bit_strength + 23) / 24 * 3;
    let random_bytes: Vec<u8> = (0..byte_length).map(|_| rand::random::<u8>()).collect();
    let mut encoded = general_purpose::URL_SAFE.encode(&random_bytes);

    encoded = encoded
        .chars()
        .map(|c| {
            if c == '/' || c == '+' || c == '-' || c == '_' {
                make_single_random_char()
            } else {
                c
            }
        })
        .collect();

    encoded
}

fn make_single_random_char() -> char {
    let random_bytes: [u8; 3] = rng().random();
    let encoded = general_purpose::URL_SAFE.encode(random_bytes);
    encoded
        .chars()
        .find(|&c| c != '-' && c != '_' && c != '+' && c != '/')
        .unwrap_or('a')
}

#[macro_export]
macro_rules! id {
    ($bit_strength:expr) => {{
        let token = $crate::modules::utils::generate_token_impl($bit_strength);
        $crate::modules::utils::hash(&token)
    }};
}

/// Generates a 64-bit hash from a string, masked to 53 bits so ids survive a JSON round trip.
pub fn hash(s: &str) -> u64 {
    let mut cursor = std::io::Cursor::new(s.as_bytes());
    let hash = murmur3::murmur3_x64_128(&mut cursor, 0).unwrap_or_default();
    (hash & 0x1F_FFFF_FFFF_FFFF) as u64
}
