// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use code::ErrorCode;
use snafu::{Location, Snafu};

pub mod code;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RollupError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

pub type RollupResult<T, E = RollupError> = std::result::Result<T, E>;

impl RollupError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RollupError::Generic { code, .. } => *code,
        }
    }
}
