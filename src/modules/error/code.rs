// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    // Configuration and contract errors (10000–10999)
    InvalidParameter = 10000,
    MissingConfiguration = 10020,
    InvalidGranularity = 10030,

    // Resource errors (30000–30999)
    ResourceNotFound = 30000,
    AlreadyExists = 30010,

    // Storage errors (40000–40999)
    StorageError = 40000,

    // Ingestion errors (60000–60999)
    IngestFailed = 60000,

    // Internal system errors (70000–70999)
    InternalError = 70000,
}

impl ErrorCode {
    /// Errors that indicate a broken caller contract rather than a transient failure.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidGranularity
                | ErrorCode::InvalidParameter
                | ErrorCode::MissingConfiguration
        )
    }
}
