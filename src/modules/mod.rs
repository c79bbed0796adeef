// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

pub mod common;
pub mod context;
pub mod database;
pub mod error;
pub mod ingest;
pub mod kpi;
pub mod logger;
pub mod period;
pub mod scheduler;
pub mod settings;
pub mod tasks;
pub mod utils;
