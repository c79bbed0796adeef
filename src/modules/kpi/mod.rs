// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::{
    error::RollupResult,
    kpi::{store::EventSource, window::Window},
    period::Granularity,
};

pub mod catalog;
pub mod engine;
#[cfg(test)]
pub(crate) mod memory;
pub mod processor;
pub mod retention;
pub mod store;
pub mod value;
pub mod window;


/// A named metric computed over the raw events of one window.
///
/// `compute` must be a pure function of the events in `window`: calling it
/// again with the same arguments and no new events returns the same value.
pub trait Kpi: Send + Sync {
    fn unique_id(&self) -> &str;

    fn compute(
        &self,
        granularity: Granularity,
        window: Window,
        events: &dyn EventSource,
    ) -> RollupResult<u64>;
}
