// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashSet;

use crate::{
    modules::{
        error::{code::ErrorCode, RollupResult},
        ingest::VisitKind,
        kpi::{store::EventSource, window::Window, Kpi},
        period::Granularity,
    },
    raise_error, validate_identifier,
};

pub const TOTAL_VISITS: &str = "total_visits";
pub const HOME_VISITS: &str = "home_visits";
pub const ITEM_VISITS: &str = "item_visits";
pub const DISTINCT_CONTENTS: &str = "distinct_contents";

pub const BUILTIN_KPIS: [&str; 4] = [TOTAL_VISITS, HOME_VISITS, ITEM_VISITS, DISTINCT_CONTENTS];

/// Number of visits in the window, optionally restricted to one kind.
pub struct VisitCount {
    id: String,
    kind: Option<VisitKind>,
}

impl VisitCount {
    pub fn new(id: &str, kind: Option<VisitKind>) -> Self {
        Self {
            id: id.to_string(),
            kind,
        }
    }
}

impl Kpi for VisitCount {
    fn unique_id(&self) -> &str {
        &self.id
    }

    fn compute(
        &self,
        _granularity: Granularity,
        window: Window,
        events: &dyn EventSource,
    ) -> RollupResult<u64> {
        let count = events
            .events_between(window.start, window.stop)?
            .iter()
            .filter(|event| self.kind.map_or(true, |kind| event.kind == kind))
            .count();
        Ok(count as u64)
    }
}

/// Number of distinct content titles visited in the window.
pub struct DistinctContents {
    id: String,
}

impl Kpi for DistinctContents {
    fn unique_id(&self) -> &str {
        &self.id
    }

    fn compute(
        &self,
        _granularity: Granularity,
        window: Window,
        events: &dyn EventSource,
    ) -> RollupResult<u64> {
        let contents: AHashSet<String> = events
            .events_between(window.start, window.stop)?
            .into_iter()
            .map(|event| event.content)
            .collect();
        Ok(contents.len() as u64)
    }
}

pub fn build_kpi(id: &str) -> RollupResult<Box<dyn Kpi>> {
    validate_identifier!(id, "kpi")?;
    let kpi: Box<dyn Kpi> = match id {
        TOTAL_VISITS => Box::new(VisitCount::new(id, None)),
        HOME_VISITS => Box::new(VisitCount::new(id, Some(VisitKind::ContentHome))),
        ITEM_VISITS => Box::new(VisitCount::new(id, Some(VisitKind::ContentItem))),
        DISTINCT_CONTENTS => Box::new(DistinctContents { id: id.to_string() }),
        other => {
            return Err(raise_error!(
                format!(
                    "Unknown kpi '{}', expected one of: {}",
                    other,
                    BUILTIN_KPIS.join(", ")
                ),
                ErrorCode::InvalidParameter
            ))
        }
    };
    Ok(kpi)
}

/// Instantiates the configured KPIs, rejecting unknown and repeated ids.
pub fn build_kpis(ids: &[&str]) -> RollupResult<Vec<Box<dyn Kpi>>> {
    let mut seen = AHashSet::new();
    let mut kpis = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(*id) {
            return Err(raise_error!(
                format!("Kpi '{}' is configured more than once", id),
                ErrorCode::InvalidParameter
            ));
        }
        kpis.push(build_kpi(id)?);
    }
    if kpis.is_empty() {
        return Err(raise_error!(
            "At least one kpi must be configured".into(),
            ErrorCode::MissingConfiguration
        ));
    }
    Ok(kpis)
}
