// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::id;

pub mod config;
pub mod converter;
pub mod task;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum VisitKind {
    ContentHome,
    ContentItem,
}

/// A visit recognised in one access-log line, before it is timestamped and stored.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VisitInput {
    ContentHomeVisit { content: String },
    ContentItemVisit { content: String, item: String },
}

impl VisitInput {
    pub fn into_event(self, ts: i64) -> VisitEvent {
        match self {
            VisitInput::ContentHomeVisit { content } => VisitEvent {
                id: id!(64),
                ts,
                kind: VisitKind::ContentHome,
                content,
                item: None,
            },
            VisitInput::ContentItemVisit { content, item } => VisitEvent {
                id: id!(64),
                ts,
                kind: VisitKind::ContentItem,
                content,
                item: Some(item),
            },
        }
    }
}

/// Raw event read by KPI computations. `ts` is in UNIX seconds.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[native_model(id = 3, version = 1)]
#[native_db]
pub struct VisitEvent {
    #[primary_key]
    pub id: u64,
    #[secondary_key]
    pub ts: i64,
    pub kind: VisitKind,
    pub content: String,
    pub item: Option<String>,
}
