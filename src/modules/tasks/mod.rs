// Copyright © 2025 rustmailer.com
// Licensed under RustMailer License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::context::RollupTask;
use crate::modules::kpi::engine::KpiTickTask;

pub struct PeriodicTasks;

impl PeriodicTasks {
    pub fn start_background_tasks() {
        // also drains the access log, when one is configured
        KpiTickTask::start();
    }
}
