//! Per-workspace TTL cache for `HealthReport`s. In-process, mutex-guarded,
//! rebuildable from the database on a miss — no persistence of its own.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ctrlplane_domain::ids::WorkspaceId;

use crate::report::HealthReport;

struct Entry {
    report: HealthReport,
    built_at: Instant,
}

/// Healthy reports get the long TTL; anything non-OK is kept around for
/// only `error_ttl` so an operator fixing a problem sees it clear fast.
pub struct HealthCache {
    ok_ttl: Duration,
    error_ttl: Duration,
    entries: Mutex<HashMap<WorkspaceId, Entry>>,
}

impl HealthCache {
    pub fn new(ok_ttl: Duration, error_ttl: Duration) -> Self {
        Self { ok_ttl, error_ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub fn get(&self, workspace: WorkspaceId) -> Option<HealthReport> {
        let entries = self.entries.lock().expect("health cache poisoned");
        let entry = entries.get(&workspace)?;
        let ttl = if entry.report.ok { self.ok_ttl } else { self.error_ttl };
        if entry.built_at.elapsed() < ttl {
            let mut report = entry.report.clone();
            report.meta.cached = true;
            Some(report)
        } else {
            None
        }
    }

    pub fn put(&self, workspace: WorkspaceId, report: HealthReport) {
        let mut entries = self.entries.lock().expect("health cache poisoned");
        entries.insert(workspace, Entry { report, built_at: Instant::now() });
    }
}

impl Default for HealthCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{CheckResult, Checks, Meta, OptionalChecks, Summary, SCHEMA_VERSION};
    use uuid::Uuid;

    fn sample_report(ok: bool) -> HealthReport {
        let status = if ok { CheckResult::up() } else { CheckResult::down("boom") };
        HealthReport {
            schema_version: SCHEMA_VERSION,
            ok,
            checks: Checks {
                db: status.clone(),
                kernel_schema_versions: CheckResult::up(),
                evt_events: CheckResult::up(),
                evt_events_idempotency: CheckResult::up(),
                optional: OptionalChecks::default(),
            },
            summary: Summary {
                health_summary: status.status,
                cron_freshness_sec: None,
                projection_lag_sec: None,
                dlq_backlog_count: None,
                rate_limit_flood_detected: false,
                active_incidents_count: 0,
                top_issues: vec![],
            },
            meta: Meta { cached: false },
        }
    }

    #[test]
    fn fresh_entry_is_returned_and_marked_cached() {
        let cache = HealthCache::new(Duration::from_secs(60), Duration::from_secs(60));
        let ws = WorkspaceId(Uuid::new_v4());
        cache.put(ws, sample_report(true));
        let hit = cache.get(ws).expect("should hit");
        assert!(hit.meta.cached);
    }

    #[test]
    fn expired_error_entry_is_evicted_sooner_than_ok() {
        let cache = HealthCache::new(Duration::from_secs(60), Duration::from_millis(1));
        let ws = WorkspaceId(Uuid::new_v4());
        cache.put(ws, sample_report(false));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(ws).is_none());
    }

    #[test]
    fn missing_workspace_is_none() {
        let cache = HealthCache::default();
        assert!(cache.get(WorkspaceId(Uuid::new_v4())).is_none());
    }
}
