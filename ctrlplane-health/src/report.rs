//! The `{schema_version, ok, checks, summary, meta}` shape (§4.8).

use serde::Serialize;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Ordered so `Up < Degraded < Down` sorts worst-first when reversed;
    /// `top_issues` wants `Down` before `Degraded`.
    Up,
    Degraded,
    Down,
}

impl CheckStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CheckStatus::Up)
    }

    /// Lower is worse, matching the `severity` half of the `top_issues`
    /// ordering rule (`DOWN < DEGRADED`).
    fn severity_rank(&self) -> u8 {
        match self {
            CheckStatus::Down => 0,
            CheckStatus::Degraded => 1,
            CheckStatus::Up => 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub detail: Option<String>,
}

impl CheckResult {
    pub fn up() -> Self {
        Self { status: CheckStatus::Up, detail: None }
    }

    pub fn degraded(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Degraded, detail: Some(detail.into()) }
    }

    pub fn down(detail: impl Into<String>) -> Self {
        Self { status: CheckStatus::Down, detail: Some(detail.into()) }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Checks {
    pub db: CheckResult,
    pub kernel_schema_versions: CheckResult,
    pub evt_events: CheckResult,
    pub evt_events_idempotency: CheckResult,
    pub optional: OptionalChecks,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OptionalChecks {
    pub cron_watchdog: Option<CheckResult>,
    pub projection_lag: Option<CheckResult>,
    pub dlq_backlog: Option<CheckResult>,
    pub rate_limit_flood: Option<CheckResult>,
}

/// One entry in `summary.top_issues`: a non-`Up` check, named and aged
/// so an operator can see what's been wrong the longest.
#[derive(Debug, Clone, Serialize)]
pub struct TopIssue {
    pub kind: String,
    pub status: CheckStatus,
    pub age_sec: Option<i64>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub health_summary: CheckStatus,
    pub cron_freshness_sec: Option<i64>,
    pub projection_lag_sec: Option<i64>,
    pub dlq_backlog_count: Option<i64>,
    pub rate_limit_flood_detected: bool,
    pub active_incidents_count: i64,
    pub top_issues: Vec<TopIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub schema_version: u32,
    pub ok: bool,
    pub checks: Checks,
    pub summary: Summary,
    pub meta: Meta,
}

/// Sorts issues by the §4.8 rule: severity (`DOWN` before `DEGRADED`),
/// then `age_sec` descending with nulls last, then `kind` ascending.
pub fn sort_top_issues(issues: &mut [TopIssue]) {
    issues.sort_by(|a, b| {
        a.status
            .severity_rank()
            .cmp(&b.status.severity_rank())
            .then_with(|| match (a.age_sec, b.age_sec) {
                (Some(x), Some(y)) => y.cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.kind.cmp(&b.kind))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(kind: &str, status: CheckStatus, age_sec: Option<i64>) -> TopIssue {
        TopIssue { kind: kind.to_string(), status, age_sec, detail: None }
    }

    #[test]
    fn down_sorts_before_degraded_regardless_of_age() {
        let mut issues = vec![
            issue("dlq_backlog", CheckStatus::Degraded, Some(1000)),
            issue("db", CheckStatus::Down, Some(1)),
        ];
        sort_top_issues(&mut issues);
        assert_eq!(issues[0].kind, "db");
    }

    #[test]
    fn older_issues_sort_before_newer_ones_at_the_same_severity() {
        let mut issues = vec![
            issue("a", CheckStatus::Degraded, Some(5)),
            issue("b", CheckStatus::Degraded, Some(500)),
        ];
        sort_top_issues(&mut issues);
        assert_eq!(issues[0].kind, "b");
    }

    #[test]
    fn missing_age_sorts_last_within_the_same_severity() {
        let mut issues = vec![
            issue("a", CheckStatus::Degraded, None),
            issue("b", CheckStatus::Degraded, Some(1)),
        ];
        sort_top_issues(&mut issues);
        assert_eq!(issues[0].kind, "b");
    }

    #[test]
    fn ties_break_on_kind_ascending() {
        let mut issues = vec![
            issue("zeta", CheckStatus::Down, Some(1)),
            issue("alpha", CheckStatus::Down, Some(1)),
        ];
        sort_top_issues(&mut issues);
        assert_eq!(issues[0].kind, "alpha");
    }
}
