//! Agent lifecycle state machine (§4.6): a daily survival rollup
//! (success/fail/learning counts, budget utilization) drives
//! active → probation → sunset transitions, gated by a "consecutive
//! risky days" hysteresis so one bad day doesn't demote an agent.

use std::sync::Arc;

use chrono::NaiveDate;
use ctrlplane_domain::event::{Actor, EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_eventlog::append;
use ctrlplane_store::{AgentSurvivalLedger, ProjectionReader, SurvivalLedgerRepository};
use sqlx::PgConnection;

use crate::error::{AutomationError, AutomationResult};

const PROBATION_AFTER_RISKY_DAYS: i32 = 3;
const SUNSET_AFTER_RISKY_DAYS: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentLifecycleState {
    Active,
    Probation,
    Sunset,
}

impl AgentLifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentLifecycleState::Active => "active",
            AgentLifecycleState::Probation => "probation",
            AgentLifecycleState::Sunset => "sunset",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "probation" => AgentLifecycleState::Probation,
            "sunset" => AgentLifecycleState::Sunset,
            _ => AgentLifecycleState::Active,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SurvivalRollup {
    pub success_count: i64,
    pub fail_count: i64,
    pub learning_count: i64,
    pub budget_utilization: f64,
}

impl SurvivalRollup {
    /// A day counts as risky if failures outnumber successes, or if the
    /// agent burned through its entire budget allotment.
    fn is_risky(&self) -> bool {
        self.fail_count > self.success_count || self.budget_utilization > 1.0
    }
}

/// Pure transition: given the current state, the hysteresis counter
/// going into today, and today's rollup, returns the next state and
/// the hysteresis counter going into tomorrow. Sunset is terminal —
/// it never recovers back to active automatically (requires an
/// operator decision, out of scope here).
pub fn transition(
    current: AgentLifecycleState,
    consecutive_risky_days: i32,
    rollup: &SurvivalRollup,
) -> (AgentLifecycleState, i32) {
    if current == AgentLifecycleState::Sunset {
        return (current, consecutive_risky_days);
    }

    let next_streak = if rollup.is_risky() { consecutive_risky_days + 1 } else { 0 };

    let next_state = if next_streak >= SUNSET_AFTER_RISKY_DAYS {
        AgentLifecycleState::Sunset
    } else if next_streak >= PROBATION_AFTER_RISKY_DAYS {
        AgentLifecycleState::Probation
    } else {
        AgentLifecycleState::Active
    };

    (next_state, next_streak)
}

/// Applies one day's rollup for an agent: reads the current lifecycle
/// state and hysteresis counter, computes the next state, and — only
/// if it actually changed — appends `AgentLifecycleTransitioned` and
/// saves the updated ledger row.
pub async fn apply_daily_rollup(
    conn: &mut PgConnection,
    projections: &Arc<dyn ProjectionReader>,
    ledger: &Arc<dyn SurvivalLedgerRepository>,
    workspace: WorkspaceId,
    agent_id: &str,
    rollup_date: NaiveDate,
    rollup: SurvivalRollup,
) -> AutomationResult<()> {
    let current_state = projections
        .find_agent(workspace, agent_id)
        .await?
        .map(|a| AgentLifecycleState::parse(&a.lifecycle_state))
        .unwrap_or(AgentLifecycleState::Active);

    let prior = ledger.get(workspace, agent_id).await?;
    let consecutive_risky_days = prior.as_ref().map(|l| l.consecutive_risky_days).unwrap_or(0);

    let (next_state, next_streak) = transition(current_state, consecutive_risky_days, &rollup);

    ledger
        .save(&AgentSurvivalLedger {
            workspace_id: workspace,
            agent_id: agent_id.to_string(),
            consecutive_risky_days: next_streak,
            last_rollup_date: rollup_date,
        })
        .await?;

    if next_state == current_state {
        return Ok(());
    }

    let kind = EventKind::AgentLifecycleTransitioned {
        agent_id: agent_id.to_string(),
        from_state: current_state.as_str().to_string(),
        to_state: next_state.as_str().to_string(),
    };
    let draft = EventDraft::from_kind(
        workspace,
        Actor::system(),
        StreamRef::new(StreamType::Agent, agent_id),
        CorrelationId::new(),
        None,
        Some(format!("agent.lifecycle_transitioned:{workspace}:{agent_id}:{rollup_date}")),
        &kind,
    )
    .map_err(AutomationError::Domain)?;
    append::append(conn, workspace, draft).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn healthy() -> SurvivalRollup {
        SurvivalRollup { success_count: 10, fail_count: 1, learning_count: 1, budget_utilization: 0.4 }
    }

    fn risky() -> SurvivalRollup {
        SurvivalRollup { success_count: 1, fail_count: 5, learning_count: 0, budget_utilization: 0.5 }
    }

    #[test]
    fn a_single_risky_day_does_not_demote() {
        let (state, streak) = transition(AgentLifecycleState::Active, 0, &risky());
        assert_eq!(state, AgentLifecycleState::Active);
        assert_eq!(streak, 1);
    }

    #[test]
    fn three_consecutive_risky_days_triggers_probation() {
        let (state, streak) = transition(AgentLifecycleState::Active, 2, &risky());
        assert_eq!(state, AgentLifecycleState::Probation);
        assert_eq!(streak, 3);
    }

    #[test]
    fn six_consecutive_risky_days_triggers_sunset() {
        let (state, streak) = transition(AgentLifecycleState::Probation, 5, &risky());
        assert_eq!(state, AgentLifecycleState::Sunset);
        assert_eq!(streak, 6);
    }

    #[test]
    fn a_healthy_day_resets_the_streak_and_recovers_from_probation() {
        let (state, streak) = transition(AgentLifecycleState::Probation, 4, &healthy());
        assert_eq!(state, AgentLifecycleState::Active);
        assert_eq!(streak, 0);
    }

    #[test]
    fn sunset_is_terminal() {
        let (state, _) = transition(AgentLifecycleState::Sunset, 10, &healthy());
        assert_eq!(state, AgentLifecycleState::Sunset);
    }
}
