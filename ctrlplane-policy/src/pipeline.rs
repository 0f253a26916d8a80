//! The decision pipeline itself: quarantine → kill switches →
//! capability token → DAC labels → quota → action policy, first match
//! wins (§4.4).

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use ctrlplane_domain::event::{EventDraft, EventKind, StreamRef, StreamType};
use ctrlplane_domain::ids::{CorrelationId, WorkspaceId};
use ctrlplane_eventlog::idempotency::IdempotencyKey;
use ctrlplane_store::{CapabilityTokenRepository, ProjectionReader, RateLimitBucket, RateLimitRepository};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::error::PolicyError;
use crate::kill_switch::KillSwitchSource;
use crate::mistake::{record_mistake, REPEAT_THRESHOLD};
use crate::request::{ActionKind, DataAccessMode, Decision, DecisionRequest, Outcome, ResourceLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    Shadow,
    Enforce,
}

impl EnforcementMode {
    /// Re-read `POLICY_ENFORCEMENT_MODE` from the environment. Operators
    /// toggle enforcement without a restart, so this is called fresh on
    /// every evaluation rather than cached once at startup.
    pub fn read_from_env() -> Self {
        match std::env::var("POLICY_ENFORCEMENT_MODE").unwrap_or_else(|_| "enforce".to_string()).as_str() {
            "shadow" => EnforcementMode::Shadow,
            _ => EnforcementMode::Enforce,
        }
    }
}

enum DataAccessVerdict {
    Justified(String),
    Unjustified,
}

pub struct PolicyPipeline {
    pool: PgPool,
    projections: Arc<dyn ProjectionReader>,
    tokens: Arc<dyn CapabilityTokenRepository>,
    quota: Arc<dyn RateLimitRepository>,
    kill_switches: Arc<dyn KillSwitchSource>,
    mode: Arc<ArcSwap<EnforcementMode>>,
    quota_capacity_per_hour: i32,
    rate_limit_streak_threshold: i32,
    rate_limit_incident_mute_sec: i64,
}

impl PolicyPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        projections: Arc<dyn ProjectionReader>,
        tokens: Arc<dyn CapabilityTokenRepository>,
        quota: Arc<dyn RateLimitRepository>,
        kill_switches: Arc<dyn KillSwitchSource>,
        mode: Arc<ArcSwap<EnforcementMode>>,
        quota_capacity_per_hour: i32,
        rate_limit_streak_threshold: i32,
        rate_limit_incident_mute_sec: i64,
    ) -> Self {
        Self {
            pool,
            projections,
            tokens,
            quota,
            kill_switches,
            mode,
            quota_capacity_per_hour,
            rate_limit_streak_threshold,
            rate_limit_incident_mute_sec,
        }
    }

    #[instrument(skip(self, req, correlation_id))]
    pub async fn decide(
        &self,
        req: &DecisionRequest,
        correlation_id: &CorrelationId,
    ) -> Result<Decision, PolicyError> {
        let true_decision = self.evaluate(req, correlation_id).await?;

        if true_decision.outcome != Outcome::Allow {
            let pattern = format!("{}:{}", true_decision.reason_code, action_pattern(&req.action));
            let count = record_mistake(&self.pool, req.workspace, true_decision.reason_code, &pattern).await?;
            if count == REPEAT_THRESHOLD {
                self.emit_learning(req, correlation_id, true_decision.reason_code, &pattern).await?;
            }
        }

        // Re-read per evaluation: operators toggle enforcement mode via
        // the environment without restarting the daemon.
        self.mode.store(Arc::new(EnforcementMode::read_from_env()));
        match **self.mode.load() {
            EnforcementMode::Enforce => Ok(true_decision),
            EnforcementMode::Shadow => Ok(Decision::allow("shadow_mode_override")),
        }
    }

    async fn evaluate(&self, req: &DecisionRequest, correlation_id: &CorrelationId) -> Result<Decision, PolicyError> {
        // 1. Agent quarantine.
        if let Some(agent) = self.projections.find_agent(req.workspace, &req.actor.actor_id).await? {
            if agent.lifecycle_state == "quarantined" {
                return Ok(Decision::deny("agent_quarantined"));
            }
        }

        // 2. Kill switches.
        if self.kill_switches.is_active(req.action.env_kill_switch_name()) {
            return Ok(Decision::deny("kill_switch_active"));
        }

        // 3. Capability token.
        if let Some(decision) = self.check_capability_token(req).await? {
            return Ok(decision);
        }

        // 4. DAC labels.
        if let ActionKind::DataAccess { .. } = &req.action {
            if let Some(decision) = self.check_dac_labels(req, correlation_id).await? {
                return Ok(decision);
            }
        }

        // 5. Quota: per-agent-minute tier first (catches a single agent
        // hammering the system), then the per-workspace-hour ceiling.
        let agent_minute_key = format!("agent_minute:{}:{}", req.workspace, req.actor.actor_id);
        if let Some(decision) = self
            .check_rate_limit_tier(req, correlation_id, &agent_minute_key, 20, 20 * 60)
            .await?
        {
            return Ok(decision);
        }

        let workspace_hour_key = format!("egress:{}", req.workspace);
        if let Some(decision) = self
            .check_rate_limit_tier(
                req,
                correlation_id,
                &workspace_hour_key,
                self.quota_capacity_per_hour,
                self.quota_capacity_per_hour,
            )
            .await?
        {
            return Ok(decision);
        }

        // 6. Action policy.
        if req.action.is_external_write() {
            let approval_id = self
                .ensure_approval(req, correlation_id, "external_write_requires_approval")
                .await?;
            return Ok(Decision::require_approval("external_write_requires_approval", approval_id));
        }

        Ok(Decision::allow("internal_read_allowed"))
    }

    /// Check one rate-limit bucket. `Ok(None)` means a token was
    /// consumed and the caller may proceed. `Ok(Some(deny))` means the
    /// bucket is exhausted but the flooding streak hasn't crossed the
    /// threshold yet. `Err(RateLimited)` means either the streak just
    /// crossed the threshold (an `agent_flooding` incident was opened)
    /// or the bucket is still muted from a prior crossing.
    async fn check_rate_limit_tier(
        &self,
        req: &DecisionRequest,
        correlation_id: &CorrelationId,
        bucket_key: &str,
        capacity: i32,
        refill_per_hour: i32,
    ) -> Result<Option<Decision>, PolicyError> {
        let bucket = self.quota.get_or_init(req.workspace, bucket_key, capacity, refill_per_hour).await?;
        let now = Utc::now();

        if bucket.is_muted(now) {
            return Err(PolicyError::RateLimited { scope: bucket_key.to_string() });
        }

        match bucket.try_consume(now) {
            Some(consumed) => {
                self.quota.save(&consumed, bucket.tokens_remaining).await?;
                Ok(None)
            }
            None => {
                let throttled = bucket.throttled(now);
                if throttled.consecutive_throttled >= self.rate_limit_streak_threshold {
                    let muted_until = now + chrono::Duration::seconds(self.rate_limit_incident_mute_sec);
                    self.open_flooding_incident(req, correlation_id, bucket_key).await?;
                    self.quota
                        .save_throttle(&RateLimitBucket { consecutive_throttled: 0, muted_until: Some(muted_until), ..throttled })
                        .await?;
                    return Err(PolicyError::RateLimited { scope: bucket_key.to_string() });
                }
                self.quota.save_throttle(&throttled).await?;
                Ok(Some(Decision::deny("quota_exceeded")))
            }
        }
    }

    async fn open_flooding_incident(
        &self,
        req: &DecisionRequest,
        correlation_id: &CorrelationId,
        bucket_key: &str,
    ) -> Result<(), PolicyError> {
        let incident_id = Uuid::now_v7().to_string();
        let idem_key = IdempotencyKey::build(
            "incident",
            "open",
            req.workspace,
            "agent_flooding",
            bucket_key,
            Some(&Utc::now().format("%Y-%m-%dT%H:%M").to_string()),
        );
        let draft = EventDraft::from_kind(
            req.workspace,
            req.actor.clone(),
            StreamRef::new(StreamType::Incident, incident_id.clone()),
            correlation_id.clone(),
            None,
            Some(idem_key),
            &EventKind::IncidentOpened {
                incident_id,
                category: "agent_flooding".to_string(),
                summary: format!("{} exceeded its rate limit {} times in a row", bucket_key, self.rate_limit_streak_threshold),
            },
        )?;
        let mut tx = self.pool.begin().await?;
        ctrlplane_eventlog::append::append(&mut tx, req.workspace, draft).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn check_capability_token(&self, req: &DecisionRequest) -> Result<Option<Decision>, PolicyError> {
        let Some(token_id) = req.capability_token_id else {
            return Ok(None);
        };
        let live_tokens = self.tokens.find_live(req.workspace, &req.actor.actor_id).await?;
        let Some(token) = live_tokens.iter().find(|t| t.token_id == token_id) else {
            return Ok(Some(Decision::deny("capability_token_principal_mismatch")));
        };
        if !token.is_live(Utc::now()) {
            return Ok(Some(Decision::deny("capability_token_expired")));
        }

        let scope_ok = match &req.action {
            ActionKind::ToolInvocation { tool } => {
                token.grants(&format!("tools:{tool}")) || token.grants("tools")
            }
            ActionKind::Egress { target_host } => {
                token.grants(&format!("egress_domains:{target_host}")) || token.grants("egress_domains")
            }
            ActionKind::DataAccess { .. } => token.grants("data_access"),
            ActionKind::ExternalWrite | ActionKind::InternalRead => true,
        };
        if !scope_ok {
            let reason = match &req.action {
                ActionKind::ToolInvocation { .. } => "capability_scope_tool_not_allowed",
                ActionKind::Egress { .. } => "capability_scope_domain_not_allowed",
                _ => "capability_scope_not_allowed",
            };
            return Ok(Some(Decision::deny(reason)));
        }

        if let Some(room_id) = &req.room_id {
            if !token.grants(&format!("rooms:{room_id}")) && !token.grants("rooms") {
                return Ok(Some(Decision::deny("capability_scope_room_not_allowed")));
            }
        }

        Ok(None)
    }

    async fn check_dac_labels(
        &self,
        req: &DecisionRequest,
        correlation_id: &CorrelationId,
    ) -> Result<Option<Decision>, PolicyError> {
        let ActionKind::DataAccess { resource, mode, label, resource_room_id, purpose_tag, required_purpose_tag, justification } = &req.action else {
            return Ok(None);
        };

        match label {
            Some(ResourceLabel::Restricted) => {
                if resource_room_id.as_deref() != req.room_id.as_deref() {
                    return Ok(Some(Decision::deny("data_access_restricted_room_mismatch")));
                }
            }
            Some(ResourceLabel::Confidential) if matches!(mode, DataAccessMode::Read) => {
                let purpose_matches = match required_purpose_tag {
                    Some(required) => purpose_tag.as_deref() == Some(required.as_str()),
                    None => purpose_tag.is_some(),
                };
                if !purpose_matches {
                    if let Some(justification) = justification {
                        self.emit_data_access(req, correlation_id, resource, DataAccessVerdict::Justified(justification.clone()))
                            .await?;
                        return Ok(Some(Decision::allow("data_access_justified")));
                    }
                    self.emit_data_access(req, correlation_id, resource, DataAccessVerdict::Unjustified).await?;
                    let approval_id = self
                        .ensure_approval(req, correlation_id, "data_access_purpose_hint_mismatch")
                        .await?;
                    return Ok(Some(Decision::require_approval("data_access_purpose_hint_mismatch", approval_id)));
                }
            }
            _ => {}
        }
        Ok(None)
    }

    async fn emit_data_access(
        &self,
        req: &DecisionRequest,
        correlation_id: &CorrelationId,
        resource: &str,
        verdict: DataAccessVerdict,
    ) -> Result<(), PolicyError> {
        let mut tx = self.pool.begin().await?;
        let request_id = Uuid::now_v7().to_string();
        let kind = match &verdict {
            DataAccessVerdict::Justified(_) => {
                EventKind::DataAccessJustified { request_id: request_id.clone(), resource: resource.to_string() }
            }
            DataAccessVerdict::Unjustified => {
                EventKind::DataAccessPurposeHintMismatch { request_id: request_id.clone(), resource: resource.to_string() }
            }
        };
        let draft = EventDraft::from_kind(
            req.workspace,
            req.actor.clone(),
            StreamRef::new(StreamType::Workspace, req.workspace.to_string()),
            correlation_id.clone(),
            None,
            None,
            &kind,
        )?;
        ctrlplane_eventlog::append::append(&mut tx, req.workspace, draft).await?;

        // The purpose-hint mismatch event above records the inquiry;
        // absent a justification, the access itself is also recorded as
        // unjustified so the learning loop has both signals to act on.
        if matches!(verdict, DataAccessVerdict::Unjustified) {
            let unjustified = EventDraft::from_kind(
                req.workspace,
                req.actor.clone(),
                StreamRef::new(StreamType::Workspace, req.workspace.to_string()),
                correlation_id.clone(),
                None,
                None,
                &EventKind::DataAccessUnjustified { request_id, resource: resource.to_string() },
            )?;
            ctrlplane_eventlog::append::append(&mut tx, req.workspace, unjustified).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Find-or-create an approval for this action. Relies on the event
    /// log's own idempotency uniqueness rather than a separate lookup:
    /// the approval-creation idempotency key is derived from the
    /// action's own identity, so a repeat decision on the same action
    /// always resolves to the same approval.
    async fn ensure_approval(
        &self,
        req: &DecisionRequest,
        correlation_id: &CorrelationId,
        reason_code: &str,
    ) -> Result<String, PolicyError> {
        let approval_id = Uuid::now_v7().to_string();
        let idem_key = IdempotencyKey::build(
            "approval",
            "create",
            req.workspace,
            action_entity_type(&req.action),
            &action_identity(&req.action),
            Some(reason_code),
        );
        let kind = EventKind::ApprovalRequested {
            approval_id: approval_id.clone(),
            entity_type: action_entity_type(&req.action).to_string(),
            entity_id: action_identity(&req.action),
        };
        let draft = EventDraft::from_kind(
            req.workspace,
            req.actor.clone(),
            StreamRef::new(StreamType::Workspace, req.workspace.to_string()),
            correlation_id.clone(),
            None,
            Some(idem_key),
            &kind,
        )?;
        let mut tx = self.pool.begin().await?;
        let appended = ctrlplane_eventlog::append::append(&mut tx, req.workspace, draft).await?;
        tx.commit().await?;

        match appended.outcome {
            ctrlplane_eventlog::AppendOutcome::Inserted => Ok(approval_id),
            ctrlplane_eventlog::AppendOutcome::IdempotentReplay => {
                Ok(appended.row.data["approval_id"].as_str().unwrap_or(&approval_id).to_string())
            }
        }
    }

    async fn emit_learning(
        &self,
        req: &DecisionRequest,
        correlation_id: &CorrelationId,
        reason_code: &str,
        pattern: &str,
    ) -> Result<(), PolicyError> {
        let mut tx = self.pool.begin().await?;
        let repeated = EventDraft::from_kind(
            req.workspace,
            req.actor.clone(),
            StreamRef::new(StreamType::Workspace, req.workspace.to_string()),
            correlation_id.clone(),
            None,
            None,
            &EventKind::MistakeRepeated {
                reason_code: reason_code.to_string(),
                pattern: pattern.to_string(),
                count: REPEAT_THRESHOLD,
            },
        )?;
        ctrlplane_eventlog::append::append(&mut tx, req.workspace, repeated).await?;

        let learned = EventDraft::from_kind(
            req.workspace,
            req.actor.clone(),
            StreamRef::new(StreamType::Workspace, req.workspace.to_string()),
            correlation_id.clone(),
            None,
            None,
            &EventKind::ConstraintLearned {
                reason_code: reason_code.to_string(),
                pattern: pattern.to_string(),
            },
        )?;
        ctrlplane_eventlog::append::append(&mut tx, req.workspace, learned).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn action_pattern(action: &ActionKind) -> String {
    match action {
        ActionKind::ToolInvocation { tool } => format!("tool:{tool}"),
        ActionKind::Egress { target_host } => format!("egress:{target_host}"),
        ActionKind::DataAccess { resource, .. } => format!("data:{resource}"),
        ActionKind::ExternalWrite => "external_write".to_string(),
        ActionKind::InternalRead => "internal_read".to_string(),
    }
}

fn action_entity_type(action: &ActionKind) -> &'static str {
    match action {
        ActionKind::ToolInvocation { .. } => "tool_call",
        ActionKind::Egress { .. } => "egress_request",
        ActionKind::DataAccess { .. } => "data_access_request",
        ActionKind::ExternalWrite => "external_write",
        ActionKind::InternalRead => "internal_read",
    }
}

fn action_identity(action: &ActionKind) -> String {
    match action {
        ActionKind::ToolInvocation { tool } => tool.clone(),
        ActionKind::Egress { target_host } => target_host.clone(),
        ActionKind::DataAccess { resource, .. } => resource.clone(),
        ActionKind::ExternalWrite | ActionKind::InternalRead => "default".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_pattern_embeds_the_target() {
        assert_eq!(action_pattern(&ActionKind::Egress { target_host: "evil.example".into() }), "egress:evil.example");
    }
}
