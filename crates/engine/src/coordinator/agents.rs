#![forbid(unsafe_code)]

use super::{agent_json, envelope_result, Coordinator};
use crate::envelope::Envelope;
use crate::error::EngineError;
use ls_storage::{AgentJoinRequest, StoreError};
use serde_json::{json, Value};

#[derive(Clone, Debug, Default)]
pub struct JoinRequest {
    /// Caller-supplied stable id; generated when absent.
    pub agent_id: Option<String>,
    pub display_name: Option<String>,
    pub role: Option<String>,
    pub capabilities: Vec<String>,
    pub session_meta: Option<Value>,
}

impl Coordinator {
    pub fn agent_join(&mut self, request: JoinRequest) -> Envelope {
        envelope_result(self.try_agent_join(request))
    }

    fn try_agent_join(&mut self, request: JoinRequest) -> Result<Envelope, EngineError> {
        let session_meta_json = match &request.session_meta {
            Some(value) => {
                if !value.is_object() {
                    return Err(EngineError::InvalidInput {
                        field: "session_meta",
                        reason: "must be a JSON object".to_string(),
                    });
                }
                Some(value.to_string())
            }
            None => None,
        };

        let requested_id = request.agent_id.clone();
        let now_ms = self.now_ms();
        let agent = self
            .store
            .agent_register(
                AgentJoinRequest {
                    agent_id: request.agent_id,
                    display_name: request.display_name,
                    role: request.role,
                    capabilities: request.capabilities,
                    session_meta_json,
                },
                now_ms,
            )
            .map_err(|err| match err {
                StoreError::AgentExists => EngineError::AgentAlreadyExists {
                    agent_id: requested_id.unwrap_or_default(),
                },
                other => other.into(),
            })?;

        let agent_id = agent.agent_id.clone();
        Ok(Envelope::ok(json!({ "agent": agent_json(&agent) }))
            .next(
                "see what is claimable",
                format!("lodestar task next --agent {agent_id}"),
            )
            .next(
                "check your inbox",
                format!("lodestar msg list --agent {agent_id}"),
            ))
    }

    pub fn agent_list(&mut self) -> Envelope {
        envelope_result(self.try_agent_list())
    }

    fn try_agent_list(&mut self) -> Result<Envelope, EngineError> {
        let now_ms = self.now_ms();
        let agents = self.store.agents_list()?;
        let mut entries = Vec::with_capacity(agents.len());
        for agent in &agents {
            let leases = self.store.leases_by_agent(&agent.agent_id, now_ms, true)?;
            let mut value = agent_json(agent);
            value["active_leases"] = json!(leases
                .iter()
                .map(|l| l.task_id.as_str())
                .collect::<Vec<_>>());
            entries.push(value);
        }
        Ok(Envelope::ok(json!({
            "agents": entries,
            "count": agents.len(),
        })))
    }

    pub fn agent_find(&mut self, capability: Option<String>, role: Option<String>) -> Envelope {
        envelope_result(self.try_agent_find(capability, role))
    }

    fn try_agent_find(
        &mut self,
        capability: Option<String>,
        role: Option<String>,
    ) -> Result<Envelope, EngineError> {
        if capability.is_none() && role.is_none() {
            return Err(EngineError::InvalidInput {
                field: "capability",
                reason: "provide a capability or a role to search by".to_string(),
            });
        }
        let agents = self
            .store
            .agents_find(capability.as_deref(), role.as_deref())?;
        Ok(Envelope::ok(json!({
            "agents": agents.iter().map(agent_json).collect::<Vec<_>>(),
            "count": agents.len(),
        })))
    }

    pub fn agent_heartbeat(&mut self, agent_id: &str) -> Envelope {
        envelope_result(self.try_agent_heartbeat(agent_id))
    }

    fn try_agent_heartbeat(&mut self, agent_id: &str) -> Result<Envelope, EngineError> {
        let now_ms = self.now_ms();
        let agent = self
            .store
            .agent_heartbeat(agent_id, now_ms)
            .map_err(|err| match err {
                StoreError::UnknownAgent => EngineError::AgentNotRegistered {
                    agent_id: agent_id.to_string(),
                },
                other => other.into(),
            })?;
        Ok(Envelope::ok(json!({ "agent": agent_json(&agent) })))
    }

    pub fn agent_leave(&mut self, agent_id: &str, reason: Option<String>) -> Envelope {
        envelope_result(self.try_agent_leave(agent_id, reason))
    }

    fn try_agent_leave(
        &mut self,
        agent_id: &str,
        reason: Option<String>,
    ) -> Result<Envelope, EngineError> {
        let now_ms = self.now_ms();
        let active = self.store.leases_by_agent(agent_id, now_ms, true)?;
        self.store
            .agent_leave(agent_id, reason.as_deref(), now_ms)
            .map_err(|err| match err {
                StoreError::UnknownAgent => EngineError::AgentNotRegistered {
                    agent_id: agent_id.to_string(),
                },
                other => other.into(),
            })?;

        let mut envelope = Envelope::ok(json!({
            "agent_id": agent_id,
            "left": true,
        }));
        // Leaving is a heartbeat reset, not a release: held leases keep
        // running down on their own.
        for lease in &active {
            envelope = envelope.warn(format!(
                "lease on {} stays active until {}",
                lease.task_id,
                crate::clock::ms_to_rfc3339(lease.expires_at_ms)
            ));
        }
        Ok(envelope)
    }
}
