#![forbid(unsafe_code)]

use super::{envelope_result, message_json, Coordinator};
use crate::envelope::Envelope;
use crate::error::EngineError;
use ls_core::model::Recipient;
use ls_storage::{AckOutcome, InboxFilters, SearchFilters, StoreError};
use serde_json::json;

const LIST_LIMIT_DEFAULT: usize = 50;

#[derive(Clone, Debug)]
pub struct MessageSendRequest {
    pub from_agent_id: String,
    pub to_type: String,
    pub to_id: String,
    pub body: String,
    pub subject: Option<String>,
    pub severity: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct MessageListRequest {
    pub agent_id: String,
    pub unread_only: bool,
    pub from_agent_id: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<usize>,
    pub mark_read: bool,
}

#[derive(Clone, Debug, Default)]
pub struct MessageSearchRequest {
    pub keyword: Option<String>,
    pub from_agent_id: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<usize>,
}

impl Coordinator {
    pub fn message_send(&mut self, request: MessageSendRequest) -> Envelope {
        envelope_result(self.try_message_send(request))
    }

    fn try_message_send(&mut self, request: MessageSendRequest) -> Result<Envelope, EngineError> {
        let to_type =
            Recipient::parse(&request.to_type).ok_or_else(|| EngineError::InvalidInput {
                field: "to_type",
                reason: format!("unknown recipient kind {:?}; use agent|task", request.to_type),
            })?;
        self.require_agent(&request.from_agent_id)?;
        if to_type == Recipient::Agent && !self.store.agent_exists(&request.to_id)? {
            return Err(EngineError::MessageRecipientInvalid {
                to_id: request.to_id,
            });
        }

        let now_ms = self.now_ms();
        let message = self
            .store
            .message_send(
                ls_storage::MessageSendRequest {
                    from_agent_id: request.from_agent_id,
                    to_type,
                    to_id: request.to_id,
                    body: request.body,
                    subject: request.subject,
                    severity: request.severity,
                    task_id: request.task_id,
                },
                now_ms,
            )
            .map_err(|err| match err {
                StoreError::BodyTooLarge { len } => EngineError::MessageTooLarge { len },
                other => other.into(),
            })?;

        let mut envelope = Envelope::ok(json!({ "message": message_json(&message) }));
        if message.to_type == Recipient::Task {
            envelope = envelope.next(
                "read the thread",
                format!("lodestar msg thread {}", message.to_id),
            );
        }
        Ok(envelope)
    }

    pub fn message_list(&mut self, request: MessageListRequest) -> Envelope {
        envelope_result(self.try_message_list(request))
    }

    fn try_message_list(&mut self, request: MessageListRequest) -> Result<Envelope, EngineError> {
        self.require_agent(&request.agent_id)?;
        let now_ms = self.now_ms();
        let messages = self.store.messages_inbox(
            &request.agent_id,
            &InboxFilters {
                unread_only: request.unread_only,
                from_agent_id: request.from_agent_id,
                since_ms: request.since_ms,
                until_ms: request.until_ms,
                limit: request.limit.unwrap_or(LIST_LIMIT_DEFAULT),
            },
            request.mark_read,
            now_ms,
        )?;

        let unread = messages.iter().filter(|m| m.read_at_ms.is_none()).count();
        Ok(Envelope::ok(json!({
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            "count": messages.len(),
            "unread": unread,
        })))
    }

    pub fn message_thread(
        &mut self,
        task_id: &str,
        since_ms: Option<i64>,
        limit: Option<usize>,
    ) -> Envelope {
        envelope_result(self.try_message_thread(task_id, since_ms, limit))
    }

    fn try_message_thread(
        &mut self,
        task_id: &str,
        since_ms: Option<i64>,
        limit: Option<usize>,
    ) -> Result<Envelope, EngineError> {
        if task_id.trim().is_empty() {
            return Err(EngineError::InvalidInput {
                field: "task_id",
                reason: "must not be empty".to_string(),
            });
        }
        // Thread ids are deliberately not validated against the spec: a
        // thread may predate its task or outlive it.
        let messages =
            self.store
                .messages_thread(task_id, since_ms, limit.unwrap_or(LIST_LIMIT_DEFAULT))?;
        Ok(Envelope::ok(json!({
            "task_id": task_id,
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            "count": messages.len(),
        })))
    }

    pub fn message_search(&mut self, request: MessageSearchRequest) -> Envelope {
        envelope_result(self.try_message_search(request))
    }

    fn try_message_search(
        &mut self,
        request: MessageSearchRequest,
    ) -> Result<Envelope, EngineError> {
        if request.keyword.is_none()
            && request.from_agent_id.is_none()
            && request.since_ms.is_none()
            && request.until_ms.is_none()
        {
            return Err(EngineError::InvalidInput {
                field: "keyword",
                reason: "search needs at least one of keyword, from, since, until".to_string(),
            });
        }
        let messages = self.store.messages_search(&SearchFilters {
            keyword: request.keyword,
            from_agent_id: request.from_agent_id,
            since_ms: request.since_ms,
            until_ms: request.until_ms,
            limit: request.limit.unwrap_or(LIST_LIMIT_DEFAULT),
        })?;
        Ok(Envelope::ok(json!({
            "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
            "count": messages.len(),
        })))
    }

    pub fn message_ack(&mut self, agent_id: &str, message_id: i64) -> Envelope {
        envelope_result(self.try_message_ack(agent_id, message_id))
    }

    fn try_message_ack(
        &mut self,
        agent_id: &str,
        message_id: i64,
    ) -> Result<Envelope, EngineError> {
        self.require_agent(agent_id)?;
        let now_ms = self.now_ms();
        match self.store.message_ack(agent_id, message_id, now_ms)? {
            AckOutcome::Acked(message) => {
                Ok(Envelope::ok(json!({ "message": message_json(&message) })))
            }
            AckOutcome::AlreadyRead(message) => {
                Ok(Envelope::ok(json!({ "message": message_json(&message) }))
                    .warn(format!("message {message_id} was already read")))
            }
            AckOutcome::NotAddressee => Err(EngineError::InvalidInput {
                field: "message_id",
                reason: format!("message {message_id} is not addressed to {agent_id}"),
            }),
            AckOutcome::NotFound => Err(EngineError::InvalidInput {
                field: "message_id",
                reason: format!("message {message_id} not found"),
            }),
        }
    }
}
