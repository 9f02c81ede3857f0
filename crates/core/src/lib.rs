#![forbid(unsafe_code)]

pub mod duration;

pub mod ids {
    /// Identifier of a task in the committed spec.
    ///
    /// Task ids are chosen by humans (`T001`, `AUTH-12`), so the charset is
    /// deliberately narrow: ASCII letters, digits, and hyphens, 1..=64 chars.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct TaskId(String);

    impl TaskId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn into_string(self) -> String {
            self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, TaskIdError> {
            let value = value.into();
            validate_task_id(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for TaskId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum TaskIdError {
        Empty,
        TooLong,
        InvalidChar { ch: char, index: usize },
    }

    impl std::fmt::Display for TaskIdError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Empty => write!(f, "task id must not be empty"),
                Self::TooLong => write!(f, "task id must be at most 64 characters"),
                Self::InvalidChar { ch, index } => {
                    write!(f, "task id has invalid character {ch:?} at index {index}")
                }
            }
        }
    }

    impl std::error::Error for TaskIdError {}

    fn validate_task_id(value: &str) -> Result<(), TaskIdError> {
        if value.is_empty() {
            return Err(TaskIdError::Empty);
        }
        if value.len() > 64 {
            return Err(TaskIdError::TooLong);
        }
        for (index, ch) in value.chars().enumerate() {
            if ch.is_ascii_alphanumeric() || ch == '-' {
                continue;
            }
            return Err(TaskIdError::InvalidChar { ch, index });
        }
        Ok(())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn accepts_typical_ids() {
            for id in ["T001", "AUTH-001", "a", "refactor-parser-2"] {
                assert!(TaskId::try_new(id).is_ok(), "rejected {id}");
            }
        }

        #[test]
        fn rejects_empty_and_oversized() {
            assert_eq!(TaskId::try_new(""), Err(TaskIdError::Empty));
            assert_eq!(TaskId::try_new("x".repeat(65)), Err(TaskIdError::TooLong));
            assert!(TaskId::try_new("x".repeat(64)).is_ok());
        }

        #[test]
        fn rejects_punctuation() {
            assert_eq!(
                TaskId::try_new("a b"),
                Err(TaskIdError::InvalidChar { ch: ' ', index: 1 })
            );
            assert!(TaskId::try_new("a/b").is_err());
            assert!(TaskId::try_new("a_b").is_err());
        }
    }
}

pub mod model {
    /// Task status in the spec plane. "Claimed" is a runtime notion (an
    /// active lease), not a status.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum TaskStatus {
        Ready,
        Done,
        Verified,
        Deleted,
    }

    impl TaskStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Ready => "ready",
                Self::Done => "done",
                Self::Verified => "verified",
                Self::Deleted => "deleted",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "ready" => Some(Self::Ready),
                "done" => Some(Self::Done),
                "verified" => Some(Self::Verified),
                "deleted" => Some(Self::Deleted),
                _ => None,
            }
        }

        pub const ALL: [TaskStatus; 4] = [
            TaskStatus::Ready,
            TaskStatus::Done,
            TaskStatus::Verified,
            TaskStatus::Deleted,
        ];
    }

    impl std::fmt::Display for TaskStatus {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// Recipient kind for a message: a registered agent, or a task thread.
    /// Task threads accept any id (the task may not exist yet, or may have
    /// been archived) — only agent recipients are validated.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Recipient {
        Agent,
        Task,
    }

    impl Recipient {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Agent => "agent",
                Self::Task => "task",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            match value {
                "agent" => Some(Self::Agent),
                "task" => Some(Self::Task),
                _ => None,
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn status_round_trips() {
            for status in TaskStatus::ALL {
                assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
            }
            assert_eq!(TaskStatus::parse("todo"), None);
        }

        #[test]
        fn recipient_round_trips() {
            assert_eq!(Recipient::parse("agent"), Some(Recipient::Agent));
            assert_eq!(Recipient::parse("task"), Some(Recipient::Task));
            assert_eq!(Recipient::parse("broadcast"), None);
        }
    }
}

pub mod events {
    /// Closed set of event types appended by the engine. Consumers match on
    /// these strings; adding a variant is a contract change.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum EventType {
        AgentJoined,
        AgentLeft,
        AgentHeartbeat,
        TaskClaimed,
        TaskReleased,
        TaskDone,
        TaskVerified,
        TaskDeleted,
        MessageSent,
        MessageRead,
        LeaseOrphaned,
    }

    impl EventType {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::AgentJoined => "agent.joined",
                Self::AgentLeft => "agent.left",
                Self::AgentHeartbeat => "agent.heartbeat",
                Self::TaskClaimed => "task.claimed",
                Self::TaskReleased => "task.released",
                Self::TaskDone => "task.done",
                Self::TaskVerified => "task.verified",
                Self::TaskDeleted => "task.deleted",
                Self::MessageSent => "message.sent",
                Self::MessageRead => "message.read",
                Self::LeaseOrphaned => "lease.orphaned",
            }
        }

        pub fn parse(value: &str) -> Option<Self> {
            Self::ALL.into_iter().find(|t| t.as_str() == value)
        }

        pub const ALL: [EventType; 11] = [
            EventType::AgentJoined,
            EventType::AgentLeft,
            EventType::AgentHeartbeat,
            EventType::TaskClaimed,
            EventType::TaskReleased,
            EventType::TaskDone,
            EventType::TaskVerified,
            EventType::TaskDeleted,
            EventType::MessageSent,
            EventType::MessageRead,
            EventType::LeaseOrphaned,
        ];
    }

    impl std::fmt::Display for EventType {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

}
