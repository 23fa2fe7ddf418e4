use crate::error::ModelError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire-level event kind. Terminal kinds close live streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Info,
    State,
    Error,
    Completed,
    Failed,
    Timeout,
    Canceled,
}

impl EventType {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventType::Completed
                | EventType::Failed
                | EventType::Timeout
                | EventType::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Info => "info",
            EventType::State => "state",
            EventType::Error => "error",
            EventType::Completed => "completed",
            EventType::Failed => "failed",
            EventType::Timeout => "timeout",
            EventType::Canceled => "canceled",
        }
    }
}

impl FromStr for EventType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "info" => Ok(EventType::Info),
            "state" => Ok(EventType::State),
            "error" => Ok(EventType::Error),
            "completed" => Ok(EventType::Completed),
            "failed" => Ok(EventType::Failed),
            "timeout" => Ok(EventType::Timeout),
            "canceled" => Ok(EventType::Canceled),
            other => Err(ModelError::UnknownEventType(other.to_string())),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in a job's bounded event log, also broadcast on the job's
/// pub/sub channel. `ts` is the producing replica's wall clock in
/// milliseconds; consumers must not rely on cross-job ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub ts: i64,
    #[serde(rename = "type")]
    pub kind: EventType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JobEvent {
    pub fn new(ts: i64, kind: EventType, message: impl Into<String>) -> Self {
        JobEvent {
            ts,
            kind,
            message: message.into(),
            progress: None,
            data: None,
        }
    }

    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_kinds_close_streams() {
        assert!(EventType::Completed.is_terminal());
        assert!(EventType::Failed.is_terminal());
        assert!(EventType::Timeout.is_terminal());
        assert!(EventType::Canceled.is_terminal());
        assert!(!EventType::Info.is_terminal());
        assert!(!EventType::State.is_terminal());
        assert!(!EventType::Error.is_terminal());
    }

    #[test]
    fn event_serializes_with_wire_field_names() {
        let ev = JobEvent::new(42, EventType::State, "processing")
            .with_progress(40);
        let value = serde_json::to_value(&ev).unwrap();
        assert_eq!(value["ts"], 42);
        assert_eq!(value["type"], "state");
        assert_eq!(value["progress"], 40);
        assert!(value.get("data").is_none());
    }
}
