use serde::{Deserialize, Serialize};

/// One progress notification of a running invocation.
///
/// A sequence of notifications for one invocation ends when `current == total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current: u32,
    pub total: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Progress {
    pub fn new(current: u32, total: u32) -> Self {
        Self {
            current: current.min(total),
            total,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.current == self.total
    }
}
