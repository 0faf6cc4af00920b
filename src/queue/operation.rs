//! 队列中的一次 brew 调用及其状态

use crate::homebrew::{CommandOutput, HomebrewCommand};
use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Queued → Running → {Completed, LaunchFailed, Cancelled}
///
/// 终态不会再迁移。非零退出码属于 `Completed`，由调用方解释。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Queued,
    Running,
    Completed(Arc<CommandOutput>),
    LaunchFailed(String),
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Queued | OperationStatus::Running)
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperationStatus::Queued => "queued",
            OperationStatus::Running => "running",
            OperationStatus::Completed(_) => "completed",
            OperationStatus::LaunchFailed(_) => "launch-failed",
            OperationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: OperationId,
    pub command: HomebrewCommand,
    pub started_at: DateTime<Local>,
    pub status: OperationStatus,
}

impl Operation {
    pub(crate) fn queued(command: HomebrewCommand) -> Self {
        Self {
            id: OperationId::new(),
            command,
            started_at: Local::now(),
            status: OperationStatus::Queued,
        }
    }

    pub(crate) fn with_status(&self, status: OperationStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}
