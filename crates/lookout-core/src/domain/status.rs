//! Task status vocabulary shared by all families.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a tracked task.
///
/// Which values a task may actually take depends on its family; see
/// [`Lifecycle`](super::lifecycle::Lifecycle).
///
/// - document-etl: Pending -> MineruParsing -> LlmProcessing -> terminal
/// - saas-import: Pending -> Downloading -> Extracting -> Uploading -> CreatingNodes -> terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Submitted, no progress observed yet.
    Pending,

    /// document-etl: layout parsing.
    MineruParsing,

    /// document-etl: LLM post-processing.
    LlmProcessing,

    /// saas-import: fetching from the source (wire value `processing` too).
    Downloading,

    /// saas-import
    Extracting,

    /// saas-import
    Uploading,

    /// saas-import: writing content nodes into the project.
    CreatingNodes,

    Completed,
    Failed,
    Cancelled,
}

/// How a terminal status ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Success,
    Failure,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 10] = [
        TaskStatus::Pending,
        TaskStatus::MineruParsing,
        TaskStatus::LlmProcessing,
        TaskStatus::Downloading,
        TaskStatus::Extracting,
        TaskStatus::Uploading,
        TaskStatus::CreatingNodes,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Is this a terminal state (no further transitions, no further polling)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn outcome(self) -> Option<TerminalOutcome> {
        match self {
            TaskStatus::Completed => Some(TerminalOutcome::Success),
            TaskStatus::Failed | TaskStatus::Cancelled => Some(TerminalOutcome::Failure),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::MineruParsing => "mineru_parsing",
            TaskStatus::LlmProcessing => "llm_processing",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Extracting => "extracting",
            TaskStatus::Uploading => "uploading",
            TaskStatus::CreatingNodes => "creating_nodes",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Look up a status by its canonical name. Family aliases are not applied here.
    pub fn from_name(name: &str) -> Option<Self> {
        TaskStatus::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
