//! Lifecycle - family ごとの状態遷移表
//!
//! 状態機械をコードの分岐ではなくデータ（順序付き stage + terminal + wire alias）
//! として持つ。family を増やすときは表を 1 つ足して registry に登録するだけ。
//!
//! # 遷移ルール
//! - 前進のみ（stage の順位が上がる遷移だけ許可、途中の stage は飛ばしてよい）
//! - terminal からはどこにも遷移しない
//! - 自己遷移は「変化なし」

use super::family::TaskFamily;
use super::status::{TaskStatus, TerminalOutcome};

/// Status table for one task family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    /// Non-terminal stages in order; the first one is the initial status.
    stages: Vec<TaskStatus>,
    /// Terminal statuses; all rank after every stage.
    terminals: Vec<TaskStatus>,
    /// Wire value -> status renames applied when reading server responses.
    aliases: Vec<(&'static str, TaskStatus)>,
}

impl Lifecycle {
    pub fn new(
        stages: Vec<TaskStatus>,
        terminals: Vec<TaskStatus>,
        aliases: Vec<(&'static str, TaskStatus)>,
    ) -> Self {
        Self {
            stages,
            terminals,
            aliases,
        }
    }

    /// `pending -> mineru_parsing -> llm_processing -> {completed | failed | cancelled}`
    pub fn document_etl() -> Self {
        Self::new(
            vec![
                TaskStatus::Pending,
                TaskStatus::MineruParsing,
                TaskStatus::LlmProcessing,
            ],
            vec![
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ],
            vec![],
        )
    }

    /// `pending -> downloading -> extracting -> uploading -> creating_nodes -> terminal`
    ///
    /// The server reports `processing` for what is displayed as `downloading`.
    pub fn saas_import() -> Self {
        Self::new(
            vec![
                TaskStatus::Pending,
                TaskStatus::Downloading,
                TaskStatus::Extracting,
                TaskStatus::Uploading,
                TaskStatus::CreatingNodes,
            ],
            vec![
                TaskStatus::Completed,
                TaskStatus::Failed,
                TaskStatus::Cancelled,
            ],
            vec![("processing", TaskStatus::Downloading)],
        )
    }

    /// Built-in table for a family.
    pub fn for_family(family: TaskFamily) -> Self {
        match family {
            TaskFamily::DocumentEtl => Self::document_etl(),
            TaskFamily::SaasImport => Self::saas_import(),
        }
    }

    pub fn initial(&self) -> TaskStatus {
        self.stages.first().copied().unwrap_or(TaskStatus::Pending)
    }

    pub fn contains(&self, status: TaskStatus) -> bool {
        self.rank(status).is_some()
    }

    pub fn is_terminal(&self, status: TaskStatus) -> bool {
        self.terminals.contains(&status)
    }

    pub fn outcome(&self, status: TaskStatus) -> Option<TerminalOutcome> {
        if self.is_terminal(status) {
            status.outcome()
        } else {
            None
        }
    }

    /// Position of a status in the forward order. Every terminal shares the last rank.
    pub fn rank(&self, status: TaskStatus) -> Option<usize> {
        if let Some(pos) = self.stages.iter().position(|s| *s == status) {
            return Some(pos);
        }
        self.is_terminal(status).then_some(self.stages.len())
    }

    /// Is `from -> to` a forward move of this lifecycle?
    pub fn can_transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        if from == to || self.is_terminal(from) {
            return false;
        }
        match (self.rank(from), self.rank(to)) {
            (Some(a), Some(b)) => b > a,
            _ => false,
        }
    }

    /// Read a status as sent by the server, applying this family's aliases.
    ///
    /// Returns `None` for values that are not part of this lifecycle.
    pub fn parse_wire(&self, wire: &str) -> Option<TaskStatus> {
        let wire = wire.trim();
        let status = self
            .aliases
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(wire))
            .map(|(_, status)| *status)
            .or_else(|| TaskStatus::from_name(&wire.to_ascii_lowercase()))?;
        self.contains(status).then_some(status)
    }
}
