//! Domain identifiers (strongly-typed string IDs).
//!
//! サーバーが払い出す task ID は文字列（数値のこともある）なので、ULID ではなく
//! `String` を内側に持つ。Phantom type で TaskId と ContainerRef を区別する。
//!
//! ## Placeholder ID
//! 作成リクエストが返るまで本物の ID は分からない。その間は `temp-` で始まる
//! ローカル ID を使い、`TaskId::is_placeholder()` で見分ける。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Reserved prefix of locally minted task IDs.
pub const PLACEHOLDER_PREFIX: &str = "temp-";

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Clone + Send + Sync + 'static {
    /// エラーメッセージで使う名前（例: "task id"）
    fn kind() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は PhantomData なので実行時コストはない。
/// ```ignore
/// let task: TaskId = "55".parse()?;
/// let container: ContainerRef = "project-1".parse()?;
/// // task と container は異なる型なので混同できない
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String", bound = "")]
pub struct Id<T: IdMarker> {
    value: String,
    _marker: PhantomData<T>,
}

/// Raised when an empty string is used as an identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} must not be empty")]
pub struct EmptyIdError {
    pub kind: &'static str,
}

impl<T: IdMarker> Id<T> {
    /// Build an ID from a non-empty string.
    pub fn new(value: impl Into<String>) -> Result<Self, EmptyIdError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(EmptyIdError { kind: T::kind() });
        }
        Ok(Self {
            value,
            _marker: PhantomData,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl<T: IdMarker> TryFrom<String> for Id<T> {
    type Error = EmptyIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl<T: IdMarker> From<Id<T>> for String {
    fn from(id: Id<T>) -> Self {
        id.value
    }
}

impl<T: IdMarker> std::str::FromStr for Id<T> {
    type Err = EmptyIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn kind() -> &'static str {
        "task id"
    }
}

/// Container（project / table）のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Container {}

impl IdMarker for Container {
    fn kind() -> &'static str {
        "container ref"
    }
}

/// Identifier of a tracked task, placeholder or server-assigned.
pub type TaskId = Id<Task>;

/// Project/table a task's output attaches to.
pub type ContainerRef = Id<Container>;

impl Id<Task> {
    /// Mint a placeholder ID from a counter value and a ULID.
    ///
    /// The ULID already carries the timestamp and the random suffix.
    pub fn placeholder(counter: u64, ulid: Ulid) -> Self {
        Self {
            value: format!("{PLACEHOLDER_PREFIX}{counter}-{ulid}"),
            _marker: PhantomData,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.value.starts_with(PLACEHOLDER_PREFIX)
    }
}
