//! SessionStorage port - セッション（タブ）単位の key-value ストア
//!
//! store のスナップショットを JSON 文字列で 1 つの key に書く。
//! セッションをまたぐ永続化はしない。

use crate::domain::StorageError;

pub trait SessionStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}
