//! InMemorySessionStorage - タブ（セッション）の寿命だけ生きる key-value ストア
//!
//! reload（= プロセス再起動）で消える。セッションをまたぐ永続化はしない。

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::StorageError;
use crate::ports::SessionStorage;

#[derive(Debug, Default)]
pub struct InMemorySessionStorage {
    items: Mutex<HashMap<String, String>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for InMemorySessionStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.lock().remove(key);
        Ok(())
    }
}
