use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{Lifecycle, TaskFamily, TrackerError};
use crate::ports::{StatusFetcher, TaskCanceller};

/// Everything the tracker needs to poll one task family.
#[derive(Clone)]
pub struct FamilyEntry {
    pub fetcher: Arc<dyn StatusFetcher>,
    pub lifecycle: Lifecycle,
    pub canceller: Option<Arc<dyn TaskCanceller>>,
}

impl FamilyEntry {
    /// Entry with the family's standard lifecycle and no cancellation support.
    pub fn new(family: TaskFamily, fetcher: Arc<dyn StatusFetcher>) -> Self {
        Self {
            fetcher,
            lifecycle: Lifecycle::for_family(family),
            canceller: None,
        }
    }

    pub fn with_canceller(mut self, canceller: Arc<dyn TaskCanceller>) -> Self {
        self.canceller = Some(canceller);
        self
    }
}

/// Registry of task families (family -> fetcher + lifecycle).
///
/// Design:
/// - Built during initialization (mutable).
/// - Used by the engine at runtime (immutable, shared via `Arc`).
#[derive(Clone, Default)]
pub struct FamilyRegistry {
    entries: BTreeMap<TaskFamily, FamilyEntry>,
}

impl FamilyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetcher with the family's standard lifecycle.
    pub fn register(
        &mut self,
        family: TaskFamily,
        fetcher: Arc<dyn StatusFetcher>,
    ) -> Result<(), TrackerError> {
        self.register_entry(family, FamilyEntry::new(family, fetcher))
    }

    pub fn register_entry(
        &mut self,
        family: TaskFamily,
        entry: FamilyEntry,
    ) -> Result<(), TrackerError> {
        if self.entries.contains_key(&family) {
            return Err(TrackerError::DuplicateFamily(family));
        }
        self.entries.insert(family, entry);
        Ok(())
    }

    pub fn get(&self, family: TaskFamily) -> Option<&FamilyEntry> {
        self.entries.get(&family)
    }

    pub fn families(&self) -> Vec<TaskFamily> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskStatus;
    use crate::impls::ScriptedStatusFetcher;

    #[test]
    fn duplicate_family_is_rejected() {
        let mut registry = FamilyRegistry::new();
        let fetcher = Arc::new(ScriptedStatusFetcher::new());

        registry
            .register(TaskFamily::DocumentEtl, fetcher.clone())
            .unwrap();
        let err = registry
            .register(TaskFamily::DocumentEtl, fetcher)
            .unwrap_err();

        assert!(matches!(err, TrackerError::DuplicateFamily(TaskFamily::DocumentEtl)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn entry_uses_the_family_lifecycle() {
        let mut registry = FamilyRegistry::new();
        registry
            .register(TaskFamily::SaasImport, Arc::new(ScriptedStatusFetcher::new()))
            .unwrap();

        let entry = registry.get(TaskFamily::SaasImport).unwrap();
        assert_eq!(entry.lifecycle.parse_wire("processing"), Some(TaskStatus::Downloading));
        assert!(entry.canceller.is_none());
        assert!(registry.get(TaskFamily::DocumentEtl).is_none());
        assert_eq!(registry.families(), vec![TaskFamily::SaasImport]);
    }
}
