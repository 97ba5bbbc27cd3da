//! Task families: categories of backend job with their own status vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which backend job family a task belongs to.
///
/// The family picks the status fetcher and the lifecycle table used to read
/// its statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskFamily {
    /// Document parsing / ETL jobs.
    DocumentEtl,
    /// Imports from external SaaS platforms.
    SaasImport,
}

impl TaskFamily {
    pub const ALL: [TaskFamily; 2] = [TaskFamily::DocumentEtl, TaskFamily::SaasImport];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskFamily::DocumentEtl => "document-etl",
            TaskFamily::SaasImport => "saas-import",
        }
    }
}

impl fmt::Display for TaskFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown task family: {0}")]
pub struct UnknownFamily(pub String);

impl FromStr for TaskFamily {
    type Err = UnknownFamily;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskFamily::ALL
            .into_iter()
            .find(|family| family.as_str() == s)
            .ok_or_else(|| UnknownFamily(s.to_string()))
    }
}
