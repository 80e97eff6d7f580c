//! Core domain types for kbot: build service records and test results.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Build service records
// ---------------------------------------------------------------------------

/// Build metadata as reported by the build service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    /// Build identifier on the service.
    pub id: i64,
    /// Package name (e.g., `kernel`).
    pub package_name: String,
    /// Name-version-release (e.g., `kernel-3.10.0-825.el7`).
    pub nvr: String,
    /// Upstream version (e.g., `3.10.0`).
    pub version: String,
    /// Release (e.g., `825.el7`).
    pub release: String,
    /// User who owns the build.
    pub owner: String,
    /// Task that compiled this build (imported builds have none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<i64>,
    /// When the build started.
    pub start_time: NaiveDateTime,
}

/// A single RPM changelog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    /// Entry date.
    pub date: NaiveDateTime,
    /// Free-form entry text, usually a list of patches with bug references.
    pub text: String,
    /// Author line, which carries the version-release in brackets.
    pub author: String,
}

/// A Bugzilla identifier: exactly seven digits.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BugId(pub String);

impl std::fmt::Display for BugId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A per-architecture child of a build task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubTask {
    /// Task identifier.
    pub id: i64,
    /// Architecture the sub-task builds for.
    pub arch: String,
}

// ---------------------------------------------------------------------------
// Test results
// ---------------------------------------------------------------------------

/// Kind of test run a result file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    Smoke,
    Functional,
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Smoke => f.write_str("smoke"),
            Self::Functional => f.write_str("functional"),
        }
    }
}

/// Metadata collected from one result file (name + contents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFileMeta {
    /// Task identifier (last file name token).
    pub id: String,
    /// Owner user name (second to last file name token).
    pub owner: String,
    /// Smoke or functional run.
    #[serde(rename = "type")]
    pub test_type: TestType,
    /// Hypervisor display name, or the raw key when unknown.
    pub hv: String,
    /// Value of the `kernel.version` property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    /// Value of the `firmware.version` property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    /// Number of test cases in the file.
    pub total: usize,
    /// Number of failed test cases.
    pub total_failed: usize,
    /// Names of the failed test cases.
    #[serde(default)]
    pub failed_cases: Vec<String>,
}

impl TestFileMeta {
    /// A run passes when no case failed.
    pub fn passed(&self) -> bool {
        self.total_failed == 0
    }
}
