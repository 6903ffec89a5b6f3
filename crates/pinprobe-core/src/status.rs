use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::version::versions_match;

pub const UNKNOWN_VERSION: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageUpdateStatus {
    pub package_name: String,
    pub current_version: String,
    pub target_version: String,
    pub compatible_version: Option<String>,
    pub tested_versions: Vec<String>,
    pub failed_versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recommendation {
    Upgrade(String),
    AlreadyHighest,
    KeepCurrent,
    Unresolved,
}

impl PackageUpdateStatus {
    pub fn unresolved(package_name: &str) -> Self {
        Self::without_target(package_name, UNKNOWN_VERSION)
    }

    pub fn without_target(package_name: &str, current_version: &str) -> Self {
        Self {
            package_name: package_name.to_string(),
            current_version: current_version.to_string(),
            target_version: UNKNOWN_VERSION.to_string(),
            compatible_version: None,
            tested_versions: Vec::new(),
            failed_versions: BTreeMap::new(),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        self.target_version == UNKNOWN_VERSION
    }

    pub fn has_update(&self) -> bool {
        self.compatible_version
            .as_deref()
            .is_some_and(|compatible| compatible != self.current_version)
    }

    pub fn failure_for(&self, version: &str) -> Option<&str> {
        self.failed_versions.get(version).map(String::as_str)
    }

    pub fn failures_in_test_order(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.tested_versions.iter().filter_map(|version| {
            self.failure_for(version)
                .map(|message| (version.as_str(), message))
        })
    }

    pub fn recommendation(&self) -> Recommendation {
        if self.is_unresolved() {
            return Recommendation::Unresolved;
        }
        if let Some(compatible) = self.compatible_version.as_deref() {
            if compatible != self.current_version {
                return Recommendation::Upgrade(compatible.to_string());
            }
            return Recommendation::AlreadyHighest;
        }
        if self.tested_versions.is_empty()
            && versions_match(&self.current_version, &self.target_version)
        {
            return Recommendation::AlreadyHighest;
        }
        Recommendation::KeepCurrent
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateResult {
    pub success: bool,
    pub old_version: String,
    pub new_version: String,
    pub error_message: Option<String>,
    pub test_output: Option<String>,
    pub state: CandidateState,
}

impl UpdateResult {
    pub fn passed(old_version: &str, new_version: &str, test_output: String) -> Self {
        Self {
            success: true,
            old_version: old_version.to_string(),
            new_version: new_version.to_string(),
            error_message: None,
            test_output: Some(test_output),
            state: CandidateState::Passed,
        }
    }

    pub fn failed(
        state: CandidateState,
        old_version: &str,
        new_version: &str,
        error_message: impl Into<String>,
        test_output: Option<String>,
    ) -> Self {
        Self {
            success: false,
            old_version: old_version.to_string(),
            new_version: new_version.to_string(),
            error_message: Some(error_message.into()),
            test_output,
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateState {
    Pending,
    Installing,
    InstallFailed,
    Installed,
    Testing,
    TestFailed,
    Passed,
}

impl CandidateState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Installing => "installing",
            Self::InstallFailed => "install_failed",
            Self::Installed => "installed",
            Self::Testing => "testing",
            Self::TestFailed => "test_failed",
            Self::Passed => "passed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::InstallFailed | Self::TestFailed | Self::Passed)
    }

    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Installing)
                | (Self::Installing, Self::InstallFailed)
                | (Self::Installing, Self::Installed)
                | (Self::Installed, Self::Testing)
                | (Self::Testing, Self::TestFailed)
                | (Self::Testing, Self::Passed)
        )
    }

    pub fn advance(self, next: Self) -> Result<Self> {
        if !self.can_transition_to(next) {
            return Err(anyhow!(
                "invalid candidate transition: {} -> {}",
                self.as_str(),
                next.as_str()
            ));
        }
        Ok(next)
    }
}

impl fmt::Display for CandidateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StatusLedger {
    status: PackageUpdateStatus,
}

impl StatusLedger {
    pub fn new(package_name: &str, current_version: &str, target_version: &str) -> Self {
        Self {
            status: PackageUpdateStatus {
                package_name: package_name.to_string(),
                current_version: current_version.to_string(),
                target_version: target_version.to_string(),
                compatible_version: None,
                tested_versions: Vec::new(),
                failed_versions: BTreeMap::new(),
            },
        }
    }

    pub fn record(&mut self, result: &UpdateResult) {
        if result.success {
            self.record_success(&result.new_version);
        } else {
            let message = result.error_message.as_deref().unwrap_or("Unknown error");
            self.record_failure(&result.new_version, message);
        }
    }

    pub fn record_success(&mut self, version: &str) {
        self.mark_tested(version);
        self.status.failed_versions.remove(version);
        self.status.compatible_version = Some(version.to_string());
    }

    pub fn record_failure(&mut self, version: &str, message: &str) {
        self.mark_tested(version);
        if self.status.compatible_version.as_deref() == Some(version) {
            self.status.compatible_version = None;
        }
        self.status
            .failed_versions
            .insert(version.to_string(), message.to_string());
    }

    pub fn compatible_version(&self) -> Option<&str> {
        self.status.compatible_version.as_deref()
    }

    pub fn into_status(self) -> PackageUpdateStatus {
        self.status
    }

    fn mark_tested(&mut self, version: &str) {
        if !self.status.tested_versions.iter().any(|v| v == version) {
            self.status.tested_versions.push(version.to_string());
        }
    }
}
