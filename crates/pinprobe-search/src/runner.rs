use std::path::PathBuf;

use pinprobe_sandbox::Sandbox;
use tracing::{info, warn};

use crate::discovery::TestDiscovery;

pub const NO_TEST_FILES: &str = "No test files found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRun {
    pub passed: bool,
    pub output: String,
    pub timed_out: bool,
}

impl TestRun {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            passed: true,
            output: output.into(),
            timed_out: false,
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
            timed_out: false,
        }
    }

    pub fn timed_out(output: impl Into<String>) -> Self {
        Self {
            passed: false,
            output: output.into(),
            timed_out: true,
        }
    }
}

pub trait TestRunner {
    fn test_files(&self) -> Vec<PathBuf>;

    fn run_tests(&self, sandbox: &dyn Sandbox, files: &[PathBuf]) -> TestRun;
}

#[derive(Debug, Clone)]
pub struct PytestRunner {
    discovery: TestDiscovery,
}

impl PytestRunner {
    pub fn new(discovery: TestDiscovery) -> Self {
        Self { discovery }
    }
}

impl TestRunner for PytestRunner {
    fn test_files(&self) -> Vec<PathBuf> {
        match self.discovery.find_test_files() {
            Ok(files) => files,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "failed to discover test files");
                Vec::new()
            }
        }
    }

    fn run_tests(&self, sandbox: &dyn Sandbox, files: &[PathBuf]) -> TestRun {
        if files.is_empty() {
            warn!("no test files found");
            return TestRun::failed(NO_TEST_FILES);
        }

        let mut args = vec!["-m".to_string(), "pytest".to_string()];
        args.extend(files.iter().map(|file| file.to_string_lossy().into_owned()));
        info!(files = files.len(), "running tests");

        match sandbox.run_command(&args) {
            Ok(output) if output.timed_out() => TestRun::timed_out(output.diagnostic()),
            Ok(output) if output.success() => TestRun::passed(output.combined()),
            Ok(output) => TestRun::failed(output.combined()),
            Err(err) => TestRun::failed(format!("{err:#}")),
        }
    }
}
