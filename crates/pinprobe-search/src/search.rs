use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use pinprobe_core::{
    versions_match, CandidateState, PackageUpdateStatus, Requirements, StatusLedger,
    UpdateResult, UNKNOWN_VERSION,
};
use pinprobe_registry::VersionResolver;
use pinprobe_sandbox::Sandbox;
use tracing::{debug, error, info, warn};

use crate::log::RunLog;
use crate::runner::{TestRun, TestRunner};

pub const TESTS_FAILED: &str = "Tests failed";
pub const TESTS_TIMED_OUT: &str = "Tests timed out";
pub const RESET_FAILED: &str = "Failed to reset test environment";

pub struct UpdateTester<S: Sandbox, R: VersionResolver, T: TestRunner> {
    sandbox: S,
    resolver: R,
    runner: T,
    current_packages: Requirements,
    log: RunLog,
    cancel: Arc<AtomicBool>,
    cleaned_up: bool,
}

impl<S: Sandbox, R: VersionResolver, T: TestRunner> UpdateTester<S, R, T> {
    pub fn new(
        sandbox: S,
        resolver: R,
        runner: T,
        current_packages: Requirements,
        log: RunLog,
    ) -> Self {
        Self {
            sandbox,
            resolver,
            runner,
            current_packages,
            log,
            cancel: Arc::new(AtomicBool::new(false)),
            cleaned_up: false,
        }
    }

    pub fn current_packages(&self) -> &Requirements {
        &self.current_packages
    }

    pub fn sandbox(&self) -> &S {
        &self.sandbox
    }

    pub fn runner(&self) -> &T {
        &self.runner
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn setup_test_environment(&mut self) -> bool {
        let _log = self.log.enter();
        self.reset_environment().is_ok()
    }

    pub fn run_tests(&mut self) -> TestRun {
        let _log = self.log.enter();
        self.run_suite()
    }

    pub fn test_package_update(&mut self, name: &str, version: &str) -> UpdateResult {
        let _log = self.log.enter();
        let Some(current) = self.pinned_version(name) else {
            return UpdateResult::failed(
                CandidateState::Pending,
                UNKNOWN_VERSION,
                version,
                format!("Package {name} not found in current packages"),
                None,
            );
        };
        self.test_candidate(name, &current, version)
    }

    pub fn find_compatible_update(&mut self, name: &str) -> PackageUpdateStatus {
        let _log = self.log.enter();
        self.guarded_search(name)
    }

    pub fn update_all_packages(&mut self) -> BTreeMap<String, PackageUpdateStatus> {
        self.update_all_packages_with(|_| {})
    }

    pub fn update_all_packages_with<F>(
        &mut self,
        mut observer: F,
    ) -> BTreeMap<String, PackageUpdateStatus>
    where
        F: FnMut(&PackageUpdateStatus),
    {
        let _log = self.log.enter();
        info!(
            packages = self.current_packages.len(),
            "starting update testing for all packages"
        );

        let mut results = BTreeMap::new();
        if self.reset_environment().is_err() {
            error!("failed to set up initial test environment");
            return results;
        }

        let names = self.current_packages.keys().cloned().collect::<Vec<_>>();
        for name in names {
            if self.is_cancelled() {
                warn!(
                    completed = results.len(),
                    "cancelled; not starting remaining packages"
                );
                break;
            }
            let status = self.guarded_search(&name);
            observer(&status);
            results.insert(name, status);
        }

        info!(packages = results.len(), "finished update testing");
        results
    }

    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        {
            let _log = self.log.enter();
            info!("cleaning up resources");
            self.sandbox.destroy();
        }
        self.log.close();
    }

    fn guarded_search(&mut self, name: &str) -> PackageUpdateStatus {
        match guarded(AssertUnwindSafe(|| self.search_package(name))) {
            Ok(status) => status,
            Err(message) => {
                error!(package = %name, error = %message, "package search aborted");
                let current = self.pinned_version(name);
                PackageUpdateStatus::without_target(
                    name,
                    current.as_deref().unwrap_or(UNKNOWN_VERSION),
                )
            }
        }
    }

    fn pinned_version(&self, name: &str) -> Option<String> {
        self.current_packages.get(name).cloned().flatten()
    }

    fn reset_environment(&mut self) -> std::result::Result<(), String> {
        info!("setting up test environment");
        let outcome = guarded(AssertUnwindSafe(|| -> Result<bool> {
            self.sandbox.create()?;
            self.sandbox.install_all(&self.current_packages)?;
            Ok(self.sandbox.verify(&self.current_packages))
        }));
        let message = match outcome {
            Ok(Ok(true)) => return Ok(()),
            Ok(Ok(false)) => {
                "installed packages do not match the pinned requirements".to_string()
            }
            Ok(Err(err)) => format!("{err:#}"),
            Err(message) => format!("panic: {message}"),
        };
        error!(error = %message, "failed to set up test environment");
        Err(message)
    }

    fn run_suite(&self) -> TestRun {
        let files = self.runner.test_files();
        debug!(files = files.len(), "running test suite");
        self.runner.run_tests(&self.sandbox, &files)
    }

    fn search_package(&mut self, name: &str) -> PackageUpdateStatus {
        info!(package = %name, "finding compatible update");
        let Some(current) = self.pinned_version(name) else {
            error!(package = %name, "package not found in current packages or not pinned");
            return PackageUpdateStatus::unresolved(name);
        };

        let latest = match self.resolver.latest_version(name) {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                error!(package = %name, "could not fetch latest version");
                return PackageUpdateStatus::without_target(name, &current);
            }
            Err(err) => {
                let message = format!("{err:#}");
                error!(package = %name, error = %message, "could not fetch latest version");
                return PackageUpdateStatus::without_target(name, &current);
            }
        };

        let candidates = match self.resolver.versions_in_range(name, &current, &latest) {
            Ok(candidates) => candidates,
            Err(err) => {
                let message = format!("{err:#}");
                error!(package = %name, error = %message, "could not fetch version range");
                Vec::new()
            }
        };
        debug!(package = %name, candidates = ?candidates, "resolved candidate versions");

        let mut ledger = StatusLedger::new(name, &current, &latest);
        for version in candidates {
            if versions_match(&version, &current) {
                continue;
            }
            if self.is_cancelled() {
                warn!(package = %name, "cancelled; not starting remaining candidates");
                break;
            }

            if let Err(diagnostic) = self.reset_environment() {
                warn!(package = %name, version = %version, "{RESET_FAILED}");
                ledger.record_failure(&version, &format!("{RESET_FAILED}: {diagnostic}"));
                continue;
            }

            let result = self.test_candidate(name, &current, &version);
            ledger.record(&result);
            if result.success {
                info!(package = %name, version = %version, "found compatible version");
            } else {
                warn!(
                    package = %name,
                    version = %version,
                    state = %result.state,
                    error = result.error_message.as_deref().unwrap_or_default(),
                    "version is not compatible"
                );
                if let Some(output) = &result.test_output {
                    debug!(package = %name, version = %version, output = %output, "test output");
                }
            }
        }

        ledger.into_status()
    }

    fn test_candidate(&mut self, name: &str, current: &str, version: &str) -> UpdateResult {
        info!(package = %name, version = %version, "testing candidate");
        let mut state = CandidateState::Pending;
        let outcome = guarded(AssertUnwindSafe(|| {
            self.try_candidate(name, current, version, &mut state)
        }));
        let message = match outcome {
            Ok(Ok(result)) => return result,
            Ok(Err(err)) => format!("{err:#}"),
            Err(message) => message,
        };
        let state = match state {
            CandidateState::Pending | CandidateState::Installing => CandidateState::InstallFailed,
            _ => CandidateState::TestFailed,
        };
        UpdateResult::failed(
            state,
            current,
            version,
            format!("Error during testing: {message}"),
            None,
        )
    }

    fn try_candidate(
        &mut self,
        name: &str,
        current: &str,
        version: &str,
        state: &mut CandidateState,
    ) -> Result<UpdateResult> {
        *state = state.advance(CandidateState::Installing)?;
        let installed = self
            .sandbox
            .install_package(name, Some(version))
            .and_then(|()| self.confirm_installed(name, version));
        if let Err(err) = installed {
            *state = state.advance(CandidateState::InstallFailed)?;
            return Ok(UpdateResult::failed(
                *state,
                current,
                version,
                format!("Failed to install {name}=={version}: {err:#}"),
                None,
            ));
        }
        *state = state.advance(CandidateState::Installed)?;

        *state = state.advance(CandidateState::Testing)?;
        let run = self.run_suite();
        if !run.passed {
            *state = state.advance(CandidateState::TestFailed)?;
            let message = if run.timed_out {
                TESTS_TIMED_OUT
            } else {
                TESTS_FAILED
            };
            return Ok(UpdateResult::failed(
                *state,
                current,
                version,
                message,
                Some(run.output),
            ));
        }

        *state = state.advance(CandidateState::Passed)?;
        Ok(UpdateResult::passed(current, version, run.output))
    }

    fn confirm_installed(&self, name: &str, version: &str) -> Result<()> {
        let mut expected = Requirements::new();
        expected.insert(name.to_string(), Some(version.to_string()));
        if !self.sandbox.verify(&expected) {
            anyhow::bail!("installed version does not match {version}");
        }
        Ok(())
    }
}

impl<S: Sandbox, R: VersionResolver, T: TestRunner> Drop for UpdateTester<S, R, T> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn guarded<F: FnOnce() -> O, O>(work: AssertUnwindSafe<F>) -> std::result::Result<O, String> {
    panic::catch_unwind(work).map_err(panic_message)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "unknown panic".to_string()
}
