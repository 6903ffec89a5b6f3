use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use pinprobe_core::{
    canonical_name, detect_manifest, read_manifest, PackageUpdateStatus, Recommendation,
};
use pinprobe_registry::{PypiIndex, StaticIndex, VersionResolver};
use pinprobe_sandbox::{Environment, SandboxLayout};
use pinprobe_search::{PytestRunner, RunLog, TestDiscovery, UpdateTester};
use tracing::{debug, error, info, warn};
use tracing_subscriber::filter::LevelFilter;

use crate::config::{ProjectConfig, RunSettings};
use crate::file_update::FileUpdater;
use crate::render::{render_status_line, OutputStyle, TerminalRenderer};
use crate::report::generate_and_save_report;
use crate::RunArgs;

pub(crate) fn validate_project_path(path: &Path) -> Result<PathBuf> {
    if !path.exists() {
        bail!("project path does not exist: {}", path.display());
    }
    if !path.is_dir() {
        bail!("project path is not a directory: {}", path.display());
    }
    let project = fs::canonicalize(path)
        .with_context(|| format!("failed to resolve project path {}", path.display()))?;
    if detect_manifest(&project).is_none() {
        bail!("no requirements.txt or Pipfile found in {}", project.display());
    }
    Ok(project)
}

pub(crate) fn validate_tests(project: &Path, venv_dir: &Path) -> Result<bool> {
    let discovery = TestDiscovery::new(project).excluding(venv_dir);
    let reports = discovery.discover_and_validate()?;
    if reports.is_empty() {
        warn!("no test files found in the project");
        return Ok(false);
    }
    if !reports.values().any(|report| report.valid) {
        error!("no valid tests found in the project");
        return Ok(false);
    }

    info!(files = reports.len(), "found test files");
    for report in reports.values() {
        if report.valid {
            debug!(
                file = %report.relative_path.display(),
                functions = %report.test_functions.join(", "),
                "valid test file"
            );
        } else {
            warn!(file = %report.relative_path.display(), "test file has no test functions");
        }
    }
    Ok(true)
}

pub(crate) fn collect_updates(
    results: &BTreeMap<String, PackageUpdateStatus>,
) -> BTreeMap<String, String> {
    results
        .iter()
        .filter(|(_, status)| status.has_update())
        .filter_map(|(name, status)| {
            status
                .compatible_version
                .clone()
                .map(|version| (name.clone(), version))
        })
        .collect()
}

pub(crate) fn filter_updates(
    updates: BTreeMap<String, String>,
    selected: &[String],
) -> BTreeMap<String, String> {
    if selected.is_empty() {
        return updates;
    }
    let selected = selected
        .iter()
        .map(|name| canonical_name(name))
        .collect::<BTreeSet<_>>();
    updates
        .into_iter()
        .filter(|(name, _)| selected.contains(&canonical_name(name)))
        .collect()
}

pub(crate) fn format_status_line(style: OutputStyle, status: &PackageUpdateStatus) -> String {
    let name = &status.package_name;
    let current = &status.current_version;
    match status.recommendation() {
        Recommendation::Upgrade(version) => {
            render_status_line(style, "ok", &format!("{name}: {current} -> {version}"))
        }
        Recommendation::AlreadyHighest => render_status_line(
            style,
            "step",
            &format!("{name}: {current} is already the highest compatible version"),
        ),
        Recommendation::KeepCurrent => render_status_line(
            style,
            "warn",
            &format!(
                "{name}: keeping {current}, no compatible update found ({} of {} candidates failed)",
                status.failed_versions.len(),
                status.tested_versions.len()
            ),
        ),
        Recommendation::Unresolved => render_status_line(
            style,
            "err",
            &format!("{name}: could not resolve package versions"),
        ),
    }
}

fn build_resolver(settings: &RunSettings, args: &RunArgs) -> Result<Box<dyn VersionResolver>> {
    match &args.offline_index {
        Some(path) => {
            info!(index = %path.display(), "resolving versions from offline index");
            let index = StaticIndex::load(path)?.with_prereleases(settings.include_prereleases);
            Ok(Box::new(index))
        }
        None => {
            debug!(index = %settings.index_url, "resolving versions from package index");
            let index =
                PypiIndex::new(&settings.index_url)?.with_prereleases(settings.include_prereleases);
            Ok(Box::new(index))
        }
    }
}

pub(crate) fn run_update_command(args: &RunArgs, renderer: TerminalRenderer) -> Result<()> {
    let project = validate_project_path(&args.project)?;
    let config = ProjectConfig::load(&project)?;
    let settings = RunSettings::resolve(&project, &config, args);

    if !validate_tests(&project, &settings.venv_dir)? {
        if !args.report_only {
            bail!("cannot proceed without valid tests");
        }
        renderer.print_status(
            "warn",
            "proceeding with report generation despite no valid tests",
        );
    }

    let current_packages = read_manifest(&project)?;
    let resolver = build_resolver(&settings, args)?;
    let sandbox = Environment::new(SandboxLayout::with_root(&project, &settings.venv_dir))
        .with_python(&settings.python)
        .with_step_timeout(settings.step_timeout);
    let runner = PytestRunner::new(TestDiscovery::new(&project).excluding(&settings.venv_dir));
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let log = RunLog::open_with_level(&settings.log_dir, args.verbose, level)?;

    let total = current_packages.len() as u64;
    let mut tester = UpdateTester::new(sandbox, resolver, runner, current_packages, log);
    renderer.print_section("Testing updates");
    renderer.print_status(
        "step",
        &format!(
            "testing {total} packages (log: {})",
            tester.log_path().display()
        ),
    );

    let cancel = tester.cancel_handle();
    install_interrupt_handler(Arc::clone(&cancel));

    let mut progress = renderer.start_progress("testing", total);
    let results = tester.update_all_packages_with(|status| {
        progress.println(&format_status_line(renderer.style(), status));
        progress.inc();
    });
    if results.len() as u64 == total {
        progress.finish_success();
    } else {
        progress.finish_abandon();
    }
    tester.cleanup();

    let interrupted = cancel.load(Ordering::SeqCst);
    if interrupted {
        renderer.print_status(
            "warn",
            &format!("interrupted; report covers {} of {total} packages", results.len()),
        );
    } else if results.is_empty() && total > 0 {
        renderer.print_status(
            "err",
            "no packages were tested; the sandbox could not be set up from the pinned requirements",
        );
    }

    let updates = filter_updates(collect_updates(&results), &args.packages);

    renderer.print_section("Report");
    let report_path = generate_and_save_report(&settings.report_dir, &results)?;
    renderer.print_status("ok", &format!("report written to {}", report_path.display()));

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&results).context("failed to serialize results")?;
        println!("{rendered}");
    }

    if let Some(reason) = manifest_skip_reason(args, interrupted) {
        renderer.print_status("step", &format!("{reason} - no files were modified"));
    } else if updates.is_empty() {
        renderer.print_status("step", "no updates needed");
    } else {
        apply_updates(&project, &settings, &updates, renderer);
    }

    Ok(())
}

pub(crate) fn manifest_skip_reason(args: &RunArgs, interrupted: bool) -> Option<&'static str> {
    if interrupted {
        Some("interrupted")
    } else if args.dry_run {
        Some("dry run")
    } else if args.report_only {
        Some("report only")
    } else {
        None
    }
}

pub(crate) fn request_cancel(cancel: &AtomicBool) -> bool {
    !cancel.swap(true, Ordering::SeqCst)
}

fn install_interrupt_handler(cancel: Arc<AtomicBool>) {
    let installed = ctrlc::set_handler(move || {
        if request_cancel(&cancel) {
            eprintln!("interrupted; stopping after the current step (Ctrl-C again to exit)");
        } else {
            std::process::exit(130);
        }
    });
    if let Err(err) = installed {
        warn!(error = %err, "failed to install interrupt handler");
    }
}

fn apply_updates(
    project: &Path,
    settings: &RunSettings,
    updates: &BTreeMap<String, String>,
    renderer: TerminalRenderer,
) {
    renderer.print_section("Updating manifests");
    let updater = FileUpdater::new(project, &settings.backup_dir);
    for (file_name, updated) in updater.update_package_files(updates) {
        if updated {
            renderer.print_status("ok", &format!("updated {file_name}"));
            match updater.latest_backup(&file_name) {
                Ok(Some(backup)) => {
                    renderer.print_status("step", &format!("backup: {}", backup.display()))
                }
                Ok(None) => {}
                Err(err) => {
                    let message = format!("{err:#}");
                    warn!(file = %file_name, error = %message, "failed to locate backup");
                }
            }
        } else {
            renderer.print_status("err", &format!("failed to update {file_name}"));
        }
    }
    renderer.print_status(
        "step",
        &format!("backups kept in {}", updater.backup_dir().display()),
    );
}

pub(crate) fn run_discover_command(project: &Path, renderer: TerminalRenderer) -> Result<()> {
    if !project.is_dir() {
        bail!("project path is not a directory: {}", project.display());
    }
    let config = ProjectConfig::load(project)?;
    let settings = RunSettings::resolve(project, &config, &RunArgs::default());
    let reports = TestDiscovery::new(project)
        .excluding(&settings.venv_dir)
        .discover_and_validate()?;

    if reports.is_empty() {
        renderer.print_status("warn", "no test files found");
        return Ok(());
    }

    renderer.print_section("Test files");
    let mut valid = 0_usize;
    for report in reports.values() {
        let file = report.relative_path.display();
        if report.valid {
            valid += 1;
            renderer.print_status(
                "ok",
                &format!("{file} ({} tests)", report.test_functions.len()),
            );
            let functions = report
                .test_functions
                .iter()
                .map(|function| format!("  - {function}"))
                .collect::<Vec<_>>();
            renderer.print_lines(&functions);
        } else {
            renderer.print_status("warn", &format!("{file}: no test functions"));
        }
    }
    renderer.print_status(
        "step",
        &format!("{valid}/{} test files contain tests", reports.len()),
    );
    Ok(())
}
