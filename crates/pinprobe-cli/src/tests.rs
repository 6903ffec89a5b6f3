use super::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use pinprobe_core::{PackageUpdateStatus, Recommendation, UNKNOWN_VERSION};

use crate::completion::write_completions_script;
use crate::config::{ProjectConfig, RunSettings, CONFIG_FILE_NAME};
use crate::file_update::FileUpdater;
use crate::flows::{
    collect_updates, filter_updates, format_status_line, manifest_skip_reason, request_cancel,
    validate_project_path, validate_tests,
};
use crate::render::{
    format_elapsed, render_progress_line, render_status_line, resolve_output_style, OutputStyle,
};
use crate::report::{generate_report, recommendation_text, save_report};

static TEST_DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_dir() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("must read clock")
        .as_nanos();
    let sequence = TEST_DIR_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        sequence
    ));
    fs::create_dir_all(&path).expect("must create test dir");
    path
}

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent dir");
    }
    fs::write(path, content).expect("must write file");
}

fn status(
    name: &str,
    current: &str,
    target: &str,
    compatible: Option<&str>,
    tested: &[&str],
    failed: &[(&str, &str)],
) -> PackageUpdateStatus {
    PackageUpdateStatus {
        package_name: name.to_string(),
        current_version: current.to_string(),
        target_version: target.to_string(),
        compatible_version: compatible.map(str::to_string),
        tested_versions: tested.iter().map(|v| v.to_string()).collect(),
        failed_versions: failed
            .iter()
            .map(|(version, message)| (version.to_string(), message.to_string()))
            .collect(),
    }
}

fn sample_results() -> BTreeMap<String, PackageUpdateStatus> {
    let mut results = BTreeMap::new();
    results.insert(
        "requests".to_string(),
        status(
            "requests",
            "2.25.0",
            "2.28.0",
            Some("2.27.0"),
            &["2.26.0", "2.27.0", "2.28.0"],
            &[("2.28.0", "Tests failed")],
        ),
    );
    results.insert(
        "flask".to_string(),
        status("flask", "2.0.0", "2.0.0", None, &[], &[]),
    );
    results.insert(
        "numpy".to_string(),
        status(
            "numpy",
            "1.20.0",
            "1.22.0",
            None,
            &["1.22.0", "1.21.0"],
            &[
                ("1.22.0", "Failed to install numpy==1.22.0: no wheel"),
                ("1.21.0", "Tests failed"),
            ],
        ),
    );
    results.insert(
        "ghost".to_string(),
        PackageUpdateStatus::unresolved("ghost"),
    );
    results
}

fn run_args(project: &Path) -> RunArgs {
    RunArgs {
        project: project.to_path_buf(),
        ..RunArgs::default()
    }
}

#[test]
fn first_interrupt_requests_cancellation_and_second_escalates() {
    let cancel = AtomicBool::new(false);
    assert!(request_cancel(&cancel));
    assert!(cancel.load(Ordering::SeqCst));
    assert!(!request_cancel(&cancel));
    assert!(cancel.load(Ordering::SeqCst));
}

#[test]
fn interrupted_run_never_modifies_manifests() {
    let project = Path::new("/work/app");
    let args = run_args(project);
    assert_eq!(manifest_skip_reason(&args, false), None);
    assert_eq!(manifest_skip_reason(&args, true), Some("interrupted"));

    let dry_run = RunArgs {
        dry_run: true,
        ..run_args(project)
    };
    assert_eq!(manifest_skip_reason(&dry_run, false), Some("dry run"));
    assert_eq!(manifest_skip_reason(&dry_run, true), Some("interrupted"));

    let report_only = RunArgs {
        report_only: true,
        ..run_args(project)
    };
    assert_eq!(manifest_skip_reason(&report_only, false), Some("report only"));
}

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn cli_parses_run_with_flags() {
    let cli = Cli::try_parse_from([
        "pinprobe",
        "run",
        "proj",
        "--packages",
        "requests",
        "flask",
        "--dry-run",
        "--timeout",
        "30",
        "--include-prereleases",
        "--offline-index",
        "index.toml",
        "--json",
    ])
    .expect("command must parse");

    match cli.command {
        Commands::Run(args) => {
            assert_eq!(args.project, PathBuf::from("proj"));
            assert_eq!(args.packages, vec!["requests", "flask"]);
            assert!(args.dry_run);
            assert!(!args.report_only);
            assert_eq!(args.timeout, Some(30));
            assert!(args.include_prereleases);
            assert_eq!(args.offline_index, Some(PathBuf::from("index.toml")));
            assert!(args.json);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn cli_run_requires_project() {
    let err = Cli::try_parse_from(["pinprobe", "run"]).expect_err("project must be required");
    assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
}

#[test]
fn cli_rejects_non_numeric_timeout() {
    let err = Cli::try_parse_from(["pinprobe", "run", "proj", "--timeout", "soon"])
        .expect_err("timeout must be numeric");
    assert_eq!(err.kind(), ErrorKind::ValueValidation);
}

#[test]
fn cli_parses_discover_and_completions() {
    let cli = Cli::try_parse_from(["pinprobe", "discover", "proj"]).expect("command must parse");
    assert!(matches!(cli.command, Commands::Discover { project } if project == Path::new("proj")));

    let cli =
        Cli::try_parse_from(["pinprobe", "completions", "zsh"]).expect("command must parse");
    assert!(matches!(
        cli.command,
        Commands::Completions {
            shell: CliCompletionShell::Zsh
        }
    ));
}

#[test]
fn completions_script_mentions_binary_and_subcommands() {
    let mut out = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &mut out).expect("must write script");
    let script = String::from_utf8(out).expect("script must be utf-8");
    assert!(script.contains("pinprobe"));
    assert!(script.contains("discover"));
}

#[test]
fn project_config_defaults_when_file_missing() {
    let dir = test_dir();
    let config = ProjectConfig::load(&dir).expect("must load config");
    assert_eq!(config, ProjectConfig::default());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn project_config_reads_known_keys_and_rejects_unknown() {
    let dir = test_dir();
    write(
        &dir.join(CONFIG_FILE_NAME),
        "index_url = \"http://mirror.local\"\nstep_timeout_secs = 60\nreport_dir = \"out\"\n",
    );
    let config = ProjectConfig::load(&dir).expect("must load config");
    assert_eq!(config.index_url.as_deref(), Some("http://mirror.local"));
    assert_eq!(config.step_timeout_secs, Some(60));
    assert_eq!(config.report_dir, Some(PathBuf::from("out")));

    write(&dir.join(CONFIG_FILE_NAME), "colour = \"blue\"\n");
    let err = ProjectConfig::load(&dir).expect_err("unknown key must fail");
    assert!(err.to_string().contains("failed to parse config"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn run_settings_use_defaults_under_project() {
    let project = Path::new("/work/app");
    let settings = RunSettings::resolve(project, &ProjectConfig::default(), &run_args(project));
    assert_eq!(settings.index_url, "https://pypi.org");
    assert_eq!(settings.venv_dir.parent(), Some(project));
    assert_ne!(settings.venv_dir, project.join(".venv"));
    assert_eq!(settings.step_timeout, Some(Duration::from_secs(900)));
    assert!(!settings.include_prereleases);
    assert_eq!(settings.log_dir, project.join("update_logs"));
    assert_eq!(settings.report_dir, project.join("update_reports"));
    assert_eq!(settings.backup_dir, project.join("requirement_backups"));
}

#[test]
fn run_settings_prefer_flags_over_config() {
    let project = Path::new("/work/app");
    let config = ProjectConfig {
        index_url: Some("http://config.local".to_string()),
        python: Some("python3.11".to_string()),
        venv_dir: Some(PathBuf::from("sandbox")),
        step_timeout_secs: Some(120),
        include_prereleases: Some(true),
        ..ProjectConfig::default()
    };
    let mut args = run_args(project);
    args.index_url = Some("http://flag.local".to_string());
    args.timeout = Some(0);

    let settings = RunSettings::resolve(project, &config, &args);
    assert_eq!(settings.index_url, "http://flag.local");
    assert_eq!(settings.python, "python3.11");
    assert_eq!(settings.venv_dir, project.join("sandbox"));
    assert_eq!(settings.step_timeout, None);
    assert!(settings.include_prereleases);
}

#[test]
fn collect_updates_keeps_only_changed_compatible_versions() {
    let updates = collect_updates(&sample_results());
    assert_eq!(updates.len(), 1);
    assert_eq!(updates.get("requests").map(String::as_str), Some("2.27.0"));
}

#[test]
fn filter_updates_matches_selected_names_canonically() {
    let updates = BTreeMap::from([
        ("Flask_Login".to_string(), "0.6.0".to_string()),
        ("requests".to_string(), "2.27.0".to_string()),
    ]);
    let filtered = filter_updates(updates.clone(), &["flask-login".to_string()]);
    assert_eq!(filtered.keys().collect::<Vec<_>>(), vec!["Flask_Login"]);

    assert_eq!(filter_updates(updates.clone(), &[]), updates);
}

#[test]
fn recommendation_texts_cover_every_outcome() {
    let results = sample_results();
    assert_eq!(
        recommendation_text(&results["requests"].recommendation()),
        "Update to version `2.27.0`"
    );
    assert_eq!(
        recommendation_text(&results["flask"].recommendation()),
        "Package is already at the highest compatible version"
    );
    assert_eq!(
        recommendation_text(&results["numpy"].recommendation()),
        "Keep current version - no compatible update found"
    );
    assert_eq!(results["ghost"].recommendation(), Recommendation::Unresolved);
    assert_eq!(
        recommendation_text(&results["ghost"].recommendation()),
        "Could not resolve package versions"
    );
}

#[test]
fn report_summarizes_and_details_each_package() {
    let report = generate_report(&sample_results(), "2026-10-17 12:00:00");

    assert!(report.starts_with("# Package Update Test Report\n"));
    assert!(report.contains("Generated on: 2026-10-17 12:00:00"));
    assert!(report.contains("- Total Packages Analyzed: 4"));
    assert!(report.contains("- Packages with Available Updates: 1"));
    assert!(report.contains("- Packages with Failed Updates: 4"));
    assert!(report.contains("- `requests`: `2.25.0` → `2.27.0`"));
    assert!(report.contains("- Highest Compatible Version: `2.27.0`"));
    assert!(report.contains(&format!("- Latest Version: `{UNKNOWN_VERSION}`")));

    let flask = report.find("### flask").expect("flask section");
    let ghost = report.find("### ghost").expect("ghost section");
    let numpy = report.find("### numpy").expect("numpy section");
    let requests = report.find("### requests").expect("requests section");
    assert!(flask < ghost && ghost < numpy && numpy < requests);
}

#[test]
fn report_lists_failures_in_test_order() {
    let report = generate_report(&sample_results(), "now");
    let newer = report
        .find("- `1.22.0`: Failed to install numpy==1.22.0: no wheel")
        .expect("install failure listed");
    let older = report
        .find("- `1.21.0`: Tests failed")
        .expect("test failure listed");
    assert!(newer < older);
}

#[test]
fn report_without_updates_says_so() {
    let mut results = sample_results();
    results.remove("requests");
    let report = generate_report(&results, "now");
    assert!(report.contains("No updates available."));
}

#[test]
fn save_report_creates_directory_and_timestamped_file() {
    let dir = test_dir();
    let report_dir = dir.join("update_reports");
    let path = save_report(&report_dir, "# report\n").expect("must save report");

    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("must have file name");
    assert!(name.starts_with("update_report_"));
    assert!(name.ends_with(".md"));
    assert_eq!(
        fs::read_to_string(&path).expect("must read report"),
        "# report\n"
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn results_serialize_as_json_objects() {
    let rendered = serde_json::to_value(sample_results()).expect("must serialize");
    assert_eq!(rendered["requests"]["compatible_version"], "2.27.0");
    assert_eq!(rendered["flask"]["compatible_version"], serde_json::Value::Null);
    assert_eq!(
        rendered["numpy"]["failed_versions"]["1.21.0"],
        "Tests failed"
    );
}

#[test]
fn file_updater_rewrites_requirements_and_keeps_backup() {
    let dir = test_dir();
    let manifest = dir.join("requirements.txt");
    write(&manifest, "# pinned\nrequests==2.25.0\nflask==2.0.0\n");
    let updater = FileUpdater::new(&dir, dir.join("requirement_backups"));

    let updates = BTreeMap::from([("requests".to_string(), "2.27.0".to_string())]);
    assert!(updater
        .update_requirements_txt(&updates)
        .expect("must update requirements"));

    let rewritten = fs::read_to_string(&manifest).expect("must read manifest");
    assert!(rewritten.contains("# pinned"));
    assert!(rewritten.contains("requests==2.27.0"));
    assert!(rewritten.contains("flask==2.0.0"));

    let backup = updater
        .latest_backup("requirements.txt")
        .expect("must list backups")
        .expect("backup must exist");
    assert_eq!(
        fs::read_to_string(backup).expect("must read backup"),
        "# pinned\nrequests==2.25.0\nflask==2.0.0\n"
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn file_updater_reports_missing_manifests() {
    let dir = test_dir();
    let updater = FileUpdater::new(&dir, dir.join("requirement_backups"));
    let updates = BTreeMap::from([("requests".to_string(), "2.27.0".to_string())]);

    assert!(!updater
        .update_requirements_txt(&updates)
        .expect("missing file is not an error"));
    assert!(!updater.update_pipfile(&updates).expect("missing file is not an error"));
    assert!(updater.update_package_files(&updates).is_empty());
    assert_eq!(
        updater
            .latest_backup("Pipfile")
            .expect("must list backups"),
        None
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn file_updater_updates_every_present_manifest() {
    let dir = test_dir();
    write(&dir.join("requirements.txt"), "requests==2.25.0\n");
    write(
        &dir.join("Pipfile"),
        "[packages]\nrequests = \"==2.25.0\"\n\n[dev-packages]\nrequests = \"==2.25.0\"\n",
    );
    let updater = FileUpdater::new(&dir, dir.join("requirement_backups"));
    let updates = BTreeMap::from([("requests".to_string(), "2.27.0".to_string())]);

    let results = updater.update_package_files(&updates);
    assert_eq!(results.get("requirements.txt"), Some(&true));
    assert_eq!(results.get("Pipfile"), Some(&true));

    let pipfile = fs::read_to_string(dir.join("Pipfile")).expect("must read Pipfile");
    assert!(pipfile.contains("[packages]\nrequests = \"==2.27.0\"\n"));
    assert!(pipfile.contains("[dev-packages]\nrequests = \"==2.25.0\"\n"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn file_updater_backups_do_not_collide() {
    let dir = test_dir();
    let manifest = dir.join("requirements.txt");
    write(&manifest, "requests==2.25.0\n");
    let updater = FileUpdater::new(&dir, dir.join("requirement_backups"));

    let first = updater.create_backup(&manifest).expect("must back up");
    write(&manifest, "requests==2.26.0\n");
    let second = updater.create_backup(&manifest).expect("must back up again");
    assert_ne!(first, second);

    let latest = updater
        .latest_backup("requirements.txt")
        .expect("must list backups")
        .expect("backup must exist");
    assert_eq!(
        fs::read_to_string(latest).expect("must read backup"),
        "requests==2.26.0\n"
    );

    updater
        .restore_from_backup(&first, &manifest)
        .expect("must restore");
    assert_eq!(
        fs::read_to_string(&manifest).expect("must read manifest"),
        "requests==2.25.0\n"
    );
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn validate_project_path_requires_directory_with_manifest() {
    let dir = test_dir();
    let missing = dir.join("missing");
    let err = validate_project_path(&missing).expect_err("missing path must fail");
    assert!(err.to_string().contains("does not exist"));

    let file = dir.join("file.txt");
    write(&file, "");
    let err = validate_project_path(&file).expect_err("file must fail");
    assert!(err.to_string().contains("not a directory"));

    let err = validate_project_path(&dir).expect_err("no manifest must fail");
    assert!(err.to_string().contains("no requirements.txt or Pipfile"));

    write(&dir.join("Pipfile"), "[packages]\n");
    let project = validate_project_path(&dir).expect("project must validate");
    assert!(project.is_absolute());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn validate_tests_needs_a_test_function_outside_the_sandbox() {
    let dir = test_dir();
    let venv = dir.join("sandbox");
    assert!(!validate_tests(&dir, &venv).expect("must scan project"));

    write(&dir.join("tests/test_empty.py"), "import os\n");
    write(&venv.join("lib/test_vendor.py"), "def test_vendor():\n    pass\n");
    assert!(!validate_tests(&dir, &venv).expect("must scan project"));

    write(&dir.join("tests/test_app.py"), "def test_app():\n    assert True\n");
    assert!(validate_tests(&dir, &venv).expect("must scan project"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn resolve_output_style_follows_stdout() {
    assert_eq!(resolve_output_style(true, true), OutputStyle::Rich);
    assert_eq!(resolve_output_style(true, false), OutputStyle::Rich);
    assert_eq!(resolve_output_style(false, true), OutputStyle::Plain);
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "requests: 2.25.0 -> 2.27.0"),
        "requests: 2.25.0 -> 2.27.0"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "warn", "no test files found"),
        "[WARN] no test files found"
    );
}

#[test]
fn format_status_line_describes_each_recommendation() {
    let results = sample_results();
    assert_eq!(
        format_status_line(OutputStyle::Rich, &results["requests"]),
        "[OK] requests: 2.25.0 -> 2.27.0"
    );
    assert_eq!(
        format_status_line(OutputStyle::Plain, &results["flask"]),
        "flask: 2.0.0 is already the highest compatible version"
    );
    assert_eq!(
        format_status_line(OutputStyle::Plain, &results["numpy"]),
        "numpy: keeping 1.20.0, no compatible update found (2 of 2 candidates failed)"
    );
    assert_eq!(
        format_status_line(OutputStyle::Rich, &results["ghost"]),
        "[ERR] ghost: could not resolve package versions"
    );
}

#[test]
fn progress_line_is_hidden_in_plain_mode() {
    assert_eq!(
        render_progress_line(OutputStyle::Plain, "testing", 1, 2, None),
        None
    );
    let line = render_progress_line(
        OutputStyle::Rich,
        "testing",
        3,
        4,
        Some(Duration::from_millis(1_250)),
    )
    .expect("rich mode must render");
    assert!(line.contains(" 75% 3/4 complete in 1.250s"));
    assert_eq!(format_elapsed(Duration::from_millis(5)), "0.005s");
}
