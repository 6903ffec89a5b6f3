use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use pinprobe_core::{PackageUpdateStatus, Recommendation};

pub(crate) fn generate_report(
    results: &BTreeMap<String, PackageUpdateStatus>,
    generated_at: &str,
) -> String {
    let total = results.len();
    let with_updates = results.values().filter(|status| status.has_update()).count();
    let with_failures = results
        .values()
        .filter(|status| status.compatible_version.is_none() || !status.failed_versions.is_empty())
        .count();

    let mut lines = vec![
        "# Package Update Test Report".to_string(),
        String::new(),
        format!("Generated on: {generated_at}"),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        format!("- Total Packages Analyzed: {total}"),
        format!("- Packages with Available Updates: {with_updates}"),
        format!("- Packages with Failed Updates: {with_failures}"),
        String::new(),
        "## Quick Update Guide".to_string(),
        String::new(),
    ];

    for status in results.values().filter(|status| status.has_update()) {
        if let Some(compatible) = &status.compatible_version {
            lines.push(format!(
                "- `{}`: `{}` → `{}`",
                status.package_name, status.current_version, compatible
            ));
        }
    }
    if with_updates == 0 {
        lines.push("No updates available.".to_string());
    }
    lines.push(String::new());

    lines.push("## Detailed Results".to_string());
    lines.push(String::new());
    for status in results.values() {
        lines.extend(package_section(status));
    }

    let mut report = lines.join("\n");
    report.push('\n');
    report
}

fn package_section(status: &PackageUpdateStatus) -> Vec<String> {
    let mut lines = vec![
        format!("### {}", status.package_name),
        String::new(),
        "**Version Information:**".to_string(),
        format!("- Current Version: `{}`", status.current_version),
        format!("- Latest Version: `{}`", status.target_version),
    ];
    match &status.compatible_version {
        Some(compatible) => lines.push(format!("- Highest Compatible Version: `{compatible}`")),
        None => lines.push("- No compatible update found".to_string()),
    }
    lines.push(String::new());

    lines.push("**Testing Summary:**".to_string());
    lines.push(format!("- Versions Tested: {}", status.tested_versions.len()));
    lines.push(format!("- Failed Versions: {}", status.failed_versions.len()));
    lines.push(String::new());

    if !status.failed_versions.is_empty() {
        lines.push("**Failed Versions:**".to_string());
        for (version, error) in status.failures_in_test_order() {
            lines.push(format!("- `{version}`: {error}"));
        }
        lines.push(String::new());
    }

    lines.push("**Recommendation:**".to_string());
    lines.push(recommendation_text(&status.recommendation()));
    lines.push(String::new());
    lines
}

pub(crate) fn recommendation_text(recommendation: &Recommendation) -> String {
    match recommendation {
        Recommendation::Upgrade(version) => format!("Update to version `{version}`"),
        Recommendation::AlreadyHighest => {
            "Package is already at the highest compatible version".to_string()
        }
        Recommendation::KeepCurrent => {
            "Keep current version - no compatible update found".to_string()
        }
        Recommendation::Unresolved => "Could not resolve package versions".to_string(),
    }
}

pub(crate) fn report_file_name() -> String {
    format!("update_report_{}.md", Local::now().format("%Y%m%d_%H%M%S"))
}

pub(crate) fn save_report(report_dir: &Path, content: &str) -> Result<PathBuf> {
    fs::create_dir_all(report_dir).with_context(|| {
        format!(
            "failed to create report directory {}",
            report_dir.display()
        )
    })?;
    let path = report_dir.join(report_file_name());
    fs::write(&path, content)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(path)
}

pub(crate) fn generate_and_save_report(
    report_dir: &Path,
    results: &BTreeMap<String, PackageUpdateStatus>,
) -> Result<PathBuf> {
    let generated_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    save_report(report_dir, &generate_report(results, &generated_at))
}
