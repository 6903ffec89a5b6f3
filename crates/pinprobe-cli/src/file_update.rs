use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use pinprobe_core::ManifestKind;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub(crate) struct FileUpdater {
    project: PathBuf,
    backup_dir: PathBuf,
}

impl FileUpdater {
    pub(crate) fn new(project: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            backup_dir: backup_dir.into(),
        }
    }

    pub(crate) fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub(crate) fn create_backup(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.backup_dir).with_context(|| {
            format!(
                "failed to create backup directory {}",
                self.backup_dir.display()
            )
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("cannot back up {}", path.display()))?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");

        let mut backup = self.backup_dir.join(format!("{file_name}.{timestamp}.bak"));
        let mut sequence = 1_u32;
        while backup.exists() {
            backup = self
                .backup_dir
                .join(format!("{file_name}.{timestamp}_{sequence:03}.bak"));
            sequence += 1;
        }

        fs::copy(path, &backup).with_context(|| {
            format!(
                "failed to back up {} to {}",
                path.display(),
                backup.display()
            )
        })?;
        info!(file = %path.display(), backup = %backup.display(), "created backup");
        Ok(backup)
    }

    pub(crate) fn restore_from_backup(&self, backup: &Path, target: &Path) -> Result<()> {
        fs::copy(backup, target).with_context(|| {
            format!(
                "failed to restore {} from {}",
                target.display(),
                backup.display()
            )
        })?;
        info!(file = %target.display(), backup = %backup.display(), "restored from backup");
        Ok(())
    }

    pub(crate) fn update_requirements_txt(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> Result<bool> {
        self.update_manifest(ManifestKind::RequirementsTxt, updates)
    }

    pub(crate) fn update_pipfile(&self, updates: &BTreeMap<String, String>) -> Result<bool> {
        self.update_manifest(ManifestKind::Pipfile, updates)
    }

    pub(crate) fn update_package_files(
        &self,
        updates: &BTreeMap<String, String>,
    ) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for kind in [ManifestKind::RequirementsTxt, ManifestKind::Pipfile] {
            if !self.project.join(kind.file_name()).is_file() {
                continue;
            }
            let outcome = match kind {
                ManifestKind::RequirementsTxt => self.update_requirements_txt(updates),
                ManifestKind::Pipfile => self.update_pipfile(updates),
            };
            let updated = match outcome {
                Ok(updated) => updated,
                Err(err) => {
                    let message = format!("{err:#}");
                    error!(file = kind.file_name(), error = %message, "failed to update manifest");
                    false
                }
            };
            results.insert(kind.file_name().to_string(), updated);
        }
        results
    }

    pub(crate) fn latest_backup(&self, file_name: &str) -> Result<Option<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(None);
        }
        let prefix = format!("{file_name}.");
        let entries = fs::read_dir(&self.backup_dir).with_context(|| {
            format!(
                "failed to read backup directory {}",
                self.backup_dir.display()
            )
        })?;

        let mut latest: Option<(String, PathBuf)> = None;
        for entry in entries {
            let entry = entry
                .with_context(|| format!("failed to read entry in {}", self.backup_dir.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || !name.ends_with(".bak") {
                continue;
            }
            if latest.as_ref().map_or(true, |(current, _)| name > *current) {
                latest = Some((name, entry.path()));
            }
        }
        Ok(latest.map(|(_, path)| path))
    }

    fn update_manifest(
        &self,
        kind: ManifestKind,
        updates: &BTreeMap<String, String>,
    ) -> Result<bool> {
        let path = self.project.join(kind.file_name());
        if !path.is_file() {
            return Ok(false);
        }

        let backup = self.create_backup(&path)?;
        let written = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))
            .and_then(|content| {
                fs::write(&path, kind.rewrite(&content, updates))
                    .with_context(|| format!("failed to write {}", path.display()))
            });

        if let Err(err) = written {
            if let Err(restore_err) = self.restore_from_backup(&backup, &path) {
                let message = format!("{restore_err:#}");
                warn!(file = %path.display(), error = %message, "failed to restore manifest");
            }
            return Err(err);
        }

        info!(file = %path.display(), packages = updates.len(), "updated manifest");
        Ok(true)
    }
}
