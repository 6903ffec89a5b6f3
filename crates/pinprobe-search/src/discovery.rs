use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

const SKIPPED_DIRS: &[&str] = &["__pycache__", "node_modules", "site-packages"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFileReport {
    pub valid: bool,
    pub test_functions: Vec<String>,
    pub relative_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TestDiscovery {
    project: PathBuf,
    excluded: Vec<PathBuf>,
}

impl TestDiscovery {
    pub fn new(project: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            excluded: Vec::new(),
        }
    }

    pub fn excluding(mut self, path: impl Into<PathBuf>) -> Self {
        self.excluded.push(path.into());
        self
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn find_test_files(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        self.walk(&self.project, &mut found)?;
        found.sort();
        Ok(found)
    }

    pub fn discover_and_validate(&self) -> Result<BTreeMap<PathBuf, TestFileReport>> {
        let mut reports = BTreeMap::new();
        for path in self.find_test_files()? {
            let test_functions = match extract_test_functions(&path) {
                Ok(functions) => functions,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read test file");
                    Vec::new()
                }
            };
            let relative_path = path
                .strip_prefix(&self.project)
                .map(Path::to_path_buf)
                .unwrap_or_else(|_| path.clone());
            reports.insert(
                path,
                TestFileReport {
                    valid: !test_functions.is_empty(),
                    test_functions,
                    relative_path,
                },
            );
        }
        Ok(reports)
    }

    fn walk(&self, dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
        let entries =
            fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to read {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to inspect {}", path.display()))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            if file_type.is_dir() {
                if is_skipped_dir(&name) || self.excluded.iter().any(|skip| skip == &path) {
                    continue;
                }
                self.walk(&path, found)?;
            } else if file_type.is_file() && is_test_file(&name) {
                found.push(path);
            }
        }
        Ok(())
    }
}

pub fn is_test_file(name: &str) -> bool {
    name.starts_with("test_") && name.ends_with(".py") && !name.starts_with("__")
}

fn is_skipped_dir(name: &str) -> bool {
    name.starts_with('.') || SKIPPED_DIRS.contains(&name)
}

pub fn extract_test_functions(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read test file {}", path.display()))?;
    Ok(test_functions_in(&content))
}

pub(crate) fn test_functions_in(source: &str) -> Vec<String> {
    let mut functions: Vec<String> = Vec::new();
    for line in source.lines() {
        let line = line.trim_start();
        let line = line.strip_prefix("async ").map(str::trim_start).unwrap_or(line);
        let Some(rest) = line.strip_prefix("def ") else {
            continue;
        };
        let rest = rest.trim_start();
        let name_len = rest
            .find(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
            .unwrap_or(rest.len());
        let (name, tail) = rest.split_at(name_len);
        if !name.starts_with("test_") || !tail.trim_start().starts_with('(') {
            continue;
        }
        if !functions.iter().any(|existing| existing == name) {
            functions.push(name.to_string());
        }
    }
    functions
}
