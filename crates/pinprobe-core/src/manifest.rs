use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

pub type Requirements = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    RequirementsTxt,
    Pipfile,
}

impl ManifestKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::RequirementsTxt => "requirements.txt",
            Self::Pipfile => "Pipfile",
        }
    }

    pub fn parse(self, content: &str) -> Result<Requirements> {
        match self {
            Self::RequirementsTxt => Ok(parse_requirements_txt(content)),
            Self::Pipfile => parse_pipfile(content),
        }
    }

    pub fn rewrite(self, content: &str, updates: &BTreeMap<String, String>) -> String {
        match self {
            Self::RequirementsTxt => rewrite_requirements_txt(content, updates),
            Self::Pipfile => rewrite_pipfile(content, updates),
        }
    }
}

pub fn detect_manifest(project: &Path) -> Option<(ManifestKind, PathBuf)> {
    [ManifestKind::RequirementsTxt, ManifestKind::Pipfile]
        .into_iter()
        .map(|kind| (kind, project.join(kind.file_name())))
        .find(|(_, path)| path.is_file())
}

pub fn read_manifest(project: &Path) -> Result<Requirements> {
    let Some((kind, path)) = detect_manifest(project) else {
        return Err(anyhow!(
            "no requirements.txt or Pipfile found in {}",
            project.display()
        ));
    };
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read manifest: {}", path.display()))?;
    kind.parse(&content)
        .with_context(|| format!("failed to parse manifest: {}", path.display()))
}

pub fn canonical_name(name: &str) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = !canonical.is_empty();
            continue;
        }
        if pending_separator {
            canonical.push('-');
            pending_separator = false;
        }
        canonical.push(ch.to_ascii_lowercase());
    }
    canonical
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RequirementLine {
    name: String,
    written_name: String,
    version: Option<String>,
    marker: Option<String>,
}

impl RequirementLine {
    fn parse(line: &str) -> Option<Self> {
        let line = strip_inline_comment(line).trim();
        if line.is_empty() || line.starts_with('-') || line.contains("://") {
            return None;
        }

        let (spec, marker) = match line.split_once(';') {
            Some((spec, marker)) => (spec.trim(), Some(marker.trim().to_string())),
            None => (line, None),
        };
        let operator_at = spec
            .find(|ch: char| matches!(ch, '=' | '<' | '>' | '!' | '~') || ch.is_whitespace())
            .unwrap_or(spec.len());
        let (written_name, constraint) = spec.split_at(operator_at);
        let written_name = written_name.trim();
        let bare_name = written_name
            .split_once('[')
            .map_or(written_name, |(name, _)| name);
        let name = sanitize_name(bare_name);
        if name.is_empty() {
            return None;
        }

        let constraint = constraint.trim_start();
        let version = constraint
            .strip_prefix("==")
            .or_else(|| constraint.strip_prefix(">="))
            .map(|rest| rest.split(',').next().unwrap_or(rest).trim().to_string())
            .filter(|version| !version.is_empty());

        Some(Self {
            name,
            written_name: written_name.to_string(),
            version,
            marker: marker.filter(|marker| !marker.is_empty()),
        })
    }

    fn pinned_to(&self, version: &str) -> String {
        match &self.marker {
            Some(marker) => format!("{}=={version} ; {marker}", self.written_name),
            None => format!("{}=={version}", self.written_name),
        }
    }
}

fn strip_inline_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(index) => &line[..index],
        None => line,
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
        .collect()
}

pub fn parse_requirements_txt(content: &str) -> Requirements {
    content
        .lines()
        .filter_map(RequirementLine::parse)
        .map(|line| (line.name, line.version))
        .collect()
}

pub fn parse_pipfile(content: &str) -> Result<Requirements> {
    let document: toml::Table = toml::from_str(content).context("failed to parse Pipfile")?;
    let mut packages = Requirements::new();
    let Some(section) = document.get("packages") else {
        return Ok(packages);
    };
    let table = section
        .as_table()
        .ok_or_else(|| anyhow!("Pipfile [packages] must be a table"))?;

    for (name, value) in table {
        let spec = match value {
            toml::Value::String(spec) => Some(spec.as_str()),
            toml::Value::Table(entry) => entry.get("version").and_then(toml::Value::as_str),
            _ => None,
        };
        packages.insert(name.clone(), spec.and_then(pinned_version_from_spec));
    }
    Ok(packages)
}

fn pinned_version_from_spec(spec: &str) -> Option<String> {
    let spec = spec.trim();
    if spec.is_empty() || spec == "*" {
        return None;
    }
    let version = ["==", ">=", "~="]
        .iter()
        .find_map(|operator| spec.strip_prefix(*operator))
        .or_else(|| spec.starts_with(|ch: char| ch.is_ascii_digit()).then_some(spec))?;
    let version = version.split(',').next().unwrap_or(version).trim();
    (!version.is_empty()).then(|| version.to_string())
}

fn canonical_updates(updates: &BTreeMap<String, String>) -> BTreeMap<String, &str> {
    updates
        .iter()
        .map(|(name, version)| (canonical_name(name), version.as_str()))
        .collect()
}

pub fn rewrite_requirements_txt(content: &str, updates: &BTreeMap<String, String>) -> String {
    let updates = canonical_updates(updates);
    let mut lines = Vec::new();
    for line in content.lines() {
        let pinned = RequirementLine::parse(line).and_then(|requirement| {
            updates
                .get(&canonical_name(&requirement.name))
                .map(|version| requirement.pinned_to(version))
        });
        lines.push(pinned.unwrap_or_else(|| line.to_string()));
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

pub fn rewrite_pipfile(content: &str, updates: &BTreeMap<String, String>) -> String {
    let updates = canonical_updates(updates);
    let mut rendered = String::with_capacity(content.len());
    let mut in_packages = false;

    for line in content.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with('[') {
            in_packages = trimmed == "[packages]";
            rendered.push_str(line);
            continue;
        }

        let replacement = in_packages
            .then(|| pipfile_string_entry(trimmed))
            .flatten()
            .and_then(|key| {
                updates
                    .get(&canonical_name(key.trim_matches('"')))
                    .map(|version| format!("{key} = \"=={version}\""))
            });
        match replacement {
            Some(mut replaced) => {
                if line.ends_with('\n') {
                    replaced.push('\n');
                }
                rendered.push_str(&replaced);
            }
            None => rendered.push_str(line),
        }
    }
    rendered
}

fn pipfile_string_entry(line: &str) -> Option<&str> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();
    let quoted = value.len() >= 2 && value.starts_with('"') && value.ends_with('"');
    (!key.is_empty() && quoted).then_some(key)
}
