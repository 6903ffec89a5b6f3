use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use pinprobe_core::{canonical_name, ReleaseVersion};
use serde::Deserialize;

use crate::range::select_range;
use crate::resolver::VersionResolver;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
struct StaticIndexFile {
    #[serde(default)]
    packages: BTreeMap<String, StaticPackage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticPackage {
    #[serde(default)]
    pub versions: Vec<String>,
    pub latest: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StaticIndex {
    packages: BTreeMap<String, StaticPackage>,
    include_prereleases: bool,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: StaticIndexFile = toml::from_str(raw).context("failed to parse version index")?;
        let mut index = Self::new();
        for (name, package) in file.packages {
            index.insert(&name, package);
        }
        Ok(index)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read version index {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to load version index {}", path.display()))
    }

    pub fn with_prereleases(mut self, include_prereleases: bool) -> Self {
        self.include_prereleases = include_prereleases;
        self
    }

    pub fn insert(&mut self, name: &str, package: StaticPackage) {
        self.packages.insert(canonical_name(name), package);
    }

    pub fn with_versions(mut self, name: &str, versions: &[&str]) -> Self {
        self.insert(
            name,
            StaticPackage {
                versions: versions.iter().map(|version| version.to_string()).collect(),
                latest: None,
            },
        );
        self
    }

    fn package(&self, name: &str) -> Option<&StaticPackage> {
        self.packages.get(&canonical_name(name))
    }
}

impl VersionResolver for StaticIndex {
    fn latest_version(&self, name: &str) -> Result<Option<String>> {
        let Some(package) = self.package(name) else {
            return Ok(None);
        };
        if let Some(latest) = &package.latest {
            return Ok(Some(latest.clone()));
        }
        Ok(package
            .versions
            .iter()
            .filter_map(|raw| ReleaseVersion::parse(raw).ok())
            .filter(|version| self.include_prereleases || !version.is_prerelease())
            .max()
            .map(|version| version.as_str().to_string()))
    }

    fn versions_in_range(&self, name: &str, from: &str, to: &str) -> Result<Vec<String>> {
        let Some(package) = self.package(name) else {
            return Ok(Vec::new());
        };
        Ok(select_range(
            package.versions.iter().map(String::as_str),
            from,
            to,
            self.include_prereleases,
        ))
    }
}
