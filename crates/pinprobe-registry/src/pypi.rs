use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::range::select_range;
use crate::resolver::VersionResolver;

pub const DEFAULT_INDEX_URL: &str = "https://pypi.org";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct ProjectDocument {
    info: ProjectInfo,
    #[serde(default)]
    releases: BTreeMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ProjectInfo {
    version: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    #[serde(default)]
    yanked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProjectRecord {
    pub(crate) latest: String,
    pub(crate) published: Vec<String>,
}

pub(crate) fn parse_project_document(raw: &str) -> Result<ProjectRecord> {
    let document: ProjectDocument =
        serde_json::from_str(raw).context("failed to decode project document")?;
    let published = document
        .releases
        .into_iter()
        .filter(|(_, files)| files.iter().any(|file| !file.yanked))
        .map(|(version, _)| version)
        .collect();
    Ok(ProjectRecord {
        latest: document.info.version,
        published,
    })
}

pub struct PypiIndex {
    index_url: String,
    client: Client,
    include_prereleases: bool,
    projects: RefCell<BTreeMap<String, Option<ProjectRecord>>>,
}

impl PypiIndex {
    pub fn new(index_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("pinprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;
        Ok(Self::with_client(index_url, client))
    }

    pub fn with_client(index_url: &str, client: Client) -> Self {
        Self {
            index_url: index_url.trim_end_matches('/').to_string(),
            client,
            include_prereleases: false,
            projects: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn with_prereleases(mut self, include_prereleases: bool) -> Self {
        self.include_prereleases = include_prereleases;
        self
    }

    pub fn index_url(&self) -> &str {
        &self.index_url
    }

    fn project(&self, name: &str) -> Result<Option<ProjectRecord>> {
        if let Some(cached) = self.projects.borrow().get(name) {
            return Ok(cached.clone());
        }
        let fetched = self.fetch(name)?;
        self.projects
            .borrow_mut()
            .insert(name.to_string(), fetched.clone());
        Ok(fetched)
    }

    fn fetch(&self, name: &str) -> Result<Option<ProjectRecord>> {
        let url = format!("{}/pypi/{}/json", self.index_url, name);
        debug!(url = %url, "querying package index");
        let response = self
            .client
            .get(&url)
            .send()
            .with_context(|| format!("failed to query {url}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!(package = %name, "package not found in index");
            return Ok(None);
        }
        if !status.is_success() {
            bail!("package index returned {status} for {url}");
        }
        let body = response
            .text()
            .with_context(|| format!("failed to read response from {url}"))?;
        let record =
            parse_project_document(&body).with_context(|| format!("failed to read {url}"))?;
        Ok(Some(record))
    }
}

impl VersionResolver for PypiIndex {
    fn latest_version(&self, name: &str) -> Result<Option<String>> {
        Ok(self.project(name)?.map(|record| record.latest))
    }

    fn versions_in_range(&self, name: &str, from: &str, to: &str) -> Result<Vec<String>> {
        let Some(record) = self.project(name)? else {
            return Ok(Vec::new());
        };
        Ok(select_range(
            record.published.iter().map(String::as_str),
            from,
            to,
            self.include_prereleases,
        ))
    }
}
