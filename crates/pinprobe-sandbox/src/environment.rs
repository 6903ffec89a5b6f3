use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use pinprobe_core::Requirements;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::fs_utils::{remove_dir_if_exists, remove_file_if_exists};
use crate::layout::{default_python, SandboxLayout};
use crate::process::{run_with_timeout, CommandOutput};
use crate::sandbox::Sandbox;

pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(900);

#[derive(Debug, Clone)]
pub struct Environment {
    layout: SandboxLayout,
    provision_command: Vec<String>,
    step_timeout: Option<Duration>,
    created: bool,
}

impl Environment {
    pub fn new(layout: SandboxLayout) -> Self {
        Self {
            layout,
            provision_command: venv_command(default_python()),
            step_timeout: Some(DEFAULT_STEP_TIMEOUT),
            created: false,
        }
    }

    pub fn with_python(mut self, python: &str) -> Self {
        self.provision_command = venv_command(python);
        self
    }

    pub fn with_provision_command(mut self, command: Vec<String>) -> Self {
        self.provision_command = command;
        self
    }

    pub fn with_step_timeout(mut self, step_timeout: Option<Duration>) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    fn ensure_created(&self) -> Result<()> {
        if !self.created {
            bail!("sandbox has not been created");
        }
        Ok(())
    }

    fn pip(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut command = Command::new(self.layout.pip_path());
        command
            .args(args)
            .arg("--disable-pip-version-check")
            .current_dir(self.layout.project());
        run_with_timeout(&mut command, self.step_timeout)
            .with_context(|| format!("failed to run {}", self.layout.pip_path().display()))
    }

    fn pip_succeeded(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = self.pip(args)?;
        if !output.success() {
            return Err(anyhow!(output.diagnostic()));
        }
        Ok(output)
    }
}

impl Sandbox for Environment {
    fn root(&self) -> &Path {
        self.layout.root()
    }

    fn create(&mut self) -> Result<()> {
        self.created = false;
        let root = self.layout.root();
        if remove_dir_if_exists(root)
            .with_context(|| format!("failed to remove existing sandbox {}", root.display()))?
        {
            debug!(root = %root.display(), "removed existing sandbox");
        }

        let Some((program, args)) = self.provision_command.split_first() else {
            bail!("sandbox provisioning command is empty");
        };
        let mut command = Command::new(program);
        command
            .args(args)
            .arg(root)
            .current_dir(self.layout.project());
        let output = run_with_timeout(&mut command, self.step_timeout)
            .with_context(|| format!("failed to start sandbox provisioning with {program}"))?;
        if !output.success() {
            bail!("failed to create sandbox: {}", output.diagnostic());
        }

        let python = self.layout.python_path();
        if !python.exists() {
            bail!(
                "sandbox interpreter missing after provisioning: {}",
                python.display()
            );
        }

        self.created = true;
        info!(root = %root.display(), "created sandbox");
        Ok(())
    }

    fn install_package(&mut self, name: &str, version: Option<&str>) -> Result<()> {
        self.ensure_created()?;
        let spec = match version {
            Some(version) => format!("{name}=={version}"),
            None => name.to_string(),
        };
        info!(package = %spec, "installing package");
        self.pip_succeeded(&["install", &spec])?;
        Ok(())
    }

    fn install_all(&mut self, requirements: &Requirements) -> Result<()> {
        self.ensure_created()?;
        if requirements.is_empty() {
            debug!("no requirements to install");
            return Ok(());
        }

        let manifest = TransientManifest::write(
            self.layout.transient_manifest_path(),
            &render_requirements(requirements),
        )?;
        info!(count = requirements.len(), "installing requirement set");
        let manifest_arg = manifest.path().to_string_lossy().into_owned();
        self.pip_succeeded(&["install", "-r", &manifest_arg])?;
        Ok(())
    }

    fn uninstall_package(&mut self, name: &str) -> Result<()> {
        self.ensure_created()?;
        info!(package = %name, "uninstalling package");
        self.pip_succeeded(&["uninstall", "-y", name])?;
        Ok(())
    }

    fn list_installed(&self) -> BTreeMap<String, String> {
        let listed = self
            .ensure_created()
            .and_then(|()| self.pip_succeeded(&["list", "--format=json"]))
            .and_then(|output| parse_pip_list(&output.stdout));
        match listed {
            Ok(installed) => installed,
            Err(err) => {
                let message = format!("{err:#}");
                warn!(error = %message, "failed to list installed packages");
                BTreeMap::new()
            }
        }
    }

    fn run_command(&self, args: &[String]) -> Result<CommandOutput> {
        self.ensure_created()?;
        let mut command = Command::new(self.layout.python_path());
        command.args(args).current_dir(self.layout.project());
        match run_with_timeout(&mut command, self.step_timeout) {
            Ok(output) => Ok(output),
            Err(err) => Ok(CommandOutput::failed_to_start(format!("{err:#}"))),
        }
    }

    fn destroy(&mut self) {
        self.created = false;
        let root = self.layout.root();
        match remove_dir_if_exists(root) {
            Ok(true) => info!(root = %root.display(), "removed sandbox"),
            Ok(false) => debug!(root = %root.display(), "no sandbox to remove"),
            Err(err) => warn!(root = %root.display(), error = %err, "failed to remove sandbox"),
        }
    }
}

fn venv_command(python: &str) -> Vec<String> {
    vec![python.to_string(), "-m".to_string(), "venv".to_string()]
}

pub(crate) fn render_requirements(requirements: &Requirements) -> String {
    let mut rendered = String::new();
    for (name, version) in requirements {
        match version {
            Some(version) => rendered.push_str(&format!("{name}=={version}\n")),
            None => rendered.push_str(&format!("{name}\n")),
        }
    }
    rendered
}

#[derive(Debug, Deserialize)]
struct PipListEntry {
    name: String,
    version: String,
}

pub(crate) fn parse_pip_list(raw: &str) -> Result<BTreeMap<String, String>> {
    let entries: Vec<PipListEntry> =
        serde_json::from_str(raw.trim()).context("failed to parse pip list output")?;
    Ok(entries
        .into_iter()
        .map(|entry| (entry.name, entry.version))
        .collect())
}

struct TransientManifest {
    path: PathBuf,
}

impl TransientManifest {
    fn write(path: PathBuf, content: &str) -> Result<Self> {
        fs::write(&path, content)
            .with_context(|| format!("failed to write transient manifest {}", path.display()))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TransientManifest {
    fn drop(&mut self) {
        if let Err(err) = remove_file_if_exists(&self.path) {
            warn!(path = %self.path.display(), error = %err, "failed to remove transient manifest");
        }
    }
}
