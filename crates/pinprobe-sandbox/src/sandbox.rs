use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use pinprobe_core::{canonical_name, versions_match, Requirements};
use tracing::{debug, warn};

use crate::process::CommandOutput;

pub trait Sandbox {
    fn root(&self) -> &Path;

    fn create(&mut self) -> Result<()>;

    fn install_package(&mut self, name: &str, version: Option<&str>) -> Result<()>;

    fn install_all(&mut self, requirements: &Requirements) -> Result<()>;

    fn uninstall_package(&mut self, name: &str) -> Result<()>;

    fn list_installed(&self) -> BTreeMap<String, String>;

    fn verify(&self, requirements: &Requirements) -> bool {
        verify_installed(&self.list_installed(), requirements)
    }

    fn run_command(&self, args: &[String]) -> Result<CommandOutput>;

    fn destroy(&mut self);
}

pub fn verify_installed(
    installed: &BTreeMap<String, String>,
    requirements: &Requirements,
) -> bool {
    let installed = installed
        .iter()
        .map(|(name, version)| (canonical_name(name), version.as_str()))
        .collect::<BTreeMap<_, _>>();

    for (name, required) in requirements {
        let Some(found) = installed.get(&canonical_name(name)) else {
            warn!(package = %name, "required package is not installed");
            return false;
        };
        if let Some(required) = required {
            if !versions_match(found, required) {
                warn!(
                    package = %name,
                    required = %required,
                    installed = %found,
                    "installed version does not match requirement"
                );
                return false;
            }
        }
    }

    debug!(count = requirements.len(), "sandbox matches requirements");
    true
}
