use std::path::{Path, PathBuf};

pub const DEFAULT_SANDBOX_DIR: &str = ".pinprobe-venv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxLayout {
    project: PathBuf,
    root: PathBuf,
}

impl SandboxLayout {
    pub fn new(project: impl Into<PathBuf>) -> Self {
        let project = project.into();
        let root = project.join(DEFAULT_SANDBOX_DIR);
        Self { project, root }
    }

    pub fn with_root(project: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            project: project.into(),
            root: root.into(),
        }
    }

    pub fn project(&self) -> &Path {
        &self.project
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts")
        } else {
            self.root.join("bin")
        }
    }

    pub fn python_path(&self) -> PathBuf {
        self.bin_dir().join(executable_name("python"))
    }

    pub fn pip_path(&self) -> PathBuf {
        self.bin_dir().join(executable_name("pip"))
    }

    pub fn transient_manifest_path(&self) -> PathBuf {
        self.root.join("temp_requirements.txt")
    }
}

pub fn default_python() -> &'static str {
    if cfg!(windows) {
        "python"
    } else {
        "python3"
    }
}

fn executable_name(stem: &str) -> String {
    if cfg!(windows) {
        format!("{stem}.exe")
    } else {
        stem.to_string()
    }
}
