mod environment;
mod fs_utils;
mod layout;
mod process;
mod sandbox;

pub use environment::{Environment, DEFAULT_STEP_TIMEOUT};
pub use layout::{default_python, SandboxLayout, DEFAULT_SANDBOX_DIR};
pub use process::{run_with_timeout, CommandOutput, CommandStatus};
pub use sandbox::{verify_installed, Sandbox};
