use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const KILLED_OUTPUT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: CommandStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn failed_to_start(message: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: message.into(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn success(&self) -> bool {
        self.status == CommandStatus::Succeeded
    }

    pub fn timed_out(&self) -> bool {
        self.status == CommandStatus::TimedOut
    }

    pub fn diagnostic(&self) -> String {
        if self.timed_out() {
            return format!("timed out after {}s", self.elapsed.as_secs());
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exited with status {code}"),
            None => "terminated without an exit status".to_string(),
        }
    }

    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (true, true) => String::new(),
        }
    }
}

pub fn run_with_timeout(command: &mut Command, timeout: Option<Duration>) -> Result<CommandOutput> {
    let started = Instant::now();
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context("command failed to start")?;
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let (exit_status, timed_out) = loop {
        if let Some(status) = child
            .try_wait()
            .context("failed checking command status")?
        {
            break (Some(status), false);
        }
        if timeout.is_some_and(|limit| started.elapsed() >= limit) {
            let _ = child.kill();
            break (child.wait().ok(), true);
        }
        thread::sleep(POLL_INTERVAL);
    };
    let elapsed = started.elapsed();

    // A killed child may leave grandchildren holding the pipes open.
    let wait_for_output = |receiver: Option<Receiver<String>>| -> String {
        let Some(receiver) = receiver else {
            return String::new();
        };
        if timed_out {
            receiver.recv_timeout(KILLED_OUTPUT_GRACE).unwrap_or_default()
        } else {
            receiver.recv().unwrap_or_default()
        }
    };
    let stdout = wait_for_output(stdout);
    let stderr = wait_for_output(stderr);

    let status = match exit_status {
        _ if timed_out => CommandStatus::TimedOut,
        Some(status) if status.success() => CommandStatus::Succeeded,
        _ => CommandStatus::Failed,
    };
    Ok(CommandOutput {
        status,
        exit_code: exit_status.and_then(|status| status.code()),
        stdout,
        stderr,
        elapsed,
    })
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = reader.read_to_end(&mut buffer);
        let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
    });
    receiver
}
