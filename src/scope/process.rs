/// Processes created inside a scope
use crate::config::types::{BindError, Result};
use crate::scope::backend::{ContainerBackend, ProcessToken};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Program to start inside a scope
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Image path
    pub program: PathBuf,
    /// Arguments after the program name
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory (inherits the caller's when absent)
    #[serde(default)]
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Full command line with Windows argument quoting, program name first
    pub fn command_line(&self) -> String {
        let mut line = quote_arg(&self.program.to_string_lossy());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&quote_arg(arg));
        }
        line
    }
}

/// Quote one argument so the MSVC runtime parses it back verbatim
fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains([' ', '\t', '\n', '\x0b', '"']) {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('"');
    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
                out.push('"');
                backslashes = 0;
            }
            _ => {
                out.extend(std::iter::repeat('\\').take(backslashes));
                out.push(c);
                backslashes = 0;
            }
        }
    }
    out.extend(std::iter::repeat('\\').take(backslashes * 2));
    out.push('"');
    out
}

/// Execution state of a launched process
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum StartState {
    #[serde(rename = "suspended")]
    Suspended,
    #[serde(rename = "running")]
    Running,
    #[serde(rename = "exited")]
    Exited,
}

/// A process created under a scope. Handles are closed on drop.
pub struct LaunchedProcess {
    token: ProcessToken,
    backend: Arc<dyn ContainerBackend>,
    state: StartState,
    loader_bypass_disabled: bool,
    exit_code: Option<u32>,
}

impl LaunchedProcess {
    pub(crate) fn new(token: ProcessToken, backend: Arc<dyn ContainerBackend>) -> Self {
        Self {
            token,
            backend,
            state: StartState::Suspended,
            loader_bypass_disabled: false,
            exit_code: None,
        }
    }

    pub fn pid(&self) -> u32 {
        self.token.pid
    }

    pub fn start_state(&self) -> StartState {
        self.state
    }

    /// Whether the image-cache fast path has been disabled in this process
    pub fn loader_bypass_disabled(&self) -> bool {
        self.loader_bypass_disabled
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Force filesystem-backed resolution of cached system images.
    ///
    /// Only legal while suspended: once the primary thread runs, early-bound libraries may
    /// already have been served from the cache.
    pub fn disable_image_cache_fast_path(&mut self) -> Result<()> {
        if self.state != StartState::Suspended {
            return Err(BindError::InvalidParameter(format!(
                "loader correction for pid {} must happen before resume",
                self.token.pid
            )));
        }
        if self.loader_bypass_disabled {
            return Ok(());
        }
        self.backend.disable_image_cache_fast_path(self.token)?;
        self.loader_bypass_disabled = true;
        log::info!("Disabled image-cache fast path for pid {}", self.token.pid);
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state != StartState::Suspended {
            return Err(BindError::Process(format!(
                "pid {} is not suspended",
                self.token.pid
            )));
        }
        self.backend.resume(self.token)?;
        self.state = StartState::Running;
        log::debug!("Resumed pid {}", self.token.pid);
        Ok(())
    }

    /// Block until exit; repeated calls return the recorded code
    pub fn wait(&mut self) -> Result<u32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }
        if self.state == StartState::Suspended {
            return Err(BindError::Process(format!(
                "pid {} is still suspended; waiting would never return",
                self.token.pid
            )));
        }
        let code = self.backend.wait(self.token)?;
        self.state = StartState::Exited;
        self.exit_code = Some(code);
        log::info!("pid {} exited with code {}", self.token.pid, code);
        Ok(code)
    }
}

impl Drop for LaunchedProcess {
    fn drop(&mut self) {
        self.backend.close_process(self.token);
    }
}

impl std::fmt::Debug for LaunchedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchedProcess")
            .field("pid", &self.token.pid)
            .field("state", &self.state)
            .field("loader_bypass_disabled", &self.loader_bypass_disabled)
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_plain() {
        let cmd = CommandSpec::new("C:\\Windows\\System32\\cmd.exe").arg("/c").arg("dir");
        assert_eq!(cmd.command_line(), "C:\\Windows\\System32\\cmd.exe /c dir");
    }

    #[test]
    fn test_command_line_quoting() {
        assert_eq!(quote_arg("two words"), "\"two words\"");
        assert_eq!(quote_arg(""), "\"\"");
        assert_eq!(quote_arg("say \"hi\""), "\"say \\\"hi\\\"\"");
        assert_eq!(quote_arg("C:\\dir with space\\"), "\"C:\\dir with space\\\\\"");
        assert_eq!(quote_arg("C:\\plain\\"), "C:\\plain\\");
    }
}
