//! Terminal host commands.
//!
//! Both windows run inside kitty. The camera window launches the panel as a
//! sibling window and sizes itself to the camera frame; either window closes
//! its own host window on exit. The commands are opaque to the coordination
//! layer and go through [`WindowHost`].

use crate::config::TimingConfig;
use crate::error::{Result, TgutError};
use crate::handshake::PeerLauncher;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// A window to open next to the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub title: String,
    /// Command line, split on whitespace.
    pub command: String,
    /// Keep the window open after the command exits.
    pub hold: bool,
}

/// Terminal host operations.
#[async_trait]
pub trait WindowHost: Send + Sync {
    async fn launch_window(&self, spec: &LaunchSpec) -> Result<()>;

    /// Resize the current OS window, in pixels.
    async fn resize_self(&self, width: u32, height: u32) -> Result<()>;

    async fn close_self(&self) -> Result<()>;
}

/// Runs `kitten @` remote-control commands.
///
/// Commands are fire-and-forget: one that does not finish within the command
/// timeout is left running and treated as success.
#[derive(Debug, Clone)]
pub struct KittyHost {
    program: String,
    timeout: Duration,
}

impl Default for KittyHost {
    fn default() -> Self {
        Self {
            program: "kitten".to_string(),
            timeout: TimingConfig::HOST_COMMAND_TIMEOUT,
        }
    }
}

impl KittyHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use another executable in place of `kitten`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn remote(&self, args: Vec<String>) -> Result<()> {
        let command = args.first().map(String::as_str).unwrap_or("");
        debug!("{} @ {}", self.program, args.join(" "));
        let child = tokio::process::Command::new(&self.program)
            .arg("@")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                let message = if e.kind() == std::io::ErrorKind::NotFound {
                    format!("{} not found", self.program)
                } else {
                    format!("Failed to run {}: {}", self.program, e)
                };
                TgutError::Io {
                    message,
                    source: Some(e),
                }
            })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => {
                debug!("{} @ {} still running, not waiting", self.program, command);
                Ok(())
            }
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => Err(TgutError::device(format!(
                "{} @ {} exited with {}: {}",
                self.program,
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Err(e)) => Err(e.into()),
        }
    }
}

fn launch_args(spec: &LaunchSpec) -> Vec<String> {
    let mut args: Vec<String> = [
        "launch",
        "--title",
        spec.title.as_str(),
        "--cwd",
        "current",
        "--copy-env",
        "--location",
        "after",
        "--no-response",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    if spec.hold {
        args.push("--hold".to_string());
    }
    args.extend(spec.command.split_whitespace().map(str::to_string));
    args
}

#[async_trait]
impl WindowHost for KittyHost {
    async fn launch_window(&self, spec: &LaunchSpec) -> Result<()> {
        info!("Launching {} ({})", spec.title, spec.command);
        self.remote(launch_args(spec)).await
    }

    async fn resize_self(&self, width: u32, height: u32) -> Result<()> {
        self.remote(
            [
                "resize-os-window",
                "--action",
                "resize",
                "--unit",
                "pixels",
                "--width",
                &width.to_string(),
                "--height",
                &height.to_string(),
                "--self",
                "--no-response",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
        .await
    }

    async fn close_self(&self) -> Result<()> {
        self.remote(
            ["close-window", "--self", "--no-response"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
        .await
    }
}

/// Host that does nothing, for headless runs and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHost;

#[async_trait]
impl WindowHost for NullHost {
    async fn launch_window(&self, spec: &LaunchSpec) -> Result<()> {
        debug!("Not launching {}: no window host", spec.title);
        Ok(())
    }

    async fn resize_self(&self, _width: u32, _height: u32) -> Result<()> {
        Ok(())
    }

    async fn close_self(&self) -> Result<()> {
        Ok(())
    }
}

/// Launches the peer window through a [`WindowHost`].
pub struct HostLauncher {
    host: Arc<dyn WindowHost>,
    spec: LaunchSpec,
}

impl HostLauncher {
    pub fn new(host: Arc<dyn WindowHost>, spec: LaunchSpec) -> Self {
        Self { host, spec }
    }
}

#[async_trait]
impl PeerLauncher for HostLauncher {
    async fn launch(&self) -> Result<()> {
        self.host.launch_window(&self.spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(hold: bool) -> LaunchSpec {
        LaunchSpec {
            title: "PANEL".into(),
            command: "tgutui  control-panel".into(),
            hold,
        }
    }

    #[test]
    fn test_launch_args() {
        let args = launch_args(&spec(true));
        assert_eq!(args[0], "launch");
        assert_eq!(args[2], "PANEL");
        assert!(args.contains(&"--hold".to_string()));
        assert_eq!(&args[args.len() - 2..], ["tgutui", "control-panel"]);

        assert!(!launch_args(&spec(false)).contains(&"--hold".to_string()));
    }

    #[tokio::test]
    async fn test_missing_program_is_an_error() {
        let host = KittyHost::new().with_program("definitely-not-kitten-tgut");
        let err = host.close_self().await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status_is_checked() {
        let ok = KittyHost::new().with_program("true");
        ok.close_self().await.unwrap();

        let failing = KittyHost::new().with_program("false");
        let err = failing.resize_self(800, 600).await.unwrap_err();
        assert_eq!(err.to_rpc_error_code(), -32003);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_empty_remote_command() {
        KittyHost::new().with_program("true").remote(Vec::new()).await.unwrap();

        let err = KittyHost::new()
            .with_program("false")
            .remote(Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_rpc_error_code(), -32003);
    }

    #[tokio::test]
    async fn test_host_launcher_uses_null_host() {
        let launcher = HostLauncher::new(Arc::new(NullHost), spec(false));
        launcher.launch().await.unwrap();
    }
}
