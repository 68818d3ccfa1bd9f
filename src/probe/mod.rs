//! Probe module: runs the external `nexttrace` binary for one target.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::Target;
use crate::trace::{parse_output, ParseError, TraceResult};

pub const DEFAULT_BINARY: &str = "nexttrace";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("execution timeout after {0:?}")]
    Timeout(Duration),
    #[error("failed to launch {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },
    #[error("execution failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("execution failed: {status}")]
    Exit { status: ExitStatus, output: String },
    #[error("failed to parse output: {0}")]
    Parse(#[from] ParseError),
    #[error("execution cancelled")]
    Cancelled,
}

/// How to invoke the trace tool. Shared by every target loop.
#[derive(Debug, Clone)]
pub struct TraceCommand {
    pub binary: String,
    pub timeout: Duration,
}

impl Default for TraceCommand {
    fn default() -> Self {
        Self {
            binary: DEFAULT_BINARY.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl TraceCommand {
    pub fn new(binary: &str, timeout: Duration) -> Self {
        Self {
            binary: binary.to_string(),
            timeout,
        }
    }

    /// JSON output, no color, no map upload.
    pub fn args(&self, target: &Target) -> Vec<String> {
        let mut args = vec![
            "-j".to_string(),
            "--no-color".to_string(),
            "-M".to_string(),
            target.host.clone(),
        ];
        if target.max_hops > 0 {
            args.push("--max-hops".to_string());
            args.push(target.max_hops.to_string());
        }
        args
    }

    /// Trace `target` once.
    ///
    /// The child is killed if the timeout elapses or `cancel` fires before it
    /// exits.
    pub async fn run(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<TraceResult, ProbeError> {
        let child = Command::new(&self.binary)
            .args(self.args(target))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ProbeError::Cancelled),
            res = tokio::time::timeout(self.timeout, child.wait_with_output()) => match res {
                Ok(output) => output?,
                Err(_) => return Err(ProbeError::Timeout(self.timeout)),
            },
        };

        // Banners land on stderr ahead of the JSON document on stdout.
        let mut combined = output.stderr;
        combined.extend_from_slice(&output.stdout);

        if !output.status.success() {
            return Err(ProbeError::Exit {
                status: output.status,
                output: String::from_utf8_lossy(&combined).into_owned(),
            });
        }

        let mut result = parse_output(&combined)?;
        result.target = target.host.clone();
        Ok(result)
    }
}


/// Write an executable shell script standing in for `nexttrace`.
#[cfg(all(test, unix))]
pub(crate) fn fake_binary(dir: &std::path::Path, body: &str) -> String {
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("nexttrace");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh\n{}", body).unwrap();
    file.sync_all().unwrap();
    drop(file);

    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}
