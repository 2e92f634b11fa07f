//! `uvx` subprocess executor.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use stac_ingest_shared::{CatalogItem, GenerationRequest};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use super::{finalize_item, GenerationExecutor};
use crate::errors::GenerationError;

/// Program used to run stactools packages.
pub const DEFAULT_UVX_PROGRAM: &str = "uvx";

/// Hard limit for one transformation. Kept below the generation visibility window
/// so a timed out attempt is reported before its lease lapses.
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(110);

/// Runs `stac <group> create-item` from an ephemeral environment holding the
/// requested package.
///
/// The command line is
/// `uvx --with requests,<package> --from stactools stac <group> create-item <args>... [--<option> <value>]... <output.json>`.
#[derive(Debug, Clone)]
pub struct UvxExecutor {
    program: String,
    program_args: Vec<String>,
    timeout: Duration,
}

impl Default for UvxExecutor {
    fn default() -> Self {
        Self::new(DEFAULT_UVX_PROGRAM, DEFAULT_EXECUTION_TIMEOUT)
    }
}

impl UvxExecutor {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            program_args: Vec::new(),
            timeout,
        }
    }

    /// Arguments placed before the generated command line, e.g. a wrapper script.
    pub fn with_program_args(mut self, args: Vec<String>) -> Self {
        self.program_args = args;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Command line arguments for `request`, writing the item to `output`.
    pub fn command_args(&self, request: &GenerationRequest, output: &str) -> Vec<String> {
        let mut args = self.program_args.clone();
        args.extend([
            "--with".to_string(),
            format!("requests,{}", request.package_name),
            "--from".to_string(),
            "stactools".to_string(),
            "stac".to_string(),
            request.group_name.clone(),
            "create-item".to_string(),
        ]);
        args.extend(request.create_item_args.iter().cloned());
        for (option, value) in &request.create_item_options {
            args.push(format!("--{option}"));
            args.push(value.clone());
        }
        args.push(output.to_string());
        args
    }
}

#[async_trait]
impl GenerationExecutor for UvxExecutor {
    #[instrument(skip(self, request), fields(package = %request.package_name, group = %request.group_name))]
    async fn generate(&self, request: &GenerationRequest) -> Result<CatalogItem, GenerationError> {
        request.validate()?;

        let output = tempfile::Builder::new()
            .prefix("item-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| GenerationError::infrastructure(format!("failed to create output file: {e}")))?;
        let output_path = output.path().to_string_lossy().into_owned();
        let args = self.command_args(request, &output_path);

        info!(command = %format!("{} {}", self.program, args.join(" ")), "Executing transformation");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // uvx runs the package in a child interpreter; a group lets a timeout reach it
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            GenerationError::infrastructure(format!("failed to spawn {}: {e}", self.program))
        })?;
        let pid = child.id();

        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result,
            Err(_) => {
                error!(timeout_secs = self.timeout.as_secs(), "Transformation timed out");
                if let Some(pid) = pid {
                    kill_process_group(pid).await;
                }
                return Err(GenerationError::ExecutionTimeout(self.timeout));
            }
        };
        let result = result.map_err(|e| {
            GenerationError::infrastructure(format!("failed to wait for {}: {e}", self.program))
        })?;

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        debug!(stdout = %stdout, "Transformation output");

        if !result.status.success() {
            error!(
                exit_code = ?result.status.code(),
                stderr = %stderr,
                "Transformation failed"
            );
            return Err(GenerationError::TransformationFailure {
                exit_code: result.status.code(),
                stderr: stderr.into_owned(),
            });
        }

        let body = tokio::fs::read(output.path()).await.map_err(|e| {
            GenerationError::infrastructure(format!("failed to read {output_path}: {e}"))
        })?;
        let document: Value = serde_json::from_slice(&body).map_err(|e| {
            GenerationError::transformation(format!("transformation output is not JSON: {e}"))
        })?;

        finalize_item(document, request)
    }
}

/// Send SIGKILL to the process group led by `pid`.
#[cfg(unix)]
async fn kill_process_group(pid: u32) {
    let status = Command::new("/bin/sh")
        .arg("-c")
        .arg(format!("kill -9 -{pid}"))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match status {
        Ok(status) if status.success() => debug!(pid, "Killed transformation process group"),
        Ok(status) => warn!(pid, exit_code = ?status.code(), "Failed to kill process group"),
        Err(e) => warn!(pid, error = %e, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pid: u32) {}
