//! Host `at` job backend.
//!
//! Each expiration becomes an `rm -f -- '<path>'` job queued with `at -t`.
//! The job number `at` reports is kept so the job can be removed with
//! `atrm` when the entry is cancelled or replaced.
//!
//! Jobs live in the host spool, so they may outlive this process, but the
//! scheduler's index does not; reconciliation after a restart re-submits jobs
//! for every unscheduled file.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{ExpirationBackend, ExpirationEntry, ExpirationError};

#[derive(Debug, Clone)]
pub struct AtJobBackend {
    program: PathBuf,
    remove_program: PathBuf,
}

impl Default for AtJobBackend {
    fn default() -> Self {
        Self::with_programs("at", "atrm")
    }
}

impl AtJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use specific `at` and `atrm` binaries.
    pub fn with_programs(program: impl Into<PathBuf>, remove_program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            remove_program: remove_program.into(),
        }
    }
}

/// Job number from `at`'s confirmation, e.g. `job 12 at Fri Oct 17 10:00:00 2026`.
pub(crate) fn parse_job_id(stderr: &str) -> Option<String> {
    stderr.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        match (words.next(), words.next()) {
            (Some("job"), Some(id)) if id.chars().all(|c| c.is_ascii_digit()) => {
                Some(id.to_string())
            }
            _ => None,
        }
    })
}

/// `at -t` takes `[[CC]YY]MMDDhhmm[.ss]` in local time.
pub(crate) fn at_timestamp(deadline: DateTime<Utc>) -> String {
    deadline
        .with_timezone(&Local)
        .format("%Y%m%d%H%M.%S")
        .to_string()
}

/// Wrap `value` in single quotes for `/bin/sh`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl ExpirationBackend for AtJobBackend {
    fn name(&self) -> &'static str {
        "at"
    }

    fn fires_in_process(&self) -> bool {
        false
    }

    async fn submit(&self, entry: &ExpirationEntry) -> Result<Option<String>, ExpirationError> {
        let script = format!(
            "rm -f -- {}\n",
            shell_quote(&entry.path.to_string_lossy())
        );

        let mut child = Command::new(&self.program)
            .arg("-t")
            .arg(at_timestamp(entry.deadline))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExpirationError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(ExpirationError::Submit {
                path: entry.path.clone(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        let job = parse_job_id(&stderr);
        if job.is_none() {
            tracing::warn!(
                path = %entry.path.display(),
                output = %stderr.trim(),
                "at did not report a job number, the job cannot be withdrawn"
            );
        }
        tracing::debug!(
            path = %entry.path.display(),
            deadline = %entry.deadline,
            job = ?job,
            "Queued at job"
        );
        Ok(job)
    }

    async fn withdraw(&self, job: &str) -> Result<(), ExpirationError> {
        let output = Command::new(&self.remove_program)
            .arg(job)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExpirationError::Spawn {
                program: self.remove_program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ExpirationError::Withdraw {
                job: job.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}
