//! Interfaces to the components around the pty core.
//!
//! Agent session-log readers and git/GitHub subprocess wrappers live outside
//! this workspace; the core only sees the shapes defined here.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::warn;

/// One agent session as reported by a session-log reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Produces session summaries from some on-disk location.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionSource: Send + Sync {
    fn name(&self) -> String;

    async fn sessions(&self, root: &Path) -> Result<Vec<AgentSessionSummary>>;
}

/// Query every source and merge the results, newest first. A failing source
/// is logged and skipped.
pub async fn collect_sessions(
    sources: &[Box<dyn SessionSource>],
    root: &Path,
) -> Vec<AgentSessionSummary> {
    let mut all = Vec::new();
    for source in sources {
        match source.sessions(root).await {
            Ok(mut sessions) => all.append(&mut sessions),
            Err(e) => warn!(source = %source.name(), "session source failed: {:#}", e),
        }
    }
    all.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    all
}

/// Result of a finished subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs an argv to completion and returns its captured output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput>;
}

/// `CommandRunner` backed by real child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    cwd: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty command line");
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run {}", program))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn summary(id: &str, secs: i64) -> AgentSessionSummary {
        AgentSessionSummary {
            id: id.to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            status: "idle".to_string(),
            summary: format!("session {}", id),
            cwd: None,
            repository: None,
            branch: None,
        }
    }

    #[tokio::test]
    async fn collect_sessions_merges_newest_first_and_skips_failures() {
        let mut claude = MockSessionSource::new();
        claude.expect_name().return_const("claude".to_string());
        claude
            .expect_sessions()
            .returning(|_| Ok(vec![summary("a", 10), summary("c", 30)]));

        let mut broken = MockSessionSource::new();
        broken.expect_name().return_const("broken".to_string());
        broken
            .expect_sessions()
            .returning(|_| Err(anyhow::anyhow!("unreadable log")));

        let mut codex = MockSessionSource::new();
        codex.expect_name().return_const("codex".to_string());
        codex
            .expect_sessions()
            .returning(|_| Ok(vec![summary("b", 20)]));

        let sources: Vec<Box<dyn SessionSource>> =
            vec![Box::new(claude), Box::new(broken), Box::new(codex)];
        let merged = collect_sessions(&sources, Path::new("/tmp")).await;

        let ids: Vec<_> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn process_runner_captures_streams_and_exit_code() {
        let runner = ProcessRunner::new();
        let argv: Vec<String> = ["sh", "-c", "echo out; echo err >&2; exit 3"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let output = runner.run(&argv).await.unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, 3);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn process_runner_rejects_empty_argv() {
        let runner = ProcessRunner::new();
        assert!(runner.run(&[]).await.is_err());
    }

    #[test]
    fn summary_serializes_camel_case_without_empty_fields() {
        let json = serde_json::to_value(summary("x", 0)).unwrap();
        assert!(json.get("cwd").is_none());
        assert_eq!(json["summary"], "session x");
    }
}
