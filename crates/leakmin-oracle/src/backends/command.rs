use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{OracleError, RegistryError};
use crate::oracle::Oracle;

/// Inference by an external program.
///
/// The source is written to the child's stdin. The last stdout line must be
/// a JSON object `{"status": <int>, "updatedContent": <string>}`; status 0
/// or 2 yields the content, any other status or a non-zero exit yields an
/// empty response.
pub struct CommandOracle {
    name: String,
    program: String,
    args: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CommandReply {
    status: i64,
    #[serde(rename = "updatedContent", default)]
    updated_content: String,
}

impl CommandOracle {
    pub fn new(name: impl Into<String>, command: &[String]) -> Result<Self, RegistryError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| RegistryError::InvalidCommand("empty command line".to_string()))?;
        if program.trim().is_empty() {
            return Err(RegistryError::InvalidCommand("empty program name".to_string()));
        }
        Ok(Self {
            name: name.into(),
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    async fn run(&self, source: &str) -> Result<String, OracleError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OracleError::Unavailable(format!("cannot start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(source.as_bytes())
                .await
                .map_err(|e| OracleError::Unavailable(format!("writing to {}: {e}", self.program)))?;
            // Dropping stdin closes the pipe so the child sees EOF.
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| OracleError::Unavailable(format!("waiting for {}: {e}", self.program)))?;

        if !output.status.success() {
            warn!(
                program = %self.program,
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "inference command failed"
            );
            return Ok(String::new());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_reply(&stdout)
    }
}

fn parse_reply(stdout: &str) -> Result<String, OracleError> {
    let last = stdout
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| OracleError::Protocol("inference command printed nothing".to_string()))?;
    let reply: CommandReply = serde_json::from_str(last.trim())
        .map_err(|e| OracleError::Protocol(format!("last output line is not a reply: {e}")))?;
    debug!(status = reply.status, "inference command reply");
    match reply.status {
        0 | 2 => Ok(reply.updated_content.trim().to_string()),
        _ => Ok(String::new()),
    }
}

#[async_trait]
impl Oracle for CommandOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn infer(&self, source: &str, timeout: Option<Duration>) -> Result<String, OracleError> {
        match timeout {
            // The child is killed when the timed-out future is dropped.
            Some(limit) => tokio::time::timeout(limit, self.run(source))
                .await
                .map_err(|_| OracleError::Timeout(limit))?,
            None => self.run(source).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply_uses_last_line() {
        let stdout = "compiling...\nwarning: x\n{\"status\": 0, \"updatedContent\": \"import a.B;\"}\n";
        assert_eq!(parse_reply(stdout).unwrap(), "import a.B;");
    }

    #[test]
    fn test_parse_reply_partial_status_still_counts() {
        let stdout = "{\"status\": 2, \"updatedContent\": \"import java.util.List;\"}";
        assert_eq!(parse_reply(stdout).unwrap(), "import java.util.List;");
    }

    #[test]
    fn test_parse_reply_failure_status_is_empty() {
        let stdout = "{\"status\": 1, \"updatedContent\": \"ignored\"}";
        assert_eq!(parse_reply(stdout).unwrap(), "");
    }

    #[test]
    fn test_parse_reply_rejects_garbage() {
        assert!(matches!(parse_reply("not json"), Err(OracleError::Protocol(_))));
        assert!(matches!(parse_reply("\n\n"), Err(OracleError::Protocol(_))));
    }

    #[test]
    fn test_empty_command_is_rejected() {
        assert!(CommandOracle::new("snr", &[]).is_err());
        assert!(CommandOracle::new("snr", &["  ".to_string()]).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_reads_source_from_stdin() {
        let script = r#"read -r line; printf '{"status": 0, "updatedContent": "%s"}\n' "$line""#;
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let oracle = CommandOracle::new("echo", &command).unwrap();
        let reply = oracle.infer("import x.Y;\n", Some(Duration::from_secs(10))).await.unwrap();
        assert_eq!(reply, "import x.Y;");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_empty_response() {
        let command = vec!["sh".to_string(), "-c".to_string(), "cat >/dev/null; exit 3".to_string()];
        let oracle = CommandOracle::new("failing", &command).unwrap();
        assert_eq!(oracle.infer("class A {}", None).await.unwrap(), "");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out() {
        let command = vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()];
        let oracle = CommandOracle::new("slow", &command).unwrap();
        let err = oracle
            .infer("class A {}", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
