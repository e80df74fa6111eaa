use std::error::Error as _;
use std::io;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::OracleError;

/// POST a JSON body and parse the JSON reply.
///
/// The blocking client runs on the blocking pool and the agent carries the
/// same limit as the await, see [`blocking_bounded`].
pub(crate) async fn post_json(
    url: String,
    bearer: Option<String>,
    body: Value,
    timeout: Option<Duration>,
) -> Result<Value, OracleError> {
    let payload = serde_json::to_string(&body)
        .map_err(|e| OracleError::Protocol(format!("request encoding failed: {e}")))?;
    debug!(%url, bytes = payload.len(), "oracle request");

    let text = blocking_bounded(timeout, move || {
        send(&url, bearer.as_deref(), &payload, timeout)
    })
    .await?;

    serde_json::from_str(&text)
        .map_err(|e| OracleError::Protocol(format!("response is not JSON: {e}")))
}

/// Run `work` on the blocking pool, answering `Timeout` after `timeout`.
///
/// A timed-out worker is still awaited before returning, so at most one
/// request per caller is ever in flight. `work` must bound itself.
async fn blocking_bounded<T, F>(timeout: Option<Duration>, work: F) -> Result<T, OracleError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, OracleError> + Send + 'static,
{
    let mut task = tokio::task::spawn_blocking(work);
    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                if let Err(err) = task.await {
                    debug!(error = %err, "timed-out request task failed");
                }
                return Err(OracleError::Timeout(limit));
            }
        },
        None => task.await,
    };
    joined.map_err(|e| OracleError::Unavailable(format!("request task failed: {e}")))?
}

fn send(
    url: &str,
    bearer: Option<&str>,
    payload: &str,
    timeout: Option<Duration>,
) -> Result<String, OracleError> {
    let mut builder = ureq::AgentBuilder::new();
    if let Some(limit) = timeout {
        builder = builder.timeout(limit);
    }
    let agent = builder.build();

    let mut req = agent.post(url).set("Content-Type", "application/json");
    if let Some(key) = bearer {
        req = req.set("Authorization", &format!("Bearer {key}"));
    }

    let response = match req.send_string(payload) {
        Ok(resp) => resp,
        Err(ureq::Error::Status(code, resp)) => {
            let detail = resp.into_string().unwrap_or_default();
            return Err(OracleError::Unavailable(format!(
                "{url} answered {code}: {}",
                detail.trim()
            )));
        }
        Err(ureq::Error::Transport(transport)) => {
            return Err(match (timed_out(&transport), timeout) {
                (true, Some(limit)) => OracleError::Timeout(limit),
                _ => OracleError::Unavailable(format!("{url}: {transport}")),
            });
        }
    };

    response
        .into_string()
        .map_err(|e| OracleError::Protocol(format!("reading response body failed: {e}")))
}

fn timed_out(transport: &ureq::Transport) -> bool {
    let mut source = transport.source();
    while let Some(err) = source {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if matches!(io_err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) {
                return true;
            }
        }
        source = err.source();
    }
    false
}

/// Walk a JSON value along `path`, returning the trimmed string at the end.
pub(crate) fn string_at(value: &Value, path: &[&str]) -> Result<String, OracleError> {
    let mut cursor = value;
    for key in path {
        cursor = match key.parse::<usize>() {
            Ok(idx) => cursor.get(idx),
            Err(_) => cursor.get(*key),
        }
        .ok_or_else(|| OracleError::Protocol(format!("response has no '{}'", path.join("."))))?;
    }
    cursor
        .as_str()
        .map(|s| s.trim().to_string())
        .ok_or_else(|| OracleError::Protocol(format!("'{}' is not a string", path.join("."))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_timed_out_worker_finishes_before_return() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let result = blocking_bounded(Some(Duration::from_millis(50)), move || {
            std::thread::sleep(Duration::from_millis(300));
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(OracleError::Timeout(_))));
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_fast_worker_result_passes_through() {
        let result = blocking_bounded(Some(Duration::from_secs(5)), || Ok(7)).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_string_at_walks_objects_and_arrays() {
        let reply = json!({ "choices": [ { "message": { "content": "  import a.B;\n" } } ] });
        let content = string_at(&reply, &["choices", "0", "message", "content"]).unwrap();
        assert_eq!(content, "import a.B;");
    }

    #[test]
    fn test_string_at_reports_missing_path() {
        let reply = json!({ "message": {} });
        let err = string_at(&reply, &["message", "content"]).unwrap_err();
        assert!(matches!(err, OracleError::Protocol(_)));
        assert!(err.to_string().contains("message.content"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_unavailable() {
        // Port 9 on loopback is the discard service; nothing listens there in CI.
        let err = post_json(
            "http://127.0.0.1:9/api/chat".to_string(),
            None,
            json!({}),
            Some(Duration::from_secs(5)),
        )
        .await
        .unwrap_err();
        assert!(!matches!(err, OracleError::Protocol(_)), "unexpected: {err}");
    }
}
