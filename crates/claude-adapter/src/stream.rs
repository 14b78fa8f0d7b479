use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::options::{PermissionResult, QueryOptions};
use crate::process::ClaudeProcess;
use crate::types::{ControlRequest, Message};
use crate::Result;

// ─── QueryStream ──────────────────────────────────────────────────────────

/// An async stream of backend [`Message`]s for one query.
///
/// Backed by a Tokio mpsc channel. A background task owns the subprocess
/// and forwards messages until the terminal `result`, cancellation, or
/// process exit. `control_request` frames are answered inline via the
/// `can_use_tool` callback and never reach the consumer; while the callback
/// is suspended the backend waits, which is exactly the interactive
/// permission contract.
///
/// Dropping the stream closes the receiver; the background task exits on
/// its next send and kills the subprocess.
pub struct QueryStream {
    rx: mpsc::Receiver<Result<Message>>,
}

impl QueryStream {
    pub(crate) fn new(prompt: String, opts: QueryOptions) -> Self {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let cancel = opts.cancel.clone();
            let can_use_tool = opts.can_use_tool.clone();

            let mut process = match ClaudeProcess::spawn(&prompt, &opts) {
                Ok(p) => p,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };

            let mut got_result = false;
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("query cancelled; killing backend process");
                        break;
                    }
                    next = process.next_message() => next,
                };

                match next {
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Ok(None) => break, // EOF — process exited
                    Ok(Some(Message::ControlRequest(cr))) => {
                        let response = match (&can_use_tool, cr.request) {
                            (
                                Some(cb),
                                ControlRequest::CanUseTool {
                                    tool_name,
                                    input,
                                    tool_use_id,
                                },
                            ) => {
                                let request = crate::options::ToolUseRequest {
                                    tool_name,
                                    input,
                                    tool_use_id,
                                };
                                tokio::select! {
                                    _ = cancel.cancelled() => break,
                                    result = cb(request) => result.to_wire(),
                                }
                            }
                            // No callback configured, or an unknown request:
                            // deny rather than hang the backend.
                            _ => PermissionResult::Deny {
                                message: "no permission handler".into(),
                            }
                            .to_wire(),
                        };
                        if let Err(e) = process.respond_control(&cr.request_id, response).await {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    }
                    Ok(Some(msg)) => {
                        let terminal = msg.is_terminal();
                        if terminal {
                            got_result = true;
                        }
                        if tx.send(Ok(msg)).await.is_err() {
                            break; // Receiver dropped
                        }
                        if terminal {
                            break;
                        }
                    }
                }
            }

            // A cancelled query ends silently; an uncancelled stream that
            // never produced a result surfaces the exit status instead.
            if !got_result && !cancel.is_cancelled() {
                if let Some(exit_err) = process.wait_exit_error().await {
                    let _ = tx.send(Err(exit_err)).await;
                }
            }

            process.kill().await;
        });

        QueryStream { rx }
    }

    /// Wrap a raw mpsc receiver as a `QueryStream`.
    ///
    /// This is the mock seam: tests (including downstream crates) inject
    /// pre-built message sequences without spawning a real subprocess.
    pub fn from_channel(rx: mpsc::Receiver<Result<Message>>) -> Self {
        Self { rx }
    }

    /// A paired channel for hand-driven mock streams.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<Message>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (tx, Self { rx })
    }
}

impl Stream for QueryStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ControlRequestMessage;
    use futures::StreamExt;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::process::Command;

    /// Write JSON lines to a temp file, then `cat` it as the mock process.
    fn mock_stream(lines: &[&str]) -> QueryStream {
        let mut f = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        let path = f.path().to_owned();
        // Keep the file alive for the duration of the test
        std::mem::forget(f);

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut cmd = Command::new("cat");
            cmd.arg(&path);
            let mut process = ClaudeProcess::spawn_command(cmd).unwrap();

            loop {
                match process.next_message().await {
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(msg)) => {
                        let terminal = msg.is_terminal();
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                        if terminal {
                            break;
                        }
                    }
                }
            }
            process.kill().await;
        });

        QueryStream { rx }
    }

    const INIT_LINE: &str = r#"{"type":"system","subtype":"init","session_id":"s1","model":"m","tools":[],"permissionMode":"default","cwd":"/tmp"}"#;
    const RESULT_LINE: &str = r#"{"type":"result","subtype":"success","session_id":"s1","result":"done","duration_ms":1,"is_error":false,"num_turns":1,"usage":{"input_tokens":1,"output_tokens":1}}"#;

    #[tokio::test]
    async fn stream_yields_all_messages() {
        let stream = mock_stream(&[INIT_LINE, RESULT_LINE]);
        let messages: Vec<_> = stream.collect().await;
        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| m.is_ok()));
    }

    #[tokio::test]
    async fn stream_terminates_after_result() {
        // An extra line after the result must never be emitted
        let stream = mock_stream(&[INIT_LINE, RESULT_LINE, INIT_LINE]);
        let messages: Vec<_> = stream.collect().await;
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn stream_skips_blank_lines() {
        let stream = mock_stream(&[INIT_LINE, "", "  ", RESULT_LINE]);
        let messages: Vec<_> = stream.collect().await;
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn from_channel_replays_injected_messages() {
        let (tx, stream) = QueryStream::channel(8);
        let msg: Message = serde_json::from_str(RESULT_LINE).unwrap();
        tx.send(Ok(msg)).await.unwrap();
        drop(tx);
        let messages: Vec<_> = stream.collect().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].as_ref().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn malformed_line_surfaces_parse_error() {
        let stream = mock_stream(&["{not json"]);
        let messages: Vec<_> = stream.collect().await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_err());
    }

    #[test]
    fn control_request_parses_from_line() {
        let line = r#"{"type":"control_request","request_id":"r1","request":{"subtype":"can_use_tool","tool_name":"Edit","input":{}}}"#;
        let msg: Message = serde_json::from_str(line).unwrap();
        let cr: ControlRequestMessage = match msg {
            Message::ControlRequest(cr) => cr,
            other => panic!("expected control request, got {other:?}"),
        };
        assert_eq!(cr.request_id, "r1");
    }
}
