use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use fabric_core::error::{FabricError, Result};

use crate::protocol::Request;

/// Default request timeout for beacon/MCP TCP clients.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

// ─── BeaconClient ─────────────────────────────────────────────────────────

/// Persistent newline-delimited JSON client used by MCP tool handlers and
/// the pylon's registration path.
///
/// A timed-out request tears the socket down; callers reconnect.
pub struct BeaconClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    timeout: Duration,
    broken: bool,
}

impl BeaconClient {
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, REQUEST_TIMEOUT).await
    }

    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(BeaconClient {
            reader: BufReader::new(read_half),
            writer: write_half,
            timeout,
            broken: false,
        })
    }

    /// Send one request and read exactly one reply frame.
    pub async fn request(&mut self, request: &Request) -> Result<serde_json::Value> {
        self.send(request).await?;
        match self.next_frame().await? {
            Some(frame) => Ok(frame),
            None => {
                self.broken = true;
                Err(FabricError::Internal("beacon closed connection".into()))
            }
        }
    }

    /// Send a request without reading; used before streaming reads.
    pub async fn send(&mut self, request: &Request) -> Result<()> {
        if self.broken {
            return Err(FabricError::Internal("connection torn down".into()));
        }
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Read the next frame, or `None` on clean EOF. On timeout the pending
    /// read is rejected and the socket is torn down.
    pub async fn next_frame(&mut self) -> Result<Option<serde_json::Value>> {
        if self.broken {
            return Err(FabricError::Internal("connection torn down".into()));
        }
        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, self.reader.read_line(&mut line)).await;
        match read {
            Err(_) => {
                self.broken = true;
                let _ = self.writer.shutdown().await;
                Err(FabricError::Timeout("Request timeout".into()))
            }
            Ok(Err(e)) => {
                self.broken = true;
                Err(FabricError::Io(e))
            }
            Ok(Ok(0)) => Ok(None),
            Ok(Ok(_)) => Ok(Some(serde_json::from_str(line.trim())?)),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn timeout_rejects_and_tears_down() {
        // A listener that accepts but never replies.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            // Hold the socket open without writing.
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let mut client = BeaconClient::connect_with_timeout(&addr, Duration::from_millis(50))
            .await
            .unwrap();
        let err = client
            .request(&Request::Lookup {
                tool_use_id: "toolu_X".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "timeout: Request timeout");

        // The connection is torn down; further use fails fast.
        let err = client
            .request(&Request::Cleanup)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("torn down"));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut client = BeaconClient::connect_with_timeout(&addr, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(client.next_frame().await.unwrap().is_none());
    }
}
