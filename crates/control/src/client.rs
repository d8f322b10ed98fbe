use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::protocol::{ControlRequest, OptimisationResponse, PauseRequest, PauseScope, StopRequest, SubmitRequest};
use crate::server::{STOP_SOCKET, SUBMIT_SOCKET};

/// Talks to a running daemon over its control sockets.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_dir: PathBuf,
}

impl ControlClient {
    pub fn new(socket_dir: &Path) -> Self {
        Self {
            socket_dir: socket_dir.to_path_buf(),
        }
    }

    /// Writes `payload`, half-closes and returns whatever comes back.
    pub async fn send_raw(&self, socket: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let path = self.socket_dir.join(socket);
        let mut stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("connecting to {:?} (is the daemon running?)", path))?;

        stream.write_all(payload).await?;
        stream.shutdown().await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        Ok(reply)
    }

    async fn send(&self, socket: &str, request: &ControlRequest) -> Result<Vec<u8>> {
        let payload = serde_json::to_vec(request)?;
        self.send_raw(socket, &payload).await
    }

    /// Waits until every item has been optimised or has failed.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Vec<OptimisationResponse>> {
        let reply = self.send(SUBMIT_SOCKET, &ControlRequest::Submit(request)).await?;
        if reply.is_empty() {
            bail!("the daemon rejected the request");
        }
        Ok(serde_json::from_slice(&reply)?)
    }

    pub async fn stop(&self, ids: Vec<String>, remove: bool) -> Result<()> {
        self.send(STOP_SOCKET, &ControlRequest::Stop(StopRequest { ids, remove }))
            .await
            .map(|_| ())
    }

    pub async fn pause(&self, scope: PauseScope) -> Result<()> {
        self.send(STOP_SOCKET, &ControlRequest::Pause(PauseRequest { scope }))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_daemon_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = ControlClient::new(dir.path());
        let err = client.stop(vec!["a".into()], false).await.unwrap_err();
        assert!(format!("{:#}", err).contains("is the daemon running?"));
    }
}
