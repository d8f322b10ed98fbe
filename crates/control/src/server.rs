use async_trait::async_trait;
use futures::future::join_all;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{
    ControlRequest, ItemReference, OptimisationResponse, PauseScope, StopRequest, SubmitOptions, SubmitRequest,
};

pub const SUBMIT_SOCKET: &str = "submit.sock";
pub const STOP_SOCKET: &str = "stop.sock";
pub const MAX_REQUEST_BYTES: u64 = 16 * 1024 * 1024;

/// What the control channel drives. Implemented by the daemon.
#[async_trait]
pub trait OptimisationService: Send + Sync {
    /// Optimises one item, returning a reference to the result.
    async fn optimise(&self, id: &str, item: ItemReference, options: &SubmitOptions) -> anyhow::Result<Option<String>>;

    async fn stop(&self, request: StopRequest);

    async fn pause(&self, scope: PauseScope);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Submit,
    Stop,
}

struct Job {
    endpoint: Endpoint,
    payload: Vec<u8>,
    reply: oneshot::Sender<Option<Vec<u8>>>,
}

/// Two Unix socket listeners feeding one dispatch loop.
pub struct ControlServer {
    socket_dir: PathBuf,
    submit: UnixListener,
    stop: UnixListener,
    service: Arc<dyn OptimisationService>,
}

impl ControlServer {
    /// Binds both endpoints under `socket_dir`, replacing stale sockets.
    pub fn bind(socket_dir: &Path, service: Arc<dyn OptimisationService>) -> io::Result<Self> {
        std::fs::create_dir_all(socket_dir)?;
        let submit = bind_socket(&socket_dir.join(SUBMIT_SOCKET))?;
        let stop = bind_socket(&socket_dir.join(STOP_SOCKET))?;
        info!("📡 Control: Listening in {:?}", socket_dir);

        Ok(Self {
            socket_dir: socket_dir.to_path_buf(),
            submit,
            stop,
            service,
        })
    }

    pub async fn serve(self, shutdown: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<Job>(64);

        tokio::spawn(accept_loop(self.submit, Endpoint::Submit, tx.clone(), shutdown.clone()));
        tokio::spawn(accept_loop(self.stop, Endpoint::Stop, tx, shutdown.clone()));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => dispatch(self.service.clone(), job).await,
                    None => break,
                },
            }
        }

        for name in [SUBMIT_SOCKET, STOP_SOCKET] {
            let _ = std::fs::remove_file(self.socket_dir.join(name));
        }
        info!("📡 Control: Stopped");
    }
}

fn bind_socket(path: &Path) -> io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

async fn accept_loop(listener: UnixListener, endpoint: Endpoint, tx: mpsc::Sender<Job>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(stream, endpoint, tx.clone()));
                }
                Err(e) => warn!("📡 Control: Accept failed on {:?} endpoint: {}", endpoint, e),
            },
        }
    }
}

/// One request per connection: read until the peer half-closes, reply, close.
async fn serve_connection(mut stream: UnixStream, endpoint: Endpoint, tx: mpsc::Sender<Job>) {
    let mut payload = Vec::new();
    if let Err(e) = (&mut stream).take(MAX_REQUEST_BYTES + 1).read_to_end(&mut payload).await {
        warn!("📡 Control: Read failed: {}", e);
        return;
    }
    if payload.len() as u64 > MAX_REQUEST_BYTES {
        warn!("📡 Control: Dropping request over {} bytes", MAX_REQUEST_BYTES);
        return;
    }

    let (reply, answer) = oneshot::channel();
    let job = Job {
        endpoint,
        payload,
        reply,
    };
    if tx.send(job).await.is_err() {
        return;
    }

    if let Ok(Some(bytes)) = answer.await {
        if let Err(e) = stream.write_all(&bytes).await {
            warn!("📡 Control: Reply failed: {}", e);
        }
    }
    let _ = stream.shutdown().await;
}

/// The single dispatch point. Submissions run on their own task so a long
/// batch never delays a stop request.
async fn dispatch(service: Arc<dyn OptimisationService>, job: Job) {
    let request = match serde_json::from_slice::<ControlRequest>(&job.payload) {
        Ok(request) => request,
        Err(e) => {
            warn!("📡 Control: Malformed {:?} request: {}", job.endpoint, e);
            let _ = job.reply.send(None);
            return;
        }
    };

    match (job.endpoint, request) {
        (Endpoint::Submit, ControlRequest::Submit(request)) => {
            tokio::spawn(async move {
                let responses = submit(service, request).await;
                let _ = job.reply.send(serde_json::to_vec(&responses).ok());
            });
        }
        (Endpoint::Stop, ControlRequest::Stop(request)) => {
            debug!("📡 Control: Stop {:?} (remove: {})", request.ids, request.remove);
            let _ = job.reply.send(None);
            service.stop(request).await;
        }
        (Endpoint::Stop, ControlRequest::Pause(request)) => {
            let _ = job.reply.send(None);
            service.pause(request.scope).await;
        }
        (endpoint, request) => {
            warn!("📡 Control: {:?} endpoint doesn't take {:?}", endpoint, request);
            let _ = job.reply.send(None);
        }
    }
}

/// Resolves once every item has an outcome.
async fn submit(service: Arc<dyn OptimisationService>, request: SubmitRequest) -> Vec<OptimisationResponse> {
    let items = request.resolve_items();
    info!("📡 Control: Optimising {} item(s) from {}", items.len(), request.options.source);

    if let Err(reason) = request.options.validate() {
        return items
            .into_iter()
            .map(|(id, _)| OptimisationResponse::failure(id, reason.clone()))
            .collect();
    }

    let options = &request.options;
    let service = &service;
    join_all(items.into_iter().map(|(id, item)| async move {
        match service.optimise(&id, item, options).await {
            Ok(result) => OptimisationResponse::success(id, result),
            Err(e) => OptimisationResponse::failure(id, format!("{:#}", e)),
        }
    }))
    .await
}
