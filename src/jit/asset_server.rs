//! `AssetServer`: the JIT daemon's side of the named-pipe protocol.
//!
//! Listens on the pipe identified by [`super::asset_pipe::pipe_identity`],
//! dispatches incoming asset requests to the compiler host, and serializes
//! concurrent client requests with a pause/resume pair: the first `:LOCK`
//! from any client pauses the scheduler pool (via `Semaphore::pause`) so a
//! client can inspect build output without a worker thread mutating it
//! underfoot; the matching `:UNLOCK` resumes it once every client that
//! asked for exclusivity has released it.
//!
//! Runs on Unix domain sockets. The scheduler itself stays thread-based,
//! but an accept loop serving an unbounded number of short-lived clients is
//! exactly the shape `tokio` fits, so this module is the one exception that
//! reaches for it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};

#[cfg(unix)]
use tokio::io::{AsyncReadExt, AsyncWriteExt};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::compiler::CompilerHost;
use crate::error::{AssetPipelineError, Result};

use super::asset_pipe::{self, FrameReader, Message};

/// Holds the scheduler paused for as long as at least one client has an
/// outstanding `:LOCK`. The pause guard lives on a dedicated thread since
/// it borrows from the semaphore it pauses; `release` signals that thread
/// to drop it.
struct PauseControl {
    holders: AtomicUsize,
    release_tx: parking_lot::Mutex<Option<mpsc::Sender<()>>>,
}

impl PauseControl {
    fn new() -> Self {
        Self { holders: AtomicUsize::new(0), release_tx: parking_lot::Mutex::new(None) }
    }

    fn acquire(&self, host: &Arc<CompilerHost>) {
        if self.holders.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let (tx, rx) = mpsc::channel();
        *self.release_tx.lock() = Some(tx);
        let host = host.clone();
        std::thread::spawn(move || {
            let _guard = host.semaphore.pause();
            let _ = rx.recv();
        });
    }

    fn release(&self) {
        if self.holders.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if let Some(tx) = self.release_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// Accepts connections on the daemon's named pipe and services requests
/// against `host` until the listener is dropped.
pub struct AssetServer {
    host: Arc<CompilerHost>,
    pause: PauseControl,
}

impl AssetServer {
    pub fn new(host: Arc<CompilerHost>) -> Self {
        Self { host, pause: PauseControl::new() }
    }

    #[cfg(unix)]
    pub async fn serve(self: Arc<Self>, resource_roots: &[std::path::PathBuf]) -> Result<()> {
        self.serve_with_identity(&asset_pipe::pipe_identity(resource_roots)).await
    }

    /// Same as [`Self::serve`] but with an explicit pipe identity rather
    /// than one derived from the resource roots, so integration tests
    /// don't collide with a real daemon's pipe.
    #[cfg(unix)]
    pub async fn serve_with_identity(self: Arc<Self>, identity: &str) -> Result<()> {
        let path = asset_pipe::pipe_path(identity);
        let _ = std::fs::remove_file(&path);

        let listener = UnixListener::bind(&path).map_err(|e| AssetPipelineError::io(e, &path))?;
        info!(target: "asset_pipeline", pipe = %path.display(), "asset server listening");

        loop {
            let (stream, _) = listener.accept().await.map_err(|e| AssetPipelineError::io(e, &path))?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream).await {
                    warn!(target: "asset_pipeline", error = %err, "asset pipe connection ended with error");
                }
            });
        }
    }

    #[cfg(unix)]
    async fn handle_connection(&self, mut stream: UnixStream) -> Result<()> {
        let mut reader = FrameReader::new();
        let mut buf = vec![0u8; asset_pipe::READ_BUFFER_SIZE];
        let mut own_lock = false;

        loop {
            let n = stream.read(&mut buf).await.map_err(|e| AssetPipelineError::io(e, "<asset pipe>"))?;
            if n == 0 {
                break;
            }

            for message in reader.feed(&buf[..n]) {
                let reply = match &message {
                    Message::AssetRequest(logical_path) => {
                        self.host.observer().on_asset_requested(logical_path);
                        debug!(target: "asset_pipeline", asset = %logical_path, "asset requested over pipe");
                        let path = std::path::Path::new(logical_path);
                        if let Some(task_id) = self.host.get_task(path, true) {
                            self.host.queue.queue_task_front(task_id, &self.host.tasks);
                        }
                        message.encode()
                    }
                    Message::Lock => {
                        if !own_lock {
                            own_lock = true;
                            self.pause.acquire(&self.host);
                        }
                        message.encode()
                    }
                    Message::Unlock => {
                        if own_lock {
                            own_lock = false;
                            self.pause.release();
                        }
                        message.encode()
                    }
                };
                stream.write_all(reply.as_bytes()).await.map_err(|e| AssetPipelineError::io(e, "<asset pipe>"))?;
            }
        }

        if own_lock {
            self.pause.release();
        }
        Ok(())
    }
}
