//! `AssetClient`: the side a running game client links against to request
//! that an asset be (re)built before it loads it.
//!
//! Lazily connects to the daemon's named pipe; if the pipe does not yet
//! exist, launches the configured server executable and polls for it to
//! appear, up to [`crate::jit::asset_pipe::SERVER_LAUNCH_TIMEOUT`]. A
//! background reader thread demultiplexes replies back to whichever caller
//! is waiting on that request; concurrent callers asking for the same
//! asset share one wait, so a burst of requests for the same texture
//! doesn't re-send the message once per caller.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::error::{AssetPipelineError, Result};
use crate::jit::asset_pipe::{self, Message, TOKEN};

/// One in-flight request's shared completion event. Every caller waiting
/// on the same logical path clones this `Arc` instead of sending a second
/// copy of the request.
type SharedEvent = Arc<(Mutex<Option<String>>, Condvar)>;

struct ClientState {
    stream: Option<UnixStream>,
    pending: HashMap<String, SharedEvent>,
}

/// How to launch the asset server if its pipe isn't found.
pub struct ServerLaunch {
    pub executable: PathBuf,
    pub args: Vec<String>,
}

pub struct AssetClient {
    pipe_path: PathBuf,
    launch: Option<ServerLaunch>,
    state: Mutex<ClientState>,
    write_lock: Mutex<()>,
}

impl AssetClient {
    pub fn new(resource_roots: &[PathBuf], launch: Option<ServerLaunch>) -> Self {
        let identity = asset_pipe::pipe_identity(resource_roots);
        Self {
            pipe_path: pipe_path_for(&identity),
            launch,
            state: Mutex::new(ClientState { stream: None, pending: HashMap::new() }),
            write_lock: Mutex::new(()),
        }
    }

    /// Ensures a connection is open, launching and waiting for the server
    /// if necessary. Safe to call repeatedly; a no-op once connected.
    pub fn connect(self: &Arc<Self>) -> Result<()> {
        if self.state.lock().stream.is_some() {
            return Ok(());
        }
        self.connect_locked()
    }

    fn connect_locked(self: &Arc<Self>) -> Result<()> {
        if !self.pipe_path.exists() {
            self.launch_server()?;
        }

        let stream = self.wait_for_pipe()?;
        let reader_stream = stream.try_clone().map_err(|e| AssetPipelineError::io(e, &self.pipe_path))?;
        self.state.lock().stream = Some(stream);

        let this = self.clone();
        std::thread::spawn(move || this.read_loop(reader_stream));
        Ok(())
    }

    fn launch_server(&self) -> Result<()> {
        let Some(launch) = &self.launch else {
            return Err(AssetPipelineError::ServerLaunchTimeout);
        };
        debug!(target: "asset_pipeline", executable = %launch.executable.display(), "launching asset server");
        Command::new(&launch.executable)
            .args(&launch.args)
            .spawn()
            .map_err(|e| AssetPipelineError::io(e, &launch.executable))?;
        Ok(())
    }

    fn wait_for_pipe(&self) -> Result<UnixStream> {
        let deadline = Instant::now() + asset_pipe::SERVER_LAUNCH_TIMEOUT;
        loop {
            match UnixStream::connect(&self.pipe_path) {
                Ok(stream) => return Ok(stream),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                Err(_) => return Err(AssetPipelineError::ServerLaunchTimeout),
            }
        }
    }

    fn read_loop(self: Arc<Self>, stream: UnixStream) {
        let mut reader = BufReader::new(stream);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            match reader.read_until(TOKEN, &mut raw) {
                Ok(0) | Err(_) => {
                    self.state.lock().stream = None;
                    return;
                }
                Ok(_) => {}
            }
            if raw.last() == Some(&TOKEN) {
                raw.pop();
            }
            let Ok(text) = std::str::from_utf8(&raw) else { continue };
            self.dispatch_reply(Message::parse(text));
        }
    }

    fn dispatch_reply(&self, message: Message) {
        let key = reply_key(&message);
        let event = self.state.lock().pending.remove(&key);
        if let Some(event) = event {
            let (lock, cond) = &*event;
            *lock.lock() = Some(key);
            cond.notify_all();
        } else {
            warn!(target: "asset_pipeline", "asset pipe reply with no waiting caller");
        }
    }

    fn send_and_wait(self: &Arc<Self>, message: Message) -> Result<()> {
        self.connect()?;
        let key = reply_key(&message);

        let event: SharedEvent = {
            let mut state = self.state.lock();
            state
                .pending
                .entry(key.clone())
                .or_insert_with(|| Arc::new((Mutex::new(None), Condvar::new())))
                .clone()
        };

        {
            let _write_guard = self.write_lock.lock();
            let mut state = self.state.lock();
            let Some(stream) = state.stream.as_mut() else {
                return Err(AssetPipelineError::PipeProtocol("not connected".into()));
            };
            stream
                .write_all(message.encode().as_bytes())
                .map_err(|e| AssetPipelineError::io(e, &self.pipe_path))?;
        }

        let (lock, cond) = &*event;
        let mut guard = lock.lock();
        while guard.is_none() {
            let timed_out = cond.wait_for(&mut guard, asset_pipe::SERVER_LAUNCH_TIMEOUT);
            if timed_out.timed_out() && guard.is_none() {
                return Err(AssetPipelineError::PipeProtocol(format!("no reply for {key}")));
            }
        }
        Ok(())
    }

    /// Requests that `logical_path` be built, blocking until the daemon
    /// acknowledges the request.
    pub fn request_asset(self: &Arc<Self>, logical_path: &str) -> Result<()> {
        self.send_and_wait(Message::AssetRequest(logical_path.to_string()))
    }

    pub fn lock(self: &Arc<Self>) -> Result<()> {
        self.send_and_wait(Message::Lock)
    }

    pub fn unlock(self: &Arc<Self>) -> Result<()> {
        self.send_and_wait(Message::Unlock)
    }
}

fn reply_key(message: &Message) -> String {
    match message {
        Message::AssetRequest(path) => path.clone(),
        Message::Lock => asset_pipe::LOCK_COMMAND.to_string(),
        Message::Unlock => asset_pipe::UNLOCK_COMMAND.to_string(),
    }
}

#[cfg(unix)]
fn pipe_path_for(identity: &str) -> PathBuf {
    asset_pipe::pipe_path(identity)
}
