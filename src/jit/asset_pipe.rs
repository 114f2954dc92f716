//! Wire framing shared by [`super::asset_server`] and [`crate::asset_client`].
//!
//! Messages are UTF-8 bytes terminated by the token `|` (0x7C). Two
//! shapes: a plain asset request (the asset's logical path) or a command
//! (`:LOCK` / `:UNLOCK`, the leading `:` marking it as a command).

pub const TOKEN: u8 = b'|';
pub const COMMAND_PREFIX: char = ':';
pub const LOCK_COMMAND: &str = ":LOCK";
pub const UNLOCK_COMMAND: &str = ":UNLOCK";
pub const READ_BUFFER_SIZE: usize = 4096;
pub const SERVER_LAUNCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// One decoded pipe message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A plain asset request: the asset's logical path.
    AssetRequest(String),
    Lock,
    Unlock,
}

impl Message {
    pub fn parse(token: &str) -> Message {
        match token {
            LOCK_COMMAND => Message::Lock,
            UNLOCK_COMMAND => Message::Unlock,
            other => Message::AssetRequest(other.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        let mut out = match self {
            Message::AssetRequest(path) => path.clone(),
            Message::Lock => LOCK_COMMAND.to_string(),
            Message::Unlock => UNLOCK_COMMAND.to_string(),
        };
        out.push(TOKEN as char);
        out
    }
}

/// Accumulates raw bytes read off the pipe and splits them into
/// complete, `|`-terminated tokens, retaining any partial trailing token
/// for the next read.
#[derive(Debug, Default)]
pub struct FrameReader {
    carry: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly-read bytes (expected to be at most
    /// [`READ_BUFFER_SIZE`] at a time, matching the original buffered
    /// read size) and returns every complete message found, re-prepending
    /// any partial final token for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Message> {
        self.carry.extend_from_slice(bytes);

        let mut messages = Vec::new();
        let mut start = 0;
        for (i, &byte) in self.carry.iter().enumerate() {
            if byte == TOKEN {
                if let Ok(text) = std::str::from_utf8(&self.carry[start..i]) {
                    messages.push(Message::parse(text));
                }
                start = i + 1;
            }
        }
        self.carry.drain(0..start);
        messages
    }
}

/// Computes the `AssetPipeline<16-hex>` pipe identity from a set of
/// resource roots: lower-cased, de-duplicated, and sorted before hashing,
/// so the same logical project maps to the same pipe name no matter
/// which root was passed first on the command line (mirrors
/// `AssetPipe::getBaseResourcePaths`).
pub fn pipe_identity(resource_roots: &[std::path::PathBuf]) -> String {
    let mut normalized: Vec<String> = resource_roots
        .iter()
        .map(|root| root.to_string_lossy().to_lowercase().replace('\\', "/"))
        .collect();
    normalized.sort();
    normalized.dedup();

    let mut seed = crate::hash::hash_str("AssetPipeline");
    for root in &normalized {
        crate::hash::combine(&mut seed, crate::hash::hash_str(root));
    }
    format!("AssetPipeline{seed:016x}")
}

#[cfg(unix)]
pub fn pipe_path(identity: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("{identity}.sock"))
}

#[cfg(windows)]
pub fn pipe_path(identity: &str) -> String {
    format!(r"\\.\pipe\{identity}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn frame_reader_retains_partial_token_across_reads() {
        let mut reader = FrameReader::new();
        let messages = reader.feed(b"some/asset.t");
        assert!(messages.is_empty());

        let messages = reader.feed(b"xt|:LOCK|");
        assert_eq!(
            messages,
            vec![Message::AssetRequest("some/asset.txt".into()), Message::Lock]
        );
    }

    #[test]
    fn command_prefix_distinguishes_commands_from_requests() {
        assert_eq!(Message::parse(":LOCK"), Message::Lock);
        assert_eq!(Message::parse(":UNLOCK"), Message::Unlock);
        assert_eq!(Message::parse("some/asset.txt"), Message::AssetRequest("some/asset.txt".into()));
    }

    #[test]
    fn pipe_identity_is_order_independent_and_case_insensitive() {
        let a = pipe_identity(&[PathBuf::from("/Res/A"), PathBuf::from("/res/b")]);
        let b = pipe_identity(&[PathBuf::from("/RES/B"), PathBuf::from("/res/a")]);
        assert_eq!(a, b);
        assert!(a.starts_with("AssetPipeline"));
    }
}
