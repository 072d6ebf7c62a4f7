use super::SupervisorError;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

const READ_CHUNK_BYTES: usize = 8_192;
const TRUNCATION_NOTE: &str = "[output truncated]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamCapture {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

impl StreamCapture {
    fn push(&mut self, chunk: &[u8], max_bytes: usize) {
        let remaining = max_bytes.saturating_sub(self.bytes.len());
        let to_copy = remaining.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..to_copy]);
        if to_copy < chunk.len() {
            self.truncated = true;
        }
    }

    /// Trailing `max_chars` of the capture as text, noting truncation.
    #[must_use]
    pub fn excerpt(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.bytes);
        let text = text.trim();
        let skip = text.chars().count().saturating_sub(max_chars);
        let tail: String = text.chars().skip(skip).collect();
        match (self.truncated || skip > 0, tail.is_empty()) {
            (false, _) => tail,
            (true, true) => TRUNCATION_NOTE.to_string(),
            (true, false) => format!("{tail} {TRUNCATION_NOTE}"),
        }
    }
}

/// Reads `stream` to EOF keeping at most `max_bytes`; excess is discarded.
///
/// # Errors
/// Returns [`SupervisorError::Io`] if reading the pipe fails.
pub async fn capture_stream_limited<R>(
    mut stream: R,
    max_bytes: usize,
) -> std::result::Result<StreamCapture, SupervisorError>
where
    R: AsyncRead + Unpin,
{
    let mut capture = StreamCapture::default();
    let mut chunk = [0_u8; READ_CHUNK_BYTES];

    loop {
        let read = stream.read(&mut chunk).await.map_err(SupervisorError::Io)?;
        if read == 0 {
            break;
        }
        capture.push(&chunk[..read], max_bytes);
    }

    Ok(capture)
}

/// Like [`capture_stream_limited`], but also forwards every complete line to
/// `lines` as soon as it is read. Lines longer than `max_bytes` are dropped.
///
/// # Errors
/// Returns [`SupervisorError::Io`] if reading the pipe fails.
pub async fn capture_lines<R>(
    mut stream: R,
    max_bytes: usize,
    lines: mpsc::Sender<String>,
) -> std::result::Result<StreamCapture, SupervisorError>
where
    R: AsyncRead + Unpin,
{
    let mut capture = StreamCapture::default();
    let mut splitter = LineSplitter::new(max_bytes);
    let mut chunk = [0_u8; READ_CHUNK_BYTES];
    let mut receiver_open = true;

    loop {
        let read = stream.read(&mut chunk).await.map_err(SupervisorError::Io)?;
        if read == 0 {
            break;
        }
        capture.push(&chunk[..read], max_bytes);
        for line in splitter.feed(&chunk[..read]) {
            if receiver_open && lines.send(line).await.is_err() {
                receiver_open = false;
            }
        }
    }

    if let Some(line) = splitter.finish() {
        if receiver_open {
            let _ = lines.send(line).await;
        }
    }

    Ok(capture)
}

/// Incremental newline tokenizer with a bounded pending buffer.
#[derive(Debug)]
pub struct LineSplitter {
    pending: Vec<u8>,
    max_line_bytes: usize,
    overflowed: bool,
}

impl LineSplitter {
    #[must_use]
    pub const fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes,
            overflowed: false,
        }
    }

    /// Consumes `bytes`, returning every line completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut complete = Vec::new();
        let mut rest = bytes;

        while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
            self.append(&rest[..newline]);
            if let Some(line) = self.take_line() {
                complete.push(line);
            }
            rest = &rest[newline + 1..];
        }
        self.append(rest);

        complete
    }

    /// Flushes a final unterminated line, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    fn append(&mut self, bytes: &[u8]) {
        if self.overflowed {
            return;
        }
        if self.pending.len() + bytes.len() > self.max_line_bytes {
            self.pending.clear();
            self.overflowed = true;
            return;
        }
        self.pending.extend_from_slice(bytes);
    }

    fn take_line(&mut self) -> Option<String> {
        let overflowed = std::mem::replace(&mut self.overflowed, false);
        let raw = std::mem::take(&mut self.pending);
        if overflowed {
            return None;
        }
        let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
        (!line.trim().is_empty()).then_some(line)
    }
}
