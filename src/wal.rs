use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::EngineError;
use crate::limits::MAX_WAL_RECORD_BYTES;
use crate::model::QueueEvent;

/// Append one `[len][bincode][crc32]` frame to `buf`.
fn encode_frame(buf: &mut Vec<u8>, event: &QueueEvent) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_WAL_RECORD_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("queue event of {} bytes exceeds the record limit", payload.len()),
        ));
    }
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

enum Frame {
    Event(QueueEvent, usize),
    /// The buffer ends inside the frame.
    Truncated,
    /// A frame that fails its checks, with its encoded length when the header was sane.
    Invalid(&'static str, Option<usize>),
}

fn decode_frame(buf: &[u8]) -> Frame {
    let Some(header) = buf.first_chunk::<4>() else {
        return Frame::Truncated;
    };
    let len = u32::from_le_bytes(*header) as usize;
    if len > MAX_WAL_RECORD_BYTES {
        return Frame::Invalid("length prefix out of range", None);
    }
    let Some(body) = buf.get(4..4 + len) else {
        return Frame::Truncated;
    };
    let Some(crc) = buf[4 + len..].first_chunk::<4>() else {
        return Frame::Truncated;
    };
    let frame_len = 4 + len + 4;
    if u32::from_le_bytes(*crc) != crc32fast::hash(body) {
        return Frame::Invalid("checksum mismatch", Some(frame_len));
    }
    match bincode::deserialize::<QueueEvent>(body) {
        Ok(event) => Frame::Event(event, frame_len),
        Err(_) => Frame::Invalid("undecodable payload", Some(frame_len)),
    }
}

/// Decode every intact event and return them with the byte length they cover.
///
/// A damaged final frame (or an all-zero tail) is what an interrupted write
/// leaves behind and is dropped. Damage followed by more data means the
/// audit history itself is broken, which is an `InvalidData` error.
fn scan(path: &Path, buf: &[u8]) -> io::Result<(Vec<QueueEvent>, u64)> {
    let mut events = Vec::new();
    let mut offset = 0;
    while offset < buf.len() {
        let rest = &buf[offset..];
        match decode_frame(rest) {
            Frame::Event(event, used) => {
                events.push(event);
                offset += used;
            }
            Frame::Truncated => {
                warn!(path = %path.display(), offset, bytes = rest.len(), "dropping torn WAL tail");
                break;
            }
            Frame::Invalid(reason, used) => {
                let last_frame = used == Some(rest.len());
                if last_frame || rest.iter().all(|&b| b == 0) {
                    warn!(
                        path = %path.display(),
                        offset,
                        reason,
                        "dropping unreadable last WAL record"
                    );
                    break;
                }
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "{}: {reason} at offset {offset} with {} bytes after it",
                        path.display(),
                        rest.len()
                    ),
                ));
            }
        }
    }
    Ok((events, offset as u64))
}

/// Append-only log of queue transitions, one `[u32 len][bincode QueueEvent][u32 crc32]`
/// frame per event.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Bytes known to hold whole frames.
    len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path` and return the events it holds.
    /// A torn tail is cut off so new frames land right after the last good one.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<QueueEvent>)> {
        let buf = match fs::read(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        let (events, len) = scan(path, &buf)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if (buf.len() as u64) > len {
            file.set_len(len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            len,
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    /// Write pre-encoded frames and fsync. On failure the file is cut back to
    /// its last good length so a half-written batch never precedes later frames.
    fn write_frames(&mut self, frames: &[u8], count: u64) -> io::Result<()> {
        let result = self.file.write_all(frames).and_then(|()| self.file.sync_data());
        match result {
            Ok(()) => {
                self.len += frames.len() as u64;
                self.appends_since_compact += count;
                Ok(())
            }
            Err(e) => {
                if let Err(trim) = self.file.set_len(self.len) {
                    warn!(path = %self.path.display(), "could not trim failed WAL write: {trim}");
                }
                Err(e)
            }
        }
    }

    #[cfg(test)]
    fn append(&mut self, event: &QueueEvent) -> io::Result<()> {
        let mut buf = Vec::new();
        encode_frame(&mut buf, event)?;
        self.write_frames(&buf, 1)
    }

    /// Replace the log with `events`: write `<path>.tmp`, fsync, rename over.
    pub fn compact(&mut self, events: &[QueueEvent]) -> io::Result<()> {
        let mut buf = Vec::new();
        for event in events {
            encode_frame(&mut buf, event)?;
        }
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.len = buf.len() as u64;
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}

// ── Group-commit writer ──────────────────────────────────

type Ack = oneshot::Sender<Result<(), String>>;

enum Command {
    Append { event: QueueEvent, response: Ack },
    Compact { events: Vec<QueueEvent>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
}

/// Cloneable handle to the task that owns a [`Wal`]. Appends queued while a
/// batch is being written go out together with a single fsync.
#[derive(Clone)]
pub struct WalHandle {
    tx: mpsc::Sender<Command>,
}

impl WalHandle {
    /// Start the writer task. Needs a Tokio runtime.
    pub fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(writer_loop(wal, rx));
        Self { tx }
    }

    /// Durably append `event`. Returns once it is fsynced.
    pub async fn append(&self, event: &QueueEvent) -> Result<(), EngineError> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Append {
            event: event.clone(),
            response,
        })
        .await?;
        ack(rx).await
    }

    pub async fn compact(&self, events: Vec<QueueEvent>) -> Result<(), EngineError> {
        let (response, rx) = oneshot::channel();
        self.send(Command::Compact { events, response }).await?;
        ack(rx).await
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (response, rx) = oneshot::channel();
        if self.send(Command::AppendsSinceCompact { response }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    async fn send(&self, cmd: Command) -> Result<(), EngineError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))
    }
}

async fn ack(rx: oneshot::Receiver<Result<(), String>>) -> Result<(), EngineError> {
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(EngineError::WalError)
}

async fn writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<Command>) {
    let mut pending = rx.recv().await;
    while let Some(cmd) = pending.take() {
        match cmd {
            Command::Append { event, response } => {
                let mut batch = vec![(event, response)];
                // Drain what is already queued; a non-append ends the batch.
                loop {
                    match rx.try_recv() {
                        Ok(Command::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            pending = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                write_batch(&mut wal, batch);
            }
            Command::Compact { events, response } => {
                let _ = response.send(wal.compact(&events).map_err(|e| e.to_string()));
            }
            Command::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
            }
        }
        if pending.is_none() {
            pending = rx.recv().await;
        }
    }
}

/// Encode the batch into one buffer and write it with a single fsync. An
/// event that fails to encode is refused on its own; the rest still go out.
fn write_batch(wal: &mut Wal, batch: Vec<(QueueEvent, Ack)>) {
    let mut frames = Vec::new();
    let mut accepted = Vec::with_capacity(batch.len());
    for (event, response) in batch {
        match encode_frame(&mut frames, &event) {
            Ok(()) => accepted.push(response),
            Err(e) => {
                let _ = response.send(Err(e.to_string()));
            }
        }
    }
    if accepted.is_empty() {
        return;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(accepted.len() as f64);
    let started = Instant::now();
    let result = wal
        .write_frames(&frames, accepted.len() as u64)
        .map_err(|e| e.to_string());
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for response in accepted {
        let _ = response.send(result.clone());
    }
}
