//! Append-only log backing for durable handles.
//!
//! Each accepted write is appended as one framed command; opening a
//! database replays the log front to back to rebuild the in-memory state.
//! The format is a one-byte op tag followed by length-prefixed fields:
//!
//! ```text
//! SET    = 0x01 | key_len u32 | key | kind u8 | value_len u32 | value | expires_at f64
//! DELETE = 0x02 | key_len u32 | key
//! ```
//!
//! All integers are big-endian; `expires_at` is epoch seconds with `0.0`
//! meaning "never expires". The log is the only durable artifact: there is
//! no snapshot format, compaction is a full rewrite on some future open.

use crate::error::{GeostoreError, Result};
use crate::types::RecordKind;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const OP_SET: u8 = 1;
const OP_DELETE: u8 = 2;

/// A replayable command from the log.
#[derive(Debug, Clone)]
pub enum LogCommand {
    Set {
        key: Bytes,
        value: Bytes,
        kind: RecordKind,
        expires_at: Option<SystemTime>,
    },
    Delete {
        key: Bytes,
    },
}

/// Handle on the append-only log file.
pub struct LogFile {
    file: File,
    writer: BufWriter<File>,
    path: PathBuf,
}

impl LogFile {
    /// Open (or create) the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;
        let writer = BufWriter::new(file.try_clone()?);
        Ok(Self { file, writer, path })
    }

    /// Path this log was opened at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a SET command.
    pub fn append_set(
        &mut self,
        key: &[u8],
        value: &[u8],
        kind: RecordKind,
        expires_at: Option<SystemTime>,
    ) -> Result<()> {
        let mut buf = BytesMut::with_capacity(key.len() + value.len() + 18);
        buf.put_u8(OP_SET);
        buf.put_u32(key.len() as u32);
        buf.put(key);
        buf.put_u8(kind.as_u8());
        buf.put_u32(value.len() as u32);
        buf.put(value);
        buf.put_f64(expires_at.map_or(0.0, epoch_seconds));
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Append a DELETE command.
    pub fn append_delete(&mut self, key: &[u8]) -> Result<()> {
        let mut buf = BytesMut::with_capacity(key.len() + 5);
        buf.put_u8(OP_DELETE);
        buf.put_u32(key.len() as u32);
        buf.put(key);
        self.writer.write_all(&buf)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Read every command in the log, front to back.
    pub fn replay(&mut self) -> Result<Vec<LogCommand>> {
        self.writer.flush()?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut raw = Vec::new();
        self.file.read_to_end(&mut raw)?;
        let mut buf = Bytes::from(raw);

        let mut commands = Vec::new();
        while buf.has_remaining() {
            commands.push(Self::decode_command(&mut buf)?);
        }
        Ok(commands)
    }

    fn decode_command(buf: &mut Bytes) -> Result<LogCommand> {
        let op = buf.get_u8();
        match op {
            OP_SET => {
                let key = take_field(buf, "key")?;
                if buf.remaining() < 1 {
                    return Err(truncated("kind"));
                }
                let kind_tag = buf.get_u8();
                let kind = RecordKind::from_u8(kind_tag).ok_or_else(|| {
                    GeostoreError::Corrupted(format!("unknown record kind tag {kind_tag}"))
                })?;
                let value = take_field(buf, "value")?;
                if buf.remaining() < 8 {
                    return Err(truncated("expiry"));
                }
                let expiry_secs = buf.get_f64();
                let expires_at = if expiry_secs == 0.0 {
                    None
                } else if expiry_secs.is_finite()
                    && expiry_secs > 0.0
                    && expiry_secs < u64::MAX as f64
                {
                    Some(UNIX_EPOCH + Duration::from_secs_f64(expiry_secs))
                } else {
                    return Err(GeostoreError::Corrupted(format!(
                        "invalid expiry timestamp {expiry_secs}"
                    )));
                };
                Ok(LogCommand::Set {
                    key,
                    value,
                    kind,
                    expires_at,
                })
            }
            OP_DELETE => {
                let key = take_field(buf, "key")?;
                Ok(LogCommand::Delete { key })
            }
            other => Err(GeostoreError::Corrupted(format!(
                "unknown op tag {other:#x}"
            ))),
        }
    }

    /// Flush buffered writes to the OS.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync so all prior appends survive a crash.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn take_field(buf: &mut Bytes, what: &str) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(truncated(what));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(truncated(what));
    }
    Ok(buf.copy_to_bytes(len))
}

fn truncated(what: &str) -> GeostoreError {
    GeostoreError::Corrupted(format!("truncated {what} field"))
}

/// Epoch seconds for the wire format. `0.0` is reserved for "never
/// expires", so pre-epoch instants clamp to the smallest positive value
/// and replay as already expired.
fn epoch_seconds(instant: SystemTime) -> f64 {
    instant
        .duration_since(UNIX_EPOCH)
        .map_or(f64::MIN_POSITIVE, |d| d.as_secs_f64().max(f64::MIN_POSITIVE))
}
