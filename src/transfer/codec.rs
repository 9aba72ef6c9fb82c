//! Versioned binary wire format for content transfer records.
//!
//! Frame format: len:u32 | type:u8 | payload. All multi-byte integers are
//! big-endian; strings are length-prefixed (u16 len + UTF-8). Every chunk
//! record carries its content hash so the receiver can verify integrity on
//! arrival and reject a corrupt chunk without aborting the snapshot.

use crate::error::{Result, VoltreeError};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Transfer record format version.
pub const RECORD_VERSION: u16 = 1;

/// Maximum frame size (64MB) - prevents OOM from malicious/corrupted frames.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    SnapshotBegin = 0x01,
    Chunk = 0x02,
    SnapshotEnd = 0x03,
    Done = 0x04,
}

impl RecordType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::SnapshotBegin),
            0x02 => Some(Self::Chunk),
            0x03 => Some(Self::SnapshotEnd),
            0x04 => Some(Self::Done),
            _ => None,
        }
    }
}

/// A single transfer record.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferRecord {
    /// Opens one snapshot's chunk stream.
    SnapshotBegin {
        version: u16,
        snapshot_id: String,
        chunk_count: u32,
    },
    /// One content chunk, keyed by its hash.
    Chunk { hash: u64, data: Bytes },
    /// Closes a snapshot's stream; `content` is the assembled content id.
    SnapshotEnd {
        snapshot_id: String,
        content: String,
    },
    /// Transfer summary.
    Done {
        snapshots: u64,
        chunks: u64,
        bytes: u64,
    },
}

/// Encoder/decoder for transfer records. Implementations must be swappable;
/// both ends of a transfer have to agree on one.
pub trait RecordCodec: Send + Sync {
    /// Encode a record as a complete frame, including the length prefix.
    fn encode(&self, record: &TransferRecord) -> Bytes;

    /// Decode one frame body (type byte + payload, without the length
    /// prefix).
    fn decode(&self, frame: Bytes) -> Result<TransferRecord>;
}

/// The v1 binary codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryCodec;

fn corrupt(what: &str) -> VoltreeError {
    VoltreeError::InvalidArgument(format!("malformed transfer record: {}", what))
}

fn get_string(payload: &mut Bytes, what: &str) -> Result<String> {
    if payload.remaining() < 2 {
        return Err(corrupt(what));
    }
    let len = payload.get_u16() as usize;
    if payload.remaining() < len {
        return Err(corrupt(what));
    }
    String::from_utf8(payload.copy_to_bytes(len).to_vec())
        .map_err(|_| corrupt(what))
}

impl RecordCodec for BinaryCodec {
    fn encode(&self, record: &TransferRecord) -> Bytes {
        match record {
            TransferRecord::SnapshotBegin {
                version,
                snapshot_id,
                chunk_count,
            } => {
                let id_bytes = snapshot_id.as_bytes();
                let payload_len = 2 + 2 + id_bytes.len() + 4;
                let mut buf = BytesMut::with_capacity(5 + payload_len);
                buf.put_u32(payload_len as u32);
                buf.put_u8(RecordType::SnapshotBegin as u8);
                buf.put_u16(*version);
                buf.put_u16(id_bytes.len() as u16);
                buf.put_slice(id_bytes);
                buf.put_u32(*chunk_count);
                buf.freeze()
            }
            TransferRecord::Chunk { hash, data } => {
                let payload_len = 8 + 4 + data.len();
                let mut buf = BytesMut::with_capacity(5 + payload_len);
                buf.put_u32(payload_len as u32);
                buf.put_u8(RecordType::Chunk as u8);
                buf.put_u64(*hash);
                buf.put_u32(data.len() as u32);
                buf.put_slice(data);
                buf.freeze()
            }
            TransferRecord::SnapshotEnd {
                snapshot_id,
                content,
            } => {
                let id_bytes = snapshot_id.as_bytes();
                let content_bytes = content.as_bytes();
                let payload_len = 2 + id_bytes.len() + 2 + content_bytes.len();
                let mut buf = BytesMut::with_capacity(5 + payload_len);
                buf.put_u32(payload_len as u32);
                buf.put_u8(RecordType::SnapshotEnd as u8);
                buf.put_u16(id_bytes.len() as u16);
                buf.put_slice(id_bytes);
                buf.put_u16(content_bytes.len() as u16);
                buf.put_slice(content_bytes);
                buf.freeze()
            }
            TransferRecord::Done {
                snapshots,
                chunks,
                bytes,
            } => {
                let mut buf = BytesMut::with_capacity(5 + 24);
                buf.put_u32(24);
                buf.put_u8(RecordType::Done as u8);
                buf.put_u64(*snapshots);
                buf.put_u64(*chunks);
                buf.put_u64(*bytes);
                buf.freeze()
            }
        }
    }

    fn decode(&self, mut frame: Bytes) -> Result<TransferRecord> {
        if frame.remaining() < 1 {
            return Err(corrupt("empty frame"));
        }
        let record_type = RecordType::from_u8(frame.get_u8())
            .ok_or_else(|| corrupt("unknown record type"))?;

        match record_type {
            RecordType::SnapshotBegin => {
                if frame.remaining() < 2 {
                    return Err(corrupt("SnapshotBegin too short"));
                }
                let version = frame.get_u16();
                if version != RECORD_VERSION {
                    return Err(VoltreeError::InvalidArgument(format!(
                        "unsupported transfer record version {} (supported: {})",
                        version, RECORD_VERSION
                    )));
                }
                let snapshot_id = get_string(&mut frame, "SnapshotBegin id")?;
                if frame.remaining() < 4 {
                    return Err(corrupt("SnapshotBegin truncated"));
                }
                let chunk_count = frame.get_u32();
                Ok(TransferRecord::SnapshotBegin {
                    version,
                    snapshot_id,
                    chunk_count,
                })
            }
            RecordType::Chunk => {
                if frame.remaining() < 12 {
                    return Err(corrupt("Chunk too short"));
                }
                let hash = frame.get_u64();
                let len = frame.get_u32() as usize;
                if frame.remaining() < len {
                    return Err(corrupt("Chunk data truncated"));
                }
                let data = frame.copy_to_bytes(len);
                Ok(TransferRecord::Chunk { hash, data })
            }
            RecordType::SnapshotEnd => {
                let snapshot_id = get_string(&mut frame, "SnapshotEnd id")?;
                let content = get_string(&mut frame, "SnapshotEnd content")?;
                Ok(TransferRecord::SnapshotEnd {
                    snapshot_id,
                    content,
                })
            }
            RecordType::Done => {
                if frame.remaining() < 24 {
                    return Err(corrupt("Done too short"));
                }
                Ok(TransferRecord::Done {
                    snapshots: frame.get_u64(),
                    chunks: frame.get_u64(),
                    bytes: frame.get_u64(),
                })
            }
        }
    }
}

/// Read one record from a stream.
pub async fn read_record<R: AsyncRead + Unpin>(
    r: &mut R,
    codec: &dyn RecordCodec,
) -> Result<TransferRecord> {
    let len = r.read_u32().await?;
    if len > MAX_FRAME_SIZE {
        return Err(VoltreeError::InvalidArgument(format!(
            "frame size {} exceeds maximum allowed size {}",
            len, MAX_FRAME_SIZE
        )));
    }
    // One extra byte for the record type.
    let mut frame = vec![0u8; len as usize + 1];
    r.read_exact(&mut frame).await?;
    codec.decode(Bytes::from(frame))
}

/// Write one record to a stream.
pub async fn write_record<W: AsyncWrite + Unpin>(
    w: &mut W,
    codec: &dyn RecordCodec,
    record: &TransferRecord,
) -> Result<()> {
    w.write_all(&codec.encode(record)).await?;
    Ok(())
}
