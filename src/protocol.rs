//! Wire protocol shared by the node and the CLI.
//!
//! Request:  `[OpCode (1b)][Length u32 LE (4b)][Body (N)]`
//! Reply:    `[Status (1b)][Length u32 LE (4b)][JSON body (N)]`

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::model::{Field, RecordId};
use crate::template::TemplateId;

// --- OpCodes ---
pub const OP_PUT: u8       = 0x01;
pub const OP_LOAD: u8      = 0x02;
pub const OP_RELOAD: u8    = 0x03;
pub const OP_PICK: u8      = 0x04;
pub const OP_TEMPLATE: u8  = 0x05;
pub const OP_DELETE: u8    = 0x06;
pub const OP_SNAPSHOT: u8  = 0x07;
pub const OP_COMPACT: u8   = 0x08; // body: JSON HistoryRetention
pub const OP_SEARCH: u8    = 0x09; // body: JSON SearchQuery

// --- Status ---
pub const STATUS_OK: u8        = 0x00;
pub const STATUS_UNCHANGED: u8 = 0x01;
pub const STATUS_NOT_FOUND: u8 = 0x02;
pub const STATUS_ERROR: u8     = 0xFF;

/// Largest accepted body; bigger frames close the connection.
pub const MAX_FRAME: usize = 64 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    /// New record when absent
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default)]
    pub template: Option<TemplateId>,
    pub fields: Vec<Field>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PutReply {
    pub id: RecordId,
    pub offset: u64,
}

pub fn encode_load(id: RecordId, position: i32) -> Vec<u8> {
    let mut body = Vec::with_capacity(20);
    body.extend_from_slice(id.0.as_bytes());
    body.extend_from_slice(&position.to_le_bytes());
    body
}

pub fn decode_load(body: &[u8]) -> Option<(RecordId, i32)> {
    if body.len() != 20 {
        return None;
    }
    let id = RecordId::from_u128(u128::from_be_bytes(body[..16].try_into().ok()?));
    let position = i32::from_le_bytes(body[16..].try_into().ok()?);
    Some((id, position))
}

// --- Async side (node) ---

/// Reads one request. `Ok(None)` on a clean disconnect.
pub async fn read_request<R: AsyncReadExt + Unpin>(reader: &mut R) -> io::Result<Option<(u8, Vec<u8>)>> {
    let mut op_buf = [0u8; 1];
    if reader.read_exact(&mut op_buf).await.is_err() {
        return Ok(None);
    }

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let length = u32::from_le_bytes(len_buf) as usize;
    if length > MAX_FRAME {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("payload too large: {length} bytes")));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some((op_buf[0], body)))
}

pub async fn write_reply<W: AsyncWriteExt + Unpin>(writer: &mut W, status: u8, body: &[u8]) -> io::Result<()> {
    writer.write_all(&[status]).await?;
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

// --- Blocking side (CLI) ---

pub fn send_request<S: Read + Write>(stream: &mut S, op: u8, body: &[u8]) -> io::Result<(u8, Vec<u8>)> {
    stream.write_all(&[op])?;
    stream.write_all(&(body.len() as u32).to_le_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;

    let mut status = [0u8; 1];
    stream.read_exact(&mut status)?;
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let mut reply = vec![0u8; u32::from_le_bytes(len_buf) as usize];
    stream.read_exact(&mut reply)?;
    Ok((status[0], reply))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_body_carries_id_and_signed_position() {
        let id = RecordId::new();
        assert_eq!(decode_load(&encode_load(id, -1)), Some((id, -1)));
        assert_eq!(decode_load(&encode_load(id, 4)), Some((id, 4)));
        assert_eq!(decode_load(&[0u8; 16]), None);
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let mut frame = vec![OP_PUT];
        frame.extend_from_slice(&((MAX_FRAME as u32) + 1).to_le_bytes());
        let mut reader = frame.as_slice();

        let err = read_request(&mut reader).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn empty_input_is_a_clean_disconnect() {
        let mut reader: &[u8] = &[];
        assert!(read_request(&mut reader).await.unwrap().is_none());
    }
}
