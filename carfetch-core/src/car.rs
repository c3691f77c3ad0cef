//! Streaming CARv1 decoder
//!
//! A CARv1 stream is a varint-prefixed DAG-CBOR header naming the DAG
//! roots, followed by length-prefixed (CID, payload) blocks. The reader
//! owns its input buffer and is consumed by iteration; a CAR cannot be
//! read twice.

use bytes::Bytes;
use cid::Cid;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cid_sha2::{self, CidError};

#[derive(Debug, Error)]
pub enum CarError {
    #[error("CAR version {0} is not supported")]
    UnsupportedVersion(u64),

    #[error("malformed CAR header: {0}")]
    MalformedHeader(String),

    #[error("truncated CAR stream")]
    Truncated,

    #[error("corrupt CAR: block {cid} failed digest verification")]
    Corrupt { cid: Cid },

    #[error("CID error: {0}")]
    Cid(#[from] CidError),
}

/// The header map of a CARv1 stream
#[derive(Debug, Serialize, Deserialize)]
struct CarHeader {
    version: u64,
    roots: Vec<Cid>,
}

/// Byte-exact provenance of one block inside a CAR stream
///
/// Lets callers range-read parts of a DAG later without re-materializing
/// the whole archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLocation {
    /// Offset of the block's length varint from the start of the stream
    pub offset: u64,
    /// Size of the length varint
    pub varint_size: usize,
    /// Size of the CID prefix
    pub cid_size: usize,
    /// Size of the payload
    pub payload_size: usize,
}

impl BlockLocation {
    pub fn cid_offset(&self) -> u64 {
        self.offset + self.varint_size as u64
    }

    pub fn payload_offset(&self) -> u64 {
        self.cid_offset() + self.cid_size as u64
    }

    pub fn len(&self) -> usize {
        self.varint_size + self.cid_size + self.payload_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A digest-verified block decoded from a CAR stream
#[derive(Debug, Clone)]
pub struct CarBlock {
    pub cid: Cid,
    pub payload: Bytes,
    pub location: BlockLocation,
}

/// Single-pass reader over an owned CARv1 buffer
///
/// Every block is verified against its CID as it is decoded; a digest
/// mismatch aborts iteration with [`CarError::Corrupt`].
pub struct CarReader {
    buf: Bytes,
    pos: usize,
    roots: Vec<Cid>,
}

impl CarReader {
    /// Decode the CAR header and position the reader at the first block
    pub fn new(buf: impl Into<Bytes>) -> Result<Self, CarError> {
        let buf: Bytes = buf.into();
        let (header_len, varint_size) = read_varint(&buf, 0)?;
        let header_end = varint_size + header_len as usize;
        if buf.len() < header_end {
            return Err(CarError::Truncated);
        }
        let header: CarHeader = serde_ipld_dagcbor::from_slice(&buf[varint_size..header_end])
            .map_err(|e| CarError::MalformedHeader(e.to_string()))?;
        if header.version != 1 {
            return Err(CarError::UnsupportedVersion(header.version));
        }
        Ok(Self {
            buf,
            pos: header_end,
            roots: header.roots,
        })
    }

    /// Roots declared by the CAR header
    pub fn roots(&self) -> &[Cid] {
        &self.roots
    }

    /// Decode and verify the next block, or `None` at clean end of stream
    pub fn next_block(&mut self) -> Result<Option<CarBlock>, CarError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let offset = self.pos as u64;
        let (block_len, varint_size) = read_varint(&self.buf, self.pos)?;
        let body_start = self.pos + varint_size;
        let body_end = body_start + block_len as usize;
        if self.buf.len() < body_end {
            return Err(CarError::Truncated);
        }

        let (cid, cid_size) = cid_sha2::split_cid_prefix(&self.buf[body_start..body_end])?;
        let payload = self.buf.slice(body_start + cid_size..body_end);
        cid_sha2::verify(&cid, &payload).map_err(|e| match e {
            CidError::HashMismatch { cid } => CarError::Corrupt { cid },
            other => CarError::Cid(other),
        })?;

        self.pos = body_end;
        Ok(Some(CarBlock {
            cid,
            payload,
            location: BlockLocation {
                offset,
                varint_size,
                cid_size,
                payload_size: block_len as usize - cid_size,
            },
        }))
    }
}

impl Iterator for CarReader {
    type Item = Result<CarBlock, CarError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_block().transpose()
    }
}

fn read_varint(buf: &[u8], pos: usize) -> Result<(u64, usize), CarError> {
    let (value, rest) =
        unsigned_varint::decode::u64(&buf[pos..]).map_err(|_| CarError::Truncated)?;
    Ok((value, buf.len() - pos - rest.len()))
}
