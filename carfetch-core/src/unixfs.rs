//! DAG-PB framing and the UnixFS data model
//!
//! Manual implementation of the DAG-PB and UnixFS protobuf messages
//! (see https://ipld.io/specs/codecs/dag-pb/spec/ and the UnixFS spec)
//! using prost derive macros, plus classification of decoded nodes into
//! filesystem objects.

use std::fmt;

use cid::Cid;
use prost::Message as ProstMessage;
use thiserror::Error;

use crate::cid_sha2::{DAG_PB_CODEC, RAW_CODEC};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("malformed DAG-PB node: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("unknown UnixFS node type {0}")]
    UnknownType(i32),

    #[error("directory link without name or hash")]
    MalformedLink,

    #[error("invalid link CID: {0}")]
    InvalidLinkCid(String),

    #[error("codec 0x{0:x} is not supported")]
    UnsupportedCodec(u64),
}

/// DAG-PB node: opaque data plus ordered links
#[derive(Clone, PartialEq, prost::Message)]
pub struct PbNode {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub data: Option<Vec<u8>>,

    #[prost(message, repeated, tag = "2")]
    pub links: Vec<PbLink>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PbLink {
    /// Binary CID of the target object (no multibase prefix)
    #[prost(bytes = "vec", optional, tag = "1")]
    pub hash: Option<Vec<u8>>,

    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,

    /// Cumulative size of the target object
    #[prost(uint64, optional, tag = "3")]
    pub tsize: Option<u64>,
}

/// UnixFS `Data` message carried in a DAG-PB node's data field
#[derive(Clone, PartialEq, prost::Message)]
pub struct UnixFsData {
    #[prost(enumeration = "NodeType", tag = "1")]
    pub node_type: i32,

    #[prost(bytes = "vec", optional, tag = "2")]
    pub data: Option<Vec<u8>>,

    #[prost(uint64, optional, tag = "3")]
    pub filesize: Option<u64>,

    #[prost(uint64, repeated, packed = "false", tag = "4")]
    pub blocksizes: Vec<u64>,

    #[prost(uint64, optional, tag = "5")]
    pub hash_type: Option<u64>,

    #[prost(uint64, optional, tag = "6")]
    pub fanout: Option<u64>,

    #[prost(uint32, optional, tag = "7")]
    pub mode: Option<u32>,

    #[prost(message, optional, tag = "8")]
    pub mtime: Option<UnixTime>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct UnixTime {
    #[prost(int64, tag = "1")]
    pub seconds: i64,

    #[prost(fixed32, optional, tag = "2")]
    pub fractional_nanoseconds: Option<u32>,
}

/// UnixFS node type tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum NodeType {
    Raw = 0,
    Directory = 1,
    File = 2,
    Metadata = 3,
    Symlink = 4,
    HamtShard = 5,
}

impl UnixFsData {
    /// Typed node type tag; out-of-range values are malformed
    pub fn kind(&self) -> Result<NodeType, NodeError> {
        NodeType::try_from(self.node_type).map_err(|_| NodeError::UnknownType(self.node_type))
    }
}

/// Decode DAG-PB framing from a block payload
pub fn decode_node(payload: &[u8]) -> Result<PbNode, NodeError> {
    Ok(PbNode::decode(payload)?)
}

/// Decode the UnixFS data message embedded in a DAG-PB node
pub fn decode_data(bytes: &[u8]) -> Result<UnixFsData, NodeError> {
    Ok(UnixFsData::decode(bytes)?)
}

/// A named directory entry link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirLink {
    pub name: String,
    pub cid: Cid,
    pub tsize: Option<u64>,
}

/// Extract the named entry links of a directory node, in link order
///
/// A directory entry without a name can never be addressed by a path
/// segment, so it is rejected rather than skipped.
pub fn directory_links(node: &PbNode) -> Result<Vec<DirLink>, NodeError> {
    node.links
        .iter()
        .map(|link| {
            let name = link
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .ok_or(NodeError::MalformedLink)?;
            let hash = link.hash.as_deref().ok_or(NodeError::MalformedLink)?;
            let cid =
                Cid::try_from(hash).map_err(|e| NodeError::InvalidLinkCid(e.to_string()))?;
            Ok(DirLink {
                name,
                cid,
                tsize: link.tsize,
            })
        })
        .collect()
}

/// UnixFS node types that are detected but deliberately not handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedKind {
    HamtShard,
    Metadata,
}

impl fmt::Display for UnsupportedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsupportedKind::HamtShard => write!(f, "HAMT-sharded directory"),
            UnsupportedKind::Metadata => write!(f, "UnixFS metadata node"),
        }
    }
}

/// Classification of a verified block as a filesystem object
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    File { size: Option<u64> },
    Directory { links: Vec<DirLink> },
    Symlink,
    /// A chunk of a larger file's DAG, not a standalone file
    Chunk,
    Unsupported(UnsupportedKind),
}

/// Classify a block by codec and, for DAG-PB, by its UnixFS type tag
///
/// Raw-codec blocks carry no DAG-PB framing at all; they are standalone
/// files whose size is the payload length.
pub fn classify(cid: &Cid, payload: &[u8]) -> Result<Classified, NodeError> {
    match cid.codec() {
        RAW_CODEC => Ok(Classified::File {
            size: Some(payload.len() as u64),
        }),
        DAG_PB_CODEC => {
            let node = decode_node(payload)?;
            let data = decode_data(node.data.as_deref().unwrap_or_default())?;
            match data.kind()? {
                NodeType::Directory => Ok(Classified::Directory {
                    links: directory_links(&node)?,
                }),
                NodeType::File => Ok(Classified::File {
                    size: file_size(&data),
                }),
                NodeType::Symlink => Ok(Classified::Symlink),
                NodeType::Raw => Ok(Classified::Chunk),
                NodeType::Metadata => Ok(Classified::Unsupported(UnsupportedKind::Metadata)),
                NodeType::HamtShard => Ok(Classified::Unsupported(UnsupportedKind::HamtShard)),
            }
        }
        other => Err(NodeError::UnsupportedCodec(other)),
    }
}

/// Effective size of a UnixFS file node
///
/// Prefers the declared filesize, then the sum of chunk blocksizes, then
/// the embedded data length.
pub fn file_size(data: &UnixFsData) -> Option<u64> {
    data.filesize.or_else(|| {
        if data.blocksizes.is_empty() {
            data.data.as_ref().map(|d| d.len() as u64)
        } else {
            Some(data.blocksizes.iter().sum())
        }
    })
}
