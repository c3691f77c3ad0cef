//! Merkle path resolution over verified block sets
//!
//! Walks a UnixFS directory graph one path segment at a time, looking up
//! every hop in an immutable snapshot of digest-verified blocks. A
//! successful walk certifies the terminal CID: each block was verified
//! against its CID when the snapshot was built, and each hop follows a
//! link embedded in a verified parent.

use std::collections::HashMap;

use bytes::Bytes;
use cid::Cid;
use thiserror::Error;

use crate::car::{CarError, CarReader};
use crate::cid_sha2::{self, DAG_PB_CODEC, RAW_CODEC};
use crate::unixfs::{self, DirLink, NodeError, NodeType, UnsupportedKind};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid root CID in path: {0}")]
    InvalidRootCid(String),

    #[error("root block {0} not found in proof")]
    RootBlockNotFound(Cid),

    #[error("path segment '{0}' not found")]
    PathSegmentNotFound(String),

    #[error("child block {0} not found in proof")]
    ChildBlockNotFound(Cid),

    #[error("{0} is not a directory")]
    NotADirectory(Cid),

    #[error("{0} is not a file")]
    NotAFile(Cid),

    #[error("gateway advertised {actual} roots for a path needing {expected}")]
    RootCountMismatch { expected: usize, actual: usize },

    #[error("{cid} is a {kind}, which is not supported")]
    UnsupportedNode { cid: Cid, kind: UnsupportedKind },

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl ResolveError {
    /// Whether this failure means "the requested path does not resolve"
    ///
    /// Unsupported node types are excluded: the object exists, this
    /// implementation just refuses to interpret it.
    pub fn is_not_found(&self) -> bool {
        !matches!(self, ResolveError::UnsupportedNode { .. })
    }
}

/// A parsed `<cid>[/<segment>...]` retrieval request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRequest {
    root: Cid,
    segments: Vec<String>,
}

impl PathRequest {
    /// Parse a slash-separated path whose first component is the root CID
    ///
    /// Empty segments are ignored, so `cid//a/` equals `cid/a`.
    pub fn parse(path: &str) -> Result<Self, ResolveError> {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        let root_text = parts
            .next()
            .ok_or_else(|| ResolveError::InvalidRootCid(path.to_string()))?;
        let root = cid_sha2::parse_cid(root_text)
            .map_err(|_| ResolveError::InvalidRootCid(root_text.to_string()))?;
        Ok(Self {
            root,
            segments: parts.map(str::to_string).collect(),
        })
    }

    pub fn root(&self) -> Cid {
        self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Canonical `<cid>[/<segment>...]` form used on the wire
    pub fn canonical(&self) -> String {
        let mut out = self.root.to_string();
        for segment in &self.segments {
            out.push('/');
            out.push_str(segment);
        }
        out
    }
}

/// Immutable snapshot of digest-verified blocks keyed by CID
///
/// Built once per retrieval from a CAR response; resolution never
/// mutates it, and concurrent resolutions never share one.
#[derive(Debug, Clone, Default)]
pub struct BlockSet {
    blocks: HashMap<Cid, Bytes>,
}

impl BlockSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain a CAR reader into a block set
    ///
    /// The reader verifies every block against its CID as it decodes, so
    /// everything that lands in the set is certified.
    pub fn from_reader(reader: CarReader) -> Result<Self, CarError> {
        let mut blocks = HashMap::new();
        for block in reader {
            let block = block?;
            blocks.insert(block.cid, block.payload);
        }
        Ok(Self { blocks })
    }

    /// Insert an already-verified block
    pub fn insert(&mut self, cid: Cid, payload: Bytes) {
        self.blocks.insert(cid, payload);
    }

    pub fn get(&self, cid: &Cid) -> Option<&Bytes> {
        self.blocks.get(cid)
    }

    pub fn contains(&self, cid: &Cid) -> bool {
        self.blocks.contains_key(cid)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Walk a path segment by segment through directory links
///
/// Terminal on the first failure; when the segments are exhausted the
/// current CID is the resolved identifier.
pub fn verify_path(request: &PathRequest, blocks: &BlockSet) -> Result<Cid, ResolveError> {
    let mut current = request.root();
    if !blocks.contains(&current) {
        return Err(ResolveError::RootBlockNotFound(current));
    }
    for segment in request.segments() {
        let payload = blocks
            .get(&current)
            .ok_or(ResolveError::ChildBlockNotFound(current))?;
        let links = directory_links_of(current, payload)?;
        let link = links
            .iter()
            .find(|l| l.name == *segment)
            .ok_or_else(|| ResolveError::PathSegmentNotFound(segment.clone()))?;
        let next = link.cid;
        if !blocks.contains(&next) {
            return Err(ResolveError::ChildBlockNotFound(next));
        }
        current = next;
    }
    Ok(current)
}

fn directory_links_of(cid: Cid, payload: &[u8]) -> Result<Vec<DirLink>, ResolveError> {
    if cid.codec() != DAG_PB_CODEC {
        return Err(ResolveError::NotADirectory(cid));
    }
    let node = unixfs::decode_node(payload)?;
    let data = unixfs::decode_data(node.data.as_deref().unwrap_or_default())?;
    match data.kind()? {
        NodeType::Directory => Ok(unixfs::directory_links(&node)?),
        NodeType::HamtShard => Err(ResolveError::UnsupportedNode {
            cid,
            kind: UnsupportedKind::HamtShard,
        }),
        NodeType::Metadata => Err(ResolveError::UnsupportedNode {
            cid,
            kind: UnsupportedKind::Metadata,
        }),
        _ => Err(ResolveError::NotADirectory(cid)),
    }
}

/// Reassemble a file's bytes from its DAG, depth first in link order
///
/// Raw-codec leaves contribute their payload directly; DAG-PB file nodes
/// contribute either their embedded data or the concatenation of their
/// children.
pub fn assemble_file(cid: &Cid, blocks: &BlockSet) -> Result<Vec<u8>, ResolveError> {
    let payload = blocks
        .get(cid)
        .ok_or(ResolveError::ChildBlockNotFound(*cid))?;
    if cid.codec() == RAW_CODEC {
        return Ok(payload.to_vec());
    }
    if cid.codec() != DAG_PB_CODEC {
        return Err(ResolveError::Node(NodeError::UnsupportedCodec(cid.codec())));
    }

    let node = unixfs::decode_node(payload)?;
    let data = unixfs::decode_data(node.data.as_deref().unwrap_or_default())?;
    match data.kind()? {
        NodeType::File | NodeType::Raw => {
            if node.links.is_empty() {
                return Ok(data.data.unwrap_or_default());
            }
            let mut out = Vec::with_capacity(unixfs::file_size(&data).unwrap_or(0) as usize);
            for link in &node.links {
                let hash = link.hash.as_deref().ok_or(NodeError::MalformedLink)?;
                let child =
                    Cid::try_from(hash).map_err(|e| NodeError::InvalidLinkCid(e.to_string()))?;
                out.extend_from_slice(&assemble_file(&child, blocks)?);
            }
            Ok(out)
        }
        NodeType::HamtShard => Err(ResolveError::UnsupportedNode {
            cid: *cid,
            kind: UnsupportedKind::HamtShard,
        }),
        NodeType::Metadata => Err(ResolveError::UnsupportedNode {
            cid: *cid,
            kind: UnsupportedKind::Metadata,
        }),
        _ => Err(ResolveError::NotAFile(*cid)),
    }
}
