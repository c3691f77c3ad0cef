//! Shared test fixtures: an in-memory UnixFS DAG, CARv1 encoding and a
//! mock gateway speaking the trustless protocol.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use prost::Message;
use serde::Serialize;

use carfetch_core::{
    cid_v0_sha2, cid_v1_sha2, CarResponse, Cid, DagScope, FetchError, Gateway, NodeType, PbLink,
    PbNode, UnixFsData, DAG_PB_CODEC, RAW_CODEC,
};

#[derive(Serialize)]
struct CarHeader {
    version: u64,
    roots: Vec<Cid>,
}

/// Encode a CARv1 stream from explicit roots and blocks
pub fn encode_car(roots: &[Cid], blocks: &[(Cid, &[u8])]) -> Vec<u8> {
    let header = serde_ipld_dagcbor::to_vec(&CarHeader {
        version: 1,
        roots: roots.to_vec(),
    })
    .unwrap();

    let mut out = Vec::new();
    let mut vibuf = unsigned_varint::encode::u64_buffer();
    out.extend_from_slice(unsigned_varint::encode::u64(header.len() as u64, &mut vibuf));
    out.extend_from_slice(&header);
    for (cid, payload) in blocks {
        let cid_bytes = cid.to_bytes();
        let frame_len = (cid_bytes.len() + payload.len()) as u64;
        out.extend_from_slice(unsigned_varint::encode::u64(frame_len, &mut vibuf));
        out.extend_from_slice(&cid_bytes);
        out.extend_from_slice(payload);
    }
    out
}

/// An in-memory UnixFS DAG addressed by real, computed CIDs
#[derive(Debug, Default)]
pub struct FixtureDag {
    pub blocks: HashMap<Cid, Vec<u8>>,
}

impl FixtureDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_raw(&mut self, content: &[u8]) -> Cid {
        let cid = cid_v1_sha2(RAW_CODEC, content);
        self.blocks.insert(cid, content.to_vec());
        cid
    }

    pub fn insert_file(&mut self, content: &[u8]) -> Cid {
        let data = UnixFsData {
            node_type: NodeType::File as i32,
            data: Some(content.to_vec()),
            filesize: Some(content.len() as u64),
            ..Default::default()
        };
        self.insert_pb_node(PbNode {
            data: Some(data.encode_to_vec()),
            links: vec![],
        })
    }

    pub fn insert_chunked_file(&mut self, chunks: &[&[u8]]) -> Cid {
        let chunk_cids: Vec<(Cid, u64)> = chunks
            .iter()
            .map(|c| (self.insert_raw(c), c.len() as u64))
            .collect();
        let data = UnixFsData {
            node_type: NodeType::File as i32,
            filesize: Some(chunk_cids.iter().map(|(_, len)| len).sum()),
            blocksizes: chunk_cids.iter().map(|(_, len)| *len).collect(),
            ..Default::default()
        };
        self.insert_pb_node(PbNode {
            data: Some(data.encode_to_vec()),
            links: chunk_cids
                .iter()
                .map(|(cid, len)| PbLink {
                    hash: Some(cid.to_bytes()),
                    name: Some(String::new()),
                    tsize: Some(*len),
                })
                .collect(),
        })
    }

    pub fn insert_symlink(&mut self, target: &[u8]) -> Cid {
        let data = UnixFsData {
            node_type: NodeType::Symlink as i32,
            data: Some(target.to_vec()),
            ..Default::default()
        };
        self.insert_pb_node(PbNode {
            data: Some(data.encode_to_vec()),
            links: vec![],
        })
    }

    pub fn insert_hamt_shard(&mut self) -> Cid {
        let data = UnixFsData {
            node_type: NodeType::HamtShard as i32,
            ..Default::default()
        };
        self.insert_pb_node(PbNode {
            data: Some(data.encode_to_vec()),
            links: vec![],
        })
    }

    pub fn insert_dir(&mut self, entries: &[(&str, Cid)]) -> Cid {
        let data = UnixFsData {
            node_type: NodeType::Directory as i32,
            ..Default::default()
        };
        self.insert_pb_node(PbNode {
            data: Some(data.encode_to_vec()),
            links: entries
                .iter()
                .map(|(name, cid)| PbLink {
                    hash: Some(cid.to_bytes()),
                    name: Some(name.to_string()),
                    tsize: None,
                })
                .collect(),
        })
    }

    fn insert_pb_node(&mut self, node: PbNode) -> Cid {
        let payload = node.encode_to_vec();
        let cid = cid_v0_sha2(&payload);
        self.blocks.insert(cid, payload);
        cid
    }

    /// CIDs along a path: the root plus the target of every segment
    pub fn path_chain(&self, path: &str) -> Option<Vec<Cid>> {
        let mut parts = path.split('/').filter(|s| !s.is_empty());
        let mut current: Cid = parts.next()?.parse().ok()?;
        let mut chain = vec![current];
        for segment in parts {
            let payload = self.blocks.get(&current)?;
            let node = PbNode::decode(payload.as_slice()).ok()?;
            let link = node
                .links
                .iter()
                .find(|l| l.name.as_deref() == Some(segment))?;
            current = Cid::try_from(link.hash.as_deref()?).ok()?;
            chain.push(current);
        }
        Some(chain)
    }

    /// A CID plus everything reachable below it through dag-pb links
    pub fn subtree(&self, cid: Cid) -> Vec<Cid> {
        let mut out = vec![cid];
        if cid.codec() != DAG_PB_CODEC {
            return out;
        }
        let Some(payload) = self.blocks.get(&cid) else {
            return out;
        };
        let Ok(node) = PbNode::decode(payload.as_slice()) else {
            return out;
        };
        for link in &node.links {
            if let Some(child) = link.hash.as_deref().and_then(|h| Cid::try_from(h).ok()) {
                out.extend(self.subtree(child));
            }
        }
        out
    }

    /// Trustless CAR response for a path request, or `None` when the
    /// path does not resolve against this DAG
    pub fn car_response(&self, path: &str, scope: DagScope) -> Option<(Vec<String>, Vec<u8>)> {
        let chain = self.path_chain(path)?;
        let mut cids = chain.clone();
        if scope == DagScope::All {
            cids.extend(self.subtree(*chain.last().unwrap()));
        }
        let mut seen = HashSet::new();
        cids.retain(|c| seen.insert(*c));

        let blocks: Vec<(Cid, &[u8])> = cids
            .iter()
            .filter_map(|c| self.blocks.get(c).map(|p| (*c, p.as_slice())))
            .collect();
        if blocks.len() != cids.len() {
            return None;
        }

        let car = encode_car(&chain[..1], &blocks);
        let roots = chain.iter().map(|c| c.to_string()).collect();
        Some((roots, car))
    }
}

/// The directory scenario used across the integration tests
pub struct Fixture {
    pub dag: Arc<FixtureDag>,
    pub root: Cid,
    pub default_cid: Cid,
    pub multi_cid: Cid,
    pub raw_cid: Cid,
    pub raw_multi_cid: Cid,
    pub write_cid: Cid,
}

pub const DEFAULT_CONTENT: &[u8] = b"default file content";
pub const MULTI_CHUNKS: [&[u8]; 2] = [b"multi part one|", b"multi part two"];
pub const RAW_CONTENT: &[u8] = b"raw leaf content";
pub const RAW_MULTI_CHUNKS: [&[u8]; 3] = [b"alpha-", b"beta-", b"gamma"];
pub const WRITE_CONTENT: &[u8] = b"write file content";

pub fn sample_fixture() -> Fixture {
    let mut dag = FixtureDag::new();
    let default_cid = dag.insert_file(DEFAULT_CONTENT);
    let multi_cid = dag.insert_chunked_file(&MULTI_CHUNKS);
    let raw_cid = dag.insert_raw(RAW_CONTENT);
    let raw_multi_cid = dag.insert_chunked_file(&RAW_MULTI_CHUNKS);
    let write_cid = dag.insert_file(WRITE_CONTENT);
    let root = dag.insert_dir(&[
        ("default", default_cid),
        ("multi", multi_cid),
        ("raw", raw_cid),
        ("raw_multi", raw_multi_cid),
        ("write", write_cid),
    ]);
    Fixture {
        dag: Arc::new(dag),
        root,
        default_cid,
        multi_cid,
        raw_cid,
        raw_multi_cid,
        write_cid,
    }
}

/// Failure modes an in-memory gateway can simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Healthy,
    /// Connection refused on every request
    Dead,
    /// Advertises one root too few in `X-Ipfs-Roots`
    TruncatedRoots,
    /// Flips a byte in every CAR body
    Corrupting,
}

/// A trustless gateway serving a fixture DAG without any network
pub struct InMemoryGateway {
    url: String,
    dag: Arc<FixtureDag>,
    mode: GatewayMode,
    hits: Arc<AtomicUsize>,
}

impl InMemoryGateway {
    pub fn new(url: &str, dag: Arc<FixtureDag>) -> Self {
        Self::with_mode(url, dag, GatewayMode::Healthy)
    }

    pub fn with_mode(url: &str, dag: Arc<FixtureDag>, mode: GatewayMode) -> Self {
        Self {
            url: url.to_string(),
            dag,
            mode,
            hits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle that stays valid after the gateway moves into a pool
    pub fn hits_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.hits)
    }
}

#[async_trait]
impl Gateway for InMemoryGateway {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_car(&self, path: &str, scope: DagScope) -> Result<CarResponse, FetchError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if self.mode == GatewayMode::Dead {
            return Err(FetchError::Connect("connection refused".to_string()));
        }
        let (mut roots, mut body) = self
            .dag
            .car_response(path, scope)
            .ok_or(FetchError::NotFound)?;
        match self.mode {
            GatewayMode::TruncatedRoots => {
                roots.pop();
            }
            GatewayMode::Corrupting => {
                let last = body.len() - 1;
                body[last] ^= 0x01;
            }
            _ => {}
        }
        Ok(CarResponse {
            roots,
            body: Bytes::from(body),
        })
    }

    async fn fetch_block(&self, path: &str) -> Result<Bytes, FetchError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        if self.mode == GatewayMode::Dead {
            return Err(FetchError::Connect("connection refused".to_string()));
        }
        let cid: Cid = path.parse().map_err(|_| FetchError::NotFound)?;
        self.dag
            .blocks
            .get(&cid)
            .map(|b| Bytes::from(b.clone()))
            .ok_or(FetchError::NotFound)
    }
}
