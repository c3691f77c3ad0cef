//! The retrieval engine: verified resolve/list/read over a gateway pool
//!
//! One logical retrieval fetches a CAR-scoped proof through the pool,
//! verifies every block against its CID, walks the Merkle path, and only
//! then answers. Callers get either a certified result or one typed
//! error; no unverified byte ever crosses this boundary.

use std::ops::Range;

use bytes::Bytes;
use cid::Cid;
use futures::stream::{self, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::car::{CarError, CarReader};
use crate::cid_sha2::{self, CidError};
use crate::config::{ConfigError, GatewayPoolConfig};
use crate::gateway::{DagScope, FetchError, Gateway, HttpGateway};
use crate::pool::{GatewayPool, PoolError};
use crate::resolver::{self, BlockSet, PathRequest, ResolveError};
use crate::unixfs::{self, Classified};

/// What kind of object a path resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    /// A chunk of a larger file's DAG, not a standalone file
    Chunk,
}

/// A successful path resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub cid: Cid,
    pub kind: EntryKind,
    pub size: Option<u64>,
}

/// One directory listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub cid: Cid,
    pub kind: EntryKind,
    pub size: Option<u64>,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("object not found on any gateway")]
    NotFound,

    #[error("{0} is not supported")]
    Unsupported(String),

    #[error("all gateways exhausted")]
    AllGatewaysExhausted { last: Option<FetchError> },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Car(#[from] CarError),

    #[error(transparent)]
    Cid(#[from] CidError),
}

impl From<PoolError> for RetrievalError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::NotFound => RetrievalError::NotFound,
            PoolError::Unsupported(what) => RetrievalError::Unsupported(what),
            PoolError::Exhausted { last } => RetrievalError::AllGatewaysExhausted { last },
        }
    }
}

impl RetrievalError {
    /// Whether a filesystem facade should present this as "no such file"
    ///
    /// Resolution failures count: from the caller's perspective the path
    /// does not resolve. Integrity failures and unsupported node types do
    /// not; conflating them would hide corruption.
    pub fn is_not_found(&self) -> bool {
        match self {
            RetrievalError::NotFound => true,
            RetrievalError::Resolve(e) => e.is_not_found(),
            RetrievalError::Car(e) => matches!(
                e,
                CarError::UnsupportedVersion(_) | CarError::MalformedHeader(_)
            ),
            _ => false,
        }
    }
}

/// Verified retrieval engine over a pool of untrusted gateways
pub struct Retriever<G = HttpGateway> {
    pool: GatewayPool<G>,
    max_concurrent: usize,
}

impl Retriever<HttpGateway> {
    /// Build an HTTP retriever from an explicit configuration
    pub fn new(config: GatewayPoolConfig) -> Result<Self, ConfigError> {
        if config.gateways.is_empty() {
            return Err(ConfigError::NoGateway);
        }
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;
        let gateways = config
            .gateways
            .iter()
            .map(|url| HttpGateway::new(url.clone(), client.clone(), config.strategy))
            .collect();
        Ok(Self::with_gateways(gateways, &config))
    }

    /// Build an HTTP retriever from IPIP-280 gateway discovery
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new(GatewayPoolConfig::from_env()?)
    }
}

impl<G: Gateway> Retriever<G> {
    /// Build a retriever over caller-supplied gateway transports
    pub fn with_gateways(gateways: Vec<G>, config: &GatewayPoolConfig) -> Self {
        Self {
            pool: GatewayPool::new(gateways, config),
            max_concurrent: config.max_concurrent.max(1),
        }
    }

    /// One line of scheduling state per gateway
    pub fn state_report(&self) -> String {
        self.pool.state_report()
    }

    /// Resolve a `<cid>[/<segment>...]` path to its terminal CID and
    /// classification
    pub async fn resolve(&self, path: &str) -> Result<Resolved, RetrievalError> {
        let request = PathRequest::parse(path)?;
        let (cid, blocks) = self.fetch_verified(&request, DagScope::Block).await?;
        let payload = blocks
            .get(&cid)
            .ok_or(ResolveError::ChildBlockNotFound(cid))?;
        match unixfs::classify(&cid, payload).map_err(ResolveError::from)? {
            Classified::File { size } => Ok(Resolved {
                cid,
                kind: EntryKind::File,
                size,
            }),
            Classified::Directory { .. } => Ok(Resolved {
                cid,
                kind: EntryKind::Directory,
                size: None,
            }),
            Classified::Symlink => Ok(Resolved {
                cid,
                kind: EntryKind::Symlink,
                size: None,
            }),
            Classified::Chunk => Ok(Resolved {
                cid,
                kind: EntryKind::Chunk,
                size: None,
            }),
            Classified::Unsupported(kind) => {
                Err(ResolveError::UnsupportedNode { cid, kind }.into())
            }
        }
    }

    /// List a directory's entries with each entry's kind and size
    ///
    /// Entries resolve concurrently, bounded by the configured limit;
    /// each per-entry resolution independently runs the full gateway
    /// pool state machine. Output preserves directory order.
    pub async fn list(&self, path: &str) -> Result<Vec<Entry>, RetrievalError> {
        let request = PathRequest::parse(path)?;
        let (cid, blocks) = self.fetch_verified(&request, DagScope::Block).await?;
        let payload = blocks
            .get(&cid)
            .ok_or(ResolveError::ChildBlockNotFound(cid))?;
        let links = match unixfs::classify(&cid, payload).map_err(ResolveError::from)? {
            Classified::Directory { links } => links,
            Classified::Unsupported(kind) => {
                return Err(ResolveError::UnsupportedNode { cid, kind }.into());
            }
            _ => return Err(ResolveError::NotADirectory(cid).into()),
        };

        stream::iter(links.into_iter().map(|link| async move {
            let child = self.resolve(&link.cid.to_string()).await?;
            Ok::<_, RetrievalError>(Entry {
                name: link.name,
                cid: link.cid,
                kind: child.kind,
                size: child.size,
            })
        }))
        .buffered(self.max_concurrent)
        .try_collect()
        .await
    }

    /// Read a file's verified bytes, optionally restricted to a byte range
    pub async fn read(
        &self,
        path: &str,
        range: Option<Range<u64>>,
    ) -> Result<Bytes, RetrievalError> {
        let request = PathRequest::parse(path)?;
        let (cid, blocks) = self.fetch_verified(&request, DagScope::All).await?;
        let data = resolver::assemble_file(&cid, &blocks)?;
        Ok(Bytes::from(apply_range(data, range)))
    }

    /// Fetch a single block and verify it against its CID
    pub async fn fetch_block(&self, cid: &Cid) -> Result<Bytes, RetrievalError> {
        let path = cid.to_string();
        let body = self.pool.run(|gw| gw.fetch_block(&path)).await?;
        cid_sha2::verify(cid, &body)?;
        Ok(body)
    }

    /// Fetch a CAR-scoped proof for a request and verify the path walk
    async fn fetch_verified(
        &self,
        request: &PathRequest,
        scope: DagScope,
    ) -> Result<(Cid, BlockSet), RetrievalError> {
        let path = request.canonical();
        let response = self.pool.run(|gw| gw.fetch_car(&path, scope)).await?;

        // The gateway must advertise one root per path hop; anything else
        // means the proof chain is incomplete.
        let expected = request.segments().len() + 1;
        if response.roots.len() != expected {
            return Err(ResolveError::RootCountMismatch {
                expected,
                actual: response.roots.len(),
            }
            .into());
        }

        let reader = CarReader::new(response.body)?;
        let blocks = BlockSet::from_reader(reader)?;
        let cid = resolver::verify_path(request, &blocks)?;
        Ok((cid, blocks))
    }
}

fn apply_range(data: Vec<u8>, range: Option<Range<u64>>) -> Vec<u8> {
    match range {
        None => data,
        Some(range) => {
            let len = data.len() as u64;
            let start = range.start.min(len) as usize;
            let end = range.end.min(len) as usize;
            if start >= end {
                Vec::new()
            } else {
                data[start..end].to_vec()
            }
        }
    }
}
