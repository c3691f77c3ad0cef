//! Carfetch Core
//!
//! Verified retrieval of content-addressed data (UnixFS DAGs) from
//! untrusted IPFS HTTP gateways. A gateway pool with adaptive backoff
//! and failover supplies bytes, a streaming CARv1 decoder frames them
//! into blocks, every block is verified against its CID, and a Merkle
//! path resolver walks the directory graph to answer resolve, list and
//! read requests.

pub mod car;
pub mod cid_sha2;
pub mod config;
pub mod gateway;
pub mod pool;
pub mod resolver;
pub mod retriever;
pub mod unixfs;

pub use car::{BlockLocation, CarBlock, CarError, CarReader};
pub use cid_sha2::{
    cid_v0_sha2, cid_v1_sha2, digest_of, parse_cid, split_cid_prefix, verify, CidError,
    DAG_PB_CODEC, RAW_CODEC,
};
pub use config::{gateway_from_file, ConfigError, GatewayPoolConfig};
pub use gateway::{
    CarResponse, DagScope, FetchError, Gateway, HttpGateway, ResolutionStrategy, X_IPFS_ROOTS,
};
pub use pool::{GatewayPool, GatewayState, PoolError};
pub use resolver::{assemble_file, verify_path, BlockSet, PathRequest, ResolveError};
pub use retriever::{Entry, EntryKind, Resolved, RetrievalError, Retriever};
pub use unixfs::{
    classify, decode_data, decode_node, directory_links, file_size, Classified, DirLink,
    NodeError, NodeType, PbLink, PbNode, UnixFsData, UnsupportedKind,
};

// Re-export Cid for external use
pub use cid::Cid;
