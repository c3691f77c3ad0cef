//! Single-gateway HTTP transport for trustless retrieval
//!
//! Wraps one gateway endpoint and classifies every HTTP outcome into the
//! closed transport taxonomy the pool's retry state machine consumes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

/// Response header carrying the proof chain's root CIDs
pub const X_IPFS_ROOTS: &str = "x-ipfs-roots";

/// DAG scope of a trustless CAR request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DagScope {
    /// Only the blocks needed to resolve the path
    Block,
    /// The full DAG under the terminal block
    All,
}

impl DagScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DagScope::Block => "block",
            DagScope::All => "all",
        }
    }
}

/// How CID paths are mapped onto gateway URLs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResolutionStrategy {
    /// `{gateway}/ipfs/{path}`
    #[default]
    Path,
    /// `{cid}.ipfs.{gateway}`, recognized but not implemented
    Subdomain,
}

/// Transport outcome of one gateway attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// 404/400: the object does not exist. Terminal, never retried.
    #[error("object not found")]
    NotFound,

    /// 429: retryable after backing off
    #[error("rate limited by gateway")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-2xx status: retryable after backing off
    #[error("gateway returned HTTP {0}")]
    Status(u16),

    /// Per-attempt timeout: retryable after backing off
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure: the gateway is marked broken
    #[error("connection failed: {0}")]
    Connect(String),

    /// Terminal: no gateway can serve this request shape
    #[error("{0} is not supported")]
    Unsupported(String),
}

/// A CAR-scoped gateway response
#[derive(Debug, Clone)]
pub struct CarResponse {
    /// CIDs advertised by `X-Ipfs-Roots`, outermost first; only the
    /// cardinality is trusted
    pub roots: Vec<String>,
    pub body: Bytes,
}

/// One gateway endpoint capable of trustless fetches
///
/// The pool drives implementations of this trait; tests substitute mock
/// gateways through the same seam.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Endpoint label used in logs and state reports
    fn url(&self) -> &str;

    /// Fetch a CAR-scoped proof for a CID path
    async fn fetch_car(&self, path: &str, scope: DagScope) -> Result<CarResponse, FetchError>;

    /// Fetch a single block's raw bytes for a CID path
    async fn fetch_block(&self, path: &str) -> Result<Bytes, FetchError>;
}

/// HTTP gateway speaking the trustless gateway protocol
pub struct HttpGateway {
    url: String,
    strategy: ResolutionStrategy,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(
        url: impl Into<String>,
        client: reqwest::Client,
        strategy: ResolutionStrategy,
    ) -> Self {
        let url = url.into();
        Self {
            url: url.trim_end_matches('/').to_string(),
            strategy,
            client,
        }
    }

    fn endpoint(&self, path: &str) -> Result<String, FetchError> {
        match self.strategy {
            ResolutionStrategy::Path => Ok(format!("{}/ipfs/{}", self.url, path)),
            ResolutionStrategy::Subdomain => Err(FetchError::Unsupported(
                "subdomain gateway resolution".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_car(&self, path: &str, scope: DagScope) -> Result<CarResponse, FetchError> {
        let endpoint = self.endpoint(path)?;
        debug!(gateway = %self.url, path, scope = scope.as_str(), "fetching CAR");
        let res = self
            .client
            .get(&endpoint)
            .query(&[("format", "car"), ("dag-scope", scope.as_str())])
            .header(reqwest::header::ACCEPT, "application/vnd.ipld.car")
            .send()
            .await
            .map_err(classify_transport)?;
        if let Some(err) = classify_status(&res) {
            return Err(err);
        }

        let roots = res
            .headers()
            .get(X_IPFS_ROOTS)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let body = res.bytes().await.map_err(classify_transport)?;
        Ok(CarResponse { roots, body })
    }

    async fn fetch_block(&self, path: &str) -> Result<Bytes, FetchError> {
        let endpoint = self.endpoint(path)?;
        debug!(gateway = %self.url, path, "fetching raw block");
        let res = self
            .client
            .get(&endpoint)
            .query(&[("format", "raw")])
            .header(reqwest::header::ACCEPT, "application/vnd.ipld.raw")
            .send()
            .await
            .map_err(classify_transport)?;
        if let Some(err) = classify_status(&res) {
            return Err(err);
        }
        res.bytes().await.map_err(classify_transport)
    }
}

/// Shared status classification contract used by the pool
fn classify_status(res: &reqwest::Response) -> Option<FetchError> {
    let status = res.status();
    if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
        return Some(FetchError::NotFound);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = res
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        return Some(FetchError::RateLimited { retry_after });
    }
    if !status.is_success() {
        return Some(FetchError::Status(status.as_u16()));
    }
    None
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Connect(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_path_strategy() {
        let gw = HttpGateway::new(
            "http://127.0.0.1:8080/",
            reqwest::Client::new(),
            ResolutionStrategy::Path,
        );
        assert_eq!(gw.url(), "http://127.0.0.1:8080");
        assert_eq!(
            gw.endpoint("QmW3CrGFuFyF3VH1wvrap4Jend5NRTgtESDjuQ7QhHD5dd/default")
                .unwrap(),
            "http://127.0.0.1:8080/ipfs/QmW3CrGFuFyF3VH1wvrap4Jend5NRTgtESDjuQ7QhHD5dd/default"
        );
    }

    #[test]
    fn test_endpoint_subdomain_strategy_is_unsupported() {
        let gw = HttpGateway::new(
            "http://127.0.0.1:8080",
            reqwest::Client::new(),
            ResolutionStrategy::Subdomain,
        );
        let result = gw.endpoint("QmW3CrGFuFyF3VH1wvrap4Jend5NRTgtESDjuQ7QhHD5dd");
        assert!(matches!(result, Err(FetchError::Unsupported(_))));
    }

    #[test]
    fn test_dag_scope_wire_values() {
        assert_eq!(DagScope::Block.as_str(), "block");
        assert_eq!(DagScope::All.as_str(), "all");
    }
}
