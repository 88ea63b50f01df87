// Raft network layer over plain TCP
// RPCs travel as length-prefixed JSON frames over pooled connections

use std::io;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use openraft::error::{
    InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest,
    InstallSnapshotResponse, VoteRequest, VoteResponse,
};
use openraft::BasicNode;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::types::{NodeId, TypeConfig};

/// Upper bound of a single frame body
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// RPC sent from one participant to another
#[derive(Debug, Serialize, Deserialize)]
pub enum RaftRpcRequest {
    AppendEntries(AppendEntriesRequest<TypeConfig>),
    Vote(VoteRequest<NodeId>),
    InstallSnapshot(InstallSnapshotRequest<TypeConfig>),
}

/// Reply carrying the remote engine's result
#[derive(Debug, Serialize, Deserialize)]
pub enum RaftRpcResponse {
    AppendEntries(Result<AppendEntriesResponse<NodeId>, RaftError<NodeId>>),
    Vote(Result<VoteResponse<NodeId>, RaftError<NodeId>>),
    InstallSnapshot(
        Result<InstallSnapshotResponse<NodeId>, RaftError<NodeId, InstallSnapshotError>>,
    ),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("reply does not match the request")]
    UnexpectedResponse,
}

/// Write one frame: a 4-byte big-endian length followed by the JSON body
pub(crate) async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(body.len()));
    }

    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame written by [`write_frame`]
pub(crate) async fn read_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

fn rpc_error<E: std::error::Error>(err: TransportError) -> RPCError<NodeId, BasicNode, E> {
    if matches!(err, TransportError::Connect { .. }) {
        RPCError::Unreachable(Unreachable::new(&err))
    } else {
        RPCError::Network(NetworkError::new(&err))
    }
}

/// Idle connections to one remote participant
///
/// At most `max_pool` streams are kept; a stream that failed mid-call is
/// dropped instead of being returned.
pub struct ConnectionPool {
    addr: String,
    max_pool: usize,
    timeout: Duration,
    idle: Mutex<Vec<TcpStream>>,
}

impl ConnectionPool {
    pub fn new(addr: impl Into<String>, max_pool: usize, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            max_pool,
            timeout,
            idle: Mutex::new(Vec::new()),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    async fn checkout(&self) -> Result<TcpStream, TransportError> {
        if let Some(stream) = self.idle.lock().pop() {
            return Ok(stream);
        }

        debug!(addr = %self.addr, "Opening Raft connection");
        let connect = TcpStream::connect(self.addr.as_str());
        let stream = match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    addr: self.addr.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(TransportError::Connect {
                    addr: self.addr.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                });
            }
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn release(&self, stream: TcpStream) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_pool {
            idle.push(stream);
        }
    }

    pub(crate) async fn call(
        &self,
        request: &RaftRpcRequest,
    ) -> Result<RaftRpcResponse, TransportError> {
        let mut stream = self.checkout().await?;

        let exchange = async {
            write_frame(&mut stream, request).await?;
            read_frame::<_, RaftRpcResponse>(&mut stream).await
        };

        let result = tokio::time::timeout(self.timeout, exchange).await;
        match result {
            Ok(Ok(response)) => {
                self.release(stream);
                Ok(response)
            }
            Ok(Err(e)) => {
                warn!(addr = %self.addr, error = %e, "Raft RPC failed");
                Err(e)
            }
            Err(_) => Err(TransportError::Timeout(self.timeout)),
        }
    }
}

/// Creates connections that share one pool per remote address
#[derive(Clone)]
pub struct TcpNetworkFactory {
    pools: Arc<DashMap<String, Arc<ConnectionPool>>>,
    max_pool: usize,
    timeout: Duration,
}

impl TcpNetworkFactory {
    pub fn new(max_pool: usize, timeout: Duration) -> Self {
        Self {
            pools: Arc::new(DashMap::new()),
            max_pool,
            timeout,
        }
    }

    pub fn pool(&self, addr: &str) -> Arc<ConnectionPool> {
        self.pools
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(ConnectionPool::new(addr, self.max_pool, self.timeout)))
            .clone()
    }
}

impl RaftNetworkFactory<TypeConfig> for TcpNetworkFactory {
    type Network = TcpNetworkConnection;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        TcpNetworkConnection {
            target,
            pool: self.pool(&node.addr),
        }
    }
}

/// Connection to a single remote participant
pub struct TcpNetworkConnection {
    target: NodeId,
    pool: Arc<ConnectionPool>,
}

impl RaftNetwork<TypeConfig> for TcpNetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let response = self
            .pool
            .call(&RaftRpcRequest::AppendEntries(rpc))
            .await
            .map_err(rpc_error)?;

        match response {
            RaftRpcResponse::AppendEntries(result) => {
                result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
            }
            _ => Err(rpc_error(TransportError::UnexpectedResponse)),
        }
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        let response = self
            .pool
            .call(&RaftRpcRequest::InstallSnapshot(rpc))
            .await
            .map_err(rpc_error)?;

        match response {
            RaftRpcResponse::InstallSnapshot(result) => {
                result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
            }
            _ => Err(rpc_error(TransportError::UnexpectedResponse)),
        }
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let response = self
            .pool
            .call(&RaftRpcRequest::Vote(rpc))
            .await
            .map_err(rpc_error)?;

        match response {
            RaftRpcResponse::Vote(result) => {
                result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
            }
            _ => Err(rpc_error(TransportError::UnexpectedResponse)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use openraft::Vote;
    use tokio::net::TcpListener;

    fn vote_request() -> RaftRpcRequest {
        RaftRpcRequest::Vote(VoteRequest {
            vote: Vote::new(2, 7),
            last_log_id: None,
        })
    }

    /// Answers every vote with a grant and counts accepted connections
    async fn granting_peer() -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = accepted.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(async move {
                    while let Ok(request) = read_frame::<_, RaftRpcRequest>(&mut stream).await {
                        let RaftRpcRequest::Vote(req) = request else {
                            return;
                        };
                        let response = RaftRpcResponse::Vote(Ok(VoteResponse {
                            vote: req.vote,
                            vote_granted: true,
                            last_log_id: None,
                        }));
                        if write_frame(&mut stream, &response).await.is_err() {
                            return;
                        }
                    }
                });
            }
        });

        (addr, accepted)
    }

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &vote_request()).await.unwrap();
        let received: RaftRpcRequest = read_frame(&mut server).await.unwrap();

        match received {
            RaftRpcRequest::Vote(req) => assert_eq!(req.vote, Vote::new(2, 7)),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client
            .write_u32((MAX_FRAME_SIZE + 1) as u32)
            .await
            .unwrap();

        let result = read_frame::<_, RaftRpcRequest>(&mut server).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_pool_reuses_connection() {
        let (addr, accepted) = granting_peer().await;
        let pool = ConnectionPool::new(addr, 3, Duration::from_secs(5));

        for _ in 0..3 {
            let response = pool.call(&vote_request()).await.unwrap();
            assert!(matches!(response, RaftRpcResponse::Vote(Ok(ref r)) if r.vote_granted));
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_pool_respects_max_idle() {
        let (addr, _accepted) = granting_peer().await;
        let pool = ConnectionPool::new(addr, 1, Duration::from_secs(5));

        let first = pool.checkout().await.unwrap();
        let second = pool.checkout().await.unwrap();
        pool.release(first);
        pool.release(second);

        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut factory = TcpNetworkFactory::new(3, Duration::from_secs(2));
        let mut conn = factory.new_client(9, &BasicNode::new(&addr)).await;

        let result = conn
            .vote(
                VoteRequest {
                    vote: Vote::new(1, 1),
                    last_log_id: None,
                },
                RPCOption::new(Duration::from_secs(1)),
            )
            .await;
        assert!(matches!(result, Err(RPCError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_factory_shares_pool_per_address() {
        let factory = TcpNetworkFactory::new(3, Duration::from_secs(1));

        let a = factory.pool("10.0.0.1:11291");
        let b = factory.pool("10.0.0.1:11291");
        let c = factory.pool("10.0.0.2:11291");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.addr(), "10.0.0.2:11291");
    }
}
