// TCP transport for the Raft engine
// Binds the cluster endpoint, serves inbound RPCs and hands out outbound connections

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::network::{RaftRpcRequest, RaftRpcResponse, TcpNetworkFactory, read_frame, write_frame};
use super::types::Raft;
use crate::error::ClusterError;

/// Bound cluster endpoint
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_pool: usize,
    timeout: Duration,
}

impl TcpTransport {
    /// Bind `endpoint` (`host:port`); port 0 picks a free port
    pub async fn bind(
        endpoint: &str,
        max_pool: usize,
        timeout: Duration,
    ) -> Result<Self, ClusterError> {
        let transport_error = |source| ClusterError::TransportInit {
            addr: endpoint.to_string(),
            source,
        };

        let listener = TcpListener::bind(endpoint).await.map_err(transport_error)?;
        let local_addr = listener.local_addr().map_err(transport_error)?;

        info!(addr = %local_addr, "Raft transport listening");
        Ok(Self {
            listener,
            local_addr,
            max_pool,
            timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Outbound side, sharing this transport's pool settings
    pub fn network_factory(&self) -> TcpNetworkFactory {
        TcpNetworkFactory::new(self.max_pool, self.timeout)
    }

    /// Serve inbound RPCs until the task is aborted
    pub fn serve(self, raft: Raft) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "Accepted Raft connection");
                        let raft = raft.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, raft).await;
                            debug!(peer = %peer, "Raft connection closed");
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept Raft connection");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        })
    }
}

async fn serve_connection(mut stream: TcpStream, raft: Raft) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    loop {
        let request = match read_frame::<_, RaftRpcRequest>(&mut stream).await {
            Ok(request) => request,
            Err(e) => {
                debug!(error = %e, "Stopped reading Raft frames");
                return;
            }
        };

        let response = dispatch(&raft, request).await;
        if let Err(e) = write_frame(&mut stream, &response).await {
            debug!(error = %e, "Failed to write Raft reply");
            return;
        }
    }
}

async fn dispatch(raft: &Raft, request: RaftRpcRequest) -> RaftRpcResponse {
    match request {
        RaftRpcRequest::AppendEntries(req) => {
            RaftRpcResponse::AppendEntries(raft.append_entries(req).await)
        }
        RaftRpcRequest::Vote(req) => RaftRpcResponse::Vote(raft.vote(req).await),
        RaftRpcRequest::InstallSnapshot(req) => {
            RaftRpcResponse::InstallSnapshot(raft.install_snapshot(req).await)
        }
    }
}
