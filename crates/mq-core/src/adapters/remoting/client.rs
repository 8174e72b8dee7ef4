//! Multiplexed request/response client over one TCP connection.
//!
//! Each request gets a fresh `opaque`; a background reader completes the
//! matching pending request when its response arrives, so any number of
//! requests can be in flight on the same socket.

use super::acl::AclSigner;
use super::codec::RemotingCodec;
use super::protocol::RemotingCommand;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use shared_types::{MqError, MqResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

type Pending = Arc<DashMap<i32, oneshot::Sender<RemotingCommand>>>;

pub struct RemotingClient {
    addr: String,
    writer: Mutex<FramedWrite<OwnedWriteHalf, RemotingCodec>>,
    pending: Pending,
    next_opaque: AtomicI32,
    signer: Option<AclSigner>,
    closed: CancellationToken,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl RemotingClient {
    pub async fn connect(addr: &str, timeout: Duration, signer: Option<AclSigner>) -> MqResult<Arc<Self>> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| MqError::timeout(format!("connecting to {} timed out", addr)))?
            .map_err(|e| MqError::connection(format!("failed to connect to {}", addr)).with_details(e.to_string()))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr, error = %e, "Could not disable Nagle");
        }

        let (read, write) = stream.into_split();
        let pending: Pending = Arc::new(DashMap::new());
        let closed = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            addr.to_string(),
            FramedRead::new(read, RemotingCodec::new()),
            pending.clone(),
            closed.clone(),
        ));
        debug!(addr, "Remoting connection established");

        Ok(Arc::new(Self {
            addr: addr.to_string(),
            writer: Mutex::new(FramedWrite::new(write, RemotingCodec::new())),
            pending,
            next_opaque: AtomicI32::new(1),
            signer,
            closed,
            reader: parking_lot::Mutex::new(Some(reader)),
        }))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Send a request and wait for its response.
    pub async fn invoke(&self, mut request: RemotingCommand, timeout: Duration) -> MqResult<RemotingCommand> {
        if !self.is_alive() {
            return Err(MqError::connection("remoting connection is down").with_details(self.addr.clone()));
        }
        let opaque = self.next_opaque.fetch_add(1, Ordering::Relaxed);
        request.header.opaque = opaque;
        if let Some(signer) = &self.signer {
            signer.sign(&mut request)?;
        }
        let code = request.code();

        let (tx, rx) = oneshot::channel();
        self.pending.insert(opaque, tx);
        let sent = self.writer.lock().await.send(request).await;
        if let Err(e) = sent {
            self.pending.remove(&opaque);
            self.closed.cancel();
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(MqError::network("remoting connection dropped")
                .with_details(format!("{} while waiting for request {}", self.addr, code))),
            Err(_) => {
                self.pending.remove(&opaque);
                Err(MqError::timeout(format!("request {} to {} timed out", code, self.addr)))
            }
        }
    }

    pub async fn close(&self) {
        self.closed.cancel();
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Err(e) = self.writer.lock().await.close().await {
            debug!(addr = %self.addr, error = %e, "Error closing remoting connection");
        }
        self.pending.clear();
    }
}

impl Drop for RemotingClient {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn read_loop(
    addr: String,
    mut frames: FramedRead<OwnedReadHalf, RemotingCodec>,
    pending: Pending,
    closed: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(cmd)) if cmd.is_response() => match pending.remove(&cmd.opaque()) {
                Some((_, tx)) => {
                    let _ = tx.send(cmd);
                }
                None => debug!(addr = %addr, opaque = cmd.opaque(), "Response for unknown request"),
            },
            Some(Ok(cmd)) => {
                debug!(addr = %addr, code = cmd.code(), "Ignoring server-initiated request");
            }
            Some(Err(e)) => {
                warn!(addr = %addr, error = %e, "Remoting read failed");
                break;
            }
            None => {
                debug!(addr = %addr, "Remoting connection closed by peer");
                break;
            }
        }
    }
    closed.cancel();
    // Dropping the senders wakes every waiter with an error.
    pending.clear();
}

/// Connections keyed by address, reconnecting on demand.
pub struct RemotingPool {
    clients: Mutex<HashMap<String, Arc<RemotingClient>>>,
    timeout: Duration,
    signer: Option<AclSigner>,
}

impl RemotingPool {
    pub fn new(timeout: Duration, signer: Option<AclSigner>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            timeout,
            signer,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn get(&self, addr: &str) -> MqResult<Arc<RemotingClient>> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(addr) {
            if client.is_alive() {
                return Ok(client.clone());
            }
        }
        let client = RemotingClient::connect(addr, self.timeout, self.signer.clone()).await?;
        if let Some(stale) = clients.insert(addr.to_string(), client.clone()) {
            stale.close().await;
        }
        Ok(client)
    }

    pub async fn invoke(&self, addr: &str, request: RemotingCommand) -> MqResult<RemotingCommand> {
        self.get(addr).await?.invoke(request, self.timeout).await
    }

    pub async fn close_all(&self) {
        let drained: Vec<_> = self.clients.lock().await.drain().map(|(_, c)| c).collect();
        for client in drained {
            client.close().await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_util::codec::Framed;

    /// Fake peer: answers every request through `respond`, in arrival order.
    pub(crate) async fn spawn_peer<F>(respond: F) -> String
    where
        F: Fn(&RemotingCommand) -> Option<RemotingCommand> + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let respond = Arc::new(respond);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let respond = respond.clone();
                tokio::spawn(async move {
                    let mut framed = Framed::new(socket, RemotingCodec::new());
                    while let Some(Ok(request)) = framed.next().await {
                        if let Some(mut response) = respond(&request) {
                            response.header.opaque = request.opaque();
                            response.header.flag |= 1;
                            if framed.send(response).await.is_err() {
                                break;
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_concurrent_requests_correlate() {
        let addr = spawn_peer(|req| {
            let echo = req.field("n").unwrap_or("").to_string();
            Some(RemotingCommand::response(0, 0).with_field("n", echo))
        })
        .await;
        let client = RemotingClient::connect(&addr, Duration::from_secs(2), None).await.unwrap();

        let calls = (0..20).map(|n| {
            let client = client.clone();
            async move {
                let resp = client
                    .invoke(RemotingCommand::request(105).with_field("n", n), Duration::from_secs(2))
                    .await
                    .unwrap();
                assert_eq!(resp.field("n"), Some(n.to_string().as_str()));
            }
        });
        futures::future::join_all(calls).await;
        client.close().await;
        assert!(!client.is_alive());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let addr = spawn_peer(|_| None).await;
        let client = RemotingClient::connect(&addr, Duration::from_secs(2), None).await.unwrap();
        let err = client
            .invoke(RemotingCommand::request(105), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_kind(shared_types::ErrorKind::Timeout));
        assert!(client.pending.is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(RemotingClient::connect(&addr, Duration::from_secs(1), None).await.is_err());
    }

    #[tokio::test]
    async fn test_signed_requests_carry_signature() {
        let addr = spawn_peer(|req| {
            let signed = req.field("Signature").is_some() && req.field("AccessKey") == Some("ak");
            Some(RemotingCommand::response(if signed { 0 } else { 16 }, 0))
        })
        .await;
        let pool = RemotingPool::new(Duration::from_secs(2), Some(AclSigner::new("ak", "sk")));
        let resp = pool.invoke(&addr, RemotingCommand::request(106)).await.unwrap();
        assert_eq!(resp.code(), 0);

        let first = pool.get(&addr).await.unwrap();
        let second = pool.get(&addr).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        pool.close_all().await;
    }
}
