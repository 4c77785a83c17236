//! UDP transport for the DHT wire protocol: datagram send/receive plus
//! request/response correlation by `msg_id`.
//!
//! Mirrors the teacher's session socket plumbing (`summitd::session`) in
//! shape — a `DashMap` keyed by an id, `tokio::sync::oneshot` channels
//! resolved from a receive loop — but carries plain JSON datagrams rather
//! than an encrypted session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use meshcas_core::ids::NodeId;
use meshcas_core::wire::{DhtMessage, WireError, MAX_DATAGRAM_BYTES};
use tokio::net::UdpSocket;
use tokio::sync::oneshot;

/// UDP socket plus the pending-request correlation table described in
/// spec 4.5: the sender allocates a `msg_id`, registers a future under
/// it, and the receive loop resolves it when a matching response
/// arrives. Entries that time out are simply dropped by the caller.
pub struct UdpTransport {
    socket: UdpSocket,
    local_id: NodeId,
    counter: AtomicU64,
    pending: DashMap<String, oneshot::Sender<DhtMessage>>,
}

impl UdpTransport {
    pub async fn bind(bind_addr: &str, local_id: NodeId) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await?;
        Ok(Self {
            socket,
            local_id,
            counter: AtomicU64::new(0),
            pending: DashMap::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// `shortid(local_id) + "-" + monotonic_counter + "-" + random_nonce`.
    pub fn next_msg_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let nonce: u32 = rand::random();
        format!("{}-{}-{:08x}", self.local_id.short(), n, nonce)
    }

    /// Encode and send one datagram. Oversized messages are rejected
    /// before they hit the socket (spec: dropped, logged as an error).
    pub async fn send(&self, addr: SocketAddr, msg: &DhtMessage) -> Result<(), WireError> {
        let bytes = msg.encode()?;
        if let Err(e) = self.socket.send_to(&bytes, addr).await {
            tracing::warn!(%addr, error = %e, "udp send failed");
        }
        Ok(())
    }

    /// Block until one datagram arrives, or return a decode error for a
    /// caller to log-and-drop. Oversized reads truncate at the socket
    /// layer already, so nothing larger than one datagram is ever
    /// buffered here.
    pub async fn recv(&self) -> std::io::Result<(DhtMessage, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            match DhtMessage::decode(&buf[..n]) {
                Ok(msg) => return Ok((msg, from)),
                Err(e) => {
                    tracing::warn!(%from, error = %e, "dropping malformed dht datagram");
                    continue;
                }
            }
        }
    }

    pub fn register_pending(&self, msg_id: String) -> oneshot::Receiver<DhtMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(msg_id, tx);
        rx
    }

    pub fn resolve_pending(&self, msg_id: &str, msg: DhtMessage) {
        if let Some((_, tx)) = self.pending.remove(msg_id) {
            let _ = tx.send(msg);
        }
    }

    pub fn cancel_pending(&self, msg_id: &str) {
        self.pending.remove(msg_id);
    }
}
