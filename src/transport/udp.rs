//! UDP transport for DNS datagrams.
//!
//! One socket serves clients and forwarders alike: client queries and
//! upstream replies both arrive here, and the resolver tells them apart by
//! the QR bit. Every datagram is handled on its own task so a slow decision
//! never holds up the receive loop.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future::join_all;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::resolver::{Outbound, Resolver};

use super::MAX_DNS_PACKET_SIZE;

/// UDP transport for the forwarder.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the receive loop. It runs until the returned task is aborted.
    pub fn start(self, resolver: Arc<Resolver>) -> JoinHandle<()> {
        tokio::spawn(run(self.socket, resolver))
    }
}

async fn run(socket: Arc<UdpSocket>, resolver: Arc<Resolver>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("UDP recv error: {}", e);
                continue;
            }
        };

        let packet = buf[..len].to_vec();
        let socket = socket.clone();
        let resolver = resolver.clone();
        tokio::spawn(async move {
            if let Some(out) = resolver.handle(&packet, src) {
                tokio::spawn(send_all(socket, out));
            }
        });
    }
}

/// Send one datagram to every destination concurrently.
async fn send_all(socket: Arc<UdpSocket>, out: Outbound) {
    let results = join_all(out.to.iter().map(|to| socket.send_to(&out.bytes, *to))).await;

    for (result, to) in results.into_iter().zip(&out.to) {
        if let Err(e) = result {
            tracing::warn!("UDP send to {} failed: {}", to, e);
        }
    }
}
