//! Shared test infrastructure for loopback forwarding tests.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use gatedns::Config;
use gatedns::dns::{CLASS_IN, Header, Message, Question};
use gatedns::record::{RecordRequest, ResourceRecord};

pub const TIMEOUT: Duration = Duration::from_secs(2);

// --- MockUpstream ---

/// A resolver on loopback that answers every A query with one fixed address.
///
/// Every datagram it receives is kept for inspection.
pub struct MockUpstream {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl MockUpstream {
    pub async fn start(answer: Ipv4Addr, ttl: u32) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = received.clone();

        let task = tokio::spawn(async move {
            let mut buf = [0u8; 512];
            loop {
                let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                    continue;
                };
                seen.lock().unwrap().push(buf[..len].to_vec());

                let Ok(msg) = Message::parse(&buf[..len]) else {
                    continue;
                };
                let name = msg.questions[0].name.clone();
                let reply = msg
                    .into_reply(vec![a_record(&name, &answer.to_string(), ttl)])
                    .encode()
                    .unwrap();
                let _ = socket.send_to(&reply, src).await;
            }
        });

        Self {
            addr,
            received,
            task,
        }
    }

    pub fn received(&self) -> Vec<Vec<u8>> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for MockUpstream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// --- Message helpers ---

pub fn a_record(name: &str, ip: &str, ttl: u32) -> ResourceRecord {
    RecordRequest {
        host: name.to_string(),
        ttl,
        record_type: "A".to_string(),
        data: ip.to_string(),
        ..Default::default()
    }
    .build()
    .unwrap()
}

pub fn query(id: u16, name: &str, qtype: u16) -> Vec<u8> {
    Message {
        header: Header {
            id,
            flags: 0x0100,
            qdcount: 1,
            ..Default::default()
        },
        questions: vec![Question {
            name: name.to_string(),
            qtype,
            qclass: CLASS_IN,
        }],
        answers: Vec::new(),
    }
    .encode()
    .unwrap()
}

/// Send `packet` to `server` and wait for the reply.
pub async fn exchange(client: &UdpSocket, server: SocketAddr, packet: &[u8]) -> Message {
    client.send_to(packet, server).await.unwrap();

    let mut buf = [0u8; 512];
    let (len, _) = tokio::time::timeout(TIMEOUT, client.recv_from(&mut buf))
        .await
        .expect("no reply within timeout")
        .unwrap();
    Message::parse(&buf[..len]).unwrap()
}

/// Loopback config with an ephemeral port and state under `dir`.
pub fn config(dir: &Path, upstream: SocketAddr) -> Config {
    Config {
        bind: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        forwarders: vec![upstream.to_string()],
        rw_dir: dir.join("rw"),
        ..Default::default()
    }
}

/// Poll `check` until it holds or the timeout passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
