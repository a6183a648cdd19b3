//! End-to-end tests: client -> gatedns -> mock upstream over loopback UDP.

mod common;

use std::fs;
use std::net::Ipv4Addr;

use tokio::net::UdpSocket;

use gatedns::Proxy;
use gatedns::cache::CacheKey;
use gatedns::dns::{FLAG_RESPONSE, peek_id};
use gatedns::record::RData;
use gatedns::store::Store;

use common::{MockUpstream, config, eventually, exchange, query};

const ANSWER: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

#[tokio::test]
async fn miss_is_forwarded_then_served_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = MockUpstream::start(ANSWER, 300).await;
    let proxy = Proxy::start(&config(dir.path(), upstream.addr)).await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    let reply = exchange(&client, proxy.local_addr(), &query(0x4242, "example.com.", 1)).await;
    assert_eq!(reply.header.id, 0x4242);
    assert_eq!(reply.header.flags & FLAG_RESPONSE, FLAG_RESPONSE);
    assert_eq!(reply.answers.len(), 1);
    assert_eq!(reply.answers[0].data, RData::A(ANSWER));
    assert_eq!(reply.answers[0].ttl, 300);

    let forwarded = upstream.received();
    assert_eq!(forwarded.len(), 1);
    assert_eq!(peek_id(&forwarded[0]), Some(0x4242));

    let reply = exchange(&client, proxy.local_addr(), &query(0x4243, "example.com.", 1)).await;
    assert_eq!(reply.header.id, 0x4243);
    assert_eq!(reply.answers[0].data, RData::A(ANSWER));
    assert_eq!(upstream.received().len(), 1);

    proxy.shutdown().await;

    let saved = Store::new(dir.path().join("rw")).load().unwrap().unwrap();
    assert!(saved.contains_key(&CacheKey::new("example.com.", 1)));
}

#[tokio::test]
async fn malformed_datagram_does_not_stop_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = MockUpstream::start(ANSWER, 300).await;
    let proxy = Proxy::start(&config(dir.path(), upstream.addr)).await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    client
        .send_to(&[0xde, 0xad, 0xbe, 0xef], proxy.local_addr())
        .await
        .unwrap();
    let reply = exchange(&client, proxy.local_addr(), &query(7, "example.com.", 1)).await;

    assert_eq!(reply.header.id, 7);
    proxy.shutdown().await;
}

#[tokio::test]
async fn cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = MockUpstream::start(ANSWER, 300).await;
    let config = config(dir.path(), upstream.addr);

    let proxy = Proxy::start(&config).await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    exchange(&client, proxy.local_addr(), &query(1, "example.com.", 1)).await;
    proxy.shutdown().await;
    drop(upstream);

    let proxy = Proxy::start(&config).await.unwrap();
    let reply = exchange(&client, proxy.local_addr(), &query(2, "example.com.", 1)).await;

    assert_eq!(reply.header.id, 2);
    assert_eq!(reply.answers[0].data, RData::A(ANSWER));
    proxy.shutdown().await;
}

#[tokio::test]
async fn corrupt_snapshot_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let upstream = MockUpstream::start(ANSWER, 300).await;
    let config = config(dir.path(), upstream.addr);
    fs::create_dir_all(&config.rw_dir).unwrap();
    fs::write(config.rw_dir.join("store"), b"not a snapshot").unwrap();

    assert!(matches!(
        Proxy::start(&config).await,
        Err(gatedns::Error::Persistence(_))
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn whitelisted_name_runs_the_a_hook() {
    use gatedns::config::CommandConfig;

    let dir = tempfile::tempdir().unwrap();
    let whitelist = dir.path().join("whitelist");
    fs::create_dir(&whitelist).unwrap();
    fs::write(whitelist.join("vpn.list"), "# routed through the gateway\nexample\\.com\n").unwrap();
    let hook_out = dir.path().join("hook.out");

    let upstream = MockUpstream::start(ANSWER, 300).await;
    let mut config = config(dir.path(), upstream.addr);
    config.whitelist_dir = Some(whitelist);
    config.hooks.a = Some(CommandConfig {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            format!("echo \"$@\" >> '{}'", hook_out.display()),
            "hook".to_string(),
        ],
    });

    let proxy = Proxy::start(&config).await.unwrap();
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    exchange(&client, proxy.local_addr(), &query(1, "other.org.", 1)).await;
    exchange(&client, proxy.local_addr(), &query(2, "example.com.", 1)).await;

    let read_lines = || {
        fs::read_to_string(&hook_out)
            .map(|s| s.lines().map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    assert!(eventually(|| !read_lines().is_empty()).await);
    assert_eq!(read_lines(), vec!["93.184.216.34".to_string()]);

    proxy.shutdown().await;
}
