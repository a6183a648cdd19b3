//! Transport layer for the forwarder.
//!
//! Receives DNS datagrams from clients and forwarders and sends whatever the
//! resolver decides on.

pub mod udp;

use std::net::SocketAddr;

use crate::record::RecordType;

/// Largest datagram accepted or produced over UDP.
pub const MAX_DNS_PACKET_SIZE: usize = crate::dns::MAX_UDP_PAYLOAD;

/// Logger for DNS query events.
///
/// Events go to three tracing targets so they can be filtered separately:
/// `gatedns` for the query path, `gatedns::allow` for names that passed the
/// whitelist and `gatedns::deny` for resolved names that did not.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryLogger;

impl QueryLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn cached(&self, name: &str, qtype: u16, client: SocketAddr, answers: usize) {
        tracing::debug!(
            target: "gatedns",
            %client,
            answers,
            "{} {} CACHED",
            name,
            RecordType::from(qtype)
        );
    }

    pub fn forwarded(&self, name: &str, qtype: u16, client: SocketAddr, forwarders: usize) {
        tracing::debug!(
            target: "gatedns",
            %client,
            forwarders,
            "{} {} FORWARDED",
            name,
            RecordType::from(qtype)
        );
    }

    pub fn relayed(&self, name: &str, qtype: u16, from: SocketAddr, waiters: usize) {
        tracing::debug!(
            target: "gatedns",
            %from,
            waiters,
            "{} {} RELAYED",
            name,
            RecordType::from(qtype)
        );
    }

    pub fn late(&self, id: u16, from: SocketAddr) {
        tracing::trace!(target: "gatedns", id, %from, "no client waiting, reply dropped");
    }

    pub fn allowed(&self, name: &str, qtype: u16, values: &[String]) {
        tracing::debug!(
            target: "gatedns::allow",
            "{} {} hook values={:?}",
            name,
            RecordType::from(qtype),
            values
        );
    }

    pub fn bypassed(&self, name: &str, qtype: u16, values: &[String]) {
        tracing::debug!(
            target: "gatedns::deny",
            "{} {} answer={:?}",
            name,
            RecordType::from(qtype),
            values
        );
    }
}
