//! DNS query resolution logic.
//!
//! Handles the per-datagram pipeline:
//! 1. Decode and classify (query or upstream reply)
//! 2. Queries: answer from the cache, or register the client and forward
//! 3. Replies: relay to every waiting client, then learn and run hooks
//!
//! Transports handle the actual I/O, the resolver handles decisions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheKey, RecordCache};
use crate::dns::{Message, Question};
use crate::filter::DomainFilter;
use crate::hook::{HookDispatcher, HookJob, HookKind};
use crate::pending::PendingQueries;
use crate::record::ResourceRecord;
use crate::stats::Stats;
use crate::transport::QueryLogger;

/// A datagram to send, possibly to several destinations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub bytes: Vec<u8>,
    pub to: Vec<SocketAddr>,
}

/// Resolver handles DNS datagram processing decisions.
///
/// Shared by every datagram task; the cache and the pending table carry
/// their own locking.
pub struct Resolver {
    cache: Arc<RecordCache>,
    pending: PendingQueries,
    filter: Arc<DomainFilter>,
    hooks: Option<HookDispatcher>,
    forwarders: Vec<SocketAddr>,
    logger: QueryLogger,
    stats: Arc<Stats>,
}

impl Resolver {
    pub fn new(cache: Arc<RecordCache>, filter: Arc<DomainFilter>, forwarders: Vec<SocketAddr>) -> Self {
        Self {
            cache,
            pending: PendingQueries::new(),
            filter,
            hooks: None,
            forwarders: forwarders.into_iter().map(canonical_addr).collect(),
            logger: QueryLogger::new(),
            stats: Arc::new(Stats::new()),
        }
    }

    pub fn with_hooks(mut self, hooks: HookDispatcher) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn with_stats(mut self, stats: Arc<Stats>) -> Self {
        self.stats = stats;
        self
    }

    /// Process one inbound datagram and decide what, if anything, to send.
    pub fn handle(&self, packet: &[u8], src: SocketAddr) -> Option<Outbound> {
        let msg = match Message::parse(packet) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!("dropping malformed datagram from {}: {}", src, e);
                self.stats.record_dropped();
                return None;
            }
        };
        if msg.questions.is_empty() {
            tracing::debug!("dropping message without a question from {}", src);
            self.stats.record_dropped();
            return None;
        }

        if msg.is_response() {
            self.on_response(msg, packet, src)
        } else {
            self.on_query(msg, packet, src)
        }
    }

    fn on_query(&self, mut msg: Message, packet: &[u8], src: SocketAddr) -> Option<Outbound> {
        let question = msg.questions[0].clone();

        if let Some(answers) = self.cache.get(&CacheKey::from_question(&question)) {
            self.run_hooks(&question, &answers);
            // Only the first question is answered
            msg.questions.truncate(1);
            let count = answers.len();
            return match msg.into_reply(answers).encode() {
                Ok(bytes) => {
                    self.logger.cached(&question.name, question.qtype, src, count);
                    self.stats.record_cached();
                    Some(Outbound {
                        bytes,
                        to: vec![src],
                    })
                }
                Err(e) => {
                    tracing::warn!("failed to encode cached reply for {}: {}", question.name, e);
                    self.stats.record_dropped();
                    None
                }
            };
        }

        if self.forwarders.is_empty() {
            tracing::warn!("no forwarders configured, dropping query for {}", question.name);
            self.stats.record_dropped();
            return None;
        }

        self.pending.register(msg.header.id, src);
        self.logger
            .forwarded(&question.name, question.qtype, src, self.forwarders.len());
        self.stats.record_forwarded();

        Some(Outbound {
            bytes: packet.to_vec(),
            to: self.forwarders.clone(),
        })
    }

    fn on_response(&self, msg: Message, packet: &[u8], src: SocketAddr) -> Option<Outbound> {
        if !self.forwarders.contains(&canonical_addr(src)) {
            tracing::warn!("ignoring response from unexpected source {}", src);
            self.stats.record_dropped();
            return None;
        }

        let Some(waiters) = self.pending.drain(msg.header.id) else {
            self.logger.late(msg.header.id, src);
            self.stats.record_late();
            return None;
        };

        let question = &msg.questions[0];
        self.logger
            .relayed(&question.name, question.qtype, src, waiters.len());
        self.stats.record_relayed();

        self.run_hooks(question, &msg.answers);
        if !msg.answers.is_empty() {
            self.cache
                .override_with(CacheKey::from_question(question), msg.answers.clone());
        }

        Some(Outbound {
            bytes: packet.to_vec(),
            to: waiters,
        })
    }

    fn run_hooks(&self, question: &Question, answers: &[ResourceRecord]) {
        let Some(kind) = HookKind::for_qtype(question.qtype) else {
            return;
        };
        let values = kind.collect(answers);
        if values.is_empty() {
            return;
        }

        if !self.filter.allows(&question.name) {
            self.logger.bypassed(&question.name, question.qtype, &values);
            return;
        }

        self.logger.allowed(&question.name, question.qtype, &values);
        if let Some(hooks) = &self.hooks {
            let job = HookJob {
                kind,
                name: question.name.clone(),
                values,
            };
            if hooks.dispatch(job) {
                self.stats.record_hook();
            }
        }
    }

    /// Forget forwarded queries whose reply has not arrived within `max_age`.
    pub fn evict_stale_pending(&self, max_age: Duration) -> usize {
        self.pending.evict_stale(max_age)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn cache(&self) -> &Arc<RecordCache> {
        &self.cache
    }

    pub fn filter(&self) -> &Arc<DomainFilter> {
        &self.filter
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }
}

fn canonical_addr(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}
