//! Forwarder orchestration.
//!
//! Restores the cache, wires the resolver to its collaborators, binds the
//! transport and runs the background tasks until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::RecordCache;
use crate::config::Config;
use crate::error::Error;
use crate::filter::DomainFilter;
use crate::hook::{HookDispatcher, Hooks};
use crate::resolver::Resolver;
use crate::stats::Stats;
use crate::store::{self, Store};
use crate::transport::udp::UdpTransport;

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// A running forwarder.
pub struct Proxy {
    local_addr: SocketAddr,
    resolver: Arc<Resolver>,
    store: Store,
    tasks: Vec<JoinHandle<()>>,
}

impl Proxy {
    /// Load persisted state and start serving.
    ///
    /// A snapshot that exists but cannot be read is an error: starting with
    /// an empty cache would overwrite it on the first change.
    pub async fn start(config: &Config) -> Result<Self, Error> {
        config.validate()?;
        let forwarders = config.forwarder_addrs()?;

        std::fs::create_dir_all(&config.rw_dir)?;
        let store = Store::new(&config.rw_dir);
        let snapshot = store.load()?;

        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        let cache = Arc::new(RecordCache::new().with_flush_signal(flush_tx));
        if let Some(snapshot) = snapshot {
            tracing::info!("restored {} cache entries from {}", snapshot.len(), store.primary_path().display());
            cache.restore(snapshot);
        }

        let mut tasks = vec![store::spawn_flusher(
            store.clone(),
            Arc::downgrade(&cache),
            flush_rx,
        )];

        let filter = Arc::new(DomainFilter::load(
            config.whitelist_dir.clone(),
            config.blacklist_dir.clone(),
        )?);
        tracing::info!(
            "loaded {} whitelist and {} blacklist patterns",
            filter.whitelist_len(),
            filter.blacklist_len()
        );

        let stats = Arc::new(Stats::new());
        let mut resolver =
            Resolver::new(cache.clone(), filter.clone(), forwarders.clone()).with_stats(stats);
        let hooks = Hooks::from_config(&config.hooks);
        if !hooks.is_empty() {
            let (dispatcher, worker) =
                HookDispatcher::spawn(hooks, config.hooks.queue_size, config.hooks.timeout());
            resolver = resolver.with_hooks(dispatcher);
            tasks.push(worker);
        }
        let resolver = Arc::new(resolver);

        let udp = UdpTransport::bind(config.bind_addr()).await?;
        let local_addr = udp.local_addr()?;
        tasks.push(udp.start(resolver.clone()));

        tracing::info!("DNS forwarder listening on {} ({} cache entries)", local_addr, cache.len());
        let upstream_strs: Vec<_> = forwarders.iter().map(|a| a.to_string()).collect();
        tracing::info!("Forwarding to: {}", upstream_strs.join(", "));

        tasks.push(spawn_sweeper(resolver.clone(), config.pending_timeout()));
        tasks.push(spawn_stats(resolver.clone()));
        #[cfg(unix)]
        tasks.push(spawn_reload_on_signal(filter)?);

        Ok(Self {
            local_addr,
            resolver,
            store,
            tasks,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Stop every task and write a final snapshot.
    pub async fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        store::flush(&self.store, self.resolver.cache()).await;
    }
}

/// Run the forwarder until Ctrl-C.
pub async fn run(config: Config) -> Result<(), Error> {
    let proxy = Proxy::start(&config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    proxy.shutdown().await;

    Ok(())
}

fn spawn_sweeper(resolver: Arc<Resolver>, max_age: Duration) -> JoinHandle<()> {
    let period = (max_age / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await; // Skip first immediate tick
        loop {
            interval.tick().await;
            let evicted = resolver.evict_stale_pending(max_age);
            if evicted > 0 {
                tracing::debug!("evicted {} unanswered queries", evicted);
            }
        }
    })
}

fn spawn_stats(resolver: Arc<Resolver>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATS_INTERVAL);
        interval.tick().await;
        loop {
            interval.tick().await;
            let stats = resolver.stats().snapshot_and_reset();
            tracing::info!(
                "[stats] cache={} pending={} queries={} cached={} ({:.1}%) forwarded={} relayed={} late={} dropped={} hooks={}",
                resolver.cache().len(),
                resolver.pending_len(),
                stats.queries,
                stats.cached,
                stats.hit_rate(),
                stats.forwarded,
                stats.relayed,
                stats.late,
                stats.dropped,
                stats.hooks
            );
        }
    })
}

#[cfg(unix)]
fn spawn_reload_on_signal(filter: Arc<DomainFilter>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    Ok(tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            let filter = filter.clone();
            match tokio::task::spawn_blocking(move || filter.reload()).await {
                Ok(Ok((white, black))) => {
                    tracing::info!("reloaded filters: {} whitelist, {} blacklist patterns", white, black)
                }
                Ok(Err(e)) => tracing::error!("filter reload failed: {}", e),
                Err(e) => tracing::error!("filter reload task failed: {}", e),
            }
        }
    }))
}
