//! Side-effect hooks fired when a resolved name passes the whitelist.
//!
//! Hooks never sit on the reply path: the resolver queues a [`HookJob`] and a
//! single worker awaits the matching action under the configured timeout.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::process::Command;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::config::{CommandConfig, HooksConfig};
use crate::error::HookError;
use crate::record::{RData, RecordType, ResourceRecord};

/// An external action taking the rendered answer values.
///
/// Dropping the returned future abandons the call.
pub trait HookAction: Send + Sync {
    fn call(self: Arc<Self>, values: Vec<String>) -> BoxFuture<'static, Result<(), HookError>>;
}

/// Plain closures run on the blocking pool. A closure that outlives the
/// timeout keeps its thread until it returns.
impl<F> HookAction for F
where
    F: Fn(&[String]) -> Result<(), HookError> + Send + Sync + 'static,
{
    fn call(self: Arc<Self>, values: Vec<String>) -> BoxFuture<'static, Result<(), HookError>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || (*self)(&values))
                .await
                .map_err(|e| HookError::Failed(format!("hook task failed: {}", e)))?
        })
    }
}

/// Which configured action a query type maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    A,
    Aaaa,
    Ptr,
}

impl HookKind {
    pub fn for_qtype(qtype: u16) -> Option<Self> {
        match RecordType::from(qtype) {
            RecordType::A => Some(HookKind::A),
            RecordType::Aaaa => Some(HookKind::Aaaa),
            RecordType::Ptr => Some(HookKind::Ptr),
            _ => None,
        }
    }

    /// Render every answer of this kind, in answer order.
    pub fn collect(self, answers: &[ResourceRecord]) -> Vec<String> {
        answers
            .iter()
            .filter_map(|rr| match (self, &rr.data) {
                (HookKind::A, RData::A(ip)) => Some(ip.to_string()),
                (HookKind::Aaaa, RData::Aaaa(ip)) => Some(ip.to_string()),
                (HookKind::Ptr, RData::Ptr(target)) => Some(target.clone()),
                _ => None,
            })
            .collect()
    }
}

/// The configured actions, one per hook kind.
#[derive(Clone, Default)]
pub struct Hooks {
    pub a: Option<Arc<dyn HookAction>>,
    pub aaaa: Option<Arc<dyn HookAction>>,
    pub ptr: Option<Arc<dyn HookAction>>,
}

impl Hooks {
    /// Build command hooks for every configured program.
    pub fn from_config(config: &HooksConfig) -> Self {
        let command = |c: &Option<CommandConfig>| {
            c.as_ref()
                .map(|c| Arc::new(CommandHook::from(c)) as Arc<dyn HookAction>)
        };

        Self {
            a: command(&config.a),
            aaaa: command(&config.aaaa),
            ptr: command(&config.ptr),
        }
    }

    pub fn get(&self, kind: HookKind) -> Option<&Arc<dyn HookAction>> {
        match kind {
            HookKind::A => self.a.as_ref(),
            HookKind::Aaaa => self.aaaa.as_ref(),
            HookKind::Ptr => self.ptr.as_ref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.a.is_none() && self.aaaa.is_none() && self.ptr.is_none()
    }
}

/// One queued hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookJob {
    pub kind: HookKind,
    /// The query name that passed the filter.
    pub name: String,
    pub values: Vec<String>,
}

/// Handle used by the resolver to queue hook jobs.
#[derive(Clone)]
pub struct HookDispatcher {
    tx: mpsc::Sender<HookJob>,
}

impl HookDispatcher {
    /// Start the worker. Each action call is abandoned after `timeout`.
    pub fn spawn(hooks: Hooks, capacity: usize, timeout: Duration) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(run_worker(hooks, rx, timeout));

        (Self { tx }, handle)
    }

    /// Queue a job without waiting. Returns false if it was dropped.
    pub fn dispatch(&self, job: HookJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                tracing::warn!("hook queue full, dropping {:?} hook for {}", job.kind, job.name);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

async fn run_worker(hooks: Hooks, mut rx: mpsc::Receiver<HookJob>, timeout: Duration) {
    while let Some(job) = rx.recv().await {
        let Some(action) = hooks.get(job.kind).cloned() else {
            continue;
        };
        if job.values.is_empty() {
            continue;
        }

        // A timed-out call is dropped here, which kills a command hook's child
        let call = action.call(job.values.clone());
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(())) => {
                tracing::debug!(name = %job.name, values = ?job.values, "{:?} hook completed", job.kind)
            }
            Ok(Err(e)) => tracing::warn!("{:?} hook for {} failed: {}", job.kind, job.name, e),
            Err(_) => tracing::warn!(
                "{:?} hook for {}: {}",
                job.kind,
                job.name,
                HookError::Timeout(timeout)
            ),
        }
    }
}

/// Runs a program with the hook values appended to its arguments.
///
/// The child is killed if the call is dropped before it exits.
#[derive(Debug, Clone)]
pub struct CommandHook {
    program: String,
    args: Vec<String>,
}

impl CommandHook {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub async fn run(&self, values: &[String]) -> Result<(), HookError> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .args(values)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;
        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HookError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

impl From<&CommandConfig> for CommandHook {
    fn from(config: &CommandConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }
}

impl HookAction for CommandHook {
    fn call(self: Arc<Self>, values: Vec<String>) -> BoxFuture<'static, Result<(), HookError>> {
        Box::pin(async move { self.run(&values).await })
    }
}
