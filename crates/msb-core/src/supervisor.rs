//! Scheduler and lifecycle supervisor.
//!
//! Owns the periodic job table (ingest, dispatch, reconcile) and the single
//! channel client. Jobs run off a one-second tick; the job table sits behind
//! an async mutex so a settings change replaces it atomically, waiting for
//! any in-flight job to finish first.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    dispatch::Dispatcher,
    ingest::IngestEngine,
    ports::{ChannelCredentials, ChannelFactory, ChannelPort, SourcePort},
    reconcile::Reconciler,
    settings::Settings,
    store::SyncStore,
};

/// Source polling is rate-limited hard: the site throttles aggressive
/// scrapers, so ingestion never runs more often than this.
pub const INGEST_MIN_SECS: u64 = 110;
/// Channel-facing jobs (dispatch, reconcile) can run much tighter.
pub const CHANNEL_MIN_SECS: u64 = 5;
pub const INTERVAL_MAX_SECS: u64 = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    Ingest,
    Dispatch,
    Reconcile,
}

pub fn clamp_interval(kind: JobKind, secs: u64) -> Duration {
    let min = match kind {
        JobKind::Ingest => INGEST_MIN_SECS,
        JobKind::Dispatch | JobKind::Reconcile => CHANNEL_MIN_SECS,
    };
    Duration::from_secs(secs.clamp(min, INTERVAL_MAX_SECS))
}

struct Job {
    kind: JobKind,
    interval: Duration,
    next_due: Instant,
}

#[derive(Default)]
struct ChannelState {
    client: Option<Arc<dyn ChannelPort>>,
    creds: Option<ChannelCredentials>,
    /// Set only after a successful connectivity check. Dispatch and
    /// reconcile skip their ticks while this is false; ingest is unaffected.
    ready: bool,
}

pub struct Supervisor {
    ingest: IngestEngine,
    dispatcher: Dispatcher,
    reconciler: Reconciler,
    factory: Arc<dyn ChannelFactory>,
    jobs: Mutex<Vec<Job>>,
    channel: Mutex<ChannelState>,
    release_timeout: Duration,
    verify_timeout: Duration,
    cancel: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        store: Arc<SyncStore>,
        source: Arc<dyn SourcePort>,
        factory: Arc<dyn ChannelFactory>,
        release_timeout: Duration,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            ingest: IngestEngine::new(store.clone(), source.clone()),
            dispatcher: Dispatcher::new(store.clone()),
            reconciler: Reconciler::new(store, source),
            factory,
            jobs: Mutex::new(Vec::new()),
            channel: Mutex::new(ChannelState::default()),
            release_timeout,
            verify_timeout,
            cancel: CancellationToken::new(),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Apply a settings snapshot: rebuild the job table and, when the
    /// channel credentials changed, swap the channel client.
    pub async fn apply_settings(&self, settings: &Settings) {
        {
            let mut jobs = self.jobs.lock().await;
            let now = Instant::now();
            *jobs = vec![
                Job {
                    kind: JobKind::Ingest,
                    interval: clamp_interval(JobKind::Ingest, settings.intervals.ingest_secs),
                    next_due: now,
                },
                Job {
                    kind: JobKind::Dispatch,
                    interval: clamp_interval(JobKind::Dispatch, settings.intervals.dispatch_secs),
                    next_due: now,
                },
                Job {
                    kind: JobKind::Reconcile,
                    interval: clamp_interval(
                        JobKind::Reconcile,
                        settings.intervals.reconcile_secs,
                    ),
                    next_due: now,
                },
            ];
        }

        if settings.channel.bot_token.is_empty() {
            self.release_channel().await;
            return;
        }
        let creds = ChannelCredentials {
            token: settings.channel.bot_token.clone(),
            destination: settings.channel.chat_id,
        };
        self.reinit_channel(creds).await;
    }

    /// Current channel client and destination, only while verified.
    pub async fn channel_handle(&self) -> Option<(Arc<dyn ChannelPort>, i64)> {
        let state = self.channel.lock().await;
        if !state.ready {
            return None;
        }
        let client = state.client.clone()?;
        let destination = state.creds.as_ref()?.destination;
        Some((client, destination))
    }

    /// Spawn the one-second tick loop.
    pub fn start(self: Arc<Self>) {
        let sup = self.clone();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => sup.tick().await,
                }
            }
            tracing::info!("[supervisor] tick loop stopped");
        });
        *self.worker.lock().expect("worker handle lock") = Some(handle);
    }

    /// Stop the tick loop and release the channel client.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.worker.lock().expect("worker handle lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.release_channel().await;
    }

    /// Run every due job. The jobs lock is held across execution so a
    /// concurrent `apply_settings` waits for the running job.
    pub async fn tick(&self) {
        let mut jobs = self.jobs.lock().await;
        let now = Instant::now();
        for i in 0..jobs.len() {
            if jobs[i].next_due > now {
                continue;
            }
            jobs[i].next_due = now + jobs[i].interval;
            self.run_job(jobs[i].kind).await;
        }
    }

    async fn run_job(&self, kind: JobKind) {
        match kind {
            JobKind::Ingest => {
                let inserted = self.ingest.ingest_all().await;
                if inserted > 0 {
                    tracing::debug!("[supervisor] ingest tick inserted {inserted} message(s)");
                }
            }
            JobKind::Dispatch => {
                let Some((channel, destination)) = self.channel_handle().await else {
                    tracing::debug!("[supervisor] dispatch skipped, channel not ready");
                    return;
                };
                self.dispatcher.dispatch_all(&channel, destination).await;
            }
            JobKind::Reconcile => {
                let Some((channel, _)) = self.channel_handle().await else {
                    tracing::debug!("[supervisor] reconcile skipped, channel not ready");
                    return;
                };
                if let Err(e) = self.reconciler.run_once(&channel).await {
                    tracing::error!("[supervisor] reconcile tick failed: {e}");
                }
            }
        }
    }

    /// Swap in a client for `creds`. A no-op when the same credentials are
    /// already live and verified. The previous client gets a bounded window
    /// to release its polling resource before the successor is built.
    async fn reinit_channel(&self, creds: ChannelCredentials) {
        let mut state = self.channel.lock().await;
        if state.ready && state.creds.as_ref() == Some(&creds) {
            return;
        }

        if let Some(old) = state.client.take() {
            state.ready = false;
            if tokio::time::timeout(self.release_timeout, old.shutdown())
                .await
                .is_err()
            {
                tracing::warn!("[supervisor] previous channel client did not release in time");
            }
        }

        let client = self.factory.build(&creds);
        let verified = match tokio::time::timeout(self.verify_timeout, client.verify()).await {
            Ok(Ok(true)) => true,
            Ok(Ok(false)) => {
                tracing::warn!("[supervisor] channel verification failed, dispatch degraded");
                false
            }
            Ok(Err(e)) => {
                tracing::warn!("[supervisor] channel verification errored: {e}");
                false
            }
            Err(_) => {
                tracing::warn!("[supervisor] channel verification timed out");
                false
            }
        };
        if verified {
            if let Err(e) = client.register_reply_listener(creds.destination).await {
                tracing::warn!("[supervisor] reply listener registration failed: {e}");
            }
        }

        state.client = Some(client);
        state.creds = Some(creds);
        state.ready = verified;
    }

    async fn release_channel(&self) {
        let mut state = self.channel.lock().await;
        state.ready = false;
        state.creds = None;
        if let Some(client) = state.client.take() {
            let _ = tokio::time::timeout(self.release_timeout, client.shutdown()).await;
        }
    }
}
