//! The sync transport: Pushing → Pulling → Merging, with backoff.
//!
//! One cycle pushes unacknowledged change-log entries to the relay, pulls
//! entries authored elsewhere, and merges them. Cursors only advance after
//! the corresponding phase fully completes, so an interrupted cycle re-runs
//! idempotently from the change log. Network I/O never happens while the
//! engine lock is held.

use crate::{
    error::Result,
    protocol::{self, PullResponse, PushRequest, PushResponse},
    ChangeEntry, DatasetId, Error, StoreAdapter, SyncEngine, Timestamp,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

/// Default per-request timeout for the HTTP relay client.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum entries per pull batch.
const DEFAULT_BATCH_LIMIT: u32 = 100;

/// Default debounce after a local mutation burst trigger.
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Non-fatal sync state surfaced to the application shell.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Retrying { attempt: u32 },
    /// Last sync failed; local operation continues, retry on next trigger
    Failed(String),
}

/// What one completed sync cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Entries acknowledged by the relay this cycle
    pub pushed: usize,
    /// Remote entries ingested and merged this cycle
    pub applied: usize,
    /// Batches discarded because decryption failed
    pub corrupt_batches: usize,
}

/// Client-side view of the relay.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn push(&self, dataset_id: DatasetId, request: PushRequest) -> Result<PushResponse>;
    async fn pull(
        &self,
        dataset_id: DatasetId,
        since: Option<Timestamp>,
        limit: u32,
    ) -> Result<PullResponse>;
}

/// Relays are routinely shared between transports (and with test harnesses).
#[async_trait]
impl<R: RelayClient + ?Sized> RelayClient for Arc<R> {
    async fn push(&self, dataset_id: DatasetId, request: PushRequest) -> Result<PushResponse> {
        (**self).push(dataset_id, request).await
    }

    async fn pull(
        &self,
        dataset_id: DatasetId,
        since: Option<Timestamp>,
        limit: u32,
    ) -> Result<PullResponse> {
        (**self).pull(dataset_id, since, limit).await
    }
}

/// HTTP relay client speaking the `/sync/{datasetId}/{push,pull}` protocol.
pub struct HttpRelay {
    base_url: String,
    http: reqwest::Client,
    bearer_token: Option<String>,
}

impl HttpRelay {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            bearer_token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn check_status(status: reqwest::StatusCode, what: &str) -> Result<()> {
    if status.is_server_error() {
        return Err(Error::RelayUnavailable(status.as_u16()));
    }
    if !status.is_success() {
        return Err(Error::Network(format!("{what} failed with status {status}")));
    }
    Ok(())
}

#[async_trait]
impl RelayClient for HttpRelay {
    async fn push(&self, dataset_id: DatasetId, request: PushRequest) -> Result<PushResponse> {
        let url = format!("{}/sync/{}/push", self.base_url, dataset_id);
        let response = self
            .authorize(self.http.post(url).json(&request))
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        check_status(response.status(), "push")?;
        response
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }

    async fn pull(
        &self,
        dataset_id: DatasetId,
        since: Option<Timestamp>,
        limit: u32,
    ) -> Result<PullResponse> {
        let url = format!("{}/sync/{}/pull", self.base_url, dataset_id);
        let mut req = self.http.get(url).query(&[("limit", limit.to_string())]);
        if let Some(cursor) = since {
            req = req.query(&[("since", cursor.to_string())]);
        }
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        check_status(response.status(), "pull")?;
        response
            .json()
            .await
            .map_err(|e| Error::Network(e.to_string()))
    }
}

/// Capped exponential backoff for recoverable failures.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(60),
            max_retries: 6,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry `attempt` (1-based), doubling up to the cap.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let millis = (self.initial.as_millis() as u64).saturating_mul(1u64 << exp);
        Duration::from_millis(millis).min(self.max)
    }
}

/// Drives sync cycles for one engine against one relay.
pub struct SyncTransport<S: StoreAdapter, R: RelayClient> {
    engine: Arc<SyncEngine<S>>,
    relay: R,
    backoff: BackoffPolicy,
    batch_limit: u32,
    debounce: Duration,
    status_tx: watch::Sender<SyncStatus>,
    trigger: Notify,
    shutdown: AtomicBool,
}

impl<S: StoreAdapter, R: RelayClient> SyncTransport<S, R> {
    pub fn new(engine: Arc<SyncEngine<S>>, relay: R) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        Self {
            engine,
            relay,
            backoff: BackoffPolicy::default(),
            batch_limit: DEFAULT_BATCH_LIMIT,
            debounce: DEFAULT_DEBOUNCE,
            status_tx,
            trigger: Notify::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_batch_limit(mut self, limit: u32) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Watch non-fatal sync status ("last sync failed, retrying").
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Wake the run loop early, e.g. after a local mutation burst. The loop
    /// debounces before syncing.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Request cooperative shutdown; honored at phase boundaries, never
    /// mid-merge for a record.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.trigger.notify_one();
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Run one full sync cycle: push, then pull+merge until drained.
    pub async fn sync_once(&self) -> Result<SyncOutcome> {
        let mut outcome = SyncOutcome::default();

        // Pushing. Entries stay in the change log until acknowledged, so a
        // failure here loses nothing.
        let outgoing = self.engine.outgoing();
        if !outgoing.is_empty() {
            outcome.pushed = self.push_entries(&outgoing).await?;
        }

        if self.shutting_down() {
            return Ok(outcome);
        }

        // Pulling + Merging, batch by batch. The applied cursor only moves
        // after a batch is fully merged (or discarded as corrupt), so an
        // interruption replays the batch on the next cycle.
        loop {
            let since = self.engine.applied_cursor();
            let batch = self
                .relay
                .pull(self.engine.dataset_id(), since, self.batch_limit)
                .await?;

            if batch.entries.is_empty() {
                break;
            }

            match self.open_batch(&batch) {
                Ok(entries) => {
                    let applied = entries.len();
                    self.engine.ingest_and_merge(entries)?;
                    outcome.applied += applied;
                }
                Err(Error::Decryption) => {
                    tracing::warn!(
                        dataset = %self.engine.dataset_id(),
                        entries = batch.entries.len(),
                        "discarding batch that failed decryption"
                    );
                    outcome.corrupt_batches += 1;
                }
                Err(e) => return Err(e),
            }

            // Advance past the batch either way: one poisoned batch must not
            // wedge convergence with every other peer.
            if let Some(next) = batch.next_cursor {
                self.engine.mark_applied(next)?;
            }

            if !batch.has_more || self.shutting_down() {
                break;
            }
        }

        Ok(outcome)
    }

    /// Periodic run loop with mutation-burst triggers and capped backoff.
    /// Never panics the application: failures degrade to a status signal.
    pub async fn run(&self, interval: Duration) {
        loop {
            if self.shutting_down() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.trigger.notified() => {
                    tokio::time::sleep(self.debounce).await;
                }
            }
            if self.shutting_down() {
                break;
            }
            self.sync_with_retries().await;
        }
        let _ = self.status_tx.send(SyncStatus::Idle);
    }

    async fn sync_with_retries(&self) {
        let _ = self.status_tx.send(SyncStatus::Syncing);
        let mut attempt = 0u32;
        loop {
            match self.sync_once().await {
                Ok(outcome) => {
                    tracing::debug!(
                        pushed = outcome.pushed,
                        applied = outcome.applied,
                        corrupt = outcome.corrupt_batches,
                        "sync cycle complete"
                    );
                    let _ = self.status_tx.send(SyncStatus::Idle);
                    return;
                }
                Err(e) if e.is_recoverable() && attempt < self.backoff.max_retries => {
                    attempt += 1;
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(error = %e, attempt, ?delay, "sync failed, backing off");
                    let _ = self.status_tx.send(SyncStatus::Retrying { attempt });
                    tokio::time::sleep(delay).await;
                    if self.shutting_down() {
                        return;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "sync failed");
                    let _ = self.status_tx.send(SyncStatus::Failed(e.to_string()));
                    return;
                }
            }
        }
    }

    async fn push_entries(&self, outgoing: &[ChangeEntry]) -> Result<usize> {
        let mut entries = Vec::with_capacity(outgoing.len());
        for entry in outgoing {
            entries.push(protocol::seal_entry(self.engine.key(), entry)?);
        }
        let request = PushRequest {
            cursor: self.engine.pushed_cursor(),
            entries,
        };
        let response = self.relay.push(self.engine.dataset_id(), request).await?;
        if let Some(ack) = response.ack {
            self.engine.mark_pushed(ack)?;
        }
        Ok(outgoing.len())
    }

    /// Decrypt a pulled batch, skipping entries this replica authored.
    /// Any decryption failure poisons the whole batch.
    fn open_batch(&self, batch: &PullResponse) -> Result<Vec<ChangeEntry>> {
        let own = self.engine.replica_id();
        let mut entries = Vec::with_capacity(batch.entries.len());
        for sealed in &batch.entries {
            if sealed.replica_id == own {
                continue;
            }
            entries.push(protocol::open_entry(self.engine.key(), sealed)?);
        }
        Ok(entries)
    }
}
