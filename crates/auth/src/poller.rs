//! Repeating point reads on behalf of a waiting client session.
//!
//! A [`Poller`] owns one background task. Every interval it spawns an
//! independent read of the record and reports what it saw through an mpsc
//! channel. Reads are not de-duplicated: a slow read can overlap the next
//! tick. Cancelling the poller (or dropping it) stops the ticker, aborts reads
//! still in flight and suppresses any result that had not been sent yet.

use otpgate_database::RecordStore;
use otpgate_models::ApprovalRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The single record field a wait is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollField {
    ShowOtpInput,
    IsVerified,
}

impl PollField {
    pub fn is_set(&self, record: &ApprovalRecord) -> bool {
        match self {
            Self::ShowOtpInput => record.show_otp_input,
            Self::IsVerified => record.is_verified,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Self::ShowOtpInput => "show_otp_input",
            Self::IsVerified => "is_verified",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The field is set.
    Satisfied,
    /// Record present, field not set yet.
    Pending,
    /// The record no longer exists.
    Missing,
    /// The read itself failed; treated as transient.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PollResult {
    /// Identifies the wait that issued the read.
    pub generation: u64,
    pub record_id: Uuid,
    pub field: PollField,
    pub outcome: PollOutcome,
}

pub struct Poller {
    token: CancellationToken,
    generation: u64,
    field: PollField,
}

impl Poller {
    /// Start polling `record_id` for `field`. The first read happens one full
    /// interval after start.
    pub fn start(
        store: Arc<dyn RecordStore>,
        record_id: Uuid,
        field: PollField,
        interval: Duration,
        generation: u64,
        results: mpsc::Sender<PollResult>,
    ) -> Self {
        let token = CancellationToken::new();

        tokio::spawn(run(
            store,
            record_id,
            field,
            interval,
            generation,
            results,
            token.clone(),
        ));

        tracing::debug!(
            "Polling {} on record {} every {:?} (generation {})",
            field.column(),
            record_id,
            interval,
            generation
        );

        Self {
            token,
            generation,
            field,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn field(&self) -> PollField {
        self.field
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Evaluate one read of `record_id` against `field`.
pub async fn read_once(store: &dyn RecordStore, record_id: Uuid, field: PollField) -> PollOutcome {
    match store.get(record_id).await {
        Ok(Some(record)) if field.is_set(&record) => PollOutcome::Satisfied,
        Ok(Some(_)) => PollOutcome::Pending,
        Ok(None) => PollOutcome::Missing,
        Err(e) => PollOutcome::Failed(e.to_string()),
    }
}

async fn run(
    store: Arc<dyn RecordStore>,
    record_id: Uuid,
    field: PollField,
    interval: Duration,
    generation: u64,
    results: mpsc::Sender<PollResult>,
    token: CancellationToken,
) {
    // tokio intervals reject a zero period
    let interval = interval.max(MIN_POLL_INTERVAL);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Dropping the set aborts every read still in flight
    let mut reads = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let store = Arc::clone(&store);
                let results = results.clone();
                let token = token.clone();

                reads.spawn(async move {
                    let outcome = read_once(store.as_ref(), record_id, field).await;
                    if token.is_cancelled() {
                        return;
                    }

                    let result = PollResult {
                        generation,
                        record_id,
                        field,
                        outcome,
                    };
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = results.send(result) => {}
                    }
                });
            }
            Some(joined) = reads.join_next(), if !reads.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!("Poll read for record {} panicked", record_id);
                    }
                }
            }
        }
    }

    tracing::debug!(
        "Stopped polling {} on record {} (generation {})",
        field.column(),
        record_id,
        generation
    );
}
