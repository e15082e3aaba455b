//! WriteCycle - Optimistic Read/Compute/Write State Machine
//!
//! `TigerStyle`: One explicit state machine drives every optimistic write.
//!
//! ```text
//!   ┌──────┐   current   ┌─────────┐  candidate  ┌───────┐  outcome  ┌──────────┐
//!   │ Read │ ──────────→ │ Compute │ ──────────→ │ Write │ ────────→ │ Evaluate │
//!   └──────┘             └─────────┘             └───────┘           └──────────┘
//!      ↑                      │ existing value kept                      │
//!      │                      ↓                                          │ conflict
//!      │                    done                                         │
//!      └──────────── backoff (RetryStrategy, cancellable) ←──────────────┘
//! ```
//!
//! Versions are stamped here: the first write of an identity is version 1,
//! every later write is `current + 1`, conditional on `current` still
//! being current when the write lands.
//!
//! Cancellation is observed between states and during backoff. A commit
//! or delete that has started always runs to completion, so a cancelled
//! caller never misses a write the backend accepted.
//!
//! Removals use the same bounds: a delete that reports
//! [`RemoveOutcome::Conflict`] is re-observed and retried until it applies
//! or the strategy gives up.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::observer::{AttemptOutcome, TracingObserver, WriteObserver};
use super::{ensure_active, guarded, AddFactory, UpdateFactory};
use crate::retry::RetryStrategy;
use crate::storage::{
    HistoricalStore, KeyRecord, PlainStore, RemoveOutcome, StorageError, StorageResult,
    ValueRecord, WriteOutcome,
};

/// Retry policy plus observer shared by every optimistic engine.
#[derive(Debug, Clone)]
pub struct WriteCycle {
    retry: Arc<dyn RetryStrategy>,
    observer: Arc<dyn WriteObserver>,
}

impl WriteCycle {
    /// Create a cycle reporting through `tracing`.
    #[must_use]
    pub fn new(retry: Arc<dyn RetryStrategy>) -> Self {
        Self {
            retry,
            observer: Arc::new(TracingObserver),
        }
    }

    /// Replace the observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn WriteObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The retry policy bounding this cycle.
    #[must_use]
    pub fn retry(&self) -> &Arc<dyn RetryStrategy> {
        &self.retry
    }

    pub(crate) async fn run(
        &self,
        operation: &'static str,
        target: Target<'_>,
        key: &KeyRecord,
        mutation: Mutation<'_>,
        cancel: &CancellationToken,
    ) -> StorageResult<ValueRecord> {
        let mut attempt: u32 = 1;
        let mut state = CycleState::Read;

        loop {
            state = match state {
                CycleState::Read => {
                    ensure_active(cancel, operation)?;
                    self.observer.on_attempt(operation, key, attempt);

                    let current = guarded(cancel, operation, target.read_current(key)).await;
                    CycleState::Compute(self.failed(operation, key, attempt, current)?)
                }
                CycleState::Compute(current) => {
                    let decision = mutation.decide(key, current);
                    match self.failed(operation, key, attempt, decision)? {
                        Decision::Keep(existing) => {
                            self.observer
                                .on_outcome(operation, key, attempt, AttemptOutcome::Found);
                            return Ok(existing);
                        }
                        Decision::Write(candidate) => CycleState::Write(candidate),
                    }
                }
                CycleState::Write(candidate) => {
                    ensure_active(cancel, operation)?;
                    let outcome = target.commit(key, &candidate).await;
                    let outcome = self.failed(operation, key, attempt, outcome)?;
                    CycleState::Evaluate(candidate, outcome)
                }
                CycleState::Evaluate(candidate, WriteOutcome::Committed) => {
                    let outcome = if candidate.expected.is_some() {
                        AttemptOutcome::Updated
                    } else {
                        AttemptOutcome::Added
                    };
                    self.observer.on_outcome(operation, key, attempt, outcome);
                    return Ok(candidate.value);
                }
                CycleState::Evaluate(_, WriteOutcome::Conflict) => {
                    self.lost_race(operation, key, attempt, cancel).await?;
                    attempt += 1;
                    CycleState::Read
                }
            };
        }
    }

    /// Repeat a conditional delete until it applies.
    ///
    /// `remove_once` observes current state and issues the delete; it is
    /// called again after every [`RemoveOutcome::Conflict`].
    pub(crate) async fn remove<'f, T, F>(
        &self,
        operation: &'static str,
        key: &KeyRecord,
        cancel: &CancellationToken,
        remove_once: F,
    ) -> StorageResult<T>
    where
        F: Fn() -> BoxFuture<'f, StorageResult<RemoveOutcome<T>>>,
    {
        let mut attempt: u32 = 1;

        loop {
            ensure_active(cancel, operation)?;
            self.observer.on_attempt(operation, key, attempt);

            match self.failed(operation, key, attempt, remove_once().await)? {
                RemoveOutcome::Removed(removed) => {
                    self.observer
                        .on_outcome(operation, key, attempt, AttemptOutcome::Removed);
                    return Ok(removed);
                }
                RemoveOutcome::Conflict => {
                    self.lost_race(operation, key, attempt, cancel).await?;
                    attempt += 1;
                }
            }
        }
    }

    /// Report a lost race, then either back off or give up.
    async fn lost_race(
        &self,
        operation: &'static str,
        key: &KeyRecord,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> StorageResult<()> {
        self.observer
            .on_outcome(operation, key, attempt, AttemptOutcome::Conflict);

        if !self.retry.can_retry(attempt) {
            self.observer
                .on_outcome(operation, key, attempt, AttemptOutcome::Exhausted);
            return Err(StorageError::conflict(operation, attempt));
        }

        backoff(self.retry.delay(attempt), cancel, operation).await
    }

    fn failed<T>(
        &self,
        operation: &str,
        key: &KeyRecord,
        attempt: u32,
        result: StorageResult<T>,
    ) -> StorageResult<T> {
        if let Err(err) = &result {
            if !matches!(err, StorageError::Cancelled { .. }) {
                self.observer
                    .on_outcome(operation, key, attempt, AttemptOutcome::Failed);
            }
        }
        result
    }
}

async fn backoff(
    delay: Duration,
    cancel: &CancellationToken,
    operation: &str,
) -> StorageResult<()> {
    if delay.is_zero() {
        return ensure_active(cancel, operation);
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(StorageError::cancelled(operation)),
        () = tokio::time::sleep(delay) => Ok(()),
    }
}

enum CycleState {
    Read,
    Compute(Option<ValueRecord>),
    Write(Candidate),
    Evaluate(Candidate, WriteOutcome),
}

// =============================================================================
// Targets and mutations
// =============================================================================

/// The store a cycle reads from and writes to.
#[derive(Clone, Copy)]
pub(crate) enum Target<'a> {
    /// Conditional insert / version-qualified replace
    Plain(&'a dyn PlainStore),
    /// Insert-if-absent append at the next version
    Historical(&'a dyn HistoricalStore),
}

impl Target<'_> {
    async fn read_current(self, key: &KeyRecord) -> StorageResult<Option<ValueRecord>> {
        match self {
            Self::Plain(store) => store.read(key).await,
            Self::Historical(store) => store.read_latest(key).await,
        }
    }

    async fn commit(self, key: &KeyRecord, candidate: &Candidate) -> StorageResult<WriteOutcome> {
        match (self, candidate.expected) {
            (Self::Plain(store), None) => store.insert(key, &candidate.value).await,
            (Self::Plain(store), Some(expected)) => {
                store.replace(key, expected, &candidate.value).await
            }
            (Self::Historical(store), _) => store.append(key, &candidate.value).await,
        }
    }
}

/// What a cycle does with the current value.
#[derive(Clone, Copy)]
pub(crate) enum Mutation<'a> {
    /// Keep an existing value, otherwise add one
    GetOrAdd(AddFactory<'a>),
    /// Add when absent, otherwise derive a successor
    AddOrUpdate(AddFactory<'a>, UpdateFactory<'a>),
}

enum Decision {
    Keep(ValueRecord),
    Write(Candidate),
}

struct Candidate {
    value: ValueRecord,
    expected: Option<u64>,
}

impl Mutation<'_> {
    fn decide(self, key: &KeyRecord, current: Option<ValueRecord>) -> StorageResult<Decision> {
        let (add, update) = match self {
            Self::GetOrAdd(add) => (add, None),
            Self::AddOrUpdate(add, update) => (add, Some(update)),
        };

        match (current, update) {
            (None, _) => {
                let value = add(key)?.checked_for(key)?.into_first();
                Ok(Decision::Write(Candidate {
                    value,
                    expected: None,
                }))
            }
            (Some(existing), None) => Ok(Decision::Keep(existing)),
            (Some(existing), Some(update)) => {
                let value = update(key, &existing)?.checked_for(key)?.into_successor(&existing);
                Ok(Decision::Write(Candidate {
                    value,
                    expected: Some(existing.version()),
                }))
            }
        }
    }
}

