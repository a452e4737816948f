//! # Flush Stages
//!
//! Stage ordering, the per-stage batch runner and the flush report.
//!
//! ## Stage Barrier
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        One Flush Stage                                  │
//! │                                                                         │
//! │  queue:  [a] [b] [c] [d] [e]          (insertion order)                │
//! │            │   │   │                                                    │
//! │            ▼   ▼   ▼                  started in order, at most         │
//! │          call call call ...           max_in_flight at a time           │
//! │            │   │   │                                                    │
//! │            ▼   ▼   ▼                                                    │
//! │  ┌───────────────────────────────┐                                     │
//! │  │  barrier: all Ok   ──► next   │                                     │
//! │  │           first Err ──► abort │  (no new calls start, calls already │
//! │  └───────────────────────────────┘   started run to completion)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesOrdered, StreamExt};
use serde::{Deserialize, Serialize};

use crate::error::FlushError;

// =============================================================================
// Flush Stage
// =============================================================================

/// The six flush stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushStage {
    Create,
    Update,
    Sync,
    Hidden,
    Destroy,
    Procedure,
}

impl FlushStage {
    /// Every stage, in the order flush runs them.
    pub const ALL: [FlushStage; 6] = [
        FlushStage::Create,
        FlushStage::Update,
        FlushStage::Sync,
        FlushStage::Hidden,
        FlushStage::Destroy,
        FlushStage::Procedure,
    ];
}

impl fmt::Display for FlushStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushStage::Create => write!(f, "create"),
            FlushStage::Update => write!(f, "update"),
            FlushStage::Sync => write!(f, "sync"),
            FlushStage::Hidden => write!(f, "hidden"),
            FlushStage::Destroy => write!(f, "destroy"),
            FlushStage::Procedure => write!(f, "procedure"),
        }
    }
}

// =============================================================================
// Flush Report
// =============================================================================

/// What a successful flush sent to the data source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushReport {
    /// Insert calls (create stage).
    pub inserted: usize,

    /// Full update calls (update stage).
    pub updated: usize,

    /// Partial update calls (sync stage).
    pub synced: usize,

    /// Syncs that found nothing to write.
    pub sync_clean: usize,

    /// Syncs dropped because their model is being hard-deleted.
    pub sync_skipped: usize,

    /// Soft-delete calls.
    pub hidden: usize,

    /// Hard-delete calls.
    pub destroyed: usize,

    /// Procedure calls.
    pub procedures: usize,

    /// Wall time of the whole flush.
    #[serde(with = "duration_millis")]
    pub elapsed: Duration,
}

impl FlushReport {
    /// Total number of DataSource calls made.
    pub fn calls(&self) -> usize {
        self.inserted + self.updated + self.synced + self.hidden + self.destroyed + self.procedures
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// =============================================================================
// Stage Runner
// =============================================================================

/// One queued call of a stage.
pub(crate) type StageCall<'a, T> = BoxFuture<'a, Result<T, FlushError>>;

/// Drives `calls` in queue order with at most `max_in_flight` outstanding
/// (0 = no limit) and returns their outputs in queue order.
///
/// After the first error no further call is started, but every call that
/// was already started is polled to completion before the error is
/// returned.
pub(crate) async fn settle<T>(
    max_in_flight: usize,
    calls: Vec<StageCall<'_, T>>,
) -> Result<Vec<T>, FlushError> {
    let limit = if max_in_flight == 0 {
        usize::MAX
    } else {
        max_in_flight
    };

    let mut queued = calls.into_iter();
    let mut in_flight = FuturesOrdered::new();
    let mut outputs = Vec::new();
    let mut first_error = None;

    loop {
        while first_error.is_none() && in_flight.len() < limit {
            match queued.next() {
                Some(call) => in_flight.push_back(call),
                None => break,
            }
        }

        match in_flight.next().await {
            Some(Ok(output)) => outputs.push(output),
            Some(Err(err)) => {
                first_error.get_or_insert(err);
            }
            None => break,
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(outputs),
    }
}

/// [`settle`] for calls without output. Returns how many completed.
pub(crate) async fn run_stage(
    max_in_flight: usize,
    calls: Vec<StageCall<'_, ()>>,
) -> Result<usize, FlushError> {
    settle(max_in_flight, calls).await.map(|done| done.len())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use futures_util::FutureExt;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn rejected() -> FlushError {
        FlushError::Transaction(DbError::NotConnected)
    }

    #[test]
    fn test_stage_order() {
        let mut sorted = FlushStage::ALL;
        sorted.sort();
        assert_eq!(sorted, FlushStage::ALL);
        assert_eq!(FlushStage::Hidden.to_string(), "hidden");
    }

    #[test]
    fn test_report_calls() {
        let report = FlushReport {
            inserted: 2,
            synced: 1,
            sync_clean: 4,
            sync_skipped: 1,
            destroyed: 1,
            ..Default::default()
        };
        assert_eq!(report.calls(), 4);
    }

    #[tokio::test]
    async fn test_run_stage_counts_calls() {
        let calls = (0..5).map(|_| async { Ok(()) }.boxed()).collect();
        assert_eq!(run_stage(0, calls).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_settle_keeps_queue_order() {
        let calls = (0..4u64)
            .map(|i| {
                async move {
                    tokio::time::sleep(Duration::from_millis(8 - 2 * i)).await;
                    Ok(i)
                }
                .boxed()
            })
            .collect();
        assert_eq!(settle(0, calls).await.unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_stage_respects_limit() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .collect();

        assert_eq!(run_stage(2, calls).await.unwrap(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_run_stage_surfaces_first_error() {
        let calls = (0..3)
            .map(|i| async move { if i == 1 { Err(rejected()) } else { Ok(()) } }.boxed())
            .collect();

        let err = run_stage(0, calls).await.unwrap_err();
        assert!(matches!(err, FlushError::Transaction(DbError::NotConnected)));
    }

    #[tokio::test]
    async fn test_started_calls_finish_after_error() {
        let settled = Arc::new(Mutex::new(Vec::new()));

        let failing: StageCall<'_, ()> = async { Err(rejected()) }.boxed();
        let slow = {
            let settled = settled.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                settled.lock().push(2);
                Ok(())
            }
            .boxed()
        };

        assert!(run_stage(0, vec![failing, slow]).await.is_err());
        assert_eq!(*settled.lock(), vec![2]);
    }

    #[tokio::test]
    async fn test_no_call_starts_after_error() {
        let started = Arc::new(AtomicUsize::new(0));

        let failing: StageCall<'_, ()> = async { Err(rejected()) }.boxed();
        let later = {
            let started = started.clone();
            async move {
                started.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        };

        assert!(run_stage(1, vec![failing, later]).await.is_err());
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }
}
