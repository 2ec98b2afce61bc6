//! Parameter change events and the debounced recompute loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use geo::Polygon;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::params::FloodThresholds;
use crate::pipeline::mapper::{FloodMapper, RefreshOutcome};

/// A user edit to one pipeline parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterChange {
    AreaOfInterest(Polygon<f64>),
    Window { index: usize, start: NaiveDate, span_days: u32 },
    Thresholds(FloodThresholds),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKey {
    AreaOfInterest,
    Window(usize),
    Thresholds,
}

impl ParameterChange {
    fn key(&self) -> ChangeKey {
        match self {
            ParameterChange::AreaOfInterest(_) => ChangeKey::AreaOfInterest,
            ParameterChange::Window { index, .. } => ChangeKey::Window(*index),
            ParameterChange::Thresholds(_) => ChangeKey::Thresholds,
        }
    }
}

/// Keep only the last change to each parameter, in the order those last changes arrived
pub fn coalesce(changes: Vec<ParameterChange>) -> Vec<ParameterChange> {
    let mut seen = Vec::new();
    let mut kept = Vec::new();
    for change in changes.into_iter().rev() {
        let key = change.key();
        if !seen.contains(&key) {
            seen.push(key);
            kept.push(change);
        }
    }
    kept.reverse();
    kept
}

/// Recompute tasks started by the parameter loop.
///
/// Finished tasks are reaped after every batch, so only recomputes still in flight are held.
pub struct Recomputes {
    tasks: JoinSet<RefreshOutcome>,
    started: usize,
}

impl Recomputes {
    pub fn new() -> Self {
        Self { tasks: JoinSet::new(), started: 0 }
    }

    pub fn spawn(&mut self, mapper: Arc<FloodMapper>) {
        self.tasks.spawn(async move { mapper.refresh().await });
        self.started += 1;
    }

    /// Drop every task that has already finished, logging failures
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            log_outcome(result);
        }
    }

    /// Recomputes still held
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn started(&self) -> usize {
        self.started
    }

    /// Wait for the remaining tasks and return the total number started
    pub async fn finish(mut self) -> usize {
        while let Some(result) = self.tasks.join_next().await {
            log_outcome(result);
        }
        self.started
    }
}

impl Default for Recomputes {
    fn default() -> Self {
        Self::new()
    }
}

fn log_outcome(result: Result<RefreshOutcome, JoinError>) {
    match result {
        Ok(outcome) => {
            if let Some(e) = outcome.error {
                log::warn!("Recompute v{} failed: {}", outcome.version, e);
            }
        }
        Err(e) => log::error!("Recompute task panicked: {}", e),
    }
}

/// Apply parameter changes from `rx` and trigger recomputes.
///
/// Changes arriving within `debounce` of each other form one batch and cause a single
/// recompute. Invalid changes are logged and skipped. Returns the number of recomputes
/// started once the channel closes and every recompute has finished.
pub async fn run_parameter_loop(
    mapper: Arc<FloodMapper>,
    mut rx: mpsc::Receiver<ParameterChange>,
    debounce: Duration,
) -> usize {
    let mut recomputes = Recomputes::new();
    let mut closed = false;

    while !closed {
        let first = match rx.recv().await {
            Some(change) => change,
            None => break,
        };
        let mut batch = vec![first];
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(change)) => batch.push(change),
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        recomputes.reap();
        let received = batch.len();
        let mut applied = 0usize;
        for change in coalesce(batch) {
            match mapper.apply(change) {
                Ok(_) => applied += 1,
                Err(e) => log::warn!("Rejected parameter change: {}", e),
            }
        }
        log::debug!(
            "Parameter batch: {} received, {} applied, {} recomputes in flight",
            received,
            applied,
            recomputes.pending()
        );
        if applied == 0 {
            continue;
        }
        recomputes.spawn(Arc::clone(&mapper));
    }

    recomputes.finish().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(index: usize, day: u32) -> ParameterChange {
        ParameterChange::Window {
            index,
            start: NaiveDate::from_ymd_opt(2020, 7, day).unwrap(),
            span_days: 8,
        }
    }

    #[tokio::test]
    async fn test_finished_recomputes_are_reaped() {
        use crate::config::FloodMapperConfig;
        use crate::io::{InMemoryCatalog, InMemoryPopulation};
        use crate::params::AreaOfInterest;

        let aoi = AreaOfInterest::from_bounds(0.0, 0.0, 100.0, 100.0).unwrap();
        let mapper = Arc::new(
            FloodMapper::new(
                FloodMapperConfig::default(),
                aoi,
                Arc::new(InMemoryCatalog::new()),
                Arc::new(InMemoryPopulation::new()),
            )
            .unwrap(),
        );

        let mut recomputes = Recomputes::new();
        for _ in 0..5 {
            recomputes.spawn(Arc::clone(&mapper));
            for _ in 0..100 {
                recomputes.reap();
                if recomputes.pending() == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            assert_eq!(recomputes.pending(), 0);
        }
        assert_eq!(recomputes.started(), 5);
        assert_eq!(recomputes.finish().await, 5);
    }

    #[test]
    fn test_coalesce_keeps_last_per_parameter() {
        let changes = vec![
            window(1, 1),
            ParameterChange::Thresholds(FloodThresholds::default()),
            window(1, 2),
            window(0, 3),
            window(1, 4),
        ];
        let kept = coalesce(changes);
        assert_eq!(
            kept,
            vec![
                ParameterChange::Thresholds(FloodThresholds::default()),
                window(0, 3),
                window(1, 4),
            ]
        );
    }
}
