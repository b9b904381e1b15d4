//! Designated-thread loop
//!
//! The thread that owns a [`MainThread`] token calls [`drive_until`] or
//! [`drive_queries`]; both drain storage once per tick.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::pipeline::{Pipeline, QueryReport};
use crate::thread::MainThread;

/// Drain every `tick` until `stop` resolves, then drain once more
pub async fn drive_until<F>(pipeline: &Pipeline, main: &MainThread, tick: Duration, stop: F)
where
    F: Future<Output = ()>,
{
    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = interval.tick() => {
                pipeline.drain(main);
            }
        }
    }

    pipeline.drain(main);
}

/// Drain until every query handle finished and the pipeline is idle, or
/// until `limit` elapses. Unfinished queries are reported as defaults.
pub async fn drive_queries(
    pipeline: &Pipeline,
    main: &MainThread,
    tick: Duration,
    mut queries: Vec<JoinHandle<QueryReport>>,
    limit: Option<Duration>,
) -> Vec<QueryReport> {
    let deadline = limit.map(|limit| Instant::now() + limit);
    let mut reports = Vec::with_capacity(queries.len());
    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        pipeline.drain(main);

        let mut still_running = Vec::with_capacity(queries.len());
        for handle in queries {
            if handle.is_finished() {
                match handle.await {
                    Ok(report) => reports.push(report),
                    Err(e) => tracing::error!(error = %e, "Query task failed"),
                }
            } else {
                still_running.push(handle);
            }
        }
        queries = still_running;

        if queries.is_empty() && pipeline.is_idle() {
            break;
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            tracing::warn!(
                unfinished = queries.len(),
                in_flight = pipeline.storage().in_flight(),
                "Time limit reached before the pipeline settled"
            );
            for handle in &queries {
                handle.abort();
            }
            reports.extend(queries.iter().map(|_| QueryReport::default()));
            break;
        }
    }

    reports
}
