//! Pipeline hosting
//!
//! Each pipeline runs on its own OS thread with a current-thread tokio
//! runtime, so broker and store I/O never share an execution context with
//! request handling. A pipeline that stops with an error is rebuilt and
//! restarted after a back-off until shutdown is requested.

use async_trait::async_trait;
use broker::{consume_batch, BrokerError, Cancellation, Consumer, Record};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::error::PipelineError;

/// A long-running consume loop
#[async_trait]
pub trait Pipeline: Send {
    fn name(&self) -> &'static str;

    /// Run until `cancel` fires (`Ok`) or a fatal error occurs (`Err`).
    /// Must release its broker handle before returning either way.
    async fn run(&mut self, cancel: &Cancellation) -> Result<(), PipelineError>;
}

/// Restart delays, doubled after each consecutive failure
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

/// Sleep for `delay` or until `cancel` fires, whichever comes first
pub async fn pause(delay: Duration, cancel: &Cancellation) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(delay) => {}
    }
}

/// Consume one batch for a pipeline.
///
/// A failed consume may already have taken records off the log; the consumer
/// is rewound to its committed offsets so they are redelivered and never
/// committed past. Cancellation leaves the position alone since the handle
/// is closed right after.
pub async fn next_batch(
    consumer: &mut dyn Consumer,
    max_wait: Duration,
    max_count: usize,
    cancel: &Cancellation,
) -> Result<Vec<Record>, PipelineError> {
    match consume_batch(&mut *consumer, max_wait, max_count, cancel).await {
        Ok(records) => Ok(records),
        Err(BrokerError::Cancelled) => Err(BrokerError::Cancelled.into()),
        Err(err) => {
            warn!(error = %err, "consume failed, rewinding to committed offsets");
            consumer.seek_to_committed()?;
            Err(err.into())
        }
    }
}

/// Build and run a pipeline on a dedicated thread, restarting it on failure.
///
/// `factory` is called for every (re)start; it owns whatever the pipeline
/// needs to rebuild its state.
pub fn spawn_supervised<F, P>(
    name: &str,
    factory: F,
    cancel: Cancellation,
    backoff: Backoff,
) -> Result<JoinHandle<()>, PipelineError>
where
    F: FnMut() -> Result<P, PipelineError> + Send + 'static,
    P: Pipeline + 'static,
{
    let thread_name = name.to_string();
    let handle = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!(pipeline = %thread_name, error = %err, "failed to build pipeline runtime");
                    return;
                }
            };
            runtime.block_on(supervise(&thread_name, factory, &cancel, backoff));
        })?;
    Ok(handle)
}

/// Restart loop shared by every hosted pipeline
pub async fn supervise<F, P>(name: &str, mut factory: F, cancel: &Cancellation, backoff: Backoff) -> u32
where
    F: FnMut() -> Result<P, PipelineError>,
    P: Pipeline,
{
    let mut delay = backoff.initial;
    let mut restarts = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let started = Instant::now();
        let outcome = match factory() {
            Ok(mut pipeline) => {
                info!(pipeline = pipeline.name(), restarts, "pipeline started");
                pipeline.run(cancel).await
            }
            Err(err) => Err(err),
        };

        match outcome {
            Ok(()) => break,
            Err(err) if err.is_cancelled() => break,
            Err(err) => {
                if started.elapsed() > backoff.max {
                    delay = backoff.initial;
                }
                error!(pipeline = name, error = %err, retry_in_ms = delay.as_millis() as u64, "pipeline failed");
                pause(delay, cancel).await;
                if cancel.is_cancelled() {
                    break;
                }
                delay = backoff.next(delay);
                restarts += 1;
                warn!(pipeline = name, restarts, "restarting pipeline");
            }
        }
    }

    info!(pipeline = name, restarts, "pipeline stopped");
    restarts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Fails fatally `failures` times, then waits for cancellation
    struct Scripted {
        failures: Arc<AtomicUsize>,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Pipeline for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn run(&mut self, cancel: &Cancellation) -> Result<(), PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(BrokerError::Closed.into());
            }
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_pipeline_is_restarted() {
        let failures = Arc::new(AtomicUsize::new(2));
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = Cancellation::new();

        let task = {
            let (failures, runs, cancel) = (failures.clone(), runs.clone(), cancel.clone());
            tokio::spawn(async move {
                let factory = move || {
                    Ok(Scripted {
                        failures: failures.clone(),
                        runs: runs.clone(),
                    })
                };
                let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(100));
                supervise("scripted", factory, &cancel, backoff).await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        cancel.cancel();
        assert_eq!(task.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let cancel = Cancellation::new();
        cancel.cancel();
        let restarts = supervise(
            "idle",
            || -> Result<Scripted, PipelineError> { Err(BrokerError::Closed.into()) },
            &cancel,
            Backoff::new(Duration::from_millis(1), Duration::from_millis(1)),
        )
        .await;
        assert_eq!(restarts, 0);
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(backoff.next(Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(backoff.next(Duration::from_millis(200)), Duration::from_millis(300));
    }
}
