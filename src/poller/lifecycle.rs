//! Per-run task handles for a `Poller`.

use super::subscriber::{panic_message, CompleteHandler};
use crate::runtime::telemetry::{self, Telemetry};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct RunHandles {
    run_token: CancellationToken,
    loop_handle: Option<JoinHandle<()>>,
    metrics_handle: Option<JoinHandle<()>>,
    on_complete: Option<CompleteHandler>,
}

pub(crate) struct RunSpawnParams<'a, F> {
    pub runtime: &'a Handle,
    pub run_token: CancellationToken,
    pub run_loop: F,
    pub telemetry: Arc<Telemetry>,
    pub metrics_interval: Option<Duration>,
    pub on_complete: Option<CompleteHandler>,
}

impl RunHandles {
    pub(crate) fn spawn<F>(params: RunSpawnParams<'_, F>) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let RunSpawnParams {
            runtime,
            run_token,
            run_loop,
            telemetry,
            metrics_interval,
            on_complete,
        } = params;

        let loop_handle = runtime.spawn(run_loop);
        let metrics_handle = metrics_interval.map(|interval| {
            let _guard = runtime.enter();
            telemetry::spawn_metrics_reporter(telemetry, run_token.clone(), interval)
        });

        Self {
            run_token,
            loop_handle: Some(loop_handle),
            metrics_handle,
            on_complete,
        }
    }

    pub(crate) fn cancel(&self) {
        self.run_token.cancel();
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.run_token.is_cancelled()
    }

    /// Fires the completion callback. Subsequent calls are no-ops.
    pub(crate) fn complete(&mut self) {
        let Some(on_complete) = self.on_complete.take() else {
            return;
        };

        if let Err(panic_payload) = catch_unwind(AssertUnwindSafe(|| on_complete())) {
            tracing::error!(
                panic = %panic_message(panic_payload.as_ref()),
                "completion callback panicked"
            );
        }
    }

    pub(crate) async fn join(mut self) {
        if let Some(handle) = self.loop_handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::warn!(error = %err, "poll loop task panicked");
                }
            }
        }

        if let Some(handle) = self.metrics_handle.take() {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    tracing::warn!(error = %err, "metrics reporter task panicked");
                }
            }
        }
    }
}
