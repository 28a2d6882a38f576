//! # Lantern Runtime
//!
//! Async runtime seam for the span export pipeline.
//!
//! The batching exporter never calls the executor directly. It goes through
//! [`ExportRuntime`], which has two implementations:
//! - **Tokio**: the production runtime
//! - **Mock**: a virtual clock whose sleeps return at once and are recorded,
//!   so retry backoff can be tested without waiting
//!
//! ## Feature Flags
//!
//! - `tokio` (default): Tokio runtime and [`BatchExporter`]

use std::future::Future;
use std::time::Duration;

#[cfg(feature = "tokio")]
pub mod exporter;

#[cfg(feature = "tokio")]
pub use exporter::{BatchConfig, BatchExporter};

/// Runtime operations the export pipeline needs.
pub trait ExportRuntime: Send + Sync + 'static {
    /// Milliseconds on this runtime's clock.
    fn now_millis(&self) -> u64;

    /// Sleep for the specified duration
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Run a task in the background.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

#[cfg(feature = "tokio")]
pub mod tokio_runtime {
    //! Tokio-based runtime implementation

    use super::*;

    /// Tokio runtime wrapper. `spawn` must be called from inside a Tokio runtime.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct TokioRuntime;

    impl TokioRuntime {
        pub fn new() -> Self {
            Self
        }
    }

    impl ExportRuntime for TokioRuntime {
        fn now_millis(&self) -> u64 {
            use std::time::{SystemTime, UNIX_EPOCH};
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            u64::try_from(millis).unwrap_or(u64::MAX)
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }

        fn spawn<F>(&self, future: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            tokio::spawn(future);
        }
    }
}

/// Mock runtime for testing
pub mod mock_runtime {
    use std::sync::atomic::{AtomicU64, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Virtual-clock runtime.
    ///
    /// `sleep` advances the clock by the requested amount, records it, and
    /// yields once. With the `tokio` feature, `spawn` hands the task to the
    /// ambient Tokio executor; without it the task is dropped.
    #[derive(Debug, Default)]
    pub struct MockRuntime {
        current_time_ms: AtomicU64,
        sleeps: Mutex<Vec<Duration>>,
    }

    impl MockRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        /// Advance the mock clock
        pub fn advance(&self, duration: Duration) {
            let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
            self.current_time_ms.fetch_add(millis, Ordering::SeqCst);
        }

        /// Every duration passed to `sleep`, in call order.
        pub fn sleeps(&self) -> Vec<Duration> {
            self.sleeps.lock().clone()
        }
    }

    impl ExportRuntime for MockRuntime {
        fn now_millis(&self) -> u64 {
            self.current_time_ms.load(Ordering::SeqCst)
        }

        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().push(duration);
            self.advance(duration);
            YieldOnce(false).await;
        }

        fn spawn<F>(&self, future: F)
        where
            F: Future<Output = ()> + Send + 'static,
        {
            #[cfg(feature = "tokio")]
            tokio::spawn(future);
            #[cfg(not(feature = "tokio"))]
            drop(future);
        }
    }

    /// Returns `Pending` once, waking itself, then `Ready`.
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<()> {
            if self.0 {
                return std::task::Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            std::task::Poll::Pending
        }
    }
}

pub use mock_runtime::MockRuntime;
#[cfg(feature = "tokio")]
pub use tokio_runtime::TokioRuntime;
