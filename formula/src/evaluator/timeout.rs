//! Cancellation and run-time limits
//!
//! A [`CancellationToken`] may be set from any thread. The search polls it,
//! together with the configured time budget, at every leaf evaluation.

use crate::{FormulaError, FormulaOptions};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new run
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Clock of one run
#[derive(Debug)]
pub struct RunClock {
    start_time: Instant,
    limit: Option<Duration>,
    token: CancellationToken,
}

impl RunClock {
    pub fn new(options: &FormulaOptions, token: CancellationToken) -> Self {
        Self {
            start_time: Instant::now(),
            limit: options.max_run_time_ms.map(Duration::from_millis),
            token,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Error once the run is cancelled or over its time budget
    pub fn check(&self) -> Result<(), FormulaError> {
        if self.token.is_cancelled() {
            return Err(FormulaError::Cancelled);
        }
        if let Some(limit) = self.limit {
            if self.start_time.elapsed() > limit {
                return Err(FormulaError::Cancelled);
            }
        }
        Ok(())
    }
}
