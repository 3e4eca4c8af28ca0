//! Cooperative cancellation for in-flight executions

use tokio::sync::watch;

use crate::model::FailureReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `Executor::cancel` was called
    Requested,
    /// The execution's wall-clock budget elapsed
    BudgetExhausted,
}

impl CancelCause {
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            CancelCause::Requested => FailureReason::Cancelled,
            CancelCause::BudgetExhausted => FailureReason::Timeout,
        }
    }
}

/// Raising side; the first cause wins
#[derive(Debug)]
pub struct CancelSignal {
    tx: watch::Sender<Option<CancelCause>>,
}

impl CancelSignal {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, CancelToken { rx })
    }

    /// Returns false if the signal was already raised
    pub fn cancel(&self, cause: CancelCause) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(cause);
                true
            } else {
                false
            }
        })
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Observing side, checked between steps and during waits
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<Option<CancelCause>>,
}

impl CancelToken {
    /// A token that is never cancelled
    pub fn never() -> Self {
        let (signal, token) = CancelSignal::new();
        // Receiver keeps the last value after the sender is gone.
        drop(signal);
        token
    }

    pub fn cause(&self) -> Option<CancelCause> {
        *self.rx.borrow()
    }

    /// Resolves once the signal is raised; pends forever if it never is
    pub async fn cancelled(&self) -> CancelCause {
        let mut rx = self.rx.clone();
        loop {
            if let Some(cause) = *rx.borrow_and_update() {
                return cause;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}
