//! Shared status cells for reader and writer implementations.
//!
//! Track outputs and drain tasks run away from the reader/writer object
//! that reports status, so both sides share one cell.

use std::sync::{Arc, Mutex, MutexGuard};

use trackmux_common::MuxError;
use trackmux_pipeline::{ReaderStatus, WriterStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct ReaderInner {
    status: ReaderStatus,
    error: Option<String>,
    open_outputs: usize,
}

#[derive(Clone)]
pub(crate) struct ReaderCell {
    inner: Arc<Mutex<ReaderInner>>,
}

impl ReaderCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReaderInner {
                status: ReaderStatus::Unknown,
                error: None,
                open_outputs: 0,
            })),
        }
    }

    pub fn status(&self) -> ReaderStatus {
        lock(&self.inner).status
    }

    pub fn error(&self) -> Option<MuxError> {
        lock(&self.inner).error.clone().map(MuxError::reader)
    }

    pub fn is_reading(&self) -> bool {
        self.status() == ReaderStatus::Reading
    }

    pub fn output_opened(&self) {
        lock(&self.inner).open_outputs += 1;
    }

    /// One output ran dry. The reader completes once every output has.
    pub fn output_exhausted(&self) {
        let mut inner = lock(&self.inner);
        inner.open_outputs = inner.open_outputs.saturating_sub(1);
        if inner.open_outputs == 0 && inner.status == ReaderStatus::Reading {
            inner.status = ReaderStatus::Completed;
        }
    }

    pub fn start(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.status != ReaderStatus::Unknown {
            return false;
        }
        inner.status = if inner.open_outputs == 0 {
            ReaderStatus::Completed
        } else {
            ReaderStatus::Reading
        };
        true
    }

    pub fn fail(&self, message: impl Into<String>) {
        let mut inner = lock(&self.inner);
        if matches!(inner.status, ReaderStatus::Cancelled | ReaderStatus::Failed) {
            return;
        }
        let message = message.into();
        tracing::warn!(error = %message, "Reader failed");
        inner.status = ReaderStatus::Failed;
        inner.error = Some(message);
    }

    pub fn cancel(&self) {
        let mut inner = lock(&self.inner);
        if matches!(inner.status, ReaderStatus::Unknown | ReaderStatus::Reading) {
            inner.status = ReaderStatus::Cancelled;
        }
    }
}

struct WriterInner {
    status: WriterStatus,
    error: Option<String>,
}

#[derive(Clone)]
pub(crate) struct WriterCell {
    inner: Arc<Mutex<WriterInner>>,
}

impl WriterCell {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(WriterInner {
                status: WriterStatus::Unknown,
                error: None,
            })),
        }
    }

    pub fn status(&self) -> WriterStatus {
        lock(&self.inner).status
    }

    pub fn error(&self) -> Option<MuxError> {
        lock(&self.inner).error.clone().map(MuxError::writer)
    }

    /// `Unknown → Writing`.
    pub fn start(&self) -> bool {
        let mut inner = lock(&self.inner);
        if inner.status != WriterStatus::Unknown {
            return false;
        }
        inner.status = WriterStatus::Writing;
        true
    }

    /// `Writing → Completed`; later failures and cancellations win.
    pub fn complete(&self) {
        let mut inner = lock(&self.inner);
        if inner.status == WriterStatus::Writing {
            inner.status = WriterStatus::Completed;
        }
    }

    pub fn fail(&self, message: impl Into<String>) {
        let mut inner = lock(&self.inner);
        if matches!(
            inner.status,
            WriterStatus::Failed | WriterStatus::Cancelled | WriterStatus::Completed
        ) {
            return;
        }
        let message = message.into();
        tracing::warn!(error = %message, "Writer failed");
        inner.status = WriterStatus::Failed;
        inner.error = Some(message);
    }

    pub fn cancel(&self) {
        let mut inner = lock(&self.inner);
        if matches!(inner.status, WriterStatus::Unknown | WriterStatus::Writing) {
            inner.status = WriterStatus::Cancelled;
        }
    }
}
