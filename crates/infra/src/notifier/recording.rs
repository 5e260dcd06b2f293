use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::{LowStockAlert, Notifier, NotifyError};

/// Keeps every alert it receives (tests/dev).
///
/// When told to fail it still records the attempt, then returns an error.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    alerts: Mutex<Vec<LowStockAlert>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<LowStockAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().map(|a| a.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_low_stock(&self, alert: &LowStockAlert) -> Result<(), NotifyError> {
        self.alerts
            .lock()
            .map_err(|_| NotifyError::Unavailable("recorder lock poisoned".to_string()))?
            .push(alert.clone());

        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("configured to fail".to_string()));
        }
        Ok(())
    }
}
