//! Capturing event publisher: records every published message so tests can
//! assert on subjects and payloads without a broker.

use async_trait::async_trait;
use parking_lot::Mutex;
use tally_kernel::bus::{EventPublisher, PublishError};
use tally_kernel::models::ChangeEvent;

#[derive(Default)]
pub struct CapturingPublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl CapturingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(subject, payload)` pairs published so far.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.published.lock().iter().map(|(s, _)| s.clone()).collect()
    }

    /// Payloads decoded back into change events.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.published
            .lock()
            .iter()
            .filter_map(|(_, payload)| serde_json::from_slice(payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.published.lock().clear();
    }
}

#[async_trait]
impl EventPublisher for CapturingPublisher {
    async fn publish(&self, subject: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.published.lock().push((subject.to_string(), payload.to_vec()));
        Ok(())
    }
}
