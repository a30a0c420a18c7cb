//! Synthetic per-message backup identifiers.

use chrono::Utc;
use uuid::Uuid;

/// Generates `<uuid-v4>_<unix-millis>` identifiers.
///
/// The millisecond component never goes backwards for a given generator and
/// strictly increases between calls, so two identifiers from one generator
/// differ even before the random part is compared.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last_millis: i64,
}

impl MessageIdGenerator {
    /// Create a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next identifier.
    pub fn next_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        self.last_millis = now.max(self.last_millis + 1);
        format!("{}_{}", Uuid::new_v4(), self.last_millis)
    }
}
