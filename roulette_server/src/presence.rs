//! Online-count tracking

/// Process-wide count of open connections.
///
/// Mutators return the value right after the change so the caller can emit
/// it while still holding the state lock.
#[derive(Debug, Default)]
pub struct PresenceCounter {
    count: usize,
}

impl PresenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> usize {
        self.count
    }

    pub fn on_connect(&mut self) -> usize {
        self.count += 1;
        self.count
    }

    pub fn on_disconnect(&mut self) -> usize {
        self.count = self.count.saturating_sub(1);
        self.count
    }

    /// Overwrite with the authoritative count. Returns the new value only if
    /// it differed.
    pub fn reconcile(&mut self, actual: usize) -> Option<usize> {
        if self.count == actual {
            return None;
        }
        tracing::warn!(counted = self.count, actual, "presence count drifted");
        self.count = actual;
        Some(actual)
    }
}
