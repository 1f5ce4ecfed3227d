use parking_lot::Mutex;

/// Re-entrant busy counter shared by a view-state and its commands.
///
/// Enters and exits nest; extra exits are clamped at zero so they cannot
/// push later enters into the negative.
#[derive(Debug, Default)]
pub struct LoadingCounter {
    count: Mutex<usize>,
}

impl LoadingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> usize {
        self.update(true, |_| ())
    }

    pub fn exit(&self) -> usize {
        self.update(false, |_| ())
    }

    /// Apply one enter or exit and run `then` with the resulting loading
    /// state while still holding the counter lock. Returns the new count.
    pub fn update<F>(&self, entering: bool, then: F) -> usize
    where
        F: FnOnce(bool),
    {
        let mut count = self.count.lock();
        *count = if entering {
            count.saturating_add(1)
        } else {
            count.saturating_sub(1)
        };
        then(*count > 0);
        *count
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn is_loading(&self) -> bool {
        self.count() > 0
    }
}
