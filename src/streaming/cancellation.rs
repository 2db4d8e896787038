use std::cell::Cell;
use std::rc::Rc;

/// Cooperative cancellation of everything a single owner started. Pending acquisitions keep a
/// clone and check it when they resume, in-flight work itself is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Rc<Cell<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}
