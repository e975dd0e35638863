//! Connectivity flag fed by an external network-state provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared online/offline flag.
///
/// The coordinator never checks the network itself; the embedding application
/// reports transitions through [`crate::sync::SyncCoordinator::set_online`].
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct NetworkState {
    online: Arc<AtomicBool>,
}

impl NetworkState {
    /// Create a flag with an initial value.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Current value.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Store a new value and return the previous one.
    pub fn set(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::new(false)
    }
}
