//! Cooperative cancellation tokens.
//!
//! [`CancellationToken`] is tokio-util's token. Its `cancel` and
//! `is_cancelled` are synchronous, so worker threads poll it directly. A child
//! token is cancelled together with its parent, so the dispatcher cancels a
//! whole generation through one parent token.
//!
//! [`TokenSet`] tracks live tokens so they can be broadcast-cancelled.
//! Registration hands back a [`TokenGuard`] that removes the token again
//! when the work finishes, or when the work is dropped without running.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use teststand::pool::{CancellationToken, TokenSet};
//!
//! let generation = CancellationToken::new();
//! let task = generation.child_token();
//! assert!(!task.is_cancelled());
//!
//! let live = Arc::new(TokenSet::new());
//! let guard = live.insert(task.clone());
//! assert_eq!(live.len(), 1);
//!
//! generation.cancel();
//! assert!(task.is_cancelled());
//!
//! drop(guard);
//! assert!(live.is_empty());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use tokio_util::sync::CancellationToken;

/// Registry of outstanding tokens.
#[derive(Debug, Default)]
pub struct TokenSet {
    tokens: Mutex<HashMap<u64, CancellationToken>>,
    next_id: AtomicU64,
}

impl TokenSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a token. It stays registered until the guard drops or the
    /// set is broadcast-cancelled.
    pub fn insert(self: &Arc<Self>, token: CancellationToken) -> TokenGuard {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, token);
        TokenGuard {
            set: Arc::clone(self),
            id,
        }
    }

    /// Cancel every registered token and clear the set.
    ///
    /// Returns the number of tokens cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<CancellationToken> = self.lock().drain().map(|(_, t)| t).collect();
        for token in &drained {
            token.cancel();
        }
        drained.len()
    }

    /// Number of registered tokens.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no tokens are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }
}

/// Removes its token from the owning [`TokenSet`] on drop.
#[must_use = "dropping the guard unregisters the token immediately"]
pub struct TokenGuard {
    set: Arc<TokenSet>,
    id: u64,
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}

impl std::fmt::Debug for TokenGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_token_starts_active() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_is_one_way_and_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();

        clone.cancel();
        assert!(token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_parent_cancels_descendants_only_downward() {
        let root = CancellationToken::new();
        let child = root.child_token();
        let grandchild = child.child_token();

        grandchild.cancel();
        assert!(!child.is_cancelled());
        assert!(!root.is_cancelled());

        let sibling = root.child_token();
        root.cancel();
        assert!(child.is_cancelled());
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn test_cancel_all_clears_set() {
        let set = Arc::new(TokenSet::new());
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        let _ga = set.insert(a.clone());
        let _gb = set.insert(b.clone());

        assert_eq!(set.cancel_all(), 2);
        assert!(set.is_empty());
        assert!(a.is_cancelled() && b.is_cancelled());
        assert_eq!(set.cancel_all(), 0);
    }

    #[test]
    fn test_guard_removes_token() {
        let set = Arc::new(TokenSet::new());
        let guard = set.insert(CancellationToken::new());
        assert_eq!(set.len(), 1);
        drop(guard);
        assert!(set.is_empty());
    }

    #[test]
    fn test_guard_after_cancel_all_is_harmless() {
        let set = Arc::new(TokenSet::new());
        let guard = set.insert(CancellationToken::new());
        set.cancel_all();
        let _other = set.insert(CancellationToken::new());

        drop(guard);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_cancel_visible_across_threads() {
        let token = CancellationToken::new();
        let observer = {
            let token = token.clone();
            thread::spawn(move || {
                while !token.is_cancelled() {
                    thread::yield_now();
                }
            })
        };
        token.cancel();
        observer.join().unwrap();
    }
}
