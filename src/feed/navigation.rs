use crate::session::{page_key, SessionStore, NAV_BACKWARD_NAMESPACE};

/// Classification of one page transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavigationIntent {
    pub target_page: u32,
    /// True only when the transition came from a history traversal.
    pub is_backward: bool,
}

/// Remembers which page transitions were started by history traversal.
///
/// The flag is written to the session store when the traversal is observed
/// and cleared when the transition is consumed, so a later explicit visit
/// to the same page is classified as forward.
#[derive(Debug, Clone)]
pub struct NavigationIntentTracker {
    store: SessionStore,
}

impl NavigationIntentTracker {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Record that a history traversal to `page` has begun.
    pub fn mark_backward(&self, page: u32) {
        if page == 0 {
            return;
        }
        if let Err(e) = self
            .store
            .set_json(&page_key(NAV_BACKWARD_NAMESPACE, page), &true)
        {
            tracing::warn!(page, error = %e, "Failed to mark backward navigation");
            return;
        }
        tracing::debug!(page, "Marked backward navigation");
    }

    pub fn is_marked(&self, page: u32) -> bool {
        self.store
            .get_json::<bool>(&page_key(NAV_BACKWARD_NAMESPACE, page))
            .unwrap_or(false)
    }

    /// Classify the transition to `page` and clear its flag.
    ///
    /// Without a prior [`mark_backward`](Self::mark_backward) the transition
    /// is forward.
    pub fn consume(&self, page: u32) -> NavigationIntent {
        let is_backward = self
            .store
            .take_json::<bool>(&page_key(NAV_BACKWARD_NAMESPACE, page))
            .unwrap_or(false);
        NavigationIntent {
            target_page: page,
            is_backward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unmarked_page_is_forward() {
        let tracker = NavigationIntentTracker::new(SessionStore::new());
        let intent = tracker.consume(4);
        assert_eq!(
            intent,
            NavigationIntent {
                target_page: 4,
                is_backward: false
            }
        );
    }

    #[test]
    fn test_consume_clears_flag() {
        let tracker = NavigationIntentTracker::new(SessionStore::new());
        tracker.mark_backward(2);
        assert!(tracker.is_marked(2));

        assert!(tracker.consume(2).is_backward);
        assert!(!tracker.is_marked(2));
        assert!(!tracker.consume(2).is_backward, "second visit must be forward");
    }

    #[test]
    fn test_flag_is_per_page() {
        let tracker = NavigationIntentTracker::new(SessionStore::new());
        tracker.mark_backward(2);
        assert!(!tracker.consume(3).is_backward);
        assert!(tracker.consume(2).is_backward);
    }

    #[test]
    fn test_flag_lives_in_session_store() {
        let store = SessionStore::new();
        let tracker = NavigationIntentTracker::new(store.clone());
        tracker.mark_backward(5);
        assert_eq!(store.get_raw("nav-backward:5").as_deref(), Some("true"));
    }

    #[test]
    fn test_page_zero_never_marked() {
        let tracker = NavigationIntentTracker::new(SessionStore::new());
        tracker.mark_backward(0);
        assert!(!tracker.consume(0).is_backward);
    }
}
