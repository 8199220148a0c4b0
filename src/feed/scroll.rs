use crate::session::{page_key, SessionStore, StoreError, SCROLL_NAMESPACE};
use serde::{Deserialize, Serialize};

/// Last recorded scroll position of a page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScrollAnchor {
    pub page_index: u32,
    pub offset: f64,
}

/// Per-page scroll offsets, kept under `scroll:<page>`.
///
/// Offsets are recorded while a page is viewed and handed back once, on
/// backward navigation, after the page's items are on screen.
#[derive(Debug, Clone)]
pub struct ScrollAnchorStore {
    store: SessionStore,
}

impl ScrollAnchorStore {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Record the current offset for `page`. Negative offsets clamp to 0;
    /// non-finite offsets are ignored.
    pub fn record(&self, page: u32, offset: f64) -> Result<(), StoreError> {
        if page == 0 || !offset.is_finite() {
            return Ok(());
        }
        let anchor = ScrollAnchor {
            page_index: page,
            offset: offset.max(0.0),
        };
        self.store.set_json(&page_key(SCROLL_NAMESPACE, page), &anchor)
    }

    pub fn restore(&self, page: u32) -> Option<f64> {
        self.store
            .get_json::<ScrollAnchor>(&page_key(SCROLL_NAMESPACE, page))
            .map(|anchor| anchor.offset)
    }

    pub fn clear(&self, page: u32) {
        self.store.remove(&page_key(SCROLL_NAMESPACE, page));
    }

    /// [`restore`](Self::restore) followed by [`clear`](Self::clear).
    pub fn take(&self, page: u32) -> Option<f64> {
        let offset = self.restore(page);
        self.clear(page);
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_restore() {
        let anchors = ScrollAnchorStore::new(SessionStore::new());
        anchors.record(2, 640.0).unwrap();
        anchors.record(2, 1280.0).unwrap();
        assert_eq!(anchors.restore(2), Some(1280.0));
        assert_eq!(anchors.restore(3), None);
    }

    #[test]
    fn test_take_clears_anchor() {
        let anchors = ScrollAnchorStore::new(SessionStore::new());
        anchors.record(2, 300.0).unwrap();
        assert_eq!(anchors.take(2), Some(300.0));
        assert_eq!(anchors.restore(2), None);
    }

    #[test]
    fn test_degenerate_offsets() {
        let anchors = ScrollAnchorStore::new(SessionStore::new());
        anchors.record(1, -25.0).unwrap();
        assert_eq!(anchors.restore(1), Some(0.0));

        anchors.record(1, f64::NAN).unwrap();
        assert_eq!(anchors.restore(1), Some(0.0));

        anchors.record(0, 10.0).unwrap();
        assert_eq!(anchors.restore(0), None);
    }
}
