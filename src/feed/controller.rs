use super::cache::{FeedPageSnapshot, PagedFeedCache, DEFAULT_TTL};
use super::navigation::NavigationIntentTracker;
use super::scroll::ScrollAnchorStore;
use super::slot::{RequestSlot, SlotTicket};
use crate::clock::Clock;
use crate::remote::{FeedSource, PageData, SourceError};
use crate::session::SessionStore;
use crate::util::catch_task_panic;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// How a page transition was initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationSource {
    /// First load of the feed.
    Initial,
    /// In-app pagination or a link.
    Explicit,
    /// Browser-style history traversal (back/forward buttons).
    History,
}

#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// Entries per page, used as the source's `limit`.
    pub page_size: u32,
    /// Age at which a cached page stops being fresh.
    pub ttl: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            ttl: DEFAULT_TTL,
        }
    }
}

/// What the feed currently shows.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedView<T> {
    /// Nothing requested yet.
    Idle,
    Loading {
        page: u32,
    },
    Ready {
        page: u32,
        items: Vec<T>,
        total_count: u64,
        /// Served from a snapshot past its TTL.
        stale: bool,
    },
    Failed {
        page: u32,
        error: String,
    },
}

impl<T> FeedView<T> {
    pub fn page(&self) -> Option<u32> {
        match self {
            FeedView::Idle => None,
            FeedView::Loading { page }
            | FeedView::Ready { page, .. }
            | FeedView::Failed { page, .. } => Some(*page),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, FeedView::Loading { .. })
    }

    pub fn items(&self) -> &[T] {
        match self {
            FeedView::Ready { items, .. } => items,
            _ => &[],
        }
    }
}

/// Which branch of the display algorithm a transition took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayStrategy {
    /// Invalid page; nothing changed.
    Ignored,
    /// A fresh snapshot was displayed without a request.
    Cached,
    /// A stale snapshot was displayed and one background refetch scheduled.
    StaleWhileRevalidate,
    /// A loading state is shown while a foreground fetch runs.
    Fetching,
}

/// Outcome of a navigation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageDecision {
    pub page: u32,
    pub strategy: DisplayStrategy,
    /// Scroll offset to apply now that the page's items are displayed.
    pub restore_scroll: Option<f64>,
}

impl PageDecision {
    fn ignored(page: u32) -> Self {
        Self {
            page,
            strategy: DisplayStrategy::Ignored,
            restore_scroll: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPurpose {
    /// Result is displayed when it lands.
    Foreground,
    /// Result only refreshes the cache.
    Revalidate,
}

/// Completion of a fetch task, delivered back to the controller's owner.
#[derive(Debug)]
pub struct FeedEvent<T> {
    pub page: u32,
    pub ticket: SlotTicket,
    pub purpose: FetchPurpose,
    pub result: Result<PageData<T>, SourceError>,
}

/// Effect of an applied [`FeedEvent`] that the owner should surface.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedUpdate {
    /// A foreground fetch landed and its page is displayed.
    Displayed {
        page: u32,
        restore_scroll: Option<f64>,
    },
    /// A background refetch replaced the cached snapshot.
    Revalidated { page: u32 },
    /// A foreground fetch failed. `error` is user-facing.
    Failed { page: u32, error: String },
}

struct ForegroundFetch {
    page: u32,
    restore_scroll: bool,
}

/// Decides what the feed shows for a page and keeps the cache in sync.
///
/// Owned by a single event loop. Fetches run as spawned tasks that report
/// through the `events` channel; the owner passes each received event to
/// [`handle_event`](Self::handle_event).
pub struct FeedController<S: FeedSource> {
    source: Arc<S>,
    cache: PagedFeedCache<S::Item>,
    navigation: NavigationIntentTracker,
    scroll: ScrollAnchorStore,
    page_size: u32,
    foreground: RequestSlot,
    foreground_fetch: Option<ForegroundFetch>,
    revalidations: HashMap<u32, RequestSlot>,
    current_page: Option<u32>,
    view: FeedView<S::Item>,
    displayed_at: Option<DateTime<Utc>>,
    events: mpsc::Sender<FeedEvent<S::Item>>,
}

impl<S: FeedSource> FeedController<S> {
    pub fn new(
        source: Arc<S>,
        session: SessionStore,
        clock: Arc<dyn Clock>,
        options: FeedOptions,
        events: mpsc::Sender<FeedEvent<S::Item>>,
    ) -> Self {
        Self {
            source,
            cache: PagedFeedCache::with_ttl(session.clone(), clock, options.ttl),
            navigation: NavigationIntentTracker::new(session.clone()),
            scroll: ScrollAnchorStore::new(session),
            page_size: options.page_size.max(1),
            foreground: RequestSlot::new(),
            foreground_fetch: None,
            revalidations: HashMap::new(),
            current_page: None,
            view: FeedView::Idle,
            displayed_at: None,
            events,
        }
    }

    pub fn view(&self) -> &FeedView<S::Item> {
        &self.view
    }

    /// Fetch time of the snapshot behind a `Ready` view.
    pub fn displayed_at(&self) -> Option<DateTime<Utc>> {
        match self.view {
            FeedView::Ready { .. } => self.displayed_at,
            _ => None,
        }
    }

    pub fn current_page(&self) -> Option<u32> {
        self.current_page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn cache(&self) -> &PagedFeedCache<S::Item> {
        &self.cache
    }

    /// Number of pages implied by the displayed total count.
    pub fn page_count(&self) -> Option<u64> {
        match &self.view {
            FeedView::Ready { total_count, .. } => {
                Some(total_count.div_ceil(u64::from(self.page_size)))
            }
            _ => None,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.foreground.in_flight()
    }

    pub fn revalidations_in_flight(&self) -> usize {
        self.revalidations
            .values()
            .filter(|slot| slot.in_flight())
            .count()
    }

    /// Handle a page-change event.
    ///
    /// A `History` transition marks the target as backward before it is
    /// classified, so a stale snapshot may be shown while it refreshes.
    pub fn navigate(&mut self, page: u32, source: NavigationSource) -> PageDecision {
        if page == 0 {
            tracing::debug!(?source, "Ignoring navigation to page 0");
            return PageDecision::ignored(page);
        }
        if source == NavigationSource::History {
            self.navigation.mark_backward(page);
        }
        self.show(page)
    }

    /// Fetch the current page from the source regardless of the cache.
    ///
    /// This is the manual retry path after a failed load.
    pub fn reload(&mut self) -> PageDecision {
        let Some(page) = self.current_page else {
            return PageDecision::ignored(0);
        };
        self.start_foreground(page, false);
        PageDecision {
            page,
            strategy: DisplayStrategy::Fetching,
            restore_scroll: None,
        }
    }

    /// Record the scroll offset of the displayed page.
    pub fn record_scroll(&self, offset: f64) {
        let FeedView::Ready { page, .. } = &self.view else {
            return;
        };
        if let Err(e) = self.scroll.record(*page, offset) {
            tracing::warn!(page, error = %e, "Failed to record scroll anchor");
        }
    }

    /// Apply a fetch completion. Superseded results are dropped.
    pub fn handle_event(&mut self, event: FeedEvent<S::Item>) -> Option<FeedUpdate> {
        let FeedEvent {
            page,
            ticket,
            purpose,
            result,
        } = event;
        match purpose {
            FetchPurpose::Foreground => self.complete_foreground(page, ticket, result),
            FetchPurpose::Revalidate => self.complete_revalidation(page, ticket, result),
        }
    }

    fn show(&mut self, page: u32) -> PageDecision {
        let intent = self.navigation.consume(page);
        self.current_page = Some(page);

        match self.cache.get(page) {
            Some(snapshot) if intent.is_backward => {
                self.cancel_foreground();
                let fresh = self.cache.is_fresh(&snapshot);
                self.display(snapshot, !fresh);
                // Items are displayed, so the anchor has a target
                let restore_scroll = self.scroll.take(page);
                let strategy = if fresh {
                    DisplayStrategy::Cached
                } else {
                    self.spawn_revalidation(page);
                    DisplayStrategy::StaleWhileRevalidate
                };
                tracing::debug!(page, fresh, ?restore_scroll, "Backward navigation served from cache");
                PageDecision {
                    page,
                    strategy,
                    restore_scroll,
                }
            }
            Some(snapshot) if self.cache.is_fresh(&snapshot) => {
                self.cancel_foreground();
                self.scroll.clear(page);
                self.display(snapshot, false);
                tracing::debug!(page, "Cache hit");
                PageDecision {
                    page,
                    strategy: DisplayStrategy::Cached,
                    restore_scroll: None,
                }
            }
            _ => {
                self.cache.evict_if_stale(page);
                if !intent.is_backward {
                    self.scroll.clear(page);
                }
                self.start_foreground(page, intent.is_backward);
                PageDecision {
                    page,
                    strategy: DisplayStrategy::Fetching,
                    restore_scroll: None,
                }
            }
        }
    }

    fn display(&mut self, snapshot: FeedPageSnapshot<S::Item>, stale: bool) {
        let page = snapshot.page_index();
        let total_count = snapshot.total_count();
        self.displayed_at = Some(snapshot.fetched_at());
        self.view = FeedView::Ready {
            page,
            items: snapshot.into_items(),
            total_count,
            stale,
        };
    }

    fn cancel_foreground(&mut self) {
        if self.foreground.cancel() {
            self.foreground_fetch = None;
        }
    }

    fn offset_of(&self, page: u32) -> u64 {
        u64::from(page.saturating_sub(1)) * u64::from(self.page_size)
    }

    fn start_foreground(&mut self, page: u32, restore_scroll: bool) {
        // At most one fetch per page: a foreground fetch supersedes a refresh
        if let Some(mut slot) = self.revalidations.remove(&page) {
            slot.cancel();
        }

        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        let limit = self.page_size;
        let offset = self.offset_of(page);

        self.foreground_fetch = Some(ForegroundFetch {
            page,
            restore_scroll,
        });
        self.view = FeedView::Loading { page };
        let ticket = self.foreground.start(move |ticket| {
            run_fetch(source, events, page, limit, offset, ticket, FetchPurpose::Foreground)
        });
        tracing::debug!(page, generation = ticket.generation(), "Started feed fetch");
    }

    fn spawn_revalidation(&mut self, page: u32) -> bool {
        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        let limit = self.page_size;
        let offset = self.offset_of(page);

        let slot = self.revalidations.entry(page).or_default();
        if slot.in_flight() {
            tracing::debug!(page, "Background refresh already in flight");
            return false;
        }
        let ticket = slot.start(move |ticket| {
            run_fetch(source, events, page, limit, offset, ticket, FetchPurpose::Revalidate)
        });
        tracing::debug!(page, generation = ticket.generation(), "Scheduled background refresh");
        true
    }

    fn complete_foreground(
        &mut self,
        page: u32,
        ticket: SlotTicket,
        result: Result<PageData<S::Item>, SourceError>,
    ) -> Option<FeedUpdate> {
        if !self.foreground.finish(ticket) {
            tracing::debug!(
                page,
                generation = ticket.generation(),
                "Ignoring superseded feed fetch"
            );
            return None;
        }
        let restore = self
            .foreground_fetch
            .take()
            .is_some_and(|fetch| fetch.page == page && fetch.restore_scroll);

        match result {
            Ok(data) => {
                let snapshot =
                    FeedPageSnapshot::new(page, data.items, data.total_count, self.cache.now());
                if let Err(e) = self.cache.put(&snapshot) {
                    tracing::warn!(page, error = %e, "Failed to cache feed page");
                }
                tracing::debug!(
                    page,
                    items = snapshot.items().len(),
                    total = snapshot.total_count(),
                    "Feed page loaded"
                );
                self.display(snapshot, false);
                let restore_scroll = if restore { self.scroll.take(page) } else { None };
                Some(FeedUpdate::Displayed {
                    page,
                    restore_scroll,
                })
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "Feed fetch failed");
                let error = e.to_string();
                self.view = FeedView::Failed {
                    page,
                    error: error.clone(),
                };
                Some(FeedUpdate::Failed { page, error })
            }
        }
    }

    fn complete_revalidation(
        &mut self,
        page: u32,
        ticket: SlotTicket,
        result: Result<PageData<S::Item>, SourceError>,
    ) -> Option<FeedUpdate> {
        let current = self
            .revalidations
            .get_mut(&page)
            .is_some_and(|slot| slot.finish(ticket));
        if !current {
            tracing::debug!(
                page,
                generation = ticket.generation(),
                "Ignoring superseded background refresh"
            );
            return None;
        }
        self.revalidations.remove(&page);

        match result {
            Ok(data) => {
                let snapshot =
                    FeedPageSnapshot::new(page, data.items, data.total_count, self.cache.now());
                if let Err(e) = self.cache.put(&snapshot) {
                    tracing::warn!(page, error = %e, "Failed to cache refreshed page");
                    return None;
                }
                tracing::debug!(page, "Background refresh replaced snapshot");
                Some(FeedUpdate::Revalidated { page })
            }
            Err(e) => {
                tracing::warn!(page, error = %e, "Background refresh failed, keeping stale snapshot");
                None
            }
        }
    }
}

async fn run_fetch<S: FeedSource>(
    source: Arc<S>,
    events: mpsc::Sender<FeedEvent<S::Item>>,
    page: u32,
    limit: u32,
    offset: u64,
    ticket: SlotTicket,
    purpose: FetchPurpose,
) {
    let result = match catch_task_panic(source.fetch_page(limit, offset)).await {
        Ok(result) => result,
        Err(panic_msg) => {
            tracing::error!(task = "feed_fetch", page, error = %panic_msg, "Background task panicked");
            Err(SourceError::Unavailable(format!("fetch task panicked: {panic_msg}")))
        }
    };

    let event = FeedEvent {
        page,
        ticket,
        purpose,
        result,
    };
    if let Err(e) = events.send(event).await {
        tracing::warn!(error = %e, page, "Feed event send failed (receiver dropped)");
    }
}
