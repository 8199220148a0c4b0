use super::{EntityId, ReactionGate, ReactionKind};
use crate::clock::{Clock, SystemClock};
use crate::remote::{ReactionService, SourceError};
use crate::util::catch_task_panic;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Wait between a confirmed mutation and the count read that reconciles it,
/// so the server-side aggregate has settled.
pub const DEFAULT_RECONCILE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactionKey {
    pub entity: EntityId,
    pub kind: ReactionKind,
}

/// Where a key is in the toggle protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReactionPhase {
    #[default]
    Idle,
    /// Mutation request outstanding.
    Pending,
    /// Mutation confirmed, count read outstanding.
    Reconciling,
}

/// The current user's relation to one entity for one reaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReactionState {
    pub active: bool,
    pub count: u64,
    phase: ReactionPhase,
}

impl ReactionState {
    pub fn new(active: bool, count: u64) -> Self {
        Self {
            active,
            count,
            phase: ReactionPhase::Idle,
        }
    }

    pub fn phase(&self) -> ReactionPhase {
        self.phase
    }

    /// True from the toggle until the protocol returns to idle.
    pub fn is_pending(&self) -> bool {
        self.phase != ReactionPhase::Idle
    }
}

/// Service operation chosen once, at toggle time, from the pre-toggle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionAction {
    Apply,
    Reverse,
}

impl ReactionAction {
    fn for_current(active: bool) -> Self {
        if active {
            ReactionAction::Reverse
        } else {
            ReactionAction::Apply
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// Optimistic state applied and the service call spawned.
    Started {
        action: ReactionAction,
        optimistic: ReactionState,
    },
    /// A mutation for this key is still outstanding; nothing changed.
    AlreadyPending,
    /// The gate denied the attempt; prompt for sign-in.
    AuthRequired,
}

/// Progress of a spawned toggle, delivered back to the toggle's owner.
#[derive(Debug)]
pub enum ReactionEvent {
    /// The service confirmed the mutation.
    Applied { key: ReactionKey, reported_count: u64 },
    /// The reconciliation read finished. `None` when it failed.
    Reconciled { key: ReactionKey, count: Option<u64> },
    /// The mutation failed.
    Failed { key: ReactionKey, error: String },
}

/// Effect of an applied [`ReactionEvent`] that the owner should surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionUpdate {
    Confirmed {
        key: ReactionKey,
        state: ReactionState,
    },
    /// Local state was restored to its pre-toggle value. `error` is
    /// user-facing.
    RolledBack {
        key: ReactionKey,
        state: ReactionState,
        error: String,
    },
}

#[derive(Debug, Default)]
struct Entry {
    state: ReactionState,
    /// Pre-toggle `(active, count)` while a mutation is outstanding.
    rollback: Option<(bool, u64)>,
    /// When the server last confirmed a change to this key.
    confirmed_at: Option<DateTime<Utc>>,
}

/// Optimistic reaction state for every rendered entity.
///
/// Owned by a single event loop, like the feed controller. `toggle`
/// updates local state synchronously; the service call runs in a spawned
/// task whose [`ReactionEvent`]s the owner feeds to
/// [`handle_event`](Self::handle_event).
pub struct ReactionToggle<R: ReactionService> {
    service: Arc<R>,
    gate: ReactionGate,
    reconcile_delay: Duration,
    clock: Arc<dyn Clock>,
    entries: HashMap<ReactionKey, Entry>,
    events: mpsc::Sender<ReactionEvent>,
}

impl<R: ReactionService> ReactionToggle<R> {
    pub fn new(service: Arc<R>, gate: ReactionGate, events: mpsc::Sender<ReactionEvent>) -> Self {
        Self {
            service,
            gate,
            reconcile_delay: DEFAULT_RECONCILE_DELAY,
            clock: Arc::new(SystemClock),
            entries: HashMap::new(),
            events,
        }
    }

    pub fn with_reconcile_delay(mut self, delay: Duration) -> Self {
        self.reconcile_delay = delay;
        self
    }

    /// Clock used to timestamp confirmations.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn gate(&self) -> &ReactionGate {
        &self.gate
    }

    /// Load server-reported state for a rendered entity.
    ///
    /// Ignored while a mutation for the key is outstanding, so a re-render
    /// cannot clobber the optimistic value.
    pub fn hydrate(&mut self, entity: EntityId, kind: ReactionKind, active: bool, count: u64) {
        let entry = self.entries.entry(ReactionKey { entity, kind }).or_default();
        if entry.state.is_pending() {
            tracing::debug!(%entity, %kind, "Skipping hydration while toggle is pending");
            return;
        }
        entry.state = ReactionState::new(active, count);
    }

    /// Load state captured by the server at `as_of`, such as a cached page.
    ///
    /// Like [`hydrate`](Self::hydrate), but data no newer than the key's
    /// last confirmed toggle is ignored.
    pub fn hydrate_as_of(
        &mut self,
        entity: EntityId,
        kind: ReactionKind,
        active: bool,
        count: u64,
        as_of: DateTime<Utc>,
    ) {
        let outdated = self
            .entries
            .get(&ReactionKey { entity, kind })
            .and_then(|entry| entry.confirmed_at)
            .is_some_and(|confirmed_at| as_of <= confirmed_at);
        if outdated {
            tracing::debug!(%entity, %kind, %as_of, "Skipping hydration from data older than last confirmation");
            return;
        }
        self.hydrate(entity, kind, active, count);
    }

    pub fn state(&self, entity: EntityId, kind: ReactionKind) -> Option<ReactionState> {
        self.entries
            .get(&ReactionKey { entity, kind })
            .map(|entry| entry.state)
    }

    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state.is_pending())
            .count()
    }

    /// Flip the reaction for `(entity, kind)`.
    ///
    /// An entity that was never hydrated starts from inactive with count 0;
    /// reconciliation corrects the count.
    pub fn toggle(
        &mut self,
        entity: EntityId,
        kind: ReactionKind,
        is_authenticated: bool,
    ) -> ToggleOutcome {
        if !self.gate.can_attempt(kind, is_authenticated) {
            tracing::debug!(%entity, %kind, "Reaction requires sign-in");
            return ToggleOutcome::AuthRequired;
        }

        let key = ReactionKey { entity, kind };
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        let delay = self.reconcile_delay;

        let entry = self.entries.entry(key).or_default();
        if entry.state.is_pending() {
            tracing::debug!(%entity, %kind, "Ignoring toggle while previous one is pending");
            return ToggleOutcome::AlreadyPending;
        }

        let action = ReactionAction::for_current(entry.state.active);
        entry.rollback = Some((entry.state.active, entry.state.count));
        entry.state.active = !entry.state.active;
        entry.state.count = match action {
            ReactionAction::Apply => entry.state.count.saturating_add(1),
            ReactionAction::Reverse => entry.state.count.saturating_sub(1),
        };
        entry.state.phase = ReactionPhase::Pending;
        let optimistic = entry.state;

        tracing::debug!(%entity, %kind, ?action, count = optimistic.count, "Optimistic reaction applied");
        tokio::spawn(run_toggle(service, events, key, action, delay));

        ToggleOutcome::Started { action, optimistic }
    }

    /// Apply a toggle's progress event.
    pub fn handle_event(&mut self, event: ReactionEvent) -> Option<ReactionUpdate> {
        match event {
            ReactionEvent::Applied {
                key,
                reported_count,
            } => {
                let entry = self.entries.get_mut(&key)?;
                if entry.state.phase == ReactionPhase::Pending {
                    entry.state.phase = ReactionPhase::Reconciling;
                    // The server confirmed the relation; nothing to undo now
                    entry.rollback = None;
                }
                tracing::debug!(entity = %key.entity, kind = %key.kind, reported_count, "Reaction confirmed, reconciling");
                None
            }
            ReactionEvent::Reconciled { key, count } => {
                let entry = self.entries.get_mut(&key)?;
                if !entry.state.is_pending() {
                    return None;
                }
                if let Some(count) = count {
                    entry.state.count = count;
                }
                entry.state.phase = ReactionPhase::Idle;
                entry.rollback = None;
                entry.confirmed_at = Some(self.clock.now());
                Some(ReactionUpdate::Confirmed {
                    key,
                    state: entry.state,
                })
            }
            ReactionEvent::Failed { key, error } => {
                let entry = self.entries.get_mut(&key)?;
                if !entry.state.is_pending() {
                    return None;
                }
                if let Some((active, count)) = entry.rollback.take() {
                    entry.state.active = active;
                    entry.state.count = count;
                }
                entry.state.phase = ReactionPhase::Idle;
                tracing::warn!(entity = %key.entity, kind = %key.kind, error = %error, "Reaction failed, rolling back");
                Some(ReactionUpdate::RolledBack {
                    key,
                    state: entry.state,
                    error,
                })
            }
        }
    }
}

/// Mutation, then delayed reconciliation. Sends exactly one terminal event
/// (`Reconciled` or `Failed`), including when the service panics.
async fn run_toggle<R: ReactionService>(
    service: Arc<R>,
    events: mpsc::Sender<ReactionEvent>,
    key: ReactionKey,
    action: ReactionAction,
    reconcile_delay: Duration,
) {
    let mutation = catch_task_panic(async {
        match action {
            ReactionAction::Apply => service.apply(key.entity, key.kind).await,
            ReactionAction::Reverse => service.reverse(key.entity, key.kind).await,
        }
    })
    .await
    .unwrap_or_else(|panic_msg| {
        tracing::error!(task = "reaction_toggle", entity = %key.entity, error = %panic_msg, "Background task panicked");
        Err(SourceError::Unavailable("internal error".to_string()))
    });

    let reported_count = match mutation {
        Ok(count) => count,
        Err(e) => {
            send(
                &events,
                ReactionEvent::Failed {
                    key,
                    error: e.to_string(),
                },
            )
            .await;
            return;
        }
    };
    send(
        &events,
        ReactionEvent::Applied {
            key,
            reported_count,
        },
    )
    .await;

    tokio::time::sleep(reconcile_delay).await;

    let count = match catch_task_panic(service.read_count(key.entity, key.kind)).await {
        Ok(Ok(count)) => Some(count),
        Ok(Err(e)) => {
            tracing::warn!(entity = %key.entity, kind = %key.kind, error = %e, "Reconciliation read failed, keeping local count");
            None
        }
        Err(panic_msg) => {
            tracing::error!(task = "reaction_reconcile", entity = %key.entity, error = %panic_msg, "Background task panicked");
            None
        }
    };
    send(&events, ReactionEvent::Reconciled { key, count }).await;
}

async fn send(events: &mpsc::Sender<ReactionEvent>, event: ReactionEvent) {
    if let Err(e) = events.send(event).await {
        tracing::warn!(error = %e, "Reaction event send failed (receiver dropped)");
    }
}
