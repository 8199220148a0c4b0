//! Line-oriented driver over the feed controller and reaction toggle.
//!
//! [`App`] turns parsed [`Command`]s and background events into calls on
//! the engine and into text lines for display. [`run`] multiplexes user
//! input, both event channels and Ctrl-C.

use crate::feed::{
    DisplayStrategy, FeedController, FeedEvent, FeedUpdate, FeedView, NavigationSource,
    PageDecision,
};
use crate::reaction::{
    EntityId, ReactionEvent, ReactionKind, ReactionToggle, ReactionUpdate, ToggleOutcome,
};
use crate::remote::{FeedSource, ReactionService};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;

/// A trade post as listed in the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePost {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub favorite_count: u64,
    /// Whether the current user likes the post. Absent for guests.
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub favorited: bool,
}

impl TradePost {
    fn reaction(&self, kind: ReactionKind) -> (bool, u64) {
        match kind {
            ReactionKind::Like => (self.liked, self.like_count),
            ReactionKind::Favorite => (self.favorited, self.favorite_count),
        }
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Paginate to a page.
    Page(u32),
    /// History traversal back to a page.
    Back(u32),
    /// Refetch the current page.
    Refresh,
    /// Report the scroll offset of the current page.
    Scroll(f64),
    React { kind: ReactionKind, entity: EntityId },
    Login,
    Logout,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0} (type 'help')")]
    Unknown(String),
    #[error("'{command}' expects {expected}")]
    MissingArgument {
        command: &'static str,
        expected: &'static str,
    },
    #[error("Invalid argument for '{command}': {value}")]
    InvalidArgument { command: &'static str, value: String },
}

impl Command {
    pub const HELP: &'static str = "\
commands:
  page N        go to page N
  back N        go back to page N (history)
  refresh       reload the current page
  scroll PX     record the scroll offset of the current page
  like ID       toggle like on a post
  favorite ID   toggle favorite on a post
  login/logout  switch the signed-in state
  quit";

    /// Parse one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();

        let command = match name.to_ascii_lowercase().as_str() {
            "page" | "p" => Command::Page(parse_arg("page", "a page number", arg)?),
            "back" | "b" => Command::Back(parse_arg("back", "a page number", arg)?),
            "refresh" | "r" => Command::Refresh,
            "scroll" => {
                let offset: f64 = parse_arg("scroll", "an offset in pixels", arg)?;
                Command::Scroll(offset)
            }
            "like" => Command::React {
                kind: ReactionKind::Like,
                entity: EntityId(parse_arg("like", "a post id", arg)?),
            },
            "favorite" | "fav" => Command::React {
                kind: ReactionKind::Favorite,
                entity: EntityId(parse_arg("favorite", "a post id", arg)?),
            },
            "login" => Command::Login,
            "logout" => Command::Logout,
            "help" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

fn parse_arg<T: std::str::FromStr>(
    command: &'static str,
    expected: &'static str,
    arg: Option<&str>,
) -> Result<T, CommandError> {
    let value = arg.ok_or(CommandError::MissingArgument { command, expected })?;
    value.parse().map_err(|_| CommandError::InvalidArgument {
        command,
        value: value.to_string(),
    })
}

/// Whether the loop keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Quit,
}

// ============================================================================
// App
// ============================================================================

pub struct App<B>
where
    B: FeedSource<Item = TradePost> + ReactionService,
{
    feed: FeedController<B>,
    reactions: ReactionToggle<B>,
    authenticated: bool,
}

impl<B> App<B>
where
    B: FeedSource<Item = TradePost> + ReactionService,
{
    pub fn new(feed: FeedController<B>, reactions: ReactionToggle<B>, authenticated: bool) -> Self {
        Self {
            feed,
            reactions,
            authenticated,
        }
    }

    pub fn feed(&self) -> &FeedController<B> {
        &self.feed
    }

    pub fn reactions(&self) -> &ReactionToggle<B> {
        &self.reactions
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Load the first page.
    pub fn start(&mut self, out: &mut Vec<String>) {
        let decision = self.feed.navigate(1, NavigationSource::Initial);
        self.render_decision(decision, out);
    }

    pub fn handle_command(&mut self, command: Command, out: &mut Vec<String>) -> Action {
        match command {
            Command::Page(page) => {
                let decision = self.feed.navigate(page, NavigationSource::Explicit);
                self.render_decision(decision, out);
            }
            Command::Back(page) => {
                let decision = self.feed.navigate(page, NavigationSource::History);
                self.render_decision(decision, out);
            }
            Command::Refresh => {
                let decision = self.feed.reload();
                self.render_decision(decision, out);
            }
            Command::Scroll(offset) => {
                if matches!(self.feed.view(), FeedView::Ready { .. }) {
                    self.feed.record_scroll(offset);
                } else {
                    out.push("Nothing displayed to scroll".to_string());
                }
            }
            Command::React { kind, entity } => self.react(entity, kind, out),
            Command::Login => {
                self.authenticated = true;
                out.push("Signed in".to_string());
            }
            Command::Logout => {
                self.authenticated = false;
                out.push("Signed out".to_string());
            }
            Command::Help => out.push(Command::HELP.to_string()),
            Command::Quit => return Action::Quit,
        }
        Action::Continue
    }

    pub fn handle_feed_event(&mut self, event: FeedEvent<TradePost>, out: &mut Vec<String>) {
        match self.feed.handle_event(event) {
            Some(FeedUpdate::Displayed {
                page: _,
                restore_scroll,
            }) => {
                self.hydrate_view();
                self.render_page(out);
                if let Some(offset) = restore_scroll {
                    out.push(format!("(scroll restored to {offset}px)"));
                }
            }
            Some(FeedUpdate::Revalidated { page }) => {
                tracing::debug!(page, "Cached page refreshed in background");
            }
            Some(FeedUpdate::Failed { page, error }) => {
                out.push(format!(
                    "Failed to load page {page}: {error} (type 'refresh' to retry)"
                ));
            }
            None => {}
        }
    }

    pub fn handle_reaction_event(&mut self, event: ReactionEvent, out: &mut Vec<String>) {
        match self.reactions.handle_event(event) {
            Some(ReactionUpdate::Confirmed { key, state }) => {
                let verb = if state.active { "saved" } else { "removed" };
                out.push(format!(
                    "{} on #{} {verb} ({})",
                    key.kind, key.entity, state.count
                ));
            }
            Some(ReactionUpdate::RolledBack { key, state, error }) => {
                out.push(format!(
                    "Could not update {} on #{}: {error} (back to {})",
                    key.kind, key.entity, state.count
                ));
            }
            None => {}
        }
    }

    fn react(&mut self, entity: EntityId, kind: ReactionKind, out: &mut Vec<String>) {
        match self.reactions.toggle(entity, kind, self.authenticated) {
            ToggleOutcome::Started { optimistic, .. } => {
                let mark = if optimistic.active { "+" } else { "-" };
                out.push(format!("{mark}{kind} #{entity} ({})", optimistic.count));
            }
            ToggleOutcome::AlreadyPending => {
                out.push(format!("Still saving the previous {kind} on #{entity}"));
            }
            ToggleOutcome::AuthRequired => {
                out.push(format!("Sign in to {kind} posts (type 'login')"));
            }
        }
    }

    fn render_decision(&mut self, decision: PageDecision, out: &mut Vec<String>) {
        match decision.strategy {
            DisplayStrategy::Ignored => out.push(format!("No such page: {}", decision.page)),
            DisplayStrategy::Fetching => out.push(format!("Loading page {}...", decision.page)),
            DisplayStrategy::Cached | DisplayStrategy::StaleWhileRevalidate => {
                self.hydrate_view();
                self.render_page(out);
                if let Some(offset) = decision.restore_scroll {
                    out.push(format!("(scroll restored to {offset}px)"));
                }
            }
        }
    }

    /// Seed reaction state from the displayed snapshot. Keys the server
    /// confirmed after the snapshot was fetched keep their state.
    fn hydrate_view(&mut self) {
        let Some(as_of) = self.feed.displayed_at() else {
            return;
        };
        for post in self.feed.view().items() {
            for kind in ReactionKind::ALL {
                let (active, count) = post.reaction(kind);
                self.reactions.hydrate_as_of(post.id, kind, active, count, as_of);
            }
        }
    }

    fn render_page(&self, out: &mut Vec<String>) {
        let FeedView::Ready {
            page,
            items,
            total_count,
            stale,
        } = self.feed.view()
        else {
            return;
        };
        let pages = self.feed.page_count().unwrap_or(0);
        let stale = if *stale { ", refreshing" } else { "" };
        out.push(format!("Page {page}/{pages} ({total_count} posts{stale})"));
        if items.is_empty() {
            out.push("  (no posts)".to_string());
        }
        for post in items {
            out.push(self.render_post(post));
        }
    }

    fn render_post(&self, post: &TradePost) -> String {
        let mut line = format!("  #{} {}", post.id, post.title);
        if !post.author.is_empty() {
            line.push_str(&format!(" by {}", post.author));
        }
        for kind in ReactionKind::ALL {
            let (active, count) = self
                .reactions
                .state(post.id, kind)
                .map(|s| (s.active, s.count))
                .unwrap_or_else(|| post.reaction(kind));
            let mark = if active { "*" } else { "" };
            line.push_str(&format!("  {count} {kind}{mark}"));
        }
        line
    }
}

/// Drive the app until `quit`, end of input or Ctrl-C.
pub async fn run<B, R, W>(
    app: &mut App<B>,
    mut feed_rx: mpsc::Receiver<FeedEvent<TradePost>>,
    mut reaction_rx: mpsc::Receiver<ReactionEvent>,
    input: R,
    output: &mut W,
) -> Result<()>
where
    B: FeedSource<Item = TradePost> + ReactionService,
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut out = Vec::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    app.start(&mut out);
    flush(output, &mut out)?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::debug!("Input closed");
                    break;
                };
                match Command::parse(&line) {
                    Ok(Some(command)) => {
                        if app.handle_command(command, &mut out) == Action::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => out.push(e.to_string()),
                }
            }
            Some(event) = feed_rx.recv() => app.handle_feed_event(event, &mut out),
            Some(event) = reaction_rx.recv() => app.handle_reaction_event(event, &mut out),
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted");
                break;
            }
        }
        flush(output, &mut out)?;
    }

    flush(output, &mut out)?;
    Ok(())
}

fn flush<W: Write>(output: &mut W, lines: &mut Vec<String>) -> Result<()> {
    for line in lines.drain(..) {
        writeln!(output, "{line}")?;
    }
    output.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::feed::FeedOptions;
    use crate::reaction::ReactionGate;
    use crate::remote::{PageData, SourceError};
    use crate::session::SessionStore;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_parse_navigation_commands() {
        assert_eq!(Command::parse("page 3"), Ok(Some(Command::Page(3))));
        assert_eq!(Command::parse("  b 2 "), Ok(Some(Command::Back(2))));
        assert_eq!(Command::parse("refresh"), Ok(Some(Command::Refresh)));
        assert_eq!(Command::parse("scroll 120.5"), Ok(Some(Command::Scroll(120.5))));
        assert_eq!(Command::parse(""), Ok(None));
    }

    #[test]
    fn test_parse_reaction_commands() {
        assert_eq!(
            Command::parse("fav 42"),
            Ok(Some(Command::React {
                kind: ReactionKind::Favorite,
                entity: EntityId(42)
            }))
        );
        assert_eq!(
            Command::parse("LIKE 7"),
            Ok(Some(Command::React {
                kind: ReactionKind::Like,
                entity: EntityId(7)
            }))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Command::parse("page"),
            Err(CommandError::MissingArgument {
                command: "page",
                expected: "a page number"
            })
        );
        assert_eq!(
            Command::parse("page -1"),
            Err(CommandError::InvalidArgument {
                command: "page",
                value: "-1".to_string()
            })
        );
        assert!(matches!(Command::parse("dance"), Err(CommandError::Unknown(_))));
    }

    struct Backend;

    impl FeedSource for Backend {
        type Item = TradePost;

        async fn fetch_page(&self, limit: u32, offset: u64) -> Result<PageData<TradePost>, SourceError> {
            let items = (offset..offset + u64::from(limit))
                .map(|i| TradePost {
                    id: EntityId(i as i64 + 1),
                    title: format!("Deck {}", i + 1),
                    author: "ash".to_string(),
                    like_count: 3,
                    favorite_count: 1,
                    liked: false,
                    favorited: true,
                })
                .collect();
            Ok(PageData {
                items,
                total_count: 5,
            })
        }
    }

    impl ReactionService for Backend {
        async fn apply(&self, _: EntityId, _: ReactionKind) -> Result<u64, SourceError> {
            Ok(4)
        }

        async fn reverse(&self, _: EntityId, _: ReactionKind) -> Result<u64, SourceError> {
            Ok(0)
        }

        async fn read_count(&self, _: EntityId, _: ReactionKind) -> Result<u64, SourceError> {
            Ok(9)
        }
    }

    fn app() -> (
        App<Backend>,
        mpsc::Receiver<FeedEvent<TradePost>>,
        mpsc::Receiver<ReactionEvent>,
    ) {
        let backend = Arc::new(Backend);
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (reaction_tx, reaction_rx) = mpsc::channel(16);
        let options = FeedOptions {
            page_size: 2,
            ..FeedOptions::default()
        };
        let feed = FeedController::new(
            Arc::clone(&backend),
            SessionStore::new(),
            Arc::new(clock.clone()),
            options,
            feed_tx,
        );
        let reactions = ReactionToggle::new(backend, ReactionGate::default(), reaction_tx)
            .with_clock(Arc::new(clock));
        (App::new(feed, reactions, false), feed_rx, reaction_rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_page_renders_with_reaction_counts() {
        let (mut app, mut feed_rx, _reaction_rx) = app();
        let mut out = Vec::new();

        app.start(&mut out);
        assert_eq!(out, vec!["Loading page 1...".to_string()]);
        out.clear();

        let event = feed_rx.recv().await.unwrap();
        app.handle_feed_event(event, &mut out);
        assert_eq!(
            out,
            vec![
                "Page 1/3 (5 posts)".to_string(),
                "  #1 Deck 1 by ash  3 like  1 favorite*".to_string(),
                "  #2 Deck 2 by ash  3 like  1 favorite*".to_string(),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_favorite_prompts_sign_in() {
        let (mut app, mut feed_rx, _reaction_rx) = app();
        let mut out = Vec::new();
        app.start(&mut out);
        let event = feed_rx.recv().await.unwrap();
        app.handle_feed_event(event, &mut out);
        out.clear();

        let command = Command::React {
            kind: ReactionKind::Favorite,
            entity: EntityId(1),
        };
        app.handle_command(command, &mut out);
        assert_eq!(out, vec!["Sign in to favorite posts (type 'login')".to_string()]);

        out.clear();
        app.handle_command(Command::Login, &mut out);
        app.handle_command(command, &mut out);
        assert_eq!(out, vec!["Signed in".to_string(), "-favorite #1 (0)".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_like_reconciles_count() {
        let (mut app, mut feed_rx, mut reaction_rx) = app();
        let mut out = Vec::new();
        app.start(&mut out);
        let event = feed_rx.recv().await.unwrap();
        app.handle_feed_event(event, &mut out);
        out.clear();

        app.handle_command(
            Command::React {
                kind: ReactionKind::Like,
                entity: EntityId(2),
            },
            &mut out,
        );
        while let Some(event) = reaction_rx.recv().await {
            app.handle_reaction_event(event, &mut out);
            if !app.reactions().state(EntityId(2), ReactionKind::Like).unwrap().is_pending() {
                break;
            }
        }
        assert_eq!(
            out,
            vec!["+like #2 (4)".to_string(), "like on #2 saved (9)".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_revisit_keeps_confirmed_like() {
        let (mut app, mut feed_rx, mut reaction_rx) = app();
        let mut out = Vec::new();
        app.start(&mut out);
        let event = feed_rx.recv().await.unwrap();
        app.handle_feed_event(event, &mut out);

        let like = Command::React {
            kind: ReactionKind::Like,
            entity: EntityId(2),
        };
        app.handle_command(like, &mut out);
        while app.reactions().pending_count() > 0 {
            let event = reaction_rx.recv().await.unwrap();
            app.handle_reaction_event(event, &mut out);
        }

        app.handle_command(Command::Page(2), &mut out);
        let event = feed_rx.recv().await.unwrap();
        app.handle_feed_event(event, &mut out);
        app.handle_command(Command::Page(1), &mut out);

        let state = app.reactions().state(EntityId(2), ReactionKind::Like).unwrap();
        assert_eq!((state.active, state.count), (true, 9));

        out.clear();
        app.handle_command(like, &mut out);
        assert_eq!(out, vec!["-like #2 (8)".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_quits_on_command() {
        let (mut app, feed_rx, reaction_rx) = app();
        let input: &[u8] = b"help\nquit\npage 2\n";
        let mut output = Vec::new();

        run(&mut app, feed_rx, reaction_rx, input, &mut output).await.unwrap();

        let text = String::from_utf8(output).unwrap();
        assert!(text.starts_with("Loading page 1..."));
        assert!(text.contains("commands:"));
        assert!(!text.contains("Loading page 2"));
    }
}
