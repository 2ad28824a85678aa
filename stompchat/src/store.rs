//! Per-session message store: history window, roster, and `has_more`.
//!
//! [`HistoryWindow`] is the plain data structure. [`SessionStore`] wraps it
//! for sharing between the session driver (the only writer) and readers,
//! and announces every mutation through a revision counter.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard};
use tokio::sync::watch;

use stompchat_proto::message::{ChatMessage, MessageKey, MessagePage};

use crate::pagination::{FetchOutcome, SkipReason};

/// Ordered chat history and roster for one session scope.
///
/// No two entries share a server number. Live messages without one are
/// kept as delivered; snapshots and pages merge them by [`MessageKey`].
#[derive(Debug, Clone, Default)]
pub struct HistoryWindow {
    messages: Vec<ChatMessage>,
    keys: HashSet<MessageKey>,
    roster: Vec<String>,
    has_more: bool,
    /// Bumped on every snapshot replace.
    epoch: u64,
}

impl HistoryWindow {
    /// Creates an empty window with `has_more = false`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a live message. Returns `false` if a message with the same
    /// server number is already present.
    ///
    /// Two sends of the same text look alike without a number, so those are
    /// always appended.
    pub fn append_incremental(&mut self, message: ChatMessage) -> bool {
        let key = message.key();
        let numbered = matches!(key, MessageKey::Numbered(_));
        if !self.keys.insert(key) && numbered {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Replace the whole window with a snapshot.
    ///
    /// Duplicates inside the snapshot keep their first occurrence.
    pub fn replace_snapshot(&mut self, messages: Vec<ChatMessage>, has_more: bool) {
        self.messages.clear();
        self.keys.clear();
        for message in messages {
            if self.keys.insert(message.key()) {
                self.messages.push(message);
            }
        }
        self.has_more = has_more;
        self.epoch += 1;
    }

    /// Splice an older page in front of the window. Returns how many
    /// messages were added.
    pub fn prepend_page(&mut self, messages: Vec<ChatMessage>, has_more: bool) -> usize {
        let mut fresh = Vec::with_capacity(messages.len() + self.messages.len());
        for message in messages {
            if self.keys.insert(message.key()) {
                fresh.push(message);
            }
        }
        let added = fresh.len();
        fresh.append(&mut self.messages);
        self.messages = fresh;
        self.has_more = has_more;
        added
    }

    /// Replace the roster wholesale.
    pub fn replace_roster(&mut self, ids: Vec<String>) {
        self.roster = ids;
    }

    /// Messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Active participant ids, in server order.
    #[must_use]
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// Whether the server reported older history.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.has_more
    }

    /// Server number of the oldest entry, the pagination anchor.
    #[must_use]
    pub fn anchor(&self) -> Option<i64> {
        self.messages.first().and_then(|m| m.no)
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the window holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Snapshot generation; changes whenever the window is replaced.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Shared handle to one session's [`HistoryWindow`].
///
/// Cloning is cheap. A fresh store is created for every activation.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    window: RwLock<HistoryWindow>,
    revision: watch::Sender<u64>,
    fetch_in_flight: AtomicBool,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    /// Creates an empty store at revision 0.
    #[must_use]
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                window: RwLock::new(HistoryWindow::new()),
                revision,
                fetch_in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Read access to the window. Do not hold the guard across an `.await`.
    pub fn read(&self) -> RwLockReadGuard<'_, HistoryWindow> {
        self.inner.window.read()
    }

    /// Copy of the current messages.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.read().messages().to_vec()
    }

    /// Copy of the current roster.
    #[must_use]
    pub fn roster(&self) -> Vec<String> {
        self.read().roster().to_vec()
    }

    /// Whether older history exists on the server.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.read().has_more()
    }

    /// Current revision.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.inner.revision.borrow()
    }

    /// Receiver that wakes on every mutation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Mutate the window and bump the revision.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut HistoryWindow) -> R) -> R {
        let result = f(&mut self.inner.window.write());
        self.inner.revision.send_modify(|r| *r += 1);
        result
    }

    /// Claim the single pagination slot for this store.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when a fetch must not start.
    pub fn try_begin_fetch(&self) -> Result<FetchTicket, SkipReason> {
        let (anchor, epoch) = {
            let window = self.read();
            if !window.has_more() {
                return Err(SkipReason::NoMoreHistory);
            }
            if window.is_empty() {
                return Err(SkipReason::EmptyWindow);
            }
            let anchor = window.anchor().ok_or(SkipReason::NoAnchor)?;
            (anchor, window.epoch())
        };
        if self
            .inner
            .fetch_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SkipReason::AlreadyInFlight);
        }
        Ok(FetchTicket {
            anchor,
            epoch,
            store: Arc::clone(&self.inner),
        })
    }

    /// Whether a pagination fetch currently holds the slot.
    #[must_use]
    pub fn fetch_in_flight(&self) -> bool {
        self.inner.fetch_in_flight.load(Ordering::Acquire)
    }

    /// Merge a fetched page if the window has not been replaced since the
    /// ticket was issued.
    pub(crate) fn apply_page(&self, ticket: &FetchTicket, page: MessagePage) -> FetchOutcome {
        if !Arc::ptr_eq(&ticket.store, &self.inner) {
            return FetchOutcome::Discarded;
        }
        let has_more = page.has_more();
        self.update(|window| {
            if window.epoch() != ticket.epoch {
                return FetchOutcome::Discarded;
            }
            let added = window.prepend_page(page.messages, has_more);
            FetchOutcome::Applied { added, has_more }
        })
    }
}

/// Exclusive right to run one pagination fetch. Dropping it frees the slot.
#[derive(Debug)]
pub struct FetchTicket {
    anchor: i64,
    epoch: u64,
    store: Arc<StoreInner>,
}

impl FetchTicket {
    /// Server number of the oldest entry when the fetch began.
    #[must_use]
    pub const fn anchor(&self) -> i64 {
        self.anchor
    }
}

impl Drop for FetchTicket {
    fn drop(&mut self) {
        self.store.fetch_in_flight.store(false, Ordering::Release);
    }
}
