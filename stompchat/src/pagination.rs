//! On-demand retrieval of older history.
//!
//! [`PaginationFetcher::fetch_older`] claims the store's single fetch slot,
//! requests the page before the window's oldest entry from a
//! [`HistoryBackend`], and hands the page to the session driver, which
//! merges it unless a snapshot replaced the window in the meantime.

use std::future::Future;
use std::time::Duration;

use stompchat_proto::destination::SessionScope;
use stompchat_proto::message::{self, MessagePage, PayloadError};

use crate::auth::AuthContext;
use crate::connection::SessionHandle;

/// Default bound on one pagination request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a fetch did not start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipReason {
    /// The server reported no older history.
    NoMoreHistory,
    /// There is nothing to page back from.
    EmptyWindow,
    /// The oldest entry carries no server number.
    NoAnchor,
    /// Another fetch for this session has not finished.
    AlreadyInFlight,
    /// The session was superseded or deactivated.
    Inactive,
}

/// Result of one [`PaginationFetcher::fetch_older`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was merged in front of the window.
    Applied {
        /// Messages actually added after de-duplication.
        added: usize,
        /// The server's `!last` for this page.
        has_more: bool,
    },
    /// No request was made.
    Skipped(SkipReason),
    /// The window was replaced while the request ran; the page was dropped.
    Discarded,
}

/// Failure of a pagination request. `has_more` is left unchanged.
#[derive(Debug, thiserror::Error)]
pub enum PaginationError {
    /// The request could not be sent or its body not read.
    #[error("history request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status.
    #[error("history backend returned status {0}")]
    Status(u16),

    /// The response body is not a history page.
    #[error("history response malformed: {0}")]
    Decode(#[from] PayloadError),
}

/// Source of older history pages.
pub trait HistoryBackend: Send + Sync {
    /// Fetch the page of messages older than `anchor` for `scope`.
    fn fetch_page(
        &self,
        scope: &SessionScope,
        anchor: i64,
        auth: &AuthContext,
    ) -> impl Future<Output = Result<MessagePage, PaginationError>> + Send;
}

/// [`HistoryBackend`] over the chat server's REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpHistoryBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpHistoryBackend {
    /// Creates a backend rooted at `base_url` (e.g. `http://localhost:8080`).
    ///
    /// # Errors
    ///
    /// Returns [`PaginationError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PaginationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Full URL of the page before `anchor` in `scope`.
    #[must_use]
    pub fn page_url(&self, scope: &SessionScope, anchor: i64) -> String {
        match scope {
            SessionScope::Lobby => format!("{}/message/more/{anchor}", self.base_url),
            SessionScope::Room(room) => {
                format!("{}/room/{room}/message/more/{anchor}", self.base_url)
            }
        }
    }
}

impl HistoryBackend for HttpHistoryBackend {
    async fn fetch_page(
        &self,
        scope: &SessionScope,
        anchor: i64,
        auth: &AuthContext,
    ) -> Result<MessagePage, PaginationError> {
        let url = self.page_url(scope, anchor);
        let mut request = self.client.get(&url);
        if let Some(credentials) = auth.credentials() {
            request = request.header(reqwest::header::AUTHORIZATION, credentials.access_token());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %url, status = status.as_u16(), "history request rejected");
            return Err(PaginationError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        Ok(message::decode_page(&body)?)
    }
}

/// Loads older history into a session's store.
#[derive(Debug, Clone)]
pub struct PaginationFetcher<B> {
    backend: B,
}

impl<B: HistoryBackend> PaginationFetcher<B> {
    /// Creates a fetcher over `backend`.
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Fetch the page before the window's oldest entry and merge it.
    ///
    /// At most one fetch per session runs at a time; a call made while one
    /// is pending returns [`FetchOutcome::Skipped`] without side effects.
    ///
    /// # Errors
    ///
    /// Returns [`PaginationError`] when the request fails. The store is
    /// untouched and nothing is retried.
    pub async fn fetch_older(
        &self,
        session: &SessionHandle,
    ) -> Result<FetchOutcome, PaginationError> {
        if !session.is_live() {
            return Ok(FetchOutcome::Skipped(SkipReason::Inactive));
        }
        let ticket = match session.store().try_begin_fetch() {
            Ok(ticket) => ticket,
            Err(reason) => {
                tracing::debug!(reason = ?reason, "older history fetch skipped");
                return Ok(FetchOutcome::Skipped(reason));
            }
        };

        let anchor = ticket.anchor();
        tracing::debug!(scope = %session.scope(), anchor, "fetching older history");
        let page = match self
            .backend
            .fetch_page(session.scope(), anchor, session.auth())
            .await
        {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(scope = %session.scope(), anchor, error = %e, "older history fetch failed");
                return Err(e);
            }
        };

        let outcome = session.apply_page(ticket, page).await;
        if outcome == FetchOutcome::Discarded {
            tracing::debug!(scope = %session.scope(), anchor, "stale history page discarded");
        }
        Ok(outcome)
    }
}
