//! Login status and credentials supplied by the embedding application.

use std::fmt;

/// Opaque bearer tokens. Never printed: `Debug` redacts both values.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_token: String,
    refresh_token: Option<String>,
}

impl Credentials {
    /// Creates credentials from an access token and optional refresh token.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// The access token, for request headers.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The refresh token, if one was issued.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Who the session acts as.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthContext {
    /// Not logged in.
    #[default]
    Anonymous,
    /// Logged in as `user_id`.
    Authenticated {
        /// The member id.
        user_id: String,
        /// Tokens presented to the broker and history backend.
        credentials: Credentials,
    },
}

impl AuthContext {
    /// Shorthand for an authenticated context.
    pub fn user(user_id: impl Into<String>, credentials: Credentials) -> Self {
        Self::Authenticated {
            user_id: user_id.into(),
            credentials,
        }
    }

    /// The member id, when logged in.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated { user_id, .. } => Some(user_id),
        }
    }

    /// The credentials, when logged in.
    #[must_use]
    pub const fn credentials(&self) -> Option<&Credentials> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated { credentials, .. } => Some(credentials),
        }
    }

    /// Whether the session is logged in.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    /// `accessToken` / `refreshToken` headers for CONNECT and SEND frames.
    /// Empty when anonymous.
    #[must_use]
    pub fn stomp_headers(&self) -> Vec<(String, String)> {
        let Some(credentials) = self.credentials() else {
            return Vec::new();
        };
        let mut headers = vec![(
            "accessToken".to_string(),
            credentials.access_token.clone(),
        )];
        if let Some(refresh) = &credentials.refresh_token {
            headers.push(("refreshToken".to_string(), refresh.clone()));
        }
        headers
    }
}
