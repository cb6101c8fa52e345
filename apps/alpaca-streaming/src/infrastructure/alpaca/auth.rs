//! Alpaca WebSocket Authentication
//!
//! Credentials and the per-connection handshake tracker. Alpaca closes
//! sockets that have not authenticated within 10 seconds.
//!
//! # Authentication Flow
//!
//! ## Market Data Streams (stock, crypto)
//! 1. Connect to WebSocket endpoint
//! 2. Send `{"action":"auth","key":"...","secret":"..."}`
//! 3. Receive `{"T":"success","msg":"connected"}` (informational)
//! 4. Receive `{"T":"success","msg":"authenticated"}` or `{"T":"error",...}`
//!
//! ## Account Activity Stream
//! 1. Connect to WebSocket endpoint
//! 2. Send the key pair frame above, or
//!    `{"action":"authenticate","data":{"oauth_token":"..."}}`
//! 3. Receive `{"stream":"authorization","data":{"status":"authorized",...}}`
//!
//! # Error Codes
//!
//! - 401: Not authenticated
//! - 402: Authentication failed (invalid credentials)
//! - 404: Authentication timeout (>10 seconds)
//! - 406: Connection limit exceeded
//! - 409: Insufficient subscription (account not entitled to the feed)
//!
//! Codes 401, 402 and 409 cannot be fixed by retrying and close the
//! session. Everything else is treated as a transient connection failure.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::codec::Inbound;
use super::messages::{AccountAuthRequest, AuthRequest, ErrorMessage};
use crate::domain::streaming::StreamFlavor;

// =============================================================================
// Constants
// =============================================================================

/// Server-side limit for completing authentication after connecting.
pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default client-side handshake timeout, leaving a safety margin.
pub const AUTH_TIMEOUT_SAFE: Duration = Duration::from_secs(8);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur around authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Credentials failed local validation.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The credential kind cannot open this stream.
    #[error("OAuth credentials cannot open the {0} stream")]
    UnsupportedCredentials(StreamFlavor),

    /// The server rejected the credentials.
    #[error("authentication rejected: {message}")]
    Rejected {
        /// Error code, when the server sent one.
        code: Option<i32>,
        /// Server message.
        message: String,
    },

    /// No answer within the handshake timeout.
    #[error("authentication timed out after {0:?}")]
    Timeout(Duration),

    /// A retryable server error during the handshake.
    #[error("server error during authentication ({code}): {message}")]
    ServerError {
        /// Error code from server.
        code: i32,
        /// Error message from server.
        message: String,
    },
}

impl AuthError {
    /// Whether retrying cannot succeed.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials(_) | Self::UnsupportedCredentials(_) | Self::Rejected { .. }
        )
    }
}

impl From<&ErrorMessage> for AuthError {
    fn from(err: &ErrorMessage) -> Self {
        match err.code {
            401 | 402 | 409 => Self::Rejected {
                code: Some(err.code),
                message: err.msg.clone(),
            },
            code => Self::ServerError {
                code,
                message: err.msg.clone(),
            },
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Alpaca API credentials: a key pair or an OAuth token, never both.
///
/// Validated once at construction and shared by `Arc` between sessions and
/// the REST client. `Debug` redacts secrets.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// API key ID and secret key.
    KeyPair {
        /// Key ID.
        key_id: String,
        /// Secret key.
        secret_key: String,
    },
    /// OAuth bearer token (account stream only).
    OAuth {
        /// Access token.
        token: String,
    },
}

impl Credentials {
    /// Create key pair credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is blank.
    pub fn key_pair(
        key_id: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let key_id = key_id.into();
        let secret_key = secret_key.into();

        if key_id.trim().is_empty() {
            return Err(AuthError::InvalidCredentials(
                "API key ID cannot be empty".to_string(),
            ));
        }
        if secret_key.trim().is_empty() {
            return Err(AuthError::InvalidCredentials(
                "API secret key cannot be empty".to_string(),
            ));
        }

        Ok(Self::KeyPair { key_id, secret_key })
    }

    /// Create OAuth credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is blank.
    pub fn oauth(token: impl Into<String>) -> Result<Self, AuthError> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AuthError::InvalidCredentials(
                "OAuth token cannot be empty".to_string(),
            ));
        }
        Ok(Self::OAuth { token })
    }

    /// Whether this is an OAuth token.
    #[must_use]
    pub const fn is_oauth(&self) -> bool {
        matches!(self, Self::OAuth { .. })
    }

    /// Check that these credentials can open a stream of `flavor`.
    ///
    /// # Errors
    ///
    /// Market data streams only accept key pairs.
    pub fn ensure_supports(&self, flavor: StreamFlavor) -> Result<(), AuthError> {
        if self.is_oauth() && flavor.is_market_data() {
            return Err(AuthError::UnsupportedCredentials(flavor));
        }
        Ok(())
    }

    /// Serialize the authentication frame for a stream of `flavor`.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot open this flavor or the
    /// frame fails to serialize.
    pub fn auth_frame(&self, flavor: StreamFlavor) -> Result<String, AuthFrameError> {
        self.ensure_supports(flavor)?;
        let frame = match self {
            Self::KeyPair { key_id, secret_key } => {
                serde_json::to_string(&AuthRequest::new(key_id, secret_key))?
            }
            Self::OAuth { token } => serde_json::to_string(&AccountAuthRequest::oauth(token))?,
        };
        Ok(frame)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyPair { key_id, .. } => f
                .debug_struct("KeyPair")
                .field("key_id", key_id)
                .field("secret_key", &"[REDACTED]")
                .finish(),
            Self::OAuth { .. } => f
                .debug_struct("OAuth")
                .field("token", &"[REDACTED]")
                .finish(),
        }
    }
}

/// Failure to build an authentication frame.
#[derive(Debug, Error)]
pub enum AuthFrameError {
    /// Credential kind not accepted by the stream.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Serialization failure.
    #[error("failed to serialize auth frame: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Handshake
// =============================================================================

/// Progress of the handshake on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Auth frame not sent yet.
    #[default]
    Pending,
    /// Auth frame sent, awaiting the verdict.
    Authenticating,
    /// Credentials accepted.
    Authenticated,
    /// Credentials rejected or handshake failed.
    Failed,
}

/// What a message means for the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Informational (for example the `connected` greeting).
    Pending,
    /// Credentials accepted.
    Accepted,
    /// Handshake failed; terminal or transient per [`AuthError::is_terminal`].
    Failed(AuthError),
    /// Subscription or data traffic before authentication; must be dropped.
    OutOfOrder,
}

/// Tracks the handshake for one connection instance.
#[derive(Debug)]
pub struct AuthHandshake {
    flavor: StreamFlavor,
    state: AuthState,
}

impl AuthHandshake {
    /// Start tracking a handshake on a fresh connection.
    #[must_use]
    pub const fn new(flavor: StreamFlavor) -> Self {
        Self {
            flavor,
            state: AuthState::Pending,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Whether the connection is authenticated.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.state, AuthState::Authenticated)
    }

    /// Record that the auth frame went out.
    pub const fn on_sent(&mut self) {
        self.state = AuthState::Authenticating;
    }

    /// Record a timeout waiting for the verdict.
    pub const fn on_timeout(&mut self, waited: Duration) -> AuthError {
        self.state = AuthState::Failed;
        AuthError::Timeout(waited)
    }

    /// Classify an inbound message received while authenticating.
    pub fn on_message(&mut self, message: &Inbound) -> AuthOutcome {
        match message {
            Inbound::Connected => AuthOutcome::Pending,
            Inbound::Authenticated => {
                self.state = AuthState::Authenticated;
                AuthOutcome::Accepted
            }
            Inbound::Unauthorized(status) => {
                self.state = AuthState::Failed;
                AuthOutcome::Failed(AuthError::Rejected {
                    code: None,
                    message: format!("authorization {status}"),
                })
            }
            Inbound::Error(err) => {
                self.state = AuthState::Failed;
                tracing::warn!(
                    flavor = %self.flavor,
                    code = err.code,
                    msg = %err.msg,
                    "Error during authentication"
                );
                AuthOutcome::Failed(AuthError::from(err))
            }
            Inbound::Subscribed(_) | Inbound::Event(_) => AuthOutcome::OutOfOrder,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::streaming::{StreamEvent, SubscriptionAck};
    use test_case::test_case;

    fn error(code: i32, msg: &str) -> ErrorMessage {
        ErrorMessage {
            msg_type: "error".to_string(),
            code,
            msg: msg.to_string(),
        }
    }

    #[test]
    fn key_pair_rejects_blank_values() {
        assert!(Credentials::key_pair("", "secret").is_err());
        assert!(Credentials::key_pair("key", "  ").is_err());
        assert!(Credentials::key_pair("key", "secret").is_ok());
    }

    #[test]
    fn oauth_rejects_blank_token() {
        assert!(Credentials::oauth("").is_err());
        assert!(Credentials::oauth("token").unwrap().is_oauth());
    }

    #[test]
    fn debug_redacts_secrets() {
        let creds = Credentials::key_pair("PKTEST", "very-secret").unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("PKTEST"));
        assert!(!debug.contains("very-secret"));

        let oauth = Credentials::oauth("bearer-token").unwrap();
        assert!(!format!("{oauth:?}").contains("bearer-token"));
    }

    #[test]
    fn key_pair_auth_frame() {
        let creds = Credentials::key_pair("key", "secret").unwrap();
        let frame = creds.auth_frame(StreamFlavor::StockMarketData).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "auth");
        assert_eq!(value["key"], "key");
        assert_eq!(value["secret"], "secret");
    }

    #[test]
    fn oauth_auth_frame_for_account() {
        let creds = Credentials::oauth("tok").unwrap();
        let frame = creds.auth_frame(StreamFlavor::AccountActivity).unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "authenticate");
        assert_eq!(value["data"]["oauth_token"], "tok");
    }

    #[test_case(StreamFlavor::StockMarketData)]
    #[test_case(StreamFlavor::CryptoMarketData)]
    fn oauth_cannot_open_market_data(flavor: StreamFlavor) {
        let creds = Credentials::oauth("tok").unwrap();
        assert_eq!(
            creds.ensure_supports(flavor),
            Err(AuthError::UnsupportedCredentials(flavor))
        );
        assert!(creds.auth_frame(flavor).is_err());
    }

    #[test_case(401, true)]
    #[test_case(402, true)]
    #[test_case(409, true)]
    #[test_case(404, false)]
    #[test_case(406, false)]
    #[test_case(500, false)]
    fn error_code_terminality(code: i32, terminal: bool) {
        assert_eq!(AuthError::from(&error(code, "x")).is_terminal(), terminal);
    }

    #[test]
    fn handshake_accepts_after_greeting() {
        let mut handshake = AuthHandshake::new(StreamFlavor::StockMarketData);
        handshake.on_sent();
        assert_eq!(handshake.state(), AuthState::Authenticating);

        assert_eq!(handshake.on_message(&Inbound::Connected), AuthOutcome::Pending);
        assert_eq!(
            handshake.on_message(&Inbound::Authenticated),
            AuthOutcome::Accepted
        );
        assert!(handshake.is_authenticated());
    }

    #[test]
    fn handshake_rejects_unauthorized() {
        let mut handshake = AuthHandshake::new(StreamFlavor::AccountActivity);
        handshake.on_sent();
        let outcome = handshake.on_message(&Inbound::Unauthorized("unauthorized".to_string()));
        match outcome {
            AuthOutcome::Failed(err) => assert!(err.is_terminal()),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(handshake.state(), AuthState::Failed);
    }

    #[test]
    fn handshake_flags_data_before_auth() {
        let mut handshake = AuthHandshake::new(StreamFlavor::StockMarketData);
        handshake.on_sent();
        assert_eq!(
            handshake.on_message(&Inbound::Subscribed(SubscriptionAck::default())),
            AuthOutcome::OutOfOrder
        );
        assert_eq!(
            handshake.on_message(&Inbound::Event(StreamEvent::Authorized)),
            AuthOutcome::OutOfOrder
        );
        assert_eq!(handshake.state(), AuthState::Authenticating);
    }

    #[test]
    fn handshake_timeout_is_transient() {
        let mut handshake = AuthHandshake::new(StreamFlavor::CryptoMarketData);
        let err = handshake.on_timeout(AUTH_TIMEOUT_SAFE);
        assert!(!err.is_terminal());
        assert_eq!(handshake.state(), AuthState::Failed);
    }
}
