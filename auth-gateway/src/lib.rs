//! # auth-gateway
//!
//! Authenticated request gateway for the chat client:
//! - Attaches the current bearer credential to every outgoing call
//! - Coordinates one shared credential refresh per burst of 401 responses and
//!   replays every affected request with the new credential
//! - Reports 403 as an authorization failure without retrying
//! - Notifies a session-expired observer when the refresh itself fails
//!
//! ## Usage
//!
//! ```rust,ignore
//! use auth_gateway::{CredentialStore, Gateway};
//!
//! let credentials = CredentialStore::with_token(token);
//! let gateway = Gateway::builder("https://chat.example.com/api")
//!     .with_credentials(credentials.clone())
//!     .with_session_observer(Arc::new(|| redirect_to_login()))
//!     .build()?;
//!
//! let rooms: Vec<Room> = gateway.send_json(gateway.get("/rooms")).await?;
//! ```

pub mod bearer;
pub mod credentials;
pub mod error;
pub mod http;
pub mod refresh;

// Re-export commonly used types
pub use credentials::CredentialStore;
pub use error::{AuthErrorKind, Error, ErrorKind, HttpErrorKind};
pub use http::{Gateway, GatewayBuilder};
pub use refresh::{SessionObserver, TokenRefresher};
