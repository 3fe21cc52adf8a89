//! # APNs Client
//!
//! Asynchronous client for Apple Push Notification service (APNs) over
//! HTTP/2 with TLS.
//!
//! ## Features
//!
//! - **Two-level multiplexing**: a bounded pool of persistent HTTP/2
//!   connections, each multiplexing up to a configured number of
//!   concurrent streams
//! - **Both authentication schemes**: client certificates or
//!   caller-supplied JWT bearer tokens
//! - **Stable result taxonomy**: every send classifies into accepted,
//!   back off, fatal, temporary, I/O, or client error
//! - **Protocol hygiene**: GOAWAY-aware connection recycling, per-second
//!   flow-window replenishment, idle eviction, per-send deadlines
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use apns_client::{DeviceToken, JsonAps, PushType, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(
//!         SessionConfig::new("com.example.MyApp")
//!             .certificate("cert.pem", "key.pem", "ca.pem"),
//!     )?;
//!
//!     let token = DeviceToken::from_hex("a1b2c3d4...");
//!     let payload = JsonAps::alert("hello", "world", None);
//!
//!     let result = session
//!         .send(&token, &payload, PushType::Alert, None, None)
//!         .await;
//!     assert!(result.is_ok());
//!
//!     session.close();
//!     Ok(())
//! }
//! ```
//!
//! ## With JWT bearer tokens
//!
//! ```rust,ignore
//! let session = Session::new(SessionConfig::new("com.example.MyApp"))?;
//! let jwt = mint_provider_token()?; // caller-supplied; this crate does not mint
//! session.send_silent_message(&token, Some(&jwt)).await;
//! ```

mod connection;
mod credentials;
mod error;
mod payload;
mod pool;
mod request;
mod response;
mod session;
mod token;

pub use connection::{Connection, ConnectionInfo};
pub use credentials::check_credentials;
pub use error::{ApnsError, Result};
pub use payload::{
    ApsAlert, ApsMessage, InterruptionLevel, JsonAps, Priority, PushType, SILENT_PAYLOAD,
};
pub use request::{adjusted_topic, build_request, WIDGET_TOPIC_SUFFIX};
pub use response::{classify, ApnResult, FatalReason, TemporaryReason};
pub use session::{Session, SessionConfig, PRODUCTION_HOST, SANDBOX_HOST};
pub use token::DeviceToken;

/// Prelude for common imports.
///
/// ```
/// use apns_client::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ApnsError, Result};
    pub use crate::payload::{JsonAps, Priority, PushType};
    pub use crate::response::{ApnResult, FatalReason, TemporaryReason};
    pub use crate::session::{Session, SessionConfig};
    pub use crate::token::DeviceToken;
}
