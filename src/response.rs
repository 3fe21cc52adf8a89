//! APNs response classification.
//!
//! APNs answers every request with an HTTP status and, on failure, a JSON
//! body of the form `{"reason": "<CamelCaseIdentifier>"}`. [`classify`]
//! folds both into the [`ApnResult`] taxonomy the rest of the crate (and
//! its callers) work with: accepted, back off, permanently failed,
//! transiently failed, or broken on our side.

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::ApnsError;

/// Outcome of a single notification send.
#[derive(Debug)]
pub enum ApnResult {
    /// APNs accepted the notification (HTTP 200).
    Ok,
    /// The local stream limit was hit before the request could be opened;
    /// retry later.
    Backoff,
    /// APNs rejected the notification permanently.
    Fatal(FatalReason),
    /// APNs rejected the notification transiently.
    Temporary(TemporaryReason),
    /// An OS-level I/O error occurred on the socket.
    IoError(std::io::Error),
    /// A client-side failure: protocol error, undecodable response body,
    /// or a closed session/connection.
    ClientError(ApnsError),
}

impl ApnResult {
    /// True when APNs accepted the notification.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// True when retrying the same notification later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backoff | Self::Temporary(_) | Self::IoError(_))
    }

    /// True when the device token should be removed from circulation.
    pub fn should_remove_device(&self) -> bool {
        matches!(
            self,
            Self::Fatal(
                FatalReason::Unregistered
                    | FatalReason::BadDeviceToken
                    | FatalReason::DeviceTokenNotForTopic
            )
        )
    }

    /// True when the connection that produced this result must be
    /// discarded rather than returned to the pool.
    pub(crate) fn discards_connection(&self) -> bool {
        matches!(self, Self::IoError(_) | Self::ClientError(_))
    }

    /// Translate a client error into the result taxonomy, unwrapping
    /// socket-level failures into [`ApnResult::IoError`].
    pub(crate) fn from_error(err: ApnsError) -> Self {
        match err {
            ApnsError::Io(io) => Self::IoError(io),
            ApnsError::Http2(e) if e.is_io() => Self::IoError(
                e.into_io()
                    .unwrap_or_else(|| std::io::Error::other("connection I/O error")),
            ),
            other => Self::ClientError(other),
        }
    }
}

/// Permanent rejection reasons reported by APNs.
///
/// Unknown reason strings at a fatal status decode to [`Self::Other`]
/// with the raw text preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatalReason {
    BadCollapseId,
    BadDeviceToken,
    BadExpirationDate,
    BadMessageId,
    BadPriority,
    BadTopic,
    DeviceTokenNotForTopic,
    DuplicateHeaders,
    IdleTimeout,
    MissingDeviceToken,
    MissingTopic,
    PayloadEmpty,
    TopicDisallowed,
    BadCertificate,
    BadCertificateEnvironment,
    ExpiredProviderToken,
    Forbidden,
    InvalidProviderToken,
    MissingProviderToken,
    BadPath,
    MethodNotAllowed,
    Unregistered,
    PayloadTooLarge,
    /// A reason string this client does not know.
    #[serde(untagged)]
    Other(String),
}

/// Transient rejection reasons reported by APNs.
///
/// There is deliberately no wildcard here: a transient status with an
/// unknown reason string is a protocol error and surfaces as
/// [`ApnResult::ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporaryReason {
    TooManyProviderTokenUpdates,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct ReasonBody<R> {
    reason: R,
}

/// Map an HTTP status and response body onto the result taxonomy.
pub fn classify(status: StatusCode, body: &[u8]) -> ApnResult {
    match status.as_u16() {
        200 => ApnResult::Ok,
        400 | 403 | 405 | 410 | 413 => {
            match serde_json::from_slice::<ReasonBody<FatalReason>>(body) {
                Ok(decoded) => ApnResult::Fatal(decoded.reason),
                Err(err) => ApnResult::ClientError(ApnsError::Json(err)),
            }
        }
        429 | 500 | 503 => match serde_json::from_slice::<ReasonBody<TemporaryReason>>(body) {
            Ok(decoded) => ApnResult::Temporary(decoded.reason),
            Err(err) => ApnResult::ClientError(ApnsError::Json(err)),
        },
        code => ApnResult::Fatal(FatalReason::Other(format!("unhandled status: {code}"))),
    }
}
