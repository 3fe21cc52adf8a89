//! APNs request construction.
//!
//! Building the header set is kept pure — a function of the session's
//! hostname and topic plus the per-send parameters — so it can be tested
//! without a connection in sight. The body never passes through here.

use std::borrow::Cow;

use http::{Method, Request, Uri};

use crate::error::Result;
use crate::payload::{Priority, PushType};
use crate::token::DeviceToken;

/// Suffix appended to the bundle topic for widget pushes.
pub const WIDGET_TOPIC_SUFFIX: &str = ".push-type.widgets";

/// The `apns-topic` value for a push type.
///
/// Widget pushes address `<bundle>.push-type.widgets`; everything else
/// uses the bundle topic verbatim.
pub fn adjusted_topic(topic: &str, push_type: PushType) -> Cow<'_, str> {
    match push_type {
        PushType::Widgets => Cow::Owned(format!("{topic}{WIDGET_TOPIC_SUFFIX}")),
        _ => Cow::Borrowed(topic),
    }
}

/// Build the request head for one notification.
///
/// Produces `POST https://<hostname>/3/device/<token>` with the
/// `apns-topic` and `apns-push-type` headers, plus `apns-priority` and
/// `authorization` when a priority or bearer token is supplied.
pub fn build_request(
    hostname: &str,
    token: &DeviceToken,
    topic: &str,
    push_type: PushType,
    priority: Option<Priority>,
    jwt: Option<&str>,
) -> Result<Request<()>> {
    let uri = Uri::builder()
        .scheme("https")
        .authority(hostname)
        .path_and_query(format!("/3/device/{}", token.as_str()))
        .build()?;

    let mut request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("apns-topic", adjusted_topic(topic, push_type).as_ref())
        .header("apns-push-type", push_type.as_str());

    if let Some(priority) = priority {
        request = request.header("apns-priority", priority.as_str());
    }
    if let Some(jwt) = jwt {
        request = request.header("authorization", format!("bearer {jwt}"));
    }

    Ok(request.body(())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "api.push.apple.com";
    const TOPIC: &str = "com.example.MyApp";

    fn token() -> DeviceToken {
        DeviceToken::from_hex("0011aabb")
    }

    #[test]
    fn test_basic_request_shape() {
        let request =
            build_request(HOST, &token(), TOPIC, PushType::Alert, None, None).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().scheme_str(), Some("https"));
        assert_eq!(request.uri().host(), Some(HOST));
        assert_eq!(request.uri().path(), "/3/device/0011aabb");
        assert_eq!(request.headers().get("apns-topic").unwrap(), TOPIC);
        assert_eq!(request.headers().get("apns-push-type").unwrap(), "alert");
    }

    #[test]
    fn test_priority_header_present_only_when_given() {
        let with = build_request(
            HOST,
            &token(),
            TOPIC,
            PushType::Background,
            Some(Priority::PowerEfficient),
            None,
        )
        .unwrap();
        assert_eq!(with.headers().get("apns-priority").unwrap(), "5");

        let without =
            build_request(HOST, &token(), TOPIC, PushType::Background, None, None).unwrap();
        assert!(without.headers().get("apns-priority").is_none());
    }

    #[test]
    fn test_authorization_header() {
        let request = build_request(
            HOST,
            &token(),
            TOPIC,
            PushType::Alert,
            None,
            Some("eyJ.example.jwt"),
        )
        .unwrap();
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "bearer eyJ.example.jwt"
        );

        let anonymous =
            build_request(HOST, &token(), TOPIC, PushType::Alert, None, None).unwrap();
        assert!(anonymous.headers().get("authorization").is_none());
    }

    #[test]
    fn test_widget_topic_suffix() {
        let request =
            build_request(HOST, &token(), TOPIC, PushType::Widgets, None, None).unwrap();
        assert_eq!(
            request.headers().get("apns-topic").unwrap(),
            "com.example.MyApp.push-type.widgets"
        );
        assert_eq!(request.headers().get("apns-push-type").unwrap(), "widgets");
    }

    #[test]
    fn test_adjusted_topic_borrows_when_unchanged() {
        assert!(matches!(
            adjusted_topic(TOPIC, PushType::Alert),
            Cow::Borrowed(_)
        ));
        assert_eq!(
            adjusted_topic(TOPIC, PushType::Widgets).as_ref(),
            "com.example.MyApp.push-type.widgets"
        );
    }
}
