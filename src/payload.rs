//! Notification payload types.
//!
//! The envelope that crosses the wire is [`JsonAps`]: the `aps` dictionary
//! Apple interprets, an optional free-form `appspecificcontent` string, and
//! a `data` mapping for supplemental values. Absent optional fields are
//! serialized as explicit `null` so the envelope shape is stable across
//! producers and consumers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Body of a background (silent) notification.
pub const SILENT_PAYLOAD: &[u8] = br#"{"aps":{"content-available":1}}"#;

/// APNs push type, carried in the `apns-push-type` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushType {
    /// User-visible notification.
    Alert,
    /// Silent notification delivered to the app in the background.
    Background,
    /// Widget reload notification.
    Widgets,
}

impl PushType {
    /// The on-wire header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alert => "alert",
            Self::Background => "background",
            Self::Widgets => "widgets",
        }
    }

    /// The priority used when the caller does not pass one.
    ///
    /// Widget pushes carry no default: the `apns-priority` header is
    /// omitted entirely unless the caller asks for one.
    pub fn default_priority(&self) -> Option<Priority> {
        match self {
            Self::Alert => Some(Priority::Immediate),
            Self::Background => Some(Priority::PowerEfficient),
            Self::Widgets => None,
        }
    }
}

/// Delivery priority, carried in the `apns-priority` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Deliver immediately (10).
    Immediate,
    /// Deliver at a time that conserves power on the device (5).
    PowerEfficient,
    /// Deliver when load allows (1).
    Low,
}

impl Priority {
    /// The on-wire header value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "10",
            Self::PowerEfficient => "5",
            Self::Low => "1",
        }
    }

    /// The numeric priority value.
    pub fn value(&self) -> u8 {
        match self {
            Self::Immediate => 10,
            Self::PowerEfficient => 5,
            Self::Low => 1,
        }
    }
}

/// Interruption level for user-visible notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterruptionLevel {
    /// Delivered quietly, no wake.
    Passive,
    /// The default presentation.
    Active,
    /// Breaks through scheduled delivery and some Focus modes.
    TimeSensitive,
    /// Breaks through Do Not Disturb; requires an entitlement.
    Critical,
}

/// The alert dictionary inside `aps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApsAlert {
    /// Alert title.
    pub title: String,
    /// Alert body.
    pub body: String,
    /// Optional subtitle, omitted from the JSON when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
}

impl ApsAlert {
    /// Create an alert with the mandatory title and body.
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            subtitle: None,
        }
    }
}

/// The `aps` dictionary.
///
/// Every field is optional; absent fields serialize as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApsMessage {
    /// User-visible alert content.
    pub alert: Option<ApsAlert>,
    /// App icon badge count; 0 clears the badge on the device.
    pub badge: Option<u32>,
    /// Sound file name, or `"default"`.
    pub sound: Option<String>,
    /// Notification category for actionable notifications.
    pub category: Option<String>,
    /// Set to 1 to let a notification service extension rewrite the content.
    #[serde(rename = "mutable-content")]
    pub mutable_content: Option<u32>,
    /// How urgently the notification interrupts the user.
    #[serde(rename = "interruption-level")]
    pub interruption_level: Option<InterruptionLevel>,
    /// Widget content marker.
    #[serde(rename = "content-changed")]
    pub content_changed: Option<bool>,
}

/// The outermost notification envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonAps {
    /// The dictionary Apple interprets.
    pub aps: ApsMessage,
    /// Free-form application content.
    pub appspecificcontent: Option<String>,
    /// Supplemental values delivered alongside `aps`.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl JsonAps {
    /// Create an envelope around the given `aps` dictionary.
    pub fn new(aps: ApsMessage) -> Self {
        Self {
            aps,
            appspecificcontent: None,
            data: Map::new(),
        }
    }

    /// Create an alert envelope with a title, body, and optional subtitle.
    pub fn alert(
        title: impl Into<String>,
        body: impl Into<String>,
        subtitle: Option<&str>,
    ) -> Self {
        let mut alert = ApsAlert::new(title, body);
        alert.subtitle = subtitle.map(str::to_owned);
        Self::new(ApsMessage {
            alert: Some(alert),
            ..ApsMessage::default()
        })
    }

    /// Create a widget reload envelope: `content-changed` set, nothing else.
    pub fn widget() -> Self {
        Self::new(ApsMessage {
            content_changed: Some(true),
            ..ApsMessage::default()
        })
    }

    /// Set the application-specific content string.
    pub fn app_specific_content(mut self, content: impl Into<String>) -> Self {
        self.appspecificcontent = Some(content.into());
        self
    }

    /// Add a supplemental value under `data`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is `"aps"`: the `aps` dictionary is owned by the
    /// envelope and may not be smuggled in through the supplemental map.
    pub fn data(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        assert!(
            key != "aps",
            "the \"aps\" key is reserved for the notification envelope"
        );
        self.data.insert(key, value);
        self
    }
}
