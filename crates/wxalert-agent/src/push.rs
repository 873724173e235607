//! Push payload decoding and notification delivery.
//!
//! Two payload schemes are accepted:
//!
//! - a JSON object with any of `head`/`title`, `body`, `icon`, `badge`, `sound`, `url`
//! - delimited text, `title|||body|||icon|||url`, trailing fields optional
//!
//! Anything that is not a JSON object is read as text. Text without a `|||` separator
//! becomes the body. Decoding never fails; the baseline descriptor fills every gap.

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::NotificationDefaults;
use crate::notifications::{Notification, NotificationCenter, NotificationData, NotificationOptions};

/// Field separator of the delimited text scheme.
pub const FIELD_SEPARATOR: &str = "|||";

/// How a payload was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// No payload; baseline used as is.
    Absent,
    /// JSON object.
    Structured,
    /// `|||`-delimited text with at least two fields.
    Delimited,
    /// Text used verbatim as the body.
    PlainText,
}

/// What to display for one push message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDescriptor {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub sound: Option<String>,
    /// Navigation target for the dispatch handler.
    pub url: String,
}

impl NotificationDescriptor {
    /// The descriptor used when a payload provides nothing.
    pub fn baseline(defaults: &NotificationDefaults) -> Self {
        Self {
            title: defaults.title.clone(),
            body: defaults.body.clone(),
            icon: defaults.icon.clone(),
            badge: defaults.badge.clone(),
            sound: defaults.sound.clone(),
            url: defaults.url.clone(),
        }
    }

    /// Decode a push payload on top of the baseline.
    pub fn decode(payload: Option<&[u8]>, defaults: &NotificationDefaults) -> (Self, PayloadFormat) {
        let mut descriptor = Self::baseline(defaults);

        let Some(bytes) = payload else {
            debug!("Push message had no payload");
            return (descriptor, PayloadFormat::Absent);
        };

        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(fields)) => {
                descriptor.overlay_structured(&fields);
                return (descriptor, PayloadFormat::Structured);
            }
            Ok(_) => warn!("Push payload is JSON but not an object, reading as text"),
            Err(e) => debug!(error = %e, "Push payload is not JSON, reading as text"),
        }

        let text = String::from_utf8_lossy(bytes);
        let format = descriptor.overlay_text(&text);
        (descriptor, format)
    }

    fn overlay_structured(&mut self, fields: &Map<String, Value>) {
        let field = |name: &str| {
            fields
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(title) = field("head").or_else(|| field("title")) {
            self.title = title;
        }
        if let Some(body) = field("body") {
            self.body = body;
        }
        if let Some(icon) = field("icon") {
            self.icon = icon;
        }
        if let Some(badge) = field("badge") {
            self.badge = badge;
        }
        if let Some(sound) = field("sound") {
            self.sound = Some(sound);
        }
        if let Some(url) = field("url") {
            self.url = url;
        }
    }

    fn overlay_text(&mut self, text: &str) -> PayloadFormat {
        if text.is_empty() {
            return PayloadFormat::Absent;
        }

        let segments: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
        if segments.len() < 2 {
            self.body = text.to_string();
            return PayloadFormat::PlainText;
        }

        let mut slots = [
            &mut self.title,
            &mut self.body,
            &mut self.icon,
            &mut self.url,
        ];
        for (slot, segment) in slots.iter_mut().zip(segments.iter()) {
            if !segment.is_empty() {
                **slot = segment.to_string();
            }
        }
        PayloadFormat::Delimited
    }

    /// Platform options for this descriptor. `url` travels as auxiliary data.
    pub fn to_options(&self, vibrate: &[u32]) -> NotificationOptions {
        NotificationOptions {
            body: self.body.clone(),
            icon: Some(self.icon.clone()).filter(|s| !s.is_empty()),
            badge: Some(self.badge.clone()).filter(|s| !s.is_empty()),
            sound: self.sound.clone(),
            vibrate: vibrate.to_vec(),
            data: NotificationData {
                url: Some(self.url.clone()),
            },
        }
    }
}

/// Decode `payload` and display the resulting notification exactly once.
pub async fn deliver(
    center: &RwLock<NotificationCenter>,
    defaults: &NotificationDefaults,
    payload: Option<&[u8]>,
) -> Notification {
    let (descriptor, format) = NotificationDescriptor::decode(payload, defaults);
    if format == PayloadFormat::PlainText && payload.is_some_and(|p| p.first() == Some(&b'{')) {
        warn!("Push payload looked like JSON but did not parse, used as body");
    }

    let options = descriptor.to_options(&defaults.vibrate);
    let notification = center.write().await.show(&descriptor.title, options);

    info!(
        id = ?notification.id,
        title = %notification.title,
        format = ?format,
        url = %descriptor.url,
        "Push notification shown"
    );
    notification
}
