//! MQTT property bags and inbound publish decoding.
//!
//! Hub topics carry message metadata as a URL-encoded property bag after
//! the topic prefix. System properties use `$.`-prefixed keys; everything
//! else is an application property.

use chrono::{DateTime, Utc};
use rumqttc::Publish;
use url::form_urlencoded;

use hl_protocol::{Message, uri};

const SYS_MESSAGE_ID: &str = "$.mid";
const SYS_CORRELATION_ID: &str = "$.cid";
const SYS_CONTENT_TYPE: &str = "$.ct";
const SYS_EXPIRY: &str = "$.exp";

/// Encode a message's properties for the events topic.
pub fn encode_property_bag(message: &Message) -> String {
    let mut bag = form_urlencoded::Serializer::new(String::new());
    if let Some(id) = message.message_id() {
        bag.append_pair(SYS_MESSAGE_ID, id);
    }
    if let Some(id) = message.correlation_id() {
        bag.append_pair(SYS_CORRELATION_ID, id);
    }
    if let Some(content_type) = message.content_type() {
        bag.append_pair(SYS_CONTENT_TYPE, content_type);
    }
    if let Some(expiry) = message.expiry_time() {
        bag.append_pair(SYS_EXPIRY, &expiry.to_rfc3339());
    }
    for property in message.properties() {
        bag.append_pair(property.name(), property.value());
    }
    bag.finish()
}

/// Decode a cloud-to-device publish. Returns `None` for publishes on
/// other topics.
pub fn message_from_publish(device_id: &str, publish: &Publish) -> Option<Message> {
    let bag = uri::parse_devicebound_topic(device_id, &publish.topic)?;

    let mut message = Message::new(publish.payload.to_vec());
    for (key, value) in form_urlencoded::parse(bag.as_bytes()) {
        match &*key {
            SYS_MESSAGE_ID => message = message.with_message_id(value),
            SYS_CORRELATION_ID => message = message.with_correlation_id(value),
            SYS_CONTENT_TYPE => message = message.with_content_type(value),
            SYS_EXPIRY => {
                if let Ok(expiry) = DateTime::parse_from_rfc3339(&value) {
                    message = message.with_expiry_time(expiry.with_timezone(&Utc));
                }
            }
            name if name.starts_with("$.") => {
                tracing::debug!(name, "ignoring unknown system property");
            }
            name => match message.clone().with_property(name, &*value) {
                Ok(updated) => message = updated,
                Err(e) => tracing::warn!(error = %e, "skipping invalid inbound property"),
            },
        }
    }
    Some(message)
}
