//! Device messages exchanged with the hub.
//!
//! A [`Message`] is built once (consuming builder methods) and then shared
//! by reference (`Arc<Message>`) through the transport queues. The transport
//! tracks messages by pointer identity, never by content.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ProtocolError, ProtocolResult};

/// Characters that may not appear in an application property name.
const NAME_SEPARATORS: &[char] = &[
    '(', ')', '<', '>', '@', ',', ';', ':', '\\', '"', '/', '[', ']', '?', '=', '{', '}',
];

/// Prefix of header names the hub reserves for its own use.
const RESERVED_PREFIX: &str = "iothub-";

/// An application-defined key/value pair attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperty {
    name: String,
    value: String,
}

impl MessageProperty {
    /// Validate and build a property.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> ProtocolResult<Self> {
        let name = name.into();
        let value = value.into();

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_graphic() && !NAME_SEPARATORS.contains(&c))
        {
            return Err(ProtocolError::InvalidPropertyName(name));
        }
        if name.to_ascii_lowercase().starts_with(RESERVED_PREFIX) || name.starts_with("$.") {
            return Err(ProtocolError::ReservedProperty(name));
        }
        if !value.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
            return Err(ProtocolError::InvalidPropertyValue { name });
        }

        Ok(Self { name, value })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// An opaque payload plus application and system properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    body: Vec<u8>,
    properties: Vec<MessageProperty>,
    message_id: Option<String>,
    correlation_id: Option<String>,
    content_type: Option<String>,
    expiry_time: Option<DateTime<Utc>>,
    lock_token: Option<String>,
}

impl Message {
    /// Create a message with a fresh message id.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            properties: Vec::new(),
            message_id: Some(Uuid::now_v7().to_string()),
            correlation_id: None,
            content_type: None,
            expiry_time: None,
            lock_token: None,
        }
    }

    /// Add (or replace) an application property.
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> ProtocolResult<Self> {
        let property = MessageProperty::new(name, value)?;
        self.properties.retain(|p| p.name != property.name);
        self.properties.push(property);
        Ok(self)
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_expiry_time(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry_time = Some(expiry);
        self
    }

    /// Attach the hub's lock token for a received message. Completing,
    /// abandoning or rejecting the message addresses it by this token.
    pub fn with_lock_token(mut self, token: impl Into<String>) -> Self {
        self.lock_token = Some(token.into());
        self
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn properties(&self) -> &[MessageProperty] {
        &self.properties
    }

    /// Look up an application property by name.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn message_id(&self) -> Option<&str> {
        self.message_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn expiry_time(&self) -> Option<DateTime<Utc>> {
        self.expiry_time
    }

    pub fn lock_token(&self) -> Option<&str> {
        self.lock_token.as_deref()
    }

    /// Whether the message's expiry time has passed.
    pub fn is_expired(&self) -> bool {
        self.expiry_time.is_some_and(|expiry| expiry <= Utc::now())
    }
}
