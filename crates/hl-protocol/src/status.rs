use std::fmt;

/// Status reported by the hub (or synthesized client-side) for a message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IotHubStatusCode {
    Ok,
    OkEmpty,
    BadFormat,
    Unauthorized,
    TooManyDevices,
    HubOrDeviceIdNotFound,
    PreconditionFailed,
    RequestEntityTooLarge,
    Throttled,
    InternalServerError,
    ServerBusy,
    Error,
    /// The message expired before it could be sent.
    MessageExpired,
    /// The transport was closed while the message was still pending.
    MessageCancelledOnClose,
}

impl IotHubStatusCode {
    /// Map an HTTP status code to the hub status it represents.
    pub fn from_http(status: u16) -> Self {
        match status {
            200 => Self::Ok,
            204 => Self::OkEmpty,
            400 => Self::BadFormat,
            401 => Self::Unauthorized,
            403 => Self::TooManyDevices,
            404 => Self::HubOrDeviceIdNotFound,
            412 => Self::PreconditionFailed,
            413 => Self::RequestEntityTooLarge,
            429 => Self::Throttled,
            500 => Self::InternalServerError,
            503 => Self::ServerBusy,
            _ => Self::Error,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::OkEmpty)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::OkEmpty => "OK_EMPTY",
            Self::BadFormat => "BAD_FORMAT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::TooManyDevices => "TOO_MANY_DEVICES",
            Self::HubOrDeviceIdNotFound => "HUB_OR_DEVICE_ID_NOT_FOUND",
            Self::PreconditionFailed => "PRECONDITION_FAILED",
            Self::RequestEntityTooLarge => "REQUEST_ENTITY_TOO_LARGE",
            Self::Throttled => "THROTTLED",
            Self::InternalServerError => "INTERNAL_SERVER_ERROR",
            Self::ServerBusy => "SERVER_BUSY",
            Self::Error => "ERROR",
            Self::MessageExpired => "MESSAGE_EXPIRED",
            Self::MessageCancelledOnClose => "MESSAGE_CANCELLED_ONCLOSE",
        }
    }
}

impl fmt::Display for IotHubStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the device disposes of a received cloud-to-device message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageResult {
    /// Processed; the hub deletes the message.
    Complete,
    /// Not processed; the hub makes the message available again.
    Abandon,
    /// Refused; the hub dead-letters the message.
    Reject,
}

impl fmt::Display for MessageResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Abandon => "abandon",
            Self::Reject => "reject",
        };
        f.write_str(s)
    }
}
