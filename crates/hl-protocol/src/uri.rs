//! Hub resource paths, URLs, and MQTT topic builders.
//!
//! Path structure (HTTPS):
//! ```text
//! /devices/{device_id}/messages/events
//! /devices/{device_id}/messages/devicebound
//! /devices/{device_id}/messages/devicebound/{etag}
//! /devices/{device_id}/messages/devicebound/{etag}/abandon
//! ```
//!
//! Topic structure (MQTT):
//! ```text
//! devices/{device_id}/messages/events/{property_bag}
//! devices/{device_id}/messages/devicebound/{property_bag}
//! ```

/// API version appended to every HTTPS request.
pub const API_VERSION: &str = "2016-02-03";

/// API version carried in the MQTT username.
pub const MQTT_API_VERSION: &str = "2016-11-14";

// ─── HTTPS paths ───

pub fn events_path(device_id: &str) -> String {
    format!("/devices/{device_id}/messages/events")
}

pub fn devicebound_path(device_id: &str) -> String {
    format!("/devices/{device_id}/messages/devicebound")
}

/// Path used to complete (and, with `reject=true`, reject) a received message.
pub fn complete_path(device_id: &str, etag: &str) -> String {
    format!("/devices/{device_id}/messages/devicebound/{etag}")
}

pub fn abandon_path(device_id: &str, etag: &str) -> String {
    format!("/devices/{device_id}/messages/devicebound/{etag}/abandon")
}

/// Query string for a reject request (the api-version is appended by [`https_url`]).
pub const REJECT_QUERY: &str = "reject=true";

/// Build a full request URL from a base (`https://{hostname}`), a path, and
/// optional extra query parameters.
pub fn https_url(base: &str, path: &str, extra_query: Option<&str>) -> String {
    let base = base.trim_end_matches('/');
    match extra_query {
        Some(query) => format!("{base}{path}?{query}&api-version={API_VERSION}"),
        None => format!("{base}{path}?api-version={API_VERSION}"),
    }
}

/// Default HTTPS base for a hub hostname.
pub fn https_base(hostname: &str) -> String {
    format!("https://{hostname}")
}

/// Resource URI a device SAS token is scoped to.
pub fn resource_uri(hostname: &str, device_id: &str) -> String {
    format!("{hostname}/devices/{device_id}")
}

// ─── MQTT topics ───

pub fn mqtt_username(hostname: &str, device_id: &str) -> String {
    format!("{hostname}/{device_id}/?api-version={MQTT_API_VERSION}")
}

/// Telemetry topic with an already-encoded property bag appended.
pub fn mqtt_events_topic(device_id: &str, property_bag: &str) -> String {
    format!("devices/{device_id}/messages/events/{property_bag}")
}

/// Subscription filter for cloud-to-device messages.
pub fn mqtt_devicebound_filter(device_id: &str) -> String {
    format!("devices/{device_id}/messages/devicebound/#")
}

/// Extract the property bag from a cloud-to-device topic.
/// Returns `None` if the topic is not a devicebound topic for `device_id`.
pub fn parse_devicebound_topic<'a>(device_id: &str, topic: &'a str) -> Option<&'a str> {
    let prefix = format!("devices/{device_id}/messages/devicebound");
    let rest = topic.strip_prefix(prefix.as_str())?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_url() {
        let url = https_url(&https_base("hub.example.net"), &events_path("dev-1"), None);
        assert_eq!(
            url,
            "https://hub.example.net/devices/dev-1/messages/events?api-version=2016-02-03"
        );
    }

    #[test]
    fn devicebound_url() {
        let url = https_url(
            &https_base("hub.example.net"),
            &devicebound_path("dev-1"),
            None,
        );
        assert_eq!(
            url,
            "https://hub.example.net/devices/dev-1/messages/devicebound?api-version=2016-02-03"
        );
    }

    #[test]
    fn result_paths() {
        assert_eq!(
            complete_path("dev-1", "abc"),
            "/devices/dev-1/messages/devicebound/abc"
        );
        assert_eq!(
            abandon_path("dev-1", "abc"),
            "/devices/dev-1/messages/devicebound/abc/abandon"
        );
    }

    #[test]
    fn reject_url_keeps_both_query_params() {
        let url = https_url(
            "http://127.0.0.1:8080/",
            &complete_path("dev-1", "abc"),
            Some(REJECT_QUERY),
        );
        assert_eq!(
            url,
            "http://127.0.0.1:8080/devices/dev-1/messages/devicebound/abc?reject=true&api-version=2016-02-03"
        );
    }

    #[test]
    fn resource_uri_for_token() {
        assert_eq!(
            resource_uri("hub.example.net", "dev-1"),
            "hub.example.net/devices/dev-1"
        );
    }

    #[test]
    fn mqtt_topics() {
        assert_eq!(
            mqtt_username("hub.example.net", "dev-1"),
            "hub.example.net/dev-1/?api-version=2016-11-14"
        );
        assert_eq!(
            mqtt_events_topic("dev-1", "k=v"),
            "devices/dev-1/messages/events/k=v"
        );
        assert_eq!(
            mqtt_devicebound_filter("dev-1"),
            "devices/dev-1/messages/devicebound/#"
        );
    }

    #[test]
    fn parse_devicebound() {
        assert_eq!(
            parse_devicebound_topic("dev-1", "devices/dev-1/messages/devicebound/%24.mid=1&a=b"),
            Some("%24.mid=1&a=b")
        );
        assert_eq!(
            parse_devicebound_topic("dev-1", "devices/dev-1/messages/devicebound"),
            Some("")
        );
        assert_eq!(
            parse_devicebound_topic("dev-1", "devices/dev-2/messages/devicebound/x"),
            None
        );
        assert_eq!(
            parse_devicebound_topic("dev-1", "devices/dev-1/messages/devicebounder"),
            None
        );
    }
}
