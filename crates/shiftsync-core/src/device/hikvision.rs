//! HikVision access-control adapter (ISAPI over HTTP).
//!
//! The reader exposes its event log through the ISAPI REST surface:
//! `GET /ISAPI/System/deviceInfo` as a connectivity probe, then
//! `POST /ISAPI/AcsEvent?format=json` with an `AcsEventCond` search body,
//! paginated via `searchResultPosition` until the device stops answering
//! `MORE`.

use std::time::Duration;

use chrono::NaiveDateTime;
use reqwest::blocking::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{AttendanceSource, ClockEvent, DeviceDescriptor, DeviceKind, VerificationMode};
use crate::error::DeviceError;
use crate::storage::config::DeviceConfig;

/// Page size for AcsEvent searches. The device caps a single reply well
/// below its log capacity, so pulls walk `searchResultPosition`.
const PAGE_SIZE: u32 = 500;

/// ISAPI timestamp layout, zone suffix already stripped.
const TIME_FMT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct HikVision {
    descriptor: DeviceDescriptor,
    base_url: String,
    username: String,
    password: String,
    timeout: Duration,
    client: Option<Client>,
}

impl HikVision {
    pub fn new(
        descriptor: DeviceDescriptor,
        port: u16,
        username: String,
        password: String,
        timeout: Duration,
    ) -> Self {
        let base_url = format!("http://{}:{}/ISAPI", descriptor.addr, port);
        Self {
            descriptor,
            base_url,
            username,
            password,
            timeout,
            client: None,
        }
    }

    /// Build with an explicit base URL (for tests against a local server).
    pub fn with_base_url(
        descriptor: DeviceDescriptor,
        base_url: String,
        username: String,
        password: String,
        timeout: Duration,
    ) -> Self {
        Self {
            descriptor,
            base_url,
            username,
            password,
            timeout,
            client: None,
        }
    }

    pub fn from_config(cfg: &DeviceConfig) -> Self {
        Self::new(
            cfg.descriptor(),
            cfg.port,
            cfg.username.clone().unwrap_or_else(|| "admin".to_string()),
            cfg.password.clone().unwrap_or_default(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    fn unreachable(&self, message: String) -> DeviceError {
        DeviceError::Unreachable {
            kind: DeviceKind::HikVision,
            addr: self.descriptor.addr.clone(),
            message,
        }
    }

    fn map_transport(&self, err: reqwest::Error) -> DeviceError {
        if err.is_timeout() {
            DeviceError::Timeout {
                kind: DeviceKind::HikVision,
                addr: self.descriptor.addr.clone(),
            }
        } else {
            self.unreachable(err.to_string())
        }
    }

    /// One AcsEvent search page starting at `position`.
    fn fetch_page(
        &self,
        client: &Client,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
        position: u32,
    ) -> Result<Value, DeviceError> {
        let payload = json!({
            "AcsEventCond": {
                "searchID": "1",
                "searchResultPosition": position,
                "maxResults": PAGE_SIZE,
                "major": 5,
                "minor": 1,
                "startTime": format!("{}Z", window_start.format(TIME_FMT)),
                "endTime": format!("{}Z", window_end.format(TIME_FMT)),
            }
        });

        let response = client
            .post(format!("{}/AcsEvent?format=json", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .json(&payload)
            .send()
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(DeviceError::Protocol {
                kind: DeviceKind::HikVision,
                message: format!("AcsEvent search returned HTTP {}", response.status()),
            });
        }

        response.json::<Value>().map_err(|e| DeviceError::Protocol {
            kind: DeviceKind::HikVision,
            message: format!("invalid AcsEvent JSON: {e}"),
        })
    }
}

impl AttendanceSource for HikVision {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn connect(&mut self) -> Result<(), DeviceError> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| self.unreachable(e.to_string()))?;

        let response = client
            .get(format!("{}/System/deviceInfo", self.base_url))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .map_err(|e| self.map_transport(e))?;

        if !response.status().is_success() {
            return Err(self.unreachable(format!("deviceInfo returned HTTP {}", response.status())));
        }

        self.client = Some(client);
        Ok(())
    }

    fn pull(
        &mut self,
        window_start: NaiveDateTime,
        window_end: NaiveDateTime,
    ) -> Result<Vec<ClockEvent>, DeviceError> {
        let client = self.client.as_ref().ok_or(DeviceError::NotConnected {
            kind: DeviceKind::HikVision,
        })?;

        let mut events = Vec::new();
        let mut position = 0u32;
        loop {
            let page = self.fetch_page(client, window_start, window_end, position)?;
            let body = &page["AcsEvent"];

            // A single-event reply arrives as an object, not a list.
            let entries: Vec<&Value> = match &body["InfoList"] {
                Value::Array(list) => list.iter().collect(),
                single @ Value::Object(_) => vec![single],
                _ => Vec::new(),
            };

            position += entries.len() as u32;
            for entry in entries {
                if let Some(event) = decode_entry(entry) {
                    events.push(event);
                }
            }

            if body["responseStatusStrg"].as_str() != Some("MORE") {
                break;
            }
        }

        debug!(
            device = %self.descriptor.addr,
            count = events.len(),
            "pulled HikVision access events"
        );
        Ok(events)
    }

    fn disconnect(&mut self) {
        self.client = None;
    }
}

/// Decode one `InfoList` entry. Entries without a usable timestamp are
/// dropped here; field-level validation of the rest happens at the writer.
fn decode_entry(entry: &Value) -> Option<ClockEvent> {
    let raw_time = entry["time"].as_str().unwrap_or_default();
    if raw_time.is_empty() {
        debug!("dropping access event without timestamp");
        return None;
    }

    // "2024-05-01T08:00:03+08:00" -> "2024-05-01T08:00:03"
    let trimmed = raw_time
        .split('+')
        .next()
        .unwrap_or(raw_time)
        .trim_end_matches('Z');
    let timestamp = match NaiveDateTime::parse_from_str(trimmed, TIME_FMT) {
        Ok(t) => t,
        Err(_) => {
            warn!(time = raw_time, "dropping access event with malformed timestamp");
            return None;
        }
    };

    let verification = entry["verificationMode"]
        .as_str()
        .map(VerificationMode::from_label)
        .unwrap_or(VerificationMode::Face);

    Some(ClockEvent {
        user_id: entry["employeeNoString"].as_str().unwrap_or_default().to_string(),
        name: entry["name"].as_str().map(str::to_string),
        timestamp,
        verification,
        raw_status: entry["minor"].as_i64(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceRole;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            kind: DeviceKind::HikVision,
            addr: "192.168.1.30".to_string(),
            location: "Main Entrance".to_string(),
            role: DeviceRole::Entry,
        }
    }

    fn adapter(server: &mockito::Server) -> HikVision {
        HikVision::with_base_url(
            descriptor(),
            format!("{}/ISAPI", server.url()),
            "admin".to_string(),
            "secret".to_string(),
            Duration::from_secs(2),
        )
    }

    fn window() -> (NaiveDateTime, NaiveDateTime) {
        (
            NaiveDateTime::parse_from_str("2024-05-01T00:00:00", TIME_FMT).unwrap(),
            NaiveDateTime::parse_from_str("2024-05-01T12:00:00", TIME_FMT).unwrap(),
        )
    }

    #[test]
    fn connect_probes_device_info() {
        let mut server = mockito::Server::new();
        let probe = server
            .mock("GET", "/ISAPI/System/deviceInfo")
            .with_status(200)
            .with_body("{}")
            .create();

        let mut hik = adapter(&server);
        hik.connect().unwrap();
        probe.assert();
    }

    #[test]
    fn connect_rejects_auth_failure() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ISAPI/System/deviceInfo")
            .with_status(401)
            .create();

        let mut hik = adapter(&server);
        assert!(matches!(
            hik.connect(),
            Err(DeviceError::Unreachable { .. })
        ));
    }

    #[test]
    fn pull_requires_connect() {
        let server = mockito::Server::new();
        let mut hik = adapter(&server);
        let (start, end) = window();
        assert!(matches!(
            hik.pull(start, end),
            Err(DeviceError::NotConnected { .. })
        ));
    }

    #[test]
    fn pull_decodes_info_list() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ISAPI/System/deviceInfo")
            .with_status(200)
            .with_body("{}")
            .create();
        server
            .mock("POST", "/ISAPI/AcsEvent?format=json")
            .with_status(200)
            .with_body(
                r#"{"AcsEvent":{"responseStatusStrg":"OK","numOfMatches":2,"InfoList":[
                    {"employeeNoString":"7","name":"Ada","time":"2024-05-01T08:00:03+08:00","verificationMode":"Face","minor":1},
                    {"employeeNoString":"9","time":"2024-05-01T08:05:00Z"}
                ]}}"#,
            )
            .create();

        let mut hik = adapter(&server);
        hik.connect().unwrap();
        let (start, end) = window();
        let events = hik.pull(start, end).unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].user_id, "7");
        assert_eq!(events[0].name.as_deref(), Some("Ada"));
        assert_eq!(
            events[0].timestamp,
            NaiveDateTime::parse_from_str("2024-05-01T08:00:03", TIME_FMT).unwrap()
        );
        assert_eq!(events[0].verification, VerificationMode::Face);
        // Missing verificationMode defaults to Face; missing name stays None.
        assert_eq!(events[1].verification, VerificationMode::Face);
        assert_eq!(events[1].name, None);
    }

    #[test]
    fn pull_skips_entries_without_timestamps() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ISAPI/System/deviceInfo")
            .with_status(200)
            .with_body("{}")
            .create();
        server
            .mock("POST", "/ISAPI/AcsEvent?format=json")
            .with_status(200)
            .with_body(
                r#"{"AcsEvent":{"responseStatusStrg":"OK","InfoList":[
                    {"employeeNoString":"7"},
                    {"employeeNoString":"8","time":"not a time"},
                    {"employeeNoString":"9","time":"2024-05-01T09:00:00"}
                ]}}"#,
            )
            .create();

        let mut hik = adapter(&server);
        hik.connect().unwrap();
        let (start, end) = window();
        let events = hik.pull(start, end).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, "9");
    }

    #[test]
    fn pull_handles_single_object_info_list() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ISAPI/System/deviceInfo")
            .with_status(200)
            .with_body("{}")
            .create();
        server
            .mock("POST", "/ISAPI/AcsEvent?format=json")
            .with_status(200)
            .with_body(
                r#"{"AcsEvent":{"responseStatusStrg":"OK","InfoList":
                    {"employeeNoString":"7","time":"2024-05-01T08:00:00"}}}"#,
            )
            .create();

        let mut hik = adapter(&server);
        hik.connect().unwrap();
        let (start, end) = window();
        assert_eq!(hik.pull(start, end).unwrap().len(), 1);
    }

    #[test]
    fn pull_follows_more_pages() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/ISAPI/System/deviceInfo")
            .with_status(200)
            .with_body("{}")
            .create();
        let page1 = server
            .mock("POST", "/ISAPI/AcsEvent?format=json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"AcsEventCond":{"searchResultPosition":0}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"AcsEvent":{"responseStatusStrg":"MORE","InfoList":[
                    {"employeeNoString":"7","time":"2024-05-01T08:00:00"}
                ]}}"#,
            )
            .create();
        let page2 = server
            .mock("POST", "/ISAPI/AcsEvent?format=json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"AcsEventCond":{"searchResultPosition":1}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{"AcsEvent":{"responseStatusStrg":"OK","InfoList":[
                    {"employeeNoString":"8","time":"2024-05-01T08:01:00"}
                ]}}"#,
            )
            .create();

        let mut hik = adapter(&server);
        hik.connect().unwrap();
        let (start, end) = window();
        let events = hik.pull(start, end).unwrap();
        assert_eq!(events.len(), 2);
        page1.assert();
        page2.assert();
    }
}
