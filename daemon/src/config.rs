use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{ConfigCorruptError, InvalidValueError};

/// Root configuration structure. Persisted as `<app_dir>/config.json`.
///
/// The JSON field names (`telegram`, `spy_entries`, `img_path`) are an external
/// contract shared with earlier versions of the file and must not change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigData {
    #[serde(rename = "telegram")]
    pub notification_target: NotificationTarget,
    #[serde(rename = "spy_entries", default)]
    pub monitor_targets: Vec<MonitorTarget>,
}

/// Messaging-service credential and the chats every alert is sent to.
///
/// Only constructible through [`NotificationTarget::new`] (or by loading a
/// file), so every value held in memory can be written and read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "NotificationTargetRecord", into = "NotificationTargetRecord")]
pub struct NotificationTarget {
    /// Opaque bot token. Empty means "not configured yet".
    token: String,
    /// Destination chats, delivered to in this order (delivery itself races).
    chat_ids: Vec<String>,
}

impl NotificationTarget {
    /// Fails if any chat id is blank.
    pub fn new<I, S>(token: impl Into<String>, chat_ids: I) -> Result<Self, InvalidValueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let chat_ids: Vec<String> = chat_ids.into_iter().map(Into::into).collect();
        if let Some(i) = chat_ids.iter().position(|id| id.trim().is_empty()) {
            return Err(InvalidValueError::new("chat_ids", format!("entry {i} is empty")));
        }
        Ok(Self {
            token: token.into(),
            chat_ids,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn chat_ids(&self) -> &[String] {
        &self.chat_ids
    }

    /// True when there is a token and at least one chat to deliver to.
    pub fn is_configured(&self) -> bool {
        !self.token.is_empty() && !self.chat_ids.is_empty()
    }
}

/// A single site to watch. Identity is by value: two entries with the same
/// url, interval and image path are the same target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "MonitorTargetRecord", into = "MonitorTargetRecord")]
pub struct MonitorTarget {
    url: String,
    interval_seconds: f64,
    image_path: PathBuf,
}

impl MonitorTarget {
    /// Fails on a blank url, an interval that is not a finite positive number,
    /// or an image path that is empty or not valid UTF-8.
    pub fn new(
        url: impl Into<String>,
        interval_seconds: f64,
        image_path: impl Into<PathBuf>,
    ) -> Result<Self, InvalidValueError> {
        let url = url.into();
        let image_path = image_path.into();
        if url.trim().is_empty() {
            return Err(InvalidValueError::new("url", "is empty"));
        }
        if !interval_seconds.is_finite() || interval_seconds <= 0.0 {
            return Err(InvalidValueError::new(
                "interval_seconds",
                format!("must be a positive number, got {interval_seconds}"),
            ));
        }
        match image_path.to_str() {
            None => return Err(InvalidValueError::new("img_path", "is not valid UTF-8")),
            Some("") => return Err(InvalidValueError::new("img_path", "is empty")),
            Some(_) => {}
        }
        Ok(Self {
            url,
            interval_seconds,
            image_path,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval_seconds(&self) -> f64 {
        self.interval_seconds
    }

    pub fn image_path(&self) -> &Path {
        &self.image_path
    }
}

impl fmt::Display for MonitorTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} every {}s -> {}",
            self.url,
            self.interval_seconds,
            self.image_path.display()
        )
    }
}

// On-disk shapes. Deserializing goes through the validating constructors.

#[derive(Serialize, Deserialize)]
struct NotificationTargetRecord {
    token: String,
    chat_ids: Vec<String>,
}

impl TryFrom<NotificationTargetRecord> for NotificationTarget {
    type Error = InvalidValueError;

    fn try_from(record: NotificationTargetRecord) -> Result<Self, Self::Error> {
        Self::new(record.token, record.chat_ids)
    }
}

impl From<NotificationTarget> for NotificationTargetRecord {
    fn from(target: NotificationTarget) -> Self {
        Self {
            token: target.token,
            chat_ids: target.chat_ids,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MonitorTargetRecord {
    url: String,
    interval_seconds: f64,
    #[serde(rename = "img_path", with = "posix_path")]
    image_path: PathBuf,
}

impl TryFrom<MonitorTargetRecord> for MonitorTarget {
    type Error = InvalidValueError;

    fn try_from(record: MonitorTargetRecord) -> Result<Self, Self::Error> {
        Self::new(record.url, record.interval_seconds, record.image_path)
    }
}

impl From<MonitorTarget> for MonitorTargetRecord {
    fn from(target: MonitorTarget) -> Self {
        Self {
            url: target.url,
            interval_seconds: target.interval_seconds,
            image_path: target.image_path,
        }
    }
}

/// Parses and validates the raw bytes of a config file.
///
/// Bytes that are not JSON are reported as [`ConfigCorruptError::Unreadable`];
/// JSON that does not describe a valid configuration is [`ConfigCorruptError::Schema`].
pub fn parse_config(bytes: &[u8]) -> Result<ConfigData, ConfigCorruptError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| ConfigCorruptError::Unreadable(e.to_string()))?;
    let data: ConfigData =
        serde_json::from_value(value).map_err(|e| ConfigCorruptError::Schema(e.to_string()))?;
    Ok(data)
}

/// Serializes `data` as 4-space indented JSON followed by a newline.
pub fn encode_config(data: &ConfigData) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::with_capacity(256);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    data.serialize(&mut ser)?;
    out.push(b'\n');
    Ok(out)
}

/// Serializes paths with forward slashes regardless of the host separator.
mod posix_path {
    use serde::{de, ser, Deserialize, Deserializer, Serializer};
    use std::path::{Path, PathBuf};

    pub fn serialize<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
        let s = path
            .to_str()
            .ok_or_else(|| ser::Error::custom("image path is not valid UTF-8"))?;
        #[cfg(windows)]
        let s = s.replace('\\', "/");
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PathBuf, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(de::Error::custom("img_path is empty"));
        }
        Ok(PathBuf::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConfigData {
        ConfigData {
            notification_target: NotificationTarget::new("123:abc", ["111", "222"]).unwrap(),
            monitor_targets: vec![
                MonitorTarget::new("https://example.com", 60.0, "img/example.png").unwrap(),
                MonitorTarget::new("https://example.org/news", 2.5, "/abs/img/news.png").unwrap(),
            ],
        }
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn default_is_unconfigured_and_empty() {
        let c = ConfigData::default();
        assert!(!c.notification_target.is_configured());
        assert!(c.monitor_targets.is_empty());
    }

    #[test]
    fn is_configured_requires_token_and_chat() {
        assert!(NotificationTarget::new("t", ["1"]).unwrap().is_configured());
        assert!(!NotificationTarget::new("", ["1"]).unwrap().is_configured());
        assert!(!NotificationTarget::new("t", Vec::<String>::new()).unwrap().is_configured());
    }

    // ── construction ──────────────────────────────────────────────────────────

    #[test]
    fn monitor_target_rejects_values_the_loader_rejects() {
        let bad = [
            MonitorTarget::new("https://a.example", 0.0, "a.png"),
            MonitorTarget::new("https://a.example", -1.5, "a.png"),
            MonitorTarget::new("https://a.example", f64::NAN, "a.png"),
            MonitorTarget::new("https://a.example", f64::INFINITY, "a.png"),
            MonitorTarget::new("  ", 1.0, "a.png"),
            MonitorTarget::new("https://a.example", 1.0, ""),
        ];
        for result in bad {
            assert!(result.is_err(), "accepted {result:?}");
        }

        let err = MonitorTarget::new("https://a.example", 0.0, "a.png").unwrap_err();
        assert_eq!(err.field, "interval_seconds");
    }

    #[cfg(unix)]
    #[test]
    fn monitor_target_rejects_non_utf8_image_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let path = PathBuf::from(OsStr::from_bytes(&[b'a', 0xff, b'.', b'p']));
        let err = MonitorTarget::new("https://a.example", 1.0, path).unwrap_err();
        assert_eq!(err.field, "img_path");
    }

    #[test]
    fn notification_target_rejects_blank_chat_id() {
        let err = NotificationTarget::new("t", ["1", " "]).unwrap_err();
        assert_eq!(err.field, "chat_ids");
        assert!(NotificationTarget::new("", Vec::<String>::new()).is_ok());
    }

    #[test]
    fn accepted_values_survive_a_round_trip() {
        let data = ConfigData {
            notification_target: NotificationTarget::new("", ["-100123"]).unwrap(),
            monitor_targets: vec![
                MonitorTarget::new("https://a.example", 0.001, "a.png").unwrap(),
                MonitorTarget::new("https://b.example", 1e12, "img/ü b.png").unwrap(),
            ],
        };
        assert_eq!(parse_config(&encode_config(&data).unwrap()).unwrap(), data);
    }

    // ── encoding ──────────────────────────────────────────────────────────────

    #[test]
    fn encode_uses_contract_field_names() {
        let bytes = encode_config(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["telegram"]["token"], "123:abc");
        assert_eq!(value["telegram"]["chat_ids"][1], "222");
        assert_eq!(value["spy_entries"][0]["url"], "https://example.com");
        assert_eq!(value["spy_entries"][0]["interval_seconds"], 60.0);
        assert_eq!(value["spy_entries"][0]["img_path"], "img/example.png");
    }

    #[test]
    fn encode_is_indented_and_newline_terminated() {
        let text = String::from_utf8(encode_config(&sample()).unwrap()).unwrap();
        assert!(text.starts_with("{\n    \"telegram\""));
        assert!(text.ends_with("}\n"));
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let cases = [
            ConfigData::default(),
            sample(),
            ConfigData {
                notification_target: NotificationTarget::new("tok", ["dup", "dup"]).unwrap(),
                monitor_targets: vec![],
            },
        ];
        for original in cases {
            let parsed = parse_config(&encode_config(&original).unwrap()).unwrap();
            assert_eq!(parsed, original);
        }
    }

    // ── parse_config ──────────────────────────────────────────────────────────

    #[test]
    fn parse_accepts_file_without_spy_entries() {
        let c = parse_config(br#"{"telegram": {"token": "", "chat_ids": []}}"#).unwrap();
        assert!(c.monitor_targets.is_empty());
    }

    #[test]
    fn parse_ignores_unknown_fields() {
        let c = parse_config(
            br#"{"telegram": {"token": "t", "chat_ids": ["1"], "placeholder": "123"}, "extra": 1}"#,
        )
        .unwrap();
        assert_eq!(c.notification_target.token(), "t");
    }

    #[test]
    fn parse_reports_garbage_as_unreadable() {
        for bytes in [&b"not json at all"[..], &b"{\"telegram\": "[..], &[0xff, 0xfe, 0x00][..]] {
            assert!(matches!(
                parse_config(bytes),
                Err(ConfigCorruptError::Unreadable(_))
            ));
        }
    }

    #[test]
    fn parse_reports_shape_errors_as_schema() {
        let cases: [&[u8]; 4] = [
            b"[]",
            br#"{"spy_entries": []}"#,
            br#"{"telegram": {"token": 5, "chat_ids": []}}"#,
            br#"{"telegram": {"token": "", "chat_ids": []}, "spy_entries": [{"url": "u"}]}"#,
        ];
        for bytes in cases {
            assert!(
                matches!(parse_config(bytes), Err(ConfigCorruptError::Schema(_))),
                "expected schema error for {}",
                String::from_utf8_lossy(bytes)
            );
        }
    }

    #[test]
    fn parse_rejects_non_positive_interval() {
        for interval in ["0", "-1.5"] {
            let json = format!(
                r#"{{"telegram": {{"token": "", "chat_ids": []}},
                    "spy_entries": [{{"url": "u", "interval_seconds": {interval}, "img_path": "a.png"}}]}}"#
            );
            assert!(matches!(
                parse_config(json.as_bytes()),
                Err(ConfigCorruptError::Schema(_))
            ));
        }
    }

    #[test]
    fn parse_rejects_empty_chat_id_and_url() {
        let empty_chat = br#"{"telegram": {"token": "t", "chat_ids": ["1", " "]}}"#;
        assert!(matches!(parse_config(empty_chat), Err(ConfigCorruptError::Schema(_))));

        let empty_url = br#"{"telegram": {"token": "", "chat_ids": []},
            "spy_entries": [{"url": "", "interval_seconds": 1, "img_path": "a.png"}]}"#;
        assert!(matches!(parse_config(empty_url), Err(ConfigCorruptError::Schema(_))));
    }

    #[test]
    fn parse_reads_posix_image_paths() {
        let c = parse_config(
            br#"{"telegram": {"token": "", "chat_ids": []},
                "spy_entries": [{"url": "u", "interval_seconds": 1, "img_path": "img/a/b.png"}]}"#,
        )
        .unwrap();
        let expected: PathBuf = ["img", "a", "b.png"].iter().collect();
        assert_eq!(c.monitor_targets[0].image_path(), expected.as_path());
    }

    // ── display ───────────────────────────────────────────────────────────────

    #[test]
    fn monitor_target_display_names_the_url() {
        let t = MonitorTarget::new("https://example.com", 30.0, "a.png").unwrap();
        assert_eq!(t.to_string(), "https://example.com every 30s -> a.png");
    }
}
