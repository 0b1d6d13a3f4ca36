//! Serde support for durations that arrive either as humantime strings
//! ("5m", "2h", "30s") or as bare integers interpreted as nanoseconds.
//!
//! Use with `#[serde(with = "radar_config::duration")]`, or the `option`
//! submodule for `Option<Duration>` fields.

use std::time::Duration;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Raw {
    Nanos(u64),
    Text(String),
}

fn from_raw<E: serde::de::Error>(raw: Raw) -> Result<Duration, E> {
    match raw {
        Raw::Nanos(n) => Ok(Duration::from_nanos(n)),
        Raw::Text(s) => humantime::parse_duration(&s)
            .map_err(|e| E::custom(format!("invalid duration '{}': {}", s, e))),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    from_raw(Raw::deserialize(d)?)
}

pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&humantime::format_duration(*value).to_string())
}

pub mod option {
    use super::*;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            Some(raw) => from_raw(raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => s.serialize_some(&humantime::format_duration(*v).to_string()),
            None => s.serialize_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Holder {
        #[serde(with = "crate::duration")]
        interval: Duration,
        #[serde(default, with = "crate::duration::option")]
        timeout: Option<Duration>,
    }

    #[test]
    fn parses_humantime_strings() {
        let h: Holder = serde_json::from_str(r#"{"interval": "5m"}"#).unwrap();
        assert_eq!(h.interval, Duration::from_secs(300));
        let h: Holder = serde_json::from_str(r#"{"interval": "2h"}"#).unwrap();
        assert_eq!(h.interval, Duration::from_secs(7200));
    }

    #[test]
    fn parses_integer_nanoseconds() {
        let h: Holder = serde_json::from_str(r#"{"interval": 30000000000}"#).unwrap();
        assert_eq!(h.interval, Duration::from_secs(30));
    }

    #[test]
    fn optional_duration_defaults_to_none() {
        let h: Holder = serde_json::from_str(r#"{"interval": "1s"}"#).unwrap();
        assert!(h.timeout.is_none());
        let h: Holder =
            serde_json::from_str(r#"{"interval": "1s", "timeout": "10s"}"#).unwrap();
        assert_eq!(h.timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn rejects_malformed_strings() {
        let err = serde_json::from_str::<Holder>(r#"{"interval": "fast"}"#);
        assert!(err.is_err());
    }
}
