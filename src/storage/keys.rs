//! Key layout of the Aimpoint Store bucket
//!
//! - `targets/<domain>/<id>.json`   active aimpoint document
//! - `monitored/<domain>/<id>.json` monitored aimpoint document
//! - `selected/selected-<domain>.json` selection overlay
//! - `status/<stem>/<YYYYMMDDhhmmss>_<epochMillis>_<success|failure>` outcome record
//! - `stills/<YYYY>/<MM>/<DD>/<stem>/` still-image landing area

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;

pub const TARGETS_PREFIX: &str = "targets";
pub const MONITORED_PREFIX: &str = "monitored";
pub const SELECTED_PREFIX: &str = "selected";
pub const STATUS_PREFIX: &str = "status";
pub const STILLS_PREFIX: &str = "stills";

const AIMPOINT_EXT: &str = ".json";
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// The two disjoint keyspaces an aimpoint can live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    Active,
    Monitored,
}

impl Placement {
    pub fn prefix(&self) -> &'static str {
        match self {
            Placement::Active => TARGETS_PREFIX,
            Placement::Monitored => MONITORED_PREFIX,
        }
    }

    pub fn other(&self) -> Placement {
        match self {
            Placement::Active => Placement::Monitored,
            Placement::Monitored => Placement::Active,
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Location of one aimpoint document
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AimpointKey {
    pub placement: Placement,
    pub domain: String,
    pub id: String,
}

impl AimpointKey {
    pub fn new(placement: Placement, domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            placement,
            domain: domain.into(),
            id: id.into(),
        }
    }

    /// Decode `targets/<domain>/<id>.json` or `monitored/<domain>/<id>.json`
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split('/');
        let placement = match parts.next()? {
            TARGETS_PREFIX => Placement::Active,
            MONITORED_PREFIX => Placement::Monitored,
            _ => return None,
        };
        let domain = parts.next().filter(|d| !d.is_empty())?;
        let file = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        let id = file.strip_suffix(AIMPOINT_EXT).filter(|id| !id.is_empty())?;
        Some(Self::new(placement, domain, id))
    }

    pub fn with_placement(&self, placement: Placement) -> Self {
        Self {
            placement,
            ..self.clone()
        }
    }

    pub fn to_key(&self) -> String {
        format!(
            "{}/{}/{}{}",
            self.placement.prefix(),
            self.domain,
            self.id,
            AIMPOINT_EXT
        )
    }
}

impl fmt::Display for AimpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_key())
    }
}

/// Encode the overlay key: selected/selected-{domain}.json
pub fn overlay_key(domain: &str) -> String {
    format!("{}/selected-{}.json", SELECTED_PREFIX, domain)
}

/// Decode the domain from `selected/selected-{domain}.json`
pub fn overlay_domain(key: &str) -> Option<&str> {
    key.strip_prefix(SELECTED_PREFIX)?
        .strip_prefix("/selected-")?
        .strip_suffix(AIMPOINT_EXT)
        .filter(|domain| !domain.is_empty() && !domain.contains('/'))
}

/// Encode the history prefix for range scans: status/{stem}/
pub fn status_prefix(stem: &str) -> String {
    format!("{}/{}/", STATUS_PREFIX, stem)
}

/// Encode a startAfter cursor: status/{stem}/{YYYYMMDDhhmmss}
pub fn status_cursor(stem: &str, since: DateTime<Utc>) -> String {
    format!("{}{}", status_prefix(stem), since.format(STAMP_FORMAT))
}

/// Encode the stills landing prefix: stills/{YYYY}/{MM}/{DD}/{stem}/
pub fn stills_prefix(stem: &str, day: DateTime<Utc>) -> String {
    format!("{}/{}/{}/", STILLS_PREFIX, day.format("%Y/%m/%d"), stem)
}

/// Result of one collection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn from_collecting(is_collecting: bool) -> Self {
        if is_collecting {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

/// Outcome record key; the key is the whole record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeKey {
    pub stem: String,
    pub epoch_ms: i64,
    pub outcome: Outcome,
}

impl OutcomeKey {
    pub fn new(stem: impl Into<String>, epoch_ms: i64, outcome: Outcome) -> Self {
        Self {
            stem: stem.into(),
            epoch_ms,
            outcome,
        }
    }

    /// Encode status/{stem}/{YYYYMMDDhhmmss}_{epochMillis}_{outcome}
    pub fn to_key(&self) -> Option<String> {
        let at = Utc.timestamp_millis_opt(self.epoch_ms).single()?;
        Some(format!(
            "{}{}_{}_{}",
            status_prefix(&self.stem),
            at.format(STAMP_FORMAT),
            self.epoch_ms,
            self.outcome.as_str()
        ))
    }

    /// Decode a full outcome key
    pub fn parse(key: &str) -> Option<Self> {
        let rest = key.strip_prefix(STATUS_PREFIX)?.strip_prefix('/')?;
        let (stem, name) = rest.rsplit_once('/')?;
        let mut fields = name.split('_');
        let stamp = fields.next()?;
        let epoch_ms: i64 = fields.next()?.parse().ok()?;
        let outcome = match fields.next()? {
            "success" => Outcome::Success,
            "failure" => Outcome::Failure,
            _ => return None,
        };
        if fields.next().is_some() || stamp.len() != 14 || stem.is_empty() {
            return None;
        }
        Some(Self::new(stem, epoch_ms, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aimpoint_key_encoding() {
        let key = AimpointKey::new(Placement::Active, "rdtc", "12");
        assert_eq!(key.to_key(), "targets/rdtc/12.json");

        let moved = key.with_placement(Placement::Monitored);
        assert_eq!(moved.to_key(), "monitored/rdtc/12.json");

        assert_eq!(AimpointKey::parse("monitored/rdtc/12.json"), Some(moved));
    }

    #[test]
    fn test_overlay_domain_decoding() {
        assert_eq!(overlay_domain(&overlay_key("rdtc")), Some("rdtc"));
        assert_eq!(overlay_domain("selected/selected-.json"), None);
        assert_eq!(overlay_domain("selected/other.json"), None);
        assert_eq!(overlay_domain("targets/rdtc/12.json"), None);
    }

    #[test]
    fn test_aimpoint_key_rejects_other_layouts() {
        assert_eq!(AimpointKey::parse("selected/selected-rdtc.json"), None);
        assert_eq!(AimpointKey::parse("targets/rdtc/12.txt"), None);
        assert_eq!(AimpointKey::parse("targets/12.json"), None);
        assert_eq!(AimpointKey::parse("targets/rdtc/sub/12.json"), None);
        assert_eq!(AimpointKey::parse("targets//12.json"), None);
    }

    #[test]
    fn test_overlay_and_status_keys() {
        assert_eq!(overlay_key("avanta"), "selected/selected-avanta.json");
        assert_eq!(status_prefix("rdtc12"), "status/rdtc12/");

        let since = Utc.with_ymd_and_hms(2024, 5, 1, 7, 8, 9).unwrap();
        assert_eq!(status_cursor("rdtc12", since), "status/rdtc12/20240501070809");
        assert_eq!(stills_prefix("rdtc12", since), "stills/2024/05/01/rdtc12/");
    }

    #[test]
    fn test_outcome_key_encoding() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 7, 8, 9).unwrap();
        let ms = at.timestamp_millis() + 123;
        let key = OutcomeKey::new("rdtc12", ms, Outcome::Failure);
        let encoded = key.to_key().unwrap();
        assert_eq!(
            encoded,
            format!("status/rdtc12/20240501070809_{}_failure", ms)
        );
        assert_eq!(OutcomeKey::parse(&encoded), Some(key));
        assert_eq!(OutcomeKey::parse("status/rdtc12/garbage"), None);
    }

    #[test]
    fn test_outcome_keys_sort_by_time() {
        let base = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap().timestamp_millis();
        let keys: Vec<String> = [0, 1, 999, 1000, 1500, 2001]
            .iter()
            .map(|offset| {
                OutcomeKey::new("cam", base + offset, Outcome::Success)
                    .to_key()
                    .unwrap()
            })
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
