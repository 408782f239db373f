//! Per-domain selection overlay (`selected/selected-<domain>.json`)

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Status token a generator reads to decide whether, and where, to emit an aimpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusToken {
    On,
    Off,
    Decoy,
    Mp4,
    Monitor,
    MonitorDecoy,
    MonitorMp4,
    /// Operator-defined token; never rewritten
    Other(String),
}

impl StatusToken {
    pub fn as_str(&self) -> &str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Decoy => "decoy",
            Self::Mp4 => "mp4",
            Self::Monitor => "monitor",
            Self::MonitorDecoy => "monitor-decoy",
            Self::MonitorMp4 => "monitor-mp4",
            Self::Other(token) => token,
        }
    }

    /// Monitored form of an active token; other tokens are unchanged
    pub fn demoted(&self) -> Self {
        match self {
            Self::On => Self::Monitor,
            Self::Mp4 => Self::MonitorMp4,
            Self::Decoy => Self::MonitorDecoy,
            other => other.clone(),
        }
    }

    /// Active form of a monitored token; other tokens are unchanged
    pub fn promoted(&self) -> Self {
        match self {
            Self::Monitor => Self::On,
            Self::MonitorMp4 => Self::Mp4,
            Self::MonitorDecoy => Self::Decoy,
            other => other.clone(),
        }
    }

    pub fn is_monitored(&self) -> bool {
        matches!(self, Self::Monitor | Self::MonitorDecoy | Self::MonitorMp4)
    }
}

impl From<String> for StatusToken {
    fn from(value: String) -> Self {
        match value.as_str() {
            "on" => Self::On,
            "off" => Self::Off,
            "decoy" => Self::Decoy,
            "mp4" => Self::Mp4,
            "monitor" => Self::Monitor,
            "monitor-decoy" => Self::MonitorDecoy,
            "monitor-mp4" => Self::MonitorMp4,
            _ => Self::Other(value),
        }
    }
}

impl From<StatusToken> for String {
    fn from(token: StatusToken) -> Self {
        token.as_str().to_string()
    }
}

impl fmt::Display for StatusToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Selection overlay document. Fields other than `selections` are preserved.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionOverlay {
    #[serde(default)]
    pub selections: BTreeMap<String, StatusToken>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SelectionOverlay {
    pub fn from_json(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn token(&self, device_id: &str) -> Option<&StatusToken> {
        self.selections.get(device_id)
    }

    /// Rewrite the tokens of `device_ids` to their monitored form.
    /// Returns the number of tokens that changed.
    pub fn demote<'a, I>(&mut self, device_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.rewrite(device_ids, StatusToken::demoted)
    }

    /// Rewrite the tokens of `device_ids` to their active form.
    pub fn promote<'a, I>(&mut self, device_ids: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.rewrite(device_ids, StatusToken::promoted)
    }

    fn rewrite<'a, I, F>(&mut self, device_ids: I, transition: F) -> usize
    where
        I: IntoIterator<Item = &'a str>,
        F: Fn(&StatusToken) -> StatusToken,
    {
        let mut changed = 0;
        for device_id in device_ids {
            if let Some(token) = self.selections.get_mut(device_id) {
                let next = transition(token);
                if next != *token {
                    *token = next;
                    changed += 1;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay() -> SelectionOverlay {
        SelectionOverlay::from_json(
            br#"{"selections":{"11":"on","12":"on","13":"mp4","14":"decoy","15":"off","16":"paused"},
                 "generatedBy":"rdtc-generator"}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_token_parsing() {
        let overlay = overlay();
        assert_eq!(overlay.token("11"), Some(&StatusToken::On));
        assert_eq!(overlay.token("16"), Some(&StatusToken::Other("paused".into())));
        assert_eq!(overlay.token("99"), None);
    }

    #[test]
    fn test_demote_only_named_ids() {
        let mut overlay = overlay();
        let changed = overlay.demote(["12", "13", "14", "15", "16", "99"]);
        assert_eq!(changed, 3);
        assert_eq!(overlay.token("11"), Some(&StatusToken::On));
        assert_eq!(overlay.token("12"), Some(&StatusToken::Monitor));
        assert_eq!(overlay.token("13"), Some(&StatusToken::MonitorMp4));
        assert_eq!(overlay.token("14"), Some(&StatusToken::MonitorDecoy));
        assert_eq!(overlay.token("15"), Some(&StatusToken::Off));
        assert_eq!(overlay.token("16"), Some(&StatusToken::Other("paused".into())));
    }

    #[test]
    fn test_promote_reverses_demote() {
        let mut overlay = overlay();
        let before = overlay.clone();
        overlay.demote(["11", "13", "14"]);
        assert!(overlay.token("11").unwrap().is_monitored());
        overlay.promote(["11", "13", "14"]);
        assert_eq!(overlay, before);
    }

    #[test]
    fn test_serialization_keeps_extra_fields() {
        let mut overlay = overlay();
        overlay.demote(["12"]);
        let json: Value = serde_json::from_slice(&overlay.to_json().unwrap()).unwrap();
        assert_eq!(json["selections"]["12"], "monitor");
        assert_eq!(json["selections"]["16"], "paused");
        assert_eq!(json["generatedBy"], "rdtc-generator");
    }
}
