use bon::Builder;
use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Aimpoint parse/validation errors (the "malformed aimpoint" class)
#[derive(Debug, Error)]
pub enum AimpointError {
    #[error("aimpoint JSON invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("aimpoint field '{field}' invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid working hours range '{0}', expected HHMM-HHMM")]
    InvalidHourRange(String),

    #[error("unknown time zone '{0}'")]
    UnknownTimeZone(String),
}

pub type Result<T> = std::result::Result<T, AimpointError>;

/// Closed set of collection types understood by the control plane.
///
/// Unknown tags fail deserialization, so they are rejected at the bus edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollectionType {
    #[serde(rename = "M3U")]
    M3u,
    #[serde(rename = "FIRST")]
    First,
    #[serde(rename = "STILLS")]
    Stills,
    #[serde(rename = "STREAM")]
    Stream,
    #[serde(rename = "OPTION")]
    OptionPage,
    #[serde(rename = "YOUTUB")]
    Youtube,
    #[serde(rename = "YTFILE")]
    YoutubeFile,
    #[serde(rename = "IVIDEO")]
    Ivideo,
    #[serde(rename = "UFANET")]
    Ufanet,
    #[serde(rename = "RTSPME")]
    RtspMe,
    #[serde(rename = "IPLIVE")]
    IpLive,
    #[serde(rename = "HNGCLD")]
    HngCloud,
    #[serde(rename = "GNDONG")]
    Gndong,
    #[serde(rename = "BAZNET")]
    Baznet,
    #[serde(rename = "FSTLLS")]
    FileStills,
    #[serde(rename = "ISTLLS")]
    IndexStills,
    #[serde(rename = "PLAYWRIGHT")]
    Playwright,
    #[serde(rename = "IMAGEINJSON")]
    ImageInJson,
}

impl CollectionType {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::M3u => "M3U",
            Self::First => "FIRST",
            Self::Stills => "STILLS",
            Self::Stream => "STREAM",
            Self::OptionPage => "OPTION",
            Self::Youtube => "YOUTUB",
            Self::YoutubeFile => "YTFILE",
            Self::Ivideo => "IVIDEO",
            Self::Ufanet => "UFANET",
            Self::RtspMe => "RTSPME",
            Self::IpLive => "IPLIVE",
            Self::HngCloud => "HNGCLD",
            Self::Gndong => "GNDONG",
            Self::Baznet => "BAZNET",
            Self::FileStills => "FSTLLS",
            Self::IndexStills => "ISTLLS",
            Self::Playwright => "PLAYWRIGHT",
            Self::ImageInJson => "IMAGEINJSON",
        }
    }
}

impl fmt::Display for CollectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One working-hours range in local minutes-of-day. `end <= start` wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourRange {
    pub start_min: u32,
    pub end_min: u32,
}

impl HourRange {
    pub fn wraps_midnight(&self) -> bool {
        self.end_min <= self.start_min
    }
}

impl FromStr for HourRange {
    type Err = AimpointError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AimpointError::InvalidHourRange(s.to_string());
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start_min = parse_hhmm(start).ok_or_else(invalid)?;
        let end_min = parse_hhmm(end).ok_or_else(invalid)?;
        Ok(Self { start_min, end_min })
    }
}

impl fmt::Display for HourRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}{:02}-{:02}{:02}",
            self.start_min / 60,
            self.start_min % 60,
            self.end_min / 60,
            self.end_min % 60
        )
    }
}

/// "HHMM" (or "HH:MM") to minutes of day; "2400" is accepted as end of day.
fn parse_hhmm(s: &str) -> Option<u32> {
    let digits: String = s.trim().chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = digits[..2].parse().ok()?;
    let mins: u32 = digits[2..].parse().ok()?;
    match (hours, mins) {
        (24, 0) => Some(24 * 60),
        (h, m) if h < 24 && m < 60 => Some(h * 60 + m),
        _ => None,
    }
}

/// Working hours for an aimpoint, validated at parse time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawHours", into = "RawHours")]
pub struct WorkingHours {
    pub tz: Tz,
    pub ranges: Vec<HourRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawHours {
    tz: String,
    #[serde(default)]
    ranges: Vec<String>,
}

impl TryFrom<RawHours> for WorkingHours {
    type Error = AimpointError;

    fn try_from(raw: RawHours) -> Result<Self> {
        let tz: Tz = raw
            .tz
            .parse()
            .map_err(|_| AimpointError::UnknownTimeZone(raw.tz.clone()))?;
        let ranges = raw
            .ranges
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<HourRange>>>()?;
        Ok(Self { tz, ranges })
    }
}

impl From<WorkingHours> for RawHours {
    fn from(hours: WorkingHours) -> Self {
        Self {
            tz: hours.tz.name().to_string(),
            ranges: hours.ranges.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Optional ffmpeg-style options forwarded untouched to video workers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeOptions {
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub output: Map<String, Value>,
}

/// Canonical description of one collectible target.
///
/// Optional document fields are defaulted here, so downstream code never
/// probes for missing keys. Unknown fields survive a parse/serialize cycle
/// through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(rename_all = "camelCase")]
pub struct Aimpoint {
    #[serde(rename = "deviceID")]
    #[builder(into)]
    pub device_id: String,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    pub enabled: bool,
    #[serde(default)]
    #[builder(default)]
    pub decoy: bool,
    pub collection_type: CollectionType,
    #[builder(into)]
    pub access_url: String,
    /// Seconds between fetches
    pub poll_frequency: u64,
    /// Hours between probes while monitored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_frequency: Option<u64>,
    #[serde(default)]
    #[builder(default)]
    pub single_collector: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<WorkingHours>,
    #[serde(default)]
    #[builder(default)]
    pub coll_regions: Vec<String>,
    #[builder(into)]
    pub filename_base: String,
    #[serde(default)]
    #[builder(default, into)]
    pub final_file_suffix: String,
    #[serde(default)]
    #[builder(default, into)]
    pub bucket_prefix_template: String,
    #[serde(default)]
    #[builder(default)]
    pub long_lat: [f64; 2],
    #[serde(default)]
    #[builder(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcode_options: Option<TranscodeOptions>,
    #[serde(default)]
    #[builder(default)]
    pub vpn: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub proxy: Option<String>,
    #[serde(flatten)]
    #[builder(default)]
    pub extra: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Aimpoint {
    /// Parse and validate an aimpoint document
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let aimpoint: Aimpoint = serde_json::from_slice(bytes)?;
        aimpoint.validate()?;
        Ok(aimpoint)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() {
            return Err(invalid("deviceID", "must not be empty"));
        }
        if self.access_url.trim().is_empty() {
            return Err(invalid("accessUrl", "must not be empty"));
        }
        if self.poll_frequency == 0 {
            return Err(invalid("pollFrequency", "must be a positive number of seconds"));
        }
        if self.monitor_frequency == Some(0) {
            return Err(invalid("monitorFrequency", "must be a positive number of hours"));
        }
        if self.filename_base.trim().is_empty() {
            return Err(invalid("filenameBase", "must not be empty"));
        }
        Ok(())
    }

    /// Stable identifier shared by history, status and delivery keys
    pub fn file_stem(&self) -> String {
        self.filename_base.replace("{deviceID}", &self.device_id)
    }

    /// Expand `{deviceID,year,month,day,hour,mins,secs,epoch}` placeholders
    pub fn render(&self, template: &str, at: DateTime<Utc>) -> String {
        template
            .replace("{deviceID}", &self.device_id)
            .replace("{year}", &format!("{:04}", at.year()))
            .replace("{month}", &format!("{:02}", at.month()))
            .replace("{day}", &format!("{:02}", at.day()))
            .replace("{hour}", &format!("{:02}", at.hour()))
            .replace("{mins}", &format!("{:02}", at.minute()))
            .replace("{secs}", &format!("{:02}", at.second()))
            .replace("{epoch}", &at.timestamp().to_string())
    }

    /// Final object name of one capture: rendered filenameBase + finalFileSuffix
    pub fn final_file_name(&self, at: DateTime<Utc>) -> String {
        let base = self.render(&self.filename_base, at);
        let suffix = self.render(&self.final_file_suffix, at);
        format!("{base}{suffix}")
    }

    pub fn bucket_prefix(&self, at: DateTime<Utc>) -> String {
        self.render(&self.bucket_prefix_template, at)
    }

    pub fn monitor_frequency_or(&self, default_hours: u64) -> u64 {
        self.monitor_frequency.unwrap_or(default_hours).max(1)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn invalid(field: &'static str, reason: &str) -> AimpointError {
    AimpointError::InvalidField {
        field,
        reason: reason.to_string(),
    }
}
