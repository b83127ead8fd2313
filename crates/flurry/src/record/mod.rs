//! Device install records and line decoding.
//!
//! An input line is `dev_type \t dev_id \t lat \t lon \t app,app,...`. The
//! first field is the destination key that picks a shard.

pub mod codec;

pub use codec::{AppsValue, SerializedPayload, encode_record, self_test};

/// One decoded input line.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Destination key (`idfa`, `gaid`, ...).
    pub dev_type: String,
    /// Device identifier, unique within its destination.
    pub dev_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Installed application ids in input order.
    pub apps: Vec<u32>,
}

impl Record {
    /// Store key: `<dev_type>:<dev_id>`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.dev_type, self.dev_id)
    }
}

/// How unparsable app ids are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AppIdPolicy {
    /// Drop the bad entry and keep the rest of the line.
    #[default]
    Lenient,
    /// Reject the whole line.
    Strict,
}

impl AppIdPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            AppIdPolicy::Strict
        } else {
            AppIdPolicy::Lenient
        }
    }
}

/// Why a line did not produce a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailure {
    /// Fewer than five fields, or an empty key or id.
    Malformed,
    /// Latitude or longitude is not a number.
    InvalidGeo,
    /// An app id failed to parse under the strict policy.
    InvalidAppIds,
}

impl DecodeFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeFailure::Malformed => "malformed",
            DecodeFailure::InvalidGeo => "invalid_geo",
            DecodeFailure::InvalidAppIds => "invalid_app_ids",
        }
    }
}

/// Decode one non-blank line.
///
/// Surrounding whitespace is trimmed before splitting on tabs. Fields past
/// the fifth are ignored. Empty app id tokens (e.g. a trailing comma) are
/// skipped under both policies.
pub fn decode(line: &str, policy: AppIdPolicy) -> Result<Record, DecodeFailure> {
    let mut fields = line.trim().split('\t');
    let (Some(dev_type), Some(dev_id), Some(lat), Some(lon), Some(raw_apps)) = (
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
        fields.next(),
    ) else {
        return Err(DecodeFailure::Malformed);
    };
    if dev_type.is_empty() || dev_id.is_empty() {
        return Err(DecodeFailure::Malformed);
    }

    let apps = parse_apps(raw_apps, policy)?;

    let (Ok(lat), Ok(lon)) = (lat.trim().parse::<f64>(), lon.trim().parse::<f64>()) else {
        return Err(DecodeFailure::InvalidGeo);
    };

    Ok(Record {
        dev_type: dev_type.to_string(),
        dev_id: dev_id.to_string(),
        lat,
        lon,
        apps,
    })
}

fn parse_apps(raw: &str, policy: AppIdPolicy) -> Result<Vec<u32>, DecodeFailure> {
    let mut apps = Vec::new();
    for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<u32>() {
            Ok(app) => apps.push(app),
            Err(_) if policy == AppIdPolicy::Lenient => {}
            Err(_) => return Err(DecodeFailure::InvalidAppIds),
        }
    }
    Ok(apps)
}
