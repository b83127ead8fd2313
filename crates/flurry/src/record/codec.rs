//! Protobuf value codec for stored records.
//!
//! The value stored under `<dev_type>:<dev_id>` is a `UserApps` message:
//!
//! ```text
//! message UserApps {
//!     repeated uint32 apps = 1 [packed=true];
//!     optional double lat = 2;
//!     optional double lon = 3;
//! }
//! ```

use bytes::Bytes;
use prost::Message;
use snafu::prelude::*;

use super::{AppIdPolicy, Record, decode};
use crate::error::{CodecError, DecodeSnafu, EncodeSnafu, MismatchSnafu, SampleLineSnafu};

/// Wire form of a stored value.
#[derive(Clone, PartialEq, Message)]
pub struct AppsValue {
    #[prost(uint32, repeated, packed = "true", tag = "1")]
    pub apps: Vec<u32>,
    #[prost(double, optional, tag = "2")]
    pub lat: Option<f64>,
    #[prost(double, optional, tag = "3")]
    pub lon: Option<f64>,
}

impl From<&Record> for AppsValue {
    fn from(record: &Record) -> Self {
        Self {
            apps: record.apps.clone(),
            lat: Some(record.lat),
            lon: Some(record.lon),
        }
    }
}

/// A record ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedPayload {
    pub key: String,
    pub value: Bytes,
}

/// Serialize a record into its store key and value.
pub fn encode_record(record: &Record) -> Result<SerializedPayload, CodecError> {
    let value = AppsValue::from(record);
    let mut buf = Vec::with_capacity(value.encoded_len());
    value.encode(&mut buf).context(EncodeSnafu)?;

    Ok(SerializedPayload {
        key: record.key(),
        value: Bytes::from(buf),
    })
}

/// Parse a stored value.
pub fn decode_value(bytes: &[u8]) -> Result<AppsValue, CodecError> {
    AppsValue::decode(bytes).context(DecodeSnafu)
}

/// Lines used by [`self_test`].
pub const SAMPLE_LINES: [&str; 2] = [
    "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23",
    "gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424",
];

/// Decode the sample lines, encode them, decode the values back and compare.
///
/// Coordinates must match bit for bit and app ids must keep their order.
pub fn self_test() -> Result<(), CodecError> {
    for line in SAMPLE_LINES {
        let record = decode(line, AppIdPolicy::Strict).map_err(|failure| {
            SampleLineSnafu {
                line,
                reason: failure.as_str(),
            }
            .build()
        })?;
        let payload = encode_record(&record)?;
        let value = decode_value(&payload.value)?;

        let same_geo = value.lat.map(f64::to_bits) == Some(record.lat.to_bits())
            && value.lon.map(f64::to_bits) == Some(record.lon.to_bits());
        ensure!(
            same_geo && value.apps == record.apps,
            MismatchSnafu { key: payload.key }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_test_passes() {
        self_test().unwrap();
    }

    #[test]
    fn test_encode_record() {
        let record = decode("idfa\tA1\t55.55\t42.42\t1,2,3", AppIdPolicy::Lenient).unwrap();
        let payload = encode_record(&record).unwrap();

        assert_eq!(payload.key, "idfa:A1");
        let value = decode_value(&payload.value).unwrap();
        assert_eq!(value.apps, vec![1, 2, 3]);
        assert_eq!(value.lat, Some(55.55));
        assert_eq!(value.lon, Some(42.42));
    }

    #[test]
    fn test_apps_are_packed() {
        let record = decode("idfa\tA1\t0\t0\t1,2,3", AppIdPolicy::Lenient).unwrap();
        let payload = encode_record(&record).unwrap();

        // Field 1, wire type 2 (length delimited), three one-byte varints
        assert_eq!(&payload.value[..5], &[0x0a, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_empty_apps_round_trip() {
        let record = decode("dvid\tZ\t-0.0\t1e-300\tnope", AppIdPolicy::Lenient).unwrap();
        let value = decode_value(&encode_record(&record).unwrap().value).unwrap();

        assert!(value.apps.is_empty());
        assert_eq!(value.lat.map(f64::to_bits), Some((-0.0f64).to_bits()));
        assert_eq!(value.lon, Some(1e-300));
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(matches!(
            decode_value(&[0xff, 0xff, 0xff]),
            Err(CodecError::Decode { .. })
        ));
    }
}
