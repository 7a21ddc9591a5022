use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of samples kept in one subject's history window.
pub const HISTORY_WINDOW_CAP: usize = 200;

/// Identifier of a tracked subject (a child account). Scope key for channel
/// subscriptions and history windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SubjectId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// One location fix for a subject. `ts` is the only ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub lat: f64,
    pub lng: f64,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    #[error("coordinates are not finite (lat={lat}, lng={lng})")]
    NonFinite { lat: f64, lng: f64 },
    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("{field} must be a non-negative number, got {value}")]
    InvalidMeasurement { field: &'static str, value: f64 },
}

impl LocationSample {
    pub fn new(lat: f64, lng: f64, ts: DateTime<Utc>) -> Self {
        Self {
            lat,
            lng,
            ts,
            accuracy: None,
            speed: None,
            heading: None,
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    /// Two samples describe the same fix when timestamp and coordinates match.
    /// Accuracy and speed do not distinguish entries.
    pub fn same_fix(&self, other: &Self) -> bool {
        self.ts == other.ts && self.lat == other.lat && self.lng == other.lng
    }

    pub fn validate(&self) -> Result<(), SampleError> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(SampleError::NonFinite {
                lat: self.lat,
                lng: self.lng,
            });
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(SampleError::LatitudeOutOfRange(self.lat));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(SampleError::LongitudeOutOfRange(self.lng));
        }
        for (field, value) in [("accuracy", self.accuracy), ("speed", self.speed)] {
            if let Some(value) = value
                && !(value.is_finite() && value >= 0.0)
            {
                return Err(SampleError::InvalidMeasurement { field, value });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    #[test]
    fn decodes_backend_ping_shape() {
        let raw = r#"{
            "lat": 12.97,
            "lng": 77.59,
            "accuracy": 8.5,
            "heading": 270,
            "ts": "2026-03-01T10:15:00.000Z",
            "deviceId": "ignored"
        }"#;

        let sample: LocationSample = serde_json::from_str(raw).expect("ping should decode");
        assert_eq!(sample.point(), GeoPoint::new(12.97, 77.59));
        assert_eq!(sample.accuracy, Some(8.5));
        assert_eq!(sample.speed, None);
        assert_eq!(sample.heading, Some(270.0));
        assert_eq!(sample.ts.to_rfc3339(), "2026-03-01T10:15:00+00:00");
    }

    #[test]
    fn decode_rejects_missing_or_malformed_timestamp() {
        assert!(serde_json::from_str::<LocationSample>(r#"{"lat":1,"lng":2}"#).is_err());
        assert!(
            serde_json::from_str::<LocationSample>(r#"{"lat":1,"lng":2,"ts":"yesterday"}"#)
                .is_err()
        );
    }

    #[test]
    fn offsets_are_normalised_to_utc() {
        let sample: LocationSample =
            serde_json::from_str(r#"{"lat":0,"lng":0,"ts":"2026-03-01T12:00:00+02:00"}"#)
                .expect("offset timestamp should decode");
        assert_eq!(sample.ts, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn same_fix_ignores_measurements() {
        let mut a = LocationSample::new(1.0, 2.0, at(100));
        let mut b = a.clone();
        a.accuracy = Some(3.0);
        b.speed = Some(1.5);
        assert!(a.same_fix(&b));
        b.lng = 2.5;
        assert!(!a.same_fix(&b));
    }

    #[test]
    fn validate_rejects_impossible_samples() {
        assert_eq!(
            LocationSample::new(91.0, 0.0, at(0)).validate(),
            Err(SampleError::LatitudeOutOfRange(91.0))
        );
        assert_eq!(
            LocationSample::new(0.0, -180.5, at(0)).validate(),
            Err(SampleError::LongitudeOutOfRange(-180.5))
        );
        assert!(matches!(
            LocationSample::new(f64::NAN, 0.0, at(0)).validate(),
            Err(SampleError::NonFinite { .. })
        ));

        let mut sample = LocationSample::new(0.0, 0.0, at(0));
        sample.accuracy = Some(-1.0);
        assert_eq!(
            sample.validate(),
            Err(SampleError::InvalidMeasurement {
                field: "accuracy",
                value: -1.0
            })
        );
    }

    #[test]
    fn validate_accepts_boundaries() {
        assert!(LocationSample::new(-90.0, 180.0, at(0)).validate().is_ok());
        assert!(LocationSample::new(90.0, -180.0, at(0)).validate().is_ok());
    }
}
