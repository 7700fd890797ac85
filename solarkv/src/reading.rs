//! Meter readings, metric kinds, and stored samples.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of a site (a solar installation with one meter).
pub type SiteId = u64;

/// The three quantities recorded for every reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    /// Watt-hours generated.
    #[serde(rename = "whG")]
    WhGenerated,
    /// Watt-hours used.
    #[serde(rename = "whU")]
    WhUsed,
    /// Temperature in degrees Celsius.
    #[serde(rename = "tempC")]
    TempCelsius,
}

impl MetricKind {
    /// All metric kinds, in the order they are written.
    pub const ALL: [Self; 3] = [Self::WhGenerated, Self::WhUsed, Self::TempCelsius];

    /// Short name used inside storage keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WhGenerated => "whG",
            Self::WhUsed => "whU",
            Self::TempCelsius => "tempC",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::invalid(format!("unknown metric kind '{s}'")))
    }
}

/// A reading reported by a site's meter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// The reporting site.
    pub site_id: SiteId,
    /// Watt-hours used since the previous reading.
    pub wh_used: f64,
    /// Watt-hours generated since the previous reading.
    pub wh_generated: f64,
    /// Temperature in degrees Celsius.
    pub temp_c: f64,
    /// When the reading was taken.
    pub timestamp: DateTime<Utc>,
}

/// Field names of a reading stored as a log record.
const FIELD_SITE_ID: &str = "site_id";
const FIELD_WH_USED: &str = "wh_used";
const FIELD_WH_GENERATED: &str = "wh_generated";
const FIELD_TEMP_C: &str = "temp_c";
const FIELD_TIMESTAMP: &str = "timestamp";

impl MeterReading {
    /// Generated minus used energy: the site's current surplus capacity.
    pub fn current_capacity(&self) -> f64 {
        self.wh_generated - self.wh_used
    }

    /// Returns the recorded value for `kind`.
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::WhGenerated => self.wh_generated,
            MetricKind::WhUsed => self.wh_used,
            MetricKind::TempCelsius => self.temp_c,
        }
    }

    /// Checks that every numeric field is finite.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] naming the first non-finite field.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            (FIELD_WH_USED, self.wh_used),
            (FIELD_WH_GENERATED, self.wh_generated),
            (FIELD_TEMP_C, self.temp_c),
        ] {
            if !value.is_finite() {
                return Err(Error::invalid(format!(
                    "reading for site {} has non-finite {name}: {value}",
                    self.site_id
                )));
            }
        }
        Ok(())
    }

    /// Encodes the reading as the field map stored in feed logs.
    ///
    /// The timestamp is written as fractional Unix seconds.
    #[allow(clippy::cast_precision_loss)] // millisecond epochs fit in f64's mantissa
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let seconds = self.timestamp.timestamp_millis() as f64 / 1000.0;
        vec![
            (FIELD_SITE_ID.to_string(), self.site_id.to_string()),
            (FIELD_WH_USED.to_string(), self.wh_used.to_string()),
            (FIELD_WH_GENERATED.to_string(), self.wh_generated.to_string()),
            (FIELD_TEMP_C.to_string(), self.temp_c.to_string()),
            (FIELD_TIMESTAMP.to_string(), seconds.to_string()),
        ]
    }

    /// Decodes a field map written by [`MeterReading::to_fields`].
    ///
    /// Returns `None` if any field is missing or unparsable.
    #[allow(clippy::cast_possible_truncation)] // rounded epoch millis are in i64 range
    pub fn from_fields(fields: &[(String, String)]) -> Option<Self> {
        let field = |name: &str| {
            fields
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };
        let number = |name: &str| field(name)?.parse::<f64>().ok();

        let seconds = number(FIELD_TIMESTAMP)?;
        if !seconds.is_finite() {
            return None;
        }

        Some(Self {
            site_id: field(FIELD_SITE_ID)?.parse().ok()?,
            wh_used: number(FIELD_WH_USED)?,
            wh_generated: number(FIELD_WH_GENERATED)?,
            temp_c: number(FIELD_TEMP_C)?,
            timestamp: DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)?,
        })
    }
}

/// One stored data point of one metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// The site the sample belongs to.
    pub site_id: SiteId,
    /// Which quantity was measured.
    pub kind: MetricKind,
    /// Minute-resolution time of the sample.
    pub timestamp: DateTime<Utc>,
    /// The measured value.
    pub value: f64,
}
