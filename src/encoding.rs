//! Sample set to wire payload encoding
//!
//! Two fixed schemas are supported: a bare temperature value and a
//! three-field weather object. Fixed-point values render as
//! `<integer>.<six-digit fraction>` with the fractional token always
//! unsigned; the sign of a reading is carried only by the integer part.
//! Payloads are bounded and truncated at the bound rather than grown.

use crate::protocol::CONTENT_TYPE_JSON;
use crate::sensor::{Measurement, SampleSet};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Payload bound for the single-value schema
pub const TEMPERATURE_PAYLOAD_BOUND: usize = 32;
/// Payload bound for the weather schema
pub const WEATHER_PAYLOAD_BOUND: usize = 128;

/// Which fixed payload schema this device publishes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSchema {
    /// Single numeric string, e.g. `21.500000`
    #[default]
    Temperature,
    /// JSON object with `tem`, `pre` and `hum` fields
    Weather,
}

impl PayloadSchema {
    pub fn payload_bound(&self) -> usize {
        match self {
            PayloadSchema::Temperature => TEMPERATURE_PAYLOAD_BOUND,
            PayloadSchema::Weather => WEATHER_PAYLOAD_BOUND,
        }
    }
}

/// An encoded payload plus its content-type tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub body: String,
    pub content_type: &'static str,
}

impl EncodedPayload {
    pub fn into_bytes(self) -> Vec<u8> {
        self.body.into_bytes()
    }
}

/// Render a fixed-point measurement as `<int>.<abs(frac):06>`
pub fn format_fixed(m: Measurement) -> String {
    format!("{}.{:06}", m.integer, m.micros.unsigned_abs())
}

/// Encode one sample set under the given schema
pub fn encode(sample: &SampleSet, schema: PayloadSchema) -> EncodedPayload {
    let body = match schema {
        PayloadSchema::Temperature => format_fixed(sample.temperature),
        PayloadSchema::Weather => format!(
            "{{\"tem\":{},\"pre\":{},\"hum\":{}}}",
            format_fixed(sample.temperature),
            // Missing optional channels encode as 0.000000
            format_fixed(sample.pressure.unwrap_or_default()),
            format_fixed(sample.humidity.unwrap_or_default()),
        ),
    };

    EncodedPayload {
        body: bound_payload(body, schema.payload_bound()),
        content_type: CONTENT_TYPE_JSON,
    }
}

/// Truncate a payload to its bound without splitting a UTF-8 sequence
fn bound_payload(mut body: String, bound: usize) -> String {
    if body.len() > bound {
        let mut cut = bound;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        warn!(
            len = body.len(),
            bound, "payload exceeds bound, truncating"
        );
        body.truncate(cut);
    }
    body
}
