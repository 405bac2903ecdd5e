//! Marker extraction
//!
//! Finds sentinel-prefixed JSON payloads in the fully buffered model output.
//! For each known sentinel only its first occurrence counts; the payload runs
//! from just after the sentinel to the next recognized sentinel or the end of
//! the text. A payload that does not parse as JSON is skipped and logged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Known payload sentinels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Graph,
    Chart,
}

impl Marker {
    pub const ALL: [Marker; 2] = [Marker::Graph, Marker::Chart];

    /// Literal that announces this payload in model output (case-sensitive)
    pub fn sentinel(&self) -> &'static str {
        match self {
            Marker::Graph => "GRAPH_JSON:",
            Marker::Chart => "CHART_JSON:",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Marker::Graph => "graph",
            Marker::Chart => "chart",
        }
    }
}

/// One extracted structured payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub marker: Marker,
    pub json: Value,
}

/// Extract at most one payload per marker, in order of appearance
pub fn extract(text: &str) -> Vec<Payload> {
    let mut found: Vec<(usize, Payload)> = Marker::ALL
        .iter()
        .filter_map(|marker| {
            let position = text.find(marker.sentinel())?;
            let start = position + marker.sentinel().len();
            let end = next_sentinel(text, start).unwrap_or(text.len());
            let raw = text[start..end].trim();
            if raw.is_empty() {
                debug!(marker = marker.as_str(), "Marker without payload");
                return None;
            }
            match serde_json::from_str::<Value>(raw) {
                Ok(json) => Some((
                    position,
                    Payload {
                        marker: *marker,
                        json,
                    },
                )),
                Err(e) => {
                    warn!(marker = marker.as_str(), error = %e, "Payload after marker is not valid JSON; skipping");
                    None
                }
            }
        })
        .collect();
    found.sort_by_key(|(position, _)| *position);
    found.into_iter().map(|(_, payload)| payload).collect()
}

/// Byte offset of the earliest known sentinel at or after `from`
fn next_sentinel(text: &str, from: usize) -> Option<usize> {
    let rest = &text[from..];
    Marker::ALL
        .iter()
        .filter_map(|marker| rest.find(marker.sentinel()))
        .min()
        .map(|offset| from + offset)
}

/// Payload for `marker`, if one was extracted
pub fn payload_for(payloads: &[Payload], marker: Marker) -> Option<&Value> {
    payloads
        .iter()
        .find(|payload| payload.marker == marker)
        .map(|payload| &payload.json)
}
