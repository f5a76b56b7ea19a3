//! Analysis of sequence payloads.
//!
//! A sequence is the timed list of actions the controller plays during a
//! cycle:
//!
//! ```json
//! {"sequence": [
//!   {"time": "0",  "command": "switch", "action": "LuceStartButton", "parameter": "on"},
//!   {"time": "12", "command": "dmx",    "action": "fade",            "parameter": "40 red 6"}
//! ]}
//! ```
//!
//! Times arrive as strings or numbers, in seconds from cycle start.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, DomainResult};

/// Duration assumed for a DMX fade that does not specify one.
pub const DEFAULT_FADE_SECS: f64 = 2.0;

/// One timed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceEvent {
    pub time: f64,
    pub command: String,
    pub action: String,
    pub parameter: String,
}

impl SequenceEvent {
    fn from_value(value: &Value) -> DomainResult<Self> {
        let time = match value.get("time") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|t| t.is_finite())
        .ok_or_else(|| DomainError::ParseError {
            field: "time".to_string(),
            reason: format!("expected a number of seconds in {value}"),
        })?;

        Ok(Self {
            time,
            command: string_field(value, "command"),
            action: string_field(value, "action"),
            parameter: string_field(value, "parameter"),
        })
    }

    /// Duration of a DMX effect, `None` for instant actions.
    fn effect_duration(&self) -> Option<f64> {
        match self.action.as_str() {
            "fade" | "fade_dimmer" => Some(
                self.parameter
                    .split_whitespace()
                    .nth(2)
                    .and_then(|d| d.parse::<f64>().ok())
                    .unwrap_or(DEFAULT_FADE_SECS),
            ),
            _ => None,
        }
    }
}

fn string_field(value: &Value, field: &str) -> String {
    match value.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Switch events for one output, ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchLane {
    pub name: String,
    /// `(time, on)` pairs.
    pub events: Vec<(f64, bool)>,
}

/// A DMX action placed on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DmxEffect {
    pub action: String,
    pub parameter: String,
    pub start: f64,
    /// `None` for instant actions.
    pub duration: Option<f64>,
    pub end: f64,
    /// The effect is still running when the sequence ends.
    pub exceeds_timeline: bool,
}

impl DmxEffect {
    /// Seconds the effect runs past the end of the sequence.
    pub fn overflow(&self, total_time: f64) -> f64 {
        (self.end - total_time).max(0.0)
    }
}

/// Timeline view of a sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceAnalysis {
    pub events: Vec<SequenceEvent>,
    /// Time of the last event.
    pub total_time: f64,
    pub lanes: Vec<SwitchLane>,
    pub dmx_effects: Vec<DmxEffect>,
}

impl SequenceAnalysis {
    /// Analyses a sequence payload.
    ///
    /// Accepts either `{"sequence": [...]}` or a bare event array.
    pub fn from_value(value: &Value) -> DomainResult<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("sequence") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(DomainError::ParseError {
                        field: "sequence".to_string(),
                        reason: "missing event array".to_string(),
                    })
                }
            },
            other => {
                return Err(DomainError::ParseError {
                    field: "sequence".to_string(),
                    reason: format!("unexpected payload {other}"),
                })
            }
        };

        let events = items
            .iter()
            .map(SequenceEvent::from_value)
            .collect::<DomainResult<Vec<_>>>()?;

        Ok(Self::from_events(events))
    }

    pub fn from_events(events: Vec<SequenceEvent>) -> Self {
        let total_time = events.iter().map(|e| e.time).fold(0.0_f64, f64::max);

        let mut lanes: BTreeMap<String, Vec<(f64, bool)>> = BTreeMap::new();
        let mut dmx_effects = Vec::new();

        for event in &events {
            match event.command.as_str() {
                "switch" => {
                    lanes
                        .entry(event.action.clone())
                        .or_default()
                        .push((event.time, event.parameter == "on"));
                }
                "dmx" => {
                    let duration = event.effect_duration();
                    let end = event.time + duration.unwrap_or(0.0);
                    dmx_effects.push(DmxEffect {
                        action: event.action.clone(),
                        parameter: event.parameter.clone(),
                        start: event.time,
                        duration,
                        end,
                        exceeds_timeline: end > total_time,
                    });
                }
                _ => {}
            }
        }

        let lanes = lanes
            .into_iter()
            .map(|(name, mut events)| {
                events.sort_by(|a, b| a.0.total_cmp(&b.0));
                SwitchLane { name, events }
            })
            .collect();

        Self {
            events,
            total_time,
            lanes,
            dmx_effects,
        }
    }

    /// Effects that run past the end of the sequence.
    pub fn overflowing_effects(&self) -> impl Iterator<Item = &DmxEffect> {
        self.dmx_effects.iter().filter(|e| e.exceeds_timeline)
    }
}
