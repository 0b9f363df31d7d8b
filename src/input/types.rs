use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::datetime_from_epoch_secs;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(&self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }

    pub fn parse(value: &str) -> Result<Self, InputError> {
        match value.to_ascii_lowercase().as_str() {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(InputError::MalformedEvent(format!(
                "unknown mouse button '{other}'"
            ))),
        }
    }
}

/// A single input notification, timestamped when it was delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    PointerMove {
        x: f64,
        y: f64,
        at: DateTime<Utc>,
    },
    PointerButton {
        button: MouseButton,
        pressed: bool,
        at: DateTime<Utc>,
    },
    KeyPress {
        at: DateTime<Utc>,
    },
}

impl InputEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            InputEvent::PointerMove { at, .. }
            | InputEvent::PointerButton { at, .. }
            | InputEvent::KeyPress { at } => *at,
        }
    }
}

/// Wire form of an input event, one JSON object per line.
///
/// `t` is optional fractional epoch seconds; when absent the receiver stamps
/// the event at delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RawEvent {
    #[serde(rename_all = "camelCase")]
    PointerMove {
        x: f64,
        y: f64,
        #[serde(default)]
        t: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    PointerButton {
        button: String,
        pressed: bool,
        #[serde(default)]
        t: Option<f64>,
    },
    #[serde(rename_all = "camelCase")]
    KeyPress {
        #[serde(default)]
        t: Option<f64>,
    },
}

impl RawEvent {
    pub fn parse_line(line: &str) -> Result<Self, InputError> {
        serde_json::from_str(line)
            .map_err(|err| InputError::MalformedEvent(format!("invalid event json: {err}")))
    }

    /// Converts to an `InputEvent`, using `delivered_at` when the event carries
    /// no timestamp of its own.
    pub fn into_event(self, delivered_at: DateTime<Utc>) -> Result<InputEvent, InputError> {
        let stamp = |t: Option<f64>| -> Result<DateTime<Utc>, InputError> {
            match t {
                Some(secs) => datetime_from_epoch_secs(secs).ok_or_else(|| {
                    InputError::MalformedEvent(format!("invalid timestamp {secs}"))
                }),
                None => Ok(delivered_at),
            }
        };

        match self {
            RawEvent::PointerMove { x, y, t } => {
                if !x.is_finite() || !y.is_finite() {
                    return Err(InputError::MalformedEvent(format!(
                        "non-finite pointer position ({x}, {y})"
                    )));
                }
                Ok(InputEvent::PointerMove { x, y, at: stamp(t)? })
            }
            RawEvent::PointerButton { button, pressed, t } => Ok(InputEvent::PointerButton {
                button: MouseButton::parse(&button)?,
                pressed,
                at: stamp(t)?,
            }),
            RawEvent::KeyPress { t } => Ok(InputEvent::KeyPress { at: stamp(t)? }),
        }
    }
}
