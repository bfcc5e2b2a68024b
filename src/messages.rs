// Message types shared between the coordinator, the control plane and the link

use serde::{Deserialize, Serialize};

/// Control-plane message (GUI/scripts -> coordinator/link), JSON encoded.
///
/// `{"type":"coords","x":..,"y":..}` requests a move, `{"type":"grip","state":"on"}`
/// toggles the grabber.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Coords { x: f64, y: f64 },
    Grip { state: GripState },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GripState {
    On,
    Off,
}

/// Asynchronous outcome token relayed from the execution layer back to the
/// coordinator. Exactly one signal arrives per motion or grip command issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// `CMP` - the awaited step completed.
    Complete,
    /// `UNR` - the awaited step failed (target unreachable or execution fault).
    Unreachable,
}

impl Signal {
    pub fn as_token(&self) -> &'static str {
        match self {
            Signal::Complete => "CMP",
            Signal::Unreachable => "UNR",
        }
    }
}

/// Health summary published by the host runtime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeHealth {
    pub robot_state: String,
    pub tracked_objects: usize,
    pub calibrated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_message_wire_format() {
        let msg: ControlMessage = serde_json::from_str(r#"{"type":"coords","x":5.0,"y":-3.5}"#).unwrap();
        assert_eq!(msg, ControlMessage::Coords { x: 5.0, y: -3.5 });
    }

    #[test]
    fn grip_message_wire_format() {
        let msg: ControlMessage = serde_json::from_str(r#"{"type":"grip","state":"on"}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Grip {
                state: GripState::On
            }
        );
        let out = serde_json::to_string(&ControlMessage::Grip {
            state: GripState::Off,
        })
        .unwrap();
        assert_eq!(out, r#"{"type":"grip","state":"off"}"#);
    }

    #[test]
    fn signal_tokens() {
        assert_eq!(Signal::Complete.as_token(), "CMP");
        assert_eq!(Signal::Unreachable.as_token(), "UNR");
    }
}
