//! JSON wire protocol of the remote recognition service.
//!
//! Outbound: `{"type":"audio_window","sequenceNumber":..,"sessionId":..,"samples":[..]}`
//! Inbound:  `{"type":"chord_result","sequenceNumber":..,"chordLabel":..,"confidence":..}`
//!       or  `{"type":"feedback","message":..,"score":..}` (score optional)

use serde::{Deserialize, Serialize};

use crate::analysis::FeatureWindow;
use crate::error::ChannelError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    #[serde(rename_all = "camelCase")]
    AudioWindow {
        sequence_number: u64,
        session_id: String,
        samples: Vec<f32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    ChordResult {
        sequence_number: u64,
        chord_label: String,
        confidence: f32,
    },
    Feedback {
        message: String,
        #[serde(default)]
        score: Option<f64>,
    },
}

/// Serialize a feature window for the wire
pub fn encode_window(window: &FeatureWindow, session_id: &str) -> Result<String, ChannelError> {
    let message = OutboundMessage::AudioWindow {
        sequence_number: window.sequence_number,
        session_id: session_id.to_string(),
        samples: window.samples.clone(),
    };
    serde_json::to_string(&message).map_err(|e| ChannelError::SendFailed {
        reason: format!("encode failed: {}", e),
    })
}

/// Parse and validate one inbound frame
pub fn parse_inbound(text: &str) -> Result<InboundMessage, ChannelError> {
    let message: InboundMessage =
        serde_json::from_str(text).map_err(|e| ChannelError::Protocol {
            reason: e.to_string(),
        })?;

    if let InboundMessage::ChordResult { confidence, .. } = &message {
        if !(0.0..=1.0).contains(confidence) {
            return Err(ChannelError::Protocol {
                reason: format!("confidence {} outside [0, 1]", confidence),
            });
        }
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_field_names() {
        let window = FeatureWindow {
            captured_at_ms: 900,
            samples: vec![1.0, 0.5],
            sequence_number: 42,
        };
        let text = encode_window(&window, "s-1").unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "audio_window",
                "sequenceNumber": 42,
                "sessionId": "s-1",
                "samples": [1.0, 0.5]
            })
        );
    }

    #[test]
    fn test_parse_chord_result() {
        let message = parse_inbound(
            r#"{"type":"chord_result","sequenceNumber":5,"chordLabel":"Am","confidence":0.8}"#,
        )
        .unwrap();
        assert_eq!(
            message,
            InboundMessage::ChordResult {
                sequence_number: 5,
                chord_label: "Am".to_string(),
                confidence: 0.8,
            }
        );
    }

    #[test]
    fn test_parse_feedback_with_and_without_score() {
        let with_score =
            parse_inbound(r#"{"type":"feedback","message":"Relax your wrist","score":87.5}"#)
                .unwrap();
        assert_eq!(
            with_score,
            InboundMessage::Feedback {
                message: "Relax your wrist".to_string(),
                score: Some(87.5),
            }
        );

        let without = parse_inbound(r#"{"type":"feedback","message":"Nice"}"#).unwrap();
        assert!(matches!(without, InboundMessage::Feedback { score: None, .. }));
    }

    #[test]
    fn test_malformed_payloads_are_protocol_errors() {
        for text in [
            "not json",
            r#"{"type":"unknown"}"#,
            r#"{"type":"chord_result","sequenceNumber":1,"chordLabel":"C"}"#,
            r#"{"type":"chord_result","sequenceNumber":-1,"chordLabel":"C","confidence":0.5}"#,
            r#"{"type":"chord_result","sequenceNumber":1,"chordLabel":"C","confidence":1.5}"#,
        ] {
            assert!(
                matches!(parse_inbound(text), Err(ChannelError::Protocol { .. })),
                "accepted {}",
                text
            );
        }
    }
}
