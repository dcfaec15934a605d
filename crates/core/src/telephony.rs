//! Media-stream wire format of the telephony provider, and the call-control
//! markup that asks it to open one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const FIRST_MESSAGE_PARAMETER: &str = "firstMessage";
pub const CALLER_NUMBER_PARAMETER: &str = "callerNumber";

/// Inbound frame on the media-stream socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        start: StreamStart,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        #[serde(default)]
        mark: Option<MarkPayload>,
    },
    Stop {
        #[serde(rename = "streamSid", default)]
        stream_sid: Option<String>,
    },
}

impl TelephonyEvent {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    pub stream_sid: String,
    pub call_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

impl StreamStart {
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.custom_parameters
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn first_message(&self) -> Option<&str> {
        self.parameter(FIRST_MESSAGE_PARAMETER)
    }

    pub fn caller_number(&self) -> Option<&str> {
        self.parameter(CALLER_NUMBER_PARAMETER)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaPayload {
    /// Base64 mu-law audio, passed through untouched.
    pub payload: String,
    #[serde(default)]
    pub track: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkPayload {
    #[serde(default)]
    pub name: String,
}

/// Outbound frame written back to the media-stream socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    /// Drops whatever audio the provider still has buffered for playback.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

impl OutboundFrame {
    pub fn media(stream_sid: &str, payload: &str) -> Self {
        Self::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia {
                payload: payload.to_string(),
            },
        }
    }

    pub fn clear(stream_sid: &str) -> Self {
        Self::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// TwiML answering the call by connecting a bidirectional stream to
/// `stream_url`, with each parameter delivered on the stream's `start` event.
pub fn connect_stream(stream_url: &str, parameters: &[(&str, &str)]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect>"#);
    xml.push_str(&format!(r#"<Stream url="{}">"#, xml_escape(stream_url)));
    for (name, value) in parameters {
        xml.push_str(&format!(
            r#"<Parameter name="{}" value="{}"/>"#,
            xml_escape(name),
            xml_escape(value)
        ));
    }
    xml.push_str("</Stream></Connect></Response>");
    xml
}

pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_event_carries_custom_parameters() {
        let text = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "streamSid": "MZ1",
                "callSid": "CA1",
                "accountSid": "AC1",
                "tracks": ["inbound"],
                "customParameters": {"firstMessage": "Hi there", "callerNumber": "+15551234567"},
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        }"#;
        let TelephonyEvent::Start { start } = TelephonyEvent::parse(text).unwrap() else {
            panic!("expected start");
        };
        assert_eq!(start.stream_sid, "MZ1");
        assert_eq!(start.call_sid, "CA1");
        assert_eq!(start.first_message(), Some("Hi there"));
        assert_eq!(start.caller_number(), Some("+15551234567"));
    }

    #[test]
    fn media_mark_and_stop_parse() {
        let media = TelephonyEvent::parse(
            r#"{"event":"media","streamSid":"MZ1","media":{"track":"inbound","chunk":"2","timestamp":"5","payload":"/v7+"}}"#,
        )
        .unwrap();
        assert!(matches!(media, TelephonyEvent::Media { media } if media.payload == "/v7+"));

        let mark =
            TelephonyEvent::parse(r#"{"event":"mark","streamSid":"MZ1","mark":{"name":"m1"}}"#)
                .unwrap();
        assert!(matches!(mark, TelephonyEvent::Mark { mark: Some(m) } if m.name == "m1"));

        let stop =
            TelephonyEvent::parse(r#"{"event":"stop","streamSid":"MZ1","stop":{"callSid":"CA1"}}"#)
                .unwrap();
        assert_eq!(
            stop,
            TelephonyEvent::Stop {
                stream_sid: Some("MZ1".to_string())
            }
        );
    }

    #[test]
    fn malformed_frames_are_errors() {
        assert!(TelephonyEvent::parse("not json").is_err());
        assert!(TelephonyEvent::parse(r#"{"event":"dtmf"}"#).is_err());
        assert!(TelephonyEvent::parse(r#"{"event":"media"}"#).is_err());
    }

    #[test]
    fn outbound_frames_match_provider_shape() {
        let media = OutboundFrame::media("MZ1", "AAAA").to_json().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&media).unwrap(),
            serde_json::json!({"event": "media", "streamSid": "MZ1", "media": {"payload": "AAAA"}})
        );
        let clear = OutboundFrame::clear("MZ1").to_json().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&clear).unwrap(),
            serde_json::json!({"event": "clear", "streamSid": "MZ1"})
        );
    }

    #[test]
    fn twiml_escapes_parameter_values() {
        let xml = connect_stream(
            "wss://calls.example.com/media-stream",
            &[("firstMessage", r#"Hi "Sam" & <friends>"#), ("callerNumber", "+1555")],
        );
        assert!(xml.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?><Response><Connect>"#));
        assert!(xml.contains(r#"<Stream url="wss://calls.example.com/media-stream">"#));
        assert!(xml.contains(
            r#"<Parameter name="firstMessage" value="Hi &quot;Sam&quot; &amp; &lt;friends&gt;"/>"#
        ));
        assert!(xml.contains(r#"<Parameter name="callerNumber" value="+1555"/>"#));
        assert!(xml.ends_with("</Stream></Connect></Response>"));
    }
}
