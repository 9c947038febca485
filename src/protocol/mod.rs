// Operator command protocol: byte-stream framing, verb decoding, responses

pub mod command;
pub mod framing;

use std::fmt;

pub use command::{Command, CommandError, parse_command};
pub use framing::{FrameError, FrameParser, ParserState, escape_payload};

/// One response line; every command yields exactly one
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ack(String),
    /// Debug-mode acknowledgment of a motion request the gate refused
    AckVetoed { verb: String, reason: &'static str },
    Pong,
    Status(String),
    Sensors(String),
    Test(Result<(), String>),
    Error(String),
}

impl Response {
    fn body(&self) -> String {
        match self {
            Response::Ack(verb) => format!("ACK:{}", verb),
            Response::AckVetoed { verb, reason } => format!("ACK:{}:VETOED:{}", verb, reason),
            Response::Pong => "PONG".to_string(),
            Response::Status(report) => format!("STATUS:{}", report),
            Response::Sensors(report) => format!("SENS:{}", report),
            Response::Test(Ok(())) => "TEST:PASS".to_string(),
            Response::Test(Err(reason)) => format!("TEST:FAIL:{}", reason),
            Response::Error(message) => format!("ERR:{}", message),
        }
    }
}

/// Framed form without the line terminator, e.g. `<ACK:MOV>`
impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", escape_payload(&self.body()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_framing() {
        assert_eq!(Response::Ack("MOV".into()).to_string(), "<ACK:MOV>");
        assert_eq!(Response::Pong.to_string(), "<PONG>");
        assert_eq!(
            Response::AckVetoed {
                verb: "MOV".into(),
                reason: "FRONT"
            }
            .to_string(),
            "<ACK:MOV:VETOED:FRONT>"
        );
        assert_eq!(Response::Test(Ok(())).to_string(), "<TEST:PASS>");
        assert_eq!(
            Response::Error("Invalid SPEED params".into()).to_string(),
            "<ERR:Invalid SPEED params>"
        );
    }

    #[test]
    fn test_markers_in_payload_are_escaped() {
        let r = Response::Error(CommandError::UnknownVerb("A<B".into()).to_string());
        assert_eq!(r.to_string(), "<ERR:Unknown command: A\\<B>");

        // What goes out parses back to the same text
        let mut parser = FrameParser::new();
        let out = parser.feed_all(r.to_string().as_bytes(), std::time::Instant::now());
        assert_eq!(out, vec![Ok("ERR:Unknown command: A<B".to_string())]);
    }
}
