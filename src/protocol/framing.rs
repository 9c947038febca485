// Command stream framing
//
// Two disciplines share one byte stream:
// - legacy plain text terminated by '\n' or '\r'
// - frames bounded by '<' and '>', where '\' makes the next byte literal
//
// Parser states: Idle (plain text or between frames), InFrame, Escaped, and
// Discarding after an overflow until the overflowed command's terminator.

use std::time::Instant;

use tracing::debug;

use crate::config::{FRAME_TIMEOUT, MAX_FRAME_LEN};

pub const FRAME_START: u8 = b'<';
pub const FRAME_END: u8 = b'>';
pub const ESCAPE: u8 = b'\\';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame overflow ({0} bytes)")]
    Overflow(usize),

    #[error("Stale partial frame discarded")]
    Stale,

    #[error("Command is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    #[default]
    Idle,
    InFrame,
    Escaped,
    /// Dropping the rest of an oversized line (`framed == false`) or frame
    Discarding { framed: bool, escaped: bool },
}

/// Single-pass byte stream parser with a bounded buffer
#[derive(Debug, Clone, Default)]
pub struct FrameParser {
    state: ParserState,
    buffer: Vec<u8>,
    started: Option<Instant>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_FRAME_LEN),
            ..Self::default()
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Discard a partial command that has not completed within FRAME_TIMEOUT
    pub fn check_stale(&mut self, now: Instant) -> Option<FrameError> {
        let started = self.started?;
        if now.saturating_duration_since(started) > FRAME_TIMEOUT {
            debug!("Discarding stale partial command ({} bytes)", self.buffer.len());
            self.reset();
            return Some(FrameError::Stale);
        }
        None
    }

    /// Feed a chunk of bytes; returns every command or error completed by it
    pub fn feed_all(&mut self, bytes: &[u8], now: Instant) -> Vec<Result<String, FrameError>> {
        let mut out = Vec::new();
        if let Some(err) = self.check_stale(now) {
            out.push(Err(err));
        }
        for &byte in bytes {
            if let Some(result) = self.feed(byte, now) {
                out.push(result);
            }
        }
        out
    }

    /// Feed one byte
    pub fn feed(&mut self, byte: u8, now: Instant) -> Option<Result<String, FrameError>> {
        match self.state {
            ParserState::Idle => match byte {
                b'\n' | b'\r' => {
                    if self.buffer.is_empty() {
                        None
                    } else {
                        self.complete()
                    }
                }
                FRAME_START => {
                    if !self.buffer.is_empty() {
                        debug!("Dropping partial plain line before frame start");
                    }
                    self.start_frame(now);
                    None
                }
                _ => self.push(byte, now),
            },
            ParserState::InFrame => match byte {
                ESCAPE => {
                    self.state = ParserState::Escaped;
                    None
                }
                FRAME_END => self.complete(),
                FRAME_START => {
                    debug!("Unescaped frame start inside frame, resynchronising");
                    self.start_frame(now);
                    None
                }
                _ => self.push(byte, now),
            },
            ParserState::Escaped => {
                self.state = ParserState::InFrame;
                self.push(byte, now)
            }
            ParserState::Discarding { framed: false, .. } => {
                match byte {
                    b'\n' | b'\r' => self.reset(),
                    FRAME_START => self.start_frame(now),
                    _ => {}
                }
                None
            }
            ParserState::Discarding { framed: true, escaped } => {
                match byte {
                    _ if escaped => self.discard(true, false),
                    ESCAPE => self.discard(true, true),
                    FRAME_END => self.reset(),
                    FRAME_START => self.start_frame(now),
                    _ => {}
                }
                None
            }
        }
    }

    fn start_frame(&mut self, now: Instant) {
        self.buffer.clear();
        self.state = ParserState::InFrame;
        self.started = Some(now);
    }

    fn discard(&mut self, framed: bool, escaped: bool) {
        self.state = ParserState::Discarding { framed, escaped };
    }

    fn push(&mut self, byte: u8, now: Instant) -> Option<Result<String, FrameError>> {
        if self.buffer.len() >= MAX_FRAME_LEN {
            let len = self.buffer.len() + 1;
            let framed = self.state == ParserState::InFrame;
            debug!("Command overflowed at {} bytes, discarding until its end", len);
            self.buffer.clear();
            self.discard(framed, false);
            return Some(Err(FrameError::Overflow(len)));
        }
        if self.started.is_none() {
            self.started = Some(now);
        }
        self.buffer.push(byte);
        None
    }

    fn complete(&mut self) -> Option<Result<String, FrameError>> {
        let bytes = std::mem::take(&mut self.buffer);
        self.reset();
        match String::from_utf8(bytes) {
            Ok(text) => {
                let text = text.trim();
                if text.is_empty() {
                    None
                } else {
                    Some(Ok(text.to_string()))
                }
            }
            Err(_) => Some(Err(FrameError::InvalidUtf8)),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParserState::Idle;
        self.started = None;
    }
}

/// Escape a payload so it can travel inside a frame
pub fn escape_payload(payload: &str) -> String {
    let mut out = String::with_capacity(payload.len() + 2);
    for c in payload.chars() {
        if matches!(c, '<' | '>' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
