//! Frames exchanged with a [`Transport`](crate::transport::Transport).

use bytes::Bytes;

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket-style frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` for `Close`, `Ping` and `Pong`.
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// One unit of traffic: an opcode plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Text, payload)
    }

    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Binary, payload)
    }

    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Ping, payload)
    }

    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::new(OpCode::Pong, payload)
    }

    /// Builds a close frame: big-endian code followed by the UTF-8 reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code.to_be_bytes());
        payload.extend_from_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload)
    }

    /// Close frame with [`CLOSE_NORMAL`] and an empty reason.
    pub fn close_normal() -> Self {
        Self::close(CLOSE_NORMAL, "")
    }

    /// Close code carried by a close frame, if any.
    pub fn close_code(&self) -> Option<u16> {
        if self.opcode != OpCode::Close {
            return None;
        }
        let code = self.payload.get(0..2)?;
        Some(u16::from_be_bytes([code[0], code[1]]))
    }

    /// Close reason carried by a close frame, lossily decoded.
    pub fn close_reason(&self) -> Option<String> {
        if self.opcode != OpCode::Close {
            return None;
        }
        self.payload
            .get(2..)
            .map(|reason| String::from_utf8_lossy(reason).into_owned())
    }

    pub fn is_close(&self) -> bool {
        self.opcode == OpCode::Close
    }
}
