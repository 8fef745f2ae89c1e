//! Recipe wire protocol.
//!
//! Clients and the proxy exchange single UDP datagrams, one per direction,
//! with no session state. Each message is length-prefixed binary:
//!
//! ```text
//! msg_type : u8            (1 = RECIPE_REQ, 2 = RECIPE_REP)
//! key_len  : u16 big-endian
//! key      : key_len bytes, UTF-8
//! cached_blocks : u16 big-endian  (RECIPE_REP only)
//! ```
//!
//! Requests are idempotent; retries are safe. Malformed datagrams are
//! dropped by the receiver.

use thiserror::Error;

/// Message type tag for a recipe request.
pub const MSG_RECIPE_REQ: u8 = 1;
/// Message type tag for a recipe reply.
pub const MSG_RECIPE_REP: u8 = 2;

/// Upper bound on a recipe datagram; large enough for the maximum key.
pub const MAX_DATAGRAM: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("datagram truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("key of {0} bytes exceeds the u16 length prefix")]
    KeyTooLong(usize),

    #[error("key is not valid UTF-8")]
    InvalidKey(#[from] std::str::Utf8Error),
}

/// A recipe protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Client asks how many blocks of `key` should currently be cached.
    RecipeRequest { key: String },

    /// Proxy answer: the current cached-block count for `key`.
    RecipeReply { key: String, cached_blocks: u16 },
}

impl Message {
    /// Serialize into a datagram payload.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let (msg_type, key, cached) = match self {
            Message::RecipeRequest { key } => (MSG_RECIPE_REQ, key, None),
            Message::RecipeReply { key, cached_blocks } => {
                (MSG_RECIPE_REP, key, Some(*cached_blocks))
            }
        };

        let key_len =
            u16::try_from(key.len()).map_err(|_| WireError::KeyTooLong(key.len()))?;

        let mut buf = Vec::with_capacity(3 + key.len() + 2);
        buf.push(msg_type);
        buf.extend_from_slice(&key_len.to_be_bytes());
        buf.extend_from_slice(key.as_bytes());
        if let Some(cached) = cached {
            buf.extend_from_slice(&cached.to_be_bytes());
        }
        Ok(buf)
    }

    /// Parse a datagram payload.
    pub fn decode(buf: &[u8]) -> Result<Message, WireError> {
        if buf.len() < 3 {
            return Err(WireError::Truncated {
                need: 3,
                have: buf.len(),
            });
        }

        let msg_type = buf[0];
        let key_len = u16::from_be_bytes([buf[1], buf[2]]) as usize;
        let tail_len = match msg_type {
            MSG_RECIPE_REQ => 0,
            MSG_RECIPE_REP => 2,
            other => return Err(WireError::UnknownType(other)),
        };

        let need = 3 + key_len + tail_len;
        if buf.len() < need {
            return Err(WireError::Truncated {
                need,
                have: buf.len(),
            });
        }
        if buf.len() > need {
            return Err(WireError::TrailingBytes(buf.len() - need));
        }

        let key = std::str::from_utf8(&buf[3..3 + key_len])?.to_string();

        match msg_type {
            MSG_RECIPE_REQ => Ok(Message::RecipeRequest { key }),
            _ => {
                let cached_blocks =
                    u16::from_be_bytes([buf[3 + key_len], buf[3 + key_len + 1]]);
                Ok(Message::RecipeReply { key, cached_blocks })
            }
        }
    }
}
