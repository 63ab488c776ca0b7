//! Error taxonomy for the decode session layer.
//!
//! Synchronous failures (`queue`, `acquire`, `release`, configuration) are
//! returned to the caller directly. Failures discovered on the hardware
//! callback thread are delivered through the session's event channel and
//! never thrown across the thread boundary.

use std::time::Duration;

use thiserror::Error;

use crate::StreamFormat;

/// Errors surfaced by the decode session and its pools.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A handle, buffer, or hardware component lookup missed. Recoverable:
    /// the caller may retry with fresh state.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed descriptor or an operation driven in the wrong order.
    /// A caller bug, surfaced immediately.
    #[error("bad value: {0}")]
    BadValue(String),

    /// The session was asked to do something its current state forbids.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A block pool could not satisfy an allocation. Surfaced, not retried.
    #[error("out of memory: {0}")]
    NoMemory(String),

    /// A bounded wait expired. Drain treats this as best-effort success;
    /// everything else surfaces it.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The hardware runtime tripped mid-stream. Reported asynchronously
    /// through the listener; the session does not retry.
    #[error("hardware tripped (code {0})")]
    Tripped(i32),

    /// The hardware runtime reported a hard failure.
    #[error("hardware error (code {0})")]
    Hardware(i32),

    /// The component store does not expose a decoder for this format.
    #[error("unsupported stream format: {0}")]
    Unsupported(StreamFormat),
}

impl DecodeError {
    /// Whether the surrounding pipeline may keep the session alive after
    /// seeing this error. Hardware-reported failures and state violations
    /// require a teardown; lookup misses do not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DecodeError::NotFound(_) | DecodeError::Timeout(_) | DecodeError::NoMemory(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = DecodeError::NotFound("input block fd 12".into());
        assert!(err.to_string().contains("fd 12"));

        let err = DecodeError::Hardware(-7);
        assert!(err.to_string().contains("-7"));
    }

    #[test]
    fn recoverability_split() {
        assert!(DecodeError::NotFound("x".into()).is_recoverable());
        assert!(DecodeError::Timeout(Duration::from_secs(5)).is_recoverable());
        assert!(!DecodeError::Tripped(1).is_recoverable());
        assert!(!DecodeError::InvalidState("draining".into()).is_recoverable());
    }
}
