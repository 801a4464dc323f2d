//! Typed errors for the decoder core.
//!
//! The original C++ plugin unwinds from deep edge-iteration straight into
//! the worker thread's `catch` block via `DecoderException` subclasses
//! (`Exceptions.hpp`). We thread the same four cases up to the
//! [`crate::orchestrator::Orchestrator`] boundary as an ordinary `Result`
//! instead, per the design note in spec.md §9.

use crate::channel::Position;
use thiserror::Error;

/// A session-scoped decoding error, always tagged with the sample position
/// at which it was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A RST transition was encountered while advancing another channel.
    /// Session-fatal: the orchestrator resumes at RST-edge discovery.
    #[error("RST transition detected at position {0}")]
    Reset(Position),

    /// Sampled character failed the even-parity check.
    #[error("parity error at position {0}")]
    Parity(Position),

    /// I/O was held LOW through the guard time: the receiver signalled a
    /// parity error and is requesting retransmission (ISO 7816-3 §7.3).
    #[error("error signal (I/O held low during guard time) at position {0}")]
    ErrorSignal(Position),

    /// The expected start bit was not found LOW at the anticipated
    /// position.
    #[error("out of sync: no start bit at position {0}")]
    OutOfSync(Position),
}

impl DecodeError {
    /// The position at which the error was detected.
    pub fn position(&self) -> Position {
        match self {
            DecodeError::Reset(p)
            | DecodeError::Parity(p)
            | DecodeError::ErrorSignal(p)
            | DecodeError::OutOfSync(p) => *p,
        }
    }
}

/// A protocol-field-level structural violation: the byte pushed into a
/// parser does not fit the field ISO 7816-3 says it should.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The first ATR byte (TS) was neither `0x3B` (DIRECT) nor `0x3F`
    /// (INVERSE).
    #[error("invalid TS byte: {0:#04X}h")]
    InvalidTs(u8),

    /// A byte was pushed to a parser that had already reached `Complete`.
    #[error("parser already complete, no more data expected")]
    AlreadyComplete,

    /// A PPS1/TA1 Fi or Di nibble indexes an RFU (reserved for future use)
    /// table slot.
    #[error("reserved Fi/Di index: Fi={fi:#X} Di={di:#X}")]
    ReservedFiDi { fi: u8, di: u8 },
}
