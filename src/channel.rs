//! The abstract host contract the decoder core is built against: a
//! cooperative, synchronous, edge-iterable sample source per channel
//! (spec.md §4.1/§6).
//!
//! Grounded on `original_source/source/Iso7816BitDecoder.h`'s
//! `AnalyzerChannelData*` surface, collapsed into a trait so the core never
//! depends on Saleae's `AnalyzerChannelData` type directly.

use std::fmt;

/// A monotonically increasing sample index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(pub u64);

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(v: u64) -> Self {
        Position(v)
    }
}

/// The binary level of a channel at a given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitState {
    Low,
    High,
}

impl BitState {
    pub fn is_high(self) -> bool {
        matches!(self, BitState::High)
    }
}

/// Identifies which of the four physical channels an operation concerns,
/// for annotation and configuration purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Io,
    Reset,
    Vcc,
    Clk,
}

/// A single edge-iterable digital channel, as the decoder sees it.
///
/// Implementations are expected to block inside `advance_to_next_edge` and
/// `advance_to_absolute` until the host has buffered enough samples
/// (spec.md §5) -- the core treats every call as a potential suspension
/// point and never reorders an edge advance relative to a RST check.
pub trait ChannelProvider {
    /// The channel's current sample position.
    fn current_position(&self) -> Position;

    /// The channel's level at its current position.
    fn current_state(&self) -> BitState;

    /// Blocks until the next level transition, then returns the new
    /// position (the state at the new position is `current_state()`).
    fn advance_to_next_edge(&mut self) -> Position;

    /// Returns the position of the next transition without advancing.
    fn sample_of_next_edge(&self) -> Position;

    /// `true` iff a transition lies strictly between the current position
    /// and `pos`.
    fn would_advancing_to_cause_transition(&self, pos: Position) -> bool;

    /// Advances to exactly `pos`. `pos` must not be before the current
    /// position.
    fn advance_to_absolute(&mut self, pos: Position);
}
