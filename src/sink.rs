//! The abstract result/annotation destination the decoder core writes to
//! (spec.md §6/§9's "Observer/result adapter" note).
//!
//! Collapses the original's `ProtocolFrame`/`TextFrame`/`ByteFrame` class
//! hierarchy (`original_source/source/ProtocolFrames.h`) and its
//! `AnalyzerResults::AddMarker` enum
//! (`original_source/source/iso7816AnalyzerResults.cpp`) into a single
//! trait with three methods, kept ignorant of the host's rendering model.

use crate::channel::{ChannelKind, Position};

/// A marker kind drawn at a single sample position, matching the set the
/// original plugin draws on the I/O/RST channels during bit sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    UpArrow,
    DownArrow,
    Start,
    Stop,
    One,
    Zero,
    X,
    ErrorX,
    ErrorDot,
}

/// Receives annotated frames and markers produced while decoding a session.
///
/// The core only ever appends; it never reads results back, so a
/// thread-safe append-only sink is sufficient on the host side.
pub trait EventSink {
    /// A single decoded byte, with the name of the protocol field it fills
    /// in (e.g. `"TS"`, `"TA1"`, `"H3"`, `"TCK"`, `"NAD"`, `"LRC-OK"`), if
    /// known.
    fn emit_byte_frame(
        &mut self,
        channel: ChannelKind,
        name: Option<&str>,
        value: u8,
        start: Position,
        end: Position,
    );

    /// A completed higher-level frame (ATR, PPS exchange, T=1 block),
    /// rendered at up to three levels of detail for the host's bubble
    /// text.
    fn emit_text_frame(
        &mut self,
        channel: ChannelKind,
        short: &str,
        medium: Option<&str>,
        detailed: Option<&str>,
        start: Position,
        end: Position,
    );

    /// A single-sample marker (bit value, start/stop framing, or error).
    fn emit_marker(&mut self, channel: ChannelKind, kind: Marker, pos: Position);
}
