//! Session supervisor: demultiplexes decoded bytes into the ATR, optional
//! PPS, and per-protocol transmission phases, renegotiating ETU on PPS
//! success.
//!
//! Grounded directly on `original_source/source/Iso7816Session.cpp`/`.h`
//! (`PushByte`, `Transform`, `OnAtr`/`OnPps`/`OnTransmission`/`OnUnknown`).

use crate::atr::{AtrParser, Tx};
use crate::byteutil::bit_reverse;
use crate::channel::{ChannelKind, Position};
use crate::error::FormatError;
use crate::pps::{self, DecodeOutcome};
use crate::sink::EventSink;
use crate::t1::T1Parser;
use tracing::{debug, trace, trace_span};

/// Electrical transmission convention, fixed for the whole session once
/// TS is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    Direct,
    Inverse,
}

/// The transmission protocol in force once selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    T0,
    T1,
}

/// Session lifecycle, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Start,
    Atr,
    Pps,
    Transmission,
    Unknown,
}

struct BufferedByte {
    value: u8,
    start: Position,
    end: Position,
}

/// The parser currently owned by the supervisor, exclusively, for the
/// active phase. Replaced wholesale on phase transition -- no shared
/// ownership arises in the core (spec.md §9).
enum ActiveParser {
    None,
    Atr(AtrParser),
    T1(T1Parser),
}

/// Orchestrates phase transitions and owns the per-session parsers.
pub struct SessionSupervisor {
    convention: Option<Convention>,
    etu: u64,
    protocol: Protocol,
    state: SessionState,
    buffer: Vec<BufferedByte>,
    parser: ActiveParser,
}

impl SessionSupervisor {
    /// Creates a new supervisor for a session whose TS start-bit ETU was
    /// just measured.
    pub fn new(initial_etu: u64) -> Self {
        Self {
            convention: None,
            etu: initial_etu,
            protocol: Protocol::T0,
            state: SessionState::Start,
            buffer: Vec::new(),
            parser: ActiveParser::None,
        }
    }

    pub fn etu(&self) -> u64 {
        self.etu
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn convention(&self) -> Option<Convention> {
        self.convention
    }

    /// The single entry point from the orchestrator: push one raw
    /// (pre-convention) sampled byte.
    pub fn push_byte(
        &mut self,
        sink: &mut impl EventSink,
        raw: u8,
        start: Position,
        end: Position,
    ) -> Result<(), FormatError> {
        let span = trace_span!("push_byte", raw = format!("{raw:#04X}"));
        let _enter = span.enter();

        let convention = if self.state == SessionState::Start {
            let convention = match raw {
                0xDC => Convention::Direct,
                0xC0 => Convention::Inverse,
                other => return Err(FormatError::InvalidTs(other)),
            };
            self.convention = Some(convention);
            self.state = SessionState::Atr;
            convention
        } else {
            // `state` only ever leaves `Start` in the branch above, which
            // always sets `self.convention` first, so this is always
            // `Some` by construction -- `unwrap_or` here is just a
            // non-panicking way to read that invariant out.
            self.convention.unwrap_or(Convention::Direct)
        };

        let logical = transform(raw, convention);
        self.buffer.push(BufferedByte {
            value: logical,
            start,
            end,
        });
        trace!(logical = format!("{logical:#04X}"), "session byte");

        match self.state {
            SessionState::Atr => self.on_atr(sink, logical, start, end),
            SessionState::Pps => self.on_pps(sink, logical, start, end),
            SessionState::Transmission => self.on_transmission(sink, logical, start, end),
            SessionState::Unknown => self.on_unknown(sink, logical, start, end),
            SessionState::Start => unreachable!("handled above"),
        }
    }

    fn on_atr(
        &mut self,
        sink: &mut impl EventSink,
        logical: u8,
        start: Position,
        end: Position,
    ) -> Result<(), FormatError> {
        if matches!(self.parser, ActiveParser::None) {
            self.parser = ActiveParser::Atr(AtrParser::new());
        }
        let ActiveParser::Atr(atr) = &mut self.parser else {
            unreachable!()
        };

        atr.push_data(logical)?;

        let name = atr.last_element_name().to_string();
        sink.emit_byte_frame(ChannelKind::Io, Some(&name), logical, start, end);

        if atr.completed() {
            let atr_start = self.buffer[0].start;
            sink.emit_text_frame(
                ChannelKind::Reset,
                "A",
                Some("ATR"),
                Some(&atr.to_string_summary()),
                atr_start,
                end,
            );

            if let Some(ta2) = atr.interface_byte(Tx::Ta, 2) {
                debug!("card is in specific mode (TA2 present)");
                let ta1 = atr.interface_byte(Tx::Ta, 1).unwrap_or(0x11);
                let fi = (ta1 >> 4) & 0x0F;
                let di = ta1 & 0x0F;
                self.etu = crate::pps::etu_from_fi_di(fi, di)?;
                self.protocol = if ta2 & 0x0F == 1 {
                    Protocol::T1
                } else {
                    Protocol::T0
                };
                self.state = SessionState::Transmission;
            } else {
                self.state = SessionState::Pps;
            }
            self.buffer.clear();
            self.parser = ActiveParser::None;
        }
        Ok(())
    }

    fn on_pps(
        &mut self,
        sink: &mut impl EventSink,
        logical: u8,
        start: Position,
        end: Position,
    ) -> Result<(), FormatError> {
        if self.buffer.len() == 1 && logical != pps::PPS_HEADER {
            self.state = SessionState::Transmission;
            return self.on_transmission(sink, logical, start, end);
        }

        sink.emit_byte_frame(ChannelKind::Io, None, logical, start, end);

        let bytes: Vec<u8> = self.buffer.iter().map(|b| b.value).collect();
        let req = match pps::decode(&bytes, 0) {
            DecodeOutcome::NotYetComplete => return Ok(()),
            DecodeOutcome::NotAPps => {
                self.state = SessionState::Unknown;
                return Ok(());
            }
            DecodeOutcome::Complete { frame, consumed } => (frame, consumed),
        };
        let (req_frame, req_len) = req;

        let rsp = match pps::decode(&bytes, req_len) {
            DecodeOutcome::NotYetComplete => return Ok(()),
            DecodeOutcome::NotAPps => {
                self.state = SessionState::Unknown;
                return Ok(());
            }
            DecodeOutcome::Complete { frame, consumed } => (frame, consumed),
        };
        let (rsp_frame, rsp_len) = rsp;

        if !req_frame.equal(&rsp_frame) || !req_frame.checksum_ok() || !rsp_frame.checksum_ok() {
            self.state = SessionState::Unknown;
            return Ok(());
        }

        let fi = req_frame.fi().unwrap_or(1);
        let di = req_frame.di().unwrap_or(1);
        self.etu = crate::pps::etu_from_fi_di(fi, di)?;
        self.protocol = if req_frame.protocol() == 1 {
            Protocol::T1
        } else {
            Protocol::T0
        };
        debug!(fi, di, etu = self.etu, "PPS accepted");

        let pps_start = self.buffer[0].start;
        sink.emit_text_frame(
            ChannelKind::Reset,
            "P",
            Some("PPS"),
            Some(&req_frame.to_string_summary()),
            pps_start,
            end,
        );

        self.buffer.drain(0..req_len + rsp_len);
        self.state = SessionState::Transmission;
        Ok(())
    }

    fn on_transmission(
        &mut self,
        sink: &mut impl EventSink,
        logical: u8,
        start: Position,
        end: Position,
    ) -> Result<(), FormatError> {
        match self.protocol {
            Protocol::T1 => {
                if matches!(self.parser, ActiveParser::None) {
                    self.parser = ActiveParser::T1(T1Parser::new());
                }
                let ActiveParser::T1(t1) = &mut self.parser else {
                    unreachable!()
                };
                t1.push_data(logical)?;
                let name = t1.last_element_name().to_string();
                sink.emit_byte_frame(ChannelKind::Io, Some(&name), logical, start, end);
                if t1.completed() {
                    let block_start = self.buffer[0].start;
                    sink.emit_text_frame(
                        ChannelKind::Reset,
                        "T1",
                        Some(&t1.to_string_summary()),
                        None,
                        block_start,
                        end,
                    );
                    self.buffer.clear();
                    self.parser = ActiveParser::None;
                }
            }
            Protocol::T0 => {
                sink.emit_byte_frame(ChannelKind::Io, None, logical, start, end);
                self.buffer.clear();
            }
        }
        Ok(())
    }

    fn on_unknown(
        &mut self,
        sink: &mut impl EventSink,
        logical: u8,
        start: Position,
        end: Position,
    ) -> Result<(), FormatError> {
        sink.emit_byte_frame(ChannelKind::Io, None, logical, start, end);
        self.buffer.clear();
        Ok(())
    }
}

/// Transforms a raw, MSB-first-sampled wire byte into its logical value
/// under `convention` (spec.md §3): DIRECT reverses the bit order, INVERSE
/// complements it.
fn transform(raw: u8, convention: Convention) -> u8 {
    match convention {
        Convention::Direct => bit_reverse(raw),
        Convention::Inverse => !raw,
    }
}
