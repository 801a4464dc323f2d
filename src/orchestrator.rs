//! Top-level decode loop: RST-edge discovery, cold-reset timing, first-byte
//! ETU measurement, and error recovery.
//!
//! Grounded directly on
//! `original_source/source/iso7816Analyzer.cpp::_WorkerThread` (the outer
//! `while(true)` loop, its `catch` clauses per exception subclass, and the
//! 400-cycle cold-reset wait).

use crate::bitdecoder::{is_valid_etu, BitDecoder, DEF_ETU_MAX, DEF_ETU_MIN};
use crate::channel::{ChannelKind, ChannelProvider, Position};
use crate::error::DecodeError;
use crate::sink::{EventSink, Marker};
use crate::session::SessionSupervisor;
use tracing::{debug, trace_span, warn};

/// Channel assignments and tunables a host reads once per session and
/// passes in at construction (spec.md §6's "Configuration" note, §9's
/// cold-reset-timeout Open Question).
///
/// The channel-id fields are opaque bookkeeping for the host (which
/// physical channel is I/O, RST, VCC, CLK); the core never dereferences
/// them -- the actual sample streams arrive as already-selected
/// [`ChannelProvider`] instances.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub io_channel: u8,
    pub reset_channel: u8,
    pub vcc_channel: u8,
    pub clk_channel: u8,
    /// `tc`, the minimum idle time after RST goes high before seeking TS,
    /// in CLK cycles. The original hardcodes 400; this crate exposes it so
    /// an embedder isn't locked to that constant (§9 Open Question: no
    /// upper bound is enforced either here or in the original).
    pub cold_reset_idle_cycles: u64,
    pub etu_min: u64,
    pub etu_max: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            io_channel: 0,
            reset_channel: 1,
            vcc_channel: 2,
            clk_channel: 3,
            cold_reset_idle_cycles: 400,
            etu_min: DEF_ETU_MIN,
            etu_max: DEF_ETU_MAX,
        }
    }
}

/// Drives a [`BitDecoder`] and a rotating cast of [`SessionSupervisor`]s
/// across repeated RST cycles.
pub struct Orchestrator<'a, Io, Reset, Vcc, Clk> {
    decoder: BitDecoder<'a, Io, Reset, Vcc, Clk>,
    config: OrchestratorConfig,
    reset_count: u64,
}

impl<'a, Io, Reset, Vcc, Clk> Orchestrator<'a, Io, Reset, Vcc, Clk>
where
    Io: ChannelProvider,
    Reset: ChannelProvider,
    Vcc: ChannelProvider,
    Clk: ChannelProvider,
{
    pub fn new(
        config: OrchestratorConfig,
        io: &'a mut Io,
        reset: &'a mut Reset,
        vcc: &'a mut Vcc,
        clk: &'a mut Clk,
    ) -> Self {
        Self {
            decoder: BitDecoder::new(io, reset, vcc, clk),
            config,
            reset_count: 0,
        }
    }

    pub fn reset_count(&self) -> u64 {
        self.reset_count
    }

    fn is_valid_etu(&self, etu: u64) -> bool {
        if (self.config.etu_min, self.config.etu_max) == (DEF_ETU_MIN, DEF_ETU_MAX) {
            is_valid_etu(etu)
        } else {
            etu > self.config.etu_min && etu < self.config.etu_max
        }
    }

    /// Runs forever, as the original's worker thread does: waits for a RST
    /// rising edge, decodes one session, and repeats. The host tears the
    /// thread down from outside (spec.md §5's "Cancellation" note); this
    /// crate exposes no cooperative cancellation token.
    pub fn run(&mut self, sink: &mut impl EventSink) -> ! {
        loop {
            if let Err(err) = self.run_once(sink) {
                warn!(error = %err, "session aborted, awaiting next RST");
                sink.emit_marker(ChannelKind::Reset, Marker::ErrorX, err.position());
            }
        }
    }

    /// One full cycle: wait for RST high, cold-reset timing, first-byte ETU
    /// measurement, and a whole session's worth of byte decoding. Returns
    /// once the session ends (by RST, a fatal byte error, or an invalid TS
    /// byte) -- matching §4.7's outer loop body.
    ///
    /// Exposed separately from [`Self::run`] for embedders that drive a
    /// bounded capture (tests, the `replay` demo) rather than a live,
    /// unbounded channel stream.
    pub fn run_once(&mut self, sink: &mut impl EventSink) -> Result<(), DecodeError> {
        let span = trace_span!("session_cycle", reset_count = self.reset_count);
        let _enter = span.enter();

        loop {
            let (pos, went_high) = self.decoder.seek_reset_edge();
            if !went_high {
                continue;
            }
            self.reset_count += 1;
            sink.emit_marker(ChannelKind::Reset, Marker::UpArrow, pos);
            self.decoder.sync(pos)?;

            match self.cold_reset_and_measure_etu() {
                Ok((etu, falling_edge)) => return self.run_session(sink, etu, falling_edge),
                Err(DecodeError::Reset(_)) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Advances through the cold-reset idle window and repeatedly seeks
    /// I/O falling edges until a plausible TS start bit's ETU is measured.
    fn cold_reset_and_measure_etu(&mut self) -> Result<(u64, Position), DecodeError> {
        loop {
            self.decoder
                .advance_clk_cycles(self.config.cold_reset_idle_cycles)?;
            let falling_edge = self.decoder.seek_io_falling_edge()?;
            let etu = self.decoder.measure_etu(falling_edge)?;
            if self.is_valid_etu(etu) {
                debug!(etu, "TS start bit measured");
                return Ok((etu, falling_edge));
            }
            debug!(etu, "invalid ETU, retrying from cold reset");
        }
    }

    /// Samples TS, opens a [`SessionSupervisor`], then repeatedly seeks and
    /// samples subsequent characters until RST, a parity/error-signal
    /// fault, or an unrecoverable format violation ends the session.
    fn run_session(
        &mut self,
        sink: &mut impl EventSink,
        initial_etu: u64,
        t0: Position,
    ) -> Result<(), DecodeError> {
        let ts = self.decoder.sample_character(initial_etu, t0, true)?;
        let mut session = SessionSupervisor::new(initial_etu);
        if session.push_byte(sink, ts.raw, ts.start, ts.end).is_err() {
            // S6: an invalid TS byte is unrecoverable for this session --
            // no convention was ever established.
            return Err(DecodeError::OutOfSync(ts.end));
        }

        loop {
            let etu = session.etu();
            match self.decoder.seek_next_start_bit() {
                Err(DecodeError::OutOfSync(pos)) => {
                    warn!(pos = pos.0, "out of sync, continuing");
                    continue;
                }
                Err(err) => return Err(err),
                Ok(t0) => {
                    let character = self.decoder.sample_character(etu, t0, false)?;
                    if session
                        .push_byte(sink, character.raw, character.start, character.end)
                        .is_err()
                    {
                        return Err(DecodeError::OutOfSync(character.end));
                    }
                }
            }
        }
    }
}
