//! Replays a hex-encoded capture (logical ATR/PPS/transmission bytes, as a
//! card would present them) through a synthetic four-channel capture and
//! prints every frame/marker the core emits.
//!
//! Grounded on the teacher's `src/bin/cardinal.rs` CLI idiom (`clap`
//! derive `Parser`, `anyhow::Result`, `tracing_subscriber::fmt()` wired to
//! a verbosity count) and `src/bin/cardinal/probe.rs`'s `owo-colors`
//! `.fg::<colors::X>()` annotation style.

use anyhow::{bail, Result};
use clap::Parser;
use iso7816_decode::byteutil::bit_reverse;
use iso7816_decode::{
    BitState, ChannelKind, ChannelProvider, DecodeError, EventSink, Marker, Orchestrator,
    OrchestratorConfig, Position,
};
use owo_colors::{colors, OwoColorize};
use pad::PadStr;
use std::collections::VecDeque;
use tracing::trace;

#[derive(clap::Parser, Debug)]
struct Args {
    /// Increase log level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    quiet: u8,

    /// Hex-encoded logical byte stream (TS..TCK, optionally followed by
    /// PPS/T0/T1 traffic), e.g. "3B0011223344".
    capture: String,

    /// Elementary time unit, in CLK cycles, to synthesize the capture at.
    #[arg(long, default_value_t = 372)]
    etu: u64,
}

fn init_logging(args: &Args) {
    tracing_subscriber::fmt()
        .without_time()
        .with_target(false)
        .with_max_level(match 2 + args.verbose as i16 - args.quiet as i16 {
            i16::MIN..=0 => tracing::Level::ERROR,
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            3 => tracing::Level::DEBUG,
            4.. => tracing::Level::TRACE,
        })
        .init();
}

/// One edge-iterable channel backed by a literal `(position, level)` list,
/// used to stand in for the four physical channels a real host supplies.
struct SyntheticChannel {
    edges: VecDeque<(u64, BitState)>,
    pos: u64,
    state: BitState,
}

impl SyntheticChannel {
    fn new(initial: BitState, edges: Vec<(u64, BitState)>) -> Self {
        Self {
            edges: edges.into_iter().collect(),
            pos: 0,
            state: initial,
        }
    }
}

impl ChannelProvider for SyntheticChannel {
    fn current_position(&self) -> Position {
        Position(self.pos)
    }

    fn current_state(&self) -> BitState {
        self.state
    }

    fn advance_to_next_edge(&mut self) -> Position {
        if let Some((pos, state)) = self.edges.pop_front() {
            self.pos = pos;
            self.state = state;
        }
        Position(self.pos)
    }

    fn sample_of_next_edge(&self) -> Position {
        self.edges
            .front()
            .map(|(pos, _)| Position(*pos))
            .unwrap_or(Position(u64::MAX))
    }

    fn would_advancing_to_cause_transition(&self, pos: Position) -> bool {
        self.edges.front().is_some_and(|(p, _)| *p < pos.0)
    }

    fn advance_to_absolute(&mut self, pos: Position) {
        while let Some(&(p, s)) = self.edges.front() {
            if p > pos.0 {
                break;
            }
            self.pos = p;
            self.state = s;
            self.edges.pop_front();
        }
        self.pos = pos.0;
    }
}

/// Lays out one character (start bit + 8 data bits MSB-first-on-the-wire +
/// parity + guard) on the I/O timeline, per `bitdecoder::sample_character`'s
/// sampling schedule, and returns the falling edge of the *next* character.
fn encode_character(io: &mut Vec<(u64, BitState)>, t0: u64, wire_byte: u8, etu: u64) -> u64 {
    io.push((t0, BitState::Low));
    for i in 0..8u8 {
        let bit = (wire_byte >> (7 - i)) & 1;
        let sample_pos = t0 + etu + (i as u64) * 2 * etu;
        let level = if bit == 1 { BitState::High } else { BitState::Low };
        // Only emit an edge if the level actually changes from the last
        // one pushed; redundant same-level edges are harmless but noisy.
        if io.last().map(|(_, s)| *s) != Some(level) {
            io.push((sample_pos.saturating_sub(1), level));
        }
    }
    let parity_bit = iso7816_decode::byteutil::PARITY[wire_byte as usize];
    let parity_pos = t0 + etu + 8 * 2 * etu;
    if io.last().map(|(_, s)| *s) != Some(parity_level(parity_bit)) {
        io.push((parity_pos.saturating_sub(1), parity_level(parity_bit)));
    }
    let guard_pos = parity_pos + 2 * etu;
    if io.last().map(|(_, s)| *s) != Some(BitState::High) {
        io.push((guard_pos.saturating_sub(1), BitState::High));
    }
    t0 + 21 * etu
}

fn parity_level(even_parity_bit: bool) -> BitState {
    if even_parity_bit {
        BitState::High
    } else {
        BitState::Low
    }
}

/// Builds the four synthetic channels for a capture of logical bytes,
/// transformed onto the wire under the DIRECT convention.
fn synthesize(bytes: &[u8], etu: u64) -> (SyntheticChannel, SyntheticChannel, SyntheticChannel, SyntheticChannel) {
    let mut io_edges = Vec::new();
    let mut t0 = 100 * etu;
    for &logical in bytes {
        let wire = bit_reverse(logical);
        t0 = encode_character(&mut io_edges, t0, wire, etu);
    }

    let span = t0;
    let clk_edges: Vec<(u64, BitState)> = (1..span)
        .map(|p| {
            (
                p,
                if p % 2 == 1 {
                    BitState::High
                } else {
                    BitState::Low
                },
            )
        })
        .collect();

    let io = SyntheticChannel::new(BitState::High, io_edges);
    let reset = SyntheticChannel::new(BitState::Low, vec![(0, BitState::High)]);
    let vcc = SyntheticChannel::new(BitState::High, vec![]);
    let clk = SyntheticChannel::new(BitState::Low, clk_edges);
    (io, reset, vcc, clk)
}

struct PrintSink;

impl EventSink for PrintSink {
    fn emit_byte_frame(
        &mut self,
        channel: ChannelKind,
        name: Option<&str>,
        value: u8,
        start: Position,
        end: Position,
    ) {
        let label = name.unwrap_or("--").pad_to_width(6);
        println!(
            "{:>10}..{:<10} {:?} {} {}",
            start.0,
            end.0,
            channel,
            label.fg::<colors::Yellow>(),
            format!("{:02X}h", value).fg::<colors::Cyan>(),
        );
    }

    fn emit_text_frame(
        &mut self,
        channel: ChannelKind,
        short: &str,
        medium: Option<&str>,
        detailed: Option<&str>,
        start: Position,
        end: Position,
    ) {
        println!(
            "{:>10}..{:<10} {:?} {} {}",
            start.0,
            end.0,
            channel,
            short.fg::<colors::Green>(),
            detailed.or(medium).unwrap_or("").fg::<colors::Magenta>(),
        );
    }

    fn emit_marker(&mut self, channel: ChannelKind, kind: Marker, pos: Position) {
        trace!(?channel, ?kind, pos = pos.0, "marker");
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let bytes = hex::decode(args.capture.trim())?;
    if bytes.is_empty() {
        bail!("capture must contain at least the TS byte");
    }

    let (mut io, mut reset, mut vcc, mut clk) = synthesize(&bytes, args.etu);
    let config = OrchestratorConfig {
        cold_reset_idle_cycles: 0,
        ..OrchestratorConfig::default()
    };
    let mut orchestrator = Orchestrator::new(config, &mut io, &mut reset, &mut vcc, &mut clk);
    let mut sink = PrintSink;

    match orchestrator.run_once(&mut sink) {
        Ok(()) => {}
        Err(DecodeError::Reset(pos)) => println!("-- session ended at RST, position {pos}"),
        Err(err) => println!("-- session ended: {err}"),
    }

    Ok(())
}
