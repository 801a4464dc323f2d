//! ISO/IEC 7816-3 asynchronous smart-card ATR/PPS/T=0/T=1 decoder core.
//!
//! This crate decodes four synchronously sampled digital channels (I/O,
//! RST, VCC, CLK) into Answer-to-Reset, Protocol-and-Parameter-Selection,
//! and transmission-layer protocol events. It depends on nothing from any
//! particular logic-analyzer host: callers supply a [`channel::ChannelProvider`]
//! per channel and an [`sink::EventSink`] to receive decoded frames, and
//! drive the loop via [`orchestrator::Orchestrator::run`].

pub mod atr;
pub mod bitdecoder;
pub mod byteutil;
pub mod channel;
pub mod error;
pub mod orchestrator;
pub mod pps;
pub mod session;
pub mod sink;
pub mod t1;

pub use channel::{BitState, ChannelKind, ChannelProvider, Position};
pub use error::{DecodeError, FormatError};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use session::{Protocol, SessionState, SessionSupervisor};
pub use sink::{EventSink, Marker};
