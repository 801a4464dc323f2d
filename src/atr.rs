//! Answer-to-Reset parser: a byte-at-a-time state machine over
//! `TS -> T0 -> TXi -> TK -> TCK -> Complete`.
//!
//! Grounded on `original_source/source/ISO7816Atr.hpp` (`PushData`,
//! `OnTS`/`OnT0`/`OnTx`/`OnTK`/`OnTCK`, the `_params` map keyed by
//! `tx | idx`, `NeedTCK`), with field/enum shapes taken from
//! `liclac-cardinal/src/atr.rs`'s `num_enum`-backed `TS`/`Protocol` types
//! where the byte encodings line up.

use crate::byteutil::hex_bytes;
use crate::error::FormatError;
use num_enum::{FromPrimitive, IntoPrimitive};
use std::collections::BTreeMap;
use tracing::trace;

/// Electrical transmission convention, determined by the TS byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, FromPrimitive)]
#[repr(u8)]
pub enum Convention {
    Direct = 0x3B,
    Inverse = 0x3F,
    #[num_enum(catch_all)]
    Invalid(u8) = 0xFF,
}

/// Which of the four interface-byte slots a field occupies, and the
/// bitmask used to test presence in a `Yi` nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tx {
    Ta = 0x10,
    Tb = 0x20,
    Tc = 0x40,
    Td = 0x80,
}

impl Tx {
    const ALL: [Tx; 4] = [Tx::Ta, Tx::Tb, Tx::Tc, Tx::Td];

    fn name(self) -> &'static str {
        match self {
            Tx::Ta => "TA",
            Tx::Tb => "TB",
            Tx::Tc => "TC",
            Tx::Td => "TD",
        }
    }

    fn key(self, idx: u8) -> u8 {
        (idx & 0x0F) | self as u8
    }
}

const TX_MASK: u8 = 0xF0;
const TD_MASK: u8 = 0x0F;

/// Internal parser position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pos {
    Ts,
    T0,
    Txi,
    Tk,
    Tck,
    Complete,
}

/// Incremental ATR parser: feed it one logical (post-convention) byte at a
/// time via [`AtrParser::push_data`].
#[derive(Debug, Clone)]
pub struct AtrParser {
    pos: Pos,
    convention: Option<Convention>,
    params: BTreeMap<u8, u8>,
    historical: Vec<u8>,
    historical_remaining: u8,
    yi: u8,
    txi: u8,
    tck: u8,
    xor: u8,
    has_tck: bool,
    last_element_name: String,
}

impl Default for AtrParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AtrParser {
    pub fn new() -> Self {
        Self {
            pos: Pos::Ts,
            convention: None,
            params: BTreeMap::new(),
            historical: Vec::new(),
            historical_remaining: 0,
            yi: 0,
            txi: 1,
            tck: 0,
            xor: 0,
            has_tck: false,
            last_element_name: String::new(),
        }
    }

    /// Feeds the next logical byte to the parser.
    pub fn push_data(&mut self, data: u8) -> Result<(), FormatError> {
        self.last_element_name.clear();
        match self.pos {
            Pos::Ts => self.on_ts(data),
            Pos::T0 => {
                self.xor ^= data;
                self.on_t0(data);
                Ok(())
            }
            Pos::Txi => {
                self.xor ^= data;
                self.on_tx(data);
                Ok(())
            }
            Pos::Tk => {
                self.xor ^= data;
                self.on_tk(data);
                Ok(())
            }
            Pos::Tck => {
                self.on_tck(data);
                Ok(())
            }
            Pos::Complete => Err(FormatError::AlreadyComplete),
        }
    }

    fn on_ts(&mut self, data: u8) -> Result<(), FormatError> {
        let convention = match data {
            0x3B => Convention::Direct,
            0x3F => Convention::Inverse,
            other => return Err(FormatError::InvalidTs(other)),
        };
        self.convention = Some(convention);
        self.pos = Pos::T0;
        self.last_element_name = "TS".into();
        Ok(())
    }

    fn on_t0(&mut self, data: u8) {
        self.historical_remaining = data & 0x0F;
        self.yi = data & TX_MASK;
        self.last_element_name = "T0".into();
        self.pos = Pos::Txi;
        if self.yi == 0 {
            self.advance_past_round();
        }
    }

    fn on_tx(&mut self, data: u8) {
        let tx = self.expected_tx();
        self.last_element_name = format!("{}{}", tx.name(), self.txi);
        self.process_txi(tx, data);

        if tx == Tx::Td {
            self.yi = data & TX_MASK;
            if self.yi != 0 {
                self.txi += 1;
                return;
            }
        }

        if self.yi == 0 {
            self.advance_past_round();
        }
    }

    /// Moves past `Txi` once a round's `Yi` is fully drained: to `TK` if
    /// historical bytes remain, otherwise straight to `TCK` or `Complete`.
    fn advance_past_round(&mut self) {
        if self.historical_remaining > 0 {
            self.pos = Pos::Tk;
        } else {
            self.has_tck = self.need_tck();
            self.pos = if self.has_tck { Pos::Tck } else { Pos::Complete };
        }
    }

    fn process_txi(&mut self, tx: Tx, data: u8) {
        self.yi &= !(tx as u8);
        let stored = if tx == Tx::Td { data & TD_MASK } else { data };
        self.params.insert(tx.key(self.txi), stored);
    }

    fn expected_tx(&self) -> Tx {
        Tx::ALL
            .into_iter()
            .find(|tx| self.yi & (*tx as u8) != 0)
            .unwrap_or(Tx::Td)
    }

    fn on_tk(&mut self, data: u8) {
        if self.historical_remaining > 0 {
            self.historical.push(data);
            self.last_element_name = format!("H{}", self.historical.len());
            self.historical_remaining -= 1;
        }
        if self.historical_remaining == 0 {
            self.has_tck = self.need_tck();
            self.pos = if self.has_tck { Pos::Tck } else { Pos::Complete };
        }
    }

    /// TCK is required iff any indicated protocol across rounds 1..=3 is
    /// non-zero (ISO 7816-3 §8.2.5: present unless only T=0 is indicated).
    fn need_tck(&self) -> bool {
        (1..=3).any(|i| self.interface_byte(Tx::Td, i).unwrap_or(0) != 0)
    }

    fn on_tck(&mut self, data: u8) {
        self.tck = data;
        self.pos = Pos::Complete;
        self.last_element_name = "TCK".into();
    }

    /// The value of an interface byte, if present in the ATR parsed so
    /// far.
    pub fn interface_byte(&self, tx: Tx, idx: u8) -> Option<u8> {
        self.params.get(&tx.key(idx)).copied()
    }

    /// `true` once the parser has consumed the full ATR (through TCK, if
    /// required).
    pub fn completed(&self) -> bool {
        self.pos == Pos::Complete
    }

    /// `true` iff completed and, when TCK is required, the accumulated
    /// XOR from T0 through the byte before TCK equals TCK.
    pub fn valid(&self) -> bool {
        self.completed() && (!self.has_tck || self.xor == self.tck)
    }

    /// The field name the most recent [`Self::push_data`] call filled in
    /// (`"TS"`, `"TA1"`, `"H3"`, `"TCK"`, ...).
    pub fn last_element_name(&self) -> &str {
        &self.last_element_name
    }

    pub fn convention(&self) -> Option<Convention> {
        self.convention
    }

    pub fn historical_bytes(&self) -> &[u8] {
        &self.historical
    }

    pub fn tck(&self) -> Option<u8> {
        self.has_tck.then_some(self.tck)
    }

    /// Human-readable rendering for a `TextFrame`, in the original's
    /// `ToString()` style (`"DIRECT(3Bh) TA1(11h) TD1(01h) ..."`).
    pub fn to_string_summary(&self) -> String {
        let mut out = String::new();
        if let Some(convention) = self.convention {
            let name = match convention {
                Convention::Direct => "DIRECT",
                Convention::Inverse => "INVERSE",
                Convention::Invalid(_) => "INVALID",
            };
            out.push_str(&format!("{}({:02X}h) ", name, u8::from(convention)));
        }
        for i in 1..=4u8 {
            for tx in Tx::ALL {
                if let Some(val) = self.interface_byte(tx, i) {
                    out.push_str(&format!("{}{}({:02X}h) ", tx.name(), i, val));
                }
            }
        }
        if !self.historical.is_empty() {
            out.push_str(&format!(
                "No. of hist.({:02X}h) '{}' ",
                self.historical.len(),
                hex_bytes(&self.historical)
            ));
        }
        if let Some(tck) = self.tck() {
            out.push_str(&format!("TCK({:02X}h)", tck));
        }
        trace!(summary = %out, "ATR decoded");
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_all(parser: &mut AtrParser, bytes: &[u8]) {
        for &b in bytes {
            parser.push_data(b).expect("push_data failed");
        }
    }

    #[test]
    fn minimal_atr_direct_t0_only() {
        // S1: TS=DIRECT, T0=0x00 (Y1=0, K=0).
        let mut p = AtrParser::new();
        push_all(&mut p, &[0x3B, 0x00]);
        assert!(p.completed());
        assert!(p.valid());
        assert_eq!(p.tck(), None);
        assert!(p.to_string_summary().contains("DIRECT(3Bh)"));
    }

    #[test]
    fn atr_with_historicals_and_tck() {
        // S2 (adjusted): TD1 indicates T=1, so TCK is required.
        let t0 = 0x93u8; // Y1 = 0x90 (TA1,TD1 present), K=3
        let ta1 = 0x11u8; // Fi=1, Di=1
        let td1 = 0x01u8; // Y2=0, protocol T=1
        let h = [b'A', b'B', b'C'];
        let tck = t0 ^ ta1 ^ td1 ^ h[0] ^ h[1] ^ h[2];
        let mut p = AtrParser::new();
        push_all(&mut p, &[0x3B, t0, ta1, td1, h[0], h[1], h[2], tck]);
        assert!(p.completed());
        assert!(p.valid());
        assert_eq!(p.interface_byte(Tx::Ta, 1), Some(0x11));
        assert_eq!(p.interface_byte(Tx::Td, 1), Some(0x01));
        assert_eq!(p.historical_bytes(), &h);
        assert_eq!(p.tck(), Some(tck));
    }

    #[test]
    fn invalid_tck_marks_atr_invalid() {
        let mut p = AtrParser::new();
        push_all(&mut p, &[0x3B, 0x93, 0x11, 0x01, b'A', b'B', b'C', 0x00]);
        assert!(p.completed());
        assert!(!p.valid());
    }

    #[test]
    fn invalid_ts_byte_is_a_format_error() {
        let mut p = AtrParser::new();
        assert_eq!(p.push_data(0x42), Err(FormatError::InvalidTs(0x42)));
    }

    #[test]
    fn pushing_past_complete_is_a_format_error() {
        let mut p = AtrParser::new();
        push_all(&mut p, &[0x3B, 0x00]);
        assert_eq!(p.push_data(0x00), Err(FormatError::AlreadyComplete));
    }

    #[test]
    fn multi_round_td_chain() {
        // T0 -> TD1 -> TD2, protocol in TD2's low nibble is T=1.
        let t0 = 0x80u8; // Y1 = TD present only, K=0
        let td1 = 0x80u8; // Y2 = TD present only, protocol T=0
        let td2 = 0x01u8; // Y3 = 0, protocol T=1
        let tck = t0 ^ td1 ^ td2;
        let mut p = AtrParser::new();
        push_all(&mut p, &[0x3B, t0, td1, td2, tck]);
        assert!(p.valid());
        assert_eq!(p.interface_byte(Tx::Td, 1), Some(0x00));
        assert_eq!(p.interface_byte(Tx::Td, 2), Some(0x01));
    }
}
