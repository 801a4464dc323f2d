//! T=1 block parser: a byte-at-a-time state machine over
//! `NAD -> PCB -> LEN -> INF* -> LRC -> Complete`.
//!
//! Grounded directly on `original_source/source/T1Frame.h` (`Position`,
//! `DetermineBlockType`, XOR accumulation, `LRC-OK`/`LRC-ERR` naming).

use crate::error::FormatError;

/// T=1 block type, classified from PCB bits 7:6 (ISO 7816-3 §11.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// PCB & 0xC0 == 0x00 or 0x40.
    Information,
    /// PCB & 0xC0 == 0x80.
    ReceiveReady,
    /// PCB & 0xC0 == 0xC0.
    Supervisory,
}

fn classify(pcb: u8) -> BlockType {
    match pcb & 0xC0 {
        0xC0 => BlockType::Supervisory,
        0x80 => BlockType::ReceiveReady,
        _ => BlockType::Information,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pos {
    Nad,
    Pcb,
    Len,
    Inf,
    Lrc,
    Complete,
}

/// Incremental T=1 frame parser.
#[derive(Debug, Clone)]
pub struct T1Parser {
    pos: Pos,
    block_type: Option<BlockType>,
    nad: u8,
    pcb: u8,
    len: u8,
    inf: Vec<u8>,
    lrc: u8,
    xor: u8,
    last_element_name: String,
}

impl Default for T1Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl T1Parser {
    pub fn new() -> Self {
        Self {
            pos: Pos::Nad,
            block_type: None,
            nad: 0,
            pcb: 0,
            len: 0,
            inf: Vec::new(),
            lrc: 0,
            xor: 0,
            last_element_name: String::new(),
        }
    }

    pub fn push_data(&mut self, data: u8) -> Result<(), FormatError> {
        self.last_element_name.clear();
        match self.pos {
            Pos::Nad => {
                self.xor ^= data;
                self.nad = data;
                self.pos = Pos::Pcb;
                self.last_element_name = "NAD".into();
                Ok(())
            }
            Pos::Pcb => {
                self.xor ^= data;
                self.pcb = data;
                self.block_type = Some(classify(data));
                self.pos = Pos::Len;
                self.last_element_name = "PCB".into();
                Ok(())
            }
            Pos::Len => {
                self.xor ^= data;
                self.len = data;
                self.pos = if self.len > 0 { Pos::Inf } else { Pos::Lrc };
                self.last_element_name = "LEN".into();
                Ok(())
            }
            Pos::Inf => {
                self.xor ^= data;
                self.inf.push(data);
                self.last_element_name = format!("INF{}", self.inf.len());
                if self.inf.len() == self.len as usize {
                    self.pos = Pos::Lrc;
                }
                Ok(())
            }
            Pos::Lrc => {
                self.lrc = data;
                self.pos = Pos::Complete;
                self.last_element_name =
                    format!("LRC-{}", if self.lrc == self.xor { "OK" } else { "ERR" });
                Ok(())
            }
            Pos::Complete => Err(FormatError::AlreadyComplete),
        }
    }

    /// `true` iff exactly `5 + LEN` bytes have been consumed.
    pub fn completed(&self) -> bool {
        self.pos == Pos::Complete
    }

    /// `true` iff completed and `NAD ^ PCB ^ LEN ^ (^ INF) == LRC`.
    pub fn valid(&self) -> bool {
        self.completed() && self.xor == self.lrc
    }

    pub fn last_element_name(&self) -> &str {
        &self.last_element_name
    }

    pub fn block_type(&self) -> Option<BlockType> {
        self.block_type
    }

    pub fn to_string_summary(&self) -> String {
        let bt = match self.block_type {
            Some(BlockType::Information) => "I-BLOCK",
            Some(BlockType::ReceiveReady) => "R-BLOCK",
            Some(BlockType::Supervisory) => "S-BLOCK",
            None => "Unknown",
        };
        format!(
            "{} NAD({:02X}h) PCB({:02X}h) LEN({:02X}h) INF({}h) LRC({:02X}h)",
            bt,
            self.nad,
            self.pcb,
            self.len,
            crate::byteutil::hex_bytes(&self.inf)
                .trim_end_matches('h'),
            self.lrc
        )
    }
}
