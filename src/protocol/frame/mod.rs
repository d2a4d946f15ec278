use crate::protocol::error::ProtocolError;
use crate::protocol::wire::{WireDecode, WireEncode};
use bytes::{BufMut, Bytes};

pub mod builder;
pub mod defs;
pub use builder::*;
pub use defs::*;

/// CRC-6 (poly x^6 + x + 1) over the four payload bytes followed by the
/// two-bit flags field. A CRC with more than one polynomial term detects
/// every single-bit error, which is what the drop-on-corruption rule of the
/// link layer relies on.
pub fn crc6(payload: [u8; 4], flags: u8) -> u8 {
    const POLY: u8 = 0x03;

    fn push_bits(crc: u8, value: u8, nbits: u32) -> u8 {
        let mut crc = crc;
        for i in (0..nbits).rev() {
            let inbit = (value >> i) & 1;
            let msb = (crc >> 5) & 1;
            crc = (crc << 1) & 0x3f;
            if msb ^ inbit == 1 {
                crc ^= POLY;
            }
        }
        crc
    }

    let mut crc = 0u8;
    for b in payload {
        crc = push_bits(crc, b, 8);
    }
    push_bits(crc, flags & 0x03, 2)
}

/// One fixed-width MD3 block: two 16-bit payload words, a formatted-block
/// marker, an end-of-message marker and a CRC covering all of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub word0: u16,
    pub word1: u16,
    pub formatted: bool,
    pub end_of_message: bool,
}

impl Block {
    pub fn data(word0: u16, word1: u16) -> Self {
        Self {
            word0,
            word1,
            formatted: false,
            end_of_message: false,
        }
    }

    fn payload_bytes(&self) -> [u8; 4] {
        let w0 = self.word0.to_be_bytes();
        let w1 = self.word1.to_be_bytes();
        [w0[0], w0[1], w1[0], w1[1]]
    }

    fn flag_bits(&self) -> u8 {
        (u8::from(self.end_of_message) << 1) | u8::from(self.formatted)
    }

    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        let payload = self.payload_bytes();
        let flags = self.flag_bits();
        dst.put_slice(&payload);
        dst.put_u8((crc6(payload, flags) << 2) | flags);
    }

    /// Decode one block from exactly [`MD3_BLOCK_SIZE`] bytes, validating
    /// its checksum.
    pub fn decode(raw: &[u8; MD3_BLOCK_SIZE]) -> Result<Self, ProtocolError> {
        let payload = [raw[0], raw[1], raw[2], raw[3]];
        let flags = raw[4] & 0x03;
        let crc = raw[4] >> 2;
        if crc != crc6(payload, flags) {
            return Err(ProtocolError::ChecksumMismatch);
        }
        Ok(Self {
            word0: u16::from_be_bytes([raw[0], raw[1]]),
            word1: u16::from_be_bytes([raw[2], raw[3]]),
            formatted: flags & 0x01 != 0,
            end_of_message: flags & 0x02 != 0,
        })
    }
}

/// Decoded view of the formatted header block.
///
/// Layout:
/// - word0: bit 15 direction, bits 14..8 station address, bits 7..0
///   function code.
/// - word1: bits 15..8 module address, bits 7..4 flags nibble, bits 3..0
///   function-specific low nibble.
///
/// The function code is kept raw so that a well-formed message with an
/// unknown code can still be answered with a reject addressed to the right
/// station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub direction: Direction,
    pub station: u8,
    pub function_raw: u8,
    pub module: u8,
    pub flags_nibble: u8,
    pub low_nibble: u8,
}

impl Header {
    pub fn new(
        direction: Direction,
        station: u8,
        function: FunctionCode,
        module: u8,
        flags_nibble: u8,
        low_nibble: u8,
    ) -> Self {
        Self {
            direction,
            station: station & 0x7f,
            function_raw: function as u8,
            module,
            flags_nibble: flags_nibble & 0x0f,
            low_nibble: low_nibble & 0x0f,
        }
    }

    pub fn function(&self) -> Option<FunctionCode> {
        FunctionCode::from_u8(self.function_raw)
    }

    pub fn status_flags(&self) -> HeaderFlags {
        HeaderFlags::from_nibble(self.flags_nibble)
    }

    /// Channel count for analog/counter scans and module count for the
    /// digital unconditional scan (stored minus one).
    pub fn channel_count(&self) -> u8 {
        self.low_nibble + 1
    }

    /// Sequence number of an HRER request or a sequenced response.
    pub fn sequence(&self) -> u8 {
        self.low_nibble
    }

    /// Sequence number of a COS scan request (carried in the flags nibble).
    pub fn cos_sequence(&self) -> u8 {
        self.flags_nibble
    }

    /// Module count of a COS scan request (three bits, stored minus one).
    pub fn cos_module_count(&self) -> u8 {
        (self.low_nibble & 0x07) + 1
    }

    /// Force-send bit of a COS scan request.
    pub fn cos_force(&self) -> bool {
        self.low_nibble & 0x08 != 0
    }

    fn to_words(self) -> (u16, u16) {
        let dir = match self.direction {
            Direction::MasterToStation => 0u16,
            Direction::StationToMaster => 1u16 << 15,
        };
        let word0 = dir | (u16::from(self.station & 0x7f) << 8) | u16::from(self.function_raw);
        let word1 = (u16::from(self.module) << 8)
            | (u16::from(self.flags_nibble & 0x0f) << 4)
            | u16::from(self.low_nibble & 0x0f);
        (word0, word1)
    }

    pub fn to_block(self, end_of_message: bool) -> Block {
        let (word0, word1) = self.to_words();
        Block {
            word0,
            word1,
            formatted: true,
            end_of_message,
        }
    }

    pub fn from_block(block: &Block) -> Result<Self, ProtocolError> {
        if !block.formatted {
            return Err(ProtocolError::InvalidFrame(
                "first block of a message must be a formatted header".to_string(),
            ));
        }
        let direction = if block.word0 & 0x8000 != 0 {
            Direction::StationToMaster
        } else {
            Direction::MasterToStation
        };
        Ok(Self {
            direction,
            station: ((block.word0 >> 8) & 0x7f) as u8,
            function_raw: (block.word0 & 0xff) as u8,
            module: (block.word1 >> 8) as u8,
            flags_nibble: ((block.word1 >> 4) & 0x0f) as u8,
            low_nibble: (block.word1 & 0x0f) as u8,
        })
    }
}

/// One complete MD3 message: a header block followed by zero or more data
/// blocks. The type guarantees the header-first and non-empty invariants;
/// the end-of-message flag is derived at encode time, so re-encoding a
/// cached message is byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    data: Vec<(u16, u16)>,
}

impl Message {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            data: Vec::new(),
        }
    }

    /// Build a message from a flat list of payload words, packing two words
    /// per data block and zero-padding the last block.
    pub fn from_words(header: Header, words: &[u16]) -> Self {
        let mut msg = Self::new(header);
        for pair in words.chunks(2) {
            let w0 = pair[0];
            let w1 = pair.get(1).copied().unwrap_or(0);
            msg.push_block(w0, w1);
        }
        msg
    }

    pub fn push_block(&mut self, w0: u16, w1: u16) {
        self.data.push((w0, w1));
    }

    pub fn block_count(&self) -> usize {
        1 + self.data.len()
    }

    pub fn data_blocks(&self) -> &[(u16, u16)] {
        &self.data
    }

    /// All data payload words in block order.
    pub fn data_words(&self) -> Vec<u16> {
        self.data.iter().flat_map(|&(a, b)| [a, b]).collect()
    }
}

/// Codec context placeholder, kept so the wire traits retain an explicit
/// context seam shared with the framing codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct Md3CodecContext;

impl WireEncode for Message {
    type Error = ProtocolError;
    type Context = Md3CodecContext;

    fn encoded_len(&self, _ctx: &Self::Context) -> usize {
        self.block_count() * MD3_BLOCK_SIZE
    }

    fn encode_to<B: BufMut>(&self, dst: &mut B, _ctx: &Self::Context) -> Result<(), Self::Error> {
        if self.block_count() > MAX_BLOCKS_PER_MESSAGE {
            return Err(ProtocolError::Unterminated(self.block_count()));
        }
        let last = self.data.len();
        self.header.to_block(last == 0).encode_to(dst);
        for (i, &(w0, w1)) in self.data.iter().enumerate() {
            let mut block = Block::data(w0, w1);
            block.end_of_message = i + 1 == last;
            block.encode_to(dst);
        }
        Ok(())
    }
}

impl WireDecode for Message {
    type Error = ProtocolError;
    type Context = Md3CodecContext;

    fn parse<'a>(
        input: &'a [u8],
        _parent: &Bytes,
        _ctx: &Self::Context,
    ) -> Result<(&'a [u8], Self), Self::Error> {
        let mut rest = input;
        let mut blocks: Vec<Block> = Vec::new();
        loop {
            if rest.len() < MD3_BLOCK_SIZE {
                return Err(ProtocolError::InvalidFrame(
                    "truncated message: incomplete block".to_string(),
                ));
            }
            let mut raw = [0u8; MD3_BLOCK_SIZE];
            raw.copy_from_slice(&rest[..MD3_BLOCK_SIZE]);
            rest = &rest[MD3_BLOCK_SIZE..];

            let block = Block::decode(&raw)?;
            if blocks.is_empty() {
                if !block.formatted {
                    return Err(ProtocolError::InvalidFrame(
                        "message does not start with a formatted header block".to_string(),
                    ));
                }
            } else if block.formatted {
                return Err(ProtocolError::InvalidFrame(
                    "formatted block in data position".to_string(),
                ));
            }
            let end = block.end_of_message;
            blocks.push(block);
            if end {
                break;
            }
            if blocks.len() >= MAX_BLOCKS_PER_MESSAGE {
                return Err(ProtocolError::Unterminated(blocks.len()));
            }
        }

        let header = Header::from_block(&blocks[0])?;
        let data = blocks[1..].iter().map(|b| (b.word0, b.word1)).collect();
        Ok((rest, Message { header, data }))
    }
}
