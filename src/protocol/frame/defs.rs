//! MD3 protocol constants: function codes, header flags and size limits.

/// Size of one MD3 block on the wire: two 16-bit words plus the
/// checksum/flags byte.
pub const MD3_BLOCK_SIZE: usize = 5;

/// Maximum number of blocks (header included) in one MD3 message.
pub const MAX_BLOCKS_PER_MESSAGE: usize = 16;

/// Maximum number of channels addressed by one module.
pub const MAX_CHANNELS_PER_MODULE: u8 = 16;

/// Maximum number of modules one change-of-state scan may cover. The COS
/// request packs the module count into three bits alongside the force-send
/// flag, so the range is 1..=8.
pub const MAX_COS_MODULES: u8 = 8;

/// Value reported for an analog or counter channel whose source has gone
/// offline or which has no configured point.
pub const ANALOG_FAILURE_VALUE: u16 = 0x8000;

/// Signed range of the one-byte delta encoding. Any per-channel delta
/// outside this range forces a full-value resend for the whole module.
pub const DELTA_MIN: i32 = i8::MIN as i32;
pub const DELTA_MAX: i32 = i8::MAX as i32;

/// Default window (seconds) beyond which an inbound binary time tag is
/// considered unreliable and replaced with local time.
pub const DEFAULT_TIMESTAMP_WINDOW_SECS: u64 = 60 * 30;

/// MD3 function codes, numbered as in the governing dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    AnalogUnconditional = 5,
    AnalogDeltaScan = 6,
    DigitalUnconditionalObs = 7,
    DigitalCosScan = 8,
    HrerListScan = 9,
    AnalogNoChangeReply = 13,
    DigitalNoChangeReply = 14,
    ControlRequestOk = 15,
    FreezeAndResetCounters = 16,
    PomControl = 17,
    DomControl = 19,
    AomControl = 23,
    ControlOrScanRequestRejected = 30,
    CounterScan = 31,
    SystemSignOnControl = 40,
    SystemSetDateTimeControl = 43,
    SystemSetDateTimeControlNew = 44,
    SystemFlagScan = 52,
}

impl FunctionCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        use FunctionCode::*;
        Some(match value {
            5 => AnalogUnconditional,
            6 => AnalogDeltaScan,
            7 => DigitalUnconditionalObs,
            8 => DigitalCosScan,
            9 => HrerListScan,
            13 => AnalogNoChangeReply,
            14 => DigitalNoChangeReply,
            15 => ControlRequestOk,
            16 => FreezeAndResetCounters,
            17 => PomControl,
            19 => DomControl,
            23 => AomControl,
            30 => ControlOrScanRequestRejected,
            31 => CounterScan,
            40 => SystemSignOnControl,
            43 => SystemSetDateTimeControl,
            44 => SystemSetDateTimeControlNew,
            52 => SystemFlagScan,
            _ => return None,
        })
    }
}

/// Direction of an MD3 message, carried in bit 15 of the header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    MasterToStation,
    StationToMaster,
}

/// The status flags reported in the header flags nibble (word1 bits 7..4)
/// of outstation-to-master responses: RSF (restart latched), HRP
/// (time-tagged events pending) and DCP (digital change pending). Bit 0 is
/// reserved. Requests reuse the nibble for function-specific fields (the
/// COS scan carries its sequence number there).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags {
    pub rsf: bool,
    pub hrp: bool,
    pub dcp: bool,
}

impl HeaderFlags {
    pub fn to_nibble(self) -> u8 {
        (u8::from(self.rsf) << 3) | (u8::from(self.hrp) << 2) | (u8::from(self.dcp) << 1)
    }

    pub fn from_nibble(nibble: u8) -> Self {
        Self {
            rsf: nibble & 0x08 != 0,
            hrp: nibble & 0x04 != 0,
            dcp: nibble & 0x02 != 0,
        }
    }
}
