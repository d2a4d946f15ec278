use crate::points::PointTable;
use crate::protocol::frame::{HeaderFlags, Message};
use std::fmt;
use std::sync::Arc;

/// A pure query over an immutable view of the point table, injected at
/// construction so the system flags always reflect live state without
/// coupling the flag word to stored booleans.
pub type FlagQueryFn = Arc<dyn Fn(&PointTable) -> bool + Send + Sync>;

/// System status flags reported in response headers and by the system flag
/// scan. The restart flag latches at startup and clears on a successful
/// flag scan; the other two are computed on demand.
pub struct SystemFlags {
    digital_changed: FlagQueryFn,
    time_tagged_available: FlagQueryFn,
    restart_latched: bool,
}

impl SystemFlags {
    pub fn new(digital_changed: FlagQueryFn, time_tagged_available: FlagQueryFn) -> Self {
        Self {
            digital_changed,
            time_tagged_available,
            restart_latched: true,
        }
    }

    /// Default queries straight off the point table.
    pub fn defaults() -> Self {
        Self::new(
            Arc::new(|table: &PointTable| table.any_binary_changed()),
            Arc::new(|table: &PointTable| table.has_pending_events()),
        )
    }

    pub fn header_flags(&self, table: &PointTable) -> HeaderFlags {
        HeaderFlags {
            rsf: self.restart_latched,
            hrp: (self.time_tagged_available)(table),
            dcp: (self.digital_changed)(table),
        }
    }

    /// The 16-bit word returned by the system flag scan: bit 15 = digital
    /// changed, bit 14 = time-tagged data available, bit 13 = restart
    /// latched.
    pub fn flag_word(&self, table: &PointTable) -> u16 {
        (u16::from((self.digital_changed)(table)) << 15)
            | (u16::from((self.time_tagged_available)(table)) << 14)
            | (u16::from(self.restart_latched) << 13)
    }

    pub fn restart_latched(&self) -> bool {
        self.restart_latched
    }

    pub fn clear_restart(&mut self) {
        self.restart_latched = false;
    }
}

impl fmt::Debug for SystemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemFlags")
            .field("restart_latched", &self.restart_latched)
            .finish_non_exhaustive()
    }
}

/// Sequence bookkeeping for the two sequenced digital scans. A repeated
/// sequence number means the master never saw the previous response, so the
/// cached message is replayed verbatim instead of recomputing (which would
/// silently drop the undelivered changes).
#[derive(Debug, Default)]
pub struct ScanCaches {
    pub last_hrer_sequence: Option<u8>,
    pub last_hrer_response: Option<Message>,
    pub last_cos_sequence: Option<u8>,
    pub last_cos_response: Option<Message>,
}
