use crate::error::{OutstationError, OutstationResult};
use crate::protocol::frame::ANALOG_FAILURE_VALUE;
use std::collections::{BTreeSet, HashMap, VecDeque};
use tracing::warn;

/// MD3 time tag: milliseconds since the Unix epoch.
pub type Md3Time = u64;

/// Current wall-clock time as an MD3 time tag.
pub fn md3_now() -> Md3Time {
    chrono::Utc::now().timestamp_millis().max(0) as Md3Time
}

/// Protocol-side address of a point: module plus channel offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointAddress {
    pub module: u8,
    pub channel: u8,
}

impl PointAddress {
    pub fn new(module: u8, channel: u8) -> Self {
        Self { module, channel }
    }
}

/// A binary (digital) point. Binaries carry a time tag and a changed flag
/// consumed by the COS scans; time-tagged HRER reporting reads from the
/// pending-event queue instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryPoint {
    pub address: PointAddress,
    pub index: usize,
    pub value: u8,
    pub changed: bool,
    pub time_tag: Md3Time,
}

/// An analog or counter point. `last_sent` is the snapshot used for delta
/// classification; it only advances when a scan response containing the
/// channel has been built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogPoint {
    pub address: PointAddress,
    pub index: usize,
    pub current: u16,
    pub last_sent: u16,
    pub changed: bool,
}

/// Distinguishes the two groups sharing the analog machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogKind {
    Analog,
    Counter,
}

/// One pending time-tagged binary change, queued in occurrence order for
/// HRER reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeTaggedEvent {
    pub address: PointAddress,
    pub value: u8,
    pub time_tag: Md3Time,
}

#[derive(Debug, Default)]
struct AnalogGroup {
    by_addr: HashMap<PointAddress, AnalogPoint>,
    by_index: HashMap<usize, PointAddress>,
    modules: BTreeSet<u8>,
}

impl AnalogGroup {
    fn insert(&mut self, address: PointAddress, index: usize, label: &str) -> OutstationResult<()> {
        if self.by_addr.contains_key(&address) {
            return Err(OutstationError::Configuration(format!(
                "duplicate {label} point at module {} channel {}",
                address.module, address.channel
            )));
        }
        if self.by_index.contains_key(&index) {
            return Err(OutstationError::Configuration(format!(
                "duplicate {label} point index {index}"
            )));
        }
        self.by_addr.insert(
            address,
            AnalogPoint {
                address,
                index,
                current: 0,
                last_sent: 0,
                changed: false,
            },
        );
        self.by_index.insert(index, address);
        self.modules.insert(address.module);
        Ok(())
    }

    fn set_by_index(&mut self, index: usize, value: u16) -> bool {
        let Some(address) = self.by_index.get(&index) else {
            return false;
        };
        if let Some(point) = self.by_addr.get_mut(address) {
            if point.current != value {
                point.changed = true;
            }
            point.current = value;
        }
        true
    }
}

/// Default bound on the HRER pending-event queue.
pub const DEFAULT_MAX_PENDING_EVENTS: usize = 500;

/// The in-memory point table: current/previous values, change flags and
/// time tags, indexed both by protocol address and by bus index. All
/// lookups are O(1); module enumeration walks sorted module sets.
#[derive(Debug)]
pub struct PointTable {
    binary_by_addr: HashMap<PointAddress, BinaryPoint>,
    binary_by_index: HashMap<usize, PointAddress>,
    binary_modules: BTreeSet<u8>,
    analogs: AnalogGroup,
    counters: AnalogGroup,
    pending_events: VecDeque<TimeTaggedEvent>,
    max_pending_events: usize,
}

impl Default for PointTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PointTable {
    pub fn new() -> Self {
        Self {
            binary_by_addr: HashMap::new(),
            binary_by_index: HashMap::new(),
            binary_modules: BTreeSet::new(),
            analogs: AnalogGroup::default(),
            counters: AnalogGroup::default(),
            pending_events: VecDeque::new(),
            max_pending_events: DEFAULT_MAX_PENDING_EVENTS,
        }
    }

    /// Bound the HRER pending-event queue. When a master never polls fn 9
    /// the oldest events are discarded to keep memory flat.
    pub fn set_event_capacity(&mut self, limit: usize) {
        self.max_pending_events = limit.max(1);
    }

    pub fn insert_binary(&mut self, address: PointAddress, index: usize) -> OutstationResult<()> {
        if self.binary_by_addr.contains_key(&address) {
            return Err(OutstationError::Configuration(format!(
                "duplicate binary point at module {} channel {}",
                address.module, address.channel
            )));
        }
        if self.binary_by_index.contains_key(&index) {
            return Err(OutstationError::Configuration(format!(
                "duplicate binary point index {index}"
            )));
        }
        self.binary_by_addr.insert(
            address,
            BinaryPoint {
                address,
                index,
                value: 0,
                changed: false,
                time_tag: 0,
            },
        );
        self.binary_by_index.insert(index, address);
        self.binary_modules.insert(address.module);
        Ok(())
    }

    pub fn insert_analog(&mut self, address: PointAddress, index: usize) -> OutstationResult<()> {
        self.analogs.insert(address, index, "analog")
    }

    pub fn insert_counter(&mut self, address: PointAddress, index: usize) -> OutstationResult<()> {
        self.counters.insert(address, index, "counter")
    }

    fn analog_group(&self, kind: AnalogKind) -> &AnalogGroup {
        match kind {
            AnalogKind::Analog => &self.analogs,
            AnalogKind::Counter => &self.counters,
        }
    }

    fn analog_group_mut(&mut self, kind: AnalogKind) -> &mut AnalogGroup {
        match kind {
            AnalogKind::Analog => &mut self.analogs,
            AnalogKind::Counter => &mut self.counters,
        }
    }

    /// Store a new binary value with its time tag and append the change to
    /// the HRER pending queue. Returns false for an unknown index.
    pub fn set_binary_by_index(&mut self, index: usize, value: u8, time_tag: Md3Time) -> bool {
        let Some(address) = self.binary_by_index.get(&index).copied() else {
            return false;
        };
        if let Some(point) = self.binary_by_addr.get_mut(&address) {
            point.value = value & 1;
            point.changed = true;
            point.time_tag = time_tag;
        }
        self.pending_events.push_back(TimeTaggedEvent {
            address,
            value: value & 1,
            time_tag,
        });
        if self.pending_events.len() > self.max_pending_events {
            self.pending_events.pop_front();
            warn!(
                limit = self.max_pending_events,
                "time-tagged event queue full, discarding oldest event"
            );
        }
        true
    }

    pub fn set_analog_by_index(&mut self, kind: AnalogKind, index: usize, value: u16) -> bool {
        self.analog_group_mut(kind).set_by_index(index, value)
    }

    pub fn binary_point(&self, address: PointAddress) -> Option<&BinaryPoint> {
        self.binary_by_addr.get(&address)
    }

    pub fn analog_point(&self, kind: AnalogKind, address: PointAddress) -> Option<&AnalogPoint> {
        self.analog_group(kind).by_addr.get(&address)
    }

    pub fn has_binary_module(&self, module: u8) -> bool {
        self.binary_modules.contains(&module)
    }

    pub fn has_analog_module(&self, kind: AnalogKind, module: u8) -> bool {
        self.analog_group(kind).modules.contains(&module)
    }

    /// Known binary modules within `[start, start + count)`, ascending.
    /// The end bound is computed in `u16` so a range topping out at module
    /// 255 still includes it.
    pub fn binary_modules_in_range(&self, start: u8, count: u8) -> Vec<u8> {
        let end = u16::from(start) + u16::from(count);
        self.binary_modules
            .range(start..)
            .copied()
            .take_while(|&m| u16::from(m) < end)
            .collect()
    }

    /// Packed bit status of one binary module, bit 0 = lowest channel.
    /// Unknown channels read as zero.
    pub fn binary_module_word(&self, module: u8) -> u16 {
        let mut word = 0u16;
        for channel in 0..16u8 {
            if let Some(point) = self.binary_by_addr.get(&PointAddress::new(module, channel)) {
                if point.value != 0 {
                    word |= 1 << channel;
                }
            }
        }
        word
    }

    pub fn module_has_binary_change(&self, module: u8) -> bool {
        (0..16u8).any(|channel| {
            self.binary_by_addr
                .get(&PointAddress::new(module, channel))
                .is_some_and(|p| p.changed)
        })
    }

    pub fn clear_binary_changes_in_module(&mut self, module: u8) {
        for channel in 0..16u8 {
            if let Some(point) = self
                .binary_by_addr
                .get_mut(&PointAddress::new(module, channel))
            {
                point.changed = false;
            }
        }
    }

    pub fn any_binary_changed(&self) -> bool {
        self.binary_by_addr.values().any(|p| p.changed)
    }

    pub fn mark_all_binary_changed(&mut self) {
        for point in self.binary_by_addr.values_mut() {
            point.changed = true;
        }
    }

    /// Analog/counter channel value for a scan; channels with no configured
    /// point read as the failure value.
    pub fn analog_value(&self, kind: AnalogKind, module: u8, channel: u8) -> u16 {
        self.analog_group(kind)
            .by_addr
            .get(&PointAddress::new(module, channel))
            .map(|p| p.current)
            .unwrap_or(ANALOG_FAILURE_VALUE)
    }

    /// Value, last-sent snapshot and changed flag for delta classification.
    pub fn analog_delta_state(&self, kind: AnalogKind, module: u8, channel: u8) -> (u16, u16, bool) {
        self.analog_group(kind)
            .by_addr
            .get(&PointAddress::new(module, channel))
            .map(|p| (p.current, p.last_sent, p.changed))
            .unwrap_or((ANALOG_FAILURE_VALUE, ANALOG_FAILURE_VALUE, false))
    }

    /// Snapshot `last_sent` and clear change flags for the scanned channels
    /// of one module. Called only after the response has been fully built.
    pub fn mark_analog_module_sent(&mut self, kind: AnalogKind, module: u8, channels: u8) {
        let group = self.analog_group_mut(kind);
        for channel in 0..channels {
            if let Some(point) = group.by_addr.get_mut(&PointAddress::new(module, channel)) {
                point.last_sent = point.current;
                point.changed = false;
            }
        }
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.pending_events.is_empty()
    }

    /// Pending time-tagged events in occurrence order, oldest first.
    pub fn pending_events(&self) -> impl Iterator<Item = &TimeTaggedEvent> {
        self.pending_events.iter()
    }

    /// Consume the first `count` pending events once they have been
    /// delivered under a new sequence number.
    pub fn consume_pending_events(&mut self, count: usize) {
        self.pending_events.drain(..count.min(self.pending_events.len()));
    }

    /// Diagnostic snapshot of every binary point with its time tag,
    /// ordered by bus index.
    pub fn dump_time_tagged_points(&self) -> Vec<BinaryPoint> {
        let mut points: Vec<BinaryPoint> = self.binary_by_addr.values().copied().collect();
        points.sort_by_key(|p| p.index);
        points
    }

    pub fn binary_count(&self) -> usize {
        self.binary_by_addr.len()
    }
}
