//! Digital (binary) scan builders: unconditional snapshot, sequenced
//! change-of-state, and time-tagged HRER event reporting.
//!
//! Response sizing is decided before any change flag is touched; flags and
//! pending events are only consumed after the response message has been
//! fully built, so a failed build never partially clears state.

use super::Md3Outstation;
use crate::points::TimeTaggedEvent;
use crate::protocol::frame::{
    digital_no_change_response, Direction, FunctionCode, Header, Message, MAX_BLOCKS_PER_MESSAGE,
};
use tracing::{debug, warn};

impl Md3Outstation {
    /// Digital unconditional/observed scan (fn 7): packed bit status for
    /// every module in the requested range, independent of change state.
    pub(crate) fn handle_digital_unconditional(&mut self, request: &Header) -> Message {
        let start = request.module;
        let count = request.channel_count();
        if self.table.binary_modules_in_range(start, count).is_empty() {
            warn!(
                station = self.station,
                start, count, "digital scan over unknown module range, rejecting"
            );
            return self.reject(request);
        }
        // Addressed in u16 so a range ending at module 255 never wraps or
        // repeats the top module.
        let words: Vec<u16> = (0..count)
            .map(|i| u16::from(start) + u16::from(i))
            .map(|m| u8::try_from(m).map_or(0, |m| self.table.binary_module_word(m)))
            .collect();
        let header = self.response_header(
            FunctionCode::DigitalUnconditionalObs,
            start,
            request.low_nibble,
        );
        Message::from_words(header, &words)
    }

    /// Change-of-state scan (fn 8): changed-module bitmask followed by the
    /// packed status of each flagged module. Sequenced: a repeated sequence
    /// number replays the cached response instead of recomputing.
    pub(crate) fn handle_digital_cos(&mut self, request: &Header) -> Message {
        let sequence = request.cos_sequence();
        if self.caches.last_cos_sequence == Some(sequence) {
            if let Some(cached) = &self.caches.last_cos_response {
                debug!(station = self.station, sequence, "repeated COS sequence, replaying cached response");
                return cached.clone();
            }
        }

        let start = request.module;
        let count = request.cos_module_count();
        let force = request.cos_force();
        let known = self.table.binary_modules_in_range(start, count);
        if known.is_empty() {
            return self.reject(request);
        }

        // Size the response before mutating anything.
        let included: Vec<u8> = known
            .into_iter()
            .filter(|&m| force || self.table.module_has_binary_change(m))
            .collect();

        let response = if included.is_empty() {
            digital_no_change_response(request, self.flag_nibble(), sequence)
        } else {
            let mut mask = 0u16;
            for &module in &included {
                mask |= 1 << (module - start);
            }
            let mut words = Vec::with_capacity(1 + included.len());
            words.push(mask);
            words.extend(included.iter().map(|&m| self.table.binary_module_word(m)));
            let header =
                self.response_header(FunctionCode::DigitalCosScan, start, sequence);
            Message::from_words(header, &words)
        };

        for &module in &included {
            self.table.clear_binary_changes_in_module(module);
        }
        self.caches.last_cos_sequence = Some(sequence);
        self.caches.last_cos_response = Some(response.clone());
        response
    }

    /// HRER scan (fn 9): individually time-tagged binary events in
    /// occurrence order. Truncation (master limit, block budget, or base
    /// time offset overflow) is a success; the remainder stays queued and
    /// the HRP flag tells the master to poll again with the next sequence
    /// number.
    pub(crate) fn handle_hrer(&mut self, request: &Header) -> Message {
        let sequence = request.sequence();
        if self.caches.last_hrer_sequence == Some(sequence) {
            if let Some(cached) = &self.caches.last_hrer_response {
                debug!(station = self.station, sequence, "repeated HRER sequence, replaying cached response");
                return cached.clone();
            }
        }

        let max_events = request.module as usize;
        // Header plus one base-time block leave room for one block per event.
        let capacity = max_events.min(MAX_BLOCKS_PER_MESSAGE - 2);

        let mut taken: Vec<(TimeTaggedEvent, u16)> = Vec::new();
        let mut base_seconds = 0u32;
        if let Some(first) = self.table.pending_events().next() {
            base_seconds = (first.time_tag / 1000) as u32;
            let base_ms = u64::from(base_seconds) * 1000;
            for event in self.table.pending_events().take(capacity) {
                // A tag before the base time cannot be encoded as an offset;
                // the event opens the next batch under its own base instead
                // of being reported with a falsified time.
                if event.time_tag < base_ms {
                    break;
                }
                let offset = event.time_tag - base_ms;
                if offset > u64::from(u16::MAX) {
                    break;
                }
                taken.push((*event, offset as u16));
            }
        }

        let delivered = taken.len();
        let more = delivered < self.table.pending_event_count();
        let mut flags = self.flags.header_flags(&self.table);
        flags.hrp = more;

        let header = Header::new(
            Direction::StationToMaster,
            self.station,
            FunctionCode::HrerListScan,
            delivered as u8,
            flags.to_nibble(),
            sequence,
        );
        let response = if delivered == 0 {
            Message::new(header)
        } else {
            let mut msg = Message::new(header);
            msg.push_block((base_seconds >> 16) as u16, (base_seconds & 0xffff) as u16);
            for (event, offset) in &taken {
                let word_a = (u16::from(event.address.module) << 8)
                    | (u16::from(event.address.channel) << 4)
                    | u16::from(event.value & 1);
                msg.push_block(word_a, *offset);
            }
            msg
        };

        // Delivery under a new sequence number consumes the events.
        self.table.consume_pending_events(delivered);
        self.caches.last_hrer_sequence = Some(sequence);
        self.caches.last_hrer_response = Some(response.clone());
        response
    }
}
