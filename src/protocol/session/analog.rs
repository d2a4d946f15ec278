//! Analog and counter scan builders.
//!
//! Both groups share the module/channel/delta machinery: a scan reads every
//! requested channel, classifies the module three ways and only then, once
//! the response is fully built, advances the last-sent snapshots and clears
//! the change flags.

use super::Md3Outstation;
use crate::points::AnalogKind;
use crate::protocol::frame::{
    analog_no_change_response, FunctionCode, Header, Message, DELTA_MAX, DELTA_MIN,
    MAX_CHANNELS_PER_MODULE,
};
use tracing::warn;

/// Module-level classification of a delta scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AnalogChangeType {
    /// Every delta is zero and no flag is set.
    NoChange,
    /// Every delta fits the signed one-byte encoding.
    DeltaChange,
    /// At least one delta overflows the encoding; resend full values.
    AllChange,
}

impl Md3Outstation {
    /// Read one module's channels, producing values, deltas and the
    /// three-way classification. Never mutates.
    pub(crate) fn read_analog_range(
        &self,
        kind: AnalogKind,
        module: u8,
        channels: u8,
    ) -> (AnalogChangeType, Vec<u16>, Vec<i32>) {
        let mut change = AnalogChangeType::NoChange;
        let mut values = Vec::with_capacity(channels as usize);
        let mut deltas = Vec::with_capacity(channels as usize);
        for channel in 0..channels {
            let (current, last_sent, flagged) =
                self.table.analog_delta_state(kind, module, channel);
            let delta = i32::from(current) - i32::from(last_sent);
            values.push(current);
            deltas.push(delta);
            if !(DELTA_MIN..=DELTA_MAX).contains(&delta) {
                change = AnalogChangeType::AllChange;
            } else if (delta != 0 || flagged) && change == AnalogChangeType::NoChange {
                change = AnalogChangeType::DeltaChange;
            }
        }
        (change, values, deltas)
    }

    fn unconditional_function(kind: AnalogKind) -> FunctionCode {
        match kind {
            AnalogKind::Analog => FunctionCode::AnalogUnconditional,
            AnalogKind::Counter => FunctionCode::CounterScan,
        }
    }

    fn full_value_response(
        &mut self,
        request: &Header,
        kind: AnalogKind,
        values: &[u16],
    ) -> Message {
        let header = self.response_header(
            Self::unconditional_function(kind),
            request.module,
            request.low_nibble,
        );
        let response = Message::from_words(header, values);
        self.table.mark_analog_module_sent(
            kind,
            request.module,
            values.len() as u8,
        );
        response
    }

    fn scan_preconditions(&self, request: &Header, kind: AnalogKind) -> Result<u8, Message> {
        let channels = request.channel_count();
        if channels > MAX_CHANNELS_PER_MODULE {
            return Err(self.reject(request));
        }
        if !self.table.has_analog_module(kind, request.module) {
            warn!(
                station = self.station,
                module = request.module,
                ?kind,
                "scan for unknown module, rejecting"
            );
            return Err(self.reject(request));
        }
        Ok(channels)
    }

    /// Analog unconditional scan (fn 5): full values regardless of change
    /// state.
    pub(crate) fn handle_analog_unconditional(&mut self, request: &Header) -> Message {
        match self.scan_preconditions(request, AnalogKind::Analog) {
            Ok(channels) => {
                let (_, values, _) = self.read_analog_range(AnalogKind::Analog, request.module, channels);
                self.full_value_response(request, AnalogKind::Analog, &values)
            }
            Err(reject) => reject,
        }
    }

    /// Analog delta scan (fn 6): no-change reply, compact deltas, or a full
    /// resend when any delta overflows the one-byte encoding.
    pub(crate) fn handle_analog_delta(&mut self, request: &Header) -> Message {
        let channels = match self.scan_preconditions(request, AnalogKind::Analog) {
            Ok(channels) => channels,
            Err(reject) => return reject,
        };
        let (change, values, deltas) =
            self.read_analog_range(AnalogKind::Analog, request.module, channels);
        match change {
            AnalogChangeType::NoChange => {
                analog_no_change_response(request, self.flag_nibble())
            }
            AnalogChangeType::AllChange => {
                self.full_value_response(request, AnalogKind::Analog, &values)
            }
            AnalogChangeType::DeltaChange => {
                // Four signed one-byte deltas per data block.
                let bytes: Vec<u8> = deltas.iter().map(|&d| d as i8 as u8).collect();
                let words: Vec<u16> = bytes
                    .chunks(2)
                    .map(|pair| {
                        (u16::from(pair[0]) << 8) | u16::from(pair.get(1).copied().unwrap_or(0))
                    })
                    .collect();
                let header = self.response_header(
                    FunctionCode::AnalogDeltaScan,
                    request.module,
                    request.low_nibble,
                );
                let response = Message::from_words(header, &words);
                self.table.mark_analog_module_sent(
                    AnalogKind::Analog,
                    request.module,
                    channels,
                );
                response
            }
        }
    }

    /// Counter scan (fn 31): same machinery as the analog scans; any kind
    /// of change triggers a full-value resend, no change gets the fn 13
    /// reply.
    pub(crate) fn handle_counter_scan(&mut self, request: &Header) -> Message {
        let channels = match self.scan_preconditions(request, AnalogKind::Counter) {
            Ok(channels) => channels,
            Err(reject) => return reject,
        };
        let (change, values, _) =
            self.read_analog_range(AnalogKind::Counter, request.module, channels);
        match change {
            AnalogChangeType::NoChange => {
                analog_no_change_response(request, self.flag_nibble())
            }
            _ => self.full_value_response(request, AnalogKind::Counter, &values),
        }
    }
}
