//! The MD3 outstation protocol engine: function-code dispatch, command
//! handlers and bus event ingestion. Scan builders live in the `analog`
//! and `digital` submodules.
//!
//! One `Md3Outstation` exists per outstation address and is owned by a
//! single execution context (the port actor); nothing here locks.

mod analog;
mod digital;
mod state;

pub use state::{FlagQueryFn, ScanCaches, SystemFlags};

use crate::bus::{status_completion, BusCommand, BusEvent, BusPublisher, CommandStatus, ConnectState};
use crate::points::{md3_now, BinaryPoint, Md3Time, PointTable};
use crate::protocol::frame::{
    builder, reject_response, sign_on_response, Direction, FunctionCode, Header, Message,
};
use crate::types::Md3OutstationConfig;
use std::time::Duration;
use tracing::{debug, warn};

pub struct Md3Outstation {
    station: u8,
    override_old_timestamps: bool,
    timestamp_window_ms: u64,
    command_timeout: Duration,
    table: PointTable,
    flags: SystemFlags,
    caches: ScanCaches,
}

impl Md3Outstation {
    pub fn new(config: &Md3OutstationConfig, table: PointTable, flags: SystemFlags) -> Self {
        Self {
            station: config.outstation_addr & 0x7f,
            override_old_timestamps: config.override_old_timestamps,
            timestamp_window_ms: config.timestamp_window_secs * 1000,
            command_timeout: Duration::from_millis(config.command_timeout_ms),
            table,
            flags,
            caches: ScanCaches::default(),
        }
    }

    pub fn station(&self) -> u8 {
        self.station
    }

    pub fn point_table(&self) -> &PointTable {
        &self.table
    }

    pub fn dump_time_tagged_points(&self) -> Vec<BinaryPoint> {
        self.table.dump_time_tagged_points()
    }

    fn flag_nibble(&self) -> u8 {
        self.flags.header_flags(&self.table).to_nibble()
    }

    pub(crate) fn response_header(
        &self,
        function: FunctionCode,
        module: u8,
        low_nibble: u8,
    ) -> Header {
        Header::new(
            Direction::StationToMaster,
            self.station,
            function,
            module,
            self.flag_nibble(),
            low_nibble,
        )
    }

    pub(crate) fn reject(&self, request: &Header) -> Message {
        reject_response(request, self.flag_nibble())
    }

    /// Dispatch one checksum-valid inbound message. Returns the response to
    /// transmit, or `None` when the message is not addressed to this
    /// outstation (multidrop) and must be ignored.
    pub async fn process_message(
        &mut self,
        msg: &Message,
        bus: &dyn BusPublisher,
    ) -> Option<Message> {
        let header = msg.header;
        if header.direction != Direction::MasterToStation || header.station != self.station {
            return None;
        }

        let Some(function) = header.function() else {
            warn!(
                station = self.station,
                function = header.function_raw,
                "unknown function code, rejecting"
            );
            return Some(self.reject(&header));
        };
        debug!(station = self.station, ?function, module = header.module, "processing request");

        use FunctionCode::*;
        let response = match function {
            AnalogUnconditional => self.handle_analog_unconditional(&header),
            AnalogDeltaScan => self.handle_analog_delta(&header),
            CounterScan => self.handle_counter_scan(&header),
            DigitalUnconditionalObs => self.handle_digital_unconditional(&header),
            DigitalCosScan => self.handle_digital_cos(&header),
            HrerListScan => self.handle_hrer(&header),
            FreezeAndResetCounters => self.handle_freeze_reset(msg, bus).await,
            PomControl => self.handle_pom(msg, bus).await,
            DomControl => self.handle_dom(msg, bus).await,
            AomControl => self.handle_aom(msg, bus).await,
            SystemSignOnControl => sign_on_response(&header),
            SystemSetDateTimeControl => self.handle_set_date_time(msg, bus, false).await,
            SystemSetDateTimeControlNew => self.handle_set_date_time(msg, bus, true).await,
            SystemFlagScan => self.handle_system_flag_scan(&header),
            // Response-only codes are never valid master-to-station traffic.
            AnalogNoChangeReply | DigitalNoChangeReply | ControlRequestOk
            | ControlOrScanRequestRejected => {
                warn!(
                    station = self.station,
                    ?function,
                    "response-only function code in request direction, rejecting"
                );
                self.reject(&header)
            }
        };
        Some(response)
    }

    /// Apply one inbound bus data event to the point table. Runs on the
    /// same serialized context as message processing, so change flags are
    /// never mutated mid-scan.
    pub fn handle_bus_event(&mut self, event: BusEvent) -> CommandStatus {
        match event {
            BusEvent::Analog { index, value } => {
                self.set_analog(crate::points::AnalogKind::Analog, index, value)
            }
            BusEvent::Counter { index, value } => {
                self.set_analog(crate::points::AnalogKind::Counter, index, value)
            }
            BusEvent::Binary {
                index,
                value,
                timestamp,
            } => {
                let time_tag = self.effective_time_tag(index, timestamp);
                if self.table.set_binary_by_index(index, value, time_tag) {
                    CommandStatus::Success
                } else {
                    warn!(index, "bus event for unknown binary point index");
                    CommandStatus::Undefined
                }
            }
            BusEvent::AnalogQuality { index, online } => {
                if online {
                    CommandStatus::Success
                } else {
                    self.set_analog(
                        crate::points::AnalogKind::Analog,
                        index,
                        crate::protocol::frame::ANALOG_FAILURE_VALUE,
                    )
                }
            }
            BusEvent::CounterQuality { index, online } => {
                if online {
                    CommandStatus::Success
                } else {
                    self.set_analog(
                        crate::points::AnalogKind::Counter,
                        index,
                        crate::protocol::frame::ANALOG_FAILURE_VALUE,
                    )
                }
            }
            BusEvent::ConnectState(state) => {
                if state == ConnectState::Connected {
                    // The upstream side cannot know what we hold; flag every
                    // binary module so the next COS poll resynchronizes.
                    debug!(station = self.station, "upstream connected, marking all binaries changed");
                    self.table.mark_all_binary_changed();
                }
                CommandStatus::Success
            }
        }
    }

    fn set_analog(
        &mut self,
        kind: crate::points::AnalogKind,
        index: usize,
        value: u16,
    ) -> CommandStatus {
        if self.table.set_analog_by_index(kind, index, value) {
            CommandStatus::Success
        } else {
            warn!(index, ?kind, "bus event for unknown point index");
            CommandStatus::Undefined
        }
    }

    /// Replace an implausible inbound time tag with local time: if the
    /// supplied timestamp deviates from now by more than the configured
    /// window the upstream clock is not trusted.
    fn effective_time_tag(&self, index: usize, timestamp: Md3Time) -> Md3Time {
        if !self.override_old_timestamps {
            return timestamp;
        }
        let now = md3_now();
        if now.abs_diff(timestamp) > self.timestamp_window_ms {
            debug!(
                index,
                timestamp, "binary time tag outside trust window, using current time"
            );
            now
        } else {
            timestamp
        }
    }

    async fn perform(&self, command: BusCommand, bus: &dyn BusPublisher) -> CommandStatus {
        let (completion, waiter) = status_completion();
        bus.publish(command, Some(completion)).await;
        waiter.wait(self.command_timeout).await
    }

    async fn perform_and_ack(
        &self,
        request: &Header,
        command: BusCommand,
        bus: &dyn BusPublisher,
    ) -> Message {
        let status = self.perform(command, bus).await;
        if status == CommandStatus::Success {
            builder::control_ok_response(request, self.flag_nibble())
        } else {
            warn!(station = self.station, ?command, ?status, "command rejected by bus");
            self.reject(request)
        }
    }

    async fn handle_pom(&self, msg: &Message, bus: &dyn BusPublisher) -> Message {
        let header = msg.header;
        let expected = builder::control_check_words(&header);
        if msg.data_blocks() != std::slice::from_ref(&expected) {
            warn!(station = self.station, "POM safety check block mismatch");
            return self.reject(&header);
        }
        let command = BusCommand::PulseOutput {
            module: header.module,
            channel: header.low_nibble,
        };
        self.perform_and_ack(&header, command, bus).await
    }

    async fn handle_dom(&self, msg: &Message, bus: &dyn BusPublisher) -> Message {
        let header = msg.header;
        let output = match msg.data_blocks() {
            [(w0, w1)] if *w1 == !*w0 => *w0,
            _ => {
                warn!(station = self.station, "DOM output check word mismatch");
                return self.reject(&header);
            }
        };
        let command = BusCommand::DigitalOutput {
            module: header.module,
            output,
        };
        self.perform_and_ack(&header, command, bus).await
    }

    async fn handle_aom(&self, msg: &Message, bus: &dyn BusPublisher) -> Message {
        let header = msg.header;
        let value = match msg.data_blocks() {
            [(w0, w1)] if *w1 == !*w0 => *w0,
            _ => {
                warn!(station = self.station, "AOM value check word mismatch");
                return self.reject(&header);
            }
        };
        let command = BusCommand::AnalogOutput {
            module: header.module,
            channel: header.low_nibble,
            value,
        };
        self.perform_and_ack(&header, command, bus).await
    }

    async fn handle_freeze_reset(&self, msg: &Message, bus: &dyn BusPublisher) -> Message {
        let header = msg.header;
        if !msg.data_blocks().is_empty() {
            return self.reject(&header);
        }
        let command = BusCommand::FreezeResetCounters {
            module: header.module,
        };
        self.perform_and_ack(&header, command, bus).await
    }

    async fn handle_set_date_time(
        &self,
        msg: &Message,
        bus: &dyn BusPublisher,
        new_format: bool,
    ) -> Message {
        let header = msg.header;
        let millis = match (new_format, msg.data_blocks()) {
            (false, [(hi, lo)]) => u64::from((u32::from(*hi) << 16) | u32::from(*lo)) * 1000,
            (true, [(hi, lo), (ms, _)]) if *ms < 1000 => {
                u64::from((u32::from(*hi) << 16) | u32::from(*lo)) * 1000 + u64::from(*ms)
            }
            _ => {
                warn!(station = self.station, new_format, "malformed set-date-time request");
                return self.reject(&header);
            }
        };
        if millis == 0 {
            return self.reject(&header);
        }
        self.perform_and_ack(&header, BusCommand::SetDateTime { millis }, bus)
            .await
    }

    fn handle_system_flag_scan(&mut self, request: &Header) -> Message {
        let word = self.flags.flag_word(&self.table);
        let header = self.response_header(FunctionCode::SystemFlagScan, request.module, request.low_nibble);
        let response = Message::from_words(header, &[word]);
        // The master has now observed the restart; stop latching it.
        self.flags.clear_restart();
        response
    }

    #[cfg(test)]
    pub(crate) fn point_table_mut(&mut self) -> &mut PointTable {
        &mut self.table
    }
}
