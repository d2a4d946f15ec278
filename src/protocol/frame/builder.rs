//! Constructors for MD3 request and response messages.
//!
//! Request builders express the master side of the dialect and are what the
//! integration tests poll the outstation with; response helpers cover the
//! fixed acknowledgement shapes (control OK, reject, no-change replies).

use super::{Direction, FunctionCode, Header, Message, MAX_COS_MODULES};

fn request_header(
    station: u8,
    function: FunctionCode,
    module: u8,
    flags_nibble: u8,
    low_nibble: u8,
) -> Header {
    Header::new(
        Direction::MasterToStation,
        station,
        function,
        module,
        flags_nibble,
        low_nibble,
    )
}

/// Analog unconditional scan (fn 5) for `channels` (1..=16) of one module.
pub fn build_analog_unconditional_request(station: u8, module: u8, channels: u8) -> Message {
    Message::new(request_header(
        station,
        FunctionCode::AnalogUnconditional,
        module,
        0,
        channels.clamp(1, 16) - 1,
    ))
}

/// Analog delta scan (fn 6).
pub fn build_analog_delta_request(station: u8, module: u8, channels: u8) -> Message {
    Message::new(request_header(
        station,
        FunctionCode::AnalogDeltaScan,
        module,
        0,
        channels.clamp(1, 16) - 1,
    ))
}

/// Counter scan (fn 31), same addressing as the analog scans.
pub fn build_counter_scan_request(station: u8, module: u8, channels: u8) -> Message {
    Message::new(request_header(
        station,
        FunctionCode::CounterScan,
        module,
        0,
        channels.clamp(1, 16) - 1,
    ))
}

/// Digital unconditional/observed scan (fn 7) over a module range.
pub fn build_digital_unconditional_request(station: u8, start_module: u8, modules: u8) -> Message {
    Message::new(request_header(
        station,
        FunctionCode::DigitalUnconditionalObs,
        start_module,
        0,
        modules.clamp(1, 16) - 1,
    ))
}

/// Change-of-state scan (fn 8). The sequence number rides in the flags
/// nibble; the low nibble packs the force-send bit over a three-bit module
/// count (1..=8 modules).
pub fn build_digital_cos_request(
    station: u8,
    start_module: u8,
    modules: u8,
    sequence: u8,
    force: bool,
) -> Message {
    let low = (u8::from(force) << 3) | (modules.clamp(1, MAX_COS_MODULES) - 1);
    Message::new(request_header(
        station,
        FunctionCode::DigitalCosScan,
        start_module,
        sequence & 0x0f,
        low,
    ))
}

/// HRER time-tagged event scan (fn 9). The module field carries the
/// maximum number of events the master will accept.
pub fn build_hrer_request(station: u8, max_events: u8, sequence: u8) -> Message {
    Message::new(request_header(
        station,
        FunctionCode::HrerListScan,
        max_events,
        0,
        sequence & 0x0f,
    ))
}

/// The safety-check words every control request duplicates: the one's
/// complement of the two header words.
pub(crate) fn control_check_words(header: &Header) -> (u16, u16) {
    let (w0, w1) = header.to_words();
    (!w0, !w1)
}

/// Pulse output command (fn 17): module plus output channel selection, with
/// the complement check block.
pub fn build_pom_request(station: u8, module: u8, channel: u8) -> Message {
    let header = request_header(station, FunctionCode::PomControl, module, 0, channel & 0x0f);
    let (c0, c1) = control_check_words(&header);
    let mut msg = Message::new(header);
    msg.push_block(c0, c1);
    msg
}

/// Digital output command (fn 19): a 16-bit output word for one module,
/// guarded by its one's complement.
pub fn build_dom_request(station: u8, module: u8, output: u16) -> Message {
    let mut msg = Message::new(request_header(station, FunctionCode::DomControl, module, 0, 0));
    msg.push_block(output, !output);
    msg
}

/// Analog output setpoint command (fn 23).
pub fn build_aom_request(station: u8, module: u8, channel: u8, value: u16) -> Message {
    let mut msg = Message::new(request_header(
        station,
        FunctionCode::AomControl,
        module,
        0,
        channel & 0x0f,
    ));
    msg.push_block(value, !value);
    msg
}

/// Freeze-and-reset counters (fn 16); module 0 addresses all counter
/// modules.
pub fn build_freeze_reset_request(station: u8, module: u8) -> Message {
    Message::new(request_header(
        station,
        FunctionCode::FreezeAndResetCounters,
        module,
        0,
        0,
    ))
}

/// System sign-on (fn 40).
pub fn build_system_sign_on_request(station: u8) -> Message {
    Message::new(request_header(station, FunctionCode::SystemSignOnControl, 0, 0, 0))
}

/// Set date/time, old format (fn 43): whole seconds since the epoch.
pub fn build_set_date_time_request(station: u8, seconds: u32) -> Message {
    let mut msg = Message::new(request_header(
        station,
        FunctionCode::SystemSetDateTimeControl,
        0,
        0,
        0,
    ));
    msg.push_block((seconds >> 16) as u16, (seconds & 0xffff) as u16);
    msg
}

/// Set date/time, new format (fn 44): seconds plus a millisecond remainder
/// word.
pub fn build_set_date_time_new_request(station: u8, millis: u64) -> Message {
    let seconds = (millis / 1000) as u32;
    let ms = (millis % 1000) as u16;
    let mut msg = Message::new(request_header(
        station,
        FunctionCode::SystemSetDateTimeControlNew,
        0,
        0,
        0,
    ));
    msg.push_block((seconds >> 16) as u16, (seconds & 0xffff) as u16);
    msg.push_block(ms, 0);
    msg
}

/// System flag scan (fn 52).
pub fn build_system_flag_scan_request(station: u8) -> Message {
    Message::new(request_header(station, FunctionCode::SystemFlagScan, 0, 0, 0))
}

fn response_header(
    station: u8,
    function: FunctionCode,
    module: u8,
    flags_nibble: u8,
    low_nibble: u8,
) -> Header {
    Header::new(
        Direction::StationToMaster,
        station,
        function,
        module,
        flags_nibble,
        low_nibble,
    )
}

/// Control OK acknowledgement (fn 15), echoing the request's module and low
/// nibble.
pub fn control_ok_response(request: &Header, flags_nibble: u8) -> Message {
    Message::new(response_header(
        request.station,
        FunctionCode::ControlRequestOk,
        request.module,
        flags_nibble,
        request.low_nibble,
    ))
}

/// Control or scan reject (fn 30).
pub fn reject_response(request: &Header, flags_nibble: u8) -> Message {
    Message::new(response_header(
        request.station,
        FunctionCode::ControlOrScanRequestRejected,
        request.module,
        flags_nibble,
        request.low_nibble,
    ))
}

/// Analog/counter no-change reply (fn 13).
pub fn analog_no_change_response(request: &Header, flags_nibble: u8) -> Message {
    Message::new(response_header(
        request.station,
        FunctionCode::AnalogNoChangeReply,
        request.module,
        flags_nibble,
        request.low_nibble,
    ))
}

/// Digital no-change reply (fn 14), echoing the COS sequence number in the
/// low nibble.
pub fn digital_no_change_response(request: &Header, flags_nibble: u8, sequence: u8) -> Message {
    Message::new(response_header(
        request.station,
        FunctionCode::DigitalNoChangeReply,
        request.module,
        flags_nibble,
        sequence & 0x0f,
    ))
}

/// Sign-on acknowledgement: the request header echoed with the direction
/// bit flipped.
pub fn sign_on_response(request: &Header) -> Message {
    let mut header = *request;
    header.direction = Direction::StationToMaster;
    Message::new(header)
}
