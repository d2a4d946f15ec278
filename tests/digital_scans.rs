mod common;

use common::{
    init_tracing, module_points, test_outstation, test_outstation_config, RecordingBus,
    TEST_STATION,
};
use md3_outstation::protocol::frame::{
    build_digital_cos_request, build_digital_unconditional_request, build_hrer_request,
    FunctionCode,
};
use md3_outstation::{
    build_outstation, md3_now, BusEvent, CommandStatus, PointKind,
};

const BINARY_MODULE: u8 = 16;

#[tokio::test]
async fn unconditional_scan_snapshots_module_bits() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    outstation.handle_bus_event(BusEvent::Binary {
        index: 2,
        value: 1,
        timestamp: md3_now(),
    });

    let request = build_digital_unconditional_request(TEST_STATION, BINARY_MODULE, 1);
    let response = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(
        response.header.function(),
        Some(FunctionCode::DigitalUnconditionalObs)
    );
    assert_eq!(response.header.module, BINARY_MODULE);
    assert_eq!(response.data_blocks(), &[(0b0100, 0)]);
}

#[tokio::test]
async fn unconditional_scan_over_unknown_range_is_rejected() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();

    let request = build_digital_unconditional_request(TEST_STATION, BINARY_MODULE + 8, 2);
    let response = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(
        response.header.function(),
        Some(FunctionCode::ControlOrScanRequestRejected)
    );
}

#[tokio::test]
async fn unconditional_scan_at_top_module_does_not_repeat_words() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, 255, 2, 0));
    let bus = RecordingBus::new();
    outstation.handle_bus_event(BusEvent::Binary {
        index: 1,
        value: 1,
        timestamp: md3_now(),
    });

    // A two-module scan starting at 255 runs off the address space; the
    // out-of-range slot reads as zero, not as module 255 again.
    let request = build_digital_unconditional_request(TEST_STATION, 255, 2);
    let response = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(
        response.header.function(),
        Some(FunctionCode::DigitalUnconditionalObs)
    );
    assert_eq!(response.data_blocks(), &[(0b0010, 0)]);
}

#[tokio::test]
async fn cos_scan_reports_changed_modules_then_no_change() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    assert_eq!(
        outstation.handle_bus_event(BusEvent::Binary {
            index: 2,
            value: 1,
            timestamp: md3_now(),
        }),
        CommandStatus::Success
    );

    let scan = build_digital_cos_request(TEST_STATION, BINARY_MODULE, 1, 1, false);
    let response = outstation.process_message(&scan, &bus).await.unwrap();
    assert_eq!(response.header.function(), Some(FunctionCode::DigitalCosScan));
    assert_eq!(response.header.low_nibble, 1);
    // Changed-module bitmask, then the status word of the flagged module.
    assert_eq!(response.data_blocks(), &[(0b0001, 0b0100)]);

    // The change flags were consumed; the next sequence sees nothing.
    let next = build_digital_cos_request(TEST_STATION, BINARY_MODULE, 1, 2, false);
    let no_change = outstation.process_message(&next, &bus).await.unwrap();
    assert_eq!(
        no_change.header.function(),
        Some(FunctionCode::DigitalNoChangeReply)
    );
    assert_eq!(no_change.header.low_nibble, 2);
    assert!(no_change.data_blocks().is_empty());
}

#[tokio::test]
async fn repeated_cos_sequence_replays_cached_response() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    outstation.handle_bus_event(BusEvent::Binary {
        index: 0,
        value: 1,
        timestamp: md3_now(),
    });

    let scan = build_digital_cos_request(TEST_STATION, BINARY_MODULE, 1, 5, false);
    let first = outstation.process_message(&scan, &bus).await.unwrap();
    // Flags are already cleared, yet the same sequence must return the
    // exact same message for a lost-response retry.
    let replay = outstation.process_message(&scan, &bus).await.unwrap();
    assert_eq!(first, replay);
}

#[tokio::test]
async fn forced_cos_scan_includes_unchanged_modules() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();

    let scan = build_digital_cos_request(TEST_STATION, BINARY_MODULE, 1, 3, true);
    let response = outstation.process_message(&scan, &bus).await.unwrap();
    assert_eq!(response.header.function(), Some(FunctionCode::DigitalCosScan));
    assert_eq!(response.data_blocks(), &[(0b0001, 0)]);
}

#[tokio::test]
async fn cos_scan_over_unknown_range_is_rejected() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();

    let scan = build_digital_cos_request(TEST_STATION, BINARY_MODULE + 8, 1, 1, false);
    let response = outstation.process_message(&scan, &bus).await.unwrap();
    assert_eq!(
        response.header.function(),
        Some(FunctionCode::ControlOrScanRequestRejected)
    );
}

#[tokio::test]
async fn hrer_scan_delivers_time_tagged_events() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    let t1 = md3_now();
    let t2 = t1 + 500;
    outstation.handle_bus_event(BusEvent::Binary { index: 0, value: 1, timestamp: t1 });
    outstation.handle_bus_event(BusEvent::Binary { index: 1, value: 1, timestamp: t2 });

    let request = build_hrer_request(TEST_STATION, 10, 1);
    let response = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(response.header.function(), Some(FunctionCode::HrerListScan));
    assert_eq!(response.header.module, 2);
    assert_eq!(response.header.low_nibble, 1);
    assert!(!response.header.status_flags().hrp);

    let base_seconds = (t1 / 1000) as u32;
    let off1 = (t1 - u64::from(base_seconds) * 1000) as u16;
    let off2 = off1 + 500;
    assert_eq!(
        response.data_blocks(),
        &[
            ((base_seconds >> 16) as u16, (base_seconds & 0xffff) as u16),
            ((u16::from(BINARY_MODULE) << 8) | 0x001, off1),
            ((u16::from(BINARY_MODULE) << 8) | 0x011, off2),
        ]
    );

    // Events were consumed; the next sequence has nothing to report.
    let next = build_hrer_request(TEST_STATION, 10, 2);
    let empty = outstation.process_message(&next, &bus).await.unwrap();
    assert_eq!(empty.header.function(), Some(FunctionCode::HrerListScan));
    assert_eq!(empty.header.module, 0);
    assert!(empty.data_blocks().is_empty());
}

#[tokio::test]
async fn repeated_hrer_sequence_replays_without_consuming_again() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    outstation.handle_bus_event(BusEvent::Binary {
        index: 3,
        value: 1,
        timestamp: md3_now(),
    });

    let request = build_hrer_request(TEST_STATION, 10, 7);
    let first = outstation.process_message(&request, &bus).await.unwrap();
    let replay = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(first, replay);
}

#[tokio::test]
async fn hrer_truncates_to_master_limit_and_flags_more_pending() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    let base = md3_now();
    for i in 0..3usize {
        outstation.handle_bus_event(BusEvent::Binary {
            index: i,
            value: 1,
            timestamp: base + i as u64,
        });
    }

    let request = build_hrer_request(TEST_STATION, 2, 1);
    let response = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(response.header.module, 2);
    assert!(response.header.status_flags().hrp);

    let rest = build_hrer_request(TEST_STATION, 2, 2);
    let response = outstation.process_message(&rest, &bus).await.unwrap();
    assert_eq!(response.header.module, 1);
    assert!(!response.header.status_flags().hrp);
}

#[tokio::test]
async fn hrer_truncates_on_base_time_offset_overflow() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    let t1 = md3_now();
    outstation.handle_bus_event(BusEvent::Binary { index: 0, value: 1, timestamp: t1 });
    outstation.handle_bus_event(BusEvent::Binary {
        index: 1,
        value: 1,
        timestamp: t1 + 120_000,
    });

    // 120 seconds exceeds the 16-bit millisecond offset from the base
    // time, but also exceeds nothing else: only one event fits this reply.
    let request = build_hrer_request(TEST_STATION, 10, 1);
    let response = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(response.header.module, 1);
    assert!(response.header.status_flags().hrp);
}

#[tokio::test]
async fn hrer_reports_backdated_events_under_their_own_base_time() {
    init_tracing();
    let mut outstation = test_outstation(&module_points(PointKind::Binary, BINARY_MODULE, 4, 0));
    let bus = RecordingBus::new();
    // Ten minutes is well inside the timestamp trust window, so the second
    // tag is stored verbatim even though it precedes the first.
    let t1 = md3_now();
    let t2 = t1 - 600_000;
    outstation.handle_bus_event(BusEvent::Binary { index: 0, value: 1, timestamp: t1 });
    outstation.handle_bus_event(BusEvent::Binary { index: 1, value: 1, timestamp: t2 });

    let request = build_hrer_request(TEST_STATION, 10, 1);
    let response = outstation.process_message(&request, &bus).await.unwrap();
    assert_eq!(response.header.module, 1);
    assert!(response.header.status_flags().hrp);

    // The earlier event starts the next batch with its own base time, so
    // its tag is reproduced exactly instead of being clamped forward.
    let next = build_hrer_request(TEST_STATION, 10, 2);
    let response = outstation.process_message(&next, &bus).await.unwrap();
    assert_eq!(response.header.module, 1);
    let base_seconds = (t2 / 1000) as u32;
    let off = (t2 - u64::from(base_seconds) * 1000) as u16;
    assert_eq!(
        response.data_blocks(),
        &[
            ((base_seconds >> 16) as u16, (base_seconds & 0xffff) as u16),
            ((u16::from(BINARY_MODULE) << 8) | 0x011, off),
        ]
    );
}

#[tokio::test]
async fn implausible_time_tags_are_replaced_with_local_time() {
    init_tracing();
    let points = module_points(PointKind::Binary, BINARY_MODULE, 2, 0);
    let mut outstation = build_outstation(&test_outstation_config(), &points).unwrap();
    let before = md3_now();
    outstation.handle_bus_event(BusEvent::Binary { index: 0, value: 1, timestamp: 5000 });
    let dump = outstation.dump_time_tagged_points();
    assert!(dump[0].time_tag >= before);

    // With the override disabled the upstream tag is kept as-is.
    let mut config = test_outstation_config();
    config.override_old_timestamps = false;
    let mut outstation = build_outstation(&config, &points).unwrap();
    outstation.handle_bus_event(BusEvent::Binary { index: 0, value: 1, timestamp: 5000 });
    let dump = outstation.dump_time_tagged_points();
    assert_eq!(dump[0].time_tag, 5000);
}
