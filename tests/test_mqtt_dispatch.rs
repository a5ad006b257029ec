use std::time::Duration;

use lumentree_bridge::modbus::{Decoded, Reading};
use lumentree_bridge::mqtt::{Batcher, ReadingBatch, ReadingEvent};

fn main_frame() -> Decoded {
    Decoded::Main(Reading {
        battery_voltage: Some(52.3),
        ..Default::default()
    })
}

fn batch_with_reading() -> ReadingEvent {
    let Decoded::Main(reading) = main_frame() else {
        unreachable!()
    };
    ReadingEvent::Batch(ReadingBatch {
        reading: Some(reading),
        cells: None,
    })
}

#[test]
fn flush_announces_online_then_batch() {
    let mut batcher = Batcher::new(Duration::from_secs(60));

    batcher.frame(main_frame());
    assert_eq!(
        batcher.flush(),
        vec![ReadingEvent::Online(true), batch_with_reading()]
    );

    // Nothing pending and the quiet period has not elapsed.
    assert_eq!(batcher.flush(), vec![]);
}

#[test]
fn watchdog_marks_offline_after_quiet_period() {
    let mut batcher = Batcher::new(Duration::ZERO);

    batcher.frame(main_frame());
    assert_eq!(
        batcher.flush(),
        vec![ReadingEvent::Online(true), batch_with_reading()]
    );

    assert_eq!(batcher.flush(), vec![ReadingEvent::Online(false)]);
    assert_eq!(batcher.flush(), vec![]);
}

#[test]
fn disconnect_flushes_batch_and_marks_offline() {
    let mut batcher = Batcher::new(Duration::from_secs(60));

    batcher.frame(main_frame());
    batcher.flush();

    // A frame arrives and the link drops before the next flush tick: the
    // pending batch still goes out, followed by the offline notice.
    batcher.frame(main_frame());
    assert_eq!(
        batcher.disconnected(),
        vec![batch_with_reading(), ReadingEvent::Online(false)]
    );

    // Repeated drops while already offline stay silent.
    assert_eq!(batcher.disconnected(), vec![]);
}

#[test]
fn disconnect_while_offline_is_silent() {
    let mut batcher = Batcher::new(Duration::from_secs(60));
    assert_eq!(batcher.disconnected(), vec![]);
}

#[test]
fn reconnecting_device_comes_back_online() {
    let mut batcher = Batcher::new(Duration::from_secs(60));

    batcher.frame(main_frame());
    batcher.flush();
    batcher.disconnected();

    batcher.frame(main_frame());
    assert_eq!(
        batcher.flush(),
        vec![ReadingEvent::Online(true), batch_with_reading()]
    );
}
