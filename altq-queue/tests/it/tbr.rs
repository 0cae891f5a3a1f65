use std::{sync::Arc, time::Duration};

use altq_common::ManualClock;
use altq_queue::{Dequeue, InterfaceOptions, Registry, RegistryOptions, TbrProfile};
use altq_wire::Packet;

fn setup(clock: &Arc<ManualClock>) -> Registry {
    let reg = Registry::new(RegistryOptions::default().clock(clock.clone()));
    reg.create_interface("eth0", InterfaceOptions::default()).unwrap();
    reg.tbr_set("eth0", TbrProfile::bytes_per_sec(1000, 500)).unwrap();
    reg
}

#[test]
fn bucket_admits_after_refill() {
    let _ = tracing_subscriber::fmt::try_init();

    let clock = Arc::new(ManualClock::default());
    let reg = setup(&clock);
    let iface = reg.interface("eth0").unwrap();

    for _ in 0..2 {
        assert!(iface.enqueue(Packet::opaque(400)).is_queued());
    }

    let first = iface.dequeue().into_packet().expect("first packet conforms");
    assert_eq!(first.len(), 400);
    iface.with_queue(|q| assert_eq!(q.tbr().unwrap().token().to_int(), 100));

    match iface.dequeue() {
        Dequeue::Throttled { retry_after } => assert_eq!(retry_after, Duration::from_millis(300)),
        other => panic!("expected throttling, got {other:?}"),
    }

    clock.advance(Duration::from_millis(299));
    assert!(iface.dequeue().is_throttled());

    clock.advance(Duration::from_millis(1));
    assert_eq!(iface.dequeue().into_packet().map(|p| p.len()), Some(400));
    assert!(iface.is_empty());
}

#[test]
fn idle_bucket_refills_to_depth() {
    let clock = Arc::new(ManualClock::default());
    let reg = setup(&clock);
    let iface = reg.interface("eth0").unwrap();

    // Drain the bucket, then stay idle for longer than the fill time.
    assert!(iface.enqueue(Packet::opaque(500)).is_queued());
    assert!(iface.dequeue().into_packet().is_some());
    clock.advance(Duration::from_secs(5));

    for _ in 0..3 {
        assert!(iface.enqueue(Packet::opaque(150)).is_queued());
    }
    for _ in 0..3 {
        assert!(iface.dequeue().into_packet().is_some());
        iface.with_queue(|q| {
            let tbr = q.tbr().unwrap();
            assert!(tbr.token() <= tbr.depth());
        });
    }
    assert!(matches!(iface.dequeue(), Dequeue::Empty));
}

#[test]
fn poll_matches_remove() {
    let clock = Arc::new(ManualClock::default());
    let reg = setup(&clock);
    let iface = reg.interface("eth0").unwrap();

    assert!(iface.enqueue(Packet::opaque(100)).is_queued());
    assert!(iface.enqueue(Packet::opaque(200)).is_queued());

    let polled = iface.poll().into_packet().unwrap();
    let removed = iface.dequeue().into_packet().unwrap();
    assert_eq!(polled.len(), removed.len());
    assert_eq!(iface.len(), 1);
}
