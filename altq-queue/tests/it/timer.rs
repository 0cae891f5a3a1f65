use std::{sync::Arc, time::Duration};

use altq_common::ManualClock;
use altq_queue::{Dequeue, InterfaceOptions, Registry, RegistryOptions, TbrProfile};
use altq_wire::Packet;
use parking_lot::Mutex;

#[tokio::test(start_paused = true)]
async fn timer_restarts_throttled_interface_then_disarms() {
    let _ = tracing_subscriber::fmt::try_init();

    let clock = Arc::new(ManualClock::default());
    let reg = Registry::new(
        RegistryOptions::default().clock(clock.clone()).tbr_tick(Duration::from_millis(10)),
    );

    let sent = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&sent);
    let iface = reg
        .create_interface(
            "eth0",
            InterfaceOptions::default().start(move |iface| {
                while let Dequeue::Packet(pkt) = iface.dequeue() {
                    log.lock().push(pkt.len());
                }
            }),
        )
        .unwrap();

    reg.tbr_set("eth0", TbrProfile::bytes_per_sec(1000, 500)).unwrap();
    assert!(reg.is_tbr_timer_armed());

    for _ in 0..2 {
        assert!(iface.enqueue(Packet::opaque(400)).is_queued());
    }
    iface.start();
    assert_eq!(*sent.lock(), vec![400]);

    // Tokens accrue; the next timer tick restarts the interface.
    clock.advance(Duration::from_millis(300));
    tokio::time::sleep(Duration::from_millis(15)).await;
    assert_eq!(*sent.lock(), vec![400, 400]);

    reg.tbr_set("eth0", TbrProfile::new(0, 0)).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!reg.is_tbr_timer_armed());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_registry_stops_the_timer() {
    let reg = Registry::new(RegistryOptions::default().tbr_tick(Duration::from_millis(1)));
    reg.create_interface("eth0", InterfaceOptions::default()).unwrap();
    reg.tbr_set("eth0", TbrProfile::new(1_000_000, 1500)).unwrap();
    assert!(reg.is_tbr_timer_armed());

    let weak_probe = reg.interface("eth0").unwrap();
    drop(reg);
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Only the probe keeps the interface alive now.
    assert_eq!(Arc::strong_count(&weak_probe), 1);
}
