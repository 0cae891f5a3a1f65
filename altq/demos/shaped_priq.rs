use std::{
    net::Ipv4Addr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use altq::{
    Dequeue, FlowFilter, InterfaceOptions, PacketBuilder, PriqClassOptions, PriqControl,
    PriqOptions, Registry, TbrProfile,
};

const LINK_BPS: u64 = 10_000_000;
const SHAPED_BPS: u64 = 2_000_000;

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let sent = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&sent);

    // The "driver" of the interface: drains the queue until it is empty or the
    // token bucket holds the head packet back.
    let start = move |iface: &altq::Interface| loop {
        match iface.dequeue() {
            Dequeue::Packet(pkt) => {
                counter.fetch_add(pkt.len() as u64, Ordering::Relaxed);
            }
            Dequeue::Empty | Dequeue::Throttled { .. } => break,
        }
    };

    let registry = Registry::default();
    let iface =
        registry.create_interface("eth0", InterfaceOptions::default().start(start)).unwrap();

    let ctl = PriqControl::new(registry.clone());
    ctl.if_attach("eth0", PriqOptions::default().bandwidth(LINK_BPS)).unwrap();

    let bulk =
        ctl.add_class("eth0", PriqClassOptions::new(0).limit(200).default_class(true)).unwrap();
    let dns = ctl.add_class("eth0", PriqClassOptions::new(7).clear_dscp(true)).unwrap();
    ctl.add_filter("eth0", dns, FlowFilter::v4().proto(17).dport(53)).unwrap();
    ctl.enable("eth0").unwrap();

    // Shape the interface to 2 Mbps with a 3000 byte burst.
    registry.tbr_set("eth0", TbrProfile::new(SHAPED_BPS, 3000)).unwrap();

    let src = Ipv4Addr::new(192, 168, 1, 10);
    let dst = Ipv4Addr::new(10, 0, 0, 1);
    for i in 0..100u16 {
        let bulk_pkt = PacketBuilder::v4(src, dst).tcp(40_000, 443).payload_len(1200).build();
        let _ = iface.enqueue(bulk_pkt);
        if i % 10 == 0 {
            let dns_pkt =
                PacketBuilder::v4(src, dst).udp(50_000 + i, 53).tos(0xb8).payload_len(64).build();
            let _ = iface.enqueue(dns_pkt);
        }
    }
    iface.start();

    for _ in 0..5 {
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = ctl.stats("eth0").unwrap();
        let sent = sent.load(Ordering::Relaxed);
        tracing::info!(
            sent_bytes = sent,
            backlog = stats.qlength,
            dns_xmit = stats.class(7).map(|c| c.xmit.packets()),
            bulk_xmit = stats.class(0).map(|c| c.xmit.packets()),
            "shaping"
        );
    }

    let stats = ctl.stats("eth0").unwrap();
    println!("bulk ({bulk:?}): {:?}", stats.class(0));
    println!("dns ({dns:?}): {:?}", stats.class(7));

    ctl.if_detach("eth0").unwrap();
}
