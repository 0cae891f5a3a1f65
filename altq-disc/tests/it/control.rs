use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use altq_classifier::FlowFilter;
use altq_common::ManualClock;
use altq_disc::{
    Error, JobsClassOptions, JobsControl, JobsOptions, PriqClassOptions, PriqControl, PriqOptions,
};
use altq_queue::{Dequeue, InterfaceOptions, Registry, RegistryOptions};
use altq_wire::{Packet, PacketBuilder};

fn udp_to(dst: [u8; 4]) -> Packet {
    PacketBuilder::v4(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::from(dst)).udp(5000, 53).build()
}

fn setup() -> (Registry, PriqControl) {
    let reg = Registry::default();
    reg.create_interface("eth0", InterfaceOptions::default()).unwrap();
    let ctl = PriqControl::new(reg.clone());
    ctl.if_attach("eth0", PriqOptions::default()).unwrap();
    (reg, ctl)
}

#[test]
fn filters_steer_packets_into_classes() {
    let _ = tracing_subscriber::fmt::try_init();
    let (reg, ctl) = setup();

    let x = ctl.add_class("eth0", PriqClassOptions::new(2)).unwrap();
    let y = ctl.add_class("eth0", PriqClassOptions::new(1)).unwrap();
    ctl.add_class("eth0", PriqClassOptions::new(0).default_class(true)).unwrap();

    let subnet = FlowFilter::v4().dst_prefix(Ipv4Addr::new(10, 0, 0, 0), 24).rule(10);
    ctl.add_filter("eth0", x, subnet).unwrap();
    ctl.add_filter("eth0", y, FlowFilter::v4().rule(1)).unwrap();
    ctl.enable("eth0").unwrap();

    let iface = reg.interface("eth0").unwrap();
    assert!(iface.enqueue(udp_to([10, 0, 0, 5])).is_queued());
    assert!(iface.enqueue(udp_to([20, 0, 0, 5])).is_queued());
    assert!(iface.enqueue(Packet::opaque(64)).is_queued());

    let stats = ctl.stats("eth0").unwrap();
    assert_eq!(stats.class(2).unwrap().qlength, 1);
    assert_eq!(stats.class(1).unwrap().qlength, 1);
    assert_eq!(stats.class(0).unwrap().qlength, 1);

    let order: Vec<_> =
        std::iter::from_fn(|| iface.dequeue().into_packet()).map(|p| p.class()).collect();
    assert_eq!(order, vec![Some(x), Some(y), None]);
}

#[test]
fn deleting_a_class_drops_its_filters_only() {
    let _ = tracing_subscriber::fmt::try_init();
    let (reg, ctl) = setup();

    let x = ctl.add_class("eth0", PriqClassOptions::new(2)).unwrap();
    let y = ctl.add_class("eth0", PriqClassOptions::new(1)).unwrap();
    ctl.add_class("eth0", PriqClassOptions::new(0).default_class(true)).unwrap();
    let fx = ctl
        .add_filter("eth0", x, FlowFilter::v4().dst(Ipv4Addr::new(10, 0, 0, 5)))
        .unwrap();
    ctl.add_filter("eth0", y, FlowFilter::v4().dst(Ipv4Addr::new(10, 0, 0, 6))).unwrap();
    ctl.enable("eth0").unwrap();

    let iface = reg.interface("eth0").unwrap();
    assert!(iface.enqueue(udp_to([10, 0, 0, 6])).is_queued());
    assert!(iface.enqueue(udp_to([10, 0, 0, 5])).is_queued());

    ctl.delete_class("eth0", x).unwrap();
    assert!(matches!(ctl.delete_filter("eth0", fx), Err(Error::Classifier(_))));
    assert!(matches!(ctl.delete_class("eth0", x), Err(Error::ClassNotFound)));

    // `y` keeps its queue and filter; traffic for `x` falls back to the default class.
    assert!(iface.enqueue(udp_to([10, 0, 0, 5])).is_queued());
    assert!(iface.enqueue(udp_to([10, 0, 0, 6])).is_queued());
    let stats = ctl.stats("eth0").unwrap();
    assert_eq!(stats.class(1).unwrap().qlength, 2);
    assert_eq!(stats.class(0).unwrap().qlength, 1);
    assert!(stats.class(2).is_none());

    // The priority is free again and the new class starts from scratch.
    let x2 = ctl.add_class("eth0", PriqClassOptions::new(2)).unwrap();
    assert_ne!(x, x2);
    let stats = ctl.stats("eth0").unwrap();
    let s = stats.class(2).unwrap();
    assert_eq!((s.qlength, s.arrivals.packets(), s.dropped.packets()), (0, 0, 0));
}

#[test]
fn enable_requires_default_class() {
    let _ = tracing_subscriber::fmt::try_init();
    let (_reg, ctl) = setup();

    ctl.add_class("eth0", PriqClassOptions::new(4)).unwrap();
    assert!(matches!(
        ctl.enable("eth0"),
        Err(Error::Queue(altq_queue::Error::Discipline(_)))
    ));

    ctl.add_class("eth0", PriqClassOptions::new(0).default_class(true)).unwrap();
    assert!(matches!(
        ctl.add_class("eth0", PriqClassOptions::new(1).default_class(true)),
        Err(Error::DefaultClassExists)
    ));
    ctl.enable("eth0").unwrap();
}

#[test]
fn attach_detach_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();
    let (reg, ctl) = setup();
    let jobs = JobsControl::new(reg.clone());

    assert!(matches!(
        ctl.if_attach("eth0", PriqOptions::default()),
        Err(Error::Queue(altq_queue::Error::AlreadyAttached))
    ));
    assert!(matches!(
        jobs.add_class("eth0", JobsClassOptions::new(0)),
        Err(Error::Queue(altq_queue::Error::WrongDiscipline { .. }))
    ));
    assert!(matches!(
        ctl.if_attach("nope", PriqOptions::default()),
        Err(Error::Queue(altq_queue::Error::InterfaceNotFound(_)))
    ));

    let c = ctl.add_class("eth0", PriqClassOptions::new(0).default_class(true)).unwrap();
    ctl.enable("eth0").unwrap();
    let iface = reg.interface("eth0").unwrap();
    assert!(iface.enqueue(Packet::opaque(10)).is_queued());

    // Detach disables first; the interface falls back to its FIFO.
    ctl.if_detach("eth0").unwrap();
    assert_eq!(iface.len(), 0);
    assert!(iface.enqueue(Packet::opaque(10).with_class(c)).is_queued());
    assert_eq!(iface.len(), 1);
    assert!(matches!(ctl.stats("eth0"), Err(Error::Queue(altq_queue::Error::NotAttached))));

    jobs.if_attach("eth0", JobsOptions::new(1_000_000)).unwrap();
    assert!(matches!(
        jobs.if_attach("eth0", JobsOptions::new(0)),
        Err(Error::InvalidBandwidth(0))
    ));
}

#[test]
fn clear_removes_everything() {
    let _ = tracing_subscriber::fmt::try_init();
    let (reg, ctl) = setup();
    let c = ctl.add_class("eth0", PriqClassOptions::new(3).default_class(true)).unwrap();
    let f = ctl.add_filter("eth0", c, FlowFilter::v4().proto(17)).unwrap();
    ctl.enable("eth0").unwrap();
    assert!(reg.interface("eth0").unwrap().enqueue(udp_to([1, 2, 3, 4])).is_queued());

    ctl.disable("eth0").unwrap();
    ctl.clear("eth0").unwrap();
    let stats = ctl.stats("eth0").unwrap();
    assert!(stats.classes.is_empty());
    assert!(ctl.delete_filter("eth0", f).is_err());
    assert!(ctl.enable("eth0").is_err());
}

#[test]
fn jobs_through_the_interface() {
    let _ = tracing_subscriber::fmt::try_init();

    let clock = Arc::new(ManualClock::default());
    let reg = Registry::new(RegistryOptions::default().clock(clock.clone()));
    let iface = reg.create_interface("wan0", InterfaceOptions::default()).unwrap();
    let ctl = JobsControl::new(reg.clone());
    ctl.if_attach("wan0", JobsOptions::new(8_000_000).limit(50)).unwrap();

    let voice = ctl
        .add_class("wan0", JobsClassOptions::new(2).adc(Duration::from_millis(10)))
        .unwrap();
    ctl.add_class("wan0", JobsClassOptions::new(0).default_class(true)).unwrap();
    ctl.add_filter("wan0", voice, FlowFilter::v4().proto(17).dport(53)).unwrap();
    ctl.enable("wan0").unwrap();

    for _ in 0..5 {
        assert!(iface.enqueue(udp_to([8, 8, 8, 8])).is_queued());
        assert!(iface.enqueue(Packet::opaque(1000)).is_queued());
    }
    clock.advance(Duration::from_millis(1));

    let mut voice_served = 0;
    while let Dequeue::Packet(pkt) = iface.dequeue() {
        if pkt.class() == Some(voice) {
            voice_served += 1;
        }
        clock.advance(Duration::from_millis(1));
    }
    assert_eq!(voice_served, 5);

    let stats = ctl.stats("wan0").unwrap();
    assert_eq!(stats.total_dequeued, 10);
    assert_eq!(stats.class(2).unwrap().adc_violations, 0);
    assert!(stats.classes.iter().all(|c| c.service_rate == 0));
}
