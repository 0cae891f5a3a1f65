use std::{net::Ipv4Addr, sync::Arc, time::Duration};

use altq::{
    FlowFilter, InterfaceOptions, JobsClassOptions, JobsControl, JobsOptions, Loss, ManualClock,
    PacketBuilder, Registry, RegistryOptions,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const LINK_BPS: u64 = 10_000_000;
const TICK: Duration = Duration::from_micros(100);

/// Drives a JoBS interface on a simulated clock: three classes with proportional delay and
/// loss differentiation and one premium class with absolute guarantees.
fn main() {
    let _ = tracing_subscriber::fmt::try_init();

    let clock = Arc::new(ManualClock::default());
    let registry = Registry::new(RegistryOptions::default().clock(clock.clone()));
    let iface = registry.create_interface("eth0", InterfaceOptions::default()).unwrap();

    let ctl = JobsControl::new(registry.clone());
    ctl.if_attach("eth0", JobsOptions::new(LINK_BPS).limit(300)).unwrap();

    // Best effort: twice the delay and loss of silver.
    ctl.add_class("eth0", JobsClassOptions::new(0).default_class(true).rdc(2).rlc(2)).unwrap();
    let silver = ctl.add_class("eth0", JobsClassOptions::new(1).rdc(2).rlc(2)).unwrap();
    // Gold: 5 ms delay bound, 1% loss bound and 1 Mbps guaranteed.
    let gold = ctl
        .add_class(
            "eth0",
            JobsClassOptions::new(2)
                .adc(Duration::from_millis(5))
                .alc(Loss::from_ratio(1, 100))
                .arc(1_000_000),
        )
        .unwrap();

    ctl.add_filter("eth0", gold, FlowFilter::v4().proto(17).dport(5004)).unwrap();
    ctl.add_filter("eth0", silver, FlowFilter::v4().proto(6).dport(443)).unwrap();
    ctl.enable("eth0").unwrap();

    let src = Ipv4Addr::new(192, 168, 1, 10);
    let dst = Ipv4Addr::new(10, 0, 0, 1);
    let mut rng = StdRng::seed_from_u64(7);
    // Bytes the link may still send in the current tick.
    let mut budget = 0u64;
    let per_tick = LINK_BPS / 8 * TICK.as_nanos() as u64 / 1_000_000_000;

    for _ in 0..20_000 {
        // Offer roughly 130% of the link rate.
        for _ in 0..rng.gen_range(0..3) {
            let pkt = match rng.gen_range(0..10) {
                0 => PacketBuilder::v4(src, dst).udp(6000, 5004).payload_len(160).build(),
                1..=4 => PacketBuilder::v4(src, dst).tcp(40_000, 443).payload_len(1000).build(),
                _ => PacketBuilder::v4(src, dst).tcp(40_001, 80).payload_len(1000).build(),
            };
            let _ = iface.enqueue(pkt);
        }

        budget += per_tick;
        while let Some(len) = iface.poll().into_packet().map(|p| p.len() as u64) {
            if len > budget {
                break;
            }
            budget -= len;
            let _ = iface.dequeue();
        }
        if iface.is_empty() {
            budget = 0;
        }
        clock.advance(TICK);
    }

    let stats = ctl.stats("eth0").unwrap();
    println!("backlog: {} packets", stats.qlength);
    println!("cycles: {:?}", stats.cycles);
    for class in &stats.classes {
        println!(
            "pri {}: rate {} bps, loss {:.4}, avg delay {:?}, dropped {}, adc violations {}",
            class.pri,
            class.service_rate,
            class.current_loss.to_f64(),
            class.avgdel,
            class.dropped.packets(),
            class.adc_violations,
        );
    }
}
