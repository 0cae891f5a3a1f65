use altq_disc::{Classful, Priq, PriqClassOptions, PriqControl, PriqOptions};
use altq_queue::{Dequeue, DequeueOp, Discipline, InterfaceOptions, Registry};
use altq_wire::{ClassHandle, Packet};
use rand::{rngs::StdRng, Rng, SeedableRng};

#[test]
fn higher_priority_drains_first() {
    let _ = tracing_subscriber::fmt::try_init();

    let reg = Registry::default();
    let iface = reg.create_interface("eth0", InterfaceOptions::default()).unwrap();
    let ctl = PriqControl::new(reg.clone());
    ctl.if_attach("eth0", PriqOptions::default().bandwidth(10_000_000)).unwrap();

    ctl.add_class("eth0", PriqClassOptions::new(0).limit(10).default_class(true)).unwrap();
    let c1 = ctl.add_class("eth0", PriqClassOptions::new(1).limit(10)).unwrap();
    let c2 = ctl.add_class("eth0", PriqClassOptions::new(2).limit(10)).unwrap();
    ctl.enable("eth0").unwrap();

    for _ in 0..5 {
        assert!(iface.enqueue(Packet::opaque(100).with_class(c1)).is_queued());
        assert!(iface.enqueue(Packet::opaque(100).with_class(c2)).is_queued());
    }
    assert_eq!(iface.len(), 10);

    let mut served = Vec::new();
    while let Dequeue::Packet(pkt) = iface.dequeue() {
        served.push(pkt.class().unwrap());
    }
    assert_eq!(served.len(), 10);
    assert!(served[..5].iter().all(|c| *c == c2));
    assert!(served[5..].iter().all(|c| *c == c1));

    let stats = ctl.stats("eth0").unwrap();
    assert_eq!(stats.class(2).unwrap().xmit.packets(), 5);
    assert_eq!(stats.class(1).unwrap().period, 1);
    assert_eq!(stats.qlength, 0);
}

#[test]
fn strict_priority_under_random_load() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut rng = StdRng::seed_from_u64(11);
    let mut q = Priq::new(PriqOptions::default());
    let pris = [0u8, 3, 7, 15];
    let classes: Vec<ClassHandle> = pris
        .iter()
        .map(|&pri| {
            q.add_class(PriqClassOptions::new(pri).limit(8).default_class(pri == 0)).unwrap()
        })
        .collect();
    // Mirror of the per-class queue lengths, indexed like `pris`.
    let mut model = [0usize; 4];

    for _ in 0..5_000 {
        if rng.gen_bool(0.55) {
            let i = rng.gen_range(0..classes.len());
            let pkt = Packet::opaque(rng.gen_range(40..1500)).with_class(classes[i]);
            if q.enqueue(pkt, 0).is_queued() {
                model[i] += 1;
            } else {
                assert_eq!(model[i], 8);
            }
        } else {
            let expected = (0..pris.len()).rev().find(|&i| model[i] > 0);
            let polled = q.dequeue(DequeueOp::Poll, 0).map(|p| p.class());
            let got = q.dequeue(DequeueOp::Remove, 0).map(|p| p.class());
            assert_eq!(polled, got);
            match expected {
                Some(i) => {
                    assert_eq!(got, Some(Some(classes[i])));
                    model[i] -= 1;
                }
                None => assert!(got.is_none()),
            }
        }
        assert_eq!(q.len(), model.iter().sum::<usize>());
    }
}
