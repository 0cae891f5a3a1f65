use std::net::Ipv4Addr;

use altq_classifier::{Classifier, FlowFilter};
use altq_wire::PacketBuilder;
use rand::{seq::SliceRandom, Rng, SeedableRng};

/// Whatever order filters are added in, the highest-ranked structural match in the bucket
/// wins.
#[test]
fn highest_rule_number_wins_in_any_insertion_order() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let dst = Ipv4Addr::new(10, 0, 0, 5);
    let pkt = PacketBuilder::v4([10, 0, 0, 1].into(), dst).tcp(4000, 80).build();

    for _ in 0..50 {
        let mut rules: Vec<u32> = (0..12).map(|_| rng.gen_range(0..1000)).collect();
        rules.shuffle(&mut rng);

        let mut cl = Classifier::new();
        let mut best = None;
        for (i, ruleno) in rules.iter().copied().enumerate() {
            // Half of the filters structurally match, the rest target another port.
            let matching = i % 2 == 0;
            let port = if matching { 80 } else { 81 };
            cl.add_filter(FlowFilter::v4().dst(dst).dport(port).rule(ruleno), i).unwrap();

            if matching && best.map_or(true, |(r, _)| ruleno >= r) {
                best = Some((ruleno, i));
            }
        }

        assert_eq!(cl.classify(&pkt), best.map(|(_, i)| i));
    }
}
