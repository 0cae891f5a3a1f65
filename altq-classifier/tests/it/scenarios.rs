use std::net::{Ipv4Addr, Ipv6Addr};

use altq_classifier::{Classifier, FlowFilter};
use altq_wire::PacketBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    X,
    Y,
    Z,
}

#[test]
fn prefix_filter_beats_lower_ranked_wildcard() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut cl = Classifier::new();
    cl.add_filter(FlowFilter::v4().dst_prefix(Ipv4Addr::new(10, 0, 0, 0), 24).rule(10), Class::X)
        .unwrap();
    cl.add_filter(FlowFilter::v4().rule(1), Class::Y).unwrap();

    let to = |dst: [u8; 4]| PacketBuilder::v4([172, 16, 0, 1].into(), dst.into()).udp(9, 9).build();
    assert_eq!(cl.classify(&to([10, 0, 0, 5])), Some(Class::X));
    assert_eq!(cl.classify(&to([20, 0, 0, 5])), Some(Class::Y));
}

#[test]
fn five_tuple_filters() {
    let mut cl = Classifier::new();
    let web = FlowFilter::v4().dst(Ipv4Addr::new(10, 1, 1, 1)).proto(6).dport(443).rule(5);
    let dns = FlowFilter::v4().src_prefix(Ipv4Addr::new(192, 168, 0, 0), 16).proto(17).dport(53);
    cl.add_filter(web, Class::X).unwrap();
    cl.add_filter(dns, Class::Y).unwrap();

    let https = PacketBuilder::v4([8, 8, 8, 8].into(), [10, 1, 1, 1].into()).tcp(50000, 443).build();
    let http = PacketBuilder::v4([8, 8, 8, 8].into(), [10, 1, 1, 1].into()).tcp(50000, 80).build();
    let query = PacketBuilder::v4([192, 168, 3, 4].into(), [1, 1, 1, 1].into()).udp(3333, 53).build();
    let outside =
        PacketBuilder::v4([192, 169, 3, 4].into(), [1, 1, 1, 1].into()).udp(3333, 53).build();

    assert_eq!(cl.classify(&https), Some(Class::X));
    assert_eq!(cl.classify(&http), None);
    assert_eq!(cl.classify(&query), Some(Class::Y));
    assert_eq!(cl.classify(&outside), None);
}

#[test]
fn v6_flow_label_and_wildcard() {
    let mut cl = Classifier::new();
    cl.add_filter(FlowFilter::v6().flow_label(0x12345), Class::X).unwrap();
    cl.add_filter(FlowFilter::v6().dst_prefix("2001:db8::".parse::<Ipv6Addr>().unwrap(), 32), Class::Y)
        .unwrap();

    let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
    let labelled = PacketBuilder::v6(src, "2001:db9::2".parse().unwrap()).flow_label(0x12345).build();
    let inside = PacketBuilder::v6(src, "2001:db8::2".parse().unwrap()).build();
    let outside = PacketBuilder::v6(src, "2001:db9::2".parse().unwrap()).build();

    assert_eq!(cl.classify(&labelled), Some(Class::X));
    assert_eq!(cl.classify(&inside), Some(Class::Y));
    assert_eq!(cl.classify(&outside), None);

    // IPv4 traffic never matches IPv6 filters.
    let v4 = PacketBuilder::v4([1, 1, 1, 1].into(), [2, 2, 2, 2].into()).build();
    assert_eq!(cl.classify(&v4), None);
}

#[test]
fn discarding_a_class_keeps_siblings() {
    let mut cl = Classifier::new();
    cl.add_filter(FlowFilter::v4().dport(1), Class::X).unwrap();
    cl.add_filter(FlowFilter::v4().dport(2), Class::X).unwrap();
    let keep = cl.add_filter(FlowFilter::v4().dport(3), Class::Y).unwrap();
    cl.add_filter(FlowFilter::v4().dport(4), Class::Z).unwrap();

    assert_eq!(cl.discard_class(Class::X), 2);
    assert_eq!(cl.len(), 2);
    assert_eq!(cl.filter_class(keep), Some(Class::Y));
    assert!(cl.filters_of(Class::X).is_empty());

    let to_port =
        |p: u16| PacketBuilder::v4([1, 1, 1, 1].into(), [2, 2, 2, 2].into()).udp(7, p).build();
    assert_eq!(cl.classify(&to_port(1)), None);
    assert_eq!(cl.classify(&to_port(3)), Some(Class::Y));
    assert_eq!(cl.classify(&to_port(4)), Some(Class::Z));

    cl.clear();
    assert!(cl.is_empty());
    assert_eq!(cl.classify(&to_port(3)), None);
}
