use std::time::Duration;

use altq_common::Loss;
use altq_disc::{Classful, Jobs, JobsClassOptions, JobsOptions};
use altq_queue::{DequeueOp, Discipline, DropReason, Enqueue};
use altq_wire::{ClassHandle, Packet};
use rand::{rngs::StdRng, Rng, SeedableRng};

fn send(q: &mut Jobs, class: ClassHandle, len: usize, now: u64) -> Enqueue {
    q.enqueue(Packet::opaque(len).with_class(class), now)
}

#[test]
fn adc_burst_is_made_drainable() {
    let _ = tracing_subscriber::fmt::try_init();

    // One byte per microsecond.
    let mut q = Jobs::new(JobsOptions::new(8_000_000)).unwrap();
    let bulk = q.add_class(JobsClassOptions::new(1).default_class(true)).unwrap();
    let rt = q.add_class(JobsClassOptions::new(2).adc(Duration::from_millis(50))).unwrap();

    assert!(send(&mut q, bulk, 1000, 0).is_queued());
    // 100 KB would take 100ms at full link rate.
    for _ in 0..100 {
        let _ = send(&mut q, rt, 1000, 0);
    }

    let stats = q.stats();
    let s = stats.class(2).unwrap();
    assert!(s.dropped.packets() > 0);
    assert!(s.service_rate > stats.class(1).unwrap().service_rate);
    let drain = s.qbytes as f64 * 8.0 / s.service_rate as f64;
    assert!(drain <= 0.050 || s.qlength == 1, "drain time {drain}s, {s:?}");
    assert_eq!(s.qlength as u64 + s.dropped.packets(), 100);
}

#[test]
fn deadline_missed_demands_whole_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut q = Jobs::new(JobsOptions::new(8_000_000)).unwrap();
    let bulk = q.add_class(JobsClassOptions::new(1).default_class(true)).unwrap();
    let rt = q.add_class(JobsClassOptions::new(2).adc(Duration::from_millis(1))).unwrap();

    assert!(send(&mut q, bulk, 100, 0).is_queued());
    assert!(send(&mut q, rt, 100, 0).is_queued());
    assert!(send(&mut q, rt, 100, 0).is_queued());
    // Both packets of `rt` are late by now; all but one go.
    assert!(send(&mut q, rt, 100, 5_000_000).is_queued());

    let stats = q.stats();
    let s = stats.class(2).unwrap();
    assert_eq!(s.qlength, 1);
    assert_eq!(s.min_rate_adc, 7_999_999);
    assert!(s.service_rate > 7_999_000);
    assert!(stats.class(1).unwrap().service_rate > 0);
}

#[test]
fn shared_buffer_drop_tail() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut q = Jobs::new(JobsOptions::new(8_000_000)).unwrap();
    let c = q.add_class(JobsClassOptions::new(0).limit(1).default_class(true)).unwrap();

    assert!(send(&mut q, c, 500, 0).is_queued());
    assert_eq!(send(&mut q, c, 500, 0), Enqueue::Dropped(DropReason::QueueFull));

    let stats = q.stats();
    let s = stats.class(0).unwrap();
    assert_eq!(s.dropped.packets(), 1);
    assert_eq!(s.rin.packets(), 1);
    assert_eq!(s.arrival.packets(), 2);
    assert_eq!(s.current_loss, Loss::from_ratio(1, 2));
}

#[test]
fn alc_holds_while_others_can_absorb() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut q = Jobs::new(JobsOptions::new(8_000_000).limit(10)).unwrap();
    let bulk = q.add_class(JobsClassOptions::new(1).default_class(true)).unwrap();
    let gold = q.add_class(JobsClassOptions::new(2).alc(Loss::from_ratio(1, 20))).unwrap();

    for _ in 0..10 {
        assert!(send(&mut q, bulk, 100, 0).is_queued());
    }
    for _ in 0..10 {
        assert!(send(&mut q, gold, 100, 0).is_queued());
        assert_eq!(q.stats().class(2).unwrap().current_loss, Loss::ZERO);
    }

    let stats = q.stats();
    assert_eq!(stats.class(1).unwrap().qlength, 0);
    assert_eq!(stats.class(1).unwrap().dropped.packets(), 10);
    assert_eq!(stats.qlength, 10);
}

#[test]
fn victim_skips_rlc_class_held_by_its_alc() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut q = Jobs::new(JobsOptions::new(8_000_000).limit(6)).unwrap();
    let a = q
        .add_class(JobsClassOptions::new(0).rlc(1).alc(Loss::ZERO).default_class(true))
        .unwrap();
    let b = q
        .add_class(JobsClassOptions::new(1).rlc(1).alc(Loss::from_ratio(7, 10)).limit(2))
        .unwrap();
    let c = q.add_class(JobsClassOptions::new(2).rlc(1).limit(2)).unwrap();

    // The class limits leave `b` at a third and `c` at three fifths of lost bytes.
    for _ in 0..3 {
        let _ = send(&mut q, b, 100, 0);
    }
    for _ in 0..5 {
        let _ = send(&mut q, c, 100, 0);
    }
    for _ in 0..2 {
        assert!(send(&mut q, a, 100, 0).is_queued());
    }
    let stats = q.stats();
    assert_eq!(stats.qlength, 6);
    assert_eq!(stats.class(1).unwrap().current_loss, Loss::from_ratio(1, 3));
    assert_eq!(stats.class(2).unwrap().current_loss, Loss::from_ratio(3, 5));

    // `a` has the lowest loss but may not lose anything. Of the others `b` is furthest below
    // the mean and stays within its bound after the drop.
    assert!(send(&mut q, a, 100, 0).is_queued());

    let stats = q.stats();
    assert_eq!(stats.qlength, 6);
    assert_eq!(stats.class(0).unwrap().qlength, 3);
    assert_eq!(stats.class(0).unwrap().dropped.packets(), 0);
    assert_eq!(stats.class(1).unwrap().dropped.packets(), 2);
    assert_eq!(stats.class(1).unwrap().qlength, 1);
    assert_eq!(stats.class(2).unwrap().dropped.packets(), 3);
    assert_eq!(stats.class(2).unwrap().qlength, 2);
    assert!(stats.class(1).unwrap().current_loss <= Loss::from_ratio(7, 10));
}

#[test]
fn arrival_is_dropped_when_every_class_is_at_its_alc() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut q = Jobs::new(JobsOptions::new(8_000_000).limit(2)).unwrap();
    let a = q
        .add_class(JobsClassOptions::new(0).rlc(1).alc(Loss::ZERO).default_class(true))
        .unwrap();
    let b = q.add_class(JobsClassOptions::new(1).rlc(1).alc(Loss::ZERO)).unwrap();

    assert!(send(&mut q, a, 100, 0).is_queued());
    assert!(send(&mut q, b, 100, 0).is_queued());
    assert_eq!(send(&mut q, a, 100, 0), Enqueue::Dropped(DropReason::QueueFull));

    let stats = q.stats();
    assert_eq!(stats.qlength, 2);
    assert_eq!(stats.class(0).unwrap().qlength, 1);
    assert_eq!(stats.class(0).unwrap().dropped.packets(), 1);
    assert_eq!(stats.class(1).unwrap().qlength, 1);
    assert_eq!(stats.class(1).unwrap().dropped.packets(), 0);
}

#[test]
fn work_conservation_and_loss_bounds_under_random_load() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut rng = StdRng::seed_from_u64(3);
    let mut q = Jobs::new(JobsOptions::new(10_000_000).limit(24)).unwrap();
    let options = [
        JobsClassOptions::new(0).default_class(true),
        JobsClassOptions::new(1).rlc(2).rdc(4),
        JobsClassOptions::new(2).rlc(1).rdc(2).alc(Loss::from_ratio(1, 10)),
        JobsClassOptions::new(3).adc(Duration::from_millis(20)).arc(1_000_000),
        JobsClassOptions::new(4).rdc(1).limit(6),
    ];
    let classes: Vec<ClassHandle> =
        options.into_iter().map(|o| q.add_class(o).unwrap()).collect();

    let mut now = 0u64;
    for step in 0..20_000 {
        now += rng.gen_range(0..400_000);
        if rng.gen_bool(0.6) {
            let class = classes[rng.gen_range(0..classes.len())];
            let _ = send(&mut q, class, rng.gen_range(64..1500), now);
        } else {
            let op = if rng.gen_bool(0.2) { DequeueOp::Poll } else { DequeueOp::Remove };
            let _ = q.dequeue(op, now);
        }

        let stats = q.stats();
        let queued: usize = stats.classes.iter().map(|c| c.qlength).sum();
        assert_eq!(queued, q.len(), "step {step}");
        assert!(q.len() <= 24, "step {step}");
        for c in &stats.classes {
            assert_eq!(c.qlength > 0, c.service_rate > 0, "step {step}: {c:?}");
            assert!(c.current_loss >= Loss::ZERO && c.current_loss < Loss::ONE, "{c:?}");
        }
    }
}

#[test]
fn loss_resets_with_epoch() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut q = Jobs::new(JobsOptions::new(8_000_000)).unwrap();
    let c = q.add_class(JobsClassOptions::new(0).limit(1).default_class(true)).unwrap();
    assert!(send(&mut q, c, 100, 0).is_queued());
    assert!(!send(&mut q, c, 100, 0).is_queued());
    assert!(q.stats().class(0).unwrap().current_loss > Loss::ZERO);

    assert!(q.dequeue(DequeueOp::Remove, 1_000).is_some());
    assert!(send(&mut q, c, 100, 2_000).is_queued());
    let stats = q.stats();
    let s = stats.class(0).unwrap();
    assert_eq!(s.current_loss, Loss::ZERO);
    // Cumulative counters survive the epoch.
    assert_eq!(s.arrival.packets(), 3);
}
