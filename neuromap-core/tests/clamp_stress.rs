use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use neuromap_core::inject::contact_channel;
use neuromap_core::{ClampRegistry, ClampUpdate, InjectionStage, NodeValue, diag};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const A: ClampUpdate = ClampUpdate {
    target: Some(3),
    power: 1.0,
    live: true,
};
const B: ClampUpdate = ClampUpdate {
    target: Some(7),
    power: 2.0,
    live: false,
};

fn writer(registry: ClampRegistry, stop: Arc<AtomicBool>, seed: u64) -> thread::JoinHandle<u64> {
    thread::spawn(move || {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let ids: Vec<_> = registry.snapshot().iter().map(|c| c.id).collect();
        let mut writes = 0u64;
        while !stop.load(Ordering::Relaxed) {
            let id = ids[rng.gen_range(0..ids.len())];
            let next = if rng.gen_range(0..2) == 0 { A } else { B };
            assert!(registry.update(id, next));
            writes += 1;
        }
        writes
    })
}

#[test]
fn snapshots_never_mix_fields() {
    let registry = ClampRegistry::new();
    for _ in 0..8 {
        registry.add(A);
    }
    let stop = Arc::new(AtomicBool::new(false));
    let writers: Vec<_> = (0..2)
        .map(|s| writer(registry.clone(), Arc::clone(&stop), 0xC1A4 + s))
        .collect();

    let reader = {
        let registry = registry.clone();
        thread::spawn(move || {
            let mut snapshot = Vec::new();
            let (mut seen_a, mut seen_b) = (0u64, 0u64);
            for _ in 0..20_000 {
                registry.snapshot_into(&mut snapshot);
                assert_eq!(snapshot.len(), 8);
                for c in &snapshot {
                    let fields = ClampUpdate {
                        target: c.target,
                        power: c.power,
                        live: c.live,
                    };
                    if fields == A {
                        seen_a += 1;
                    } else if fields == B {
                        seen_b += 1;
                    } else {
                        panic!("torn clamp observed: {c:?}");
                    }
                }
            }
            (seen_a, seen_b)
        })
    };

    let (seen_a, seen_b) = reader.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    let writes: u64 = writers.into_iter().map(|w| w.join().unwrap()).sum();

    assert_eq!(seen_a + seen_b, 20_000 * 8);
    assert!(writes > 0);
}

#[test]
fn injection_stage_only_sees_whole_clamps() {
    let registry = ClampRegistry::new();
    for _ in 0..4 {
        registry.add(B);
    }
    let stop = Arc::new(AtomicBool::new(false));
    let w = writer(registry.clone(), Arc::clone(&stop), 7);

    let (d, _sink) = diag::channel(8);
    let (_tx, rx) = contact_channel();
    let mut stage = InjectionStage::new(registry, rx, 10, d);
    for _ in 0..10_000 {
        for nv in stage.pending() {
            assert_eq!(*nv, NodeValue::new(3, 1.0));
        }
    }

    stop.store(true, Ordering::Relaxed);
    w.join().unwrap();
}
