use std::sync::Arc;

use glam::DVec3;
use neuromap_core::mapper::build_table;
use neuromap_core::synth::tube_surface;
use neuromap_core::{FieldPropagator, Mapper, MapperConfig, MappingEntry, MappingTable, SkeletonGraph, diag};
use proptest::prelude::*;

/// Random tree: node `i` hangs off node `seed % i` at distance `len`.
fn tree(branches: &[(usize, f64, f64, f64, f64)], diameter: f64) -> SkeletonGraph {
    let mut positions = vec![DVec3::ZERO];
    let mut edges = Vec::new();
    for (k, &(seed, x, y, z, len)) in branches.iter().enumerate() {
        let i = k + 1;
        let parent = seed % i;
        let dir = DVec3::new(x, y, z).try_normalize().unwrap_or(DVec3::X);
        positions.push(positions[parent] + dir * len);
        edges.push((parent, i));
    }
    let n = positions.len();
    SkeletonGraph::new("tree", 0, positions, edges)
        .unwrap()
        .with_diameters(vec![diameter; n])
        .unwrap()
}

fn branches() -> impl Strategy<Value = Vec<(usize, f64, f64, f64, f64)>> {
    prop::collection::vec(
        (0usize..1000, -1.0f64..1.0, -1.0f64..1.0, -1.0f64..1.0, 0.5f64..2.0),
        1..12,
    )
}

proptest! {
    #[test]
    fn lambda_stays_in_unit_interval(
        b in branches(),
        diameter in 0.05f64..0.4,
        inflation in 1.0f64..3.0,
        ring in 3usize..9,
        stations in 1usize..4,
    ) {
        let skeleton = tree(&b, diameter);
        let surface = tube_surface(&skeleton, inflation, ring, stations).unwrap();
        let table = build_table(&skeleton, &surface, &MapperConfig::default()).unwrap();

        prop_assert_eq!(table.len(), surface.len());
        for e in table.entries() {
            prop_assert!(e.lambda_in_range(), "lambda {} out of range", e.lambda);
            prop_assert!(e.v1 == e.v2 || skeleton.has_edge(e.v1, e.v2));
        }
    }

    #[test]
    fn constant_field_propagates_unchanged(
        b in branches(),
        k in -100.0f64..100.0,
    ) {
        let skeleton = tree(&b, 0.2);
        let surface = tube_surface(&skeleton, 1.0, 5, 2).unwrap();
        let table = Mapper::default().map(&skeleton, &surface).unwrap();
        let (d, _sink) = diag::channel(8);
        let mut p = FieldPropagator::new(table, d);

        let scalars = vec![k; skeleton.len()];
        let out = p.propagate(Some(&scalars)).unwrap();
        for &v in out {
            prop_assert_eq!(v, k);
        }
    }

    #[test]
    fn constant_survives_any_lambda(
        lambdas in prop::collection::vec(-3.0f64..3.0, 1..50),
        k in -100.0f64..100.0,
    ) {
        let entries = lambdas.iter().map(|&l| MappingEntry::new(0, 1, l)).collect();
        let table = MappingTable::from_entries(entries, 2).unwrap();
        let (d, _sink) = diag::channel(8);
        let mut p = FieldPropagator::new(Arc::new(table), d);
        for &v in p.propagate(Some(&[k, k])).unwrap() {
            prop_assert_eq!(v, k);
        }
    }

    #[test]
    fn mapping_twice_is_bit_identical(b in branches(), inflation in 1.0f64..2.5) {
        let skeleton = tree(&b, 0.3);
        let surface = tube_surface(&skeleton, inflation, 6, 2).unwrap();

        let mut mapper = Mapper::default();
        let first = mapper.map(&skeleton, &surface).unwrap();
        let second = mapper.map(&skeleton, &surface).unwrap();
        prop_assert!(Arc::ptr_eq(&first, &second));

        let fresh = build_table(&skeleton, &surface, &MapperConfig::default()).unwrap();
        for (a, b) in first.entries().iter().zip(fresh.entries()) {
            prop_assert_eq!((a.v1, a.v2, a.lambda.to_bits()), (b.v1, b.v2, b.lambda.to_bits()));
        }
    }
}
