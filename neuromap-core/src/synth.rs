//! Synthetic geometry: skeletons and tube surfaces generated together, so
//! they always form a matching pair. Stands in for the archive loader in the
//! CLI and in tests.

use std::f64::consts::TAU;

use glam::DVec3;

use crate::error::{MapError, MapResult};
use crate::grid::{SkeletonGraph, SurfaceMesh};
use crate::session::GeometrySource;

/// Straight chain of `n` nodes along +x.
pub fn line_skeleton(name: &str, n: usize, spacing: f64, diameter: f64) -> MapResult<SkeletonGraph> {
    let positions = (0..n).map(|i| DVec3::new(i as f64 * spacing, 0.0, 0.0)).collect();
    let edges = (1..n).map(|i| (i - 1, i)).collect();
    SkeletonGraph::new(name, 0, positions, edges)?.with_diameters(vec![diameter; n])
}

/// Three arms of `arm` nodes each, joined at node 0.
pub fn star_skeleton(name: &str, arm: usize, spacing: f64, diameter: f64) -> MapResult<SkeletonGraph> {
    let dirs = [
        DVec3::X,
        DVec3::new(-0.5, 0.75f64.sqrt(), 0.0),
        DVec3::new(-0.5, -(0.75f64.sqrt()), 0.0),
    ];
    let mut positions = vec![DVec3::ZERO];
    let mut edges = Vec::new();
    for dir in dirs {
        let mut prev = 0;
        for k in 1..=arm {
            positions.push(dir * (k as f64 * spacing));
            let id = positions.len() - 1;
            edges.push((prev, id));
            prev = id;
        }
    }
    let n = positions.len();
    SkeletonGraph::new(name, 0, positions, edges)?.with_diameters(vec![diameter; n])
}

/// Tube of rings around every skeleton edge, `ring` vertices per ring and
/// `stations` rings per edge, at radius `inflation * r(t)`. Isolated nodes
/// become small octahedra. The surface carries an empty mapping attachment.
pub fn tube_surface(
    skeleton: &SkeletonGraph,
    inflation: f64,
    ring: usize,
    stations: usize,
) -> MapResult<SurfaceMesh> {
    let ring = ring.max(3);
    let stations = stations.max(1);
    let diameters = skeleton
        .diameters()
        .ok_or_else(|| MapError::invalid("tube surface needs skeleton diameters"))?;
    let pos = skeleton.positions();

    let mut positions = Vec::new();
    let mut triangles = Vec::new();

    for &(a, b) in skeleton.edges() {
        let axis = pos[b] - pos[a];
        if axis.length_squared() <= f64::EPSILON {
            return Err(MapError::invalid(format!("skeleton edge ({a}, {b}) has zero length")));
        }
        let (u, v) = axis.normalize().any_orthonormal_pair();
        let (ra, rb) = (diameters[a] * 0.5, diameters[b] * 0.5);

        let first = positions.len();
        for s in 0..stations {
            let t = (s as f64 + 0.5) / stations as f64;
            let center = pos[a] + axis * t;
            let r = inflation * (ra + t * (rb - ra));
            for k in 0..ring {
                let theta = TAU * k as f64 / ring as f64;
                positions.push(center + (u * theta.cos() + v * theta.sin()) * r);
            }
        }
        for s in 1..stations {
            let r0 = first + (s - 1) * ring;
            let r1 = first + s * ring;
            for k in 0..ring {
                let k1 = (k + 1) % ring;
                triangles.push([r0 + k, r1 + k, r1 + k1]);
                triangles.push([r0 + k, r1 + k1, r0 + k1]);
            }
        }
    }

    for node in 0..skeleton.len() {
        if !skeleton.neighbors(node).is_empty() {
            continue;
        }
        let r = inflation * diameters[node] * 0.5;
        let first = positions.len();
        for dir in [DVec3::X, DVec3::NEG_X, DVec3::Y, DVec3::NEG_Y, DVec3::Z, DVec3::NEG_Z] {
            positions.push(pos[node] + dir * r);
        }
        for (x, y) in [(0, 2), (2, 1), (1, 3), (3, 0)] {
            triangles.push([first + x, first + y, first + 4]);
            triangles.push([first + y, first + x, first + 5]);
        }
    }

    Ok(SurfaceMesh::new(format!("{}-surface", skeleton.name()), inflation, positions, triangles)?
        .with_mapping_placeholder())
}

/// Split every edge into `2^level` pieces, interpolating diameters.
pub fn refine(skeleton: &SkeletonGraph, level: u32) -> MapResult<SkeletonGraph> {
    let diameters = skeleton
        .diameters()
        .ok_or_else(|| MapError::invalid("refinement needs skeleton diameters"))?;
    let pieces = 1usize << level.min(10);
    let mut positions = skeleton.positions().to_vec();
    let mut diam = diameters.to_vec();
    let mut edges = Vec::with_capacity(skeleton.edge_count() * pieces);

    for &(a, b) in skeleton.edges() {
        let mut prev = a;
        for k in 1..pieces {
            let t = k as f64 / pieces as f64;
            positions.push(positions[a].lerp(positions[b], t));
            diam.push(diam[a] + t * (diam[b] - diam[a]));
            let id = positions.len() - 1;
            edges.push((prev, id));
            prev = id;
        }
        edges.push((prev, b));
    }
    SkeletonGraph::new(skeleton.name(), level, positions, edges)?.with_diameters(diam)
}

/// Geometry source backed by one coarse skeleton; surfaces are tubes.
#[derive(Clone, Debug)]
pub struct TubeSource {
    skeleton: SkeletonGraph,
    ring: usize,
    stations: usize,
}

impl TubeSource {
    pub fn new(skeleton: SkeletonGraph, ring: usize, stations: usize) -> TubeSource {
        TubeSource {
            skeleton,
            ring,
            stations,
        }
    }
}

impl GeometrySource for TubeSource {
    fn skeleton(&self, refinement: u32) -> MapResult<SkeletonGraph> {
        refine(&self.skeleton, refinement)
    }

    // the surface always wraps the coarse skeleton, whatever the refinement
    fn surface(&self, inflation: f64) -> MapResult<SurfaceMesh> {
        tube_surface(&self.skeleton, inflation, self.ring, self.stations)
    }
}
