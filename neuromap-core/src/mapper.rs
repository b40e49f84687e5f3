//! Surface-to-skeleton correspondence.
//!
//! Every surface vertex is expressed as a point on a skeleton segment:
//! `(v1, v2, lambda)` with `lambda` the normalized position from `v1` to `v2`.
//! Skeleton segments are indexed in an R-tree once per pair, then each vertex
//! is resolved with a nearest-segment query. Tables are cached per
//! `(skeleton, refinement, surface, inflation)` and shared as `Arc`s.

use std::collections::HashMap;
use std::sync::Arc;

use glam::DVec3;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use serde::{Deserialize, Serialize};

use crate::error::{MapError, MapResult};
use crate::grid::{DIAMETER, MAPPING, SkeletonGraph, SurfaceMesh};

/// One surface vertex expressed between two skeleton nodes.
///
/// `lambda == 0` sits on `v1`, `lambda == 1` sits on `v2`. Isolated skeleton
/// nodes map as `v1 == v2` with `lambda == 0`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub v1: usize,
    pub v2: usize,
    pub lambda: f64,
}

impl MappingEntry {
    pub fn new(v1: usize, v2: usize, lambda: f64) -> MappingEntry {
        MappingEntry { v1, v2, lambda }
    }

    pub fn at_node(node: usize) -> MappingEntry {
        MappingEntry::new(node, node, 0.0)
    }

    /// Skeleton node an injected value lands on. `lambda == 0.5` stays on `v1`.
    #[inline]
    pub fn nearest_node(&self) -> usize {
        if self.lambda > 0.5 { self.v2 } else { self.v1 }
    }

    /// Linear interpolation of `scalars` along the segment. Extrapolates when
    /// lambda lies outside [0, 1]. Indices must be in range.
    #[inline]
    pub fn interpolate(&self, scalars: &[f64]) -> f64 {
        let a = scalars[self.v1];
        self.lambda * (scalars[self.v2] - a) + a
    }

    pub fn lambda_in_range(&self) -> bool {
        (0.0..=1.0).contains(&self.lambda)
    }
}

/// Read-only per-vertex mapping, one entry per surface vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
    skeleton_len: usize,
}

impl MappingTable {
    /// Wrap prebuilt entries. Every index must be below `skeleton_len`.
    pub fn from_entries(entries: Vec<MappingEntry>, skeleton_len: usize) -> MapResult<MappingTable> {
        if let Some(i) = entries
            .iter()
            .position(|e| e.v1 >= skeleton_len || e.v2 >= skeleton_len)
        {
            return Err(MapError::invalid(format!(
                "mapping entry {i} references a skeleton node outside 0..{skeleton_len}"
            )));
        }
        Ok(MappingTable {
            entries,
            skeleton_len,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of skeleton nodes the entries index into.
    pub fn skeleton_len(&self) -> usize {
        self.skeleton_len
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn get(&self, vertex: usize) -> Option<&MappingEntry> {
        self.entries.get(vertex)
    }

    pub fn nearest_node(&self, vertex: usize) -> Option<usize> {
        self.entries.get(vertex).map(MappingEntry::nearest_node)
    }

    /// Entries whose lambda lies outside [0, 1].
    pub fn out_of_range(&self) -> usize {
        self.entries.iter().filter(|e| !e.lambda_in_range()).count()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MapperConfig {
    /// A vertex may sit at most `factor * inflation * radius` off its segment.
    pub max_offset_factor: f64,
    /// Radius floor used by the offset check.
    pub min_radius: f64,
    /// Squared-distance slack under which two segments count as equally near.
    pub tie_epsilon: f64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        MapperConfig {
            max_offset_factor: 3.0,
            min_radius: 1e-6,
            tie_epsilon: 1e-12,
        }
    }
}

impl MapperConfig {
    pub fn set_max_offset_factor(&mut self, factor: f64) {
        self.max_offset_factor = factor.max(1.0);
    }

    pub fn set_min_radius(&mut self, r: f64) {
        self.min_radius = r.max(0.0);
    }
}

/// Cache key identifying a (skeleton, surface) pair. Names alone are not
/// enough: two grids sharing a name but not their geometry get different keys.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MapKey {
    skeleton: String,
    refinement: u32,
    nodes: usize,
    skeleton_hash: u64,
    surface: String,
    inflation_bits: u64,
    vertices: usize,
    surface_hash: u64,
}

impl MapKey {
    pub fn of(skeleton: &SkeletonGraph, surface: &SurfaceMesh) -> MapKey {
        MapKey {
            skeleton: skeleton.name().to_string(),
            refinement: skeleton.refinement(),
            nodes: skeleton.len(),
            skeleton_hash: skeleton.fingerprint(),
            surface: surface.name().to_string(),
            inflation_bits: surface.inflation().to_bits(),
            vertices: surface.len(),
            surface_hash: surface.fingerprint(),
        }
    }
}

/// Whether a mapping is available. Rebuilds happen only through explicit
/// geometry-change calls, never on access.
#[derive(Clone, Debug, Default)]
pub enum MapState {
    #[default]
    Unbuilt,
    Built(Arc<MappingTable>),
}

impl MapState {
    pub fn table(&self) -> Option<&Arc<MappingTable>> {
        match self {
            MapState::Unbuilt => None,
            MapState::Built(t) => Some(t),
        }
    }

    pub fn is_built(&self) -> bool {
        matches!(self, MapState::Built(_))
    }
}

pub struct Mapper {
    config: MapperConfig,
    cache: HashMap<MapKey, Arc<MappingTable>>,
}

impl Mapper {
    pub fn new(config: MapperConfig) -> Mapper {
        Mapper {
            config,
            cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Mapping for the pair, computed on first request and cached after.
    pub fn map(&mut self, skeleton: &SkeletonGraph, surface: &SurfaceMesh) -> MapResult<Arc<MappingTable>> {
        let key = MapKey::of(skeleton, surface);
        if let Some(table) = self.cache.get(&key) {
            log::trace!("mapping cache hit for {key:?}");
            return Ok(Arc::clone(table));
        }

        let table = Arc::new(build_table(skeleton, surface, &self.config)?);
        log::debug!(
            "mapped {} surface vertices of '{}' onto {} skeleton nodes of '{}' ({} out of range)",
            table.len(),
            surface.name(),
            table.skeleton_len(),
            skeleton.name(),
            table.out_of_range()
        );
        self.cache.insert(key, Arc::clone(&table));
        Ok(table)
    }

    pub fn cached(&self, key: &MapKey) -> Option<Arc<MappingTable>> {
        self.cache.get(key).cloned()
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    pub fn invalidate(&mut self, key: &MapKey) -> bool {
        self.cache.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for Mapper {
    fn default() -> Self {
        Mapper::new(MapperConfig::default())
    }
}

// ---- Segment index ----

#[derive(Clone, Copy, Debug)]
struct SkeletonSegment {
    v1: usize,
    v2: usize,
    a: DVec3,
    b: DVec3,
}

impl SkeletonSegment {
    /// Clamped projection parameter and squared distance to the segment.
    fn project(&self, p: DVec3) -> (f64, f64) {
        let d = self.b - self.a;
        let len2 = d.length_squared();
        if len2 <= f64::EPSILON {
            return (0.0, p.distance_squared(self.a));
        }
        let t = ((p - self.a).dot(d) / len2).clamp(0.0, 1.0);
        (t, p.distance_squared(self.a + d * t))
    }
}

impl RTreeObject for SkeletonSegment {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.a.min(self.b).to_array(), self.a.max(self.b).to_array())
    }
}

impl PointDistance for SkeletonSegment {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        self.project(DVec3::from_array(*point)).1
    }
}

fn segment_index(skeleton: &SkeletonGraph) -> RTree<SkeletonSegment> {
    let pos = skeleton.positions();
    let mut segments: Vec<SkeletonSegment> = skeleton
        .edges()
        .iter()
        .map(|&(v1, v2)| SkeletonSegment {
            v1,
            v2,
            a: pos[v1],
            b: pos[v2],
        })
        .collect();
    // isolated nodes still need to be reachable
    for node in 0..skeleton.len() {
        if skeleton.neighbors(node).is_empty() {
            segments.push(SkeletonSegment {
                v1: node,
                v2: node,
                a: pos[node],
                b: pos[node],
            });
        }
    }
    RTree::bulk_load(segments)
}

/// Build the mapping for one pair without touching any cache.
pub fn build_table(
    skeleton: &SkeletonGraph,
    surface: &SurfaceMesh,
    config: &MapperConfig,
) -> MapResult<MappingTable> {
    let diameters = skeleton.diameters().ok_or_else(|| MapError::MissingAttachment {
        grid: "skeleton",
        name: skeleton.name().to_string(),
        attachment: DIAMETER,
    })?;
    let slots = surface.mapping_slots().ok_or_else(|| MapError::MissingAttachment {
        grid: "surface",
        name: surface.name().to_string(),
        attachment: MAPPING,
    })?;

    let n1 = skeleton.len();
    if n1 == 0 && !surface.is_empty() {
        return Err(MapError::mismatch(
            skeleton.name(),
            surface.name(),
            "skeleton has no nodes",
        ));
    }

    let tree = segment_index(skeleton);

    let mut entries = Vec::with_capacity(surface.len());
    for (i, (slot, &p)) in slots.iter().zip(surface.positions()).enumerate() {
        let entry = match slot {
            Some(given) => {
                check_given(skeleton, surface, i, given)?;
                *given
            }
            None => {
                let (seg, lambda, d2) = nearest_segment(&tree, p, config.tie_epsilon)
                    .ok_or_else(|| MapError::mismatch(skeleton.name(), surface.name(), "empty skeleton index"))?;

                let r1 = diameters[seg.v1] * 0.5;
                let r2 = diameters[seg.v2] * 0.5;
                let r = (r1 + lambda * (r2 - r1)).max(config.min_radius);
                let limit = config.max_offset_factor * surface.inflation() * r;
                let dist = d2.sqrt();
                if dist > limit {
                    return Err(MapError::mismatch(
                        skeleton.name(),
                        surface.name(),
                        format!(
                            "surface vertex {i} lies {dist:.4} from segment ({}, {}), limit {limit:.4}",
                            seg.v1, seg.v2
                        ),
                    ));
                }
                MappingEntry::new(seg.v1, seg.v2, lambda)
            }
        };
        entries.push(entry);
    }

    Ok(MappingTable {
        entries,
        skeleton_len: n1,
    })
}

fn nearest_segment(tree: &RTree<SkeletonSegment>, p: DVec3, tie_epsilon: f64) -> Option<(SkeletonSegment, f64, f64)> {
    let query = p.to_array();
    let mut iter = tree.nearest_neighbor_iter(&query);
    let mut best = *iter.next()?;
    let (mut best_lambda, best_d2) = best.project(p);

    for seg in iter {
        let (lambda, d2) = seg.project(p);
        if d2 - best_d2 > tie_epsilon {
            break;
        }
        if (seg.v1, seg.v2) < (best.v1, best.v2) {
            best = *seg;
            best_lambda = lambda;
        }
    }
    Some((best, best_lambda, best_d2))
}

fn check_given(
    skeleton: &SkeletonGraph,
    surface: &SurfaceMesh,
    vertex: usize,
    e: &MappingEntry,
) -> MapResult<()> {
    let n1 = skeleton.len();
    if e.v1 >= n1 || e.v2 >= n1 {
        return Err(MapError::mismatch(
            skeleton.name(),
            surface.name(),
            format!(
                "surface vertex {vertex} maps to ({}, {}) but the skeleton has {n1} nodes",
                e.v1, e.v2
            ),
        ));
    }
    if e.v1 != e.v2 && !skeleton.has_edge(e.v1, e.v2) {
        return Err(MapError::mismatch(
            skeleton.name(),
            surface.name(),
            format!("surface vertex {vertex} maps to unconnected nodes ({}, {})", e.v1, e.v2),
        ));
    }
    if !e.lambda.is_finite() {
        return Err(MapError::mismatch(
            skeleton.name(),
            surface.name(),
            format!("surface vertex {vertex} has a non-finite lambda"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn line(n: usize) -> SkeletonGraph {
        let positions = (0..n).map(|i| DVec3::new(i as f64, 0.0, 0.0)).collect();
        let edges = (1..n).map(|i| (i - 1, i)).collect();
        SkeletonGraph::new("line", 0, positions, edges)
            .unwrap()
            .with_diameters(vec![1.0; n])
            .unwrap()
    }

    fn surface(points: &[DVec3]) -> SurfaceMesh {
        SurfaceMesh::new("surf", 1.0, points.to_vec(), vec![])
            .unwrap()
            .with_mapping_placeholder()
    }

    #[test]
    fn vertex_between_first_two_nodes() {
        let table = build_table(
            &line(3),
            &surface(&[DVec3::new(0.25, 0.4, 0.0)]),
            &MapperConfig::default(),
        )
        .unwrap();
        let e = table.get(0).unwrap();
        assert_eq!((e.v1, e.v2), (0, 1));
        assert_relative_eq!(e.lambda, 0.25, epsilon = 1e-12);
        assert_eq!(table.skeleton_len(), 3);
    }

    #[test]
    fn vertex_on_shared_node_picks_lowest_segment() {
        let table = build_table(
            &line(3),
            &surface(&[DVec3::new(1.0, 0.3, 0.0)]),
            &MapperConfig::default(),
        )
        .unwrap();
        let e = table.get(0).unwrap();
        assert_eq!((e.v1, e.v2), (0, 1));
        assert_relative_eq!(e.lambda, 1.0);
    }

    #[test]
    fn past_the_tip_clamps_lambda() {
        let table = build_table(
            &line(2),
            &surface(&[DVec3::new(1.2, 0.0, 0.0), DVec3::new(-0.3, 0.1, 0.0)]),
            &MapperConfig::default(),
        )
        .unwrap();
        assert_eq!(table.get(0).unwrap().lambda, 1.0);
        assert_eq!(table.get(1).unwrap().lambda, 0.0);
        assert_eq!(table.out_of_range(), 0);
    }

    #[test]
    fn isolated_node_maps_onto_itself() {
        let sk = SkeletonGraph::new("dot", 0, vec![DVec3::ZERO], vec![])
            .unwrap()
            .with_diameters(vec![2.0])
            .unwrap();
        let table = build_table(&sk, &surface(&[DVec3::new(0.0, 0.9, 0.0)]), &MapperConfig::default()).unwrap();
        assert_eq!(*table.get(0).unwrap(), MappingEntry::at_node(0));
    }

    #[test]
    fn missing_diameter_names_the_attachment() {
        let sk = SkeletonGraph::new("bare", 0, vec![DVec3::ZERO, DVec3::X], vec![(0, 1)]).unwrap();
        let err = build_table(&sk, &surface(&[DVec3::ZERO]), &MapperConfig::default()).unwrap_err();
        assert_eq!(
            err,
            MapError::MissingAttachment {
                grid: "skeleton",
                name: "bare".into(),
                attachment: DIAMETER
            }
        );
    }

    #[test]
    fn missing_mapping_names_the_attachment() {
        let s = SurfaceMesh::new("nomap", 1.0, vec![DVec3::ZERO], vec![]).unwrap();
        let err = build_table(&line(2), &s, &MapperConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            MapError::MissingAttachment {
                attachment: MAPPING,
                ..
            }
        ));
        assert!(err.to_string().contains("mapping"));
    }

    #[test]
    fn far_vertex_is_a_mismatch() {
        let err = build_table(
            &line(3),
            &surface(&[DVec3::new(1.0, 50.0, 0.0)]),
            &MapperConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MapError::GridMismatch { .. }));
    }

    #[test]
    fn loader_entries_are_adopted_verbatim() {
        let s = SurfaceMesh::new("given", 1.0, vec![DVec3::ZERO, DVec3::X], vec![])
            .unwrap()
            .with_mapping(vec![Some(MappingEntry::new(1, 2, 1.4)), None])
            .unwrap();
        let table = build_table(&line(3), &s, &MapperConfig::default()).unwrap();
        assert_eq!(*table.get(0).unwrap(), MappingEntry::new(1, 2, 1.4));
        assert_eq!(table.out_of_range(), 1);
    }

    #[test]
    fn loader_entries_must_follow_an_edge() {
        let s = SurfaceMesh::new("given", 1.0, vec![DVec3::ZERO], vec![])
            .unwrap()
            .with_mapping(vec![Some(MappingEntry::new(0, 2, 0.5))])
            .unwrap();
        let err = build_table(&line(3), &s, &MapperConfig::default()).unwrap_err();
        assert!(matches!(err, MapError::GridMismatch { .. }));
    }

    #[test]
    fn cache_returns_the_same_table() {
        let mut mapper = Mapper::default();
        let sk = line(4);
        let s = surface(&[DVec3::new(0.5, 0.2, 0.0), DVec3::new(2.7, -0.2, 0.1)]);
        let a = mapper.map(&sk, &s).unwrap();
        let b = mapper.map(&sk, &s).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(mapper.cached_len(), 1);

        assert!(mapper.invalidate(&MapKey::of(&sk, &s)));
        let c = mapper.map(&sk, &s).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(*a, *c);
    }

    #[test]
    fn same_names_different_geometry_miss_the_cache() {
        let mut mapper = Mapper::default();
        let short = mapper.map(&line(2), &surface(&[DVec3::new(0.5, 0.2, 0.0)])).unwrap();
        assert_eq!(short.skeleton_len(), 2);

        let long = mapper.map(&line(5), &surface(&[DVec3::new(3.5, 0.2, 0.0)])).unwrap();
        assert_eq!(long.skeleton_len(), 5);
        let e = long.get(0).unwrap();
        assert_eq!((e.v1, e.v2), (3, 4));
        assert_relative_eq!(e.lambda, 0.5, epsilon = 1e-12);
        assert_eq!(mapper.cached_len(), 2);
    }

    #[test]
    fn failed_build_is_not_cached() {
        let mut mapper = Mapper::default();
        let s = surface(&[DVec3::new(0.0, 100.0, 0.0)]);
        assert!(mapper.map(&line(2), &s).is_err());
        assert_eq!(mapper.cached_len(), 0);
    }

    #[test]
    fn tie_at_half_stays_on_v1() {
        assert_eq!(MappingEntry::new(3, 4, 0.5).nearest_node(), 3);
        assert_eq!(MappingEntry::new(3, 4, 0.5000001).nearest_node(), 4);
    }

    #[test]
    fn map_state_starts_unbuilt() {
        let state = MapState::default();
        assert!(!state.is_built());
        assert!(state.table().is_none());
    }
}
