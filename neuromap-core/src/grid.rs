//! Skeleton graph (simulation domain) and surface mesh (display domain).
//!
//! Both grids are produced by an external loader and are immutable once
//! built. Per-vertex data the mapper depends on lives in named attachments:
//! [`DIAMETER`] on the skeleton and [`MAPPING`] on the surface.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use glam::DVec3;

use crate::error::{MapError, MapResult};
use crate::mapper::MappingEntry;

pub const DIAMETER: &str = "diameter";
pub const MAPPING: &str = "mapping";

#[derive(Clone, Debug)]
pub struct SkeletonGraph {
    name: String,
    refinement: u32,
    positions: Vec<DVec3>,
    edges: Vec<(usize, usize)>,
    adjacency: Vec<Vec<usize>>,
    diameters: Option<Vec<f64>>,
}

impl SkeletonGraph {
    pub fn new(
        name: impl Into<String>,
        refinement: u32,
        positions: Vec<DVec3>,
        edges: Vec<(usize, usize)>,
    ) -> MapResult<SkeletonGraph> {
        let n = positions.len();
        if let Some(i) = positions.iter().position(|p| !p.is_finite()) {
            return Err(MapError::invalid(format!("skeleton node {i} has a non-finite position")));
        }

        let mut adjacency = vec![Vec::new(); n];
        let mut unique = Vec::with_capacity(edges.len());
        for (a, b) in edges {
            if a >= n || b >= n {
                return Err(MapError::invalid(format!(
                    "skeleton edge ({a}, {b}) out of range for {n} nodes"
                )));
            }
            if a == b {
                return Err(MapError::invalid(format!("skeleton edge ({a}, {b}) is a self loop")));
            }
            // (a, b) and (b, a) are the same edge; the first spelling is kept
            if !adjacency[a].contains(&b) {
                adjacency[a].push(b);
                adjacency[b].push(a);
                unique.push((a, b));
            }
        }

        Ok(SkeletonGraph {
            name: name.into(),
            refinement,
            positions,
            edges: unique,
            adjacency,
            diameters: None,
        })
    }

    /// Attach the per-node diameter array.
    pub fn with_diameters(mut self, diameters: Vec<f64>) -> MapResult<SkeletonGraph> {
        if diameters.len() != self.positions.len() {
            return Err(MapError::AttachmentLength {
                attachment: DIAMETER,
                expected: self.positions.len(),
                actual: diameters.len(),
            });
        }
        if let Some(i) = diameters.iter().position(|d| !d.is_finite() || *d < 0.0) {
            return Err(MapError::invalid(format!("skeleton node {i} has an invalid diameter")));
        }
        self.diameters = Some(diameters);
        Ok(self)
    }

    // ---- Accessors ----

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn refinement(&self) -> u32 {
        self.refinement
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[DVec3] {
        &self.positions
    }

    pub fn position(&self, node: usize) -> Option<DVec3> {
        self.positions.get(node).copied()
    }

    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.neighbors(a).contains(&b)
    }

    pub fn diameters(&self) -> Option<&[f64]> {
        self.diameters.as_deref()
    }

    pub fn node_radius(&self, node: usize) -> Option<f64> {
        self.diameters.as_ref()?.get(node).map(|d| d * 0.5)
    }

    /// Mean node radius, `None` without a diameter attachment or nodes.
    pub fn average_radius(&self) -> Option<f64> {
        let d = self.diameters.as_ref()?;
        if d.is_empty() {
            return None;
        }
        Some(d.iter().sum::<f64>() * 0.5 / d.len() as f64)
    }

    /// Hash of everything the mapper reads: positions, edges and diameters.
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        hash_points(&self.positions, &mut h);
        self.edges.hash(&mut h);
        if let Some(d) = &self.diameters {
            d.iter().for_each(|x| x.to_bits().hash(&mut h));
        }
        h.finish()
    }
}

fn hash_points(points: &[DVec3], h: &mut DefaultHasher) {
    points.len().hash(h);
    for p in points {
        p.to_array().map(f64::to_bits).hash(h);
    }
}

#[derive(Clone, Debug)]
pub struct SurfaceMesh {
    name: String,
    inflation: f64,
    positions: Vec<DVec3>,
    triangles: Vec<[usize; 3]>,
    mapping: Option<Vec<Option<MappingEntry>>>,
}

impl SurfaceMesh {
    pub fn new(
        name: impl Into<String>,
        inflation: f64,
        positions: Vec<DVec3>,
        triangles: Vec<[usize; 3]>,
    ) -> MapResult<SurfaceMesh> {
        if !inflation.is_finite() || inflation <= 0.0 {
            return Err(MapError::invalid(format!("surface inflation {inflation} must be > 0")));
        }
        if let Some(i) = positions.iter().position(|p| !p.is_finite()) {
            return Err(MapError::invalid(format!("surface vertex {i} has a non-finite position")));
        }
        let n = positions.len();
        if let Some(t) = triangles.iter().position(|tri| tri.iter().any(|&v| v >= n)) {
            return Err(MapError::invalid(format!(
                "surface triangle {t} references a vertex outside 0..{n}"
            )));
        }

        Ok(SurfaceMesh {
            name: name.into(),
            inflation,
            positions,
            triangles,
            mapping: None,
        })
    }

    /// Build from a flat index buffer (three indices per triangle).
    pub fn from_flat(
        name: impl Into<String>,
        inflation: f64,
        positions: Vec<DVec3>,
        indices: &[usize],
    ) -> MapResult<SurfaceMesh> {
        if indices.len() % 3 != 0 {
            return Err(MapError::invalid(format!(
                "triangle index buffer length {} is not a multiple of 3",
                indices.len()
            )));
        }
        let triangles = indices.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        SurfaceMesh::new(name, inflation, positions, triangles)
    }

    /// Attach an empty mapping slot per vertex for the mapper to fill.
    pub fn with_mapping_placeholder(mut self) -> SurfaceMesh {
        self.mapping = Some(vec![None; self.positions.len()]);
        self
    }

    /// Attach loader-resolved mapping slots (empty slots are computed).
    pub fn with_mapping(mut self, slots: Vec<Option<MappingEntry>>) -> MapResult<SurfaceMesh> {
        if slots.len() != self.positions.len() {
            return Err(MapError::AttachmentLength {
                attachment: MAPPING,
                expected: self.positions.len(),
                actual: slots.len(),
            });
        }
        self.mapping = Some(slots);
        Ok(self)
    }

    // ---- Accessors ----

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inflation(&self) -> f64 {
        self.inflation
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[DVec3] {
        &self.positions
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn triangle(&self, index: usize) -> Option<[usize; 3]> {
        self.triangles.get(index).copied()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Unique undirected edges of the triangulation.
    pub fn edge_count(&self) -> usize {
        let mut edges: Vec<(usize, usize)> = self
            .triangles
            .iter()
            .flat_map(|t| [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])])
            .map(|(a, b)| (a.min(b), a.max(b)))
            .collect();
        edges.sort_unstable();
        edges.dedup();
        edges.len()
    }

    pub fn mapping_slots(&self) -> Option<&[Option<MappingEntry>]> {
        self.mapping.as_deref()
    }

    /// Hash of vertex positions and loader-given mapping slots.
    pub fn fingerprint(&self) -> u64 {
        let mut h = DefaultHasher::new();
        hash_points(&self.positions, &mut h);
        if let Some(slots) = &self.mapping {
            for slot in slots {
                slot.map(|e| (e.v1, e.v2, e.lambda.to_bits())).hash(&mut h);
            }
        }
        h.finish()
    }
}
