//! Folding surface interaction back onto skeleton nodes.
//!
//! A touched surface vertex resolves to one skeleton node, whichever end of
//! its mapping segment is nearer. Values are written to that node as-is; no
//! sub-node interpolation happens on the way down.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::clamp::{Clamp, ClampRegistry};
use crate::diag::{Diagnostics, OnceFlag};
use crate::grid::{SkeletonGraph, SurfaceMesh};
use crate::mapper::MappingTable;
use crate::solver::ScalarSolver;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeValue {
    pub node: usize,
    pub value: f64,
}

impl NodeValue {
    pub fn new(node: usize, value: f64) -> NodeValue {
        NodeValue { node, value }
    }
}

/// A pointer/ray hit on one surface triangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SurfaceContact {
    pub triangle: usize,
    pub vertices: [usize; 3],
    pub value: f64,
}

impl SurfaceContact {
    pub fn new(triangle: usize, vertices: [usize; 3], value: f64) -> SurfaceContact {
        SurfaceContact {
            triangle,
            vertices,
            value,
        }
    }

    /// Contact on `triangle` of `surface`, `None` if the triangle does not exist.
    pub fn from_mesh(surface: &SurfaceMesh, triangle: usize, value: f64) -> Option<SurfaceContact> {
        surface
            .triangle(triangle)
            .map(|vertices| SurfaceContact::new(triangle, vertices, value))
    }
}

pub struct InteractionInjector {
    table: Arc<MappingTable>,
    diagnostics: Diagnostics,
    bad_vertex: OnceFlag,
}

impl InteractionInjector {
    pub fn new(table: Arc<MappingTable>, diagnostics: Diagnostics) -> InteractionInjector {
        InteractionInjector {
            table,
            diagnostics,
            bad_vertex: OnceFlag::new(),
        }
    }

    pub fn table(&self) -> &Arc<MappingTable> {
        &self.table
    }

    /// One `(node, value)` pair per vertex of the hit triangle.
    pub fn project(&self, contact: &SurfaceContact) -> Vec<NodeValue> {
        let pairs = contact.vertices.map(|v| (v, contact.value));
        self.project_batch(&pairs)
    }

    /// Resolve `(surface vertex, value)` pairs. Vertices landing on the same
    /// node collapse into one pair holding the last value, at the position of
    /// the first occurrence, so nothing accumulates within one batch.
    pub fn project_batch(&self, pairs: &[(usize, f64)]) -> Vec<NodeValue> {
        let mut out = Vec::with_capacity(pairs.len());
        self.project_into(pairs, &mut out);
        out
    }

    pub fn project_into(&self, pairs: &[(usize, f64)], out: &mut Vec<NodeValue>) {
        out.clear();
        for &(vertex, value) in pairs {
            match self.table.nearest_node(vertex) {
                Some(node) => match out.iter_mut().find(|nv| nv.node == node) {
                    Some(nv) => nv.value = value,
                    None => out.push(NodeValue::new(node, value)),
                },
                None => {
                    if self.bad_vertex.first() {
                        self.diagnostics.error(format!(
                            "ignored contact on surface vertex {vertex}, mapping has {} vertices",
                            self.table.len()
                        ));
                    }
                }
            }
        }
    }

    /// Skeleton node closest to `point` among the segment ends of the three
    /// contact vertices. Used to focus a clamp where the user touched.
    pub fn nearest_node(&self, skeleton: &SkeletonGraph, vertices: [usize; 3], point: DVec3) -> Option<usize> {
        vertices
            .iter()
            .filter_map(|&v| self.table.get(v))
            .flat_map(|e| [e.v1, e.v2])
            .filter_map(|n| skeleton.position(n).map(|p| (n, p.distance_squared(point))))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(n, _)| n)
    }
}

// ---- Contact hand-off ----

#[derive(Clone, Debug, PartialEq)]
pub enum ContactEvent {
    /// Hold these values until released or replaced.
    Press(Vec<NodeValue>),
    Release,
}

/// Foreground end of the contact channel.
#[derive(Clone, Debug)]
pub struct ContactSender {
    tx: Sender<ContactEvent>,
}

impl ContactSender {
    pub fn press(&self, pairs: Vec<NodeValue>) -> bool {
        self.tx.send(ContactEvent::Press(pairs)).is_ok()
    }

    pub fn release(&self) -> bool {
        self.tx.send(ContactEvent::Release).is_ok()
    }
}

pub fn contact_channel() -> (ContactSender, Receiver<ContactEvent>) {
    let (tx, rx) = channel();
    (ContactSender { tx }, rx)
}

/// Solve-side assembly of what gets written into the solver each step:
/// live clamp contributions followed by the most recent contact.
pub struct InjectionStage {
    clamps: ClampRegistry,
    contacts: Receiver<ContactEvent>,
    node_count: usize,
    diagnostics: Diagnostics,
    stale_clamp: OnceFlag,
    contact: Vec<NodeValue>,
    snapshot: Vec<Clamp>,
    pending: Vec<NodeValue>,
}

impl InjectionStage {
    pub fn new(
        clamps: ClampRegistry,
        contacts: Receiver<ContactEvent>,
        node_count: usize,
        diagnostics: Diagnostics,
    ) -> InjectionStage {
        InjectionStage {
            clamps,
            contacts,
            node_count,
            diagnostics,
            stale_clamp: OnceFlag::new(),
            contact: Vec::new(),
            snapshot: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    /// Rebuild the pending injection for this step.
    pub fn pending(&mut self) -> &[NodeValue] {
        self.refresh();
        &self.pending
    }

    /// Hand this step's pending pairs to the solver. Returns how many.
    pub fn apply(&mut self, solver: &mut dyn ScalarSolver) -> usize {
        self.refresh();
        if !self.pending.is_empty() {
            solver.set_1d_values(&self.pending);
        }
        self.pending.len()
    }

    fn refresh(&mut self) {
        for event in self.contacts.try_iter() {
            match event {
                ContactEvent::Press(pairs) => self.contact = pairs,
                ContactEvent::Release => self.contact.clear(),
            }
        }

        self.clamps.snapshot_into(&mut self.snapshot);

        self.pending.clear();
        for clamp in &self.snapshot {
            match clamp.contribution(self.node_count) {
                Some(nv) => self.pending.push(nv),
                None => {
                    if clamp.is_stale(self.node_count) && self.stale_clamp.first() {
                        self.diagnostics.error(format!(
                            "clamp {} targets node {:?} outside 0..{}, skipped",
                            clamp.id.get(),
                            clamp.target,
                            self.node_count
                        ));
                    }
                }
            }
        }
        let n = self.node_count;
        self.pending.extend(self.contact.iter().filter(|nv| nv.node < n).copied());
    }
}
