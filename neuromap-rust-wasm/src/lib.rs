use glam::DVec3;
use neuromap_core::diag::Severity;
use neuromap_core::synth::tube_surface;
use neuromap_core::{
    CableParams, CableSolver, CellSession, ClampId, ClampUpdate, MapError, MappingEntry, ScalarSolver, SessionConfig,
    SkeletonGraph, SolveLoop, StaticSource, SurfaceMesh,
};
use wasm_bindgen::prelude::*;

/// Single-threaded viewer: both halves of the session live here and are
/// driven from the JS frame callback.
#[wasm_bindgen]
pub struct NeuronView {
    session: CellSession<StaticSource>,
    solve: SolveLoop<CableSolver>,
    // JS handles are indices into this list
    clamps: Vec<Option<ClampId>>,
}

#[wasm_bindgen]
impl NeuronView {
    /// Skeleton and surface supplied as flat buffers: xyz triples for
    /// positions, index pairs for edges and index triples for triangles.
    #[wasm_bindgen(constructor)]
    pub fn new(
        name: String,
        node_xyz: Vec<f64>,
        edges: Vec<u32>,
        diameters: Vec<f64>,
        vertex_xyz: Vec<f64>,
        indices: Vec<u32>,
        inflation: f64,
    ) -> Result<NeuronView, JsValue> {
        let skeleton = skeleton_from_flat(&name, &node_xyz, &edges, diameters).map_err(js_err)?;
        let indices: Vec<usize> = indices.iter().map(|&i| i as usize).collect();
        let surface = SurfaceMesh::from_flat(
            format!("{name}-surface"),
            inflation,
            points(&vertex_xyz).map_err(js_err)?,
            &indices,
        )
        .map_err(js_err)?
        .with_mapping_placeholder();
        NeuronView::open(skeleton, surface)
    }

    /// Skeleton only; the surface is a generated tube around it.
    pub fn tube(
        name: String,
        node_xyz: Vec<f64>,
        edges: Vec<u32>,
        diameters: Vec<f64>,
        ring: usize,
        stations: usize,
        inflation: f64,
    ) -> Result<NeuronView, JsValue> {
        let skeleton = skeleton_from_flat(&name, &node_xyz, &edges, diameters).map_err(js_err)?;
        let surface = tube_surface(&skeleton, inflation, ring, stations).map_err(js_err)?;
        NeuronView::open(skeleton, surface)
    }

    // Solver parameters
    pub fn set_tau(&mut self, tau: f64) { self.solve.solver_mut().params_mut().set_tau(tau); }
    pub fn set_diffusivity(&mut self, d: f64) { self.solve.solver_mut().params_mut().set_diffusivity(d); }
    pub fn set_membrane_tau(&mut self, t: f64) { self.solve.solver_mut().params_mut().set_membrane_tau(t); }
    pub fn set_safety(&mut self, s: f64) { self.solve.solver_mut().params_mut().set_safety(s); }

    pub fn get_tau(&self) -> f64 { self.solve.solver().params().tau }
    pub fn get_time(&self) -> f64 { self.solve.solver().time() }
    pub fn dt_max(&self) -> f64 { self.solve.solver().dt_max() }

    pub fn clear(&mut self) { self.solve.solver_mut().clear(); }

    pub fn n_nodes(&self) -> usize { self.session.skeleton().len() }
    pub fn n_vertices(&self) -> usize { self.session.surface().len() }
    pub fn n_triangles(&self) -> usize { self.session.surface().triangle_count() }
    pub fn n_surface_edges(&self) -> usize { self.session.surface().edge_count() }
    pub fn average_radius(&self) -> f64 { self.session.skeleton().average_radius().unwrap_or(0.0) }

    // Step + timing (WASM-only)
    pub fn step(&mut self) -> StepInfo {
        let t0 = now_ms();
        let report = self.solve.step();
        let t1 = now_ms();
        StepInfo {
            substeps: report.substeps,
            compute_ms: t1 - t0,
            tau: report.tau,
            time: report.time,
        }
    }

    /// Copy of the per-vertex values; empty until the solver has produced
    /// anything. Diagnostics stay queued for [`take_diagnostics`](Self::take_diagnostics).
    pub fn get_values(&mut self) -> Vec<f32> {
        // a skipped refresh keeps the previous frame
        self.session.get_values();
        match self.session.values() {
            Some(v) => v.iter().map(|&x| x as f32).collect(),
            None => Vec::new(),
        }
    }

    pub fn get_1d_values(&self) -> Vec<f32> {
        self.solve
            .solver()
            .get_1d_values()
            .map(|v| v.iter().map(|&x| x as f32).collect())
            .unwrap_or_default()
    }

    // Mapping, for shading on the JS side
    pub fn mapping_v1(&self) -> Vec<u32> { self.mapping_column(|e| e.v1 as u32) }
    pub fn mapping_v2(&self) -> Vec<u32> { self.mapping_column(|e| e.v2 as u32) }
    pub fn mapping_lambda(&self) -> Vec<f32> { self.mapping_column(|e| e.lambda as f32) }

    // Clamps
    pub fn add_clamp(&mut self, node: i32, power: f64, live: bool) -> u32 {
        let target = usize::try_from(node).ok();
        let id = self.session.clamps().add(ClampUpdate { target, power, live });
        self.push_clamp(id)
    }

    /// Live clamp on the node nearest to a hit point on `triangle`.
    pub fn clamp_at(&mut self, triangle: usize, x: f64, y: f64, z: f64, power: f64) -> Option<u32> {
        let id = self.session.clamp_at(triangle, DVec3::new(x, y, z), power)?;
        Some(self.push_clamp(id))
    }

    pub fn set_clamp_live(&mut self, handle: u32, live: bool) -> bool {
        self.clamp_id(handle).is_some_and(|id| self.session.clamps().set_live(id, live))
    }

    pub fn toggle_clamp(&mut self, handle: u32) -> Option<bool> {
        self.session.clamps().toggle(self.clamp_id(handle)?)
    }

    pub fn set_clamp_power(&mut self, handle: u32, power: f64) -> bool {
        self.clamp_id(handle).is_some_and(|id| self.session.clamps().set_power(id, power))
    }

    pub fn set_clamp_target(&mut self, handle: u32, node: i32) -> bool {
        let target = usize::try_from(node).ok();
        self.clamp_id(handle).is_some_and(|id| self.session.clamps().set_target(id, target))
    }

    pub fn remove_clamp(&mut self, handle: u32) -> bool {
        let Some(slot) = self.clamps.get_mut(handle as usize) else {
            return false;
        };
        match slot.take() {
            Some(id) => self.session.clamps().remove(id).is_some(),
            None => false,
        }
    }

    // Contacts
    pub fn poke(&mut self, triangle: usize, value: f64) -> usize {
        self.session.press_triangle(triangle, value)
    }

    pub fn release(&mut self) -> bool {
        self.session.release()
    }

    pub fn nearest_node(&self, triangle: usize, x: f64, y: f64, z: f64) -> Option<u32> {
        self.session
            .nearest_node(triangle, DVec3::new(x, y, z))
            .map(|n| n as u32)
    }

    /// Pending diagnostics as "info: ..." / "error: ..." lines. Call once per
    /// frame; the queues hold at most 100 messages each.
    pub fn take_diagnostics(&mut self) -> Vec<String> {
        self.session
            .drain_diagnostics()
            .into_iter()
            .map(|(sev, msg)| match sev {
                Severity::Info => format!("info: {msg}"),
                Severity::Error => format!("error: {msg}"),
            })
            .collect()
    }
}

impl NeuronView {
    fn open(skeleton: SkeletonGraph, surface: SurfaceMesh) -> Result<NeuronView, JsValue> {
        let config = SessionConfig {
            visual_inflation: surface.inflation(),
            ..SessionConfig::default()
        };
        let mut session = CellSession::open(StaticSource::new(skeleton, surface), config).map_err(js_err)?;
        let solver = CableSolver::new(session.skeleton(), CableParams::default()).map_err(js_err)?;
        let solve = session.solve_loop(solver);
        Ok(NeuronView {
            session,
            solve,
            clamps: Vec::new(),
        })
    }

    fn push_clamp(&mut self, id: ClampId) -> u32 {
        self.clamps.push(Some(id));
        (self.clamps.len() - 1) as u32
    }

    fn clamp_id(&self, handle: u32) -> Option<ClampId> {
        self.clamps.get(handle as usize).copied().flatten()
    }

    fn mapping_column<T>(&self, f: impl Fn(&MappingEntry) -> T) -> Vec<T> {
        self.session
            .mapping()
            .table()
            .map(|t| t.entries().iter().map(f).collect())
            .unwrap_or_default()
    }
}

#[wasm_bindgen]
pub struct StepInfo {
    substeps: u32,
    compute_ms: f64,
    tau: f64,
    time: f64,
}

#[wasm_bindgen]
impl StepInfo {
    pub fn substeps(&self) -> u32 { self.substeps }
    pub fn compute_ms(&self) -> f64 { self.compute_ms }
    pub fn tau(&self) -> f64 { self.tau }
    pub fn time(&self) -> f64 { self.time }
}

fn skeleton_from_flat(name: &str, node_xyz: &[f64], edges: &[u32], diameters: Vec<f64>) -> Result<SkeletonGraph, MapError> {
    if edges.len() % 2 != 0 {
        return Err(MapError::invalid(format!("edge buffer length {} is not even", edges.len())));
    }
    let edges = edges.chunks_exact(2).map(|e| (e[0] as usize, e[1] as usize)).collect();
    SkeletonGraph::new(name, 0, points(node_xyz)?, edges)?.with_diameters(diameters)
}

fn points(xyz: &[f64]) -> Result<Vec<DVec3>, MapError> {
    if xyz.len() % 3 != 0 {
        return Err(MapError::invalid(format!("position buffer length {} is not a multiple of 3", xyz.len())));
    }
    Ok(xyz.chunks_exact(3).map(|c| DVec3::new(c[0], c[1], c[2])).collect())
}

fn js_err(e: MapError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn now_ms() -> f64 {
    web_sys::window()
        .and_then(|w| w.performance())
        .map(|p| p.now())
        .unwrap_or(0.0)
}
