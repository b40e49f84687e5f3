//! Wiring: loads a geometry pair, builds the mapping and hands out the two
//! halves that run in different execution contexts.
//!
//! [`CellSession`] lives on the display/interactive side. It owns the field
//! propagator, the interaction injector and the diagnostics sink. A
//! [`SolveLoop`] owns the solver and the injection stage and can be moved to
//! a worker thread. They share the clamp registry, the 1D snapshot and two
//! channels (contacts, diagnostics); nothing is reached through globals.

use std::sync::Arc;

use glam::DVec3;
use serde::Serialize;

use crate::clamp::{ClampId, ClampRegistry, ClampUpdate};
use crate::diag::{self, Diagnostics, DiagnosticsSink, FlushReport};
use crate::error::{MapError, MapResult};
use crate::grid::{SkeletonGraph, SurfaceMesh};
use crate::inject::{ContactSender, InjectionStage, InteractionInjector, SurfaceContact, contact_channel};
use crate::mapper::{MapState, Mapper, MapperConfig, MappingTable};
use crate::propagate::FieldPropagator;
use crate::solver::{ScalarSolver, SharedScalars, StepReport};

pub const MIN_INFLATION: f64 = 1.0;
pub const MAX_INFLATION: f64 = 5.0;

/// Where grids come from. Failures surface as [`MapError::Loader`] or any
/// other configuration error before a session exists.
pub trait GeometrySource {
    fn skeleton(&self, refinement: u32) -> MapResult<SkeletonGraph>;
    fn surface(&self, inflation: f64) -> MapResult<SurfaceMesh>;
}

/// A source holding exactly one skeleton and one surface.
#[derive(Clone, Debug)]
pub struct StaticSource {
    skeleton: SkeletonGraph,
    surface: SurfaceMesh,
}

impl StaticSource {
    pub fn new(skeleton: SkeletonGraph, surface: SurfaceMesh) -> StaticSource {
        StaticSource { skeleton, surface }
    }
}

impl GeometrySource for StaticSource {
    fn skeleton(&self, refinement: u32) -> MapResult<SkeletonGraph> {
        if refinement != self.skeleton.refinement() {
            return Err(MapError::loader(format!(
                "no skeleton at refinement {refinement} for '{}'",
                self.skeleton.name()
            )));
        }
        Ok(self.skeleton.clone())
    }

    fn surface(&self, inflation: f64) -> MapResult<SurfaceMesh> {
        if inflation != self.surface.inflation() {
            return Err(MapError::loader(format!(
                "no surface at inflation {inflation} for '{}'",
                self.surface.name()
            )));
        }
        Ok(self.surface.clone())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    pub refinement: u32,
    pub visual_inflation: f64,
    pub mapper: MapperConfig,
    pub diagnostics_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            refinement: 0,
            visual_inflation: MIN_INFLATION,
            mapper: MapperConfig::default(),
            diagnostics_capacity: diag::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionInfo {
    pub cell: String,
    pub refinement: u32,
    pub inflation: f64,
    pub nodes: usize,
    pub skeleton_edges: usize,
    pub vertices: usize,
    pub surface_edges: usize,
    pub triangles: usize,
    pub average_radius: f64,
}

struct Mapped {
    propagator: FieldPropagator,
    injector: InteractionInjector,
}

pub struct CellSession<G: GeometrySource> {
    source: G,
    config: SessionConfig,
    skeleton: Arc<SkeletonGraph>,
    surface: Arc<SurfaceMesh>,
    mapper: Mapper,
    state: MapState,
    mapped: Option<Mapped>,
    clamps: ClampRegistry,
    contacts: ContactSender,
    shared: Arc<SharedScalars>,
    diagnostics: Diagnostics,
    sink: DiagnosticsSink,
}

impl<G: GeometrySource> CellSession<G> {
    /// Load both grids. The mapping stays unbuilt until [`build`](Self::build).
    pub fn new(source: G, mut config: SessionConfig) -> MapResult<CellSession<G>> {
        config.visual_inflation = clamp_inflation(config.visual_inflation);
        let skeleton = source.skeleton(config.refinement)?;
        let surface = source.surface(config.visual_inflation)?;
        let (diagnostics, sink) = diag::channel(config.diagnostics_capacity);
        let (contacts, _) = contact_channel();

        log::info!(
            "loaded '{}' (refinement {}, {} nodes) and '{}' ({} vertices, {} triangles)",
            skeleton.name(),
            skeleton.refinement(),
            skeleton.len(),
            surface.name(),
            surface.len(),
            surface.triangle_count()
        );

        Ok(CellSession {
            shared: Arc::new(SharedScalars::new(skeleton.len())),
            mapper: Mapper::new(config.mapper),
            source,
            config,
            skeleton: Arc::new(skeleton),
            surface: Arc::new(surface),
            state: MapState::Unbuilt,
            mapped: None,
            clamps: ClampRegistry::new(),
            contacts,
            diagnostics,
            sink,
        })
    }

    /// Load and map in one go.
    pub fn open(source: G, config: SessionConfig) -> MapResult<CellSession<G>> {
        let mut session = CellSession::new(source, config)?;
        session.build()?;
        Ok(session)
    }

    /// Build (or fetch from cache) the mapping for the current pair.
    pub fn build(&mut self) -> MapResult<Arc<MappingTable>> {
        let table = self.mapper.map(&self.skeleton, &self.surface)?;
        self.install(Arc::clone(&table));
        Ok(table)
    }

    fn install(&mut self, table: Arc<MappingTable>) {
        self.mapped = Some(Mapped {
            propagator: FieldPropagator::new(Arc::clone(&table), self.diagnostics.clone()),
            injector: InteractionInjector::new(Arc::clone(&table), self.diagnostics.clone()),
        });
        self.state = MapState::Built(table);
    }

    /// Switch to the surface at `inflation` (clamped to [1, 5]). Nothing is
    /// replaced unless the new pair maps cleanly. Returns whether it changed.
    pub fn set_visual_inflation(&mut self, inflation: f64) -> MapResult<bool> {
        let inflation = clamp_inflation(inflation);
        if inflation == self.config.visual_inflation {
            return Ok(false);
        }
        let surface = self.source.surface(inflation)?;
        let table = self.mapper.map(&self.skeleton, &surface)?;

        self.surface = Arc::new(surface);
        self.config.visual_inflation = inflation;
        self.install(table);
        log::info!("visual inflation set to {inflation}");
        Ok(true)
    }

    /// Switch to the skeleton at refinement `level`. The skeleton, table, 1D
    /// snapshot and interaction pieces are swapped together, and only once
    /// the new pair maps cleanly. Returns whether it changed.
    ///
    /// The node count changes with the level, so any existing [`SolveLoop`]
    /// is detached: it publishes into the old snapshot and gets no further
    /// contacts. Build a new one with [`solve_loop`](Self::solve_loop). Clamps
    /// keep their node indices; targets past the new node count are skipped.
    pub fn set_refinement(&mut self, level: u32) -> MapResult<bool> {
        if level == self.config.refinement {
            return Ok(false);
        }
        let skeleton = self.source.skeleton(level)?;
        let table = self.mapper.map(&skeleton, &self.surface)?;

        self.shared = Arc::new(SharedScalars::new(skeleton.len()));
        self.skeleton = Arc::new(skeleton);
        self.config.refinement = level;
        self.install(table);
        // presses fail until the caller attaches a new solve loop
        let (contacts, _) = contact_channel();
        self.contacts = contacts;
        log::info!(
            "refinement set to {level} ({} skeleton nodes)",
            self.skeleton.len()
        );
        Ok(true)
    }

    pub fn refinement(&self) -> u32 {
        self.config.refinement
    }

    /// Build the solve half around `solver`. Contacts go to the newest loop;
    /// older loops stop receiving them.
    pub fn solve_loop<S: ScalarSolver>(&mut self, solver: S) -> SolveLoop<S> {
        let (tx, rx) = contact_channel();
        self.contacts = tx;
        SolveLoop {
            solver,
            stage: InjectionStage::new(self.clamps.clone(), rx, self.skeleton.len(), self.diagnostics.clone()),
            shared: Arc::clone(&self.shared),
            steps: 0,
        }
    }

    // ---- Display side ----

    /// Refresh the 3D values from the latest 1D snapshot. `None` means no
    /// update this frame; the previous values stay available via [`values`](Self::values).
    pub fn get_values(&mut self) -> Option<&[f64]> {
        let shared = &self.shared;
        self.mapped.as_mut()?.propagator.propagate_shared(shared)
    }

    pub fn values(&self) -> Option<&[f64]> {
        self.mapped.as_ref()?.propagator.values()
    }

    /// Resolve a contact onto skeleton nodes and hold it until released.
    /// Returns the number of node pairs sent.
    pub fn press(&self, contact: &SurfaceContact) -> usize {
        let Some(mapped) = self.mapped.as_ref() else {
            return 0;
        };
        let pairs = mapped.injector.project(contact);
        let n = pairs.len();
        if self.contacts.press(pairs) { n } else { 0 }
    }

    pub fn press_triangle(&self, triangle: usize, value: f64) -> usize {
        match SurfaceContact::from_mesh(&self.surface, triangle, value) {
            Some(contact) => self.press(&contact),
            None => {
                log::warn!("contact on unknown triangle {triangle} ignored");
                0
            }
        }
    }

    pub fn release(&self) -> bool {
        self.contacts.release()
    }

    /// Skeleton node nearest to a hit point on `triangle`.
    pub fn nearest_node(&self, triangle: usize, point: DVec3) -> Option<usize> {
        let vertices = self.surface.triangle(triangle)?;
        self.mapped
            .as_ref()?
            .injector
            .nearest_node(&self.skeleton, vertices, point)
    }

    /// Place a live clamp on the node nearest to a hit point.
    pub fn clamp_at(&self, triangle: usize, point: DVec3, power: f64) -> Option<ClampId> {
        let node = self.nearest_node(triangle, point)?;
        Some(self.clamps.add(ClampUpdate {
            target: Some(node),
            power,
            live: true,
        }))
    }

    pub fn clamps(&self) -> &ClampRegistry {
        &self.clamps
    }

    pub fn contacts(&self) -> &ContactSender {
        &self.contacts
    }

    /// Producer handle for other code that wants to report through the
    /// display context.
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.clone()
    }

    pub fn flush_diagnostics(&self) -> FlushReport {
        self.sink.flush()
    }

    pub fn drain_diagnostics(&self) -> Vec<(diag::Severity, String)> {
        self.sink.drain()
    }

    // ---- Accessors ----

    pub fn mapping(&self) -> &MapState {
        &self.state
    }

    pub fn mapper(&self) -> &Mapper {
        &self.mapper
    }

    pub fn skeleton(&self) -> &Arc<SkeletonGraph> {
        &self.skeleton
    }

    pub fn surface(&self) -> &Arc<SurfaceMesh> {
        &self.surface
    }

    pub fn shared(&self) -> &Arc<SharedScalars> {
        &self.shared
    }

    pub fn visual_inflation(&self) -> f64 {
        self.config.visual_inflation
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            cell: self.skeleton.name().to_string(),
            refinement: self.skeleton.refinement(),
            inflation: self.surface.inflation(),
            nodes: self.skeleton.len(),
            skeleton_edges: self.skeleton.edge_count(),
            vertices: self.surface.len(),
            surface_edges: self.surface.edge_count(),
            triangles: self.surface.triangle_count(),
            average_radius: self.skeleton.average_radius().unwrap_or(0.0),
        }
    }
}

fn clamp_inflation(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(MIN_INFLATION, MAX_INFLATION)
    } else {
        MIN_INFLATION
    }
}

/// Solve half: advance, inject, publish. Runs to completion; there is no
/// cancellation.
pub struct SolveLoop<S: ScalarSolver> {
    solver: S,
    stage: InjectionStage,
    shared: Arc<SharedScalars>,
    steps: u64,
}

impl<S: ScalarSolver> SolveLoop<S> {
    pub fn step(&mut self) -> StepReport {
        let report = self.solver.advance();
        self.stage.apply(&mut self.solver);
        if let Some(values) = self.solver.get_1d_values() {
            self.shared.publish(values);
        }
        self.steps += 1;
        report
    }

    /// Run `steps` steps and hand the solver back.
    pub fn run(mut self, steps: u64) -> S {
        for _ in 0..steps {
            self.step();
        }
        self.solver
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn solver(&self) -> &S {
        &self.solver
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    pub fn into_solver(self) -> S {
        self.solver
    }
}
