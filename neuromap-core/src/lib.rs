//! Field mapping between a cell's 1D skeleton (where the solver runs) and its
//! 3D surface (where the user looks and touches).
//!
//! - [`mapper`] expresses every surface vertex between two skeleton nodes.
//! - [`propagate`] turns 1D scalars into per-vertex display values.
//! - [`inject`] and [`clamp`] fold surface interaction back onto nodes.
//! - [`session`] wires both execution contexts together.

pub mod clamp;
pub mod diag;
pub mod error;
pub mod grid;
pub mod inject;
pub mod mapper;
pub mod propagate;
pub mod session;
pub mod solver;
pub mod synth;

pub use clamp::{Clamp, ClampId, ClampRegistry, ClampUpdate};
pub use diag::{Diagnostics, DiagnosticsSink, FlushReport};
pub use error::{MapError, MapResult};
pub use grid::{SkeletonGraph, SurfaceMesh};
pub use inject::{ContactEvent, ContactSender, InjectionStage, InteractionInjector, NodeValue, SurfaceContact};
pub use mapper::{MapKey, MapState, Mapper, MapperConfig, MappingEntry, MappingTable};
pub use propagate::FieldPropagator;
pub use session::{CellSession, GeometrySource, SessionConfig, SessionInfo, SolveLoop, StaticSource};
pub use solver::{CableParams, CableSolver, InjectionMode, ScalarSolver, SharedScalars, StepReport};
