//! Solver seam: what the core needs from a 1D integrator, plus a small
//! reference cable solver used by the CLI, the wasm build and the tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::{MapError, MapResult};
use crate::grid::SkeletonGraph;
use crate::inject::NodeValue;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepReport {
    /// Substeps the integrator took to cover `tau`.
    pub substeps: u32,
    pub tau: f64,
    /// Simulated time after the step.
    pub time: f64,
}

/// A numerical solver over the skeleton's nodes.
///
/// The core reads the whole buffer for display and writes targeted
/// `(node, value)` pairs after each advance. What a pair means (set or add)
/// is up to the implementation.
pub trait ScalarSolver: Send {
    fn advance(&mut self) -> StepReport;

    /// Whole 1D buffer, `None` until the solver has produced one.
    fn get_1d_values(&self) -> Option<&[f64]>;

    fn set_1d_values(&mut self, pairs: &[NodeValue]);

    fn get_1d_value(&self, node: usize) -> Option<f64> {
        self.get_1d_values()?.get(node).copied()
    }
}

/// 1D snapshot shared between the solve and display contexts.
///
/// Each value is stored as atomic bits: a reader never sees half of an f64,
/// but may see a mix of values from consecutive publishes.
#[derive(Debug)]
pub struct SharedScalars {
    values: Box<[AtomicU64]>,
    ready: AtomicBool,
    generation: AtomicU64,
}

impl SharedScalars {
    pub fn new(len: usize) -> SharedScalars {
        SharedScalars {
            values: (0..len).map(|_| AtomicU64::new(0)).collect(),
            ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Number of publishes so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn publish(&self, src: &[f64]) {
        for (slot, v) in self.values.iter().zip(src) {
            slot.store(v.to_bits(), Ordering::Relaxed);
        }
        self.generation.fetch_add(1, Ordering::Release);
        self.ready.store(true, Ordering::Release);
    }

    /// Copy the current values into `out`, reusing its allocation.
    /// Returns false (and leaves `out` alone) before the first publish.
    pub fn snapshot_into(&self, out: &mut Vec<f64>) -> bool {
        if !self.is_ready() {
            return false;
        }
        out.clear();
        out.extend(self.values.iter().map(|v| f64::from_bits(v.load(Ordering::Relaxed))));
        true
    }
}

// ---- Reference cable solver ----

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InjectionMode {
    /// Pairs overwrite the node value (voltage clamp).
    #[default]
    Set,
    /// Pairs are added onto the node value (current injection).
    Add,
}

#[derive(Clone, Copy, Debug)]
pub struct CableParams {
    pub diffusivity: f64,
    pub membrane_tau: f64,
    pub resting: f64,
    /// Simulated time covered by one `advance`.
    pub tau: f64,
    /// Fraction of the explicit stability limit used per substep.
    pub safety: f64,
}

impl Default for CableParams {
    fn default() -> Self {
        CableParams {
            diffusivity: 1.0,
            membrane_tau: 10.0,
            resting: -70.0,
            tau: 0.05,
            safety: 0.8,
        }
    }
}

impl CableParams {
    pub fn set_diffusivity(&mut self, d: f64) {
        self.diffusivity = d.max(1e-8);
    }

    pub fn set_membrane_tau(&mut self, t: f64) {
        self.membrane_tau = t.max(1e-6);
    }

    pub fn set_tau(&mut self, t: f64) {
        self.tau = t.max(1e-9);
    }

    pub fn set_safety(&mut self, s: f64) {
        self.safety = s.clamp(0.05, 0.99);
    }
}

/// Passive cable equation on the skeleton graph, explicit Euler:
/// `dv/dt = D * sum_j (v_j - v_i) / len_ij^2 - (v_i - v_rest) / tau_m`.
pub struct CableSolver {
    params: CableParams,
    mode: InjectionMode,
    // (neighbor, 1/len^2)
    weights: Vec<Vec<(usize, f64)>>,
    max_weight: f64,
    field: Vec<f64>,
    next: Vec<f64>,
    time: f64,
    produced: bool,
}

impl CableSolver {
    pub fn new(skeleton: &SkeletonGraph, params: CableParams) -> MapResult<CableSolver> {
        if skeleton.is_empty() {
            return Err(MapError::invalid("cable solver needs at least one node"));
        }
        let pos = skeleton.positions();
        let mut weights = vec![Vec::new(); skeleton.len()];
        for (i, w) in weights.iter_mut().enumerate() {
            for &j in skeleton.neighbors(i) {
                let len2 = pos[i].distance_squared(pos[j]);
                if len2 <= f64::EPSILON {
                    return Err(MapError::invalid(format!("skeleton edge ({i}, {j}) has zero length")));
                }
                w.push((j, 1.0 / len2));
            }
        }
        let max_weight = weights
            .iter()
            .map(|w| w.iter().map(|(_, k)| k).sum::<f64>())
            .fold(0.0, f64::max);

        let n = skeleton.len();
        Ok(CableSolver {
            params,
            mode: InjectionMode::default(),
            weights,
            max_weight,
            field: vec![params.resting; n],
            next: vec![params.resting; n],
            time: 0.0,
            produced: false,
        })
    }

    pub fn with_mode(mut self, mode: InjectionMode) -> CableSolver {
        self.mode = mode;
        self
    }

    pub fn params(&self) -> &CableParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut CableParams {
        &mut self.params
    }

    pub fn len(&self) -> usize {
        self.field.len()
    }

    pub fn is_empty(&self) -> bool {
        self.field.is_empty()
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Largest stable explicit step.
    pub fn dt_max(&self) -> f64 {
        1.0 / (self.params.diffusivity * self.max_weight + 1.0 / self.params.membrane_tau)
    }

    pub fn clear(&mut self) {
        self.field.fill(self.params.resting);
        self.next.fill(self.params.resting);
        self.time = 0.0;
    }

    /// Overwrite the state; extra values are ignored, missing ones keep theirs.
    pub fn set_initial(&mut self, values: &[f64]) {
        for (f, v) in self.field.iter_mut().zip(values) {
            *f = *v;
        }
        self.produced = true;
    }

    fn explicit_step(&mut self, dt: f64) {
        let d = self.params.diffusivity;
        let leak = 1.0 / self.params.membrane_tau;
        let rest = self.params.resting;

        for (i, w) in self.weights.iter().enumerate() {
            let u = self.field[i];
            let lap: f64 = w.iter().map(|&(j, k)| k * (self.field[j] - u)).sum();
            self.next[i] = u + dt * (d * lap - leak * (u - rest));
        }
        std::mem::swap(&mut self.field, &mut self.next);
    }
}

impl ScalarSolver for CableSolver {
    fn advance(&mut self) -> StepReport {
        let dt = self.params.safety * self.dt_max();
        let tau = self.params.tau;
        let k = ((tau / dt).ceil() as u32).max(1);
        let dt_prime = tau / k as f64;

        for _ in 0..k {
            self.explicit_step(dt_prime);
        }
        self.time += tau;
        self.produced = true;

        StepReport {
            substeps: k,
            tau,
            time: self.time,
        }
    }

    fn get_1d_values(&self) -> Option<&[f64]> {
        self.produced.then_some(self.field.as_slice())
    }

    fn set_1d_values(&mut self, pairs: &[NodeValue]) {
        for p in pairs {
            let Some(slot) = self.field.get_mut(p.node) else {
                continue;
            };
            match self.mode {
                InjectionMode::Set => *slot = p.value,
                InjectionMode::Add => *slot += p.value,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::DVec3;

    fn line(n: usize) -> SkeletonGraph {
        let positions = (0..n).map(|i| DVec3::new(i as f64, 0.0, 0.0)).collect();
        let edges = (1..n).map(|i| (i - 1, i)).collect();
        SkeletonGraph::new("line", 0, positions, edges).unwrap()
    }

    #[test]
    fn buffer_is_absent_until_first_advance() {
        let mut s = CableSolver::new(&line(4), CableParams::default()).unwrap();
        assert!(s.get_1d_values().is_none());
        assert_eq!(s.get_1d_value(0), None);
        let report = s.advance();
        assert!(report.substeps >= 1);
        assert_relative_eq!(report.time, CableParams::default().tau);
        assert_eq!(s.get_1d_values().unwrap().len(), 4);
    }

    #[test]
    fn resting_state_is_steady() {
        let mut s = CableSolver::new(&line(5), CableParams::default()).unwrap();
        for _ in 0..20 {
            s.advance();
        }
        for v in s.get_1d_values().unwrap() {
            assert_relative_eq!(*v, -70.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn clamped_node_spreads_to_neighbors() {
        let mut s = CableSolver::new(&line(5), CableParams::default()).unwrap();
        for _ in 0..50 {
            s.advance();
            s.set_1d_values(&[NodeValue::new(0, 40.0)]);
        }
        let v = s.get_1d_values().unwrap();
        assert_eq!(v[0], 40.0);
        assert!(v[1] > v[2] && v[2] > v[3] && v[3] > -70.0);
    }

    #[test]
    fn add_mode_accumulates_and_ignores_bad_nodes() {
        let mut s = CableSolver::new(&line(3), CableParams::default())
            .unwrap()
            .with_mode(InjectionMode::Add);
        s.set_initial(&[0.0, 0.0, 0.0]);
        s.set_1d_values(&[NodeValue::new(1, 2.0), NodeValue::new(1, 3.0), NodeValue::new(9, 1.0)]);
        assert_eq!(s.get_1d_values().unwrap(), &[0.0, 5.0, 0.0]);
    }

    #[test]
    fn substeps_respect_the_stability_limit() {
        let mut params = CableParams::default();
        params.set_tau(1.0);
        let mut s = CableSolver::new(&line(10), params).unwrap();
        let report = s.advance();
        assert!(report.tau / report.substeps as f64 <= s.dt_max());
    }

    #[test]
    fn shared_scalars_wait_for_first_publish() {
        let shared = SharedScalars::new(3);
        let mut out = vec![9.0];
        assert!(!shared.snapshot_into(&mut out));
        assert_eq!(out, vec![9.0]);

        shared.publish(&[1.0, 2.0, 3.0]);
        assert!(shared.snapshot_into(&mut out));
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
        assert_eq!(shared.generation(), 1);
    }
}
