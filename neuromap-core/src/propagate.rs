//! 1D → 3D scalar propagation for display.

use std::sync::Arc;

use crate::diag::{Diagnostics, OnceFlag};
use crate::mapper::MappingTable;
use crate::solver::SharedScalars;

/// Turns a skeleton scalar buffer into one value per surface vertex.
///
/// Both buffers are allocated up front; each refresh only overwrites them.
pub struct FieldPropagator {
    table: Arc<MappingTable>,
    diagnostics: Diagnostics,
    scalars3d: Vec<f64>,
    scratch1d: Vec<f64>,
    has_values: bool,
    short_buffer: OnceFlag,
}

impl FieldPropagator {
    pub fn new(table: Arc<MappingTable>, diagnostics: Diagnostics) -> FieldPropagator {
        let out_of_range = table.out_of_range();
        if out_of_range > 0 {
            diagnostics.error(format!(
                "{out_of_range} mapping entries have lambda outside [0, 1]; extrapolating"
            ));
        }
        FieldPropagator {
            scalars3d: vec![0.0; table.len()],
            scratch1d: Vec::with_capacity(table.skeleton_len()),
            table,
            diagnostics,
            has_values: false,
            short_buffer: OnceFlag::new(),
        }
    }

    pub fn table(&self) -> &Arc<MappingTable> {
        &self.table
    }

    pub fn len(&self) -> usize {
        self.scalars3d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scalars3d.is_empty()
    }

    /// Last propagated values, `None` before the first successful refresh.
    pub fn values(&self) -> Option<&[f64]> {
        self.has_values.then_some(self.scalars3d.as_slice())
    }

    /// Interpolate `scalars1d` onto every surface vertex.
    ///
    /// Returns `None` without touching the previous frame when the solver has
    /// nothing yet or hands over fewer values than the skeleton has nodes.
    pub fn propagate(&mut self, scalars1d: Option<&[f64]>) -> Option<&[f64]> {
        let s1 = scalars1d?;
        if !self.fill(s1) {
            return None;
        }
        Some(self.scalars3d.as_slice())
    }

    /// Same as [`propagate`](Self::propagate), reading the shared snapshot.
    pub fn propagate_shared(&mut self, shared: &SharedScalars) -> Option<&[f64]> {
        let mut scratch = std::mem::take(&mut self.scratch1d);
        let ok = shared.snapshot_into(&mut scratch) && self.fill(&scratch);
        self.scratch1d = scratch;
        ok.then_some(self.scalars3d.as_slice())
    }

    fn fill(&mut self, s1: &[f64]) -> bool {
        if s1.len() < self.table.skeleton_len() {
            if self.short_buffer.first() {
                self.diagnostics.error(format!(
                    "1D buffer has {} values, mapping needs {}; frame skipped",
                    s1.len(),
                    self.table.skeleton_len()
                ));
            }
            return false;
        }
        for (out, e) in self.scalars3d.iter_mut().zip(self.table.entries()) {
            *out = e.interpolate(s1);
        }
        self.has_values = true;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag;
    use crate::mapper::MappingEntry;
    use approx::assert_relative_eq;

    fn propagator(entries: Vec<MappingEntry>, n1: usize) -> (FieldPropagator, diag::DiagnosticsSink) {
        let (d, sink) = diag::channel(8);
        let table = Arc::new(MappingTable::from_entries(entries, n1).unwrap());
        (FieldPropagator::new(table, d), sink)
    }

    #[test]
    fn interpolates_between_nodes() {
        let (mut p, _sink) = propagator(vec![MappingEntry::new(0, 1, 0.25), MappingEntry::new(1, 2, 1.0)], 3);
        let out = p.propagate(Some(&[10.0, 20.0, 30.0])).unwrap();
        assert_relative_eq!(out[0], 12.5);
        assert_relative_eq!(out[1], 30.0);
    }

    #[test]
    fn out_of_range_lambda_extrapolates_and_reports() {
        let (mut p, sink) = propagator(vec![MappingEntry::new(0, 1, 1.5), MappingEntry::new(0, 1, -0.5)], 2);
        let out = p.propagate(Some(&[0.0, 2.0])).unwrap();
        assert_relative_eq!(out[0], 3.0);
        assert_relative_eq!(out[1], -1.0);
        assert_eq!(sink.drain().len(), 1);
    }

    #[test]
    fn missing_buffer_keeps_last_frame() {
        let (mut p, _sink) = propagator(vec![MappingEntry::new(0, 1, 0.5)], 2);
        assert!(p.values().is_none());
        assert!(p.propagate(None).is_none());
        p.propagate(Some(&[0.0, 4.0]));
        assert!(p.propagate(None).is_none());
        assert_eq!(p.values(), Some(&[2.0][..]));
    }

    #[test]
    fn short_buffer_is_skipped_and_reported_once() {
        let (mut p, sink) = propagator(vec![MappingEntry::new(0, 2, 0.5)], 3);
        assert!(p.propagate(Some(&[1.0, 2.0])).is_none());
        assert!(p.propagate(Some(&[1.0])).is_none());
        assert_eq!(sink.drain().len(), 1);
        assert!(p.values().is_none());
    }

    #[test]
    fn shared_snapshot_reuses_buffers() {
        let (mut p, _sink) = propagator(vec![MappingEntry::new(0, 1, 0.5), MappingEntry::at_node(1)], 2);
        let shared = SharedScalars::new(2);
        assert!(p.propagate_shared(&shared).is_none());

        shared.publish(&[2.0, 6.0]);
        assert_eq!(p.propagate_shared(&shared).unwrap(), &[4.0, 6.0]);
        let cap = p.scratch1d.capacity();
        shared.publish(&[0.0, 0.0]);
        assert_eq!(p.propagate_shared(&shared).unwrap(), &[0.0, 0.0]);
        assert_eq!(p.scratch1d.capacity(), cap);
    }
}
