use std::thread;

use neuromap_core::synth::{TubeSource, star_skeleton};
use neuromap_core::{CableParams, CableSolver, CellSession, ClampUpdate, ScalarSolver, SessionConfig};

#[test]
fn worker_solve_feeds_display_values() {
    let skeleton = star_skeleton("star", 4, 1.0, 0.3).unwrap();
    let mut session = CellSession::open(TubeSource::new(skeleton, 6, 2), SessionConfig::default()).unwrap();

    session.clamps().add(ClampUpdate {
        target: Some(0),
        power: 30.0,
        live: true,
    });
    let solver = CableSolver::new(session.skeleton(), CableParams::default()).unwrap();
    let solve = session.solve_loop(solver);
    let handle = thread::spawn(move || solve.run(200));

    while !handle.is_finished() {
        session.get_values();
        session.flush_diagnostics();
        thread::yield_now();
    }
    let solver = handle.join().unwrap();
    assert_eq!(solver.get_1d_value(0), Some(30.0));

    let values = session.get_values().unwrap().to_vec();
    assert_eq!(values.len(), session.surface().len());
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    assert!(max > min, "clamp should leave a gradient, got {min}..{max}");
    assert!(max <= 30.0 + 1e-9);
}
