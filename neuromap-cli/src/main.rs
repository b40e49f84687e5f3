mod logger;
mod morph;
mod scenario;

use clap::Parser;
use morph::{MorphType, generate_skeleton, sample_morph_type};
use neuromap_core::synth::TubeSource;
use neuromap_core::{CableParams, CableSolver, CellSession, InjectionMode, ScalarSolver, SessionConfig};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use scenario::{Scenario, ScenarioPlayer};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output directory
    #[arg(long)]
    out: PathBuf,

    /// Cell name used for the skeleton and surface
    #[arg(long, default_value = "synthetic")]
    cell: String,

    /// Morphology (chain|star|arbor); sampled from the seed when omitted
    #[arg(long)]
    morph: Option<String>,

    /// Coarse skeleton node count
    #[arg(long, default_value_t = 24)]
    nodes: usize,

    /// Skeleton refinement level (each edge split into 2^level pieces)
    #[arg(long, default_value_t = 0)]
    refinement: u32,

    /// Visual inflation of the surface, clamped to [1, 5]
    #[arg(long, default_value_t = 1.0)]
    inflation: f64,

    /// Vertices per tube ring
    #[arg(long, default_value_t = 8)]
    ring: usize,

    /// Rings per skeleton edge
    #[arg(long, default_value_t = 3)]
    stations: usize,

    /// Mapper offset tolerance in inflated radii
    #[arg(long, default_value_t = 3.0)]
    max_offset: f64,

    /// Solve steps to run on the worker thread
    #[arg(long, default_value_t = 2000)]
    steps: u64,

    /// Wall-clock pause after every solve step, in microseconds
    #[arg(long, default_value_t = 200)]
    step_delay_us: u64,

    /// Number of 3D frames to record
    #[arg(long, default_value_t = 50)]
    frames: u64,

    /// Simulated time per solve step
    #[arg(long, default_value_t = 0.05)]
    tau: f64,

    /// Axial diffusivity
    #[arg(long, default_value_t = 1.0)]
    diffusivity: f64,

    /// Membrane time constant
    #[arg(long, default_value_t = 10.0)]
    membrane_tau: f64,

    /// Injection mode for clamps and pokes (set|add)
    #[arg(long, default_value = "set")]
    mode: String,

    /// JSON file with scripted clamps and pokes; random when omitted
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Log level (error|warn|info|debug|trace); falls back to RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Base RNG seed (reproducibility)
    #[arg(long, default_value_t = 123)]
    seed: u64,
}

#[derive(Serialize)]
struct MetaRow {
    frame_idx: u64,
    solve_step: u64,
    sim_time: f64,

    live_clamps: usize,
    contact: bool,

    min: f64,
    max: f64,
    mean: f64,

    diag_info: usize,
    diag_error: usize,
    diag_dropped: usize,
}

#[derive(Serialize)]
struct RunInfo<'a> {
    seed: u64,
    morph: &'a str,
    mode: &'a str,
    dt_max: f64,
    tau: f64,
    #[serde(flatten)]
    session: neuromap_core::SessionInfo,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logger::init_logging(args.log_level.as_deref());

    if args.steps == 0 || args.frames == 0 {
        return Err("steps and frames must be > 0".into());
    }
    if args.nodes < 2 {
        return Err("nodes must be >= 2".into());
    }
    let mode = match args.mode.as_str() {
        "set" => InjectionMode::Set,
        "add" => InjectionMode::Add,
        other => return Err(format!("unknown mode '{other}' (expected set|add)").into()),
    };

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let morph = match args.morph.as_deref() {
        Some(m) => MorphType::parse(m).ok_or_else(|| format!("unknown morph '{m}'"))?,
        None => sample_morph_type(&mut rng),
    };
    let coarse = generate_skeleton(&mut rng, &args.cell, args.nodes, morph)?;

    // Session (display side)
    let mut config = SessionConfig {
        refinement: args.refinement,
        visual_inflation: args.inflation,
        ..SessionConfig::default()
    };
    config.mapper.set_max_offset_factor(args.max_offset);
    let mut session = CellSession::open(TubeSource::new(coarse, args.ring, args.stations), config)?;
    let info = session.info();

    // Solver (solve side)
    let mut params = CableParams::default();
    params.set_tau(args.tau);
    params.set_diffusivity(args.diffusivity);
    params.set_membrane_tau(args.membrane_tau);
    let solver = CableSolver::new(session.skeleton(), params)?.with_mode(mode);
    let dt_max = solver.dt_max();
    let mut solve = session.solve_loop(solver);

    let scenario = match &args.scenario {
        Some(path) => Scenario::load(path)?,
        None => Scenario::random(&mut rng, info.nodes, info.triangles, args.steps),
    };
    let mut player = ScenarioPlayer::new(scenario, session.clamps());

    fs::create_dir_all(&args.out)?;

    let mut mapping_file = BufWriter::new(File::create(args.out.join("mapping.jsonl"))?);
    if let Some(table) = session.mapping().table() {
        for entry in table.entries() {
            serde_json::to_writer(&mut mapping_file, entry)?;
            mapping_file.write_all(b"\n")?;
        }
    }
    mapping_file.flush()?;

    let run_info = RunInfo {
        seed: args.seed,
        morph: morph.as_str(),
        mode: &args.mode,
        dt_max,
        tau: params.tau,
        session: info,
    };
    fs::write(args.out.join("session.json"), serde_json::to_vec_pretty(&run_info)?)?;

    let mut values_writer = BufWriter::new(File::create(args.out.join("values3d.bin"))?);
    let mut meta_file = BufWriter::new(File::create(args.out.join("meta.jsonl"))?);

    let steps = args.steps;
    let delay = Duration::from_micros(args.step_delay_us);
    let handle = thread::Builder::new().name("solve".into()).spawn(move || {
        for _ in 0..steps {
            solve.step();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
        solve.into_solver()
    })?;

    let stride = (steps / args.frames).max(1);
    let mut next_frame = stride;
    let mut frame_idx: u64 = 0;
    let mut diag_totals = (0usize, 0usize, 0usize);

    // Display loop: poll the snapshot, fire due cues, record frames.
    loop {
        let done = handle.is_finished();
        let step = session.shared().generation();
        player.advance(step, &session);

        let report = session.flush_diagnostics();
        diag_totals.0 += report.info;
        diag_totals.1 += report.error;
        diag_totals.2 += report.dropped;

        if step >= next_frame || done {
            let live_clamps = session.clamps().snapshot().iter().filter(|c| c.live).count();
            let contact = player.pressed();
            if let Some(values) = session.get_values() {
                write_f32_vec(&mut values_writer, values)?;
                let (min, max, mean) = summarize(values);
                let row = MetaRow {
                    frame_idx,
                    solve_step: step,
                    sim_time: step as f64 * params.tau,
                    live_clamps,
                    contact,
                    min,
                    max,
                    mean,
                    diag_info: report.info,
                    diag_error: report.error,
                    diag_dropped: report.dropped,
                };
                serde_json::to_writer(&mut meta_file, &row)?;
                meta_file.write_all(b"\n")?;
                frame_idx += 1;
            }
            next_frame = step + stride;
        }

        if done {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let solver = handle.join().map_err(|_| "solve thread panicked")?;
    let report = session.flush_diagnostics();
    diag_totals.0 += report.info;
    diag_totals.1 += report.error;
    diag_totals.2 += report.dropped;

    values_writer.flush()?;
    meta_file.flush()?;

    if !player.finished() {
        log::warn!("run ended before every scenario cue fired");
    }

    println!("Wrote frames to: {}", args.out.display());
    println!(
        "Cell '{}' ({}): {} nodes, {} vertices, {} triangles",
        args.cell,
        morph.as_str(),
        session.skeleton().len(),
        session.surface().len(),
        session.surface().triangle_count()
    );
    println!(
        "Frames: {} (steps={} stride={}), t_end={:.3}, dt_max={:.4e}",
        frame_idx,
        steps,
        stride,
        solver.time(),
        dt_max
    );
    if let Some(v0) = solver.get_1d_value(0) {
        println!("Node 0 final value: {v0:.4}");
    }
    println!(
        "Diagnostics: {} info, {} error, {} dropped",
        diag_totals.0, diag_totals.1, diag_totals.2
    );

    Ok(())
}

fn write_f32_vec<W: Write>(w: &mut W, v: &[f64]) -> std::io::Result<()> {
    for &x in v {
        w.write_all(&(x as f32).to_le_bytes())?;
    }
    Ok(())
}

fn summarize(v: &[f64]) -> (f64, f64, f64) {
    if v.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    for &x in v {
        min = min.min(x);
        max = max.max(x);
        sum += x;
    }
    (min, max, sum / v.len() as f64)
}
