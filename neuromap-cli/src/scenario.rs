//! Scripted interaction: clamps that switch on and off and surface pokes,
//! keyed on the solve step the display loop observes.

use neuromap_core::{CellSession, ClampId, ClampRegistry, ClampUpdate, GeometrySource};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

fn yes() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClampCue {
    /// `None` leaves the clamp unfocused.
    pub node: Option<usize>,
    pub power: f64,
    #[serde(default = "yes")]
    pub live: bool,
    /// Steps at which the clamp flips its live flag.
    #[serde(default)]
    pub toggle_at: Vec<u64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PokeCue {
    pub triangle: usize,
    pub value: f64,
    pub from_step: u64,
    pub until_step: u64,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Scenario {
    #[serde(default)]
    pub clamps: Vec<ClampCue>,
    #[serde(default)]
    pub pokes: Vec<PokeCue>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Scenario, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_json::from_str(&text)?;
        for p in &scenario.pokes {
            if p.until_step < p.from_step {
                return Err(format!("poke on triangle {} ends before it starts", p.triangle).into());
            }
        }
        Ok(scenario)
    }

    /// A soma clamp that is live throughout, a second clamp switched on
    /// halfway, and one poke over the second quarter of the run.
    pub fn random<R: Rng>(rng: &mut R, nodes: usize, triangles: usize, steps: u64) -> Scenario {
        let mut clamps = vec![ClampCue {
            node: Some(0),
            power: rng.gen_range(-20.0..40.0),
            live: true,
            toggle_at: Vec::new(),
        }];
        if nodes > 1 {
            clamps.push(ClampCue {
                node: Some(rng.gen_range(1..nodes)),
                power: rng.gen_range(-90.0..-60.0),
                live: false,
                toggle_at: vec![steps / 2],
            });
        }

        let pokes = if triangles > 0 {
            vec![PokeCue {
                triangle: rng.gen_range(0..triangles),
                value: rng.gen_range(0.0..50.0),
                from_step: steps / 4,
                until_step: steps / 2,
            }]
        } else {
            Vec::new()
        };

        Scenario { clamps, pokes }
    }
}

#[derive(Clone, Copy, Debug)]
enum Cue {
    Toggle(usize),
    Press(usize),
    Release,
}

/// Plays a [`Scenario`] against a session as solve steps go by.
pub struct ScenarioPlayer {
    scenario: Scenario,
    ids: Vec<ClampId>,
    // sorted by step, ties in insertion order
    cues: Vec<(u64, Cue)>,
    next: usize,
    pressed: bool,
}

impl ScenarioPlayer {
    /// Registers every clamp up front.
    pub fn new(scenario: Scenario, clamps: &ClampRegistry) -> ScenarioPlayer {
        let ids = scenario
            .clamps
            .iter()
            .map(|c| {
                clamps.add(ClampUpdate {
                    target: c.node,
                    power: c.power,
                    live: c.live,
                })
            })
            .collect();

        let mut cues = Vec::new();
        for (i, c) in scenario.clamps.iter().enumerate() {
            cues.extend(c.toggle_at.iter().map(|&s| (s, Cue::Toggle(i))));
        }
        for (i, p) in scenario.pokes.iter().enumerate() {
            cues.push((p.from_step, Cue::Press(i)));
            cues.push((p.until_step, Cue::Release));
        }
        cues.sort_by_key(|&(s, _)| s);

        ScenarioPlayer {
            scenario,
            ids,
            cues,
            next: 0,
            pressed: false,
        }
    }

    /// Fire every cue due at or before `step`. Returns how many fired.
    pub fn advance<G: GeometrySource>(&mut self, step: u64, session: &CellSession<G>) -> usize {
        let start = self.next;
        while let Some(&(at, cue)) = self.cues.get(self.next) {
            if at > step {
                break;
            }
            self.next += 1;
            match cue {
                Cue::Toggle(i) => {
                    if let Some(live) = session.clamps().toggle(self.ids[i]) {
                        log::info!("step {step}: clamp {} live={live}", self.ids[i].get());
                    }
                }
                Cue::Press(i) => {
                    let p = &self.scenario.pokes[i];
                    let sent = session.press_triangle(p.triangle, p.value);
                    self.pressed = sent > 0;
                    log::info!("step {step}: poke triangle {} ({sent} node pairs)", p.triangle);
                }
                Cue::Release => {
                    if self.pressed {
                        session.release();
                        self.pressed = false;
                        log::info!("step {step}: poke released");
                    }
                }
            }
        }
        self.next - start
    }

    pub fn pressed(&self) -> bool {
        self.pressed
    }

    pub fn finished(&self) -> bool {
        self.next >= self.cues.len()
    }

    pub fn clamp_ids(&self) -> &[ClampId] {
        &self.ids
    }
}
