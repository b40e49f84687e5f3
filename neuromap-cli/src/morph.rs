use glam::DVec3;
use neuromap_core::synth::star_skeleton;
use neuromap_core::{MapResult, SkeletonGraph};
use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub enum MorphType {
    Chain,
    Star,
    Arbor,
}

impl MorphType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MorphType::Chain => "chain",
            MorphType::Star => "star",
            MorphType::Arbor => "arbor",
        }
    }

    pub fn parse(s: &str) -> Option<MorphType> {
        match s {
            "chain" => Some(MorphType::Chain),
            "star" => Some(MorphType::Star),
            "arbor" => Some(MorphType::Arbor),
            _ => None,
        }
    }
}

pub fn sample_morph_type<R: Rng>(rng: &mut R) -> MorphType {
    match rng.gen_range(0..3) {
        0 => MorphType::Chain,
        1 => MorphType::Star,
        _ => MorphType::Arbor,
    }
}

/// Coarse skeleton with `nodes` nodes (approximately, for the star).
pub fn generate_skeleton<R: Rng>(rng: &mut R, name: &str, nodes: usize, morph: MorphType) -> MapResult<SkeletonGraph> {
    let nodes = nodes.max(2);

    match morph {
        MorphType::Chain => {
            // gentle wiggle around +x
            let mut positions = vec![DVec3::ZERO];
            for i in 1..nodes {
                let jitter = DVec3::new(0.0, rng.gen_range(-0.2..0.2), rng.gen_range(-0.2..0.2));
                positions.push(positions[i - 1] + DVec3::X + jitter);
            }
            let diameters = taper(nodes, rng.gen_range(0.6..1.0), 0.4);
            let edges = (1..nodes).map(|i| (i - 1, i)).collect();
            SkeletonGraph::new(name, 0, positions, edges)?.with_diameters(diameters)
        }

        MorphType::Star => {
            let arm = ((nodes - 1) / 3).max(1);
            star_skeleton(name, arm, rng.gen_range(0.8..1.5), rng.gen_range(0.3..0.6))
        }

        MorphType::Arbor => {
            // random tree growing away from a soma at the origin
            let mut positions = vec![DVec3::ZERO];
            let mut headings = vec![DVec3::X];
            let mut depth = vec![0usize];
            let mut edges = Vec::with_capacity(nodes - 1);

            for i in 1..nodes {
                let parent = rng.gen_range(0..i);
                let heading = if parent == 0 {
                    random_unit(rng)
                } else {
                    let turned = headings[parent] + random_unit(rng) * 0.5;
                    turned.try_normalize().unwrap_or(headings[parent])
                };
                let len = rng.gen_range(0.8..1.6);
                positions.push(positions[parent] + heading * len);
                headings.push(heading);
                depth.push(depth[parent] + 1);
                edges.push((parent, i));
            }

            // thickest/thinnest stays under the mapper's default offset factor
            let max_depth = depth.iter().copied().max().unwrap_or(1).max(1) as f64;
            let diameters = depth
                .iter()
                .map(|&d| 1.0 - 0.6 * (d as f64 / max_depth))
                .collect();
            SkeletonGraph::new(name, 0, positions, edges)?.with_diameters(diameters)
        }
    }
}

fn taper(n: usize, start: f64, end: f64) -> Vec<f64> {
    (0..n)
        .map(|i| start + (end - start) * i as f64 / (n - 1).max(1) as f64)
        .collect()
}

fn random_unit<R: Rng>(rng: &mut R) -> DVec3 {
    loop {
        let v = DVec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let len2 = v.length_squared();
        if len2 > 1e-4 && len2 <= 1.0 {
            return v / len2.sqrt();
        }
    }
}
