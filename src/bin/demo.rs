//! demo - synthetic scenes run through the rule engine

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};

use anomaly_kernel::{
    AlertHistory, AlertSink, BBox, EngineConfig, RuleEngine, TrackObservation, WeaponPolicy,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// A crowd gathers past the threshold.
    Crowd,
    /// A suitcase is dropped and its owner walks away.
    Bag,
    /// A knife is held in frame by a person.
    Weapon,
    /// All of the above in sequence.
    All,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t = Scenario::All)]
    scenario: Scenario,
    /// Duration in seconds per scenario.
    #[arg(long, default_value_t = 15)]
    seconds: u64,
    /// Frames per second of the synthetic stream.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// Require weapon candidates to be near a person.
    #[arg(long)]
    near_person: bool,
    /// Number of alert lines kept in the history panel.
    #[arg(long, default_value_t = 20)]
    history: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let mut cfg = EngineConfig::load()?;
    if args.near_person {
        cfg.weapon_policy = WeaponPolicy::near_person();
    }

    let scenarios: Vec<Scenario> = match args.scenario {
        Scenario::All => vec![Scenario::Crowd, Scenario::Bag, Scenario::Weapon],
        one => vec![one],
    };

    let frames_per_scene = args.seconds * u64::from(args.fps);
    let mut history = AlertHistory::new(args.history)?;

    for scenario in scenarios {
        // Fresh engine per scene; track ids overlap between scenes.
        let mut engine = RuleEngine::new(cfg.clone())?;
        log::info!("scenario {:?}: {} frames", scenario, frames_per_scene);

        for i in 0..frames_per_scene {
            let frame_index = i + 1;
            let t = i as f64 / f64::from(args.fps);
            let tracks = scene(scenario, t, cfg.crowd_threshold);
            engine.process_into(&tracks, frame_index, t, &mut history)?;
        }

        let stats = engine.stats();
        log::info!(
            "scenario {:?} done: alerts={} (crowd={} bag={} weapon={})",
            scenario,
            stats.total_alerts(),
            stats.crowd_alerts,
            stats.bag_alerts,
            stats.weapon_alerts
        );
    }

    println!("Alert history (newest first):");
    if history.is_empty() {
        println!("  (none)");
    }
    for line in history.lines() {
        println!("  {}", line);
    }
    history.flush()?;
    Ok(())
}

fn person(id: u64, x: i32, y: i32) -> TrackObservation {
    TrackObservation::confirmed(id, BBox::new(x, y, x + 40, y + 100), "person")
}

/// Tracks visible at time `t` of the given scene.
fn scene(scenario: Scenario, t: f64, crowd_threshold: usize) -> Vec<TrackObservation> {
    match scenario {
        Scenario::Crowd => {
            // One more person every half second, up to threshold + 5.
            let n = ((t * 2.0) as usize + 1).min(crowd_threshold + 5);
            (0..n)
                .map(|k| {
                    let col = (k % 10) as i32;
                    let row = (k / 10) as i32;
                    person(k as u64 + 1, col * 60, row * 120)
                })
                .collect()
        }
        Scenario::Bag => {
            let mut tracks = vec![TrackObservation::confirmed(
                7,
                BBox::new(300, 400, 340, 440),
                "suitcase",
            )];
            // Owner stands by the bag for 2s, then walks off at 100 px/s.
            let owner_x = if t < 2.0 {
                280
            } else {
                280 + ((t - 2.0) * 100.0) as i32
            };
            if owner_x < 1280 {
                tracks.push(person(1, owner_x, 340));
            }
            tracks
        }
        Scenario::Weapon => {
            let mut tracks = vec![person(1, 500, 200)];
            if t >= 1.0 {
                // Held at the hand, drifting slightly with the arm.
                let sway = ((t * 4.0).sin() * 3.0) as i32;
                tracks.push(TrackObservation::confirmed(
                    3,
                    BBox::new(540 + sway, 260, 560 + sway, 290),
                    "knife",
                ));
            }
            tracks
        }
        Scenario::All => Vec::new(),
    }
}
