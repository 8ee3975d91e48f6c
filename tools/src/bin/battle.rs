use anyhow::Result;
use clap::Parser as _;
use nalgebra::point;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use skirmish_engine::competition::{Competition, Phase};
use skirmish_engine::config::Settings;
use skirmish_engine::harness::StubWorld;
use skirmish_engine::scoring::{DamageKind, Scoreboard};
use skirmish_engine::world::VesselId;

/// Run a headless match in the stub world, with randomised exchanges of fire
/// standing in for the combat simulation.
#[derive(clap::Parser, Debug)]
struct Arguments {
    #[clap(long, default_value_t = 2)]
    teams: usize,

    #[clap(long, default_value_t = 2)]
    vessels_per_team: usize,

    /// Inter-team separation for the start formation.
    #[clap(long, default_value_t = 2000.0)]
    distance: f64,

    /// Match duration cap in seconds.
    #[clap(long, default_value_t = 300.0)]
    duration: f64,

    #[clap(long, default_value_t = 0)]
    seed: u64,
}

fn team_name(index: usize) -> String {
    ((b'A' + (index % 26) as u8) as char).to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("battle=info,skirmish_engine=info"),
    )
    .init();

    let args = Arguments::parse();
    let mut world = StubWorld::new();
    for team in 0..args.teams {
        for n in 0..args.vessels_per_team {
            let name = format!("{}-{}", team_name(team), n + 1);
            world.spawn(
                &name,
                &team_name(team),
                point![team as f64 * 5000.0, n as f64 * 50.0, 1000.0],
            );
        }
    }

    let settings = Settings {
        duration: args.duration,
        rng_seed: args.seed,
        ..Default::default()
    };
    let mut competition = Competition::new(settings, Box::<Scoreboard>::default());
    competition.start(&mut world, 0.0, args.distance);

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let dt = 0.1;
    let mut now = 0.0;
    while competition.phase() != Phase::Idle && now < args.duration + 60.0 {
        world.step(dt);
        if competition.is_active() {
            exchange_fire(&mut world, &mut competition, &mut rng, now);
        }
        competition.tick(&mut world, now);
        now += dt;
    }

    let snapshot = competition.snapshot(now);
    log::info!("Result: {snapshot:?}");
    Ok(())
}

/// Occasionally have one random competitor damage another, sometimes
/// fatally, so the classifier has something to narrate.
fn exchange_fire(
    world: &mut StubWorld,
    competition: &mut Competition,
    rng: &mut ChaCha8Rng,
    now: f64,
) {
    if !rng.gen_bool(0.01) {
        return;
    }
    let alive: Vec<(VesselId, String)> = competition
        .roster()
        .iter()
        .filter(|c| {
            competition
                .ledger()
                .entry(c.id)
                .is_some_and(|e| e.alive())
        })
        .map(|c| (c.id, c.name.clone()))
        .collect();
    if alive.len() < 2 {
        return;
    }
    let attacker = alive[rng.gen_range(0..alive.len())].clone();
    let victim = loop {
        let candidate = alive[rng.gen_range(0..alive.len())].clone();
        if candidate.0 != attacker.0 {
            break candidate;
        }
    };
    competition.ledger_mut().register_damage(
        victim.0,
        Some(attacker.0),
        &attacker.1,
        DamageKind::Guns,
        now,
    );
    if rng.gen_bool(0.3) {
        world.destroy(victim.0);
    } else {
        world.take_parts(victim.0, 1);
    }
}
