use nalgebra::{point, vector};
use skirmish_engine::competition::{Competition, ContactEvent, Phase};
use skirmish_engine::config::Settings;
use skirmish_engine::harness::StubWorld;
use skirmish_engine::scoring::{AliveState, DamageKind, Scoreboard};
use skirmish_engine::world::VesselId;
use test_log::test;

/// One competitor per team, far enough apart that the match goes live on the
/// third tick. Radii are large so the collision margins are easy to hit.
fn duel() -> (StubWorld, Competition, VesselId, VesselId) {
    let mut world = StubWorld::new();
    let a = world.spawn("Alpha", "A", point![0.0, 0.0, 1000.0]);
    let b = world.spawn("Bravo", "B", point![5000.0, 0.0, 1000.0]);
    world.vessel_mut(a).unwrap().radius = 30.0;
    world.vessel_mut(b).unwrap().radius = 30.0;
    let mut competition = Competition::new(Settings::default(), Box::<Scoreboard>::default());
    competition.start(&mut world, 0.0, 10.0);
    competition.tick(&mut world, 0.1);
    competition.tick(&mut world, 0.2);
    assert_eq!(competition.phase(), Phase::Active);
    (world, competition, a, b)
}

fn set_ramming_intent(world: &mut StubWorld, id: VesselId, intent: bool) {
    world.vessel_mut(id).unwrap().weapons.as_mut().unwrap().ramming_intent = intent;
}

/// Put the pair on a head-on approach that predicts a closest approach well
/// inside the detection window.
fn approach_head_on(world: &mut StubWorld, a: VesselId, b: VesselId) {
    world.set_position(a, point![0.0, 0.0, 1000.0]);
    world.set_velocity(a, vector![150.0, 0.0, 0.0]);
    world.set_position(b, point![200.0, 0.0, 1000.0]);
    world.set_velocity(b, vector![-150.0, 0.0, 0.0]);
}

/// Overlap the pair and notify the engine that `struck` was hit.
fn collide(
    world: &mut StubWorld,
    competition: &Competition,
    a: VesselId,
    b: VesselId,
    struck: VesselId,
) {
    world.set_position(a, point![90.0, 0.0, 1000.0]);
    world.set_position(b, point![110.0, 0.0, 1000.0]);
    competition
        .contact_sender()
        .send(ContactEvent { vessel: struck })
        .unwrap();
}

/// Separate the pair after impact so no new potential collision is flagged
/// while the attribution window runs out.
fn separate(world: &mut StubWorld, a: VesselId, b: VesselId) {
    world.set_position(a, point![-500.0, 0.0, 1000.0]);
    world.set_velocity(a, vector![-150.0, 0.0, 0.0]);
    world.set_position(b, point![500.0, 0.0, 1000.0]);
    world.set_velocity(b, vector![150.0, 0.0, 0.0]);
}

#[test]
fn test_symmetric_head_on_ram_credits_both() {
    let (mut world, mut competition, a, b) = duel();
    set_ramming_intent(&mut world, a, true);
    set_ramming_intent(&mut world, b, true);
    approach_head_on(&mut world, a, b);
    competition.tick(&mut world, 0.3);

    let graph = competition.ramming().unwrap();
    let ab = graph.target_info(a, b).unwrap();
    let ba = graph.target_info(b, a).unwrap();
    assert!(ab.potential_collision);
    // The relationship is symmetric by construction.
    assert_eq!(ab.time_to_cpa, ba.time_to_cpa);
    assert_eq!(ab.potential_collision, ba.potential_collision);
    assert!(ab.ramming && ba.ramming);
    assert!(ab.angle_to_com < 1.0 && ba.angle_to_com < 1.0);

    collide(&mut world, &competition, a, b, a);
    competition.tick(&mut world, 0.4);
    let graph = competition.ramming().unwrap();
    assert!(graph.target_info(a, b).unwrap().collision_detected);
    assert!(graph.target_info(b, a).unwrap().collision_detected);

    // Delayed destruction takes a few parts off both before attribution.
    world.take_parts(a, 5);
    world.take_parts(b, 3);
    separate(&mut world, a, b);
    competition.tick(&mut world, 1.45);

    let entry_a = competition.ledger().entry(a).unwrap();
    let entry_b = competition.ledger().entry(b).unwrap();
    assert_eq!(entry_a.rams_dealt, 1);
    assert_eq!(entry_a.parts_rammed, 3);
    assert_eq!(entry_b.rams_dealt, 1);
    assert_eq!(entry_b.parts_rammed, 5);
    assert_eq!(entry_a.last_damage_kind, DamageKind::Ramming);
    assert_eq!(entry_b.last_damage_kind, DamageKind::Ramming);
    let graph = competition.ramming().unwrap();
    assert!(!graph.target_info(a, b).unwrap().collision_detected);
    assert!(!graph.has_unresolved_collision(a));
    let messages = competition.status_feed().messages().join("\n");
    assert!(messages.contains("RAMMED each other"), "status: {messages}");
}

#[test]
fn test_one_sided_intent_gets_sole_credit() {
    let (mut world, mut competition, a, b) = duel();
    set_ramming_intent(&mut world, a, true);
    approach_head_on(&mut world, a, b);
    competition.tick(&mut world, 0.3);
    collide(&mut world, &competition, a, b, a);
    competition.tick(&mut world, 0.4);
    world.take_parts(b, 3);
    separate(&mut world, a, b);
    competition.tick(&mut world, 1.45);

    // Only the vessel with ramming intent is credited, even though Bravo's
    // approach angle was just as good.
    let entry_a = competition.ledger().entry(a).unwrap();
    let entry_b = competition.ledger().entry(b).unwrap();
    assert_eq!(entry_a.rams_dealt, 1);
    assert_eq!(entry_a.parts_rammed, 3);
    assert_eq!(entry_b.rams_dealt, 0);
    assert_eq!(entry_b.last_damage_kind, DamageKind::Ramming);
    assert_eq!(entry_b.last_attacker, Some(a));
    assert_eq!(entry_a.last_damage_kind, DamageKind::None);
    let messages = competition.status_feed().messages().join("\n");
    assert!(messages.contains("Bravo got RAMMED by Alpha"), "status: {messages}");
}

#[test]
fn test_accidental_graze_awards_no_credit() {
    let (mut world, mut competition, a, b) = duel();
    // Neither intends to ram and neither is head-on: Alpha crosses at 45
    // degrees, Bravo at ~27 degrees.
    world.set_position(a, point![0.0, 0.0, 1000.0]);
    world.set_velocity(a, vector![100.0, 100.0, 0.0]);
    world.set_position(b, point![150.0, 0.0, 1000.0]);
    world.set_velocity(b, vector![-100.0, 50.0, 0.0]);
    competition.tick(&mut world, 0.3);
    let graph = competition.ramming().unwrap();
    assert!(graph.target_info(a, b).unwrap().potential_collision);

    collide(&mut world, &competition, a, b, b);
    competition.tick(&mut world, 0.4);
    world.take_parts(b, 2);
    separate(&mut world, a, b);
    competition.tick(&mut world, 1.45);

    let entry_a = competition.ledger().entry(a).unwrap();
    let entry_b = competition.ledger().entry(b).unwrap();
    assert_eq!(entry_a.rams_dealt, 0);
    assert_eq!(entry_b.rams_dealt, 0);
    assert_eq!(entry_a.last_damage_kind, DamageKind::None);
    assert_eq!(entry_b.last_damage_kind, DamageKind::None);
    let messages = competition.status_feed().messages().join("\n");
    assert!(messages.contains("ACCIDENTALLY RAMMED"), "status: {messages}");
}

#[test]
fn test_negative_part_deltas_are_clamped() {
    let (mut world, mut competition, a, b) = duel();
    set_ramming_intent(&mut world, a, true);
    approach_head_on(&mut world, a, b);
    competition.tick(&mut world, 0.3);
    collide(&mut world, &competition, a, b, a);
    competition.tick(&mut world, 0.4);
    // Bravo somehow gains parts before attribution (near-simultaneous
    // unrelated events); the loss must clamp to zero, not go negative.
    world.vessel_mut(b).unwrap().part_count += 5;
    separate(&mut world, a, b);
    competition.tick(&mut world, 1.45);

    let entry_a = competition.ledger().entry(a).unwrap();
    assert_eq!(entry_a.rams_dealt, 1);
    assert_eq!(entry_a.parts_rammed, 0);
}

#[test]
fn test_death_waits_for_collision_resolution() {
    let (mut world, mut competition, a, b) = duel();
    set_ramming_intent(&mut world, a, true);
    approach_head_on(&mut world, a, b);
    competition.tick(&mut world, 1.9);
    assert!(competition
        .ramming()
        .unwrap()
        .target_info(a, b)
        .unwrap()
        .potential_collision);

    // Bravo is annihilated by the impact; the contact event only names the
    // surviving vessel and the collision is attributed to the destroyed
    // candidate.
    world.destroy(b);
    competition
        .contact_sender()
        .send(ContactEvent { vessel: a })
        .unwrap();
    competition.tick(&mut world, 2.0);
    assert!(competition.ramming().unwrap().has_unresolved_collision(b));

    // The classifier runs while the collision is still unresolved: the death
    // must be deferred, not finalised.
    competition.tick(&mut world, 2.25);
    assert_eq!(competition.ledger().death_count(), 0);
    assert!(competition.ledger().entry(b).unwrap().alive());
    assert_eq!(competition.ramming().unwrap().time_of_death(b), Some(2.0));

    // The attribution window runs out: Alpha is credited with the full part
    // count of the destroyed vessel.
    competition.tick(&mut world, 2.95);
    let entry_a = competition.ledger().entry(a).unwrap();
    assert_eq!(entry_a.rams_dealt, 1);
    assert_eq!(entry_a.parts_rammed, 20);
    assert!(!competition.ramming().unwrap().has_unresolved_collision(b));

    // Only now is the death registered, backdated to the collision.
    competition.tick(&mut world, 3.3);
    assert_eq!(competition.ledger().death_count(), 1);
    let entry_b = competition.ledger().entry(b).unwrap();
    assert!(!entry_b.alive());
    assert_eq!(entry_b.death.as_ref().unwrap().time, 2.0);
    assert_eq!(entry_b.alive_state, AliveState::CleanKill);
    let messages = competition.status_feed().messages().join("\n");
    assert!(messages.contains("was rammed by"), "status: {messages}");

    // And never registered twice.
    competition.tick(&mut world, 4.3);
    assert_eq!(competition.ledger().death_count(), 1);
}

#[test]
fn test_potential_collision_flag_expires() {
    let (mut world, mut competition, a, b) = duel();
    approach_head_on(&mut world, a, b);
    competition.tick(&mut world, 0.3);
    assert!(competition
        .ramming()
        .unwrap()
        .target_info(a, b)
        .unwrap()
        .potential_collision);

    // They miss each other; without confirmation the flag resets after twice
    // the detection window.
    separate(&mut world, a, b);
    competition.tick(&mut world, 1.0);
    competition.tick(&mut world, 2.5);
    let view = competition.ramming().unwrap().target_info(a, b).unwrap();
    assert!(!view.potential_collision);
    assert!(!view.collision_detected);
}
