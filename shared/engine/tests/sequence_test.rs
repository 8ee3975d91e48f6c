use nalgebra::point;
use skirmish_engine::competition::{Competition, Phase, StartFailure};
use skirmish_engine::config::Settings;
use skirmish_engine::harness::StubWorld;
use skirmish_engine::scoring::Scoreboard;
use skirmish_engine::sequence::SequenceError;
use skirmish_engine::world::{VesselId, World};
use test_log::test;

fn pair() -> (StubWorld, Vec<VesselId>) {
    let mut world = StubWorld::new();
    let ids = vec![
        world.spawn("Alpha 1", "A", point![0.0, 0.0, 1000.0]),
        world.spawn("Bravo 1", "B", point![5000.0, 0.0, 1000.0]),
    ];
    (world, ids)
}

fn new_competition() -> Competition {
    Competition::new(Settings::default(), Box::<Scoreboard>::default())
}

#[test]
fn test_sequenced_deployment_runs_to_active() {
    let (mut world, ids) = pair();
    let mut competition = new_competition();
    let script = [
        "0:SetThrottle:100".to_string(),
        "1:TogglePilot:1".to_string(),
        "0:ToggleGuard:1".to_string(),
    ];
    competition
        .start_sequenced(&mut world, 0.0, &script)
        .unwrap();
    assert_eq!(competition.phase(), Phase::SequencedStarting);

    competition.tick(&mut world, 0.0);
    // The throttle step ran immediately; the pilots aren't up yet.
    assert!(world.actions.iter().any(|a| a.starts_with("throttle:")));
    assert!(!world.pilot(ids[0]).unwrap().enabled());
    assert_eq!(competition.phase(), Phase::SequencedStarting);

    competition.tick(&mut world, 0.5);
    assert_eq!(competition.phase(), Phase::SequencedStarting);

    // At t=1 the pilot step fires, and the zero-delay guard step right after
    // it; the script is exhausted and the match goes live.
    competition.tick(&mut world, 1.05);
    assert_eq!(competition.phase(), Phase::Active);
    assert_eq!(competition.start_time(), Some(1.05));
    for &id in &ids {
        assert!(world.pilot(id).unwrap().enabled());
        assert!(world.weapons(id).unwrap().guard_mode());
    }
    // Each instruction was narrated as it ran.
    let messages = competition.status_feed().messages().join("\n");
    assert!(messages.contains("SetThrottle:100"), "status: {messages}");
    assert!(messages.contains("ToggleGuard:1"), "status: {messages}");
}

#[test]
fn test_malformed_instruction_aborts_before_execution() {
    let (mut world, _) = pair();
    let mut competition = new_competition();
    let script = ["0:SetThrottle:100".to_string(), "5:Explode".to_string()];
    let result = competition.start_sequenced(&mut world, 0.0, &script);
    assert!(matches!(result, Err(SequenceError::UnknownCommand(_))));
    assert_eq!(competition.phase(), Phase::Idle);
    assert_eq!(competition.start_failure(), Some(StartFailure::Other));
    // Nothing from the script ran, not even the valid first instruction.
    assert!(world.actions.is_empty());
}

#[test]
fn test_sequenced_start_requires_two_competitors() {
    let mut world = StubWorld::new();
    world.spawn("Alpha 1", "A", point![0.0, 0.0, 1000.0]);
    let mut competition = new_competition();
    let script = ["0:TogglePilot:1".to_string()];
    competition
        .start_sequenced(&mut world, 0.0, &script)
        .unwrap();
    assert_eq!(competition.phase(), Phase::Idle);
    assert_eq!(competition.start_failure(), Some(StartFailure::OnlyOneTeam));
}

#[test]
fn test_deployment_side_effects_reach_the_world() {
    let (mut world, _) = pair();
    let mut competition = new_competition();
    let script = [
        "0:MassTrim".to_string(),
        "0:ActionGroup:14:0".to_string(),
        "0:Stage".to_string(),
        "0:HackGravity:0.5".to_string(),
        "0:RemoveDebris".to_string(),
        "0:RemoveFairings".to_string(),
        "0:TogglePilot:1".to_string(),
    ];
    competition
        .start_sequenced(&mut world, 0.0, &script)
        .unwrap();
    competition.tick(&mut world, 0.0);
    assert_eq!(competition.phase(), Phase::Active);
    assert!(world.actions.contains(&"mass_trim".to_string()));
    assert!(world.actions.iter().any(|a| a.contains(":14:false")));
    assert!(world.actions.iter().any(|a| a.starts_with("stage:")));
    assert_eq!(world.gravity_scale, 0.5);
    assert!(world.actions.contains(&"remove_debris".to_string()));
    assert!(world.actions.contains(&"remove_fairings".to_string()));
}
