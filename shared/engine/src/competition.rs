//! The match engine: phase state machine, live tick and death classifier.
//!
//! A [`Competition`] is explicitly constructed and owned by the host, which
//! drives it with one `tick(world, now)` call per simulation step. Setup
//! waits are explicit stages polled from `tick`; each poll either keeps
//! waiting, advances, or aborts with a [`StartFailure`]. Contact events from
//! the host's collision system arrive on a channel and are drained at a
//! single point in the tick, before the collision graph is swept and before
//! the classifier reads it, so a death is never finalised while a collision
//! involving the victim is still in flight.

use crate::config::{altitude_ceiling, altitude_floor, Settings};
use crate::ramming::RammingGraph;
use crate::roster::{self, by_team, Competitor};
use crate::scoring::{AliveState, DamageKind, GmKillReason, ScoreLedger};
use crate::sequence::{self, DeployCommand, SequenceError, SequenceRunner};
use crate::status::StatusFeed;
use crate::world::{PilotCommand, Team, VesselId, VesselKind, World};
use crossbeam::channel::{unbounded, Receiver, Sender};
use instant::Instant;
use nalgebra::{Point3, Rotation3, Vector3};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;

/// Seconds after going live before tracking starts.
pub const TRACKING_DELAY: f64 = 2.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Starting,
    SequencedStarting,
    Active,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum StartFailure {
    OnlyOneTeam,
    TeamsChanged,
    TeamLeaderDisappeared,
    PilotDisappeared,
    Other,
}

/// Notification from the host that a vessel was struck by something.
#[derive(Copy, Clone, Debug)]
pub struct ContactEvent {
    pub vessel: VesselId,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Timing {
    pub collision: f64,
    pub classifier: f64,
}

impl Timing {
    pub fn total(&self) -> f64 {
        self.collision + self.classifier
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CompetitionSnapshot {
    pub match_id: u64,
    pub phase: Phase,
    pub elapsed: f64,
    pub alive: Vec<String>,
    pub dead: Vec<String>,
    pub status: String,
    pub timing: Timing,
}

struct TeamGroup {
    team: Team,
    members: Vec<VesselId>,
}

enum StartStage {
    AwaitLeadersReady,
    AwaitFormation,
}

struct StartState {
    stage: StartStage,
    distance: f64,
    teams: Vec<TeamGroup>,
    leaders: Vec<VesselId>,
    leader_names: Vec<String>,
    followers_commanded: bool,
    rally: Point3<f64>,
    skip_notified: bool,
}

enum EngineState {
    Idle,
    Starting(StartState),
    SequencedStarting(SequenceRunner),
    Active,
}

enum StepResult {
    Waiting,
    Aborted,
    Live,
}

pub struct Competition {
    settings: Settings,
    ledger: Box<dyn ScoreLedger>,
    state: EngineState,

    match_id: u64,
    start_time: Option<f64>,
    pre_start_time: Option<f64>,
    next_update: f64,
    decision_time: Option<f64>,
    final_grace_start: Option<f64>,
    start_failure: Option<StartFailure>,
    start_now: bool,
    start_now_at: Option<f64>,
    gm_enabled: bool,
    current_mutators: Vec<String>,

    roster: Vec<Competitor>,
    ramming: Option<RammingGraph>,
    status: StatusFeed,
    kill_timers: HashMap<VesselId, f64>,
    out_of_ammo: HashSet<VesselId>,
    pilot_actions: HashMap<VesselId, String>,
    noncompetitors_scheduled: HashSet<VesselId>,
    dead_or_alive: String,

    contact_tx: Sender<ContactEvent>,
    contact_rx: Receiver<ContactEvent>,
    rng: ChaCha8Rng,
    timing: Timing,
}

impl Competition {
    pub fn new(settings: Settings, ledger: Box<dyn ScoreLedger>) -> Self {
        let (contact_tx, contact_rx) = unbounded();
        let rng = ChaCha8Rng::seed_from_u64(settings.rng_seed);
        Competition {
            settings,
            ledger,
            state: EngineState::Idle,
            match_id: 0,
            start_time: None,
            pre_start_time: None,
            next_update: 0.0,
            decision_time: None,
            final_grace_start: None,
            start_failure: None,
            start_now: false,
            start_now_at: None,
            gm_enabled: false,
            current_mutators: vec![],
            roster: vec![],
            ramming: None,
            status: StatusFeed::new(),
            kill_timers: HashMap::new(),
            out_of_ammo: HashSet::new(),
            pilot_actions: HashMap::new(),
            noncompetitors_scheduled: HashSet::new(),
            dead_or_alive: String::new(),
            contact_tx,
            contact_rx,
            rng,
            timing: Timing::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            EngineState::Idle => Phase::Idle,
            EngineState::Starting(_) => Phase::Starting,
            EngineState::SequencedStarting(_) => Phase::SequencedStarting,
            EngineState::Active => Phase::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase() == Phase::Active
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn match_id(&self) -> u64 {
        self.match_id
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_time
    }

    pub fn start_failure(&self) -> Option<StartFailure> {
        self.start_failure
    }

    pub fn current_mutators(&self) -> &[String] {
        &self.current_mutators
    }

    pub fn roster(&self) -> &[Competitor] {
        &self.roster
    }

    pub fn ledger(&self) -> &dyn ScoreLedger {
        self.ledger.as_ref()
    }

    pub fn ledger_mut(&mut self) -> &mut dyn ScoreLedger {
        self.ledger.as_mut()
    }

    pub fn ramming(&self) -> Option<&RammingGraph> {
        self.ramming.as_ref()
    }

    pub fn kill_timers(&self) -> &HashMap<VesselId, f64> {
        &self.kill_timers
    }

    pub fn dead_or_alive(&self) -> &str {
        &self.dead_or_alive
    }

    pub fn pilot_action(&self, id: VesselId) -> Option<&str> {
        self.pilot_actions.get(&id).map(|s| s.as_str())
    }

    pub fn status_feed(&self) -> &StatusFeed {
        &self.status
    }

    pub fn render_status(&mut self, now: f64) -> String {
        self.status.render(now)
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    /// Channel on which the host delivers contact events while a match is
    /// live. Events are drained at the start of the next tick.
    pub fn contact_sender(&self) -> Sender<ContactEvent> {
        self.contact_tx.clone()
    }

    pub fn snapshot(&mut self, now: f64) -> CompetitionSnapshot {
        let mut alive = vec![];
        let mut dead = vec![];
        for id in self.ledger.player_ids() {
            if let Some(entry) = self.ledger.entry(id) {
                if entry.alive() {
                    alive.push(entry.name.clone());
                } else {
                    dead.push(entry.name.clone());
                }
            }
        }
        CompetitionSnapshot {
            match_id: self.match_id,
            phase: self.phase(),
            elapsed: self.elapsed(now),
            alive,
            dead,
            status: self.status.render(now),
            timing: self.timing.clone(),
        }
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        match (self.start_time, self.pre_start_time) {
            (Some(start), _) => now - start,
            (None, Some(pre_start)) => now - pre_start,
            _ => 0.0,
        }
    }

    /// Stop waiting for teams to get in position.
    pub fn start_now(&mut self) {
        self.start_now = true;
    }

    /// Arm the periodic GM intervention.
    pub fn enable_gm(&mut self, now: f64) {
        self.gm_enabled = true;
        self.decision_time = self
            .settings
            .gm_enabled_by_frequency()
            .then(|| now + self.settings.gm_frequency);
        self.reset_average_speeds();
    }

    fn reset(&mut self, world: &mut dyn World, now: f64) {
        self.match_id = (now.max(0.0) as u64).max(self.match_id + 1);
        self.kill_timers.clear();
        self.out_of_ammo.clear();
        self.pilot_actions.clear();
        self.noncompetitors_scheduled.clear();
        self.ramming = None;
        self.final_grace_start = None;
        self.start_time = None;
        self.pre_start_time = Some(now);
        self.next_update = now + TRACKING_DELAY;
        self.decision_time = None;
        self.current_mutators.clear();
        self.dead_or_alive.clear();
        while self.contact_rx.try_recv().is_ok() {}
        self.roster = roster::resolve(world);
        self.ledger.configure_players(&self.roster);
    }

    fn configure_mutators(&mut self) {
        if self.settings.mutator_list.is_empty() {
            return;
        }
        let mut mutators = self.settings.mutator_list.clone();
        mutators.shuffle(&mut self.rng);
        mutators.truncate(self.settings.mutators_to_apply);
        if self.settings.debug_competition {
            log::debug!("[{}] current mutators: {}", self.match_id, mutators.join("; "));
        }
        self.current_mutators = mutators;
    }

    fn normalize_engines(&self, world: &mut dyn World, id: VesselId) {
        if !self.settings.no_engines && world.count_active_engines(id) == 0 {
            // Didn't light its engines at launch, light all of them.
            world.activate_all_engines(id, true);
        } else if self.settings.no_engines && world.count_active_engines(id) > 0 {
            world.activate_all_engines(id, false);
        }
    }

    /// Begin the standard dogfight start sequence. `distance` is the
    /// requested inter-team separation.
    pub fn start(&mut self, world: &mut dyn World, now: f64, distance: f64) {
        if self.phase() != Phase::Idle {
            return;
        }
        self.reset(world, now);
        log::info!("[{}] starting competition", self.match_id);
        self.start_failure = None;
        self.start_now = false;
        self.start_now_at = self.settings.start_now_after.map(|delay| now + delay);
        self.status.add(now, "Competition: Pilots are taking off.");
        self.configure_mutators();

        let teams: Vec<TeamGroup> = by_team(&self.roster)
            .into_iter()
            .map(|(team, members)| TeamGroup { team, members })
            .collect();

        let roster = self.roster.clone();
        for competitor in &roster {
            if let Some(pilot) = world.pilot_mut(competitor.id) {
                pilot.activate();
                pilot.command_take_off();
            }
            if let Some(weapons) = world.weapons_mut(competitor.id) {
                if weapons.guard_mode() {
                    weapons.set_guard_mode(false);
                    weapons.clear_target();
                }
            }
            self.normalize_engines(world, competitor.id);
            let handicapped = self.settings.hall_of_shame.contains(&competitor.name);
            world.apply_modifiers(competitor.id, &self.current_mutators, handicapped);
        }

        if teams.len() < 2 {
            log::info!("[{}] unable to start competition: one or more teams is empty", self.match_id);
            self.fail(
                world,
                now,
                StartFailure::OnlyOneTeam,
                "Competition: Failed!  One or more teams is empty.",
            );
            return;
        }

        let leaders: Vec<VesselId> = teams.iter().map(|group| group.members[0]).collect();
        let leader_names: Vec<String> = leaders
            .iter()
            .map(|id| {
                roster
                    .iter()
                    .find(|c| c.id == *id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| format!("{id}"))
            })
            .collect();
        self.state = EngineState::Starting(StartState {
            stage: StartStage::AwaitLeadersReady,
            distance,
            teams,
            leaders,
            leader_names,
            followers_commanded: false,
            rally: Point3::origin(),
            skip_notified: false,
        });
    }

    /// Begin a scripted sequenced deployment. The whole script is parsed up
    /// front; a malformed instruction fails the start before anything runs.
    pub fn start_sequenced<S: AsRef<str>>(
        &mut self,
        world: &mut dyn World,
        now: f64,
        instructions: &[S],
    ) -> Result<(), SequenceError> {
        if self.phase() != Phase::Idle {
            return Ok(());
        }
        let steps = match sequence::parse_sequence(instructions) {
            Ok(steps) => steps,
            Err(e) => {
                log::warn!("[{}] sequenced start rejected: {e}", self.match_id);
                self.status.set(now, format!("Competition: Failed!  {e}"));
                self.start_failure = Some(StartFailure::Other);
                return Err(e);
            }
        };
        self.reset(world, now);
        log::info!("[{}] starting sequenced deployment", self.match_id);
        self.start_failure = None;
        if self.roster.len() < 2 {
            log::info!(
                "[{}] unable to start sequenced competition: one or more teams is empty",
                self.match_id
            );
            self.fail(
                world,
                now,
                StartFailure::OnlyOneTeam,
                "Competition: Failed!  One or more teams is empty.",
            );
            return Ok(());
        }
        self.configure_mutators();
        self.state = EngineState::SequencedStarting(SequenceRunner::new(steps, now));
        Ok(())
    }

    /// Stop the match (or abort a start in progress). Idempotent.
    pub fn stop(&mut self, world: &mut dyn World, now: f64) {
        self.stop_with(world, now, "");
    }

    fn stop_with(&mut self, world: &mut dyn World, now: f64, message: &str) {
        if self.start_time.is_some() {
            self.status
                .add(now, format!("Dumping scores for competition {}", self.match_id));
            self.ledger.log_results(self.match_id, message, "");
        }
        if self.is_active() && self.settings.continuous_spawning {
            world.cancel_continuous_spawning();
        }
        self.state = EngineState::Idle;
        self.start_time = None;
        self.ramming = None;
        self.dead_or_alive.clear();
        self.start_now = false;
        self.start_now_at = None;
        self.decision_time = None;
        while self.contact_rx.try_recv().is_ok() {}
    }

    fn fail(&mut self, world: &mut dyn World, now: f64, reason: StartFailure, message: &str) {
        log::warn!("[{}] {message}", self.match_id);
        self.status.set(now, message);
        self.start_failure = Some(reason);
        self.stop_with(world, now, "");
    }

    fn competition_started(&mut self, now: f64) {
        self.state = EngineState::Active;
        self.start_time = Some(now);
        self.next_update = now + TRACKING_DELAY;
        self.decision_time = self
            .settings
            .gm_enabled_by_frequency()
            .then(|| now + self.settings.gm_frequency);
        self.final_grace_start = None;
        log::info!("[{}] competition started", self.match_id);
    }

    /// Track a competitor that appeared mid-match (continuous spawning).
    pub fn notify_vessel_spawned(&mut self, world: &mut dyn World, id: VesselId, now: f64) {
        if !self.is_active() {
            return;
        }
        if self.roster.iter().any(|c| c.id == id) {
            return;
        }
        if world.pilot(id).is_none() || world.weapons(id).is_none() {
            return;
        }
        let team = match world.weapons(id) {
            Some(weapons) => weapons.team(),
            None => return,
        };
        if team.neutral {
            return;
        }
        let name = match world.display_name(id) {
            Some(name) => name,
            None => return,
        };
        let competitor = Competitor { id, name, team };
        self.roster.push(competitor.clone());
        self.ledger.add_player(&competitor);
        if let Some(graph) = &mut self.ramming {
            graph.add_vessel(world, &competitor);
        }
        log::debug!("[{}] {} joined at {now:.1}", self.match_id, competitor.name);
    }

    /// Forget a competitor that was removed from the simulation.
    pub fn notify_vessel_removed(&mut self, id: VesselId) {
        self.roster.retain(|c| c.id != id);
        self.kill_timers.remove(&id);
        if let Some(graph) = &mut self.ramming {
            graph.remove_vessel(id);
        }
    }

    /// Advance the engine. Call once per simulation step.
    pub fn tick(&mut self, world: &mut dyn World, now: f64) {
        match self.phase() {
            Phase::Idle => {}
            Phase::Starting => self.poll_start(world, now),
            Phase::SequencedStarting => self.poll_sequence(world, now),
            Phase::Active => {
                let sweep_start = Instant::now();
                self.collision_sweep(world, now);
                self.timing.collision += sweep_start.elapsed().as_secs_f64();
                if now >= self.next_update {
                    let classifier_start = Instant::now();
                    self.classifier_update(world, now);
                    self.timing.classifier += classifier_start.elapsed().as_secs_f64();
                }
            }
        }
    }

    fn poll_start(&mut self, world: &mut dyn World, now: f64) {
        let mut start = match std::mem::replace(&mut self.state, EngineState::Idle) {
            EngineState::Starting(start) => start,
            other => {
                self.state = other;
                return;
            }
        };
        match self.step_start(world, now, &mut start) {
            StepResult::Waiting => self.state = EngineState::Starting(start),
            StepResult::Aborted => {}
            StepResult::Live => {
                self.status.add(now, "Competition starting!  Good luck!");
                self.competition_started(now);
            }
        }
    }

    fn missing_leaders(&self, world: &dyn World, start: &StartState) -> Vec<String> {
        start
            .leaders
            .iter()
            .zip(start.leader_names.iter())
            .filter(|(id, _)| world.pilot(**id).is_none() || world.telemetry(**id).is_none())
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn step_start(
        &mut self,
        world: &mut dyn World,
        now: f64,
        start: &mut StartState,
    ) -> StepResult {
        let missing = self.missing_leaders(world, start);
        if !missing.is_empty() {
            self.fail(
                world,
                now,
                StartFailure::TeamLeaderDisappeared,
                &format!(
                    "Competition: A team leader disappeared during competition start-up, \
                     aborting: {}",
                    missing.join(", ")
                ),
            );
            return StepResult::Aborted;
        }
        match start.stage {
            StartStage::AwaitLeadersReady => {
                if !start.followers_commanded {
                    for group in &start.teams {
                        let leader = group.members[0];
                        for &member in &group.members[1..] {
                            if let Some(pilot) = world.pilot_mut(member) {
                                pilot.command_follow(leader);
                            }
                        }
                    }
                    start.followers_commanded = true;
                }
                let all_ready = start
                    .leaders
                    .iter()
                    .all(|id| world.pilot(*id).is_some_and(|p| p.can_engage()));
                if !all_ready {
                    return StepResult::Waiting;
                }

                // All leaders are flight-ready; send them to equally-spaced
                // points on a circle around their centroid.
                let mut positions = Vec::with_capacity(start.leaders.len());
                for &leader in &start.leaders {
                    match world.telemetry(leader) {
                        Some(t) => positions.push(t.position),
                        None => return StepResult::Waiting, // Caught next poll.
                    }
                }
                let team_count = positions.len();
                let center = Point3::from(
                    positions
                        .iter()
                        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
                        / team_count as f64,
                );
                let mut direction = positions[0] - center;
                direction.z = 0.0;
                if direction.norm() < 1e-6 {
                    direction = Vector3::x();
                } else {
                    direction.normalize_mut();
                }
                let radius = (start.distance + self.settings.formation_margin)
                    / (2.0 * (PI / team_count as f64).sin());
                let rotation_step =
                    Rotation3::from_axis_angle(&Vector3::z_axis(), 2.0 * PI / team_count as f64);
                let mut offset = direction * radius;
                for &leader in &start.leaders {
                    if let Some(pilot) = world.pilot_mut(leader) {
                        pilot.command_fly_to(center + offset);
                    }
                    offset = rotation_step * offset;
                }
                start.rally = center;
                self.status
                    .add(now, "Competition: Sending pilots to start position.");
                self.status
                    .add(now, "Competition: Waiting for teams to get in position.");
                start.stage = StartStage::AwaitFormation;
                StepResult::Waiting
            }
            StartStage::AwaitFormation => {
                for group in &start.teams {
                    let leader = group.members[0];
                    let team = world.weapons(leader).map(|w| w.team());
                    if team.as_ref() != Some(&group.team) {
                        self.fail(
                            world,
                            now,
                            StartFailure::TeamsChanged,
                            "Competition: The teams were changed during competition start-up, \
                             aborting.",
                        );
                        return StepResult::Aborted;
                    }
                }
                let skip =
                    self.start_now || self.start_now_at.is_some_and(|deadline| now >= deadline);
                if skip && !start.skip_notified {
                    self.status
                        .add(now, "No longer waiting for teams to get in position.");
                    start.skip_notified = true;
                }
                if !skip && self.formation_pending(world, start) {
                    return StepResult::Waiting;
                }

                // Start the match.
                for group in &start.teams {
                    for &member in &group.members {
                        if world.pilot(member).is_none() {
                            self.fail(
                                world,
                                now,
                                StartFailure::PilotDisappeared,
                                "Competition: A pilot has disappeared from team during \
                                 competition start-up, aborting.",
                            );
                            return StepResult::Aborted;
                        }
                    }
                }
                let rally = start.rally;
                for group in &start.teams {
                    for &member in &group.members {
                        if let Some(weapons) = world.weapons_mut(member) {
                            if !weapons.guard_mode() {
                                weapons.set_guard_mode(true);
                            }
                        }
                        if let Some(pilot) = world.pilot_mut(member) {
                            pilot.release_command();
                            pilot.command_attack(rally);
                        }
                    }
                }
                StepResult::Live
            }
        }
    }

    fn formation_pending(&self, world: &dyn World, start: &StartState) -> bool {
        // Leaders must be mutually separated by the requested distance.
        let sqr_distance = start.distance * start.distance;
        for (i, &a) in start.leaders.iter().enumerate() {
            for &b in &start.leaders[i + 1..] {
                if let (Some(ta), Some(tb)) = (world.telemetry(a), world.telemetry(b)) {
                    if (tb.position - ta.position).norm_squared() < sqr_distance {
                        return true;
                    }
                }
            }
        }
        // Members must have closed up on their leaders, scaled by team size.
        for group in &start.teams {
            let leader = group.members[0];
            let leader_position = match world.telemetry(leader) {
                Some(t) => t.position,
                None => continue,
            };
            let spacing = self.settings.team_spacing_base
                + self.settings.team_spacing_per_member * group.members.len() as f64;
            for &member in &group.members[1..] {
                let following = world
                    .pilot(member)
                    .is_some_and(|p| p.current_command() == PilotCommand::Follow);
                if !following {
                    continue;
                }
                if let Some(t) = world.telemetry(member) {
                    if (t.position - leader_position).norm_squared() > spacing * spacing {
                        return true;
                    }
                }
            }
        }
        false
    }

    fn poll_sequence(&mut self, world: &mut dyn World, now: f64) {
        let mut runner = match std::mem::replace(&mut self.state, EngineState::Idle) {
            EngineState::SequencedStarting(runner) => runner,
            other => {
                self.state = other;
                return;
            }
        };
        while let Some(command) = runner.poll(now) {
            self.status.add(now, command.to_string());
            self.apply_deploy_command(world, now, &command);
        }
        if runner.finished() {
            self.competition_started(now);
        } else {
            self.state = EngineState::SequencedStarting(runner);
        }
    }

    fn apply_deploy_command(&mut self, world: &mut dyn World, now: f64, command: &DeployCommand) {
        let ids: Vec<VesselId> = self.roster.iter().map(|c| c.id).collect();
        match command {
            DeployCommand::Stage => {
                for &id in &ids {
                    world.fire_next_stage(id);
                }
            }
            DeployCommand::ActionGroup { group, state } => {
                for &id in &ids {
                    match state {
                        Some(state) => world.set_action_group(id, *group, *state),
                        None => world.toggle_action_group(id, *group),
                    }
                }
            }
            DeployCommand::TogglePilot { enabled } => {
                for &id in &ids {
                    if let Some(pilot) = world.pilot_mut(id) {
                        let target = enabled.unwrap_or(!pilot.enabled());
                        if target != pilot.enabled() {
                            if target {
                                pilot.activate();
                            } else {
                                pilot.deactivate();
                            }
                        }
                    }
                }
            }
            DeployCommand::ToggleGuard { enabled } => {
                for &id in &ids {
                    if let Some(weapons) = world.weapons_mut(id) {
                        let target = enabled.unwrap_or(!weapons.guard_mode());
                        if target != weapons.guard_mode() {
                            weapons.set_guard_mode(target);
                            if !target {
                                weapons.clear_target();
                            }
                        }
                    }
                }
            }
            DeployCommand::SetThrottle { percent } => {
                for &id in &ids {
                    world.set_throttle(id, percent / 100.0);
                }
            }
            DeployCommand::RemoveDebris => {
                world.remove_debris();
                self.remove_non_competitors(world, true);
            }
            DeployCommand::RemoveFairings => world.remove_fairings(),
            DeployCommand::EnableGm => self.enable_gm(now),
            DeployCommand::ActivateEngines => {
                for &id in &ids {
                    self.normalize_engines(world, id);
                }
            }
            DeployCommand::MassTrim => world.trim_mass_for_parity(),
            DeployCommand::ScaleGravity { scale } => world.set_gravity_scale(*scale),
        }
    }

    fn collision_sweep(&mut self, world: &mut dyn World, now: f64) {
        let mut graph = match self.ramming.take() {
            Some(graph) => graph,
            None => RammingGraph::new(world, &self.roster),
        };
        // Contact events are correlated before the graph sweep so event
        // handling and the sweep never interleave.
        while let Ok(event) = self.contact_rx.try_recv() {
            graph.process_contact(world, &self.settings, event.vessel, now);
        }
        graph.update_cpa(world, &self.settings, now);
        graph.flag_potential_collisions(world, &self.settings, self.ledger.as_ref(), now);
        graph.attribute_part_losses(
            world,
            &self.settings,
            self.ledger.as_mut(),
            &mut self.status,
            now,
        );
        self.ramming = Some(graph);
    }

    fn classifier_update(&mut self, world: &mut dyn World, now: f64) {
        let start_time = match self.start_time {
            Some(t) => t,
            None => return,
        };
        self.next_update += self.settings.update_interval();

        let mut vessels_to_kill: Vec<VesselId> = vec![];
        let mut alive: HashSet<VesselId> = HashSet::new();
        let mut alive_names: Vec<String> = vec![];

        for id in world.vessel_ids() {
            let telemetry = match world.telemetry(id) {
                Some(t) => t,
                None => continue,
            };
            if telemetry.kind.ignored() {
                continue;
            }
            if world.weapons(id).is_none() {
                continue;
            }
            let name = world.display_name(id).unwrap_or_else(|| format!("{id}"));
            alive.insert(id);
            alive_names.push(name.clone());

            let mut action = world.pilot(id).map(|p| p.activity()).unwrap_or_default();
            if action.is_empty() && telemetry.landed_or_splashed {
                action = "is landed".to_string();
            }
            self.pilot_actions.insert(id, action);

            if let Some(entry) = self.ledger.entry_mut(id) {
                if entry.previous_part_count > telemetry.part_count {
                    entry.last_lost_part_time = now;
                }
                entry.previous_part_count = telemetry.part_count;
                if telemetry.landed_or_splashed {
                    if !entry.landed_state {
                        entry.last_landed_time = now;
                        entry.landed_state = true;
                        if entry.landed_kill_timer.is_none() {
                            entry.landed_kill_timer = Some(now);
                        }
                    }
                } else {
                    if entry.landed_state {
                        entry.last_landed_time = now;
                        entry.landed_state = false;
                    }
                    if let Some(landed_since) = entry.landed_kill_timer {
                        // Safely airborne long enough; cancel the timer.
                        if now - landed_since > self.settings.airborne_reset_window {
                            entry.landed_kill_timer = None;
                        }
                    }
                }
            }

            // Everything below can kill; wait out the initial grace period.
            if now - start_time < self.settings.initial_grace_period {
                continue;
            }

            let recently_firing = world.weapons(id).is_some_and(|w| w.recently_firing());
            if recently_firing {
                if let Some(entry) = self.ledger.entry_mut(id) {
                    entry.last_fired_time = now;
                }
            }

            if !self.settings.infinite_ammo {
                let out = world.weapons(id).is_some_and(|w| w.out_of_ammo());
                if out && !self.out_of_ammo.contains(&id) {
                    // Report running out of weapons once.
                    self.out_of_ammo.insert(id);
                    let recent_attacker = self.ledger.entry(id).and_then(|entry| {
                        (now - entry.last_damage_time < 2.0)
                            .then(|| entry.last_attacker_name.clone())
                    });
                    match recent_attacker {
                        Some(attacker) => self.status.add(
                            now,
                            format!("{name} damaged by {attacker} and lost weapons"),
                        ),
                        None => self.status.add(now, format!("{name} is out of Ammunition")),
                    }
                }
                let guard = world.weapons(id).is_some_and(|w| w.guard_mode());
                if guard {
                    let pilot_alive = world.pilot(id).is_some();
                    let ramming_allowed = !self.settings.disable_ramming
                        && world.pilot(id).is_some_and(|p| p.allows_ramming());
                    if !pilot_alive || (out && !ramming_allowed) {
                        if let Some(weapons) = world.weapons_mut(id) {
                            weapons.set_guard_mode(false);
                        }
                    }
                }
            }

            let kill_timer = self.settings.kill_timer;
            if let Some(entry) = self.ledger.entry_mut(id) {
                entry.average_speed_sum += telemetry.surface_speed();
                entry.average_altitude_sum += telemetry.altitude;
                entry.average_count += 1;
                if entry.landed_state && kill_timer > 0.0 {
                    if let Some(landed_since) = entry.landed_kill_timer {
                        self.kill_timers.insert(id, now - landed_since);
                        if now - landed_since > kill_timer {
                            let surface_unit =
                                world.pilot(id).is_some_and(|p| p.is_surface_unit());
                            if !surface_unit {
                                vessels_to_kill.push(id);
                            }
                        }
                    }
                } else {
                    self.kill_timers.remove(&id);
                }
            }
        }

        self.register_deaths(now, &alive);
        self.refresh_dead_or_alive(&alive_names);

        // Check for too few competitors or teams left.
        let teams_alive: HashSet<Team> = alive
            .iter()
            .filter_map(|id| self.ledger.entry(*id).map(|e| e.team.clone()))
            .collect();
        if now - start_time > self.settings.initial_grace_period
            && (alive.len() < 2 || (!self.settings.last_one_standing && teams_alive.len() < 2))
            && !self.settings.continuous_spawning
        {
            let final_grace_start = *self.final_grace_start.get_or_insert(now);
            if self.settings.final_grace_period <= 60.0
                && now - final_grace_start > self.settings.final_grace_period
            {
                self.status.add(now, "All Pilots are Dead");
                for name in &alive_names {
                    self.status.add(now, format!("{name} wins the round!"));
                }
                log::info!("[{}] no viable competitors, dumping scores", self.match_id);
                self.stop_with(world, now, "");
                return;
            }
        }

        for id in vessels_to_kill {
            self.forced_kill(
                world,
                now,
                id,
                "Landed Too Long",
                GmKillReason::LandedTooLong,
                |name| format!("{name} was landed too long."),
            );
        }

        if self.settings.noncompetitor_removal_delay <= 60.0 {
            self.remove_non_competitors(world, false);
        }
        self.clean_debris(world);
        self.check_altitude_limits(world, now, &alive);
        self.find_victim(world, now, start_time, &alive);

        if self.settings.duration > 0.0 && now - start_time >= self.settings.duration {
            let message = "Ending competition due to out-of-time.";
            self.status.add(now, message);
            log::info!("[{}] {message}", self.match_id);
            self.stop_with(world, now, "due to out-of-time");
        }
    }

    fn register_deaths(&mut self, now: f64, alive: &HashSet<VesselId>) {
        for id in self.ledger.player_ids() {
            if alive.contains(&id) {
                continue;
            }
            let (still_alive, last_damage_kind) = match self.ledger.entry(id) {
                Some(entry) => (entry.alive(), entry.last_damage_kind),
                None => continue,
            };
            if !still_alive {
                continue;
            }
            // If the player was involved in a collision, wait until the
            // collision is resolved before registering the death.
            if let Some(graph) = &mut self.ramming {
                if graph.has_unresolved_collision(id) {
                    if let Some(t) = graph.latest_collision_time(id) {
                        graph.set_time_of_death(id, t);
                    }
                    if self.settings.debug_competition {
                        log::debug!(
                            "[{}] delaying death of {id} due to an unresolved collision",
                            self.match_id
                        );
                    }
                    continue;
                }
            }
            let time_of_death = if last_damage_kind == DamageKind::Ramming {
                self.ramming
                    .as_ref()
                    .and_then(|graph| graph.time_of_death(id))
                    .unwrap_or(now)
            } else {
                now
            };
            if !self.ledger.register_death(id, GmKillReason::None, time_of_death) {
                continue;
            }
            self.pilot_actions.insert(id, "is Dead".to_string());
            let entry = match self.ledger.entry(id) {
                Some(entry) => entry,
                None => continue,
            };
            let mut message = entry.name.clone();
            match entry.last_damage_kind {
                DamageKind::Guns => message.push_str(" was killed by "),
                DamageKind::Rockets => message.push_str(" was fragged by "),
                DamageKind::Missiles => message.push_str(" was exploded by "),
                DamageKind::Ramming => message.push_str(" was rammed by "),
                DamageKind::Incompetence => message.push_str(" CRASHED and BURNED."),
                DamageKind::None => message.push_str(" died."),
            }
            match entry.alive_state {
                AliveState::CleanKill => {
                    message.push_str(&entry.last_attacker_name);
                    message.push_str(" (NAILED 'EM! CLEAN KILL!)");
                }
                AliveState::HeadShot => {
                    message.push_str(&entry.last_attacker_name);
                    message.push_str(" (BOOM! HEAD SHOT!)");
                }
                AliveState::KillSteal => {
                    message.push_str(&entry.last_attacker_name);
                    message.push_str(" (KILL STEAL!)");
                }
                AliveState::AssistedKill => {
                    let attackers: Vec<String> =
                        entry.attackers.values().map(|a| a.name.clone()).collect();
                    let kinds: Vec<String> = entry
                        .damage_kinds_taken
                        .iter()
                        .map(|k| format!("{k:?}"))
                        .collect();
                    message.push_str(&format!("{} ({})", attackers.join(", "), kinds.join(", ")));
                }
                AliveState::Dead | AliveState::Alive => {}
            }
            self.status.add(now, message);
        }
    }

    fn refresh_dead_or_alive(&mut self, alive_names: &[String]) {
        let mut summary = String::from("ALIVE: ");
        for name in alive_names {
            summary.push_str(&format!("*{name}* "));
        }
        summary.push_str("    DEAD: ");
        for id in self.ledger.player_ids() {
            if let Some(entry) = self.ledger.entry(id) {
                if !entry.alive() {
                    summary.push_str(&format!(":{}: ", entry.name));
                }
            }
        }
        self.dead_or_alive = summary;
    }

    fn forced_kill(
        &mut self,
        world: &mut dyn World,
        now: f64,
        id: VesselId,
        default_cause: &str,
        gm_reason: GmKillReason,
        message: impl Fn(&str) -> String,
    ) {
        let name = match self.ledger.entry_mut(id) {
            Some(entry) => {
                if entry.last_attacker_name.is_empty() {
                    // Only attribute the environment if nobody damaged them.
                    entry.last_attacker_name = default_cause.to_string();
                }
                entry.name.clone()
            }
            None => world.display_name(id).unwrap_or_else(|| format!("{id}")),
        };
        if self.ledger.register_death(id, gm_reason, now) {
            self.status.add(now, message(&name));
        }
        if self.settings.debug_competition {
            log::debug!("[{}] {name} removed ({default_cause})", self.match_id);
        }
        self.kill_timers.remove(&id);
        world.destroy_vessel(id);
    }

    fn check_altitude_limits(&mut self, world: &mut dyn World, now: f64, alive: &HashSet<VesselId>) {
        let ids: Vec<VesselId> = self
            .ledger
            .player_ids()
            .into_iter()
            .filter(|id| alive.contains(id))
            .collect();
        if let Some(ceiling) = altitude_ceiling(self.settings.altitude_limit_high) {
            for &id in &ids {
                let too_high = world
                    .telemetry(id)
                    .is_some_and(|t| t.radar_altitude > ceiling);
                if too_high {
                    self.forced_kill(world, now, id, "Flew too high!", GmKillReason::AltitudeLimit, |name| {
                        format!("{name} flew too high!")
                    });
                }
            }
        }
        if let Some(floor) = altitude_floor(self.settings.altitude_limit_low) {
            for &id in &ids {
                let too_low = world
                    .telemetry(id)
                    .is_some_and(|t| t.radar_altitude < floor);
                if too_low {
                    self.forced_kill(world, now, id, "Flew too low!", GmKillReason::AltitudeLimit, |name| {
                        format!("{name} flew too low!")
                    });
                }
            }
        }
    }

    /// Periodic GM intervention: eliminate the single worst-performing live
    /// competitor, judged by an energy score with non-shooters always ranked
    /// worse than anyone who has fired recently.
    fn find_victim(
        &mut self,
        world: &mut dyn World,
        now: f64,
        start_time: f64,
        alive: &HashSet<VesselId>,
    ) {
        let decision_due = match self.decision_time {
            Some(t) => now >= t,
            None => false,
        };
        if !decision_due {
            return;
        }
        self.decision_time = self
            .settings
            .gm_enabled_by_frequency()
            .then(|| now + self.settings.gm_frequency);
        if !self.gm_enabled {
            return;
        }
        if now - start_time < self.settings.gm_grace_period {
            return;
        }

        let mut worst: Option<(VesselId, f64, bool)> = None;
        let mut competitor_count = 0;
        for id in self.ledger.player_ids() {
            if !alive.contains(&id) {
                continue;
            }
            let entry = match self.ledger.entry(id) {
                Some(entry) => entry,
                None => continue,
            };
            competitor_count += 1;
            // Kinetic plus potential energy.
            let mut score = entry.average_altitude()
                + entry.average_speed().powi(2) / self.settings.gm_speed_score_divisor;
            let aggressive = world.weapons(id).is_some_and(|w| w.guard_mode());
            if !aggressive {
                score *= self.settings.gm_passive_penalty;
            }
            let has_fired = now - entry.last_fired_time <= self.settings.gm_not_fired_window;
            if self.settings.debug_competition {
                log::debug!(
                    "[{}] victim check {} score={score:.0} fired={has_fired}",
                    self.match_id,
                    entry.name
                );
            }
            let is_worse = match worst {
                None => true,
                Some((_, worst_score, worst_fired)) => match (has_fired, worst_fired) {
                    (false, true) => true,
                    (true, false) => false,
                    _ => score < worst_score,
                },
            };
            if is_worse {
                worst = Some((id, score, has_fired));
            }
        }

        if competitor_count >= self.settings.gm_min_competitors {
            if let Some((victim, _, _)) = worst {
                if let Some(entry) = self.ledger.entry_mut(victim) {
                    entry.last_attacker_name = "GM".to_string();
                }
                let name = self
                    .ledger
                    .entry(victim)
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| format!("{victim}"));
                self.ledger.register_death(victim, GmKillReason::Gm, now);
                self.status
                    .add(now, format!("{name} was killed by the GM for being too slow."));
                if self.settings.debug_competition {
                    log::debug!("[{}] GM killing {name} for being too slow", self.match_id);
                }
                self.kill_timers.remove(&victim);
                world.destroy_vessel(victim);
            }
        }
        self.reset_average_speeds();
    }

    // Reset the tracked averages, keeping the current values as the first
    // sample so there's always something sensible in them.
    fn reset_average_speeds(&mut self) {
        for id in self.ledger.player_ids() {
            if let Some(entry) = self.ledger.entry_mut(id) {
                if entry.average_count == 0 {
                    entry.average_speed_sum = 0.0;
                    entry.average_altitude_sum = 0.0;
                } else {
                    entry.average_speed_sum /= entry.average_count as f64;
                    entry.average_altitude_sum /= entry.average_count as f64;
                    entry.average_count = 1;
                }
            }
        }
    }

    fn remove_non_competitors(&mut self, world: &mut dyn World, immediately: bool) {
        for id in world.vessel_ids() {
            let telemetry = match world.telemetry(id) {
                Some(t) => t,
                None => continue,
            };
            if telemetry.kind.ignored() {
                continue; // Debris is handled separately.
            }
            if self.noncompetitors_scheduled.contains(&id) {
                continue;
            }
            let active_pilot = world.pilot(id).is_some()
                && world.weapons(id).is_some()
                && world.has_command_source(id);
            if !active_pilot {
                self.noncompetitors_scheduled.insert(id);
                let delay = if immediately {
                    0.0
                } else {
                    self.settings.noncompetitor_removal_delay
                };
                world.remove_vessel(id, delay);
            }
        }
    }

    fn clean_debris(&mut self, world: &mut dyn World) {
        for id in world.vessel_ids() {
            let kind = match world.telemetry(id) {
                Some(t) => t.kind,
                None => continue,
            };
            if matches!(kind, VesselKind::Debris | VesselKind::SpaceObject)
                && !self.noncompetitors_scheduled.contains(&id)
            {
                self.noncompetitors_scheduled.insert(id);
                world.remove_vessel(id, 0.0);
            }
        }
    }
}
