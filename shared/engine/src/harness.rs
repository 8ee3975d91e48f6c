//! Deterministic kinematic stub world.
//!
//! Implements the collaborator interfaces with straight-line vessels that fly
//! toward commanded points at a fixed cruise speed, so match phases and
//! collision scenarios can be driven end-to-end without a physics engine.
//! Used by the integration tests and the headless runner.

use crate::world::{
    PilotCommand, PilotControl, Team, Telemetry, VesselId, VesselKind, WeaponSystem, World,
};
use nalgebra::{Point3, Vector3};
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct StubPilot {
    pub enabled: bool,
    pub command: PilotCommand,
    pub target: Point3<f64>,
    pub leader: Option<VesselId>,
    /// Reports flight-ready once the pilot is enabled and this is set.
    pub engage_ready: bool,
    pub surface_unit: bool,
    pub allow_ramming: bool,
    pub activity: String,
}

impl Default for StubPilot {
    fn default() -> Self {
        StubPilot {
            enabled: false,
            command: PilotCommand::Free,
            target: Point3::origin(),
            leader: None,
            engage_ready: true,
            surface_unit: false,
            allow_ramming: true,
            activity: String::new(),
        }
    }
}

impl PilotControl for StubPilot {
    fn activate(&mut self) {
        self.enabled = true;
    }

    fn deactivate(&mut self) {
        self.enabled = false;
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn command_take_off(&mut self) {
        self.activity = "is taking off".to_string();
    }

    fn command_fly_to(&mut self, target: Point3<f64>) {
        self.command = PilotCommand::FlyTo;
        self.target = target;
    }

    fn command_follow(&mut self, leader: VesselId) {
        self.command = PilotCommand::Follow;
        self.leader = Some(leader);
    }

    fn command_attack(&mut self, target: Point3<f64>) {
        self.command = PilotCommand::Attack;
        self.target = target;
        self.activity = "is attacking".to_string();
    }

    fn release_command(&mut self) {
        self.command = PilotCommand::Free;
        self.leader = None;
    }

    fn current_command(&self) -> PilotCommand {
        self.command
    }

    fn can_engage(&self) -> bool {
        self.enabled && self.engage_ready
    }

    fn is_surface_unit(&self) -> bool {
        self.surface_unit
    }

    fn allows_ramming(&self) -> bool {
        self.allow_ramming
    }

    fn activity(&self) -> String {
        self.activity.clone()
    }
}

#[derive(Clone, Debug)]
pub struct StubWeapons {
    pub team: Team,
    pub guard: bool,
    pub target_locked: bool,
    pub out_of_ammo: bool,
    pub recently_firing: bool,
    pub ramming_intent: bool,
}

impl StubWeapons {
    pub fn new(team: Team) -> Self {
        StubWeapons {
            team,
            guard: false,
            target_locked: false,
            out_of_ammo: false,
            recently_firing: false,
            ramming_intent: false,
        }
    }
}

impl WeaponSystem for StubWeapons {
    fn team(&self) -> Team {
        self.team.clone()
    }

    fn guard_mode(&self) -> bool {
        self.guard
    }

    fn set_guard_mode(&mut self, enabled: bool) {
        self.guard = enabled;
    }

    fn clear_target(&mut self) {
        self.target_locked = false;
    }

    fn out_of_ammo(&self) -> bool {
        self.out_of_ammo
    }

    fn recently_firing(&self) -> bool {
        self.recently_firing
    }

    fn ramming_intent(&self) -> bool {
        self.ramming_intent
    }
}

#[derive(Clone, Debug)]
pub struct StubVessel {
    pub name: String,
    pub kind: VesselKind,
    pub position: Point3<f64>,
    pub velocity: Vector3<f64>,
    pub landed: bool,
    pub part_count: usize,
    pub radius: f64,
    pub cruise_speed: f64,
    pub active_engines: usize,
    pub has_command: bool,
    pub pilot: Option<StubPilot>,
    pub weapons: Option<StubWeapons>,
}

impl StubVessel {
    pub fn new(name: &str, team: &str) -> Self {
        StubVessel {
            name: name.to_string(),
            kind: VesselKind::Craft,
            position: Point3::origin(),
            velocity: Vector3::zeros(),
            landed: false,
            part_count: 20,
            radius: 10.0,
            cruise_speed: 100.0,
            active_engines: 1,
            has_command: true,
            pilot: Some(StubPilot::default()),
            weapons: Some(StubWeapons::new(Team::named(team))),
        }
    }
}

#[derive(Default)]
pub struct StubWorld {
    vessels: BTreeMap<VesselId, StubVessel>,
    next_id: u64,
    /// Vessels scheduled for removal with a nonzero delay.
    pub removal_requests: Vec<(VesselId, f64)>,
    /// Record of side-effect calls, for assertions.
    pub actions: Vec<String>,
    pub gravity_scale: f64,
    pub spawning_cancelled: bool,
}

impl StubWorld {
    pub fn new() -> Self {
        StubWorld {
            gravity_scale: 1.0,
            ..Default::default()
        }
    }

    pub fn spawn(&mut self, name: &str, team: &str, position: Point3<f64>) -> VesselId {
        let mut vessel = StubVessel::new(name, team);
        vessel.position = position;
        self.spawn_vessel(vessel)
    }

    pub fn spawn_vessel(&mut self, vessel: StubVessel) -> VesselId {
        self.next_id += 1;
        let id = VesselId(self.next_id);
        self.vessels.insert(id, vessel);
        id
    }

    pub fn vessel(&self, id: VesselId) -> Option<&StubVessel> {
        self.vessels.get(&id)
    }

    pub fn vessel_mut(&mut self, id: VesselId) -> Option<&mut StubVessel> {
        self.vessels.get_mut(&id)
    }

    /// Remove the vessel outright, as if it blew up.
    pub fn destroy(&mut self, id: VesselId) {
        self.vessels.remove(&id);
    }

    pub fn take_parts(&mut self, id: VesselId, count: usize) {
        if let Some(vessel) = self.vessels.get_mut(&id) {
            vessel.part_count = vessel.part_count.saturating_sub(count);
        }
    }

    pub fn set_velocity(&mut self, id: VesselId, velocity: Vector3<f64>) {
        if let Some(vessel) = self.vessels.get_mut(&id) {
            vessel.velocity = velocity;
        }
    }

    pub fn set_position(&mut self, id: VesselId, position: Point3<f64>) {
        if let Some(vessel) = self.vessels.get_mut(&id) {
            vessel.position = position;
        }
    }

    /// Advance all vessels by `dt` seconds of straight-line motion, steering
    /// piloted vessels toward their commanded points.
    pub fn step(&mut self, dt: f64) {
        let positions: BTreeMap<VesselId, Point3<f64>> = self
            .vessels
            .iter()
            .map(|(id, v)| (*id, v.position))
            .collect();
        for vessel in self.vessels.values_mut() {
            if let Some(pilot) = &vessel.pilot {
                if pilot.enabled {
                    let destination = match pilot.command {
                        PilotCommand::FlyTo | PilotCommand::Attack => Some(pilot.target),
                        PilotCommand::Follow => pilot.leader.and_then(|l| positions.get(&l)).cloned(),
                        PilotCommand::Free => None,
                    };
                    if let Some(destination) = destination {
                        let to_target = destination - vessel.position;
                        if to_target.norm() < vessel.cruise_speed * dt + 1.0 {
                            vessel.velocity = Vector3::zeros();
                            vessel.position = destination;
                        } else {
                            vessel.velocity = to_target.normalize() * vessel.cruise_speed;
                        }
                    }
                }
            }
            vessel.position += vessel.velocity * dt;
        }
    }
}

impl World for StubWorld {
    fn vessel_ids(&self) -> Vec<VesselId> {
        self.vessels.keys().cloned().collect()
    }

    fn telemetry(&self, id: VesselId) -> Option<Telemetry> {
        self.vessels.get(&id).map(|v| Telemetry {
            kind: v.kind,
            position: v.position,
            velocity: v.velocity,
            altitude: v.position.z,
            radar_altitude: v.position.z,
            landed_or_splashed: v.landed,
            part_count: v.part_count,
            radius: v.radius,
        })
    }

    fn display_name(&self, id: VesselId) -> Option<String> {
        self.vessels.get(&id).map(|v| v.name.clone())
    }

    fn set_display_name(&mut self, id: VesselId, name: &str) {
        if let Some(vessel) = self.vessels.get_mut(&id) {
            vessel.name = name.to_string();
        }
    }

    fn pilot(&self, id: VesselId) -> Option<&dyn PilotControl> {
        self.vessels
            .get(&id)?
            .pilot
            .as_ref()
            .map(|p| p as &dyn PilotControl)
    }

    fn pilot_mut(&mut self, id: VesselId) -> Option<&mut dyn PilotControl> {
        self.vessels
            .get_mut(&id)?
            .pilot
            .as_mut()
            .map(|p| p as &mut dyn PilotControl)
    }

    fn weapons(&self, id: VesselId) -> Option<&dyn WeaponSystem> {
        self.vessels
            .get(&id)?
            .weapons
            .as_ref()
            .map(|w| w as &dyn WeaponSystem)
    }

    fn weapons_mut(&mut self, id: VesselId) -> Option<&mut dyn WeaponSystem> {
        self.vessels
            .get_mut(&id)?
            .weapons
            .as_mut()
            .map(|w| w as &mut dyn WeaponSystem)
    }

    fn has_command_source(&self, id: VesselId) -> bool {
        self.vessels.get(&id).is_some_and(|v| v.has_command)
    }

    fn count_active_engines(&self, id: VesselId) -> usize {
        self.vessels.get(&id).map_or(0, |v| v.active_engines)
    }

    fn activate_all_engines(&mut self, id: VesselId, on: bool) {
        if let Some(vessel) = self.vessels.get_mut(&id) {
            vessel.active_engines = if on { 1 } else { 0 };
        }
        self.actions.push(format!("engines:{id}:{on}"));
    }

    fn apply_modifiers(&mut self, id: VesselId, mutators: &[String], handicapped: bool) {
        self.actions
            .push(format!("modifiers:{id}:{}:{handicapped}", mutators.join(";")));
    }

    fn destroy_vessel(&mut self, id: VesselId) {
        self.actions.push(format!("destroy:{id}"));
        self.vessels.remove(&id);
    }

    fn remove_vessel(&mut self, id: VesselId, delay: f64) {
        self.actions.push(format!("remove:{id}:{delay}"));
        if delay <= 0.0 {
            self.vessels.remove(&id);
        } else {
            self.removal_requests.push((id, delay));
        }
    }

    fn cancel_continuous_spawning(&mut self) {
        self.spawning_cancelled = true;
    }

    fn fire_next_stage(&mut self, id: VesselId) {
        self.actions.push(format!("stage:{id}"));
    }

    fn toggle_action_group(&mut self, id: VesselId, group: u8) {
        self.actions.push(format!("ag:{id}:{group}:toggle"));
    }

    fn set_action_group(&mut self, id: VesselId, group: u8, state: bool) {
        self.actions.push(format!("ag:{id}:{group}:{state}"));
    }

    fn set_throttle(&mut self, id: VesselId, throttle: f64) {
        self.actions.push(format!("throttle:{id}:{throttle}"));
    }

    fn remove_debris(&mut self) {
        self.actions.push("remove_debris".to_string());
    }

    fn remove_fairings(&mut self) {
        self.actions.push("remove_fairings".to_string());
    }

    fn trim_mass_for_parity(&mut self) {
        self.actions.push("mass_trim".to_string());
    }

    fn set_gravity_scale(&mut self, scale: f64) {
        self.gravity_scale = scale;
        self.actions.push(format!("gravity:{scale}"));
    }
}
