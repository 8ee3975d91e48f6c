//! Collaborator interfaces between the match engine and the host simulation.
//!
//! The engine does not own vessels. It observes them through [`Telemetry`]
//! snapshots and commands them through the [`PilotControl`] and
//! [`WeaponSystem`] handles, all keyed by a stable [`VesselId`] assigned by
//! the host. A handle that has gone missing (vessel destroyed or unloaded)
//! simply stops resolving; the engine treats that as "no longer collidable /
//! no longer controllable", never as an error.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Stable opaque identifier for a vessel, assigned by the host world when the
/// vessel is created. Display names are presentation-only and may be renamed
/// at any time; all engine data structures join on this id instead.
#[derive(
    Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct VesselId(pub u64);

impl From<VesselId> for u64 {
    fn from(id: VesselId) -> u64 {
        id.0
    }
}

impl std::fmt::Display for VesselId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum VesselKind {
    Craft,
    Debris,
    Projectile,
    SpaceObject,
}

impl VesselKind {
    /// Kinds that are never considered for the roster.
    pub fn ignored(&self) -> bool {
        !matches!(self, VesselKind::Craft)
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Team {
    pub name: String,
    pub neutral: bool,
}

impl Team {
    pub fn named(name: &str) -> Self {
        Team {
            name: name.to_string(),
            neutral: false,
        }
    }

    pub fn neutral() -> Self {
        Team {
            name: "Neutral".to_string(),
            neutral: true,
        }
    }
}

/// Positional state sampled from the host simulation at a discrete instant.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Telemetry {
    pub kind: VesselKind,
    pub position: Point3<f64>,
    pub velocity: Vector3<f64>,
    /// Altitude above the reference surface.
    pub altitude: f64,
    /// Altitude above local terrain, used by the altitude-limit rules.
    pub radar_altitude: f64,
    pub landed_or_splashed: bool,
    pub part_count: usize,
    /// Approximate bounding radius, used by the collision heuristics.
    pub radius: f64,
}

impl Telemetry {
    pub fn surface_speed(&self) -> f64 {
        self.velocity.norm()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PilotCommand {
    Free,
    Follow,
    FlyTo,
    Attack,
}

/// Control handle for a vessel's autopilot.
pub trait PilotControl {
    fn activate(&mut self);
    fn deactivate(&mut self);
    fn enabled(&self) -> bool;
    fn command_take_off(&mut self);
    fn command_fly_to(&mut self, target: Point3<f64>);
    fn command_follow(&mut self, leader: VesselId);
    fn command_attack(&mut self, target: Point3<f64>);
    fn release_command(&mut self);
    fn current_command(&self) -> PilotCommand;
    /// Whether the pilot reports itself flight-ready (e.g. airborne).
    fn can_engage(&self) -> bool;
    /// Surface units are exempt from the landed-too-long rule.
    fn is_surface_unit(&self) -> bool {
        false
    }
    /// Whether this pilot is configured to ram when out of other options.
    fn allows_ramming(&self) -> bool {
        true
    }
    /// Short human-readable description of the current activity.
    fn activity(&self) -> String {
        String::new()
    }
}

/// Handle for a vessel's weapon system.
pub trait WeaponSystem {
    fn team(&self) -> Team;
    fn guard_mode(&self) -> bool;
    fn set_guard_mode(&mut self, enabled: bool);
    fn clear_target(&mut self);
    fn out_of_ammo(&self) -> bool;
    fn recently_firing(&self) -> bool;
    /// Whether the vessel is actively attempting to ram something right now.
    fn ramming_intent(&self) -> bool;
}

/// The host simulation, as seen by the match engine.
///
/// Lookups return `None` when a vessel has vanished; the side-effect methods
/// with default implementations are optional host capabilities used by the
/// scripted deployment path and the debris-cleanup rules.
pub trait World {
    /// Ids of all currently loaded vessels, in a stable order.
    fn vessel_ids(&self) -> Vec<VesselId>;
    fn telemetry(&self, id: VesselId) -> Option<Telemetry>;
    fn display_name(&self, id: VesselId) -> Option<String>;
    fn set_display_name(&mut self, id: VesselId, name: &str);
    fn pilot(&self, id: VesselId) -> Option<&dyn PilotControl>;
    fn pilot_mut(&mut self, id: VesselId) -> Option<&mut dyn PilotControl>;
    fn weapons(&self, id: VesselId) -> Option<&dyn WeaponSystem>;
    fn weapons_mut(&mut self, id: VesselId) -> Option<&mut dyn WeaponSystem>;
    fn has_command_source(&self, id: VesselId) -> bool {
        true
    }

    /// One attempt to re-resolve missing modules before the vessel is
    /// excluded from the roster.
    fn repair_modules(&mut self, _id: VesselId) {}

    /// Apply configured per-vessel modifiers (mutators, handicaps).
    fn apply_modifiers(&mut self, _id: VesselId, _mutators: &[String], _handicapped: bool) {}

    fn count_active_engines(&self, _id: VesselId) -> usize {
        1
    }
    fn activate_all_engines(&mut self, _id: VesselId, _on: bool) {}

    /// Immediately kill a vessel (rule enforcement).
    fn destroy_vessel(&mut self, id: VesselId);
    /// Remove a vessel from the simulation, possibly after a delay.
    fn remove_vessel(&mut self, id: VesselId, delay: f64);
    fn cancel_continuous_spawning(&mut self) {}

    // Scripted-deployment side effects.
    fn fire_next_stage(&mut self, _id: VesselId) {}
    fn toggle_action_group(&mut self, _id: VesselId, _group: u8) {}
    fn set_action_group(&mut self, _id: VesselId, _group: u8, _state: bool) {}
    fn set_throttle(&mut self, _id: VesselId, _throttle: f64) {}
    fn remove_debris(&mut self) {}
    fn remove_fairings(&mut self) {}
    fn trim_mass_for_parity(&mut self) {}
    fn set_gravity_scale(&mut self, _scale: f64) {}
}
