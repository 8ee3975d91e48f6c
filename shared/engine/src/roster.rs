//! Resolves the set of valid competitors from the host world.

use crate::world::{Team, VesselId, World};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Competitor {
    pub id: VesselId,
    /// Display name at resolution time, after deduplication.
    pub name: String,
    pub team: Team,
}

/// Enumerate the currently loaded vessels and filter to valid competitors: a
/// pilot, a weapon system and a command source are required (one repair
/// attempt is made for missing modules), neutral teams are excluded, and
/// display names are deduplicated by suffixing `_1`, `_2`, … in the world so
/// downstream identity lookups stay unique.
///
/// Vessels that cannot be resolved are silently excluded.
pub fn resolve(world: &mut dyn World) -> Vec<Competitor> {
    let mut competitors = Vec::new();
    let mut unique_names: HashSet<String> = HashSet::new();
    for id in world.vessel_ids() {
        let telemetry = match world.telemetry(id) {
            Some(t) => t,
            None => continue,
        };
        if telemetry.kind.ignored() {
            continue;
        }
        if world.pilot(id).is_none() || world.weapons(id).is_none() {
            world.repair_modules(id);
            if world.pilot(id).is_none() || world.weapons(id).is_none() {
                continue; // Unfixable, ignore the vessel.
            }
        }
        if !world.has_command_source(id) {
            continue;
        }
        let team = match world.weapons(id) {
            Some(weapons) => weapons.team(),
            None => continue,
        };
        if team.neutral {
            continue;
        }
        let mut name = match world.display_name(id) {
            Some(name) => name,
            None => continue,
        };
        if unique_names.contains(&name) {
            let mut count = 1;
            let mut candidate = format!("{name}_{count}");
            while unique_names.contains(&candidate) {
                count += 1;
                candidate = format!("{name}_{count}");
            }
            world.set_display_name(id, &candidate);
            name = candidate;
        }
        unique_names.insert(name.clone());
        competitors.push(Competitor { id, name, team });
    }
    competitors
}

/// Group a roster by team, preserving roster order within each team.
pub fn by_team(roster: &[Competitor]) -> Vec<(Team, Vec<VesselId>)> {
    let mut teams: Vec<(Team, Vec<VesselId>)> = Vec::new();
    for competitor in roster {
        match teams.iter_mut().find(|(team, _)| *team == competitor.team) {
            Some((_, members)) => members.push(competitor.id),
            None => teams.push((competitor.team.clone(), vec![competitor.id])),
        }
    }
    teams
}
