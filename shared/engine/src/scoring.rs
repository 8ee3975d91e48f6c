//! Scoring ledger boundary.
//!
//! The ledger is a collaborator: the engine only reads and writes the fields
//! below. [`Scoreboard`] is the reference implementation used by the tests
//! and the headless runner; a host with its own persistence implements
//! [`ScoreLedger`] instead.

use crate::roster::Competitor;
use crate::world::{Team, VesselId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliveState {
    Alive,
    /// Damaged recently and only ever took damage from the killer.
    CleanKill,
    /// Damaged recently, but took damage a while ago from someone else.
    HeadShot,
    /// Damaged recently by multiple distinct attackers.
    KillSteal,
    /// Not damaged recently; everyone who contributed gets an assist.
    AssistedKill,
    /// Never took damage from others.
    Dead,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DamageKind {
    None,
    Guns,
    Rockets,
    Missiles,
    Ramming,
    Incompetence,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GmKillReason {
    None,
    Gm,
    LandedTooLong,
    AltitudeLimit,
}

impl std::fmt::Display for GmKillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GmKillReason::None => write!(f, "None"),
            GmKillReason::Gm => write!(f, "GM"),
            GmKillReason::LandedTooLong => write!(f, "Landed Too Long"),
            GmKillReason::AltitudeLimit => write!(f, "Altitude Limit"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AttackerRecord {
    pub name: String,
    pub first_hit_time: f64,
    pub last_hit_time: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeathRecord {
    pub time: f64,
    pub gm_reason: GmKillReason,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub id: VesselId,
    pub name: String,
    pub team: Team,
    pub alive_state: AliveState,

    // Damage history.
    pub last_damage_time: f64,
    pub last_attacker: Option<VesselId>,
    /// Presentation name of the last attacker; also carries environmental
    /// causes such as "Flew too high!".
    pub last_attacker_name: String,
    pub last_damage_kind: DamageKind,
    pub attackers: BTreeMap<VesselId, AttackerRecord>,
    pub damage_kinds_taken: BTreeSet<DamageKind>,

    // Telemetry aggregates maintained by the live tick.
    pub average_speed_sum: f64,
    pub average_altitude_sum: f64,
    pub average_count: u32,
    pub landed_state: bool,
    pub last_landed_time: f64,
    /// Set when the vessel lands, cleared after a safe stretch airborne.
    pub landed_kill_timer: Option<f64>,
    pub previous_part_count: usize,
    pub last_lost_part_time: f64,
    pub last_fired_time: f64,

    // Ram tallies.
    pub rams_dealt: u32,
    pub parts_rammed: u32,

    pub death: Option<DeathRecord>,
}

impl ScoreEntry {
    fn new(id: VesselId, name: String, team: Team) -> Self {
        ScoreEntry {
            id,
            name,
            team,
            alive_state: AliveState::Alive,
            last_damage_time: f64::NEG_INFINITY,
            last_attacker: None,
            last_attacker_name: String::new(),
            last_damage_kind: DamageKind::None,
            attackers: BTreeMap::new(),
            damage_kinds_taken: BTreeSet::new(),
            average_speed_sum: 0.0,
            average_altitude_sum: 0.0,
            average_count: 0,
            landed_state: false,
            last_landed_time: f64::NEG_INFINITY,
            landed_kill_timer: None,
            previous_part_count: 0,
            last_lost_part_time: f64::NEG_INFINITY,
            last_fired_time: f64::NEG_INFINITY,
            rams_dealt: 0,
            parts_rammed: 0,
            death: None,
        }
    }

    pub fn alive(&self) -> bool {
        self.alive_state == AliveState::Alive
    }

    pub fn average_speed(&self) -> f64 {
        if self.average_count == 0 {
            0.0
        } else {
            self.average_speed_sum / self.average_count as f64
        }
    }

    pub fn average_altitude(&self) -> f64 {
        if self.average_count == 0 {
            0.0
        } else {
            self.average_altitude_sum / self.average_count as f64
        }
    }
}

pub trait ScoreLedger {
    /// Reset the ledger for a new match with the given roster.
    fn configure_players(&mut self, roster: &[Competitor]);
    /// Track a competitor that joined mid-match (continuous spawning).
    fn add_player(&mut self, competitor: &Competitor);
    fn remove_player(&mut self, id: VesselId);
    fn player_ids(&self) -> Vec<VesselId>;
    fn entry(&self, id: VesselId) -> Option<&ScoreEntry>;
    fn entry_mut(&mut self, id: VesselId) -> Option<&mut ScoreEntry>;
    fn register_damage(
        &mut self,
        victim: VesselId,
        attacker: Option<VesselId>,
        attacker_name: &str,
        kind: DamageKind,
        time: f64,
    );
    fn register_ram(&mut self, rammer: VesselId, victim: VesselId, time: f64, parts_lost: usize);
    /// Register a death. Returns false if the competitor was already dead or
    /// unknown; a competitor is registered dead at most once per match.
    fn register_death(&mut self, victim: VesselId, gm_reason: GmKillReason, time: f64) -> bool;
    fn death_count(&self) -> usize;
    /// Persist the results for this match id. The reference implementation
    /// writes them to the log.
    fn log_results(&self, match_id: u64, message: &str, tag: &str);
}

/// Reference ledger implementation.
pub struct Scoreboard {
    entries: BTreeMap<VesselId, ScoreEntry>,
    deaths: Vec<VesselId>,
    head_shot_window: f64,
    kill_steal_window: f64,
}

impl Scoreboard {
    pub fn new(head_shot_window: f64, kill_steal_window: f64) -> Self {
        Scoreboard {
            entries: BTreeMap::new(),
            deaths: Vec::new(),
            head_shot_window,
            kill_steal_window,
        }
    }

    /// Death order, oldest first.
    pub fn deaths(&self) -> &[VesselId] {
        &self.deaths
    }

    fn classify(&self, entry: &ScoreEntry, gm_reason: GmKillReason, time: f64) -> AliveState {
        let damaged_recently = time - entry.last_damage_time <= self.head_shot_window;
        if damaged_recently && !entry.attackers.is_empty() {
            if entry.attackers.len() == 1 {
                return AliveState::CleanKill;
            }
            let recent_attackers = entry
                .attackers
                .values()
                .filter(|a| time - a.last_hit_time <= self.kill_steal_window)
                .count();
            if recent_attackers <= 1 {
                AliveState::HeadShot
            } else {
                AliveState::KillSteal
            }
        } else if !entry.attackers.is_empty() || gm_reason != GmKillReason::None {
            AliveState::AssistedKill
        } else {
            AliveState::Dead
        }
    }
}

impl Default for Scoreboard {
    fn default() -> Self {
        Scoreboard::new(3.0, 5.0)
    }
}

impl ScoreLedger for Scoreboard {
    fn configure_players(&mut self, roster: &[Competitor]) {
        self.entries.clear();
        self.deaths.clear();
        for competitor in roster {
            self.add_player(competitor);
        }
    }

    fn add_player(&mut self, competitor: &Competitor) {
        self.entries.insert(
            competitor.id,
            ScoreEntry::new(competitor.id, competitor.name.clone(), competitor.team.clone()),
        );
    }

    fn remove_player(&mut self, id: VesselId) {
        self.entries.remove(&id);
    }

    fn player_ids(&self) -> Vec<VesselId> {
        self.entries.keys().cloned().collect()
    }

    fn entry(&self, id: VesselId) -> Option<&ScoreEntry> {
        self.entries.get(&id)
    }

    fn entry_mut(&mut self, id: VesselId) -> Option<&mut ScoreEntry> {
        self.entries.get_mut(&id)
    }

    fn register_damage(
        &mut self,
        victim: VesselId,
        attacker: Option<VesselId>,
        attacker_name: &str,
        kind: DamageKind,
        time: f64,
    ) {
        let entry = match self.entries.get_mut(&victim) {
            Some(entry) => entry,
            None => return,
        };
        entry.last_damage_time = time;
        entry.last_attacker = attacker;
        entry.last_attacker_name = attacker_name.to_string();
        entry.last_damage_kind = kind;
        entry.damage_kinds_taken.insert(kind);
        if let Some(attacker) = attacker {
            if attacker != victim {
                entry
                    .attackers
                    .entry(attacker)
                    .and_modify(|record| record.last_hit_time = time)
                    .or_insert(AttackerRecord {
                        name: attacker_name.to_string(),
                        first_hit_time: time,
                        last_hit_time: time,
                    });
            }
        }
    }

    fn register_ram(&mut self, rammer: VesselId, victim: VesselId, time: f64, parts_lost: usize) {
        let rammer_name = match self.entries.get_mut(&rammer) {
            Some(entry) => {
                entry.rams_dealt += 1;
                entry.parts_rammed += parts_lost as u32;
                entry.name.clone()
            }
            None => format!("{rammer}"),
        };
        self.register_damage(victim, Some(rammer), &rammer_name, DamageKind::Ramming, time);
    }

    fn register_death(&mut self, victim: VesselId, gm_reason: GmKillReason, time: f64) -> bool {
        let state = match self.entries.get(&victim) {
            Some(entry) if entry.alive() => self.classify(entry, gm_reason, time),
            Some(entry) => {
                log::warn!("{} is already registered dead", entry.name);
                return false;
            }
            None => return false,
        };
        let entry = self.entries.get_mut(&victim).unwrap();
        entry.alive_state = state;
        entry.death = Some(DeathRecord { time, gm_reason });
        self.deaths.push(victim);
        true
    }

    fn death_count(&self) -> usize {
        self.deaths.len()
    }

    fn log_results(&self, match_id: u64, message: &str, tag: &str) {
        let header = if tag.is_empty() {
            format!("results for match {match_id}")
        } else {
            format!("results for match {match_id} [{tag}]")
        };
        if message.is_empty() {
            log::info!("{header}");
        } else {
            log::info!("{header}: {message}");
        }
        for entry in self.entries.values() {
            match (&entry.death, entry.alive_state) {
                (None, _) => log::info!("  {}: ALIVE", entry.name),
                (Some(death), state) => log::info!(
                    "  {}: DEAD at {:.1} ({:?}, {:?}, last damaged by {})",
                    entry.name,
                    death.time,
                    state,
                    death.gm_reason,
                    if entry.last_attacker_name.is_empty() {
                        "nobody"
                    } else {
                        &entry.last_attacker_name
                    },
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Team;

    fn competitor(id: u64, name: &str, team: &str) -> Competitor {
        Competitor {
            id: VesselId(id),
            name: name.to_string(),
            team: Team::named(team),
        }
    }

    fn scoreboard() -> Scoreboard {
        let mut scores = Scoreboard::new(3.0, 5.0);
        scores.configure_players(&[
            competitor(1, "Alpha", "A"),
            competitor(2, "Bravo", "B"),
            competitor(3, "Charlie", "B"),
        ]);
        scores
    }

    #[test]
    fn test_clean_kill() {
        let mut scores = scoreboard();
        scores.register_damage(VesselId(1), Some(VesselId(2)), "Bravo", DamageKind::Guns, 99.0);
        assert!(scores.register_death(VesselId(1), GmKillReason::None, 100.0));
        assert_eq!(scores.entry(VesselId(1)).unwrap().alive_state, AliveState::CleanKill);
    }

    #[test]
    fn test_head_shot() {
        let mut scores = scoreboard();
        scores.register_damage(VesselId(1), Some(VesselId(3)), "Charlie", DamageKind::Guns, 10.0);
        scores.register_damage(VesselId(1), Some(VesselId(2)), "Bravo", DamageKind::Guns, 99.0);
        assert!(scores.register_death(VesselId(1), GmKillReason::None, 100.0));
        assert_eq!(scores.entry(VesselId(1)).unwrap().alive_state, AliveState::HeadShot);
    }

    #[test]
    fn test_kill_steal() {
        let mut scores = scoreboard();
        scores.register_damage(VesselId(1), Some(VesselId(3)), "Charlie", DamageKind::Guns, 97.0);
        scores.register_damage(VesselId(1), Some(VesselId(2)), "Bravo", DamageKind::Guns, 99.0);
        assert!(scores.register_death(VesselId(1), GmKillReason::None, 100.0));
        assert_eq!(scores.entry(VesselId(1)).unwrap().alive_state, AliveState::KillSteal);
    }

    #[test]
    fn test_assist_and_suicide() {
        let mut scores = scoreboard();
        scores.register_damage(VesselId(1), Some(VesselId(2)), "Bravo", DamageKind::Guns, 10.0);
        assert!(scores.register_death(VesselId(1), GmKillReason::None, 100.0));
        assert_eq!(scores.entry(VesselId(1)).unwrap().alive_state, AliveState::AssistedKill);

        assert!(scores.register_death(VesselId(2), GmKillReason::None, 100.0));
        assert_eq!(scores.entry(VesselId(2)).unwrap().alive_state, AliveState::Dead);

        assert!(scores.register_death(VesselId(3), GmKillReason::Gm, 100.0));
        assert_eq!(scores.entry(VesselId(3)).unwrap().alive_state, AliveState::AssistedKill);
    }

    #[test]
    fn test_death_registered_at_most_once() {
        let mut scores = scoreboard();
        assert!(scores.register_death(VesselId(1), GmKillReason::None, 50.0));
        assert!(!scores.register_death(VesselId(1), GmKillReason::None, 60.0));
        assert_eq!(scores.death_count(), 1);
        assert_eq!(scores.entry(VesselId(1)).unwrap().death.as_ref().unwrap().time, 50.0);
    }

    #[test]
    fn test_ram_tallies_and_damage() {
        let mut scores = scoreboard();
        scores.register_ram(VesselId(2), VesselId(1), 42.0, 7);
        let rammer = scores.entry(VesselId(2)).unwrap();
        assert_eq!(rammer.rams_dealt, 1);
        assert_eq!(rammer.parts_rammed, 7);
        let victim = scores.entry(VesselId(1)).unwrap();
        assert_eq!(victim.last_damage_kind, DamageKind::Ramming);
        assert_eq!(victim.last_attacker, Some(VesselId(2)));
        assert_eq!(victim.last_damage_time, 42.0);
    }
}
