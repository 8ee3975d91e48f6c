//! Ramming and collision attribution.
//!
//! Tracks every pair of live competitors, predicts closest approaches from
//! sampled telemetry, correlates host contact events with flagged pairs, and
//! decides who rammed whom from part-loss deltas and approach geometry. The
//! death classifier consults this graph before finalising any death so that a
//! vessel killed in a collision is attributed after the collision resolves.
//!
//! Pair state is stored once per unordered pair with per-side fields, so the
//! symmetric quantities (time to closest approach, the potential-collision
//! and collision-detected flags) cannot diverge between the two directions.

use crate::config::Settings;
use crate::roster::Competitor;
use crate::scoring::{DamageKind, ScoreLedger};
use crate::status::StatusFeed;
use crate::world::{VesselId, World};
use nalgebra::Vector3;
use std::collections::BTreeMap;

/// Time of closest approach for two points in linear motion, clamped to
/// `(0, horizon)`; anything receding or too far out reports the horizon.
pub fn closest_approach_time(dp: Vector3<f64>, dv: Vector3<f64>, horizon: f64) -> f64 {
    let closing_speed_sq = dv.norm_squared();
    if closing_speed_sq < 1e-12 {
        return horizon;
    }
    let t = -dp.dot(&dv) / closing_speed_sq;
    if t > 0.0 && t < horizon {
        t
    } else {
        horizon
    }
}

/// Angle in degrees between a vessel's velocity and the direction to the
/// other vessel's centre of mass.
pub fn approach_angle(velocity: &Vector3<f64>, to_target: &Vector3<f64>) -> f64 {
    let denominator = velocity.norm() * to_target.norm();
    if denominator < 1e-12 {
        return 0.0;
    }
    (velocity.dot(to_target) / denominator)
        .clamp(-1.0, 1.0)
        .acos()
        .to_degrees()
}

#[derive(Clone, Debug)]
pub struct VesselEntry {
    pub name: String,
    /// Tracked part count; decremented as collisions are attributed so that
    /// later collisions in the same sweep see updated counts.
    pub part_count: usize,
    /// Radius snapshotted when a potential collision was last detected.
    pub radius: f64,
    /// Set when a death had to wait for a collision to resolve.
    pub time_of_death: Option<f64>,
}

/// Unordered pair of vessel ids; the smaller id is side 0.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    a: VesselId,
    b: VesselId,
}

impl PairKey {
    pub fn new(x: VesselId, y: VesselId) -> Self {
        if x <= y {
            PairKey { a: x, b: y }
        } else {
            PairKey { a: y, b: x }
        }
    }

    pub fn contains(&self, id: VesselId) -> bool {
        self.a == id || self.b == id
    }

    pub fn side(&self, id: VesselId) -> Option<usize> {
        if id == self.a {
            Some(0)
        } else if id == self.b {
            Some(1)
        } else {
            None
        }
    }

    pub fn vessel(&self, side: usize) -> VesselId {
        if side == 0 {
            self.a
        } else {
            self.b
        }
    }

    pub fn other(&self, id: VesselId) -> VesselId {
        if id == self.a {
            self.b
        } else {
            self.a
        }
    }
}

#[derive(Clone, Debug)]
pub struct PairState {
    pub last_cpa_update: f64,
    pub time_to_cpa: f64,
    pub potential_collision: bool,
    pub detection_time: f64,
    /// Approach angle to the other's centre of mass, per side, captured when
    /// the potential collision was first detected.
    pub angle_to_com: [f64; 2],
    /// Ram was attempted between detection and the actual collision, per side.
    pub ramming: [bool; 2],
    pub collision_detected: bool,
    pub collision_time: f64,
    /// Part counts per side just prior to the collision.
    pub parts_prior: [usize; 2],
    /// Squared separation at the time of collision.
    pub sqr_separation: f64,
}

impl PairState {
    fn new(horizon: f64) -> Self {
        PairState {
            last_cpa_update: f64::NEG_INFINITY,
            time_to_cpa: horizon,
            potential_collision: false,
            detection_time: f64::NEG_INFINITY,
            angle_to_com: [0.0; 2],
            ramming: [false; 2],
            collision_detected: false,
            collision_time: f64::NEG_INFINITY,
            parts_prior: [0; 2],
            sqr_separation: 0.0,
        }
    }
}

/// Directional read of a pair relationship, for queries and tests.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetView {
    pub time_to_cpa: f64,
    pub potential_collision: bool,
    pub collision_detected: bool,
    pub angle_to_com: f64,
    pub ramming: bool,
    pub parts_prior_of_target: usize,
}

#[derive(Default)]
pub struct RammingGraph {
    entries: BTreeMap<VesselId, VesselEntry>,
    pairs: BTreeMap<PairKey, PairState>,
}

impl RammingGraph {
    pub fn new(world: &dyn World, roster: &[Competitor]) -> Self {
        let mut graph = RammingGraph::default();
        for competitor in roster {
            graph.add_vessel(world, competitor);
        }
        graph
    }

    /// Track a competitor that joined after the match went live.
    pub fn add_vessel(&mut self, world: &dyn World, competitor: &Competitor) {
        let (part_count, radius) = match world.telemetry(competitor.id) {
            Some(t) => (t.part_count, t.radius),
            None => (0, 0.0),
        };
        for &other in self.entries.keys() {
            // Default horizon; refined on the first sweep.
            self.pairs
                .insert(PairKey::new(competitor.id, other), PairState::new(0.0));
        }
        self.entries.insert(
            competitor.id,
            VesselEntry {
                name: competitor.name.clone(),
                part_count,
                radius,
                time_of_death: None,
            },
        );
    }

    pub fn remove_vessel(&mut self, id: VesselId) {
        self.entries.remove(&id);
        self.pairs.retain(|key, _| !key.contains(id));
    }

    pub fn contains(&self, id: VesselId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn entry(&self, id: VesselId) -> Option<&VesselEntry> {
        self.entries.get(&id)
    }

    pub fn set_time_of_death(&mut self, id: VesselId, time: f64) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.time_of_death = Some(time);
        }
    }

    pub fn time_of_death(&self, id: VesselId) -> Option<f64> {
        self.entries.get(&id).and_then(|e| e.time_of_death)
    }

    pub fn target_info(&self, from: VesselId, to: VesselId) -> Option<TargetView> {
        let key = PairKey::new(from, to);
        let pair = self.pairs.get(&key)?;
        let from_side = key.side(from)?;
        let to_side = 1 - from_side;
        Some(TargetView {
            time_to_cpa: pair.time_to_cpa,
            potential_collision: pair.potential_collision,
            collision_detected: pair.collision_detected,
            angle_to_com: pair.angle_to_com[from_side],
            ramming: pair.ramming[from_side],
            parts_prior_of_target: pair.parts_prior[to_side],
        })
    }

    /// Whether any collision involving this vessel is still unresolved.
    pub fn has_unresolved_collision(&self, id: VesselId) -> bool {
        self.pairs
            .iter()
            .any(|(key, pair)| key.contains(id) && pair.collision_detected)
    }

    /// Latest detection time among this vessel's unresolved collisions.
    pub fn latest_collision_time(&self, id: VesselId) -> Option<f64> {
        self.pairs
            .iter()
            .filter(|(key, pair)| key.contains(id) && pair.collision_detected)
            .map(|(_, pair)| pair.collision_time)
            .fold(None, |acc, t| Some(acc.map_or(t, |a: f64| a.max(t))))
    }

    fn keys_involving(&self, id: VesselId) -> Vec<PairKey> {
        self.pairs
            .keys()
            .filter(|key| key.contains(id))
            .cloned()
            .collect()
    }

    /// Refresh predicted times to closest approach. A pair is only
    /// recomputed once at least half of its previous prediction has elapsed;
    /// pairs with a missing party are pinned to the horizon.
    pub fn update_cpa(&mut self, world: &dyn World, settings: &Settings, now: f64) {
        let horizon = settings.max_cpa_horizon;
        for (key, pair) in self.pairs.iter_mut() {
            match (world.telemetry(key.a), world.telemetry(key.b)) {
                (Some(ta), Some(tb)) => {
                    if now - pair.last_cpa_update > pair.time_to_cpa / 2.0 {
                        let dp = tb.position - ta.position;
                        let dv = tb.velocity - ta.velocity;
                        pair.time_to_cpa = closest_approach_time(dp, dv, horizon);
                        pair.last_cpa_update = now;
                    }
                }
                _ => {
                    // One of the vessels is gone; not considered for new
                    // potential collisions.
                    pair.time_to_cpa = horizon;
                }
            }
        }
    }

    /// Flag pairs whose predicted approach falls inside the detection window
    /// and whose separation is within the potential-collision margin.
    /// Unconfirmed flags expire after twice the detection window.
    pub fn flag_potential_collisions(
        &mut self,
        world: &dyn World,
        settings: &Settings,
        ledger: &dyn ScoreLedger,
        now: f64,
    ) {
        let window = settings.collision_detection_window;
        let margin = settings.potential_collision_margin;
        let RammingGraph { entries, pairs } = self;
        for (key, pair) in pairs.iter_mut() {
            if pair.time_to_cpa < window {
                // A destroyed party keeps existing flags running on their
                // timer but never starts a new detection.
                let (ta, tb) = match (world.telemetry(key.a), world.telemetry(key.b)) {
                    (Some(ta), Some(tb)) => (ta, tb),
                    _ => continue,
                };
                let separation = (tb.position - ta.position).norm();
                if separation >= margin * (ta.radius + tb.radius) {
                    continue;
                }
                if !pair.potential_collision {
                    // Snapshot part counts, radii and approach angles when
                    // the potential collision is first detected. Angles are
                    // not refreshed afterwards.
                    for (id, telemetry) in [(key.a, &ta), (key.b, &tb)] {
                        if let Some(entry) = entries.get_mut(&id) {
                            entry.part_count = telemetry.part_count;
                            entry.radius = telemetry.radius;
                        }
                    }
                    pair.angle_to_com = [
                        approach_angle(&ta.velocity, &(tb.position - ta.position)),
                        approach_angle(&tb.velocity, &(ta.position - tb.position)),
                    ];
                } else {
                    // Re-snapshot part counts if a party got shot between
                    // detection and impact, so gunfire losses aren't charged
                    // to the ram.
                    for (id, telemetry) in [(key.a, &ta), (key.b, &tb)] {
                        let entry = match entries.get_mut(&id) {
                            Some(entry) => entry,
                            None => continue,
                        };
                        let shot_since_detection = ledger.entry(id).is_some_and(|score| {
                            score.last_damage_kind != DamageKind::Ramming
                                && score.last_damage_time > pair.detection_time
                        });
                        if shot_since_detection && entry.part_count != telemetry.part_count {
                            log::debug!(
                                "{} lost {} parts from getting shot",
                                entry.name,
                                entry.part_count as i64 - telemetry.part_count as i64
                            );
                            entry.part_count = telemetry.part_count;
                        }
                    }
                }
                pair.potential_collision = true;
                pair.detection_time = now;
                pair.ramming[0] |= world.weapons(key.a).is_some_and(|w| w.ramming_intent());
                pair.ramming[1] |= world.weapons(key.b).is_some_and(|w| w.ramming_intent());
            } else if pair.potential_collision && now - pair.detection_time > 2.0 * window {
                pair.potential_collision = false;
            }
        }
    }

    /// Correlate a host contact event naming one struck vessel with the
    /// flagged potential collisions. If no living flagged partner is close
    /// enough but a previously flagged partner has since been destroyed, the
    /// collision is attributed to it instead. If nothing qualifies the
    /// impact was with a non-competitor and all flags for the vessel clear.
    pub fn process_contact(
        &mut self,
        world: &dyn World,
        settings: &Settings,
        struck: VesselId,
        now: f64,
    ) {
        if !self.entries.contains_key(&struck) {
            return;
        }
        let struck_telemetry = match world.telemetry(struck) {
            Some(t) => t,
            None => {
                log::debug!("contact event for vanished vessel {struck}");
                return;
            }
        };
        let margin = settings.actual_collision_margin;
        let mut hit_vessel = false;
        let mut destroyed_candidates: Vec<PairKey> = Vec::new();
        for key in self.keys_involving(struck) {
            let other = key.other(struck);
            if !self.pairs.get(&key).is_some_and(|p| p.potential_collision) {
                continue;
            }
            let summed_radii = self.summed_radii(&key);
            match world.telemetry(other) {
                None => {
                    // A living candidate is the more likely collider;
                    // remember this one in case there are none.
                    destroyed_candidates.push(key);
                }
                Some(other_telemetry) => {
                    let separation =
                        (other_telemetry.position - struck_telemetry.position).norm();
                    if separation < margin * summed_radii {
                        self.mark_collision(key, separation * separation, now);
                        hit_vessel = true;
                    }
                }
            }
        }
        if !hit_vessel {
            for key in destroyed_candidates {
                let summed_radii = self.summed_radii(&key);
                let sentinel = (margin * summed_radii).powi(2) + 1.0;
                self.mark_collision(key, sentinel, now);
                hit_vessel = true;
            }
        }
        if !hit_vessel {
            log::debug!(
                "{} hit something other than a competitor",
                self.entries[&struck].name
            );
            for key in self.keys_involving(struck) {
                if let Some(pair) = self.pairs.get_mut(&key) {
                    pair.potential_collision = false;
                }
            }
        }
    }

    fn summed_radii(&self, key: &PairKey) -> f64 {
        let ra = self.entries.get(&key.a).map_or(0.0, |e| e.radius);
        let rb = self.entries.get(&key.b).map_or(0.0, |e| e.radius);
        ra + rb
    }

    fn mark_collision(&mut self, key: PairKey, sqr_separation: f64, now: f64) {
        let parts_prior = [
            self.entries.get(&key.a).map_or(0, |e| e.part_count),
            self.entries.get(&key.b).map_or(0, |e| e.part_count),
        ];
        let pair = match self.pairs.get_mut(&key) {
            Some(pair) => pair,
            None => return,
        };
        if pair.collision_detected {
            return; // Take the values when the collision is first detected.
        }
        pair.collision_detected = true;
        pair.parts_prior = parts_prior;
        pair.sqr_separation = sqr_separation;
        pair.collision_time = now;
        log::debug!(
            "collision detected between {} and {}",
            self.entries[&key.a].name,
            self.entries[&key.b].name
        );
    }

    /// Attribute part losses for collisions whose detection window has fully
    /// elapsed, assign ram credit, and mark the pairs resolved.
    pub fn attribute_part_losses(
        &mut self,
        world: &dyn World,
        settings: &Settings,
        ledger: &mut dyn ScoreLedger,
        status: &mut StatusFeed,
        now: f64,
    ) {
        let window = settings.collision_detection_window;
        let head_on_limit = settings.head_on_angle_limit;
        let current_parts = |id: VesselId| world.telemetry(id).map(|t| t.part_count);

        // Narrow multi-candidate collisions: if any partner of a vessel lost
        // parts (or died), partners that lost nothing are not the contact.
        // Then order by separation so part loss is charged to the nearest
        // candidate first.
        let mut by_vessel: Vec<(VesselId, f64, Vec<PairKey>)> = Vec::new();
        for vessel in self.entries.keys().cloned().collect::<Vec<_>>() {
            let involved = self.keys_involving(vessel);
            let past_window: Vec<PairKey> = involved
                .iter()
                .filter(|key| {
                    self.pairs.get(*key).is_some_and(|pair| {
                        pair.collision_detected && now - pair.detection_time > window
                    })
                })
                .cloned()
                .collect();
            if past_window.is_empty() {
                continue;
            }
            let detected: Vec<PairKey> = involved
                .iter()
                .filter(|key| self.pairs.get(*key).is_some_and(|p| p.collision_detected))
                .cloned()
                .collect();
            let someone_lost_parts = detected.iter().any(|key| {
                let other = key.other(vessel);
                let other_side = key.side(other).unwrap_or(0);
                let prior = self.pairs[key].parts_prior[other_side];
                match current_parts(other) {
                    None => true,
                    Some(count) => prior > count,
                }
            });
            if someone_lost_parts {
                for key in &detected {
                    let other = key.other(vessel);
                    let other_side = key.side(other).unwrap_or(0);
                    let prior = self.pairs[key].parts_prior[other_side];
                    if let Some(count) = current_parts(other) {
                        if prior == count {
                            if let Some(pair) = self.pairs.get_mut(key) {
                                pair.collision_detected = false;
                            }
                        }
                    }
                }
            }
            let mut remaining: Vec<(PairKey, f64)> = past_window
                .iter()
                .filter(|key| self.pairs.get(*key).is_some_and(|p| p.collision_detected))
                .map(|key| (*key, self.pairs[key].sqr_separation))
                .collect();
            if remaining.is_empty() {
                continue;
            }
            remaining.sort_by(|x, y| x.1.total_cmp(&y.1));
            let closest = remaining[0].1;
            by_vessel.push((
                vessel,
                closest,
                remaining.into_iter().map(|(key, _)| key).collect(),
            ));
        }
        by_vessel.sort_by(|x, y| x.1.total_cmp(&y.1));

        for (vessel, _, partners) in by_vessel {
            for key in partners {
                let other = key.other(vessel);
                let (vessel_side, other_side) = match key.side(vessel) {
                    Some(side) => (side, 1 - side),
                    None => continue,
                };
                let pair = match self.pairs.get(&key) {
                    Some(pair)
                        if pair.collision_detected && now - pair.detection_time > window =>
                    {
                        pair.clone()
                    }
                    _ => continue,
                };

                let mut rammed_parts_lost = match current_parts(other) {
                    None => pair.parts_prior[other_side] as i64,
                    Some(count) => pair.parts_prior[other_side] as i64 - count as i64,
                };
                let mut ramming_parts_lost = match current_parts(vessel) {
                    None => pair.parts_prior[vessel_side] as i64,
                    Some(count) => pair.parts_prior[vessel_side] as i64 - count as i64,
                };
                // Negative deltas can occur when near-simultaneous unrelated
                // damage resolves out of order.
                if rammed_parts_lost < 0 {
                    log::warn!(
                        "negative parts lost in ram: {} had {} parts prior, clamping to 0",
                        self.entries[&other].name,
                        pair.parts_prior[other_side]
                    );
                    rammed_parts_lost = 0;
                }
                if ramming_parts_lost < 0 {
                    log::warn!(
                        "negative parts lost in ram: {} had {} parts prior, clamping to 0",
                        self.entries[&vessel].name,
                        pair.parts_prior[vessel_side]
                    );
                    ramming_parts_lost = 0;
                }

                // Adjust tracked part counts immediately so later collisions
                // in this sweep see updated counts, and propagate into other
                // collisions still waiting to count parts.
                for (id, lost) in [(vessel, ramming_parts_lost), (other, rammed_parts_lost)] {
                    if let Some(entry) = self.entries.get_mut(&id) {
                        entry.part_count = entry.part_count.saturating_sub(lost as usize);
                    }
                    let tracked = self.entries.get(&id).map_or(0, |e| e.part_count);
                    for key2 in self.keys_involving(id) {
                        if key2 == key {
                            continue;
                        }
                        if let Some(pair2) = self.pairs.get_mut(&key2) {
                            if pair2.collision_detected {
                                if let Some(side) = key2.side(id) {
                                    pair2.parts_prior[side] = tracked;
                                }
                            }
                        }
                    }
                }

                // Decide who rammed whom.
                let mut rammer = vessel;
                let mut rammed = other;
                let mut rammer_side = vessel_side;
                let mut victim_parts_lost = rammed_parts_lost;
                let mut rammer_parts_lost = ramming_parts_lost;
                let mut head_on = false;
                let mut accidental = false;
                if pair.ramming[vessel_side] ^ pair.ramming[other_side] {
                    // Exactly one side had ramming intent; geometry is moot.
                    if !pair.ramming[vessel_side] {
                        (rammer, rammed) = (other, vessel);
                        rammer_side = other_side;
                        std::mem::swap(&mut victim_parts_lost, &mut rammer_parts_lost);
                    }
                } else if pair.angle_to_com[vessel_side] < head_on_limit
                    && pair.angle_to_com[other_side] < head_on_limit
                {
                    head_on = true;
                } else {
                    if pair.angle_to_com[vessel_side] > pair.angle_to_com[other_side] {
                        // The worse approach angle marks the rammed side.
                        (rammer, rammed) = (other, vessel);
                        rammer_side = other_side;
                        std::mem::swap(&mut victim_parts_lost, &mut rammer_parts_lost);
                    }
                    if !pair.ramming[rammer_side] && pair.angle_to_com[rammer_side] > head_on_limit
                    {
                        accidental = true;
                    }
                }

                let rammer_name = self.entries[&rammer].name.clone();
                let rammed_name = self.entries[&rammed].name.clone();
                if head_on {
                    status.add(
                        now,
                        format!(
                            "{rammed_name} and {rammer_name} RAMMED each other and lost \
                             {victim_parts_lost} and {rammer_parts_lost} parts, respectively."
                        ),
                    );
                } else {
                    status.add(
                        now,
                        format!(
                            "{rammed_name} got {}RAMMED by {rammer_name} and lost \
                             {victim_parts_lost} parts ({rammer_name} lost {rammer_parts_lost} \
                             parts).",
                            if accidental { "ACCIDENTALLY " } else { "" }
                        ),
                    );
                }
                if !accidental {
                    ledger.register_ram(
                        rammer,
                        rammed,
                        pair.collision_time,
                        victim_parts_lost as usize,
                    );
                    if head_on {
                        ledger.register_ram(
                            rammed,
                            rammer,
                            pair.collision_time,
                            rammer_parts_lost as usize,
                        );
                    }
                }

                // Resolved; a new potential-collision cycle may begin later.
                if let Some(pair) = self.pairs.get_mut(&key) {
                    pair.collision_detected = false;
                }
            }
        }
    }
}
