//! Externally-loaded settings for the match engine.
//!
//! Every threshold, window and toggle the engine consults lives here so a
//! host can load them from disk and so historical matches can be reproduced
//! with the constants they were played under.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seed for the engine's rng (mutator selection).
    pub rng_seed: u64,

    // Match flow.
    /// Attribution and rule enforcement are suppressed for this long after
    /// the match goes live.
    pub initial_grace_period: f64,
    /// How long a "fewer than two teams" situation must persist before the
    /// match is stopped. Values above 60 disable the check.
    pub final_grace_period: f64,
    /// Match duration cap in seconds; 0 disables the cap.
    pub duration: f64,
    /// Seconds a vessel may remain continuously landed before it is killed
    /// off; 0 disables the kill timer.
    pub kill_timer: f64,
    /// A landed vessel's kill timer resets after this long safely airborne.
    pub airborne_reset_window: f64,
    /// Delay before non-competitors are removed; values above 60 disable the
    /// periodic sweep.
    pub noncompetitor_removal_delay: f64,
    /// Automatically stop waiting for teams to get in position after this
    /// many seconds.
    pub start_now_after: Option<f64>,

    // Tick cadence.
    /// Classifier cadence when the fast mode is enabled.
    pub fast_tick: bool,
    /// Classifier cadence otherwise.
    pub standard_tick_interval: f64,

    // Formation.
    /// Extra spacing added to the requested distance when computing the
    /// formation circle radius.
    pub formation_margin: f64,
    /// Base distance members must close to around their team leader.
    pub team_spacing_base: f64,
    /// Additional per-member allowance on the team spacing.
    pub team_spacing_per_member: f64,

    // Rule enforcement.
    /// Altitude ceiling control scalar; 55 or above disables the ceiling.
    /// See [`altitude_ceiling`] for the mapping to metres.
    pub altitude_limit_high: f64,
    /// Altitude floor control scalar; -39 or below disables the floor.
    /// See [`altitude_floor`] for the mapping to metres.
    pub altitude_limit_low: f64,
    pub infinite_ammo: bool,
    /// Globally forbid ramming as a fallback when out of ammunition.
    pub disable_ramming: bool,
    /// Engines are expected to stay off (gliding rounds).
    pub no_engines: bool,

    // GM intervention.
    /// Seconds between GM decisions; values above 60 disable the GM.
    pub gm_frequency: f64,
    /// The GM takes no victims for this long after the match goes live.
    pub gm_grace_period: f64,
    /// Vessels that haven't fired within this window rank worse than any
    /// vessel that has.
    pub gm_not_fired_window: f64,
    /// Divisor applied to speed^2 in the GM's energy score.
    pub gm_speed_score_divisor: f64,
    /// Score multiplier for vessels with their attack mode disabled.
    pub gm_passive_penalty: f64,
    /// The GM only ever acts while at least this many vessels are alive.
    pub gm_min_competitors: usize,

    // Kill-tier classification.
    /// The victim counts as "damaged recently" within this window.
    pub head_shot_window: f64,
    /// Other attackers within this window turn a kill into a steal.
    pub kill_steal_window: f64,

    // Collision prediction and attribution.
    /// Never predict closest approaches further ahead than this.
    pub max_cpa_horizon: f64,
    /// Pairs with a predicted approach inside this window become potential
    /// collisions; attribution waits this long after a collision for delayed
    /// destruction to settle.
    pub collision_detection_window: f64,
    /// Potential-collision separation margin, in multiples of summed radii.
    pub potential_collision_margin: f64,
    /// Actual-collision correlation margin, in multiples of summed radii.
    pub actual_collision_margin: f64,
    /// Both parties approaching within this many degrees of the other's
    /// centre of mass makes a collision a mutual head-on.
    pub head_on_angle_limit: f64,

    // Modes.
    /// Exempts the match from the two-teams-required termination check.
    pub last_one_standing: bool,
    /// Vessels are respawning continuously; termination checks and spawn
    /// cancellation behave accordingly.
    pub continuous_spawning: bool,

    // Modifiers.
    /// Names of available match mutators; empty disables mutators.
    pub mutator_list: Vec<String>,
    /// How many mutators are drawn from the list per match.
    pub mutators_to_apply: usize,
    /// Vessels on this list receive handicap modifiers at launch.
    pub hall_of_shame: Vec<String>,

    /// Verbose competition diagnostics.
    pub debug_competition: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            rng_seed: 0,
            initial_grace_period: 10.0,
            final_grace_period: 10.0,
            duration: 900.0,
            kill_timer: 15.0,
            airborne_reset_window: 15.0,
            noncompetitor_removal_delay: 30.0,
            start_now_after: None,
            fast_tick: false,
            standard_tick_interval: 1.0,
            formation_margin: 4000.0,
            team_spacing_base: 800.0,
            team_spacing_per_member: 100.0,
            altitude_limit_high: 55.0,
            altitude_limit_low: -39.0,
            infinite_ammo: false,
            disable_ramming: false,
            no_engines: false,
            gm_frequency: 61.0,
            gm_grace_period: 150.0,
            gm_not_fired_window: 120.0,
            gm_speed_score_divisor: 200.0,
            gm_passive_penalty: 0.5,
            gm_min_competitors: 3,
            head_shot_window: 3.0,
            kill_steal_window: 5.0,
            max_cpa_horizon: 5.0,
            collision_detection_window: 1.0,
            potential_collision_margin: 4.0,
            actual_collision_margin: 2.0,
            head_on_angle_limit: 20.0,
            last_one_standing: false,
            continuous_spawning: false,
            mutator_list: vec![],
            mutators_to_apply: 1,
            hall_of_shame: vec![],
            debug_competition: false,
        }
    }
}

impl Settings {
    /// Classifier cadence for the selected mode.
    pub fn update_interval(&self) -> f64 {
        if self.fast_tick {
            0.1
        } else {
            self.standard_tick_interval
        }
    }

    pub fn gm_enabled_by_frequency(&self) -> bool {
        self.gm_frequency <= 60.0
    }
}

/// Piecewise-linear mapping from the ceiling control scalar to metres.
/// Covers 100m steps up to 2km, 1km steps up to 20km, then 5km steps.
pub fn altitude_ceiling(setting: f64) -> Option<f64> {
    if setting >= 55.0 {
        return None;
    }
    let km = if setting < 20.0 {
        setting / 10.0
    } else if setting < 39.0 {
        setting - 18.0
    } else {
        (setting - 38.0) * 5.0 + 20.0
    };
    Some(km * 1000.0)
}

/// Piecewise-linear mapping from the floor control scalar to metres. The
/// negative range reaches below the surface for underwater arenas.
pub fn altitude_floor(setting: f64) -> Option<f64> {
    if setting <= -39.0 {
        return None;
    }
    let metres = if setting < -28.0 {
        (setting + 28.0) * 1000.0
    } else if setting < -19.0 {
        (setting + 19.0) * 100.0
    } else if setting < 0.0 {
        setting * 5.0
    } else if setting < 20.0 {
        setting * 100.0
    } else if setting < 39.0 {
        (setting - 18.0) * 1000.0
    } else {
        ((setting - 38.0) * 5.0 + 20.0) * 1000.0
    };
    Some(metres)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_altitude_ceiling_mapping() {
        assert_eq!(altitude_ceiling(55.0), None);
        assert_eq!(altitude_ceiling(60.0), None);
        assert_eq!(altitude_ceiling(10.0), Some(1000.0));
        assert_eq!(altitude_ceiling(19.0), Some(1900.0));
        assert_eq!(altitude_ceiling(20.0), Some(2000.0));
        assert_eq!(altitude_ceiling(38.0), Some(20000.0));
        assert_eq!(altitude_ceiling(39.0), Some(25000.0));
        assert_eq!(altitude_ceiling(44.0), Some(50000.0));
    }

    #[test]
    fn test_altitude_floor_mapping() {
        assert_eq!(altitude_floor(-39.0), None);
        assert_eq!(altitude_floor(-29.0), Some(-1000.0));
        assert_eq!(altitude_floor(-20.0), Some(-100.0));
        assert_eq!(altitude_floor(-1.0), Some(-5.0));
        assert_eq!(altitude_floor(0.0), Some(0.0));
        assert_eq!(altitude_floor(19.0), Some(1900.0));
        assert_eq!(altitude_floor(20.0), Some(2000.0));
        assert_eq!(altitude_floor(38.0), Some(20000.0));
        assert_eq!(altitude_floor(40.0), Some(30000.0));
    }

    #[test]
    fn test_settings_roundtrip() {
        let settings = Settings {
            duration: 120.0,
            fast_tick: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.duration, 120.0);
        assert_eq!(parsed.update_interval(), 0.1);
    }
}
