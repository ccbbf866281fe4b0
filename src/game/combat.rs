//! Combat attribution - decides who gets credit for an elimination
//!
//! The tracker keeps a short, time-decayed ledger of damage per victim.
//! Reading the killer or assisters of a victim consumes that victim's
//! ledger entry, so an elimination can only be attributed once.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

use super::state::PlayerId;

/// Default kill/assist eligibility window
pub const DEFAULT_COMBAT_WINDOW: Duration = Duration::from_secs(10);

/// Most recent hit against a victim
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DamageRecord {
    pub attacker: PlayerId,
    pub at: Instant,
    pub amount: f32,
}

/// Per-match damage ledger.
///
/// Every map is sharded, so hits against different victims never contend.
/// Updates to a single victim's entry are atomic, which keeps
/// `record_damage` followed by `take_killer` on the same victim ordered.
pub struct CombatTracker {
    window: Duration,
    last_damage: DashMap<PlayerId, DamageRecord>,
    /// victim -> (attacker -> last hit)
    assist_window: DashMap<PlayerId, HashMap<PlayerId, Instant>>,
    damage_dealt: DashMap<PlayerId, f32>,
    damage_taken: DashMap<PlayerId, f32>,
}

impl CombatTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_damage: DashMap::new(),
            assist_window: DashMap::new(),
            damage_dealt: DashMap::new(),
            damage_taken: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn within_window(&self, at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(at) <= self.window
    }

    /// Record one damage application. Self-damage is allowed.
    ///
    /// Panics on a negative or non-finite amount.
    pub fn record_damage(&self, victim: PlayerId, attacker: PlayerId, amount: f32) {
        assert!(
            amount.is_finite() && amount >= 0.0,
            "damage amount must be a finite, non-negative number (got {})",
            amount
        );

        let now = Instant::now();

        *self.damage_dealt.entry(attacker).or_insert(0.0) += amount;
        *self.damage_taken.entry(victim).or_insert(0.0) += amount;

        self.last_damage.insert(
            victim,
            DamageRecord {
                attacker,
                at: now,
                amount,
            },
        );
        self.assist_window
            .entry(victim)
            .or_default()
            .insert(attacker, now);
    }

    /// Consume the victim's last hit and return its attacker if the hit
    /// landed within the combat window. A second call for the same
    /// elimination returns `None`.
    pub fn take_killer(&self, victim: PlayerId) -> Option<PlayerId> {
        let (_, record) = self.last_damage.remove(&victim)?;
        self.within_window(record.at, Instant::now())
            .then_some(record.attacker)
    }

    /// Consume the victim's assist window and return every attacker still
    /// inside the combat window, excluding the killer.
    pub fn take_assisters(&self, victim: PlayerId, killer: Option<PlayerId>) -> HashSet<PlayerId> {
        let Some((_, attackers)) = self.assist_window.remove(&victim) else {
            return HashSet::new();
        };

        let now = Instant::now();
        attackers
            .into_iter()
            .filter(|(attacker, at)| Some(*attacker) != killer && self.within_window(*at, now))
            .map(|(attacker, _)| attacker)
            .collect()
    }

    /// Whether the player took or dealt damage within the window.
    ///
    /// Scans every victim's assist window, which is linear in the number
    /// of victims currently tracked.
    pub fn is_in_combat(&self, player: PlayerId) -> bool {
        let now = Instant::now();

        let hit_recently = self
            .last_damage
            .get(&player)
            .is_some_and(|record| self.within_window(record.at, now));
        if hit_recently {
            return true;
        }

        self.assist_window.iter().any(|entry| {
            entry
                .value()
                .get(&player)
                .is_some_and(|at| self.within_window(*at, now))
        })
    }

    /// Forget a departed player, as victim and as attacker
    pub fn clear_player(&self, player: PlayerId) {
        self.last_damage.remove(&player);
        self.last_damage.retain(|_, record| record.attacker != player);

        self.assist_window.remove(&player);
        for mut entry in self.assist_window.iter_mut() {
            entry.value_mut().remove(&player);
        }
        self.assist_window.retain(|_, attackers| !attackers.is_empty());

        self.damage_dealt.remove(&player);
        self.damage_taken.remove(&player);
    }

    pub fn clear_all(&self) {
        self.last_damage.clear();
        self.assist_window.clear();
        self.damage_dealt.clear();
        self.damage_taken.clear();
    }

    /// Last recorded hit against a victim, without consuming it
    pub fn last_damage(&self, victim: PlayerId) -> Option<DamageRecord> {
        self.last_damage.get(&victim).map(|r| *r.value())
    }

    pub fn damage_dealt(&self, player: PlayerId) -> f32 {
        self.damage_dealt.get(&player).map(|v| *v).unwrap_or(0.0)
    }

    pub fn damage_taken(&self, player: PlayerId) -> f32 {
        self.damage_taken.get(&player).map(|v| *v).unwrap_or(0.0)
    }
}

impl Default for CombatTracker {
    fn default() -> Self {
        Self::new(DEFAULT_COMBAT_WINDOW)
    }
}
