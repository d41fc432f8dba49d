//! The online operator index.
//!
//! Reads vastly outnumber writes, so the map sits behind a
//! `std::sync::RwLock`; every method takes the lock briefly and never
//! holds it across an await.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use convoy_core::{Availability, OperatorProfile, Priority, PrincipalId};

use crate::error::{AssignError, AssignResult};

/// One operator's entry in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSnapshot {
    /// The assignment-relevant profile.
    pub profile: OperatorProfile,
    /// When this operator last received a session; `None` = never.
    pub last_assigned_at: Option<DateTime<Utc>>,
}

/// In-memory index of operators eligible for assignment.
#[derive(Default)]
pub struct OnlineIndex {
    inner: RwLock<HashMap<PrincipalId, OperatorSnapshot>>,
}

impl OnlineIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an operator's snapshot.
    pub fn insert(&self, profile: OperatorProfile) {
        let mut map = self.write();
        let last_assigned_at = map.get(&profile.id).and_then(|s| s.last_assigned_at);
        map.insert(
            profile.id,
            OperatorSnapshot {
                profile,
                last_assigned_at,
            },
        );
    }

    /// Remove an operator (went offline).
    pub fn remove(&self, id: PrincipalId) -> Option<OperatorSnapshot> {
        self.write().remove(&id)
    }

    /// Fetch one snapshot.
    #[must_use]
    pub fn get(&self, id: PrincipalId) -> Option<OperatorSnapshot> {
        self.read().get(&id).cloned()
    }

    /// All snapshots, for dashboards and health.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OperatorSnapshot> {
        let mut all: Vec<_> = self.read().values().cloned().collect();
        all.sort_by_key(|s| s.profile.id);
        all
    }

    /// Change availability between online, busy, and away.
    ///
    /// # Errors
    ///
    /// [`AssignError::OfflineViaStatus`] for offline (that path must
    /// release sessions), [`AssignError::OperatorNotOnline`] when the
    /// operator is not in the index.
    pub fn set_availability(&self, id: PrincipalId, availability: Availability) -> AssignResult<()> {
        if availability == Availability::Offline {
            return Err(AssignError::OfflineViaStatus);
        }
        let mut map = self.write();
        let snapshot = map
            .get_mut(&id)
            .ok_or(AssignError::OperatorNotOnline(id))?;
        snapshot.profile.availability = availability;
        Ok(())
    }

    /// Take one slot: `current_load + 1` iff a slot is free.
    ///
    /// # Errors
    ///
    /// [`AssignError::OperatorAtCapacity`] when full,
    /// [`AssignError::OperatorNotOnline`] when absent.
    pub fn claim_slot(&self, id: PrincipalId) -> AssignResult<()> {
        let mut map = self.write();
        let snapshot = map
            .get_mut(&id)
            .ok_or(AssignError::OperatorNotOnline(id))?;
        if !snapshot.profile.has_capacity() {
            return Err(AssignError::OperatorAtCapacity(id));
        }
        snapshot.profile.current_load += 1;
        Ok(())
    }

    /// Release one slot, flooring at zero. Returns `true` when the
    /// operator transitioned from full to not-full (a drain trigger).
    pub fn release_slot(&self, id: PrincipalId) -> bool {
        let mut map = self.write();
        let Some(snapshot) = map.get_mut(&id) else {
            return false;
        };
        let was_full = !snapshot.profile.has_capacity();
        snapshot.profile.current_load = snapshot.profile.current_load.saturating_sub(1);
        was_full && snapshot.profile.has_capacity()
    }

    /// Stamp a successful assignment, for the round-robin tiebreak.
    pub fn mark_assigned(&self, id: PrincipalId, at: DateTime<Utc>) {
        if let Some(snapshot) = self.write().get_mut(&id) {
            snapshot.last_assigned_at = Some(at);
        }
    }

    /// Pick the best eligible operator for the request, or `None`.
    ///
    /// Eligibility: online (or away, for priorities at or above
    /// `away_floor`), a free slot, and a skill set covering `skills`.
    /// Ranking (ascending): load ratio, average response time,
    /// last-assigned-at — so the least-loaded, fastest, least-recently
    /// assigned operator wins.
    #[must_use]
    pub fn find_available(
        &self,
        skills: &BTreeSet<String>,
        priority: Priority,
        away_floor: Priority,
    ) -> Option<PrincipalId> {
        let map = self.read();
        let mut candidates: Vec<&OperatorSnapshot> = map
            .values()
            .filter(|s| match s.profile.availability {
                Availability::Online => true,
                Availability::Away => priority >= away_floor,
                Availability::Busy | Availability::Offline => false,
            })
            .filter(|s| s.profile.has_capacity() && s.profile.covers(skills))
            .collect();

        candidates.sort_by(|a, b| {
            a.profile
                .load_ratio()
                .partial_cmp(&b.profile.load_ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.profile
                        .avg_response_secs
                        .partial_cmp(&b.profile.avg_response_secs)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.last_assigned_at.cmp(&b.last_assigned_at))
        });

        candidates.first().map(|s| s.profile.id)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<PrincipalId, OperatorSnapshot>> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<PrincipalId, OperatorSnapshot>> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn operator(id: i64, load: u32, max: u32) -> OperatorProfile {
        let mut profile = OperatorProfile::new(PrincipalId(id), "support", max);
        profile.current_load = load;
        profile.availability = Availability::Online;
        profile
    }

    fn skills(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn claim_respects_capacity_and_release_floors_at_zero() {
        let index = OnlineIndex::new();
        index.insert(operator(1, 0, 2));

        index.claim_slot(PrincipalId(1)).unwrap();
        index.claim_slot(PrincipalId(1)).unwrap();
        assert!(matches!(
            index.claim_slot(PrincipalId(1)),
            Err(AssignError::OperatorAtCapacity(_))
        ));

        // Full -> not-full transition reported exactly once.
        assert!(index.release_slot(PrincipalId(1)));
        assert!(!index.release_slot(PrincipalId(1)));
        assert!(!index.release_slot(PrincipalId(1)));
        assert_eq!(index.get(PrincipalId(1)).unwrap().profile.current_load, 0);
    }

    #[test]
    fn find_available_prefers_lowest_load_ratio() {
        let index = OnlineIndex::new();
        index.insert(operator(1, 4, 5)); // 0.8
        index.insert(operator(2, 1, 5)); // 0.2
        index.insert(operator(3, 2, 5)); // 0.4

        assert_eq!(
            index.find_available(&skills(&[]), Priority::Normal, Priority::High),
            Some(PrincipalId(2))
        );
    }

    #[test]
    fn ties_break_by_response_time_then_least_recently_assigned() {
        let index = OnlineIndex::new();
        let mut fast = operator(1, 1, 5);
        fast.avg_response_secs = 10.0;
        let mut slow = operator(2, 1, 5);
        slow.avg_response_secs = 40.0;
        index.insert(fast.clone());
        index.insert(slow);

        assert_eq!(
            index.find_available(&skills(&[]), Priority::Normal, Priority::High),
            Some(PrincipalId(1))
        );

        // Same load and response time: the never-assigned operator wins
        // over the recently assigned one.
        let index = OnlineIndex::new();
        index.insert(operator(1, 1, 5));
        index.insert(operator(2, 1, 5));
        index.mark_assigned(PrincipalId(1), Utc::now());
        assert_eq!(
            index.find_available(&skills(&[]), Priority::Normal, Priority::High),
            Some(PrincipalId(2))
        );
    }

    #[test]
    fn skills_must_be_covered() {
        let index = OnlineIndex::new();
        index.insert(operator(1, 0, 5).with_skill("billing"));
        index.insert(
            operator(2, 3, 5)
                .with_skill("billing")
                .with_skill("refunds"),
        );

        assert_eq!(
            index.find_available(&skills(&["billing", "refunds"]), Priority::Normal, Priority::High),
            Some(PrincipalId(2))
        );
        assert_eq!(
            index.find_available(&skills(&["legal"]), Priority::Normal, Priority::High),
            None
        );
    }

    #[test]
    fn away_operators_only_serve_high_priority() {
        let index = OnlineIndex::new();
        let mut away = operator(1, 0, 5);
        away.availability = Availability::Away;
        index.insert(away);

        assert_eq!(
            index.find_available(&skills(&[]), Priority::Normal, Priority::High),
            None
        );
        assert_eq!(
            index.find_available(&skills(&[]), Priority::High, Priority::High),
            Some(PrincipalId(1))
        );
        assert_eq!(
            index.find_available(&skills(&[]), Priority::Urgent, Priority::High),
            Some(PrincipalId(1))
        );
    }

    #[test]
    fn busy_operators_are_never_eligible() {
        let index = OnlineIndex::new();
        let mut busy = operator(1, 0, 5);
        busy.availability = Availability::Busy;
        index.insert(busy);

        assert_eq!(
            index.find_available(&skills(&[]), Priority::Urgent, Priority::High),
            None
        );
    }

    #[test]
    fn status_updates_cannot_go_offline() {
        let index = OnlineIndex::new();
        index.insert(operator(1, 0, 5));
        assert!(matches!(
            index.set_availability(PrincipalId(1), Availability::Offline),
            Err(AssignError::OfflineViaStatus)
        ));
        index
            .set_availability(PrincipalId(1), Availability::Away)
            .unwrap();
    }

    #[test]
    fn insert_preserves_last_assigned_stamp() {
        let index = OnlineIndex::new();
        index.insert(operator(1, 0, 5));
        let at = Utc::now();
        index.mark_assigned(PrincipalId(1), at);

        // Re-insert (e.g. go_online refresh) keeps the stamp.
        index.insert(operator(1, 0, 5));
        assert_eq!(index.get(PrincipalId(1)).unwrap().last_assigned_at, Some(at));
    }
}
