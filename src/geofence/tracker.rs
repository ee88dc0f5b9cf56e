use chrono::{DateTime, Utc};

use crate::models::{GeofenceMembership, GeofenceTransition, TransitionKind};

/// Remembers the last membership and turns changes into enter/exit events.
#[derive(Debug, Clone, Default)]
pub struct MembershipTracker {
    last: Option<GeofenceMembership>,
}

impl MembershipTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the tracker without emitting anything, e.g. from a restored session.
    pub fn with_last(last: GeofenceMembership) -> Self {
        Self { last: Some(last) }
    }

    pub fn last(&self) -> Option<&GeofenceMembership> {
        self.last.as_ref()
    }

    /// Records `current` and returns the transitions it implies.
    ///
    /// The first observation only emits an `Enter` when it is inside. Moving
    /// straight from one geofence to another yields `Exit` then `Enter`.
    pub fn observe(
        &mut self,
        current: GeofenceMembership,
        at: DateTime<Utc>,
    ) -> Vec<GeofenceTransition> {
        let previous_id = self
            .last
            .as_ref()
            .and_then(|m| m.is_inside.then(|| m.geofence_id.clone()).flatten());
        let current_id = current
            .is_inside
            .then(|| current.geofence_id.clone())
            .flatten();

        self.last = Some(current);

        if previous_id == current_id {
            return Vec::new();
        }

        let mut transitions = Vec::with_capacity(2);
        if let Some(geofence_id) = previous_id {
            transitions.push(GeofenceTransition {
                kind: TransitionKind::Exit,
                geofence_id,
                at,
            });
        }
        if let Some(geofence_id) = current_id {
            transitions.push(GeofenceTransition {
                kind: TransitionKind::Enter,
                geofence_id,
                at,
            });
        }
        transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(transitions: &[GeofenceTransition]) -> Vec<(TransitionKind, &str)> {
        transitions
            .iter()
            .map(|t| (t.kind, t.geofence_id.as_str()))
            .collect()
    }

    #[test]
    fn repeated_results_emit_once() {
        let mut tracker = MembershipTracker::new();
        let now = Utc::now();

        let mut emitted = Vec::new();
        for membership in [
            GeofenceMembership::outside(),
            GeofenceMembership::outside(),
            GeofenceMembership::inside("office"),
            GeofenceMembership::inside("office"),
            GeofenceMembership::inside("office"),
            GeofenceMembership::outside(),
            GeofenceMembership::outside(),
        ] {
            emitted.extend(tracker.observe(membership, now));
        }

        assert_eq!(
            kinds(&emitted),
            vec![
                (TransitionKind::Enter, "office"),
                (TransitionKind::Exit, "office")
            ]
        );
    }

    #[test]
    fn hopping_between_geofences_exits_then_enters() {
        let mut tracker = MembershipTracker::with_last(GeofenceMembership::inside("office"));
        let emitted = tracker.observe(GeofenceMembership::inside("depot"), Utc::now());
        assert_eq!(
            kinds(&emitted),
            vec![
                (TransitionKind::Exit, "office"),
                (TransitionKind::Enter, "depot")
            ]
        );
    }

    #[test]
    fn seeded_tracker_does_not_replay_enter() {
        let mut tracker = MembershipTracker::with_last(GeofenceMembership::inside("office"));
        assert!(tracker
            .observe(GeofenceMembership::inside("office"), Utc::now())
            .is_empty());
    }
}
