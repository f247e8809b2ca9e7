use std::collections::HashSet;
use std::fmt::Display;

use chrono::{DateTime, Utc};

use crate::types::{SeenRecord, SeenState, UnitListing};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffOptions {
    /// Alert again when an already-notified, still-available unit changes content.
    pub realert_on_content_change: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            realert_on_content_change: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    FirstSighting,
    BecameAvailable,
    ContentChanged,
}

impl Display for NotifyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotifyReason::FirstSighting => write!(f, "new listing"),
            NotifyReason::BecameAvailable => write!(f, "became available"),
            NotifyReason::ContentChanged => write!(f, "listing changed"),
        }
    }
}

/// Why `unit` must be announced this run, or `None` if it is already known.
pub fn notify_reason(
    unit: &UnitListing,
    previous: Option<&SeenRecord>,
    options: DiffOptions,
) -> Option<NotifyReason> {
    if !unit.available {
        return None;
    }

    let Some(record) = previous else {
        return Some(NotifyReason::FirstSighting);
    };

    if !record.last_seen_available {
        return Some(NotifyReason::BecameAvailable);
    }

    let changed = record.last_notified_fingerprint.as_deref() != Some(unit.raw_fingerprint.as_str());
    (options.realert_on_content_change && changed).then_some(NotifyReason::ContentChanged)
}

/// The subset of `current` that has not been announced in its present state.
pub fn diff(current: &[UnitListing], previous: &SeenState, options: DiffOptions) -> Vec<UnitListing> {
    current
        .iter()
        .filter_map(|unit| {
            let reason = notify_reason(unit, previous.get(&unit.unit_id), options)?;
            log::info!("Unit '{}' is notifiable: {}", unit.unit_id, reason);
            Some(unit.clone())
        })
        .collect()
}

/// Folds this run's observations into the seen state.
///
/// Every current unit gets its availability and `last_seen_at` refreshed;
/// units in `notified` also get their fingerprint recorded. Records of units
/// missing from the page are carried over untouched.
pub fn record_run(
    previous: &SeenState,
    current: &[UnitListing],
    notified: &[UnitListing],
    now: DateTime<Utc>,
) -> SeenState {
    let notified_ids: HashSet<&str> = notified.iter().map(|u| u.unit_id.as_str()).collect();
    let mut next = previous.clone();

    for unit in current {
        let record = next
            .entry(unit.unit_id.clone())
            .or_insert_with(|| SeenRecord::first_sighting(unit, now));

        record.last_seen_available = unit.available;
        record.last_seen_at = now;
        if notified_ids.contains(unit.unit_id.as_str()) {
            record.last_notified_fingerprint = Some(unit.raw_fingerprint.clone());
        }
    }

    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn unit(id: &str, available: bool, fingerprint: &str) -> UnitListing {
        UnitListing {
            unit_id: id.to_string(),
            unit_type: "ARO 1 Bedroom".to_string(),
            price: Some(1500),
            available,
            raw_fingerprint: fingerprint.to_string(),
        }
    }

    fn seen(available: bool, fingerprint: Option<&str>) -> SeenRecord {
        let at = Utc.with_ymd_and_hms(2026, 9, 1, 12, 0, 0).unwrap();
        SeenRecord {
            last_seen_available: available,
            last_notified_fingerprint: fingerprint.map(str::to_string),
            first_seen_at: at,
            last_seen_at: at,
        }
    }

    fn ids(units: &[UnitListing]) -> Vec<&str> {
        units.iter().map(|u| u.unit_id.as_str()).collect()
    }

    #[test]
    fn test_new_available_unit_is_notifiable() {
        let current = vec![unit("A", true, "f1"), unit("B", false, "f2")];
        let result = diff(&current, &SeenState::new(), DiffOptions::default());
        assert_eq!(ids(&result), vec!["A"]);
    }

    #[test]
    fn test_known_unchanged_unit_is_not_notifiable() {
        let mut previous = SeenState::new();
        previous.insert("A".to_string(), seen(true, Some("f1")));

        let result = diff(&[unit("A", true, "f1")], &previous, DiffOptions::default());
        assert!(result.is_empty());
    }

    #[test]
    fn test_transition_to_available_is_notifiable() {
        let mut previous = SeenState::new();
        previous.insert("A".to_string(), seen(false, Some("f1")));

        let result = diff(&[unit("A", true, "f1")], &previous, DiffOptions::default());
        assert_eq!(ids(&result), vec!["A"]);
        assert_eq!(
            notify_reason(&result[0], previous.get("A"), DiffOptions::default()),
            Some(NotifyReason::BecameAvailable)
        );
    }

    #[test]
    fn test_content_change_realert_is_configurable() {
        let mut previous = SeenState::new();
        previous.insert("A".to_string(), seen(true, Some("f1")));
        let current = vec![unit("A", true, "f2")];

        let on = diff(&current, &previous, DiffOptions::default());
        assert_eq!(ids(&on), vec!["A"]);

        let off = diff(
            &current,
            &previous,
            DiffOptions {
                realert_on_content_change: false,
            },
        );
        assert!(off.is_empty());
    }

    #[test]
    fn test_unavailable_units_are_never_notifiable() {
        let mut previous = SeenState::new();
        previous.insert("A".to_string(), seen(true, Some("f1")));

        let current = vec![unit("A", false, "f9"), unit("B", false, "f2")];
        assert!(diff(&current, &previous, DiffOptions::default()).is_empty());
    }

    #[test]
    fn test_transition_notifies_exactly_once() {
        let now = Utc::now();
        let mut state = SeenState::new();
        state.insert("A".to_string(), seen(false, None));
        let current = vec![unit("A", true, "f1")];

        let first = diff(&current, &state, DiffOptions::default());
        assert_eq!(first.len(), 1);
        state = record_run(&state, &current, &first, now);

        let second = diff(&current, &state, DiffOptions::default());
        assert!(second.is_empty());
    }

    #[test]
    fn test_record_run_updates_and_retains() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let mut previous = SeenState::new();
        previous.insert("gone".to_string(), seen(true, Some("old")));
        previous.insert("A".to_string(), seen(true, Some("f1")));

        let current = vec![unit("A", false, "f1"), unit("B", true, "f2")];
        let notified = vec![unit("B", true, "f2")];
        let next = record_run(&previous, &current, &notified, now);

        assert_eq!(next.len(), 3);
        assert_eq!(next["gone"], previous["gone"]);

        let a = &next["A"];
        assert!(!a.last_seen_available);
        assert_eq!(a.last_notified_fingerprint.as_deref(), Some("f1"));
        assert_eq!(a.first_seen_at, previous["A"].first_seen_at);
        assert_eq!(a.last_seen_at, now);

        let b = &next["B"];
        assert!(b.last_seen_available);
        assert_eq!(b.last_notified_fingerprint.as_deref(), Some("f2"));
        assert_eq!(b.first_seen_at, now);
    }

    #[test]
    fn test_unit_first_seen_unavailable_alerts_when_it_opens() {
        let now = Utc::now();
        let waitlisted = vec![unit("A", false, "f1")];
        let state = record_run(&SeenState::new(), &waitlisted, &[], now);
        assert_eq!(state["A"].last_notified_fingerprint, None);

        let opened = vec![unit("A", true, "f2")];
        assert_eq!(ids(&diff(&opened, &state, DiffOptions::default())), vec!["A"]);
    }
}
