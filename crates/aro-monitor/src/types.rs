use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit advertised on the floorplans page, rebuilt from scratch on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitListing {
    pub unit_id: String,
    pub unit_type: String,
    /// Monthly rent in whole dollars, `None` when the page does not publish one.
    pub price: Option<u32>,
    pub available: bool,
    pub raw_fingerprint: String,
}

impl UnitListing {
    pub fn price_label(&self) -> String {
        match self.price {
            Some(price) => format_dollars(price),
            None => "price unavailable".to_string(),
        }
    }
}

impl Display for UnitListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.available {
            "available"
        } else {
            "unavailable"
        };
        write!(
            f,
            "{} | {} | {} [{}]",
            self.unit_id,
            self.unit_type,
            self.price_label(),
            status
        )
    }
}

/// What the monitor remembers about a unit between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenRecord {
    pub last_seen_available: bool,
    pub last_notified_fingerprint: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl SeenRecord {
    pub fn first_sighting(unit: &UnitListing, now: DateTime<Utc>) -> Self {
        Self {
            last_seen_available: unit.available,
            last_notified_fingerprint: None,
            first_seen_at: now,
            last_seen_at: now,
        }
    }
}

impl Display for SeenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | first seen {} | last seen {} | {}",
            if self.last_seen_available {
                "available"
            } else {
                "unavailable"
            },
            self.first_seen_at.format("%Y-%m-%d %H:%M"),
            self.last_seen_at.format("%Y-%m-%d %H:%M"),
            if self.last_notified_fingerprint.is_some() {
                "notified"
            } else {
                "never notified"
            }
        )
    }
}

/// Seen records keyed by `unit_id`. Ordered so the state file diffs cleanly.
pub type SeenState = BTreeMap<String, SeenRecord>;

pub(crate) fn format_dollars(amount: u32) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    out.push('$');
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
