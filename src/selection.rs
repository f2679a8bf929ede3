use chrono::NaiveDate;
use serde::Deserialize;

use crate::catalog::{Event, ReservationType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Id,
    Name,
    /// Earliest offered slot first.
    Time,
    /// Largest capacity first.
    Capacity,
}

/// Query parameters accepted by the event listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub date: Option<NaiveDate>,
    pub area: Option<String>,
    pub tag: Option<String>,
    pub reservation_type: Option<ReservationType>,
    #[serde(default)]
    pub sort: SortKey,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(date) = self.date {
            if event.date != Some(date) {
                return false;
            }
        }
        if let Some(area) = non_empty(&self.area) {
            if event.area.as_deref() != Some(area) {
                return false;
            }
        }
        if let Some(tag) = non_empty(&self.tag) {
            if !event.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        if let Some(kind) = self.reservation_type {
            if event.reservation_type != kind {
                return false;
            }
        }
        true
    }

    pub fn apply<'a>(&self, events: &'a [Event]) -> Vec<&'a Event> {
        let mut selected: Vec<&Event> = events.iter().filter(|e| self.matches(e)).collect();

        match self.sort {
            SortKey::Id => selected.sort_by_key(|e| e.id),
            SortKey::Name => selected.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id))),
            // events without a parsable slot go last
            SortKey::Time => selected.sort_by_key(|e| (e.earliest_slot().unwrap_or(u32::MAX), e.id)),
            SortKey::Capacity => selected.sort_by(|a, b| b.capacity.cmp(&a.capacity).then(a.id.cmp(&b.id))),
        }

        selected
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
