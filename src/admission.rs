//! Capacity and request validation for first-come reservations.

use serde::Serialize;

use crate::{
    catalog::{Catalog, Event, ReservationType},
    error::ServiceError,
};

pub const MAX_NAME_CHARS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted { remaining_after: i64 },
    Full,
}

/// A slot admits a new reservation iff `taken < capacity`.
pub fn check_capacity(taken: i64, capacity: i32) -> Admission {
    let capacity = i64::from(capacity);
    if taken < capacity {
        Admission::Admitted {
            remaining_after: capacity - taken - 1,
        }
    } else {
        Admission::Full
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    pub event_time: String,
    pub capacity: i32,
    pub reserved: i64,
    pub remaining: i64,
}

/// Joins per-slot counts from the database with the catalog's offered times.
pub fn availability(event: &Event, counts: &[(String, i64)]) -> Vec<SlotAvailability> {
    event
        .times
        .iter()
        .map(|time| {
            let reserved = counts
                .iter()
                .find(|(t, _)| t == time)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            SlotAvailability {
                event_time: time.clone(),
                capacity: event.capacity,
                reserved,
                remaining: (i64::from(event.capacity) - reserved).max(0),
            }
        })
        .collect()
}

pub fn validate_user_name(raw: &str) -> Result<String, ServiceError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ServiceError::validation("名前を入力してください"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(ServiceError::validation(format!(
            "名前は{MAX_NAME_CHARS}文字以内で入力してください"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(ServiceError::validation("名前に使用できない文字が含まれています"));
    }
    Ok(name.to_string())
}

/// Resolves a first-come slot in the catalog, rejecting unknown events,
/// lottery events, and times the event does not offer.
pub fn first_come_event<'a>(catalog: &'a Catalog, event_id: i32, event_time: &str) -> Result<&'a Event, ServiceError> {
    let event = catalog.event(event_id).ok_or(ServiceError::NotFound("企画"))?;
    if event.reservation_type != ReservationType::FirstCome {
        return Err(ServiceError::validation("この企画は抽選制です。抽選に応募してください"));
    }
    if !event.offers(event_time) {
        return Err(ServiceError::validation("選択された時間帯は存在しません"));
    }
    Ok(event)
}
