//! Static festival data loaded from JSON files in the data directory.
//!
//! `events.json` is required; the other files are optional and load as empty
//! lists when they are missing.

use std::{
    collections::HashSet,
    fs,
    path::Path,
    sync::LazyLock,
};

use chrono::NaiveDate;
use log::{info, warn};
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CatalogError;

static TIME_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([01]?[0-9]|2[0-3]):[0-5][0-9]$").expect("time label pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReservationType {
    FirstCome,
    Lottery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i32,
    pub name: String,
    /// Maximum reservations per time slot.
    pub capacity: i32,
    pub times: Vec<String>,
    pub reservation_type: ReservationType,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Event {
    pub fn offers(&self, time: &str) -> bool {
        self.times.iter().any(|t| t == time)
    }

    /// Earliest offered slot in minutes after midnight.
    pub fn earliest_slot(&self) -> Option<u32> {
        self.times.iter().filter_map(|t| minutes_of(t)).min()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goods {
    pub id: i32,
    pub name: String,
    pub price: u32,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsItem {
    pub id: i32,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimetableEntry {
    pub id: i32,
    pub stage: String,
    pub title: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiddleHint {
    pub id: i32,
    pub title: String,
    #[serde(default)]
    pub area: Option<String>,
    pub hint: String,
    #[serde(skip_serializing)]
    pub answer: String,
}

impl RiddleHint {
    pub fn is_answer(&self, guess: &str) -> bool {
        normalize_answer(guess) == normalize_answer(&self.answer)
    }
}

fn normalize_answer(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Parses a `H:MM` / `HH:MM` label into minutes after midnight.
pub fn minutes_of(label: &str) -> Option<u32> {
    let (h, m) = label.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub events: Vec<Event>,
    pub goods: Vec<Goods>,
    pub news: Vec<NewsItem>,
    pub timetable: Vec<TimetableEntry>,
    pub hints: Vec<RiddleHint>,
}

impl Catalog {
    pub fn load(dir: &Path) -> Result<Self, CatalogError> {
        let catalog = Self {
            events: read_json(&dir.join("events.json"))?,
            goods: read_optional(&dir.join("goods.json"))?,
            news: read_optional(&dir.join("news.json"))?,
            timetable: read_optional(&dir.join("timetable.json"))?,
            hints: read_optional(&dir.join("hints.json"))?,
        };
        catalog.validate()?;

        info!(
            "loaded catalog from {}: {} events, {} goods, {} news, {} timetable entries, {} hints",
            dir.display(),
            catalog.events.len(),
            catalog.goods.len(),
            catalog.news.len(),
            catalog.timetable.len(),
            catalog.hints.len()
        );

        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut ids = HashSet::new();
        for event in &self.events {
            if !ids.insert(event.id) {
                return Err(CatalogError::DuplicateId { kind: "event", id: event.id });
            }
            validate_event(event)?;
        }

        let mut hint_ids = HashSet::new();
        for hint in &self.hints {
            if !hint_ids.insert(hint.id) {
                return Err(CatalogError::DuplicateId { kind: "hint", id: hint.id });
            }
        }

        Ok(())
    }

    pub fn event(&self, id: i32) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn hint(&self, id: i32) -> Option<&RiddleHint> {
        self.hints.iter().find(|h| h.id == id)
    }

    /// Every (event_id, event_time, capacity) triple for first-come events.
    pub fn first_come_slots(&self) -> impl Iterator<Item = (i32, &str, i32)> + '_ {
        self.events
            .iter()
            .filter(|e| e.reservation_type == ReservationType::FirstCome)
            .flat_map(|e| e.times.iter().map(move |t| (e.id, t.as_str(), e.capacity)))
    }
}

fn validate_event(event: &Event) -> Result<(), CatalogError> {
    let invalid = |reason: &str| CatalogError::InvalidEvent {
        id: event.id,
        reason: reason.to_string(),
    };

    if event.name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if event.capacity <= 0 {
        return Err(invalid("capacity must be greater than 0"));
    }
    if event.times.is_empty() {
        return Err(invalid("no time slots offered"));
    }

    let mut seen = HashSet::new();
    for time in &event.times {
        if !TIME_LABEL.is_match(time) {
            return Err(invalid(&format!("time label '{time}' is not H:MM")));
        }
        if !seen.insert(time.as_str()) {
            return Err(invalid(&format!("time label '{time}' is listed twice")));
        }
    }

    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
    let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CatalogError> {
    if !path.exists() {
        warn!("{} not found, serving an empty list", path.display());
        return Ok(Vec::new());
    }
    read_json(path)
}
