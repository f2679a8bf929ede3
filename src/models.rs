use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lottery::Wish;
use crate::schema::{event_slots, lottery_applications, now_showing, reservations};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize)]
#[diesel(table_name = event_slots)]
pub struct EventSlot {
    pub event_id: i32,
    pub event_time: String,
    pub capacity: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = reservations)]
pub struct Reservation {
    pub id: Uuid,
    pub event_id: i32,
    pub event_time: String,
    pub user_id: Uuid,
    pub user_name: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = reservations)]
pub struct NewReservation<'a> {
    pub id: Uuid,
    pub event_id: i32,
    pub event_time: &'a str,
    pub user_id: Uuid,
    pub user_name: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = lottery_applications)]
pub struct LotteryApplication {
    pub user_id: Uuid,
    pub user_name: String,
    pub event_data: serde_json::Value,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl LotteryApplication {
    pub fn wishes(&self) -> Result<Vec<Wish>, serde_json::Error> {
        serde_json::from_value(self.event_data.clone())
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = lottery_applications)]
pub struct NewLotteryApplication<'a> {
    pub user_id: Uuid,
    pub user_name: &'a str,
    pub event_data: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = now_showing)]
pub struct NowShowing {
    pub event_id: i32,
    pub is_showing: bool,
    pub updated_at: NaiveDateTime,
}

// Request/Response models for API
#[derive(Debug, Clone, Deserialize)]
pub struct ReserveRequest {
    pub event_id: i32,
    pub event_time: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeReservationRequest {
    pub event_id: i32,
    pub event_time: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub message: String,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LotteryRequest {
    pub user_name: String,
    pub wishes: Vec<Wish>,
}

#[derive(Debug, Serialize)]
pub struct LotteryResponse {
    pub user_id: Uuid,
    pub user_name: String,
    pub wishes: Vec<Wish>,
    pub updated_at: NaiveDateTime,
}

impl TryFrom<LotteryApplication> for LotteryResponse {
    type Error = serde_json::Error;

    fn try_from(app: LotteryApplication) -> Result<Self, Self::Error> {
        Ok(Self {
            wishes: app.wishes()?,
            user_id: app.user_id,
            user_name: app.user_name,
            updated_at: app.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AdminLoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AdminLoginResponse {
    pub token: Uuid,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReservationQuery {
    pub event_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct NowShowingRequest {
    pub is_showing: bool,
}

#[derive(Debug, Deserialize)]
pub struct RiddleAnswerRequest {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct RiddleAnswerResponse {
    pub correct: bool,
}
