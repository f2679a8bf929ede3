use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    catalog::{Catalog, ReservationType},
    error::ServiceError,
};

pub const MAX_WISHES: usize = 5;

/// One ranked choice in a lottery application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wish {
    pub event_id: i32,
    pub event_time: String,
}

/// Checks a wish list against the catalog. Order is preserved; it is the rank.
pub fn validate_wishes(catalog: &Catalog, wishes: &[Wish]) -> Result<(), ServiceError> {
    if wishes.is_empty() {
        return Err(ServiceError::validation("希望を1つ以上選択してください"));
    }
    if wishes.len() > MAX_WISHES {
        return Err(ServiceError::validation(format!(
            "希望は{MAX_WISHES}つまでしか選択できません"
        )));
    }

    let mut seen = HashSet::new();
    for wish in wishes {
        let event = catalog.event(wish.event_id).ok_or(ServiceError::NotFound("企画"))?;
        if event.reservation_type != ReservationType::Lottery {
            return Err(ServiceError::validation(format!(
                "{}は先着順の企画です。抽選には応募できません",
                event.name
            )));
        }
        if !event.offers(&wish.event_time) {
            return Err(ServiceError::validation(format!(
                "{}に{}の回はありません",
                event.name, wish.event_time
            )));
        }
        if !seen.insert((wish.event_id, wish.event_time.as_str())) {
            return Err(ServiceError::validation("同じ回を複数回選択することはできません"));
        }
    }

    Ok(())
}
