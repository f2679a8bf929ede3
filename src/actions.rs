use diesel::{
    dsl::{count_star, exists, now},
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
    upsert::excluded,
};
use uuid::Uuid;

use crate::admission::{check_capacity, Admission};
use crate::auth::hash_password;
use crate::catalog::Catalog;
use crate::error::ServiceError;
use crate::lottery::Wish;
use crate::models::{self, EventSlot, LotteryApplication, NowShowing, Reservation};

// Maps a unique-index violation to a domain conflict.
fn on_unique_violation(conflict: ServiceError) -> impl FnOnce(DieselError) -> ServiceError {
    move |e| match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => conflict,
        e => ServiceError::Database(e),
    }
}

/// Upserts one `event_slots` row per first-come (event, time) in the catalog.
pub fn sync_event_slots(conn: &mut PgConnection, catalog: &Catalog) -> Result<usize, ServiceError> {
    use crate::schema::event_slots::dsl::{capacity, event_id, event_slots, event_time};

    let slots: Vec<EventSlot> = catalog
        .first_come_slots()
        .map(|(id, time, cap)| EventSlot {
            event_id: id,
            event_time: time.to_string(),
            capacity: cap,
        })
        .collect();

    if slots.is_empty() {
        return Ok(0);
    }

    let synced = diesel::insert_into(event_slots)
        .values(&slots)
        .on_conflict((event_id, event_time))
        .do_update()
        .set(capacity.eq(excluded(capacity)))
        .execute(conn)?;

    Ok(synced)
}

// Locks the slot row for the rest of the transaction
fn lock_slot(conn: &mut PgConnection, ev_id: i32, time: &str) -> Result<EventSlot, ServiceError> {
    use crate::schema::event_slots;

    event_slots::table
        .filter(event_slots::event_id.eq(ev_id))
        .filter(event_slots::event_time.eq(time))
        .select(EventSlot::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(ServiceError::NotFound("時間帯"))
}

fn count_reserved(conn: &mut PgConnection, ev_id: i32, time: &str) -> Result<i64, ServiceError> {
    use crate::schema::reservations;

    let taken = reservations::table
        .filter(reservations::event_id.eq(ev_id))
        .filter(reservations::event_time.eq(time))
        .count()
        .get_result(conn)?;

    Ok(taken)
}

fn ensure_room(conn: &mut PgConnection, slot: &EventSlot) -> Result<(), ServiceError> {
    let taken = count_reserved(conn, slot.event_id, &slot.event_time)?;

    match check_capacity(taken, slot.capacity) {
        Admission::Admitted { remaining_after } => {
            log::debug!(
                "admitting reservation for event {} at {} ({} left after)",
                slot.event_id,
                slot.event_time,
                remaining_after
            );
            Ok(())
        }
        Admission::Full => Err(ServiceError::SlotFull {
            event_id: slot.event_id,
            event_time: slot.event_time.clone(),
        }),
    }
}

/// Inserts a reservation if the slot still has room.
///
/// The count and insert run in one transaction holding a row lock on the
/// slot, so two writers for the same slot cannot both pass the check.
pub fn reserve_slot(
    conn: &mut PgConnection,
    ev_id: i32,
    time: &str,
    uid: Uuid,
    name: &str,
) -> Result<Reservation, ServiceError> {
    use crate::schema::reservations;

    conn.transaction::<_, ServiceError, _>(|conn| {
        let slot = lock_slot(conn, ev_id, time)?;

        let existing: Option<Uuid> = reservations::table
            .filter(reservations::user_id.eq(uid))
            .filter(reservations::event_id.eq(ev_id))
            .select(reservations::id)
            .first(conn)
            .optional()?;

        if existing.is_some() {
            return Err(ServiceError::AlreadyReserved);
        }

        ensure_room(conn, &slot)?;

        let new_reservation = models::NewReservation {
            id: Uuid::new_v4(),
            event_id: ev_id,
            event_time: time,
            user_id: uid,
            user_name: name,
        };

        diesel::insert_into(reservations::table)
            .values(&new_reservation)
            .returning(Reservation::as_returning())
            .get_result(conn)
            .map_err(on_unique_violation(ServiceError::AlreadyReserved))
    })
}

/// Moves an owned reservation to another slot in place.
pub fn change_reservation(
    conn: &mut PgConnection,
    reservation_id: Uuid,
    uid: Uuid,
    target_event: i32,
    target_time: &str,
) -> Result<Reservation, ServiceError> {
    use crate::schema::reservations;

    conn.transaction::<_, ServiceError, _>(|conn| {
        let current: Reservation = reservations::table
            .find(reservation_id)
            .select(Reservation::as_select())
            .for_update()
            .first(conn)
            .optional()?
            .filter(|r| r.user_id == uid)
            .ok_or(ServiceError::NotFound("予約"))?;

        if current.event_id == target_event && current.event_time == target_time {
            return Ok(current);
        }

        let slot = lock_slot(conn, target_event, target_time)?;

        if target_event != current.event_id {
            let other: Option<Uuid> = reservations::table
                .filter(reservations::user_id.eq(uid))
                .filter(reservations::event_id.eq(target_event))
                .filter(reservations::id.ne(reservation_id))
                .select(reservations::id)
                .first(conn)
                .optional()?;

            if other.is_some() {
                return Err(ServiceError::AlreadyReserved);
            }
        }

        ensure_room(conn, &slot)?;

        diesel::update(reservations::table.find(reservation_id))
            .set((
                reservations::event_id.eq(target_event),
                reservations::event_time.eq(target_time),
                reservations::updated_at.eq(now),
            ))
            .returning(Reservation::as_returning())
            .get_result(conn)
            .map_err(on_unique_violation(ServiceError::AlreadyReserved))
    })
}

pub fn cancel_reservation(conn: &mut PgConnection, reservation_id: Uuid, uid: Uuid) -> Result<(), ServiceError> {
    use crate::schema::reservations::dsl::{id, reservations, user_id};

    let deleted = diesel::delete(reservations.filter(id.eq(reservation_id)).filter(user_id.eq(uid))).execute(conn)?;

    if deleted == 0 {
        return Err(ServiceError::NotFound("予約"));
    }
    Ok(())
}

pub fn list_user_reservations(conn: &mut PgConnection, uid: Uuid) -> Result<Vec<Reservation>, ServiceError> {
    use crate::schema::reservations::dsl::{created_at, reservations, user_id};

    let rows = reservations
        .filter(user_id.eq(uid))
        .order(created_at.desc())
        .select(Reservation::as_select())
        .load(conn)?;

    Ok(rows)
}

pub fn list_reservations(conn: &mut PgConnection, ev_id: Option<i32>) -> Result<Vec<Reservation>, ServiceError> {
    use crate::schema::reservations::dsl::{created_at, event_id, event_time, reservations};

    let mut query = reservations.select(Reservation::as_select()).into_boxed();
    if let Some(ev_id) = ev_id {
        query = query.filter(event_id.eq(ev_id));
    }

    let rows = query.order((event_id.asc(), event_time.asc(), created_at.asc())).load(conn)?;
    Ok(rows)
}

/// Reservation count per time label for one event.
pub fn slot_counts(conn: &mut PgConnection, ev_id: i32) -> Result<Vec<(String, i64)>, ServiceError> {
    use crate::schema::reservations::dsl::{event_id, event_time, reservations};

    let counts = reservations
        .filter(event_id.eq(ev_id))
        .group_by(event_time)
        .select((event_time, count_star()))
        .load::<(String, i64)>(conn)?;

    Ok(counts)
}

/// Replaces the user's whole wish list, keeping nicknames unique.
pub fn upsert_lottery_application(
    conn: &mut PgConnection,
    uid: Uuid,
    name: &str,
    wishes: &[Wish],
) -> Result<LotteryApplication, ServiceError> {
    use crate::schema::lottery_applications;

    let data = serde_json::to_value(wishes)?;

    conn.transaction::<_, ServiceError, _>(|conn| {
        let holder: Option<Uuid> = lottery_applications::table
            .filter(lottery_applications::user_name.eq(name))
            .filter(lottery_applications::user_id.ne(uid))
            .select(lottery_applications::user_id)
            .first(conn)
            .optional()?;

        if holder.is_some() {
            return Err(ServiceError::NicknameTaken);
        }

        let application = models::NewLotteryApplication {
            user_id: uid,
            user_name: name,
            event_data: data,
        };

        // unique index on user_name catches a racing writer
        diesel::insert_into(lottery_applications::table)
            .values(&application)
            .on_conflict(lottery_applications::user_id)
            .do_update()
            .set((
                lottery_applications::user_name.eq(excluded(lottery_applications::user_name)),
                lottery_applications::event_data.eq(excluded(lottery_applications::event_data)),
                lottery_applications::updated_at.eq(now),
            ))
            .returning(LotteryApplication::as_returning())
            .get_result(conn)
            .map_err(on_unique_violation(ServiceError::NicknameTaken))
    })
}

pub fn get_lottery_application(conn: &mut PgConnection, uid: Uuid) -> Result<Option<LotteryApplication>, ServiceError> {
    use crate::schema::lottery_applications::dsl::lottery_applications;

    let application = lottery_applications
        .find(uid)
        .select(LotteryApplication::as_select())
        .first(conn)
        .optional()?;

    Ok(application)
}

pub fn list_lottery_applications(conn: &mut PgConnection) -> Result<Vec<LotteryApplication>, ServiceError> {
    use crate::schema::lottery_applications::dsl::{created_at, lottery_applications};

    let rows = lottery_applications
        .order(created_at.asc())
        .select(LotteryApplication::as_select())
        .load(conn)?;

    Ok(rows)
}

pub fn verify_admin_password(conn: &mut PgConnection, password: &str) -> Result<bool, ServiceError> {
    use crate::schema::admin_passwords::dsl::{admin_passwords, password_hash};

    let hashed = hash_password(password);
    let matched = diesel::select(exists(admin_passwords.filter(password_hash.eq(hashed)))).get_result(conn)?;

    Ok(matched)
}

pub fn set_now_showing(conn: &mut PgConnection, ev_id: i32, showing: bool) -> Result<NowShowing, ServiceError> {
    use crate::schema::now_showing::dsl::{event_id, is_showing, now_showing, updated_at};

    let row = diesel::insert_into(now_showing)
        .values((event_id.eq(ev_id), is_showing.eq(showing)))
        .on_conflict(event_id)
        .do_update()
        .set((is_showing.eq(showing), updated_at.eq(now)))
        .returning(NowShowing::as_returning())
        .get_result(conn)?;

    Ok(row)
}

pub fn list_now_showing(conn: &mut PgConnection) -> Result<Vec<NowShowing>, ServiceError> {
    use crate::schema::now_showing::dsl::{event_id, now_showing};

    let rows = now_showing.order(event_id.asc()).select(NowShowing::as_select()).load(conn)?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    //! These run against a migrated database named by `TEST_DATABASE_URL`.
    //! Most run inside a transaction that is never committed; the
    //! multi-connection ones commit and delete their own rows afterwards.

    use super::*;
    use crate::catalog::tests::sample_catalog;
    use std::{sync::Barrier, thread, time::Duration};

    fn test_connection() -> PgConnection {
        dotenvy::dotenv().ok();
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL should be set");
        PgConnection::establish(&url).expect("test database should be reachable")
    }

    fn wish(event_id: i32, event_time: &str) -> Wish {
        Wish {
            event_id,
            event_time: event_time.to_string(),
        }
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn capacity_one_admits_first_reservation_only() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            sync_event_slots(conn, &sample_catalog())?;

            let first = reserve_slot(conn, 1, "11:00", Uuid::new_v4(), "たろう")?;
            assert_eq!(first.event_time, "11:00");

            let second = reserve_slot(conn, 1, "11:00", Uuid::new_v4(), "はなこ");
            assert!(matches!(second, Err(ServiceError::SlotFull { event_id: 1, .. })));

            assert_eq!(slot_counts(conn, 1)?, vec![("11:00".to_string(), 1)]);
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn one_reservation_per_user_and_event() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            sync_event_slots(conn, &sample_catalog())?;
            let user = Uuid::new_v4();

            reserve_slot(conn, 1, "11:00", user, "たろう")?;
            let again = reserve_slot(conn, 1, "13:00", user, "たろう");
            assert!(matches!(again, Err(ServiceError::AlreadyReserved)));
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn unknown_slot_is_not_found() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            sync_event_slots(conn, &sample_catalog())?;
            let result = reserve_slot(conn, 1, "12:00", Uuid::new_v4(), "たろう");
            assert!(matches!(result, Err(ServiceError::NotFound(_))));
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn change_moves_reservation_and_respects_capacity() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            sync_event_slots(conn, &sample_catalog())?;
            let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

            let a = reserve_slot(conn, 1, "11:00", alice, "アリス")?;
            let b = reserve_slot(conn, 1, "13:00", bob, "ボブ")?;

            let blocked = change_reservation(conn, a.id, alice, 1, "13:00");
            assert!(matches!(blocked, Err(ServiceError::SlotFull { .. })));

            cancel_reservation(conn, b.id, bob)?;
            let moved = change_reservation(conn, a.id, alice, 1, "13:00")?;
            assert_eq!(moved.id, a.id);
            assert_eq!(moved.event_time, "13:00");

            let foreign = change_reservation(conn, a.id, bob, 1, "11:00");
            assert!(matches!(foreign, Err(ServiceError::NotFound(_))));
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn change_to_the_same_slot_leaves_the_row_untouched() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            sync_event_slots(conn, &sample_catalog())?;
            let user = Uuid::new_v4();
            let original = reserve_slot(conn, 1, "11:00", user, "たろう")?;

            let same = change_reservation(conn, original.id, user, 1, "11:00")?;
            assert_eq!(same.id, original.id);
            assert_eq!(same.event_time, original.event_time);
            assert_eq!(same.updated_at, original.updated_at);
            assert_eq!(slot_counts(conn, 1)?, vec![("11:00".to_string(), 1)]);
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn concurrent_writers_never_overbook() {
        use crate::schema::{event_slots, reservations};

        const WRITERS: usize = 16;
        // event id outside the catalog range so committed rows never collide
        let ev_id = 1_000_000 + (Uuid::new_v4().as_u128() % 1_000_000) as i32;

        let mut setup = test_connection();
        diesel::insert_into(event_slots::table)
            .values(EventSlot {
                event_id: ev_id,
                event_time: "11:00".to_string(),
                capacity: 1,
            })
            .execute(&mut setup)
            .unwrap();

        let barrier = Barrier::new(WRITERS);
        let outcomes: Vec<Result<Reservation, ServiceError>> = thread::scope(|s| {
            let handles: Vec<_> = (0..WRITERS)
                .map(|n| {
                    let barrier = &barrier;
                    s.spawn(move || {
                        let mut conn = test_connection();
                        barrier.wait();
                        reserve_slot(&mut conn, ev_id, "11:00", Uuid::new_v4(), &format!("客{n}"))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let counts = slot_counts(&mut setup, ev_id).unwrap();
        diesel::delete(reservations::table.filter(reservations::event_id.eq(ev_id)))
            .execute(&mut setup)
            .unwrap();
        diesel::delete(event_slots::table.filter(event_slots::event_id.eq(ev_id)))
            .execute(&mut setup)
            .unwrap();

        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ServiceError::SlotFull { .. })));
        assert_eq!(counts, vec![("11:00".to_string(), 1)]);
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn cancel_requires_ownership() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            sync_event_slots(conn, &sample_catalog())?;
            let owner = Uuid::new_v4();
            let r = reserve_slot(conn, 1, "11:00", owner, "たろう")?;

            assert!(matches!(
                cancel_reservation(conn, r.id, Uuid::new_v4()),
                Err(ServiceError::NotFound(_))
            ));
            cancel_reservation(conn, r.id, owner)?;
            assert!(list_user_reservations(conn, owner)?.is_empty());
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn lottery_upsert_overwrites_per_user() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            let user = Uuid::new_v4();

            upsert_lottery_application(conn, user, "さくら", &[wish(2, "10:00")])?;
            let replaced = upsert_lottery_application(conn, user, "さくら", &[wish(3, "15:00"), wish(2, "14:00")])?;

            assert_eq!(replaced.wishes()?, vec![wish(3, "15:00"), wish(2, "14:00")]);
            let stored = list_lottery_applications(conn)?;
            assert_eq!(stored.iter().filter(|a| a.user_id == user).count(), 1);
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn nicknames_are_unique_across_users() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            upsert_lottery_application(conn, Uuid::new_v4(), "もみじ", &[wish(2, "10:00")])?;
            let clash = upsert_lottery_application(conn, Uuid::new_v4(), "もみじ", &[wish(3, "9:30")]);
            assert!(matches!(clash, Err(ServiceError::NicknameTaken)));
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn racing_nickname_claim_maps_to_conflict() {
        use crate::schema::lottery_applications;

        let name = format!("n-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let (first_user, second_user) = (Uuid::new_v4(), Uuid::new_v4());
        let mut first = test_connection();
        let mut second = test_connection();

        // the second writer's pre-check cannot see the uncommitted row, so it
        // waits on the unique index until the first transaction commits
        let racer = first
            .transaction::<_, ServiceError, _>(|conn| {
                upsert_lottery_application(conn, first_user, &name, &[wish(2, "10:00")])?;
                let racing_name = name.clone();
                let racer = thread::spawn(move || {
                    upsert_lottery_application(&mut second, second_user, &racing_name, &[wish(3, "9:30")])
                });
                thread::sleep(Duration::from_millis(200));
                Ok(racer)
            })
            .unwrap();
        let clash = racer.join().unwrap();

        let holders: Vec<Uuid> = lottery_applications::table
            .filter(lottery_applications::user_name.eq(&name))
            .select(lottery_applications::user_id)
            .load(&mut first)
            .unwrap();
        diesel::delete(lottery_applications::table.filter(lottery_applications::user_name.eq(&name)))
            .execute(&mut first)
            .unwrap();

        assert!(matches!(clash, Err(ServiceError::NicknameTaken)));
        assert_eq!(holders, vec![first_user]);
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn admin_password_matches_stored_hash() {
        use crate::schema::admin_passwords;

        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            diesel::insert_into(admin_passwords::table)
                .values(admin_passwords::password_hash.eq(hash_password("bunkasai-2026")))
                .execute(conn)?;

            assert!(verify_admin_password(conn, "bunkasai-2026")?);
            assert!(!verify_admin_password(conn, "wrong")?);
            Ok(())
        });
    }

    #[test]
    #[ignore = "requires TEST_DATABASE_URL"]
    fn now_showing_flag_is_upserted() {
        test_connection().test_transaction::<_, ServiceError, _>(|conn| {
            assert!(set_now_showing(conn, 7, true)?.is_showing);
            assert!(!set_now_showing(conn, 7, false)?.is_showing);
            let flags = list_now_showing(conn)?;
            assert_eq!(flags.iter().filter(|f| f.event_id == 7).count(), 1);
            Ok(())
        });
    }
}
