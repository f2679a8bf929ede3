use actix_web::{delete, error, get, post, put, web, HttpResponse};
use log::{info, warn};
use uuid::Uuid;

use crate::{
    actions, admission,
    auth::{AdminSession, AdminSessions},
    catalog::{Catalog, ReservationType},
    error::{Res, ServiceError},
    identity::Identity,
    lottery,
    models::{self, LotteryResponse},
    selection::EventFilter,
    DbPool,
};

type ApiResult = Result<HttpResponse, ServiceError>;

fn message(text: &str) -> Res {
    Res {
        message: text.to_string(),
    }
}

#[get("/catalog/events")]
async fn list_events(catalog: web::Data<Catalog>, filter: web::Query<EventFilter>) -> HttpResponse {
    HttpResponse::Ok().json(filter.apply(&catalog.events))
}

#[get("/catalog/events/{event_id}")]
async fn get_event(catalog: web::Data<Catalog>, path: web::Path<i32>) -> ApiResult {
    let event = catalog.event(path.into_inner()).ok_or(ServiceError::NotFound("企画"))?;
    Ok(HttpResponse::Ok().json(event))
}

#[get("/catalog/goods")]
async fn list_goods(catalog: web::Data<Catalog>) -> HttpResponse {
    HttpResponse::Ok().json(&catalog.goods)
}

#[get("/catalog/news")]
async fn list_news(catalog: web::Data<Catalog>) -> HttpResponse {
    let mut news: Vec<_> = catalog.news.iter().collect();
    news.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
    HttpResponse::Ok().json(news)
}

#[get("/catalog/timetable")]
async fn list_timetable(catalog: web::Data<Catalog>) -> HttpResponse {
    HttpResponse::Ok().json(&catalog.timetable)
}

#[get("/catalog/hints")]
async fn list_hints(catalog: web::Data<Catalog>) -> HttpResponse {
    HttpResponse::Ok().json(&catalog.hints)
}

#[post("/riddles/{hint_id}/answer")]
async fn answer_riddle(
    catalog: web::Data<Catalog>,
    path: web::Path<i32>,
    form: web::Json<models::RiddleAnswerRequest>,
) -> ApiResult {
    let hint = catalog.hint(path.into_inner()).ok_or(ServiceError::NotFound("謎"))?;
    Ok(HttpResponse::Ok().json(models::RiddleAnswerResponse {
        correct: hint.is_answer(&form.answer),
    }))
}

#[get("/events/{event_id}/availability")]
async fn event_availability(pool: web::Data<DbPool>, catalog: web::Data<Catalog>, path: web::Path<i32>) -> ApiResult {
    let ev_id = path.into_inner();
    let event = catalog.event(ev_id).ok_or(ServiceError::NotFound("企画"))?;
    if event.reservation_type != ReservationType::FirstCome {
        return Err(ServiceError::validation("抽選制の企画には空き状況がありません"));
    }

    let counts = web::block(move || {
        let mut conn = pool.get()?;
        actions::slot_counts(&mut conn, ev_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(admission::availability(event, &counts)))
}

#[get("/now-showing")]
async fn list_now_showing(pool: web::Data<DbPool>) -> ApiResult {
    let flags = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_now_showing(&mut conn)
    })
    .await??;

    Ok(HttpResponse::Ok().json(flags))
}

#[post("/reservations")]
async fn create_reservation(
    identity: Identity,
    pool: web::Data<DbPool>,
    catalog: web::Data<Catalog>,
    form: web::Json<models::ReserveRequest>,
) -> ApiResult {
    let form = form.into_inner();
    let name = admission::validate_user_name(&form.user_name)?;
    admission::first_come_event(&catalog, form.event_id, &form.event_time)?;

    let user_id = identity.user_id;
    let ev_id = form.event_id;
    let reservation = web::block(move || {
        let mut conn = pool.get()?;
        actions::reserve_slot(&mut conn, form.event_id, &form.event_time, user_id, &name)
    })
    .await?
    .inspect_err(|e| match e {
        ServiceError::SlotFull { event_id, event_time } => {
            warn!("event {event_id} at {event_time} is full, rejected {user_id}")
        }
        ServiceError::AlreadyReserved => warn!("{user_id} already holds a reservation for event {ev_id}"),
        _ => {}
    })?;

    info!(
        "reservation {} created for event {} at {} ({:?})",
        reservation.id, reservation.event_id, reservation.event_time, identity.source
    );

    Ok(HttpResponse::Created().json(models::ReservationResponse {
        message: "予約が完了しました".to_string(),
        reservation,
    }))
}

#[get("/reservations/me")]
async fn my_reservations(identity: Identity, pool: web::Data<DbPool>) -> ApiResult {
    let rows = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_user_reservations(&mut conn, identity.user_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(rows))
}

#[put("/reservations/{reservation_id}")]
async fn change_reservation(
    identity: Identity,
    pool: web::Data<DbPool>,
    catalog: web::Data<Catalog>,
    path: web::Path<Uuid>,
    form: web::Json<models::ChangeReservationRequest>,
) -> ApiResult {
    let reservation_id = path.into_inner();
    let form = form.into_inner();
    admission::first_come_event(&catalog, form.event_id, &form.event_time)?;

    let reservation = web::block(move || {
        let mut conn = pool.get()?;
        actions::change_reservation(&mut conn, reservation_id, identity.user_id, form.event_id, &form.event_time)
    })
    .await??;

    info!(
        "reservation {} moved to event {} at {}",
        reservation.id, reservation.event_id, reservation.event_time
    );

    Ok(HttpResponse::Ok().json(models::ReservationResponse {
        message: "予約を変更しました".to_string(),
        reservation,
    }))
}

#[delete("/reservations/{reservation_id}")]
async fn cancel_reservation(identity: Identity, pool: web::Data<DbPool>, path: web::Path<Uuid>) -> ApiResult {
    let reservation_id = path.into_inner();

    web::block(move || {
        let mut conn = pool.get()?;
        actions::cancel_reservation(&mut conn, reservation_id, identity.user_id)
    })
    .await??;

    info!("reservation {reservation_id} canceled");
    Ok(HttpResponse::Ok().json(message("予約をキャンセルしました")))
}

#[post("/lottery")]
async fn submit_lottery(
    identity: Identity,
    pool: web::Data<DbPool>,
    catalog: web::Data<Catalog>,
    form: web::Json<models::LotteryRequest>,
) -> ApiResult {
    let form = form.into_inner();
    let name = admission::validate_user_name(&form.user_name)?;
    lottery::validate_wishes(&catalog, &form.wishes)?;

    let application = web::block(move || {
        let mut conn = pool.get()?;
        actions::upsert_lottery_application(&mut conn, identity.user_id, &name, &form.wishes)
    })
    .await??;

    info!("lottery application saved for {}", application.user_id);
    Ok(HttpResponse::Ok().json(LotteryResponse::try_from(application)?))
}

#[get("/lottery/me")]
async fn my_lottery(identity: Identity, pool: web::Data<DbPool>) -> ApiResult {
    let application = web::block(move || {
        let mut conn = pool.get()?;
        actions::get_lottery_application(&mut conn, identity.user_id)
    })
    .await??
    .ok_or(ServiceError::NotFound("抽選の応募"))?;

    Ok(HttpResponse::Ok().json(LotteryResponse::try_from(application)?))
}

#[post("/admin/login")]
async fn admin_login(
    pool: web::Data<DbPool>,
    sessions: web::Data<AdminSessions>,
    form: web::Json<models::AdminLoginRequest>,
) -> ApiResult {
    let password = form.into_inner().password;
    if password.is_empty() {
        return Err(ServiceError::InvalidCredentials);
    }

    let matched = web::block(move || {
        let mut conn = pool.get()?;
        actions::verify_admin_password(&mut conn, &password)
    })
    .await??;

    if !matched {
        warn!("admin login failed");
        return Err(ServiceError::InvalidCredentials);
    }

    let token = sessions.issue();
    info!("admin session issued");

    Ok(HttpResponse::Ok().json(models::AdminLoginResponse {
        token,
        expires_in: sessions.ttl().as_secs(),
    }))
}

#[get("/admin/reservations")]
async fn admin_reservations(
    admin: AdminSession,
    pool: web::Data<DbPool>,
    query: web::Query<models::ReservationQuery>,
) -> ApiResult {
    let ev_id = query.event_id;
    log::debug!("{admin:?} listing reservations");
    let rows = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_reservations(&mut conn, ev_id)
    })
    .await??;

    Ok(HttpResponse::Ok().json(rows))
}

#[get("/admin/lottery")]
async fn admin_lottery(_admin: AdminSession, pool: web::Data<DbPool>) -> ApiResult {
    let rows = web::block(move || {
        let mut conn = pool.get()?;
        actions::list_lottery_applications(&mut conn)
    })
    .await??;

    let applications = rows
        .into_iter()
        .map(LotteryResponse::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(applications))
}

#[put("/admin/now-showing/{event_id}")]
async fn admin_set_now_showing(
    admin: AdminSession,
    pool: web::Data<DbPool>,
    catalog: web::Data<Catalog>,
    path: web::Path<i32>,
    form: web::Json<models::NowShowingRequest>,
) -> ApiResult {
    let ev_id = path.into_inner();
    catalog.event(ev_id).ok_or(ServiceError::NotFound("企画"))?;
    let showing = form.is_showing;

    let flag = web::block(move || {
        let mut conn = pool.get()?;
        actions::set_now_showing(&mut conn, ev_id, showing)
    })
    .await??;

    info!("event {} now showing: {} (set by {:?})", flag.event_id, flag.is_showing, admin);
    Ok(HttpResponse::Ok().json(flag))
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let detail = err.to_string();
        let response = match err {
            error::JsonPayloadError::ContentType => {
                HttpResponse::UnsupportedMediaType().json(message("Content-Type は application/json にしてください"))
            }
            error::JsonPayloadError::Deserialize(ref err) => {
                HttpResponse::BadRequest().json(Res { message: err.to_string() })
            }
            _ => HttpResponse::BadRequest().json(Res { message: detail }),
        };
        error::InternalError::from_response(err, response).into()
    })
}

fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(Res { message: err.to_string() });
        error::InternalError::from_response(err, response).into()
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .app_data(query_config())
        .service(list_events)
        .service(get_event)
        .service(list_goods)
        .service(list_news)
        .service(list_timetable)
        .service(list_hints)
        .service(answer_riddle)
        .service(event_availability)
        .service(list_now_showing)
        .service(create_reservation)
        .service(my_reservations)
        .service(change_reservation)
        .service(cancel_reservation)
        .service(submit_lottery)
        .service(my_lottery)
        .service(admin_login)
        .service(admin_reservations)
        .service(admin_lottery)
        .service(admin_set_now_showing);
}
