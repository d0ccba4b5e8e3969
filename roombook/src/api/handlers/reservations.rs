use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::instrument;

use crate::{
    AppState,
    api::models::reservations::{
        CreateReservationRequest, ListReservationsQuery, ReservationResponse, RoomSlotsResponse, parse_reservation_id,
    },
    auth::current_user::{CurrentUser, MaybeUser},
    booking::{CancelReservationInput, CreateReservationInput, GetReservationsInput},
    errors::Result,
};

/// Book a room for the calling user.
#[instrument(skip(state, current_user, request), fields(user_id = current_user.id))]
pub async fn create_reservation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>)> {
    let valid = request.validate(state.clock.now(), state.booking.config())?;

    let reservation = state
        .booking
        .create_reservation(CreateReservationInput {
            user_id: current_user.id,
            user_name: current_user.name.clone(),
            user_role: current_user.role,
            room_id: valid.room_id,
            start_time: valid.start_time,
            end_time: valid.end_time,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ReservationResponse::new(reservation, current_user.name))))
}

/// Booked slots per room between two dates (inclusive). Owners are only named to the owner and
/// to staff; anonymous callers see every slot without an owner.
#[instrument(skip(state, caller, query))]
pub async fn list_reservations(
    State(state): State<AppState>,
    MaybeUser(caller): MaybeUser,
    Query(query): Query<ListReservationsQuery>,
) -> Result<Json<Vec<RoomSlotsResponse>>> {
    let (start_date, end_date) = query.validate(state.booking.config().max_date_range_days)?;

    let rooms = state
        .booking
        .get_reservations(GetReservationsInput {
            start_date,
            end_date,
            user_id: caller.as_ref().map(|u| u.id),
            user_role: caller.as_ref().map(|u| u.role),
        })
        .await?;

    Ok(Json(rooms.into_iter().map(RoomSlotsResponse::from).collect()))
}

/// Cancel a reservation. Only its owner or staff may do this.
#[instrument(skip(state, current_user), fields(user_id = current_user.id))]
pub async fn cancel_reservation(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    let id = parse_reservation_id(&id)?;

    state
        .booking
        .cancel_reservation(CancelReservationInput {
            id,
            user_id: current_user.id,
            user_role: current_user.role,
        })
        .await?;

    Ok(StatusCode::NO_CONTENT)
}
