//! Reservation booking engine.
//!
//! [`BookingService`] owns the three reservation operations. Its one hard guarantee is that no
//! two reservations for the same room ever overlap, however many requests race for it:
//!
//! 1. the acting user and target room are resolved outside any transaction,
//! 2. a transaction is opened at the configured isolation level,
//! 3. a transaction-scoped advisory lock keyed by the room serialises all bookers of that room,
//! 4. the overlap check and the insert run inside that same transaction, then it commits.
//!
//! Calendar events and confirmation emails are handed to [`SideEffects`] only after the commit.
//! They can fail or time out without affecting the booking, which is already durable.
//!
//! Input is assumed to be validated by the HTTP layer (well-formed, future, within school hours,
//! `end > start`). The engine re-checks only the role-dependent duration cap.

pub mod policy;

use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use tracing::{Level, debug, error, info, instrument, warn};

use crate::calendar::{CalendarClient, CalendarEvent};
use crate::config::BookingConfig;
use crate::db::{
    self,
    errors::DbError,
    handlers::{Repository, Reservations, Rooms, Users},
    models::{
        reservations::{ReservationCreateDBRequest, ReservationDBResponse, ReservationWithDetails},
        rooms::RoomDBResponse,
        users::UserDBResponse,
    },
};
use crate::email::{Confirmation, Mailer};
use crate::errors::{Error, Result};
use crate::side_effects::SideEffects;
use crate::types::{ReservationId, Role, RoomId, UserId};

#[derive(Debug, Clone)]
pub struct CreateReservationInput {
    pub user_id: UserId,
    pub user_name: String,
    pub user_role: Role,
    pub room_id: RoomId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Listing window and caller. An anonymous caller has neither id nor role.
#[derive(Debug, Clone)]
pub struct GetReservationsInput {
    pub start_date: NaiveDate,
    /// Inclusive
    pub end_date: NaiveDate,
    pub user_id: Option<UserId>,
    pub user_role: Option<Role>,
}

#[derive(Debug, Clone)]
pub struct CancelReservationInput {
    pub id: ReservationId,
    pub user_id: UserId,
    pub user_role: Role,
}

/// One booked interval. `booked_by` is only filled in for the owner and staff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedSlot {
    pub id: ReservationId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub booked_by: Option<String>,
}

/// All slots of one room inside a listing window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSlots {
    pub room_id: RoomId,
    pub room_name: String,
    pub slots: Vec<ReservedSlot>,
}

pub struct BookingService {
    db: PgPool,
    config: BookingConfig,
    side_effects: SideEffects,
    calendar: Arc<dyn CalendarClient>,
    mailer: Arc<dyn Mailer>,
}

impl BookingService {
    pub fn new(
        db: PgPool,
        config: BookingConfig,
        side_effects: SideEffects,
        calendar: Arc<dyn CalendarClient>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            db,
            config,
            side_effects,
            calendar,
            mailer,
        }
    }

    pub fn config(&self) -> &BookingConfig {
        &self.config
    }

    pub fn side_effects(&self) -> &SideEffects {
        &self.side_effects
    }

    pub fn calendar_enabled(&self) -> bool {
        self.calendar.enabled()
    }

    pub fn email_enabled(&self) -> bool {
        self.mailer.enabled()
    }

    /// Book `[start_time, end_time)` in a room, or fail with [`Error::TimeSlotTaken`] if any
    /// existing reservation for that room overlaps it.
    #[instrument(skip(self, input), fields(user_id = input.user_id, room_id = input.room_id), err(level = Level::DEBUG))]
    pub async fn create_reservation(&self, input: CreateReservationInput) -> Result<ReservationDBResponse> {
        let (user, room) = self.resolve_user_and_room(input.user_id, input.room_id).await?;

        if policy::exceeds_max_duration(
            input.user_role,
            input.start_time,
            input.end_time,
            self.config.student_max_duration,
        ) {
            return Err(Error::ExceedsMaxDuration);
        }

        let request = ReservationCreateDBRequest {
            room_id: room.id,
            user_id: user.id,
            start_time: input.start_time,
            end_time: input.end_time,
        };

        let reservation = match self.insert_if_free(&request).await {
            Ok(reservation) => reservation,
            Err(Error::Database(DbError::SerializationFailure { message })) => {
                // Serializable isolation aborted us. Only report a conflict if one is now visible.
                debug!(%message, "Booking transaction lost a serialization race, re-checking overlap");
                let mut conn = self.db.acquire().await.map_err(DbError::from)?;
                let taken = Reservations::new(&mut conn)
                    .exists_overlapping(request.room_id, request.start_time, request.end_time)
                    .await?;
                if taken {
                    return Err(Error::TimeSlotTaken);
                }
                return Err(Error::Database(DbError::SerializationFailure { message }));
            }
            Err(e) => return Err(e),
        };

        info!(reservation_id = reservation.id, "Reservation created");

        self.dispatch_created(&reservation, &user, &room, input.user_name);

        Ok(reservation)
    }

    /// Lock, check, insert, commit. Dropping the transaction on any early return rolls it back.
    async fn insert_if_free(&self, request: &ReservationCreateDBRequest) -> Result<ReservationDBResponse> {
        let mut tx = db::begin_with_isolation(&self.db, self.config.isolation)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to begin booking transaction"))?;

        let reservation = {
            let mut repo = Reservations::new(&mut tx);
            repo.lock_room(request.room_id).await?;

            if repo
                .exists_overlapping(request.room_id, request.start_time, request.end_time)
                .await?
            {
                return Err(Error::TimeSlotTaken);
            }

            repo.create(request).await?
        };

        tx.commit()
            .await
            .map_err(DbError::from)
            .inspect_err(|e| error!(error = %e, "Failed to commit booking transaction"))?;

        Ok(reservation)
    }

    async fn resolve_user_and_room(&self, user_id: UserId, room_id: RoomId) -> Result<(UserDBResponse, RoomDBResponse)> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;

        let user = match Users::new(&mut conn).get_by_id(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(user_id, "Acting user does not exist");
                return Err(Error::GetUserFailed);
            }
            Err(e) => {
                error!(user_id, error = %e, "Failed to load acting user");
                return Err(Error::GetUserFailed);
            }
        };

        let room = Rooms::new(&mut conn).get_by_id(room_id).await?.ok_or(Error::RoomNotFound)?;

        Ok((user, room))
    }

    fn dispatch_created(&self, reservation: &ReservationDBResponse, user: &UserDBResponse, room: &RoomDBResponse, owner_name: String) {
        if self.calendar.enabled() {
            let calendar = self.calendar.clone();
            let db = self.db.clone();
            let reservation_id = reservation.id;
            let event = CalendarEvent {
                owner_name: owner_name.clone(),
                room_name: room.name.clone(),
                start_time: reservation.start_time,
                end_time: reservation.end_time,
            };

            self.side_effects.spawn("calendar_create_event", async move {
                let event_id = calendar.create_event(&event).await?;

                let mut conn = db.acquire().await?;
                let attached = Reservations::new(&mut conn).set_external_event_id(reservation_id, &event_id).await?;
                if !attached {
                    // Cancelled before the event id was recorded, so nobody else will remove it
                    debug!(reservation_id, %event_id, "Reservation gone, removing orphaned calendar event");
                    calendar.delete_event(&event_id).await?;
                }
                Ok::<_, anyhow::Error>(())
            });
        }

        if self.mailer.enabled() {
            let mailer = self.mailer.clone();
            let confirmation = Confirmation {
                to_email: user.email.clone(),
                to_name: owner_name,
                room_name: room.name.clone(),
                start_time: reservation.start_time,
                end_time: reservation.end_time,
            };

            self.side_effects
                .spawn("send_confirmation_email", async move { mailer.send_confirmation(&confirmation).await });
        }
    }

    /// Every reservation touching `[start_date 00:00, end_date + 1 day 00:00)` UTC, grouped by room
    /// in room id order. Rooms without reservations are omitted.
    #[instrument(skip(self, input), fields(start = %input.start_date, end = %input.end_date), err(level = Level::DEBUG))]
    pub async fn get_reservations(&self, input: GetReservationsInput) -> Result<Vec<RoomSlots>> {
        let start = input.start_date.and_time(NaiveTime::MIN).and_utc();
        let end = input
            .end_date
            .checked_add_days(Days::new(1))
            .ok_or_else(|| Error::BadRequest {
                message: "end date is out of range".to_string(),
            })?
            .and_time(NaiveTime::MIN)
            .and_utc();

        let rows = self.list_between(start, end).await.map_err(|e| {
            error!(error = %e, "Failed to fetch reservations");
            Error::ReservationFetchFailed
        })?;

        Ok(group_by_room(rows, input.user_id, input.user_role))
    }

    async fn list_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> std::result::Result<Vec<ReservationWithDetails>, DbError> {
        let mut conn = self.db.acquire().await?;
        Reservations::new(&mut conn).list_between(start, end).await
    }

    /// Delete a reservation the caller owns (or any reservation, for staff).
    #[instrument(skip(self, input), fields(reservation_id = input.id, user_id = input.user_id), err(level = Level::DEBUG))]
    pub async fn cancel_reservation(&self, input: CancelReservationInput) -> Result<()> {
        let mut conn = self.db.acquire().await.map_err(DbError::from)?;
        let mut repo = Reservations::new(&mut conn);

        let reservation = repo.get_by_id(input.id).await?.ok_or(Error::ReservationNotFound)?;

        if !policy::can_cancel(input.user_id, input.user_role, reservation.user_id) {
            return Err(Error::UnauthorizedCancellation);
        }

        // A concurrent cancellation may have won
        if !repo.delete(input.id).await? {
            return Err(Error::ReservationNotFound);
        }

        info!(reservation_id = input.id, "Reservation cancelled");

        if let Some(event_id) = reservation.gcal_event_id.filter(|_| self.calendar.enabled()) {
            let calendar = self.calendar.clone();
            self.side_effects
                .spawn("calendar_delete_event", async move { calendar.delete_event(&event_id).await });
        }

        Ok(())
    }
}

/// Rows arrive ordered by room then start time; consecutive rows of the same room form a group.
fn group_by_room(rows: Vec<ReservationWithDetails>, caller_id: Option<UserId>, caller_role: Option<Role>) -> Vec<RoomSlots> {
    let mut rooms: Vec<RoomSlots> = Vec::new();

    for row in rows {
        let booked_by = policy::can_see_owner(caller_id, caller_role, row.user_id).then_some(row.user_name);
        let slot = ReservedSlot {
            id: row.id,
            start_time: row.start_time,
            end_time: row.end_time,
            booked_by,
        };

        match rooms.last_mut() {
            Some(room) if room.room_id == row.room_id => room.slots.push(slot),
            _ => rooms.push(RoomSlots {
                room_id: row.room_id,
                room_name: row.room_name,
                slots: vec![slot],
            }),
        }
    }

    rooms
}
