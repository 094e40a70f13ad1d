//! In-process store.
//!
//! Enforces the same uniqueness and foreign-key rules as the PostgreSQL
//! schema and reports violations under the same constraint names. All state
//! sits behind one async mutex; a payment transaction holds that mutex until
//! it commits or is dropped, which stands in for the row lock.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::constraints::{
    RESERVATION_IDEMPOTENCY_KEY, RESERVATION_SEAT_SEAT_FK, RESERVATION_SESSION_FK,
    RESERVATION_USER_FK, SALE_RESERVATION, SALE_SEAT_SALE_SEAT, SALE_SEAT_SEAT,
    SEAT_LOCK_ACTIVE_SEAT, SEAT_SESSION_LABEL, USER_EMAIL,
};
use super::{
    EventLogStore, Page, PageRequest, PaymentTx, ReservationStore, SaleStore, SessionStore,
    StoreError, UserStore,
};
use crate::domain::{
    NewReservation, Reservation, ReservationFilter, ReservationId, ReservationStatus, Sale,
    SaleFilter, SaleId, Seat, SeatId, Session, SessionId, User, UserId,
};

fn unique(constraint: &str) -> StoreError {
    StoreError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn foreign_key(constraint: &str) -> StoreError {
    StoreError::ForeignKeyViolation {
        constraint: constraint.to_string(),
    }
}

#[derive(Debug, Clone)]
struct SeatLock {
    reservation_id: ReservationId,
    seat_id: SeatId,
    expires_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
}

/// A row of the event log.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedEvent {
    /// Event name.
    pub event_name: String,
    /// JSON payload.
    pub payload: serde_json::Value,
    /// Time of logging.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
    seats: HashMap<SessionId, Vec<Seat>>,
    seat_sessions: HashMap<SeatId, SessionId>,
    reservations: HashMap<ReservationId, Reservation>,
    locks: Vec<SeatLock>,
    sales: HashMap<SaleId, Sale>,
    sold: HashMap<SeatId, SaleId>,
    events: Vec<LoggedEvent>,
}

impl MemoryState {
    fn sold_seat_ids(&self, session_id: SessionId, seat_ids: &[SeatId]) -> Vec<SeatId> {
        seat_ids
            .iter()
            .filter(|seat_id| {
                self.sold
                    .get(seat_id)
                    .and_then(|sale_id| self.sales.get(sale_id))
                    .is_some_and(|sale| sale.session_id == session_id)
            })
            .copied()
            .collect()
    }

    fn reservation_is_reserved(&self, id: ReservationId) -> bool {
        self.reservations
            .get(&id)
            .is_some_and(|r| r.status == ReservationStatus::Reserved)
    }

    fn expire_if_due(&mut self, id: ReservationId, now: DateTime<Utc>) -> Option<Reservation> {
        let reservation = self.reservations.get_mut(&id)?;
        if reservation.status != ReservationStatus::Reserved || reservation.expires_at > now {
            return None;
        }
        reservation.status = ReservationStatus::Expired;
        let expired = reservation.clone();
        for lock in self
            .locks
            .iter_mut()
            .filter(|l| l.reservation_id == id && l.released_at.is_none())
        {
            lock.released_at = Some(now);
        }
        Some(expired)
    }

    fn insert_reservation(&mut self, new: &NewReservation) -> Result<Reservation, StoreError> {
        if !self.sessions.contains_key(&new.session_id) {
            return Err(foreign_key(RESERVATION_SESSION_FK));
        }
        if !self.users.contains_key(&new.user_id) {
            return Err(foreign_key(RESERVATION_USER_FK));
        }
        if let Some(key) = new.idempotency_key.as_deref() {
            let taken = self.reservations.values().any(|r| {
                r.user_id == new.user_id && r.idempotency_key.as_deref() == Some(key)
            });
            if taken {
                return Err(unique(RESERVATION_IDEMPOTENCY_KEY));
            }
        }
        if new
            .seat_ids
            .iter()
            .any(|seat_id| !self.seat_sessions.contains_key(seat_id))
        {
            return Err(foreign_key(RESERVATION_SEAT_SEAT_FK));
        }
        let locked = self
            .locks
            .iter()
            .any(|l| l.released_at.is_none() && new.seat_ids.contains(&l.seat_id));
        if locked {
            return Err(unique(SEAT_LOCK_ACTIVE_SEAT));
        }

        let reservation = Reservation {
            id: new.id,
            session_id: new.session_id,
            user_id: new.user_id,
            status: ReservationStatus::Reserved,
            expires_at: new.expires_at,
            idempotency_key: new.idempotency_key.clone(),
            seat_ids: new.seat_ids.clone(),
            created_at: new.created_at,
        };
        self.locks.extend(new.seat_ids.iter().map(|&seat_id| SeatLock {
            reservation_id: new.id,
            seat_id,
            expires_at: new.expires_at,
            released_at: None,
        }));
        self.reservations.insert(new.id, reservation.clone());
        Ok(reservation)
    }

    fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        if let Some(reservation_id) = sale.reservation_id {
            if self
                .sales
                .values()
                .any(|s| s.reservation_id == Some(reservation_id))
            {
                return Err(unique(SALE_RESERVATION));
            }
        }
        let mut seen = sale.seat_ids.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != sale.seat_ids.len() {
            return Err(unique(SALE_SEAT_SALE_SEAT));
        }
        if sale.seat_ids.iter().any(|seat_id| self.sold.contains_key(seat_id)) {
            return Err(unique(SALE_SEAT_SEAT));
        }
        for &seat_id in &sale.seat_ids {
            self.sold.insert(seat_id, sale.id);
        }
        self.sales.insert(sale.id, sale.clone());
        Ok(())
    }
}

fn paginate<T>(mut items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = items.len() as u64;
    let start = usize::try_from(page.offset()).unwrap_or(usize::MAX).min(items.len());
    let per_page = usize::try_from(page.per_page).unwrap_or(usize::MAX);
    let items = items.drain(start..).take(per_page).collect();
    Page { items, total }
}

/// In-memory store for tests and single-node runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unreleased locks currently held on `seat_id`.
    #[cfg(test)]
    pub async fn unreleased_lock_count(&self, seat_id: SeatId) -> usize {
        let state = self.state.lock().await;
        state
            .locks
            .iter()
            .filter(|l| l.seat_id == seat_id && l.released_at.is_none())
            .count()
    }

    /// Number of sales that include `seat_id`.
    #[cfg(test)]
    pub async fn sale_count_for_seat(&self, seat_id: SeatId) -> usize {
        let state = self.state.lock().await;
        state
            .sales
            .values()
            .filter(|s| s.seat_ids.contains(&seat_id))
            .count()
    }

    /// Snapshot of the event log.
    #[cfg(test)]
    pub async fn logged_events(&self) -> Vec<LoggedEvent> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &Session, seats: &[Seat]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let mut labels: Vec<&str> = seats.iter().map(|s| s.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() != seats.len() {
            return Err(unique(SEAT_SESSION_LABEL));
        }
        state.sessions.insert(session.id, session.clone());
        for seat in seats {
            state.seat_sessions.insert(seat.id, session.id);
        }
        state.seats.insert(session.id, seats.to_vec());
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn load_seats(&self, session_id: SessionId) -> Result<Vec<Seat>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .seats
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.email == user.email) {
            return Err(unique(USER_EMAIL));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn find_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Reservation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .reservations
            .values()
            .find(|r| r.user_id == user_id && r.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn sold_seat_ids(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, StoreError> {
        Ok(self.state.lock().await.sold_seat_ids(session_id, seat_ids))
    }

    async fn active_locked_seat_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .locks
            .iter()
            .filter(|l| {
                l.released_at.is_none()
                    && l.expires_at > now
                    && seat_ids.contains(&l.seat_id)
                    && state.reservation_is_reserved(l.reservation_id)
            })
            .map(|l| l.seat_id)
            .collect())
    }

    async fn stale_lock_reservation_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>, StoreError> {
        let state = self.state.lock().await;
        let mut ids: Vec<ReservationId> = state
            .locks
            .iter()
            .filter(|l| {
                l.released_at.is_none()
                    && l.expires_at <= now
                    && seat_ids.contains(&l.seat_id)
                    && state.reservation_is_reserved(l.reservation_id)
            })
            .map(|l| l.reservation_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    async fn insert_reservation(&self, new: &NewReservation) -> Result<Reservation, StoreError> {
        self.state.lock().await.insert_reservation(new)
    }

    async fn expire_if_due(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.state.lock().await.expire_if_due(id, now))
    }

    async fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> Result<Page<Reservation>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| filter.user_id.is_none_or(|id| r.user_id == id))
            .filter(|r| filter.session_id.is_none_or(|id| r.session_id == id))
            .filter(|r| filter.status.is_none_or(|s| r.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matching, page))
    }

    async fn pending_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let state = self.state.lock().await;
        let mut pending: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Reserved)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.expires_at);
        Ok(pending)
    }
}

#[async_trait]
impl SaleStore for MemoryStore {
    async fn begin_payment(&self) -> Result<Box<dyn PaymentTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryPaymentTx {
            guard,
            snapshot: Some(snapshot),
        }))
    }

    async fn load_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        Ok(self.state.lock().await.sales.get(&id).cloned())
    }

    async fn purchase_history(
        &self,
        user_id: UserId,
        filter: &SaleFilter,
        page: PageRequest,
    ) -> Result<Page<Sale>, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<Sale> = state
            .sales
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| filter.session_id.is_none_or(|id| s.session_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(matching, page))
    }
}

#[async_trait]
impl EventLogStore for MemoryStore {
    async fn append_event(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.state.lock().await.events.push(LoggedEvent {
            event_name: event_name.to_string(),
            payload: payload.clone(),
            created_at: at,
        });
        Ok(())
    }
}

/// Holds the whole store exclusively. Restores the snapshot unless committed.
struct MemoryPaymentTx {
    guard: OwnedMutexGuard<MemoryState>,
    snapshot: Option<MemoryState>,
}

impl std::fmt::Debug for MemoryPaymentTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPaymentTx")
            .field("committed", &self.snapshot.is_none())
            .finish_non_exhaustive()
    }
}

impl Drop for MemoryPaymentTx {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl PaymentTx for MemoryPaymentTx {
    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self.guard.reservations.get(&id).cloned())
    }

    async fn load_sale_by_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Sale>, StoreError> {
        Ok(self
            .guard
            .sales
            .values()
            .find(|s| s.reservation_id == Some(reservation_id))
            .cloned())
    }

    async fn expire_if_due(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.guard.expire_if_due(id, now).is_some())
    }

    async fn sold_seat_ids(
        &mut self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, StoreError> {
        Ok(self.guard.sold_seat_ids(session_id, seat_ids))
    }

    async fn load_session(&mut self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.guard.sessions.get(&id).cloned())
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        self.guard.insert_sale(sale)
    }

    async fn mark_confirmed(&mut self, id: ReservationId) -> Result<bool, StoreError> {
        match self.guard.reservations.get_mut(&id) {
            Some(r) if r.status == ReservationStatus::Reserved => {
                r.status = ReservationStatus::Confirmed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }
}
