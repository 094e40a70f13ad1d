//! Engine scenarios over the in-memory store, cache and broker.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

use super::*;
use crate::cache::{CacheError, KeyValueCache, MemoryCache, SeatAvailabilityCache};
use crate::config::BookingConfig;
use crate::domain::events::{
    PAYMENT_CONFIRMED, PaymentConfirmed, RESERVATION_CREATED, RESERVATION_EXPIRED, SEAT_RELEASED,
    SeatReleased,
};
use crate::domain::{
    Clock, ManualClock, NewReservation, NewSession, Reservation, ReservationFilter, ReservationId,
    ReservationStatus, Sale, SaleFilter, SaleId, Seat, SeatId, SeatStatus, Session, SessionId,
    User, UserId, generate_seat_labels,
};
use crate::error::BookingError;
use crate::store::{
    EventLogStore, MemoryStore, Page, PageRequest, PaymentTx, ReservationStore, SaleStore,
    SessionStore, Store, StoreError, UserStore,
};
use crate::transport::EventPublisher;
use crate::transport::{
    ConsumeOptions, Delivery, MemoryBroker, MessageHandler, PublishOptions, QueueOptions,
    Topology, Transport, TransportError,
};

const HOLD_SECS: i64 = 30;

#[derive(Debug)]
struct Forward(mpsc::UnboundedSender<Delivery>);

#[async_trait]
impl MessageHandler for Forward {
    async fn handle(&self, delivery: &Delivery) -> Result<(), BookingError> {
        self.0
            .send(delivery.clone())
            .map_err(|e| BookingError::infra(e.to_string()))
    }
}

#[derive(Debug)]
struct FailingCache;

#[async_trait]
impl KeyValueCache for FailingCache {
    async fn set_field(&self, _key: &str, _field: &str, _value: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn get_all_fields(&self, _key: &str) -> Result<HashMap<String, String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

/// Accepts the topology but refuses every publish.
#[derive(Debug)]
struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn declare_exchange(&self, _name: &str) -> Result<(), TransportError> {
        Ok(())
    }

    async fn declare_queue(&self, _name: &str, _options: QueueOptions) -> Result<(), TransportError> {
        Ok(())
    }

    async fn bind_queue(
        &self,
        _queue: &str,
        _exchange: &str,
        _pattern: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn publish(
        &self,
        _exchange: &str,
        _routing_key: &str,
        _payload: Vec<u8>,
        _options: PublishOptions,
    ) -> Result<(), TransportError> {
        Err(TransportError::Closed("broker down".to_string()))
    }

    async fn subscribe(
        &self,
        queue: &str,
        _handler: Arc<dyn MessageHandler>,
        _options: ConsumeOptions,
    ) -> Result<(), TransportError> {
        Err(TransportError::UnknownQueue(queue.to_string()))
    }
}

/// Memory store whose first idempotency-key lookup answers as if taken
/// before a concurrent same-key request committed.
#[derive(Debug)]
struct StaleKeyLookup {
    inner: MemoryStore,
    stale: AtomicBool,
}

impl StaleKeyLookup {
    fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            stale: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl SessionStore for StaleKeyLookup {
    async fn insert_session(&self, session: &Session, seats: &[Seat]) -> Result<(), StoreError> {
        self.inner.insert_session(session, seats).await
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        self.inner.load_session(id).await
    }

    async fn load_seats(&self, session_id: SessionId) -> Result<Vec<Seat>, StoreError> {
        self.inner.load_seats(session_id).await
    }
}

#[async_trait]
impl UserStore for StaleKeyLookup {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.inner.insert_user(user).await
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.load_user(id).await
    }
}

#[async_trait]
impl ReservationStore for StaleKeyLookup {
    async fn find_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Reservation>, StoreError> {
        if self.stale.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_by_idempotency_key(user_id, key).await
    }

    async fn sold_seat_ids(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, StoreError> {
        self.inner.sold_seat_ids(session_id, seat_ids).await
    }

    async fn active_locked_seat_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, StoreError> {
        self.inner.active_locked_seat_ids(seat_ids, now).await
    }

    async fn stale_lock_reservation_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>, StoreError> {
        self.inner.stale_lock_reservation_ids(seat_ids, now).await
    }

    async fn insert_reservation(&self, new: &NewReservation) -> Result<Reservation, StoreError> {
        self.inner.insert_reservation(new).await
    }

    async fn expire_if_due(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError> {
        self.inner.expire_if_due(id, now).await
    }

    async fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        self.inner.load_reservation(id).await
    }

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> Result<Page<Reservation>, StoreError> {
        self.inner.list_reservations(filter, page).await
    }

    async fn pending_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        self.inner.pending_reservations().await
    }
}

#[async_trait]
impl SaleStore for StaleKeyLookup {
    async fn begin_payment(&self) -> Result<Box<dyn PaymentTx>, StoreError> {
        self.inner.begin_payment().await
    }

    async fn load_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        self.inner.load_sale(id).await
    }

    async fn purchase_history(
        &self,
        user_id: UserId,
        filter: &SaleFilter,
        page: PageRequest,
    ) -> Result<Page<Sale>, StoreError> {
        self.inner.purchase_history(user_id, filter, page).await
    }
}

#[async_trait]
impl EventLogStore for StaleKeyLookup {
    async fn append_event(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.inner.append_event(event_name, payload, at).await
    }
}

struct Harness {
    store: MemoryStore,
    transport: Arc<dyn Transport>,
    clock: Arc<ManualClock>,
    topology: Topology,
    engines: Engines,
    session: Session,
    seats: Vec<Seat>,
    alice: User,
    bob: User,
}

impl Harness {
    async fn new() -> Self {
        Self::with(Arc::new(MemoryCache::new()), Arc::new(MemoryBroker::new())).await
    }

    async fn with(cache: Arc<dyn KeyValueCache>, transport: Arc<dyn Transport>) -> Self {
        let store = MemoryStore::new();
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).single().unwrap_or_default();
        let clock = Arc::new(ManualClock::new(start));
        let topology = Topology::default();
        let Ok(()) = topology.declare(transport.as_ref()).await else {
            panic!("topology must declare");
        };
        let shared_store: Arc<dyn Store> = Arc::new(store.clone());
        let shared_clock: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
        let engines = Engines::new(
            shared_store,
            cache,
            Arc::clone(&transport),
            &topology,
            shared_clock,
            BookingConfig::default(),
        );

        let Ok((session, seats)) = engines
            .catalog
            .create_session(NewSession {
                title: "Evening show".to_string(),
                starts_at: start + chrono::Duration::hours(2),
                room: "Room 1".to_string(),
                price: dec!(25.00),
                seat_labels: generate_seat_labels(16),
            })
            .await
        else {
            panic!("session must be created");
        };
        let alice = create_user(&engines, "Alice", "alice@example.com").await;
        let bob = create_user(&engines, "Bob", "bob@example.com").await;

        Self {
            store,
            transport,
            clock,
            topology,
            engines,
            session,
            seats,
            alice,
            bob,
        }
    }

    fn seat(&self, label: &str) -> SeatId {
        let Some(seat) = self.seats.iter().find(|s| s.label == label) else {
            panic!("unknown seat {label}");
        };
        seat.id
    }

    async fn reserve(
        &self,
        user: UserId,
        labels: &[&str],
        key: Option<&str>,
    ) -> Result<Reservation, BookingError> {
        self.engines
            .reservations
            .create(CreateReservation {
                session_id: self.session.id,
                user_id: user,
                seat_ids: labels.iter().map(|l| self.seat(l)).collect(),
                idempotency_key: key.map(str::to_string),
            })
            .await
    }

    fn advance_past_hold(&self) {
        self.clock.advance(chrono::Duration::seconds(HOLD_SECS + 1));
    }

    async fn status_of(&self, label: &str) -> SeatStatus {
        let Ok(availability) = self.engines.availability.load(self.session.id).await else {
            panic!("availability must load");
        };
        let id = self.seat(label);
        let Some(seat) = availability.seats.iter().find(|s| s.id == id) else {
            panic!("seat {label} missing from availability");
        };
        seat.status
    }

    /// Test queue on the events exchange forwarding every matching event.
    async fn listen(&self, pattern: &str) -> mpsc::UnboundedReceiver<Delivery> {
        let queue = format!("test.{pattern}");
        let (tx, rx) = mpsc::unbounded_channel();
        let declared = async {
            self.transport
                .declare_queue(&queue, QueueOptions::default())
                .await?;
            self.transport
                .bind_queue(&queue, &self.topology.events_exchange, pattern)
                .await?;
            self.transport
                .subscribe(&queue, Arc::new(Forward(tx)), ConsumeOptions::default())
                .await
        };
        let Ok(()) = declared.await else {
            panic!("test queue must subscribe");
        };
        rx
    }
}

async fn create_user(engines: &Engines, name: &str, email: &str) -> User {
    let Ok(user) = engines
        .catalog
        .create_user(NewUser {
            name: name.to_string(),
            email: email.to_string(),
        })
        .await
    else {
        panic!("user must be created");
    };
    user
}

fn conflict(message: &str) -> BookingError {
    BookingError::conflict(message)
}

#[tokio::test]
async fn full_booking_flow() {
    let h = Harness::new().await;

    let Ok(first) = h.reserve(h.alice.id, &["S1"], Some("k1")).await else {
        panic!("first reservation must succeed");
    };
    assert_eq!(first.status, ReservationStatus::Reserved);
    assert_eq!(
        first.expires_at,
        h.clock.now() + chrono::Duration::seconds(HOLD_SECS)
    );

    let Ok(replayed) = h.reserve(h.alice.id, &["S1"], Some("k1")).await else {
        panic!("replay must succeed");
    };
    assert_eq!(replayed.id, first.id);
    assert_eq!(replayed.expires_at, first.expires_at);

    assert_eq!(
        h.reserve(h.bob.id, &["S1"], None).await,
        Err(conflict("Some seats are already reserved."))
    );

    let Ok(sale) = h.engines.payments.confirm(first.id).await else {
        panic!("confirmation must succeed");
    };
    assert_eq!(sale.total_amount, dec!(25.00));
    assert_eq!(sale.reservation_id, Some(first.id));
    assert_eq!(sale.seat_ids, vec![h.seat("S1")]);

    assert_eq!(
        h.reserve(h.bob.id, &["S1"], None).await,
        Err(conflict("Some seats are already sold."))
    );

    let Ok(second) = h.reserve(h.alice.id, &["S2"], None).await else {
        panic!("S2 reservation must succeed");
    };
    assert_eq!(h.status_of("S2").await, SeatStatus::Reserved);
    h.advance_past_hold();
    assert_eq!(h.engines.expiration.expire_if_needed(second.id).await, Ok(true));

    assert_eq!(h.status_of("S1").await, SeatStatus::Sold);
    assert_eq!(h.status_of("S2").await, SeatStatus::Available);
    assert_eq!(h.status_of("S3").await, SeatStatus::Available);

    let Ok(bobs) = h.reserve(h.bob.id, &["S2"], None).await else {
        panic!("released seat must be reservable");
    };
    assert_eq!(bobs.user_id, h.bob.id);
}

#[tokio::test]
async fn concurrent_overlapping_requests_lock_each_seat_once() {
    let h = Harness::new().await;
    let mut users = Vec::new();
    for n in 0..8 {
        users.push(create_user(&h.engines, "Racer", &format!("racer{n}@example.com")).await);
    }

    let attempts = users
        .iter()
        .map(|u| h.reserve(u.id, &["S5", "S6"], None));
    let results = futures_util::future::join_all(attempts).await;

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(result, Err(BookingError::Conflict(_))));
    }
    assert_eq!(h.store.unreleased_lock_count(h.seat("S5")).await, 1);
    assert_eq!(h.store.unreleased_lock_count(h.seat("S6")).await, 1);
}

#[tokio::test]
async fn idempotency_key_rules() {
    let h = Harness::new().await;

    let Ok(original) = h.reserve(h.alice.id, &["S3", "S4"], Some("retry-1")).await else {
        panic!("reservation must succeed");
    };
    h.clock.advance(chrono::Duration::seconds(5));
    let Ok(retried) = h.reserve(h.alice.id, &["S4", "S3"], Some("retry-1")).await else {
        panic!("retry with reordered seats must replay");
    };
    assert_eq!(retried.id, original.id);
    assert_eq!(retried.expires_at, original.expires_at);
    assert_eq!(h.store.unreleased_lock_count(h.seat("S3")).await, 1);

    assert_eq!(
        h.reserve(h.alice.id, &["S7"], Some("retry-1")).await,
        Err(conflict("Idempotency key already used for a different request."))
    );

    // Keys are scoped per user.
    assert_eq!(
        h.reserve(h.bob.id, &["S3"], Some("retry-1")).await,
        Err(conflict("Some seats are already reserved."))
    );

    assert!(matches!(
        h.reserve(h.alice.id, &["S8"], Some(&"k".repeat(129))).await,
        Err(BookingError::BadInput(_))
    ));

    // Blank keys count as absent.
    let Ok(_) = h.reserve(h.alice.id, &["S9"], Some("   ")).await else {
        panic!("blank key must be accepted");
    };
    assert_eq!(
        h.reserve(h.alice.id, &["S9"], Some("   ")).await,
        Err(conflict("Some seats are already reserved."))
    );
}

#[tokio::test]
async fn same_key_retry_that_loses_the_race_gets_the_winner() {
    let h = Harness::new().await;
    let Ok(winner) = h.reserve(h.alice.id, &["S1"], Some("k1")).await else {
        panic!("first request must succeed");
    };

    // The retry read the key before the winner committed and now finds the
    // winner's locks on its own seats.
    let late = ReservationService::new(
        Arc::new(StaleKeyLookup::new(h.store.clone())),
        SeatAvailabilityCache::new(Arc::new(MemoryCache::new())),
        Arc::clone(&h.engines.expiration),
        EventPublisher::new(Arc::clone(&h.transport), &h.topology.events_exchange),
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        Duration::from_secs(30),
    );
    let retried = late
        .create(CreateReservation {
            session_id: h.session.id,
            user_id: h.alice.id,
            seat_ids: vec![h.seat("S1")],
            idempotency_key: Some("k1".to_string()),
        })
        .await;
    assert_eq!(retried.map(|r| r.id), Ok(winner.id));
    assert_eq!(h.store.unreleased_lock_count(h.seat("S1")).await, 1);

    // A different request under the same key still conflicts.
    let other = ReservationService::new(
        Arc::new(StaleKeyLookup::new(h.store.clone())),
        SeatAvailabilityCache::new(Arc::new(MemoryCache::new())),
        Arc::clone(&h.engines.expiration),
        EventPublisher::new(Arc::clone(&h.transport), &h.topology.events_exchange),
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        Duration::from_secs(30),
    );
    let mismatched = other
        .create(CreateReservation {
            session_id: h.session.id,
            user_id: h.alice.id,
            seat_ids: vec![h.seat("S1"), h.seat("S2")],
            idempotency_key: Some("k1".to_string()),
        })
        .await;
    assert_eq!(
        mismatched,
        Err(conflict("Idempotency key already used for a different request."))
    );
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let h = Harness::new().await;

    let seat = h.seat("S1");
    let duplicated = h
        .engines
        .reservations
        .create(CreateReservation {
            session_id: h.session.id,
            user_id: h.alice.id,
            seat_ids: vec![seat, seat],
            idempotency_key: None,
        })
        .await;
    assert_eq!(
        duplicated,
        Err(BookingError::bad_input("Duplicated seats in request."))
    );

    let foreign = h
        .engines
        .reservations
        .create(CreateReservation {
            session_id: h.session.id,
            user_id: h.alice.id,
            seat_ids: vec![SeatId::new()],
            idempotency_key: None,
        })
        .await;
    assert_eq!(
        foreign,
        Err(BookingError::bad_input(
            "Some seats were not found for this session."
        ))
    );

    let unknown_session = h
        .engines
        .reservations
        .create(CreateReservation {
            session_id: SessionId::new(),
            user_id: h.alice.id,
            seat_ids: vec![seat],
            idempotency_key: None,
        })
        .await;
    assert_eq!(
        unknown_session,
        Err(BookingError::not_found("Session not found."))
    );

    let unknown_user = h.reserve(UserId::new(), &["S1"], None).await;
    assert!(matches!(unknown_user, Err(BookingError::NotFound(_))));
    assert_eq!(h.store.unreleased_lock_count(seat).await, 0);
}

#[tokio::test]
async fn confirmation_is_idempotent_and_announced_once() {
    let h = Harness::new().await;
    let mut confirmations = h.listen(PAYMENT_CONFIRMED).await;

    let Ok(reservation) = h.reserve(h.alice.id, &["S1", "S2"], None).await else {
        panic!("reservation must succeed");
    };
    let Ok(sale) = h.engines.payments.confirm(reservation.id).await else {
        panic!("confirmation must succeed");
    };
    let Ok(again) = h.engines.payments.confirm(reservation.id).await else {
        panic!("second confirmation must replay");
    };
    assert_eq!(again.id, sale.id);
    assert_eq!(sale.total_amount, dec!(50.00));
    assert_eq!(h.store.sale_count_for_seat(h.seat("S1")).await, 1);

    let Some(delivery) = confirmations.recv().await else {
        panic!("payment.confirmed must be published");
    };
    let Ok(event) = delivery.json::<PaymentConfirmed>() else {
        panic!("payload must decode");
    };
    assert_eq!(event.sale_id, sale.id);
    assert!(
        tokio::time::timeout(Duration::from_millis(50), confirmations.recv())
            .await
            .is_err()
    );

    let Ok(loaded) = h.engines.reservations.load(reservation.id).await else {
        panic!("reservation must load");
    };
    assert_eq!(loaded.status, ReservationStatus::Confirmed);
    assert_eq!(h.status_of("S1").await, SeatStatus::Sold);
}

#[tokio::test]
async fn unknown_reservation_cannot_be_confirmed() {
    let h = Harness::new().await;
    assert_eq!(
        h.engines
            .payments
            .confirm(crate::domain::ReservationId::new())
            .await,
        Err(BookingError::not_found("Reservation not found."))
    );
}

#[tokio::test]
async fn expiry_is_monotonic() {
    let h = Harness::new().await;
    let Ok(reservation) = h.reserve(h.alice.id, &["S4"], None).await else {
        panic!("reservation must succeed");
    };

    assert_eq!(
        h.engines.expiration.expire_if_needed(reservation.id).await,
        Ok(false)
    );
    h.advance_past_hold();
    assert_eq!(
        h.engines.expiration.expire_if_needed(reservation.id).await,
        Ok(true)
    );
    assert_eq!(
        h.engines.expiration.expire_if_needed(reservation.id).await,
        Ok(false)
    );

    assert_eq!(
        h.engines.payments.confirm(reservation.id).await,
        Err(conflict("Reservation expired."))
    );
    let Ok(loaded) = h.engines.reservations.load(reservation.id).await else {
        panic!("reservation must load");
    };
    assert_eq!(loaded.status, ReservationStatus::Expired);
    assert_eq!(h.store.unreleased_lock_count(h.seat("S4")).await, 0);
}

#[tokio::test]
async fn late_confirmation_expires_the_hold() {
    let h = Harness::new().await;
    let mut released = h.listen(SEAT_RELEASED).await;
    let Ok(reservation) = h.reserve(h.alice.id, &["S8"], None).await else {
        panic!("reservation must succeed");
    };
    h.advance_past_hold();

    assert_eq!(
        h.engines.payments.confirm(reservation.id).await,
        Err(conflict("Reservation expired."))
    );
    let Ok(loaded) = h.engines.reservations.load(reservation.id).await else {
        panic!("reservation must load");
    };
    assert_eq!(loaded.status, ReservationStatus::Expired);
    assert_eq!(h.store.unreleased_lock_count(h.seat("S8")).await, 0);
    assert_eq!(h.store.sale_count_for_seat(h.seat("S8")).await, 0);
    assert_eq!(h.status_of("S8").await, SeatStatus::Available);

    let Some(delivery) = released.recv().await else {
        panic!("seat.released must be published");
    };
    let Ok(event) = delivery.json::<SeatReleased>() else {
        panic!("payload must decode");
    };
    assert_eq!(event.reservation_id, reservation.id);
}

#[tokio::test]
async fn expiry_and_confirmation_race_when_due() {
    let h = Harness::new().await;
    let Ok(reservation) = h.reserve(h.alice.id, &["S10"], None).await else {
        panic!("reservation must succeed");
    };
    h.clock.set(reservation.expires_at);

    let (confirmed, expired) = tokio::join!(
        h.engines.payments.confirm(reservation.id),
        h.engines.expiration.expire_if_needed(reservation.id),
    );
    assert_eq!(confirmed, Err(conflict("Reservation expired.")));
    assert!(expired.is_ok());

    let Ok(loaded) = h.engines.reservations.load(reservation.id).await else {
        panic!("reservation must load");
    };
    assert_eq!(loaded.status, ReservationStatus::Expired);
    assert_eq!(h.store.sale_count_for_seat(h.seat("S10")).await, 0);
    assert_eq!(h.store.unreleased_lock_count(h.seat("S10")).await, 0);
}

#[tokio::test]
async fn expiry_and_confirmation_race_before_due() {
    let h = Harness::new().await;
    let Ok(reservation) = h.reserve(h.alice.id, &["S11"], None).await else {
        panic!("reservation must succeed");
    };
    h.clock.advance(chrono::Duration::seconds(HOLD_SECS - 1));

    let (confirmed, expired) = tokio::join!(
        h.engines.payments.confirm(reservation.id),
        h.engines.expiration.expire_if_needed(reservation.id),
    );
    assert!(confirmed.is_ok());
    assert_eq!(expired, Ok(false));

    // Still not expirable once sold.
    h.advance_past_hold();
    assert_eq!(
        h.engines.expiration.expire_if_needed(reservation.id).await,
        Ok(false)
    );
    assert_eq!(h.status_of("S11").await, SeatStatus::Sold);
}

#[tokio::test]
async fn stale_locks_are_swept_by_new_requests() {
    let h = Harness::new().await;
    let Ok(stale) = h.reserve(h.alice.id, &["S3"], None).await else {
        panic!("reservation must succeed");
    };
    h.advance_past_hold();

    let Ok(fresh) = h.reserve(h.bob.id, &["S3"], None).await else {
        panic!("elapsed hold must not block the seat");
    };
    assert_ne!(fresh.id, stale.id);

    let Ok(loaded) = h.engines.reservations.load(stale.id).await else {
        panic!("reservation must load");
    };
    assert_eq!(loaded.status, ReservationStatus::Expired);
    assert_eq!(h.store.unreleased_lock_count(h.seat("S3")).await, 1);
}

#[tokio::test(start_paused = true)]
async fn broker_delivers_expiry_after_the_hold() {
    let h = Harness::new().await;
    let Ok(()) = start_consumers(
        h.transport.as_ref(),
        &h.topology,
        &h.engines,
        Arc::new(h.store.clone()),
        Arc::clone(&h.clock) as Arc<dyn Clock>,
        ConsumeOptions::default(),
        true,
    )
    .await
    else {
        panic!("consumers must start");
    };
    let mut released = h.listen(SEAT_RELEASED).await;

    let Ok(reservation) = h.reserve(h.alice.id, &["S12", "S13"], None).await else {
        panic!("reservation must succeed");
    };
    h.advance_past_hold();

    let Some(delivery) = released.recv().await else {
        panic!("seat.released must follow the delay");
    };
    let Ok(event) = delivery.json::<SeatReleased>() else {
        panic!("payload must decode");
    };
    assert_eq!(event.reservation_id, reservation.id);
    assert_eq!(event.seat_ids.len(), 2);

    let Ok(loaded) = h.engines.reservations.load(reservation.id).await else {
        panic!("reservation must load");
    };
    assert_eq!(loaded.status, ReservationStatus::Expired);

    let mut names = Vec::new();
    for _ in 0..50 {
        names = h
            .store
            .logged_events()
            .await
            .into_iter()
            .map(|e| e.event_name)
            .collect::<Vec<_>>();
        if names.iter().any(|n| n == SEAT_RELEASED) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(names.iter().any(|n| n == RESERVATION_CREATED));
    assert!(names.iter().any(|n| n == RESERVATION_EXPIRED));
    assert!(names.iter().any(|n| n == SEAT_RELEASED));
}

#[tokio::test]
async fn cache_outage_does_not_fail_operations() {
    let h = Harness::with(Arc::new(FailingCache), Arc::new(MemoryBroker::new())).await;

    let Ok(reservation) = h.reserve(h.alice.id, &["S1"], None).await else {
        panic!("reservation must succeed without cache");
    };
    assert_eq!(h.status_of("S1").await, SeatStatus::Reserved);
    let Ok(_) = h.engines.payments.confirm(reservation.id).await else {
        panic!("confirmation must succeed without cache");
    };
    assert_eq!(h.status_of("S1").await, SeatStatus::Sold);
    assert_eq!(h.status_of("S2").await, SeatStatus::Available);
}

#[tokio::test]
async fn broker_outage_does_not_fail_operations() {
    let h = Harness::with(Arc::new(MemoryCache::new()), Arc::new(FailingTransport)).await;

    let Ok(reservation) = h.reserve(h.alice.id, &["S1"], Some("k")).await else {
        panic!("reservation must succeed without broker");
    };
    let Ok(sale) = h.engines.payments.confirm(reservation.id).await else {
        panic!("confirmation must succeed without broker");
    };
    assert_eq!(sale.reservation_id, Some(reservation.id));

    let Ok(other) = h.reserve(h.bob.id, &["S2"], None).await else {
        panic!("reservation must succeed without broker");
    };
    h.advance_past_hold();
    assert_eq!(h.engines.expiration.expire_if_needed(other.id).await, Ok(true));
}

#[tokio::test]
async fn availability_rebuilds_partial_cache_from_store() {
    let cache: Arc<dyn KeyValueCache> = Arc::new(MemoryCache::new());
    let h = Harness::with(Arc::clone(&cache), Arc::new(MemoryBroker::new())).await;
    let seat_cache = SeatAvailabilityCache::new(cache);

    let Ok(sold) = h.reserve(h.alice.id, &["S1"], None).await else {
        panic!("reservation must succeed");
    };
    let Ok(_) = h.engines.payments.confirm(sold.id).await else {
        panic!("confirmation must succeed");
    };
    let Ok(_) = h.reserve(h.bob.id, &["S2"], None).await else {
        panic!("reservation must succeed");
    };

    let Ok(partial) = seat_cache.get_statuses(h.session.id).await else {
        panic!("cache must read");
    };
    assert_eq!(partial.len(), 2);

    let Ok(availability) = h.engines.availability.load(h.session.id).await else {
        panic!("availability must load");
    };
    assert_eq!(availability.seats.len(), 16);
    assert_eq!(availability.seats[0].label, "S1");
    assert_eq!(availability.seats[0].status, SeatStatus::Sold);
    assert_eq!(availability.seats[1].status, SeatStatus::Reserved);
    assert!(
        availability.seats[2..]
            .iter()
            .all(|s| s.status == SeatStatus::Available)
    );

    let Ok(refilled) = seat_cache.get_statuses(h.session.id).await else {
        panic!("cache must read");
    };
    assert_eq!(refilled.len(), 16);

    assert_eq!(
        h.engines.availability.load(SessionId::new()).await,
        Err(BookingError::not_found("Session not found."))
    );
}

#[tokio::test]
async fn pending_holds_are_rescheduled() {
    let h = Harness::new().await;
    let Ok(kept) = h.reserve(h.alice.id, &["S1"], None).await else {
        panic!("reservation must succeed");
    };
    let Ok(_) = h.reserve(h.bob.id, &["S2"], None).await else {
        panic!("reservation must succeed");
    };
    let Ok(_) = h.engines.payments.confirm(kept.id).await else {
        panic!("confirmation must succeed");
    };

    assert_eq!(h.engines.expiration.reschedule_pending().await, Ok(1));
}

#[tokio::test]
async fn reservation_and_sale_reads() {
    let h = Harness::new().await;
    let Ok(first) = h.reserve(h.alice.id, &["S1"], None).await else {
        panic!("reservation must succeed");
    };
    h.clock.advance(chrono::Duration::seconds(1));
    let Ok(_) = h.reserve(h.alice.id, &["S2"], None).await else {
        panic!("reservation must succeed");
    };
    let Ok(_) = h.reserve(h.bob.id, &["S3"], None).await else {
        panic!("reservation must succeed");
    };
    let Ok(sale) = h.engines.payments.confirm(first.id).await else {
        panic!("confirmation must succeed");
    };

    let filter = ReservationFilter {
        user_id: Some(h.alice.id),
        ..ReservationFilter::default()
    };
    let Ok(alices) = h.engines.reservations.list(&filter, PageRequest::default()).await else {
        panic!("list must succeed");
    };
    assert_eq!(alices.total, 2);

    let confirmed = ReservationFilter {
        status: Some(ReservationStatus::Confirmed),
        ..ReservationFilter::default()
    };
    let Ok(page) = h
        .engines
        .reservations
        .list(&confirmed, PageRequest::default())
        .await
    else {
        panic!("list must succeed");
    };
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].id, first.id);

    let Ok(history) = h
        .engines
        .payments
        .purchase_history(h.alice.id, &SaleFilter::default(), PageRequest::default())
        .await
    else {
        panic!("history must load");
    };
    assert_eq!(history.total, 1);
    assert_eq!(history.items[0].id, sale.id);

    let Ok(loaded) = h.engines.payments.load_sale(sale.id).await else {
        panic!("sale must load");
    };
    assert_eq!(loaded, sale);

    assert_eq!(
        h.engines
            .payments
            .purchase_history(UserId::new(), &SaleFilter::default(), PageRequest::default())
            .await,
        Err(BookingError::not_found("User not found."))
    );
}

#[tokio::test]
async fn catalog_rules() {
    let h = Harness::new().await;

    assert_eq!(
        h.engines
            .catalog
            .create_user(NewUser {
                name: "Alice again".to_string(),
                email: "ALICE@example.com".to_string(),
            })
            .await,
        Err(conflict("Email already registered."))
    );

    let Ok((session, seats)) = h.engines.catalog.load_session(h.session.id).await else {
        panic!("session must load");
    };
    assert_eq!(session.id, h.session.id);
    assert_eq!(seats.len(), 16);

    let too_small = h
        .engines
        .catalog
        .create_session(NewSession {
            title: "Matinee".to_string(),
            starts_at: h.session.starts_at,
            room: "Room 2".to_string(),
            price: dec!(10),
            seat_labels: generate_seat_labels(4),
        })
        .await;
    assert!(matches!(too_small, Err(BookingError::BadInput(_))));

    let long_name = h
        .engines
        .catalog
        .create_user(NewUser {
            name: "N".repeat(121),
            email: "long.name@example.com".to_string(),
        })
        .await;
    assert_eq!(
        long_name,
        Err(BookingError::bad_input("Name must be at most 120 characters."))
    );
    let long_email = h
        .engines
        .catalog
        .create_user(NewUser {
            name: "Carol".to_string(),
            email: format!("{}@example.com", "c".repeat(250)),
        })
        .await;
    assert_eq!(long_email, Err(BookingError::bad_input("Email is invalid.")));

    let Ok((_, labelled)) = h
        .engines
        .catalog
        .create_session(NewSession {
            title: "Late show".to_string(),
            starts_at: h.session.starts_at,
            room: "Room 3".to_string(),
            price: dec!(12),
            seat_labels: (1..=16).map(|n| format!(" A{n} ")).collect(),
        })
        .await
    else {
        panic!("labelled session must be created");
    };
    assert_eq!(labelled[0].label, "A1");

    assert!(matches!(
        h.engines.catalog.load_user(UserId::new()).await,
        Err(BookingError::NotFound(_))
    ));
}

#[tokio::test]
async fn audit_consumer_keeps_unparsable_payloads() {
    let store = MemoryStore::new();
    let consumer = AuditConsumer::new(
        Arc::new(store.clone()),
        Arc::new(ManualClock::default()) as Arc<dyn Clock>,
    );
    let delivery = Delivery {
        exchange: "seating.events".to_string(),
        routing_key: "seat.released".to_string(),
        payload: b"not json".to_vec(),
        attempt: 1,
    };
    let Ok(()) = consumer.handle(&delivery).await else {
        panic!("audit must store the event");
    };

    let events = store.logged_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name, "seat.released");
    assert_eq!(events[0].payload, serde_json::json!("not json"));
}
