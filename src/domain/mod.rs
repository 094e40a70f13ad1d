//! Domain layer: identifiers, sessions and seats, reservations, sales and events.
//!
//! Everything here is plain data plus validation. Persistence, caching and
//! messaging live behind the contracts in `store`, `cache` and `transport`.

pub mod clock;
pub mod events;
pub mod ids;
pub mod reservation;
pub mod sale;
pub mod session;

pub use clock::{Clock, ManualClock, SystemClock};
pub use events::DomainEvent;
pub use ids::{ReservationId, SaleId, SeatId, SessionId, UserId, to_uuids};
pub use reservation::{
    MAX_IDEMPOTENCY_KEY_LEN, NewReservation, Reservation, ReservationFilter, ReservationStatus,
    normalize_idempotency_key, normalize_seat_ids,
};
pub use sale::{
    MAX_EMAIL_LEN, MAX_USER_NAME_LEN, Sale, SaleFilter, User, max_amount, total_amount,
};
pub use session::{
    MAX_ROOM_LEN, MAX_SEAT_LABEL_LEN, MAX_TITLE_LEN, MIN_SEATS_PER_SESSION, NewSession, Seat, SeatAvailability, SeatStatus, Session,
    SessionAvailability, generate_seat_labels,
};
