//! Sessions and users.

use std::sync::Arc;

use crate::domain::{
    Clock, MAX_EMAIL_LEN, MAX_USER_NAME_LEN, NewSession, Seat, SeatId, Session, SessionId, User,
    UserId,
};
use crate::error::BookingError;
use crate::store::Store;

/// Input of [`CatalogService::create_user`].
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Display name.
    pub name: String,
    /// Email, unique across users.
    pub email: String,
}

/// Creates and loads sessions (with their seats) and users.
#[derive(Debug, Clone)]
pub struct CatalogService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl CatalogService {
    /// Creates the service.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Creates a session and all of its seats.
    ///
    /// # Errors
    ///
    /// [`BookingError::BadInput`] when the input fails validation.
    pub async fn create_session(
        &self,
        input: NewSession,
    ) -> Result<(Session, Vec<Seat>), BookingError> {
        input.validate()?;
        let session = Session {
            id: SessionId::new(),
            title: input.title.trim().to_string(),
            starts_at: input.starts_at,
            room: input.room.trim().to_string(),
            price: input.price,
            created_at: self.clock.now(),
        };
        let seats: Vec<Seat> = input
            .seat_labels
            .into_iter()
            .map(|label| Seat {
                id: SeatId::new(),
                session_id: session.id,
                label: label.trim().to_string(),
            })
            .collect();

        self.store.insert_session(&session, &seats).await?;
        tracing::info!(
            session_id = %session.id,
            seat_count = seats.len(),
            price = %session.price,
            "session created"
        );
        Ok((session, seats))
    }

    /// Loads a session with its seats.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if it does not exist.
    pub async fn load_session(&self, id: SessionId) -> Result<(Session, Vec<Seat>), BookingError> {
        let session = self
            .store
            .load_session(id)
            .await?
            .ok_or_else(|| BookingError::not_found("Session not found."))?;
        let seats = self.store.load_seats(id).await?;
        Ok((session, seats))
    }

    /// Registers a user.
    ///
    /// # Errors
    ///
    /// [`BookingError::BadInput`] for a blank or oversized name or a malformed email,
    /// [`BookingError::Conflict`] if the email is taken.
    pub async fn create_user(&self, input: NewUser) -> Result<User, BookingError> {
        let name = input.name.trim();
        let email = input.email.trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(BookingError::bad_input("Name is required."));
        }
        if name.chars().count() > MAX_USER_NAME_LEN {
            return Err(BookingError::bad_input(format!(
                "Name must be at most {MAX_USER_NAME_LEN} characters."
            )));
        }
        if email.chars().count() > MAX_EMAIL_LEN || !is_plausible_email(&email) {
            return Err(BookingError::bad_input("Email is invalid."));
        }

        let user = User {
            id: UserId::new(),
            name: name.to_string(),
            email,
            created_at: self.clock.now(),
        };
        self.store.insert_user(&user).await?;
        tracing::info!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Loads a user.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] if it does not exist.
    pub async fn load_user(&self, id: UserId) -> Result<User, BookingError> {
        self.store
            .load_user(id)
            .await?
            .ok_or_else(|| BookingError::not_found("User not found."))
    }
}

fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}
