//! PostgreSQL implementation of the store contracts.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    EventLogStore, Page, PageRequest, PaymentTx, ReservationStore, SaleStore, SessionStore,
    StoreError, UserStore,
};
use crate::config::DatabaseConfig;
use crate::domain::ids::to_uuids;
use crate::domain::{
    NewReservation, Reservation, ReservationFilter, ReservationId, ReservationStatus, Sale,
    SaleFilter, SaleId, Seat, SeatId, Session, SessionId, User, UserId,
};

type ReservationRow = (
    Uuid,
    Uuid,
    Uuid,
    String,
    DateTime<Utc>,
    Option<String>,
    DateTime<Utc>,
);

type SaleRow = (Uuid, Uuid, Uuid, Option<Uuid>, Decimal, DateTime<Utc>);

const RESERVATION_COLUMNS: &str =
    "id, session_id, user_id, status, expires_at, idempotency_key, created_at";

const SALE_COLUMNS: &str = "id, session_id, user_id, reservation_id, total_amount, created_at";

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool sized by `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Database`] if the database is unreachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Applies the embedded `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))
    }

    /// Round-trips a trivial query.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError::Database`] if the database does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_status(raw: &str) -> Result<ReservationStatus, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Database(format!("unexpected reservation status {raw:?}")))
}

fn reservation_from_row(
    row: ReservationRow,
    seat_ids: Vec<SeatId>,
) -> Result<Reservation, StoreError> {
    let (id, session_id, user_id, status, expires_at, idempotency_key, created_at) = row;
    Ok(Reservation {
        id: id.into(),
        session_id: session_id.into(),
        user_id: user_id.into(),
        status: parse_status(&status)?,
        expires_at,
        idempotency_key,
        seat_ids,
        created_at,
    })
}

fn sale_from_row(row: SaleRow, seat_ids: Vec<SeatId>) -> Sale {
    let (id, session_id, user_id, reservation_id, total_amount, created_at) = row;
    Sale {
        id: id.into(),
        session_id: session_id.into(),
        user_id: user_id.into(),
        reservation_id: reservation_id.map(Into::into),
        seat_ids,
        total_amount,
        created_at,
    }
}

fn to_count(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

fn to_limit(page: PageRequest) -> (i64, i64) {
    (
        i64::from(page.per_page),
        i64::try_from(page.offset()).unwrap_or(i64::MAX),
    )
}

async fn reservation_seat_ids(
    conn: &mut PgConnection,
    reservation_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<SeatId>>, StoreError> {
    let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT reservation_id, seat_id FROM reservation_seats \
         WHERE reservation_id = ANY($1) ORDER BY reservation_id, seat_id",
    )
    .bind(reservation_ids)
    .fetch_all(conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<SeatId>> = HashMap::new();
    for (reservation_id, seat_id) in rows {
        grouped.entry(reservation_id).or_default().push(seat_id.into());
    }
    Ok(grouped)
}

async fn sale_seat_ids(
    conn: &mut PgConnection,
    sale_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<SeatId>>, StoreError> {
    let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
        "SELECT sale_id, seat_id FROM sale_seats WHERE sale_id = ANY($1) ORDER BY sale_id, seat_id",
    )
    .bind(sale_ids)
    .fetch_all(conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<SeatId>> = HashMap::new();
    for (sale_id, seat_id) in rows {
        grouped.entry(sale_id).or_default().push(seat_id.into());
    }
    Ok(grouped)
}

async fn attach_reservation_seats(
    conn: &mut PgConnection,
    rows: Vec<ReservationRow>,
) -> Result<Vec<Reservation>, StoreError> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.0).collect();
    let mut seats = reservation_seat_ids(conn, &ids).await?;
    rows.into_iter()
        .map(|row| {
            let seat_ids = seats.remove(&row.0).unwrap_or_default();
            reservation_from_row(row, seat_ids)
        })
        .collect()
}

async fn attach_sale_seats(
    conn: &mut PgConnection,
    rows: Vec<SaleRow>,
) -> Result<Vec<Sale>, StoreError> {
    let ids: Vec<Uuid> = rows.iter().map(|row| row.0).collect();
    let mut seats = sale_seat_ids(conn, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let seat_ids = seats.remove(&row.0).unwrap_or_default();
            sale_from_row(row, seat_ids)
        })
        .collect())
}

async fn load_reservation_with(
    conn: &mut PgConnection,
    id: ReservationId,
    for_update: bool,
) -> Result<Option<Reservation>, StoreError> {
    let sql = if for_update {
        format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1 FOR UPDATE")
    } else {
        format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1")
    };
    let row = sqlx::query_as::<_, ReservationRow>(&sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;
    match row {
        Some(row) => Ok(attach_reservation_seats(conn, vec![row]).await?.pop()),
        None => Ok(None),
    }
}

async fn load_session_with(
    conn: &mut PgConnection,
    id: SessionId,
) -> Result<Option<Session>, StoreError> {
    let row = sqlx::query_as::<_, (Uuid, String, DateTime<Utc>, String, Decimal, DateTime<Utc>)>(
        "SELECT id, title, starts_at, room, price, created_at FROM sessions WHERE id = $1",
    )
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?;

    Ok(row.map(|(id, title, starts_at, room, price, created_at)| Session {
        id: id.into(),
        title,
        starts_at,
        room,
        price,
        created_at,
    }))
}

async fn sold_seat_ids_with(
    conn: &mut PgConnection,
    session_id: SessionId,
    seat_ids: &[SeatId],
) -> Result<Vec<SeatId>, StoreError> {
    let rows = sqlx::query_scalar::<_, Uuid>(
        "SELECT ss.seat_id FROM sale_seats ss JOIN sales s ON s.id = ss.sale_id \
         WHERE s.session_id = $1 AND ss.seat_id = ANY($2)",
    )
    .bind(session_id.as_uuid())
    .bind(to_uuids(seat_ids))
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(SeatId::from).collect())
}

/// Flips and releases in the caller's transaction. Returns the flipped row.
async fn expire_with(
    conn: &mut PgConnection,
    id: ReservationId,
    now: DateTime<Utc>,
) -> Result<Option<ReservationRow>, StoreError> {
    let row = sqlx::query_as::<_, ReservationRow>(&format!(
        "UPDATE reservations SET status = 'EXPIRED' \
         WHERE id = $1 AND status = 'RESERVED' AND expires_at <= $2 \
         RETURNING {RESERVATION_COLUMNS}"
    ))
    .bind(id.as_uuid())
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;

    if row.is_some() {
        sqlx::query(
            "UPDATE seat_locks SET released_at = $2 \
             WHERE reservation_id = $1 AND released_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&mut *conn)
        .await?;
    }
    Ok(row)
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &Session, seats: &[Seat]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sessions (id, title, starts_at, room, price, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(session.id.as_uuid())
        .bind(&session.title)
        .bind(session.starts_at)
        .bind(&session.room)
        .bind(session.price)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = seats.iter().map(|s| *s.id.as_uuid()).collect();
        let labels: Vec<String> = seats.iter().map(|s| s.label.clone()).collect();
        sqlx::query(
            "INSERT INTO seats (id, session_id, label, position) \
             SELECT seat.id, $1, seat.label, seat.position::int \
             FROM UNNEST($2::uuid[], $3::text[]) WITH ORDINALITY AS seat(id, label, position)",
        )
        .bind(session.id.as_uuid())
        .bind(&ids)
        .bind(&labels)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_session_with(&mut conn, id).await
    }

    async fn load_seats(&self, session_id: SessionId) -> Result<Vec<Seat>, StoreError> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, label FROM seats WHERE session_id = $1 ORDER BY position",
        )
        .bind(session_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, label)| Seat {
                id: id.into(),
                session_id,
                label,
            })
            .collect())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, name, email, created_at) VALUES ($1, $2, $3, $4)")
            .bind(user.id.as_uuid())
            .bind(&user.name)
            .bind(&user.email)
            .bind(user.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, DateTime<Utc>)>(
            "SELECT id, name, email, created_at FROM users WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, email, created_at)| User {
            id: id.into(),
            name,
            email,
            created_at,
        }))
    }
}

#[async_trait]
impl ReservationStore for PgStore {
    async fn find_by_idempotency_key(
        &self,
        user_id: UserId,
        key: &str,
    ) -> Result<Option<Reservation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE user_id = $1 AND idempotency_key = $2"
        ))
        .bind(user_id.as_uuid())
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(attach_reservation_seats(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn sold_seat_ids(
        &self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sold_seat_ids_with(&mut conn, session_id, seat_ids).await
    }

    async fn active_locked_seat_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<SeatId>, StoreError> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            "SELECT l.seat_id FROM seat_locks l JOIN reservations r ON r.id = l.reservation_id \
             WHERE l.seat_id = ANY($1) AND l.released_at IS NULL AND l.expires_at > $2 \
             AND r.status = 'RESERVED'",
        )
        .bind(to_uuids(seat_ids))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SeatId::from).collect())
    }

    async fn stale_lock_reservation_ids(
        &self,
        seat_ids: &[SeatId],
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationId>, StoreError> {
        let rows = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT l.reservation_id FROM seat_locks l \
             JOIN reservations r ON r.id = l.reservation_id \
             WHERE l.seat_id = ANY($1) AND l.released_at IS NULL AND l.expires_at <= $2 \
             AND r.status = 'RESERVED'",
        )
        .bind(to_uuids(seat_ids))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ReservationId::from).collect())
    }

    async fn insert_reservation(&self, new: &NewReservation) -> Result<Reservation, StoreError> {
        let seat_uuids = to_uuids(&new.seat_ids);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO reservations \
             (id, session_id, user_id, status, expires_at, idempotency_key, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(new.id.as_uuid())
        .bind(new.session_id.as_uuid())
        .bind(new.user_id.as_uuid())
        .bind(ReservationStatus::Reserved.as_str())
        .bind(new.expires_at)
        .bind(new.idempotency_key.as_deref())
        .bind(new.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO reservation_seats (reservation_id, seat_id) \
             SELECT $1, UNNEST($2::uuid[])",
        )
        .bind(new.id.as_uuid())
        .bind(&seat_uuids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO seat_locks (reservation_id, seat_id, expires_at, created_at) \
             SELECT $1, UNNEST($2::uuid[]), $3, $4",
        )
        .bind(new.id.as_uuid())
        .bind(&seat_uuids)
        .bind(new.expires_at)
        .bind(new.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Reservation {
            id: new.id,
            session_id: new.session_id,
            user_id: new.user_id,
            status: ReservationStatus::Reserved,
            expires_at: new.expires_at,
            idempotency_key: new.idempotency_key.clone(),
            seat_ids: new.seat_ids.clone(),
            created_at: new.created_at,
        })
    }

    async fn expire_if_due(
        &self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>, StoreError> {
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let Some(row) = expire_with(&mut tx, id, now).await? else {
            return Ok(None);
        };
        let expired = attach_reservation_seats(&mut tx, vec![row]).await?.pop();
        tx.commit().await?;
        Ok(expired)
    }

    async fn load_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_reservation_with(&mut conn, id, false).await
    }

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
        page: PageRequest,
    ) -> Result<Page<Reservation>, StoreError> {
        const WHERE: &str = "WHERE ($1::uuid IS NULL OR user_id = $1) \
                             AND ($2::uuid IS NULL OR session_id = $2) \
                             AND ($3::text IS NULL OR status = $3)";
        let user_id = filter.user_id.map(Uuid::from);
        let session_id = filter.session_id.map(Uuid::from);
        let status = filter.status.map(|s| s.as_str());
        let (limit, offset) = to_limit(page);

        let mut conn = self.pool.acquire().await?;
        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM reservations {WHERE}"
        ))
        .bind(user_id)
        .bind(session_id)
        .bind(status)
        .fetch_one(&mut *conn)
        .await?;

        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations {WHERE} \
             ORDER BY created_at DESC, id LIMIT $4 OFFSET $5"
        ))
        .bind(user_id)
        .bind(session_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Page {
            items: attach_reservation_seats(&mut conn, rows).await?,
            total: to_count(total),
        })
    }

    async fn pending_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, ReservationRow>(&format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'RESERVED' ORDER BY expires_at"
        ))
        .fetch_all(&mut *conn)
        .await?;
        attach_reservation_seats(&mut conn, rows).await
    }
}

#[async_trait]
impl SaleStore for PgStore {
    async fn begin_payment(&self) -> Result<Box<dyn PaymentTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPaymentTx { tx }))
    }

    async fn load_sale(&self, id: SaleId) -> Result<Option<Sale>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, SaleRow>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(attach_sale_seats(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn purchase_history(
        &self,
        user_id: UserId,
        filter: &SaleFilter,
        page: PageRequest,
    ) -> Result<Page<Sale>, StoreError> {
        const WHERE: &str = "WHERE user_id = $1 AND ($2::uuid IS NULL OR session_id = $2)";
        let session_id = filter.session_id.map(Uuid::from);
        let (limit, offset) = to_limit(page);

        let mut conn = self.pool.acquire().await?;
        let total = sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM sales {WHERE}"))
            .bind(user_id.as_uuid())
            .bind(session_id)
            .fetch_one(&mut *conn)
            .await?;

        let rows = sqlx::query_as::<_, SaleRow>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales {WHERE} \
             ORDER BY created_at DESC, id LIMIT $3 OFFSET $4"
        ))
        .bind(user_id.as_uuid())
        .bind(session_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

        Ok(Page {
            items: attach_sale_seats(&mut conn, rows).await?,
            total: to_count(total),
        })
    }
}

#[async_trait]
impl EventLogStore for PgStore {
    async fn append_event(
        &self,
        event_name: &str,
        payload: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO event_logs (event_name, payload, created_at) VALUES ($1, $2, $3)")
            .bind(event_name)
            .bind(payload)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Payment transaction holding a `FOR UPDATE` lock on the reservation row.
struct PgPaymentTx {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PgPaymentTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPaymentTx").finish_non_exhaustive()
    }
}

#[async_trait]
impl PaymentTx for PgPaymentTx {
    async fn lock_reservation(
        &mut self,
        id: ReservationId,
    ) -> Result<Option<Reservation>, StoreError> {
        load_reservation_with(&mut self.tx, id, true).await
    }

    async fn load_sale_by_reservation(
        &mut self,
        reservation_id: ReservationId,
    ) -> Result<Option<Sale>, StoreError> {
        let row = sqlx::query_as::<_, SaleRow>(&format!(
            "SELECT {SALE_COLUMNS} FROM sales WHERE reservation_id = $1"
        ))
        .bind(reservation_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => Ok(attach_sale_seats(&mut self.tx, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn expire_if_due(
        &mut self,
        id: ReservationId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(expire_with(&mut self.tx, id, now).await?.is_some())
    }

    async fn sold_seat_ids(
        &mut self,
        session_id: SessionId,
        seat_ids: &[SeatId],
    ) -> Result<Vec<SeatId>, StoreError> {
        sold_seat_ids_with(&mut self.tx, session_id, seat_ids).await
    }

    async fn load_session(&mut self, id: SessionId) -> Result<Option<Session>, StoreError> {
        load_session_with(&mut self.tx, id).await
    }

    async fn insert_sale(&mut self, sale: &Sale) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sales (id, session_id, user_id, reservation_id, total_amount, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(sale.id.as_uuid())
        .bind(sale.session_id.as_uuid())
        .bind(sale.user_id.as_uuid())
        .bind(sale.reservation_id.map(Uuid::from))
        .bind(sale.total_amount)
        .bind(sale.created_at)
        .execute(&mut *self.tx)
        .await?;

        sqlx::query("INSERT INTO sale_seats (sale_id, seat_id) SELECT $1, UNNEST($2::uuid[])")
            .bind(sale.id.as_uuid())
            .bind(to_uuids(&sale.seat_ids))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn mark_confirmed(&mut self, id: ReservationId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE reservations SET status = 'CONFIRMED' WHERE id = $1 AND status = 'RESERVED'",
        )
        .bind(id.as_uuid())
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
