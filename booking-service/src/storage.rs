use async_trait::async_trait;
use booking_flow::{
    Booking, BookingRepository, BookingStatus, Category, FlowError, NewBooking, Result,
    UserDirectory, UserProfile,
};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::info;

/// Postgres-backed booking repository and user directory sharing one pool.
pub struct PostgresStore {
    pool: PgPool,
}

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS bookings (
        id             BIGSERIAL PRIMARY KEY,
        owner_id       BIGINT NOT NULL,
        name           TEXT NOT NULL,
        phone          TEXT NOT NULL,
        category       TEXT NOT NULL,
        details        TEXT NOT NULL DEFAULT '',
        preferred_time TEXT NOT NULL DEFAULT '',
        status         TEXT NOT NULL DEFAULT 'pending',
        created_at     TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS users (
        user_id       BIGINT PRIMARY KEY,
        display_name  TEXT NOT NULL DEFAULT '',
        handle        TEXT,
        first_seen    TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_seen     TIMESTAMPTZ NOT NULL DEFAULT now(),
        message_count BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_bookings_status ON bookings (status)",
    "CREATE INDEX IF NOT EXISTS idx_bookings_created_at ON bookings (created_at DESC)",
];

impl PostgresStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        info!("postgres store ready");
        Ok(Self { pool })
    }
}

fn map_err(e: sqlx::Error) -> FlowError {
    FlowError::Repository(e.to_string())
}

fn booking_from_row(row: &PgRow) -> Result<Booking> {
    let category_raw: String = row.try_get("category").map_err(map_err)?;
    let status_raw: String = row.try_get("status").map_err(map_err)?;
    Ok(Booking {
        id: row.try_get("id").map_err(map_err)?,
        owner_id: row.try_get("owner_id").map_err(map_err)?,
        name: row.try_get("name").map_err(map_err)?,
        phone: row.try_get("phone").map_err(map_err)?,
        category: Category::parse(&category_raw)
            .ok_or_else(|| FlowError::Repository(format!("unknown category: {category_raw}")))?,
        details: row.try_get("details").map_err(map_err)?,
        preferred_time: row.try_get("preferred_time").map_err(map_err)?,
        status: BookingStatus::parse(&status_raw)
            .ok_or_else(|| FlowError::InvalidStatus(status_raw.clone()))?,
        created_at: row.try_get("created_at").map_err(map_err)?,
    })
}

const BOOKING_COLUMNS: &str =
    "id, owner_id, name, phone, category, details, preferred_time, status, created_at";

#[async_trait]
impl BookingRepository for PostgresStore {
    async fn create(&self, booking: NewBooking) -> Result<i64> {
        if booking.name.trim().is_empty() || booking.phone.trim().is_empty() {
            return Err(FlowError::Repository(
                "name and phone must be non-empty".to_string(),
            ));
        }
        // RETURNING id makes the new identifier race-free: no secondary
        // "latest row for this owner" lookup.
        let row = sqlx::query(
            "INSERT INTO bookings (owner_id, name, phone, category, details, preferred_time)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(booking.owner_id)
        .bind(&booking.name)
        .bind(&booking.phone)
        .bind(booking.category.as_str())
        .bind(&booking.details)
        .bind(&booking.preferred_time)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        row.try_get("id").map_err(map_err)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Booking>> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.as_ref().map(booking_from_row).transpose()
    }

    async fn set_status(&self, id: i64, status: BookingStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE bookings SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self) -> Result<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn list_pending(&self) -> Result<Vec<Booking>> {
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings
             WHERE status = 'pending' ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?;
        rows.iter().map(booking_from_row).collect()
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM bookings")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        let total: i64 = row.try_get("total").map_err(map_err)?;
        Ok(total as u64)
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    async fn record_interaction(
        &self,
        user_id: i64,
        display_name: &str,
        handle: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (user_id, display_name, handle, message_count)
             VALUES ($1, $2, $3, 1)
             ON CONFLICT (user_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 handle = excluded.handle,
                 last_seen = now(),
                 message_count = users.message_count + 1",
        )
        .bind(user_id)
        .bind(display_name)
        .bind(handle)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn get(&self, user_id: i64) -> Result<Option<UserProfile>> {
        let row = sqlx::query(
            "SELECT user_id, display_name, handle, first_seen, last_seen, message_count
             FROM users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?;
        row.map(|row| {
            Ok(UserProfile {
                user_id: row.try_get("user_id").map_err(map_err)?,
                display_name: row.try_get("display_name").map_err(map_err)?,
                handle: row.try_get("handle").map_err(map_err)?,
                first_seen: row.try_get("first_seen").map_err(map_err)?,
                last_seen: row.try_get("last_seen").map_err(map_err)?,
                message_count: row.try_get("message_count").map_err(map_err)?,
            })
        })
        .transpose()
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;
        let total: i64 = row.try_get("total").map_err(map_err)?;
        Ok(total as u64)
    }
}
