use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn get_db_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await
}

/// Idempotent bootstrap of the tables the service expects. Not a migration
/// framework; re-running against an existing database is a no-op.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    const SCHEMA: &[&str] = &[
        "CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS sessions (
            token_digest TEXT PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users (id),
            expires_at TIMESTAMPTZ NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS parking_lots (
            id UUID PRIMARY KEY,
            admin_id UUID NOT NULL REFERENCES users (id),
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            latitude DOUBLE PRECISION NOT NULL,
            longitude DOUBLE PRECISION NOT NULL,
            total_slots INTEGER NOT NULL,
            available_slots INTEGER NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS parking_slots (
            id UUID PRIMARY KEY,
            lot_id UUID NOT NULL REFERENCES parking_lots (id),
            label TEXT NOT NULL,
            is_available BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            UNIQUE (lot_id, label)
        )",
        "CREATE TABLE IF NOT EXISTS bookings (
            id UUID PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users (id),
            slot_id UUID NOT NULL REFERENCES parking_slots (id),
            lot_id UUID NOT NULL REFERENCES parking_lots (id),
            start_time TIMESTAMPTZ NOT NULL,
            end_time TIMESTAMPTZ NOT NULL,
            status TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_bookings_slot_window
            ON bookings (slot_id, start_time, end_time)",
        "CREATE INDEX IF NOT EXISTS idx_bookings_lot ON bookings (lot_id)",
    ];

    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
