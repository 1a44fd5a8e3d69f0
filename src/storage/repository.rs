use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};

use crate::config::DatabaseConfig;
use crate::domain::{Expense, ExpenseHeader, ExpenseId, Trip, TripId, User, UserId};

use super::MIGRATION_001_INITIAL;

/// Counters used to verify that the link tables agree with the expenses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityStats {
    pub expense_count: i64,
    pub participant_count: i64,
    /// Expenses without a trip link
    pub orphaned_expenses: i64,
    /// Link or participant rows pointing at a missing expense
    pub dangling_links: i64,
}

/// Repository for trips, users and the expense ledger.
///
/// Reads that touch a single table run on the pool. Anything that has to
/// keep several tables consistent takes a connection borrowed from a
/// transaction opened with [`Repository::begin`].
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to an existing database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::open(config, false).await
    }

    /// Initialize a database (create if missing + migrate).
    pub async fn init(config: &DatabaseConfig) -> Result<Self> {
        let repo = Self::open(config, true).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    async fn open(config: &DatabaseConfig, create_if_missing: bool) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(create_if_missing)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", config.path))?;

        tracing::debug!(path = %config.path, "Database pool opened");
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;
        Ok(())
    }

    /// Start a transaction. Dropping it without commit rolls it back.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        tracing::debug!("Transaction started");
        Ok(tx)
    }

    pub async fn commit(tx: Transaction<'static, Sqlite>) -> Result<()> {
        tx.commit().await.context("Failed to commit transaction")?;
        tracing::debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(tx: Transaction<'static, Sqlite>) -> Result<()> {
        tx.rollback()
            .await
            .context("Failed to roll back transaction")?;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }

    // ========================
    // User operations
    // ========================

    /// Insert a user and return it with its assigned id.
    /// Returns `None` if the nickname is already taken.
    pub async fn save_user(&self, nickname: &str) -> Result<Option<User>> {
        let created_at = Utc::now();
        let result = sqlx::query("INSERT INTO users (nickname, created_at) VALUES (?, ?) RETURNING id")
            .bind(nickname)
            .bind(created_at.to_rfc3339())
            .fetch_one(&self.pool)
            .await;

        let row = match result {
            Ok(row) => row,
            Err(err) if is_unique_violation(&err) => return Ok(None),
            Err(err) => return Err(anyhow::Error::new(err).context("Failed to save user")),
        };

        Ok(Some(User {
            id: row.get("id"),
            nickname: nickname.to_string(),
            created_at,
        }))
    }

    pub async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, nickname, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn get_user_by_nickname(&self, nickname: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, nickname, created_at FROM users WHERE nickname = ?")
            .bind(nickname)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch user by nickname")?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    pub async fn list_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT id, nickname, created_at FROM users ORDER BY nickname")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list users")?;

        rows.iter().map(Self::row_to_user).collect()
    }

    fn row_to_user(row: &SqliteRow) -> Result<User> {
        Ok(User {
            id: row.get("id"),
            nickname: row.get("nickname"),
            created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        })
    }

    // ========================
    // Trip operations
    // ========================

    /// Insert a trip. The owner becomes its first member.
    pub async fn save_trip(&self, name: &str, owner_id: UserId) -> Result<Trip> {
        let created_at = Utc::now();
        let mut tx = self.begin().await?;
        let row = sqlx::query(
            "INSERT INTO trips (name, owner_id, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(owner_id)
        .bind(created_at.to_rfc3339())
        .fetch_one(&mut *tx)
        .await
        .context("Failed to save trip")?;

        let trip_id: TripId = row.get("id");
        Self::insert_trip_member(&mut tx, trip_id, owner_id).await?;
        Self::commit(tx).await?;

        Ok(Trip {
            id: trip_id,
            name: name.to_string(),
            owner_id,
            created_at,
        })
    }

    /// Add a member to a trip. Returns false if they already belong to it.
    pub async fn add_trip_member(&self, trip_id: TripId, user_id: UserId) -> Result<bool> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection")?;
        Self::insert_trip_member(&mut conn, trip_id, user_id).await
    }

    async fn insert_trip_member(conn: &mut SqliteConnection, trip_id: TripId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO trip_members (trip_id, user_id, joined_at)
            VALUES (?, ?, ?)
            ON CONFLICT (trip_id, user_id) DO NOTHING
            "#,
        )
        .bind(trip_id)
        .bind(user_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to add user {} to trip {}", user_id, trip_id))?;

        Ok(result.rows_affected() == 1)
    }

    /// Members of a trip in the order they joined.
    pub async fn list_trip_members(&self, trip_id: TripId) -> Result<Vec<User>> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.nickname, u.created_at
            FROM users u
            JOIN trip_members tm ON tm.user_id = u.id
            WHERE tm.trip_id = ?
            ORDER BY tm.rowid
            "#,
        )
        .bind(trip_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list trip members")?;

        rows.iter().map(Self::row_to_user).collect()
    }

    pub async fn get_trip(&self, id: TripId) -> Result<Option<Trip>> {
        let row = sqlx::query("SELECT id, name, owner_id, created_at FROM trips WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch trip")?;

        row.as_ref().map(Self::row_to_trip).transpose()
    }

    pub async fn list_trips(&self) -> Result<Vec<Trip>> {
        let rows = sqlx::query("SELECT id, name, owner_id, created_at FROM trips ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list trips")?;

        rows.iter().map(Self::row_to_trip).collect()
    }

    fn row_to_trip(row: &SqliteRow) -> Result<Trip> {
        Ok(Trip {
            id: row.get("id"),
            name: row.get("name"),
            owner_id: row.get("owner_id"),
            created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        })
    }

    // ========================
    // Expense ledger (transactional)
    // ========================

    /// Insert the expense row. Returns the id assigned by the store.
    pub async fn insert_expense(conn: &mut SqliteConnection, header: &ExpenseHeader) -> Result<ExpenseId> {
        let now = Utc::now().to_rfc3339();
        let row = sqlx::query(
            r#"
            INSERT INTO expenses (location, name, description, price_cents, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&header.location)
        .bind(&header.name)
        .bind(&header.description)
        .bind(header.price_cents)
        .bind(&now)
        .bind(&now)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to save expense")?;

        Ok(row.get("id"))
    }

    /// Attach an expense to the trip that owns it.
    pub async fn link_trip(conn: &mut SqliteConnection, trip_id: TripId, expense_id: ExpenseId) -> Result<()> {
        sqlx::query("INSERT INTO trip_expenses (trip_id, expense_id) VALUES (?, ?)")
            .bind(trip_id)
            .bind(expense_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to link expense {} to trip {}", expense_id, trip_id))?;
        Ok(())
    }

    /// Add participants to an expense. Pairs that already exist are left
    /// alone. Returns the number of rows actually inserted.
    pub async fn insert_participants(
        conn: &mut SqliteConnection,
        expense_id: ExpenseId,
        user_ids: &[UserId],
    ) -> Result<u64> {
        let mut inserted = 0;
        for &user_id in user_ids {
            let result = sqlx::query(
                r#"
                INSERT INTO expense_participants (expense_id, user_id)
                VALUES (?, ?)
                ON CONFLICT (expense_id, user_id) DO NOTHING
                "#,
            )
            .bind(expense_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to add participant {} to expense {}", user_id, expense_id))?;
            inserted += result.rows_affected();
        }
        Ok(inserted)
    }

    pub async fn find_expense(conn: &mut SqliteConnection, id: ExpenseId) -> Result<Option<Expense>> {
        let row = sqlx::query(
            r#"
            SELECT id, location, name, description, price_cents, version, created_at, updated_at
            FROM expenses
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch expense")?;

        row.as_ref().map(Self::row_to_expense).transpose()
    }

    /// Trip owning the expense, if the link exists.
    pub async fn find_trip_for_expense(conn: &mut SqliteConnection, expense_id: ExpenseId) -> Result<Option<TripId>> {
        let row = sqlx::query("SELECT trip_id FROM trip_expenses WHERE expense_id = ?")
            .bind(expense_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch trip link")?;

        Ok(row.map(|r| r.get("trip_id")))
    }

    /// Participant ids in insertion order.
    pub async fn participant_ids(conn: &mut SqliteConnection, expense_id: ExpenseId) -> Result<Vec<UserId>> {
        let rows = sqlx::query(
            "SELECT user_id FROM expense_participants WHERE expense_id = ? ORDER BY rowid",
        )
        .bind(expense_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch expense participants")?;

        Ok(rows.iter().map(|r| r.get("user_id")).collect())
    }

    /// Overwrite the scalar fields if the stored version still matches
    /// `header.version`. Returns false when no row was updated.
    pub async fn update_expense_fields(conn: &mut SqliteConnection, header: &ExpenseHeader) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE expenses
            SET location = ?, name = ?, description = ?, price_cents = ?,
                version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&header.location)
        .bind(&header.name)
        .bind(&header.description)
        .bind(header.price_cents)
        .bind(Utc::now().to_rfc3339())
        .bind(header.id)
        .bind(header.version)
        .execute(&mut *conn)
        .await
        .context("Failed to update expense")?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete an expense with its trip link and participants.
    /// Returns false if the expense did not exist.
    pub async fn delete_expense(conn: &mut SqliteConnection, id: ExpenseId) -> Result<bool> {
        sqlx::query("DELETE FROM expense_participants WHERE expense_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete expense participants")?;

        sqlx::query("DELETE FROM trip_expenses WHERE expense_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete trip link")?;

        let result = sqlx::query("DELETE FROM expenses WHERE id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to delete expense")?;

        Ok(result.rows_affected() == 1)
    }

    /// All expenses of a trip as headers, ordered by expense id.
    pub async fn list_trip_expenses(conn: &mut SqliteConnection, trip_id: TripId) -> Result<Vec<ExpenseHeader>> {
        let rows = sqlx::query(
            r#"
            SELECT e.id, e.location, e.name, e.description, e.price_cents, e.version, e.created_at, e.updated_at
            FROM expenses e
            JOIN trip_expenses te ON te.expense_id = e.id
            WHERE te.trip_id = ?
            ORDER BY e.id
            "#,
        )
        .bind(trip_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list trip expenses")?;

        let participant_rows = sqlx::query(
            r#"
            SELECT ep.expense_id, ep.user_id
            FROM expense_participants ep
            JOIN trip_expenses te ON te.expense_id = ep.expense_id
            WHERE te.trip_id = ?
            ORDER BY ep.rowid
            "#,
        )
        .bind(trip_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list trip participants")?;

        let mut participants: HashMap<ExpenseId, Vec<UserId>> = HashMap::new();
        for row in participant_rows {
            participants
                .entry(row.get("expense_id"))
                .or_default()
                .push(row.get("user_id"));
        }

        rows.iter()
            .map(|row| {
                let expense = Self::row_to_expense(row)?;
                let ids = participants.remove(&expense.id).unwrap_or_default();
                Ok(ExpenseHeader::from_parts(expense, trip_id, ids))
            })
            .collect()
    }

    fn row_to_expense(row: &SqliteRow) -> Result<Expense> {
        Ok(Expense {
            id: row.get("id"),
            location: row.get("location"),
            name: row.get("name"),
            description: row.get("description"),
            price_cents: row.get("price_cents"),
            version: row.get("version"),
            created_at: parse_timestamp(row.get("created_at"), "created_at")?,
            updated_at: parse_timestamp(row.get("updated_at"), "updated_at")?,
        })
    }

    // ========================
    // Integrity
    // ========================

    /// Get statistics for integrity checking.
    pub async fn get_integrity_stats(&self) -> Result<IntegrityStats> {
        let expense_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM expenses")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let participant_count: i64 = sqlx::query("SELECT COUNT(*) as count FROM expense_participants")
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let orphaned_expenses: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) as count
            FROM expenses e
            WHERE NOT EXISTS (SELECT 1 FROM trip_expenses te WHERE te.expense_id = e.id)
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count orphaned expenses")?
        .get("count");

        let dangling_links: i64 = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM trip_expenses te
                 WHERE NOT EXISTS (SELECT 1 FROM expenses e WHERE e.id = te.expense_id))
              + (SELECT COUNT(*) FROM expense_participants ep
                 WHERE NOT EXISTS (SELECT 1 FROM expenses e WHERE e.id = ep.expense_id))
              as count
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count dangling links")?
        .get("count");

        Ok(IntegrityStats {
            expense_count,
            participant_count,
            orphaned_expenses,
            dangling_links,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

fn parse_timestamp(value: String, field: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)
        .with_context(|| format!("Invalid {} timestamp", field))?
        .with_timezone(&Utc))
}
