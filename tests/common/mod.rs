// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::TempDir;
use travelbook::application::LedgerService;
use travelbook::config::DatabaseConfig;
use travelbook::domain::{ExpenseHeader, TripId, UserId};

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let config = DatabaseConfig::with_path(db_path.to_str().unwrap());
    let service = LedgerService::init(&config).await?;
    Ok((service, temp_dir))
}

/// Direct pool on the database behind `test_service`, for tampering with
/// rows the service would never leave in that state
pub async fn raw_pool(temp_dir: &TempDir) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new().filename(temp_dir.path().join("test.db"));
    Ok(SqlitePool::connect_with(options).await?)
}

/// Test fixture: three travellers and one trip owned by the first
pub struct Travellers {
    pub ana: UserId,
    pub bo: UserId,
    pub cy: UserId,
    pub trip: TripId,
}

impl Travellers {
    pub async fn create(service: &LedgerService) -> Result<Self> {
        let ana = service.register_user("ana").await?.id;
        let bo = service.register_user("bo").await?.id;
        let cy = service.register_user("cy").await?.id;
        let trip = service.create_trip("Lisbon 2024", ana).await?.id;
        Ok(Self { ana, bo, cy, trip })
    }

    /// Record an expense on the fixture trip
    pub async fn expense(
        &self,
        service: &LedgerService,
        name: &str,
        price_cents: i64,
        participants: Vec<UserId>,
    ) -> Result<i64> {
        let header = ExpenseHeader::new(name, price_cents).with_participants(participants);
        Ok(service.create_expense(&header, self.trip).await?)
    }
}

/// Participant ids sorted, for set comparisons
pub fn sorted(mut ids: Vec<UserId>) -> Vec<UserId> {
    ids.sort_unstable();
    ids
}
