use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TripId = i64;
pub type UserId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

/// A trip groups the expenses shared by its participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trip {
    pub id: TripId,
    pub name: String,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
}
