use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, TripId, UserId};

pub type ExpenseId = i64;

/// A persisted expense row. The owning trip and the participants live in
/// their own link tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub location: String,
    pub name: String,
    pub description: String,
    pub price_cents: Cents,
    /// Bumped on every successful update, used to detect lost updates.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-facing view of an expense: its own fields, the trip that owns it
/// and the users sharing its cost.
///
/// Updates treat `participant_ids` as a set to merge into the stored one.
/// Ids missing from the list are never removed from the expense.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseHeader {
    pub id: ExpenseId,
    pub trip_id: TripId,
    pub location: String,
    pub name: String,
    pub description: String,
    pub price_cents: Cents,
    pub participant_ids: Vec<UserId>,
    pub version: i64,
}

impl ExpenseHeader {
    /// Header for an expense that has not been stored yet.
    pub fn new(name: impl Into<String>, price_cents: Cents) -> Self {
        Self {
            id: 0,
            trip_id: 0,
            location: String::new(),
            name: name.into(),
            description: String::new(),
            price_cents,
            participant_ids: Vec::new(),
            version: 0,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_participants(mut self, participant_ids: Vec<UserId>) -> Self {
        self.participant_ids = participant_ids;
        self
    }

    /// Assemble a header from the stored rows.
    pub fn from_parts(expense: Expense, trip_id: TripId, participant_ids: Vec<UserId>) -> Self {
        Self {
            id: expense.id,
            trip_id,
            location: expense.location,
            name: expense.name,
            description: expense.description,
            price_cents: expense.price_cents,
            participant_ids,
            version: expense.version,
        }
    }

    /// Participant ids with duplicates dropped, first occurrence wins.
    pub fn distinct_participants(&self) -> Vec<UserId> {
        distinct_ids(&self.participant_ids)
    }
}

/// Deduplicate ids while keeping the order of first appearance.
pub fn distinct_ids(ids: &[UserId]) -> Vec<UserId> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Ids from `requested` that are not yet in `existing`, deduplicated.
pub fn missing_participants(existing: &[UserId], requested: &[UserId]) -> Vec<UserId> {
    distinct_ids(requested)
        .into_iter()
        .filter(|id| !existing.contains(id))
        .collect()
}
