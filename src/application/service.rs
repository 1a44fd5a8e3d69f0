use sqlx::{Sqlite, Transaction};

use crate::config::DatabaseConfig;
use crate::domain::{
    compute_shares, missing_participants, total_price, ExpenseHeader, ExpenseId,
    ParticipantShare, Trip, TripId, TripShares, User, UserId,
};
use crate::storage::{IntegrityStats, Repository};

use super::AppError;

/// Application service over the expense ledger.
/// This is the primary interface for any client (CLI, exporters, a web front end).
///
/// Each expense operation runs in its own transaction, so an expense, its
/// trip link and its participant rows are always written or removed together.
pub struct LedgerService {
    repo: Repository,
}

/// Trip with everything needed to display it.
pub struct TripDetails {
    pub trip: Trip,
    pub members: Vec<User>,
    pub expenses: Vec<ExpenseHeader>,
    pub shares: TripShares,
}

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Initialize the database (creating it if needed) and connect.
    pub async fn init(config: &DatabaseConfig) -> Result<Self, AppError> {
        let repo = Repository::init(config).await?;
        Ok(Self::new(repo))
    }

    /// Connect to an existing database.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let repo = Repository::connect(config).await?;
        Ok(Self::new(repo))
    }

    // ========================
    // Expense operations
    // ========================

    /// Record a new expense for `trip_id`.
    ///
    /// The expense row, its trip link and one participant row per distinct
    /// id are inserted in a single transaction. A failure at any step (for
    /// example an unknown trip or user id rejected by a foreign key) leaves
    /// nothing behind. `header.id`, `header.trip_id` and `header.version`
    /// are ignored.
    pub async fn create_expense(
        &self,
        header: &ExpenseHeader,
        trip_id: TripId,
    ) -> Result<ExpenseId, AppError> {
        validate_price(header)?;
        let participants = header.distinct_participants();

        let mut tx = self.repo.begin().await?;
        let result: Result<ExpenseId, AppError> = async {
            let expense_id = Repository::insert_expense(&mut tx, header).await?;
            Repository::link_trip(&mut tx, trip_id, expense_id).await?;
            Repository::insert_participants(&mut tx, expense_id, &participants).await?;
            Ok(expense_id)
        }
        .await;
        let expense_id = finish(tx, result).await?;

        tracing::info!(
            expense_id,
            trip_id,
            participants = participants.len(),
            "Expense created"
        );
        Ok(expense_id)
    }

    /// Load an expense together with its trip and participants.
    pub async fn get_expense(&self, expense_id: ExpenseId) -> Result<ExpenseHeader, AppError> {
        let mut tx = self.repo.begin().await?;
        let result: Result<ExpenseHeader, AppError> = async {
            let expense = Repository::find_expense(&mut tx, expense_id)
                .await?
                .ok_or(AppError::ExpenseNotFound(expense_id))?;
            let trip_id = Repository::find_trip_for_expense(&mut tx, expense_id)
                .await?
                .ok_or(AppError::TripLinkNotFound(expense_id))?;
            let participant_ids = Repository::participant_ids(&mut tx, expense_id).await?;
            Ok(ExpenseHeader::from_parts(expense, trip_id, participant_ids))
        }
        .await;
        finish(tx, result).await
    }

    /// Overwrite the scalar fields of an expense and merge in participants.
    ///
    /// The participant list is a union, not a replacement: ids already on the
    /// expense but missing from `header.participant_ids` stay. Nothing ever
    /// removes a participant short of removing the whole expense. The owning
    /// trip cannot change, so `header.trip_id` is ignored.
    ///
    /// `header.version` must be the version the caller read. If someone else
    /// updated the expense in between, this fails with [`AppError::Conflict`]
    /// and nothing is written.
    pub async fn update_expense(&self, header: &ExpenseHeader) -> Result<ExpenseHeader, AppError> {
        validate_price(header)?;
        let expense_id = header.id;

        let mut tx = self.repo.begin().await?;
        let result: Result<Vec<UserId>, AppError> = async {
            if !Repository::update_expense_fields(&mut tx, header).await? {
                let current = Repository::find_expense(&mut tx, expense_id).await?;
                return Err(match current {
                    None => AppError::ExpenseNotFound(expense_id),
                    Some(expense) => {
                        tracing::warn!(
                            expense_id,
                            expected = header.version,
                            actual = expense.version,
                            "Rejected stale expense update"
                        );
                        AppError::Conflict {
                            expense_id,
                            expected: header.version,
                            actual: expense.version,
                        }
                    }
                });
            }

            let existing = Repository::participant_ids(&mut tx, expense_id).await?;
            let added = missing_participants(&existing, &header.participant_ids);
            Repository::insert_participants(&mut tx, expense_id, &added).await?;
            Ok(added)
        }
        .await;
        let added = finish(tx, result).await?;

        tracing::info!(expense_id, added = added.len(), "Expense updated");
        self.get_expense(expense_id).await
    }

    /// Delete an expense, its trip link and all of its participants.
    pub async fn remove_expense(&self, expense_id: ExpenseId) -> Result<(), AppError> {
        let mut tx = self.repo.begin().await?;
        let result: Result<(), AppError> = async {
            if !Repository::delete_expense(&mut tx, expense_id).await? {
                return Err(AppError::ExpenseNotFound(expense_id));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        tracing::info!(expense_id, "Expense removed");
        Ok(())
    }

    /// All expenses of a trip, ordered by id.
    pub async fn list_trip_expenses(&self, trip_id: TripId) -> Result<Vec<ExpenseHeader>, AppError> {
        self.get_trip(trip_id).await?;

        let mut tx = self.repo.begin().await?;
        let result = Repository::list_trip_expenses(&mut tx, trip_id)
            .await
            .map_err(AppError::from);
        finish(tx, result).await
    }

    /// What each participant owes for the trip, splitting every expense
    /// evenly across its participants.
    pub async fn trip_shares(&self, trip_id: TripId) -> Result<TripShares, AppError> {
        let expenses = self.list_trip_expenses(trip_id).await?;
        self.build_shares(trip_id, &expenses).await
    }

    /// Trip, its expenses and the split, read in one go.
    pub async fn get_trip_details(&self, trip_id: TripId) -> Result<TripDetails, AppError> {
        let trip = self.get_trip(trip_id).await?;
        let members = self.repo.list_trip_members(trip_id).await?;
        let expenses = self.list_trip_expenses(trip_id).await?;
        let shares = self.build_shares(trip_id, &expenses).await?;
        Ok(TripDetails {
            trip,
            members,
            expenses,
            shares,
        })
    }

    async fn build_shares(
        &self,
        trip_id: TripId,
        expenses: &[ExpenseHeader],
    ) -> Result<TripShares, AppError> {
        let overflow = || AppError::InvalidAmount(format!("Trip {} total is too large", trip_id));
        let (owed, unassigned) = compute_shares(expenses).ok_or_else(overflow)?;
        let total = total_price(expenses).ok_or_else(overflow)?;

        let mut shares = Vec::with_capacity(owed.len());
        for (user_id, amount) in owed {
            let nickname = self
                .repo
                .get_user(user_id)
                .await?
                .map(|u| u.nickname)
                .unwrap_or_else(|| format!("#{}", user_id));
            shares.push(ParticipantShare {
                user_id,
                nickname,
                owed: amount,
            });
        }

        Ok(TripShares {
            trip_id,
            total,
            unassigned,
            shares,
        })
    }

    // ========================
    // Trip operations
    // ========================

    pub async fn create_trip(&self, name: &str, owner_id: UserId) -> Result<Trip, AppError> {
        self.get_user(owner_id).await?;
        let trip = self.repo.save_trip(name, owner_id).await?;
        tracing::info!(trip_id = trip.id, owner_id, "Trip created");
        Ok(trip)
    }

    pub async fn get_trip(&self, trip_id: TripId) -> Result<Trip, AppError> {
        self.repo
            .get_trip(trip_id)
            .await?
            .ok_or(AppError::TripNotFound(trip_id))
    }

    pub async fn list_trips(&self) -> Result<Vec<Trip>, AppError> {
        Ok(self.repo.list_trips().await?)
    }

    /// Add a user to a trip. Adding an existing member is a no-op.
    pub async fn add_trip_member(&self, trip_id: TripId, user_id: UserId) -> Result<(), AppError> {
        self.get_trip(trip_id).await?;
        self.get_user(user_id).await?;
        if self.repo.add_trip_member(trip_id, user_id).await? {
            tracing::info!(trip_id, user_id, "Trip member added");
        }
        Ok(())
    }

    /// Members of a trip in the order they joined, owner first.
    pub async fn list_trip_members(&self, trip_id: TripId) -> Result<Vec<User>, AppError> {
        self.get_trip(trip_id).await?;
        Ok(self.repo.list_trip_members(trip_id).await?)
    }

    // ========================
    // User operations
    // ========================

    /// Register a user. Nicknames are unique.
    pub async fn register_user(&self, nickname: &str) -> Result<User, AppError> {
        let user = self
            .repo
            .save_user(nickname)
            .await?
            .ok_or_else(|| AppError::UserAlreadyExists(nickname.to_string()))?;
        tracing::info!(user_id = user.id, nickname, "User registered");
        Ok(user)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<User, AppError> {
        self.repo
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))
    }

    pub async fn get_user_by_nickname(&self, nickname: &str) -> Result<User, AppError> {
        self.repo
            .get_user_by_nickname(nickname)
            .await?
            .ok_or_else(|| AppError::UserNotFound(nickname.to_string()))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.repo.list_users().await?)
    }

    // ========================
    // Integrity operations
    // ========================

    /// Counters showing whether every expense has its trip link and no link
    /// row points at a missing expense.
    pub async fn check_integrity(&self) -> Result<IntegrityStats, AppError> {
        Ok(self.repo.get_integrity_stats().await?)
    }
}

/// Commit on success, roll back on failure. A failed rollback is logged and
/// the original error returned.
async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    result: Result<T, AppError>,
) -> Result<T, AppError> {
    match result {
        Ok(value) => {
            Repository::commit(tx).await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = Repository::rollback(tx).await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

fn validate_price(header: &ExpenseHeader) -> Result<(), AppError> {
    if header.price_cents < 0 {
        return Err(AppError::InvalidAmount(
            "Price cannot be negative".to_string(),
        ));
    }
    Ok(())
}
