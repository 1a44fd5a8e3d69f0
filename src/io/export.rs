use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{format_cents, ExpenseHeader, Trip, TripId, TripShares, User};

/// Everything recorded for one trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub trip: Trip,
    pub members: Vec<User>,
    pub expenses: Vec<ExpenseHeader>,
    pub shares: TripShares,
}

/// Exporter for writing a trip's expenses out of the ledger
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export the expenses of a trip to CSV, one row per expense
    pub async fn export_trip_csv<W: Write>(&self, trip_id: TripId, writer: W) -> Result<usize> {
        let expenses = self.service.list_trip_expenses(trip_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "trip_id",
            "location",
            "name",
            "description",
            "price",
            "participants",
        ])?;

        for expense in &expenses {
            let participants = expense
                .participant_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(";");

            csv_writer.write_record([
                expense.id.to_string(),
                expense.trip_id.to_string(),
                expense.location.clone(),
                expense.name.clone(),
                expense.description.clone(),
                format_cents(expense.price_cents),
                participants,
            ])?;
        }

        csv_writer.flush()?;
        Ok(expenses.len())
    }

    /// Export a trip with its expenses and shares as a JSON snapshot
    pub async fn export_trip_json<W: Write>(
        &self,
        trip_id: TripId,
        mut writer: W,
    ) -> Result<TripSnapshot> {
        let details = self.service.get_trip_details(trip_id).await?;

        let snapshot = TripSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            trip: details.trip,
            members: details.members,
            expenses: details.expenses,
            shares: details.shares,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
