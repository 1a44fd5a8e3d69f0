use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{distinct_ids, Cents, ExpenseHeader, TripId, UserId};

/// What a single user owes across a trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantShare {
    pub user_id: UserId,
    pub nickname: String,
    pub owed: Cents,
}

/// Cost of a trip broken down by participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripShares {
    pub trip_id: TripId,
    pub total: Cents,
    /// Sum of expenses nobody has been assigned to yet.
    pub unassigned: Cents,
    pub shares: Vec<ParticipantShare>,
}

/// Split `amount` across `parts` participants. Leftover cents go one each
/// to the first participants, so the parts always sum to `amount`.
/// Example: 1000 / 3 -> [334, 333, 333]
pub fn split_evenly(amount: Cents, parts: usize) -> Vec<Cents> {
    if parts == 0 {
        return Vec::new();
    }
    let count = parts as i64;
    let base = amount / count;
    let remainder = amount % count;
    (0..count)
        .map(|i| if i < remainder.abs() { base + remainder.signum() } else { base })
        .collect()
}

/// Sum each user's share over the given expenses.
/// Returns the per-user totals ordered by user id and the unassigned amount,
/// or `None` if any running sum does not fit in [`Cents`].
pub fn compute_shares(expenses: &[ExpenseHeader]) -> Option<(BTreeMap<UserId, Cents>, Cents)> {
    let mut owed: BTreeMap<UserId, Cents> = BTreeMap::new();
    let mut unassigned: Cents = 0;

    for expense in expenses {
        let participants = distinct_ids(&expense.participant_ids);
        if participants.is_empty() {
            unassigned = unassigned.checked_add(expense.price_cents)?;
            continue;
        }
        let parts = split_evenly(expense.price_cents, participants.len());
        for (user_id, part) in participants.into_iter().zip(parts) {
            let entry = owed.entry(user_id).or_insert(0);
            *entry = entry.checked_add(part)?;
        }
    }

    Some((owed, unassigned))
}

/// Sum of all expense prices, `None` on overflow.
pub fn total_price(expenses: &[ExpenseHeader]) -> Option<Cents> {
    expenses
        .iter()
        .try_fold(0 as Cents, |acc, e| acc.checked_add(e.price_cents))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expense(price: Cents, participants: Vec<UserId>) -> ExpenseHeader {
        ExpenseHeader::new("x", price).with_participants(participants)
    }

    #[test]
    fn test_split_evenly() {
        assert_eq!(split_evenly(1000, 3), vec![334, 333, 333]);
        assert_eq!(split_evenly(900, 3), vec![300, 300, 300]);
        assert_eq!(split_evenly(1, 2), vec![1, 0]);
        assert_eq!(split_evenly(0, 2), vec![0, 0]);
        assert!(split_evenly(500, 0).is_empty());
    }

    #[test]
    fn test_split_evenly_always_sums_to_amount() {
        for amount in [0, 1, 7, 99, 1001, 123457] {
            for parts in 1..=7 {
                let split = split_evenly(amount, parts);
                assert_eq!(split.iter().sum::<Cents>(), amount);
                assert_eq!(split.len(), parts);
            }
        }
    }

    #[test]
    fn test_compute_shares() {
        let expenses = vec![
            expense(1000, vec![1, 2, 3]),
            expense(600, vec![2, 3]),
            expense(250, vec![]),
        ];

        let (owed, unassigned) = compute_shares(&expenses).unwrap();

        assert_eq!(owed.get(&1), Some(&334));
        assert_eq!(owed.get(&2), Some(&633));
        assert_eq!(owed.get(&3), Some(&633));
        assert_eq!(unassigned, 250);
        assert_eq!(owed.values().sum::<Cents>() + unassigned, 1850);
    }

    #[test]
    fn test_compute_shares_ignores_duplicate_participants() {
        let (owed, _) = compute_shares(&[expense(1000, vec![5, 5])]).unwrap();
        assert_eq!(owed.get(&5), Some(&1000));
    }

    #[test]
    fn test_compute_shares_overflow() {
        let big = i64::MAX / 2 + 10;
        assert!(compute_shares(&[expense(big, vec![1]), expense(big, vec![1])]).is_none());
        assert!(compute_shares(&[expense(big, vec![]), expense(big, vec![])]).is_none());
        assert_eq!(total_price(&[expense(big, vec![]), expense(big, vec![2])]), None);

        // Different users never share a running sum
        let (owed, _) = compute_shares(&[expense(big, vec![1]), expense(big, vec![2])]).unwrap();
        assert_eq!(owed.get(&2), Some(&big));
        assert_eq!(total_price(&[expense(1200, vec![]), expense(300, vec![1])]), Some(1500));
    }
}
