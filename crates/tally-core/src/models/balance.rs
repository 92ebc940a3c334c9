//! Point balances computed from transactions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Points held by a user, overall and per partner store.
///
/// Never persisted; always derived from the transaction history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balances {
    pub total_points: i64,
    pub earned_points: i64,
    pub redeemed_points: i64,
    pub by_store: BTreeMap<String, i64>,
}

impl Balances {
    /// Fold transaction payloads into balances.
    ///
    /// A transaction contributes `points` (default 0); `type = "redeem"`
    /// subtracts, anything else adds.
    pub fn from_transactions<'a>(transactions: impl IntoIterator<Item = &'a Value>) -> Self {
        let mut balances = Self::default();
        for transaction in transactions {
            let points = transaction.get("points").and_then(Value::as_i64).unwrap_or(0);
            let redeem = transaction.get("type").and_then(Value::as_str) == Some("redeem");
            let signed = if redeem {
                balances.redeemed_points += points;
                -points
            } else {
                balances.earned_points += points;
                points
            };
            balances.total_points += signed;

            if let Some(store) = transaction.get("storeId").and_then(store_key) {
                *balances.by_store.entry(store).or_default() += signed;
            }
        }
        balances
    }
}

fn store_key(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn earn_and_redeem_fold_into_totals() {
        let transactions = [
            json!({"id": "t1", "points": 100, "type": "earn", "storeId": "s1"}),
            json!({"id": "t2", "points": 30, "type": "redeem", "storeId": "s1"}),
            json!({"id": "t3", "points": 10, "storeId": 2}),
        ];
        let balances = Balances::from_transactions(transactions.iter());

        assert_eq!(balances.total_points, 80);
        assert_eq!(balances.earned_points, 110);
        assert_eq!(balances.redeemed_points, 30);
        assert_eq!(balances.by_store.get("s1"), Some(&70));
        assert_eq!(balances.by_store.get("2"), Some(&10));
    }
}
