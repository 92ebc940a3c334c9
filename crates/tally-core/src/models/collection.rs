//! Named record collections

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The fixed set of collections tracked by the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// The signed-in user's profile
    Profile,
    /// Point-earning and redemption transactions
    Transactions,
    /// Partner store catalog
    Stores,
    /// Redeemed rewards
    RewardHistory,
    /// In-app notifications
    Notifications,
    /// App configuration and user settings
    Config,
}

impl Collection {
    /// Every collection, in storage order.
    pub const ALL: [Self; 6] = [
        Self::Profile,
        Self::Transactions,
        Self::Stores,
        Self::RewardHistory,
        Self::Notifications,
        Self::Config,
    ];

    /// Stable name used in storage and on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Transactions => "transactions",
            Self::Stores => "stores",
            Self::RewardHistory => "reward_history",
            Self::Notifications => "notifications",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown collection: {s}")))
    }
}
