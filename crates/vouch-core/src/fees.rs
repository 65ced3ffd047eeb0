/// FINAL FEE SCHEDULE
///
/// The final fee is a per-currency surcharge layered on top of every bond.
/// Administrators may change it at any moment, so callers must sample it at
/// each lifecycle point instead of caching it.

use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Amount, Currency, Timestamp};

/// Read-only view of the current final fee for a currency
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait FinalFeeSource {
    fn final_fee(&self, currency: &Currency) -> Amount;
}

/// One change to the schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeChange {
    pub version: u64,
    pub currency: Currency,
    pub previous: Amount,
    pub fee: Amount,
    pub changed_at: Timestamp,
}

/// Versioned, in-process fee schedule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeSchedule {
    fees: BTreeMap<Currency, Amount>,
    version: u64,
    history: Vec<FeeChange>,
}

impl FeeSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fee for `currency`, returning the new schedule version
    pub fn set_final_fee(&mut self, currency: &Currency, fee: Amount, now: Timestamp) -> u64 {
        let previous = self.fees.insert(currency.clone(), fee).unwrap_or(0);
        self.version += 1;
        self.history.push(FeeChange {
            version: self.version,
            currency: currency.clone(),
            previous,
            fee,
            changed_at: now,
        });

        info!(
            "Final fee for {} changed {} -> {} (schedule v{})",
            currency, previous, fee, self.version
        );
        self.version
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn history(&self) -> &[FeeChange] {
        &self.history
    }
}

impl FinalFeeSource for FeeSchedule {
    fn final_fee(&self, currency: &Currency) -> Amount {
        self.fees.get(currency).copied().unwrap_or(0)
    }
}
