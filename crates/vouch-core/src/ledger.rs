/// BONDED LEDGER PRIMITIVE
///
/// Fungible balances for any number of currencies, with allowance-based pulls.
/// Every operation validates first and mutates second, so a failed call never
/// leaves a partial transfer behind.
///
/// `EscrowBook` sits next to the ledger and tracks, per obligation key, how much
/// of an escrow account's balance is owed back out. Its per-currency total must
/// always equal the escrow account's ledger balance.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::types::{Address, Amount, Currency};

/// Multi-currency balance and allowance ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenLedger {
    balances: BTreeMap<(Currency, Address), Amount>,
    allowances: BTreeMap<(Currency, Address, Address), Amount>,
    supplies: BTreeMap<Currency, Amount>,
    /// Prior values of every slot written while a checkpoint is open
    #[serde(skip)]
    journal: Vec<Undo>,
    #[serde(skip)]
    open_checkpoints: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Undo {
    Balance((Currency, Address), Option<Amount>),
    Allowance((Currency, Address, Address), Option<Amount>),
    Supply(Currency, Option<Amount>),
}

/// Position in the ledger's undo journal. Every checkpoint must end in
/// exactly one `commit` or `revert`, innermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct LedgerCheckpoint {
    mark: usize,
}

impl TokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, currency: &Currency, account: &Address) -> Amount {
        self.balances
            .get(&(currency.clone(), account.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn allowance(&self, currency: &Currency, owner: &Address, spender: &Address) -> Amount {
        self.allowances
            .get(&(currency.clone(), owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_supply(&self, currency: &Currency) -> Amount {
        self.supplies.get(currency).copied().unwrap_or(0)
    }

    /// Start recording writes so they can be undone with `revert`. Only the
    /// slots written after this point are kept, not the whole ledger.
    pub fn checkpoint(&mut self) -> LedgerCheckpoint {
        self.open_checkpoints += 1;
        LedgerCheckpoint {
            mark: self.journal.len(),
        }
    }

    /// Keep every write since `checkpoint`
    pub fn commit(&mut self, checkpoint: LedgerCheckpoint) {
        debug_assert!(checkpoint.mark <= self.journal.len());
        self.close_checkpoint();
    }

    /// Undo every write since `checkpoint`
    pub fn revert(&mut self, checkpoint: LedgerCheckpoint) {
        while self.journal.len() > checkpoint.mark {
            match self.journal.pop() {
                Some(Undo::Balance(key, prior)) => restore_slot(&mut self.balances, key, prior),
                Some(Undo::Allowance(key, prior)) => restore_slot(&mut self.allowances, key, prior),
                Some(Undo::Supply(key, prior)) => restore_slot(&mut self.supplies, key, prior),
                None => break,
            }
        }
        self.close_checkpoint();
    }

    fn close_checkpoint(&mut self) {
        self.open_checkpoints = self.open_checkpoints.saturating_sub(1);
        if self.open_checkpoints == 0 {
            self.journal.clear();
        }
    }

    /// Create new units in `to`
    pub fn mint(&mut self, currency: &Currency, to: &Address, amount: Amount) -> CoreResult<()> {
        let supply = self
            .total_supply(currency)
            .checked_add(amount)
            .ok_or(CoreError::Overflow("mint supply"))?;
        let balance = self
            .balance_of(currency, to)
            .checked_add(amount)
            .ok_or(CoreError::Overflow("mint balance"))?;

        self.set_supply(currency, supply);
        self.set_balance(currency, to, balance);
        Ok(())
    }

    /// Destroy units held by `from`
    pub fn burn(&mut self, currency: &Currency, from: &Address, amount: Amount) -> CoreResult<()> {
        let balance = self.require_balance(currency, from, amount)?;
        let supply = self.total_supply(currency).saturating_sub(amount);

        self.set_supply(currency, supply);
        self.set_balance(currency, from, balance - amount);
        Ok(())
    }

    /// Move units held by `from` to `to`
    pub fn transfer(
        &mut self,
        currency: &Currency,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> CoreResult<()> {
        if amount == 0 || from == to {
            return self.require_balance(currency, from, amount).map(|_| ());
        }

        let from_balance = self.require_balance(currency, from, amount)?;
        let to_balance = self
            .balance_of(currency, to)
            .checked_add(amount)
            .ok_or(CoreError::Overflow("transfer"))?;

        self.set_balance(currency, from, from_balance - amount);
        self.set_balance(currency, to, to_balance);
        debug!("transfer {} {} {} -> {}", amount, currency, from, to);
        Ok(())
    }

    /// Allow `spender` to pull up to `amount` from `owner` (overwrites)
    pub fn approve(&mut self, currency: &Currency, owner: &Address, spender: &Address, amount: Amount) {
        let key = (currency.clone(), owner.clone(), spender.clone());
        if self.open_checkpoints > 0 {
            let prior = self.allowances.get(&key).copied();
            self.journal.push(Undo::Allowance(key.clone(), prior));
        }
        if amount == 0 {
            self.allowances.remove(&key);
        } else {
            self.allowances.insert(key, amount);
        }
    }

    /// Pull `amount` from `from` into `to` using the allowance granted to `spender`
    pub fn transfer_from(
        &mut self,
        currency: &Currency,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: Amount,
    ) -> CoreResult<()> {
        let allowed = self.allowance(currency, from, spender);
        if spender != from && allowed < amount {
            return Err(CoreError::InsufficientAllowance {
                owner: from.clone(),
                spender: spender.clone(),
                currency: currency.clone(),
                available: allowed,
                required: amount,
            });
        }

        self.transfer(currency, from, to, amount)?;

        if spender != from {
            self.approve(currency, from, spender, allowed - amount);
        }
        Ok(())
    }

    fn require_balance(&self, currency: &Currency, account: &Address, amount: Amount) -> CoreResult<Amount> {
        let available = self.balance_of(currency, account);
        if available < amount {
            return Err(CoreError::InsufficientBalance {
                account: account.clone(),
                currency: currency.clone(),
                available,
                required: amount,
            });
        }
        Ok(available)
    }

    fn set_balance(&mut self, currency: &Currency, account: &Address, amount: Amount) {
        let key = (currency.clone(), account.clone());
        if self.open_checkpoints > 0 {
            let prior = self.balances.get(&key).copied();
            self.journal.push(Undo::Balance(key.clone(), prior));
        }
        if amount == 0 {
            self.balances.remove(&key);
        } else {
            self.balances.insert(key, amount);
        }
    }

    fn set_supply(&mut self, currency: &Currency, supply: Amount) {
        if self.open_checkpoints > 0 {
            let prior = self.supplies.get(currency).copied();
            self.journal.push(Undo::Supply(currency.clone(), prior));
        }
        self.supplies.insert(currency.clone(), supply);
    }
}

fn restore_slot<K: Ord>(slots: &mut BTreeMap<K, Amount>, key: K, prior: Option<Amount>) {
    match prior {
        Some(amount) => {
            slots.insert(key, amount);
        }
        None => {
            slots.remove(&key);
        }
    }
}

/// Outstanding obligations held in escrow, keyed by whatever the owner keys
/// its records by
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowBook<K: Ord> {
    held: BTreeMap<K, (Currency, Amount)>,
}

impl<K: Ord> Default for EscrowBook<K> {
    fn default() -> Self {
        EscrowBook {
            held: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> EscrowBook<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Amount still owed out for `key`
    pub fn held(&self, key: &K) -> Amount {
        self.held.get(key).map(|(_, amount)| *amount).unwrap_or(0)
    }

    pub fn credit(&mut self, key: &K, currency: &Currency, amount: Amount) -> CoreResult<()> {
        let current = self.held(key);
        let updated = current
            .checked_add(amount)
            .ok_or(CoreError::Overflow("escrow credit"))?;
        if updated > 0 {
            self.held.insert(key.clone(), (currency.clone(), updated));
        }
        Ok(())
    }

    /// Currency and amount recorded for `key`, if anything is held
    pub fn entry(&self, key: &K) -> Option<(Currency, Amount)> {
        self.held.get(key).cloned()
    }

    /// Put back an entry previously read with `entry`
    pub fn restore(&mut self, key: &K, entry: Option<(Currency, Amount)>) {
        match entry {
            Some(entry) => {
                self.held.insert(key.clone(), entry);
            }
            None => {
                self.held.remove(key);
            }
        }
    }

    /// Drop whatever is recorded for `key`
    pub fn clear(&mut self, key: &K) {
        self.held.remove(key);
    }

    pub fn debit(&mut self, key: &K, amount: Amount) -> CoreResult<()> {
        let current = self.held(key);
        if current < amount {
            return Err(CoreError::EscrowUnderflow {
                held: current,
                requested: amount,
            });
        }
        if current == amount {
            self.held.remove(key);
        } else if let Some(entry) = self.held.get_mut(key) {
            entry.1 = current - amount;
        }
        Ok(())
    }

    /// Sum of all obligations in one currency
    pub fn total(&self, currency: &Currency) -> Amount {
        self.held
            .values()
            .filter(|(c, _)| c == currency)
            .map(|(_, amount)| *amount)
            .sum()
    }

    pub fn currencies(&self) -> Vec<Currency> {
        let mut out: Vec<Currency> = self.held.values().map(|(c, _)| c.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Check that the book matches what `account` actually holds, for every
    /// currency listed (plus every currency the book knows about)
    pub fn verify(&self, ledger: &TokenLedger, account: &Address, currencies: &[Currency]) -> CoreResult<()> {
        let mut all = self.currencies();
        all.extend(currencies.iter().cloned());
        all.sort();
        all.dedup();

        for currency in all {
            let book = self.total(&currency);
            let held = ledger.balance_of(&currency, account);
            if book != held {
                return Err(CoreError::EscrowMismatch {
                    currency,
                    book,
                    ledger: held,
                });
            }
        }
        Ok(())
    }
}
