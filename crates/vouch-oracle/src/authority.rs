/// HIGHER AUTHORITY
///
/// The interface a dispute escalates into, and the terminal resolver that
/// answers it. The resolver's vote itself happens elsewhere; it is delivered
/// here with `push_price`.
///
/// Bond economics at the terminal layer: each side posts bond + final fee.
/// The winner gets back its own stake plus the loser's bond (and any reward);
/// the loser's final fee goes to the fee collector.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vouch_core::{
    Address, AncillaryData, Amount, Currency, EscrowBook, Identifier, Outcome, RequestKey,
    Timestamp,
};

use crate::env::Env;
use crate::error::{OracleError, OracleResult};
use crate::request::PriceRequest;

/// Request/propose/dispute/settle surface of the layer a dispute escalates to
pub trait EscalationAuthority {
    /// Escrow account of this layer
    fn address(&self) -> &Address;

    fn request_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        params: PriceRequest,
    ) -> OracleResult<RequestKey>;

    /// Propose on behalf of `proposer`, pulling the stake from `caller`.
    /// Returns the amount pulled.
    fn propose_price_for(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        proposer: &Address,
        key: &RequestKey,
        proposed: Outcome,
    ) -> OracleResult<Amount>;

    /// Dispute on behalf of `disputer`, pulling the stake from `caller`.
    /// Returns the amount pulled.
    fn dispute_price_for(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        disputer: &Address,
        key: &RequestKey,
    ) -> OracleResult<Amount>;

    fn settle_and_get_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        key: &RequestKey,
    ) -> OracleResult<Outcome>;

    /// Whether a value is available (settled or settleable) for `key`
    fn has_price(&self, env: &Env<'_>, key: &RequestKey) -> bool;

    /// Value of a settled request
    fn get_price(&self, key: &RequestKey) -> OracleResult<Outcome>;

    /// Longest ancillary payload `request_price` accepts here
    fn ancillary_capacity(&self) -> usize;

    /// Forget `key`, opened by an escalation that failed part way. The
    /// caller reverts the ledger movements.
    fn discard(&mut self, key: &RequestKey);
}

/// A question as the voters see it, independent of who asked it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Question {
    pub identifier: Identifier,
    pub timestamp: Timestamp,
    pub ancillary: AncillaryData,
}

impl From<&RequestKey> for Question {
    fn from(key: &RequestKey) -> Self {
        Question {
            identifier: key.identifier.clone(),
            timestamp: key.timestamp,
            ancillary: key.ancillary.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct VoteRequest {
    currency: Currency,
    reward: Amount,
    bond: Amount,
    proposer: Option<(Address, Amount)>,
    disputer: Option<(Address, Amount)>,
    proposed: Option<Outcome>,
    resolved: Option<Outcome>,
}

/// Terminal resolver: holds both sides' stakes and pays out once a vote result
/// has been pushed for the question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingAuthority {
    address: Address,
    fee_collector: Address,
    requests: BTreeMap<RequestKey, VoteRequest>,
    votes: BTreeMap<Question, Outcome>,
    escrow: EscrowBook<RequestKey>,
}

impl VotingAuthority {
    pub fn new(address: Address, fee_collector: Address) -> Self {
        VotingAuthority {
            address,
            fee_collector,
            requests: BTreeMap::new(),
            votes: BTreeMap::new(),
            escrow: EscrowBook::new(),
        }
    }

    /// Deliver the result of a vote. Later pushes for the same question are
    /// ignored; the first answer is final.
    pub fn push_price(&mut self, question: Question, outcome: Outcome) -> bool {
        if self.votes.contains_key(&question) {
            return false;
        }
        info!(
            "Vote resolved {}@{} -> {}",
            question.identifier, question.timestamp, outcome
        );
        self.votes.insert(question, outcome);
        true
    }

    /// Questions that have been asked but not yet voted on
    pub fn pending_questions(&self) -> Vec<Question> {
        let mut pending: Vec<Question> = self
            .requests
            .iter()
            .filter(|(key, request)| {
                request.disputer.is_some()
                    && request.resolved.is_none()
                    && !self.votes.contains_key(&Question::from(*key))
            })
            .map(|(key, _)| Question::from(key))
            .collect();
        pending.sort();
        pending.dedup();
        pending
    }

    pub fn fee_collector(&self) -> &Address {
        &self.fee_collector
    }

    pub fn escrow_of(&self, key: &RequestKey) -> Amount {
        self.escrow.held(key)
    }

    pub fn verify_escrow(&self, env: &Env<'_>) -> OracleResult<()> {
        let currencies: Vec<Currency> = self.requests.values().map(|r| r.currency.clone()).collect();
        self.escrow.verify(&*env.ledger, &self.address, &currencies)?;
        Ok(())
    }

    fn pull(&mut self, env: &mut Env<'_>, caller: &Address, key: &RequestKey, currency: &Currency, amount: Amount) -> OracleResult<()> {
        env.ledger
            .transfer_from(currency, &self.address, caller, &self.address, amount)?;
        self.escrow.credit(key, currency, amount)?;
        Ok(())
    }

    fn pay(&mut self, env: &mut Env<'_>, key: &RequestKey, currency: &Currency, to: &Address, amount: Amount) -> OracleResult<()> {
        self.escrow.debit(key, amount)?;
        env.ledger.transfer(currency, &self.address, to, amount)?;
        Ok(())
    }
}

impl EscalationAuthority for VotingAuthority {
    fn address(&self) -> &Address {
        &self.address
    }

    fn request_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        params: PriceRequest,
    ) -> OracleResult<RequestKey> {
        let key = params.key_for(caller);
        if self.requests.contains_key(&key) {
            return Err(OracleError::RequestAlreadyExists(key.to_string()));
        }
        if params.timestamp > env.now {
            return Err(OracleError::FutureTimestamp {
                timestamp: params.timestamp,
                now: env.now,
            });
        }
        if !env.support.identifiers.is_supported(&params.identifier) {
            return Err(OracleError::UnsupportedIdentifier(params.identifier.to_string()));
        }

        self.pull(env, caller, &key, &params.currency, params.reward)?;
        self.requests.insert(
            key.clone(),
            VoteRequest {
                currency: params.currency,
                reward: params.reward,
                bond: params.bond,
                proposer: None,
                disputer: None,
                proposed: None,
                resolved: None,
            },
        );
        debug!("Vote request opened for {}", key);
        Ok(key)
    }

    fn propose_price_for(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        proposer: &Address,
        key: &RequestKey,
        proposed: Outcome,
    ) -> OracleResult<Amount> {
        let request = self
            .requests
            .get(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        if request.proposer.is_some() {
            return Err(OracleError::AlreadyProposed);
        }
        let currency = request.currency.clone();
        let stake = request
            .bond
            .checked_add(env.fees.final_fee(&currency))
            .ok_or(OracleError::Overflow("proposal stake"))?;

        self.pull(env, caller, key, &currency, stake)?;
        if let Some(request) = self.requests.get_mut(key) {
            request.proposer = Some((proposer.clone(), stake));
            request.proposed = Some(proposed);
        }
        Ok(stake)
    }

    fn dispute_price_for(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        disputer: &Address,
        key: &RequestKey,
    ) -> OracleResult<Amount> {
        let request = self
            .requests
            .get(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        if request.proposer.is_none() {
            return Err(OracleError::NotProposed);
        }
        if request.disputer.is_some() {
            return Err(OracleError::AlreadyDisputed);
        }
        let currency = request.currency.clone();
        let stake = request
            .bond
            .checked_add(env.fees.final_fee(&currency))
            .ok_or(OracleError::Overflow("dispute stake"))?;

        self.pull(env, caller, key, &currency, stake)?;
        if let Some(request) = self.requests.get_mut(key) {
            request.disputer = Some((disputer.clone(), stake));
        }
        info!("Vote requested for {}", key);
        Ok(stake)
    }

    fn settle_and_get_price(
        &mut self,
        env: &mut Env<'_>,
        _caller: &Address,
        key: &RequestKey,
    ) -> OracleResult<Outcome> {
        let request = self
            .requests
            .get(key)
            .cloned()
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        if request.resolved.is_some() {
            return Err(OracleError::AlreadySettled);
        }
        let vote = *self
            .votes
            .get(&Question::from(key))
            .ok_or(OracleError::EscalationPending)?;

        let currency = request.currency.clone();
        match (&request.proposer, &request.disputer) {
            (Some((proposer, proposer_stake)), Some((disputer, disputer_stake))) => {
                let proposer_won = request.proposed == Some(vote);
                let (winner, winner_stake, loser_stake) = if proposer_won {
                    (proposer, *proposer_stake, *disputer_stake)
                } else {
                    (disputer, *disputer_stake, *proposer_stake)
                };
                let loser_fee = loser_stake.saturating_sub(request.bond);
                let payout = winner_stake
                    .checked_add(request.bond.min(loser_stake))
                    .and_then(|p| p.checked_add(request.reward))
                    .ok_or(OracleError::Overflow("vote payout"))?;

                self.pay(env, key, &currency, winner, payout)?;
                let collector = self.fee_collector.clone();
                self.pay(env, key, &currency, &collector, loser_fee)?;
                info!(
                    "Vote settled {}: {} wins {} ({})",
                    key,
                    winner,
                    payout,
                    if proposer_won { "proposal upheld" } else { "proposal overturned" }
                );
            }
            (Some((proposer, stake)), None) => {
                let payout = stake
                    .checked_add(request.reward)
                    .ok_or(OracleError::Overflow("vote payout"))?;
                self.pay(env, key, &currency, proposer, payout)?;
            }
            _ => {
                self.pay(env, key, &currency, &key.requester, request.reward)?;
            }
        }

        if let Some(stored) = self.requests.get_mut(key) {
            stored.resolved = Some(vote);
        }
        Ok(vote)
    }

    fn has_price(&self, _env: &Env<'_>, key: &RequestKey) -> bool {
        self.requests.contains_key(key) && self.votes.contains_key(&Question::from(key))
    }

    fn get_price(&self, key: &RequestKey) -> OracleResult<Outcome> {
        self.requests
            .get(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?
            .resolved
            .ok_or(OracleError::NotSettled)
    }

    fn ancillary_capacity(&self) -> usize {
        usize::MAX
    }

    fn discard(&mut self, key: &RequestKey) {
        if self.requests.remove(key).is_some() {
            debug!("Vote request {} discarded", key);
        }
        self.escrow.clear(key);
    }
}
