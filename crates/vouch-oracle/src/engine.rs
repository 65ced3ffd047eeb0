/// OPTIMISTIC ESCALATION ENGINE
///
/// Request -> propose -> (dispute -> escalate) -> settle, with every unit of
/// collateral accounted for in an escrow book keyed by request.
///
/// SAFETY INVARIANTS:
/// 1. A request key is created at most once
/// 2. Disputes only land on proposed requests, strictly before expiration
/// 3. Undisputed settlement only happens strictly after expiration
/// 4. Escrow held per key == unpaid reward + bond + fee obligations; zero once settled
/// 5. Settled requests never change again
/// 6. The final fee is re-sampled at proposal and at dispute, never cached
/// 7. A failed dispute leaves no trace here or at the authority
///
/// A dispute opens a sub-request at the higher authority, proposes the original
/// value there on the proposer's behalf and immediately disputes it on the
/// disputer's behalf, so the authority answers a single question: was the
/// proposal correct? The sub-request key is stored on the request and polled on
/// settlement.

use log::{debug, info, warn};
use std::collections::BTreeMap;
use vouch_core::{
    Address, Amount, Currency, EscrowBook, LedgerCheckpoint, OracleConfig, Outcome, RequestKey,
};

use crate::ancillary::{stamp_child_request, stamped_len, CHILD_STAMP_LEN};
use crate::authority::EscalationAuthority;
use crate::callbacks::{CallbackSettings, OracleCallback};
use crate::env::Env;
use crate::error::{OracleError, OracleResult};
use crate::request::{PriceRequest, Request, RequestState};

#[derive(Debug, Clone)]
pub struct EscalationEngine<A: EscalationAuthority + Clone> {
    address: Address,
    config: OracleConfig,
    requests: BTreeMap<RequestKey, Request>,
    escrow: EscrowBook<RequestKey>,
    authority: A,
    outbox: Vec<OracleCallback>,
}

impl<A: EscalationAuthority + Clone> EscalationEngine<A> {
    pub fn new(address: Address, config: OracleConfig, authority: A) -> Self {
        EscalationEngine {
            address,
            config,
            requests: BTreeMap::new(),
            escrow: EscrowBook::new(),
            authority,
            outbox: Vec::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub fn authority_mut(&mut self) -> &mut A {
        &mut self.authority
    }

    /// Open a request keyed by (caller, identifier, timestamp, ancillary) and
    /// pull the reward into escrow
    pub fn request_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        params: PriceRequest,
    ) -> OracleResult<RequestKey> {
        let key = params.key_for(caller);

        if params.timestamp > env.now {
            return Err(OracleError::FutureTimestamp {
                timestamp: params.timestamp,
                now: env.now,
            });
        }
        let len = stamped_len(&params.ancillary);
        let limit = self.stamped_limit();
        if len > limit {
            return Err(OracleError::AncillaryTooLong { len, limit });
        }
        if !env.support.identifiers.is_supported(&params.identifier) {
            return Err(OracleError::UnsupportedIdentifier(params.identifier.to_string()));
        }
        if !env.support.collateral.is_supported(&params.currency) {
            return Err(OracleError::UnsupportedCurrency(params.currency.to_string()));
        }
        let liveness = match params.liveness {
            0 => self.config.default_liveness,
            l if l > self.config.max_liveness => return Err(OracleError::InvalidLiveness(l)),
            l => l,
        };
        if self.requests.contains_key(&key) {
            return Err(OracleError::RequestAlreadyExists(key.to_string()));
        }

        env.ledger.transfer_from(
            &params.currency,
            &self.address,
            caller,
            &self.address,
            params.reward,
        )?;

        let final_fee = env.fees.final_fee(&params.currency);
        self.escrow.credit(&key, &params.currency, params.reward)?;
        self.requests
            .insert(key.clone(), Request::new(&params, liveness, final_fee));

        info!(
            "Request {} opened: reward {} bond {} fee {} liveness {}s",
            key, params.reward, params.bond, final_fee, liveness
        );
        Ok(key)
    }

    /// Longest ancillary a request may carry here. Its stamped escalation
    /// payload has to fit this engine's limit and whatever the authority
    /// accepts, so stacked engines shrink the capacity one stamp per layer.
    pub fn ancillary_capacity(&self) -> usize {
        self.stamped_limit().saturating_sub(CHILD_STAMP_LEN)
    }

    fn stamped_limit(&self) -> usize {
        self.config
            .ancillary_bytes_limit
            .min(self.authority.ancillary_capacity())
    }

    /// Choose which lifecycle events are pushed back to the requester
    pub fn set_callbacks(&mut self, caller: &Address, key: &RequestKey, settings: CallbackSettings) -> OracleResult<()> {
        self.open_for_settings(caller, key)?.callbacks = settings;
        Ok(())
    }

    /// Return the reward to the requester as soon as the request is disputed
    pub fn set_refund_on_dispute(&mut self, caller: &Address, key: &RequestKey) -> OracleResult<()> {
        self.open_for_settings(caller, key)?.refund_on_dispute = true;
        Ok(())
    }

    fn open_for_settings(&mut self, caller: &Address, key: &RequestKey) -> OracleResult<&mut Request> {
        if &key.requester != caller {
            return Err(OracleError::Unauthorized(format!(
                "{} is not the requester of {}",
                caller, key
            )));
        }
        let request = self
            .requests
            .get_mut(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        if request.proposer.is_some() || request.settled {
            return Err(OracleError::SettingsLocked);
        }
        Ok(request)
    }

    pub fn propose_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        key: &RequestKey,
        proposed: Outcome,
    ) -> OracleResult<Amount> {
        self.propose_price_for(env, caller, caller, key, proposed)
    }

    /// Propose `proposed` for `proposer`, pulling bond + current final fee from
    /// `caller`. Returns the amount pulled.
    pub fn propose_price_for(
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
        if request.settled {
            return Err(OracleError::AlreadySettled);
        }
        if request.proposer.is_some() {
            return Err(OracleError::AlreadyProposed);
        }

        let currency = request.currency.clone();
        let fee_now = env.fees.final_fee(&currency);
        let stake = request
            .bond
            .checked_add(fee_now)
            .ok_or(OracleError::Overflow("proposal stake"))?;
        let expiration = env
            .now
            .checked_add(request.liveness)
            .ok_or(OracleError::Overflow("expiration time"))?;
        let snapshot_fee = request.final_fee;

        env.ledger
            .transfer_from(&currency, &self.address, caller, &self.address, stake)?;
        self.escrow.credit(key, &currency, stake)?;

        let request = self
            .requests
            .get_mut(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        if fee_now != snapshot_fee {
            debug!(
                "Final fee for {} moved {} -> {} before proposal",
                key, snapshot_fee, fee_now
            );
        }
        request.final_fee = fee_now;
        request.proposer = Some(proposer.clone());
        request.proposed = Some(proposed);
        request.expiration_time = Some(expiration);
        let notify = request.callbacks.on_proposed;

        info!(
            "Request {} proposed {} by {} (expires {})",
            key, proposed, proposer, expiration
        );
        if notify {
            self.outbox.push(OracleCallback::PriceProposed {
                key: key.clone(),
                proposed,
            });
        }
        Ok(stake)
    }

    pub fn dispute_price(&mut self, env: &mut Env<'_>, caller: &Address, key: &RequestKey) -> OracleResult<Amount> {
        self.dispute_price_for(env, caller, caller, key)
    }

    /// Dispute the proposal on behalf of `disputer`, pulling the stake from
    /// `caller`, and escalate to the higher authority. Returns the amount pulled.
    ///
    /// With `delta = fee_now - fee_at_proposal`:
    /// - delta >= 0: caller pays bond + fee_at_proposal + 2 * delta, covering
    ///   the proposer's shortfall so both sides carry fee_now
    /// - delta < 0: caller pays bond + fee_now and the proposer is refunded
    ///   |delta|, so both sides again carry fee_now
    pub fn dispute_price_for(
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
        if request.settled {
            return Err(OracleError::AlreadySettled);
        }
        if request.disputer.is_some() {
            return Err(OracleError::AlreadyDisputed);
        }
        let expiration = match (&request.proposer, request.expiration_time) {
            (Some(_), Some(expiration)) => expiration,
            _ => return Err(OracleError::NotProposed),
        };
        if env.now >= expiration {
            return Err(OracleError::LivenessExpired {
                expiration,
                now: env.now,
            });
        }

        let checkpoint = self.checkpoint(env, key);
        let mut opened = None;
        match self.escalate(env, caller, disputer, key, &mut opened) {
            Ok(pulled) => {
                env.ledger.commit(checkpoint.ledger);
                Ok(pulled)
            }
            Err(err) => {
                warn!("Rolling back dispute of {}: {}", key, err);
                if let Some(sub_key) = opened {
                    self.authority.discard(&sub_key);
                }
                self.restore(env, key, checkpoint);
                Err(err)
            }
        }
    }

    fn escalate(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        disputer: &Address,
        key: &RequestKey,
        opened: &mut Option<RequestKey>,
    ) -> OracleResult<Amount> {
        let request = self
            .requests
            .get(key)
            .cloned()
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        let proposer = request.proposer.clone().ok_or(OracleError::NotProposed)?;
        let proposed = request.proposed.ok_or(OracleError::NotProposed)?;
        let currency = request.currency.clone();

        let fee_now = env.fees.final_fee(&currency);
        let (pulled, proposer_refund, delta) = dispute_terms(&request, fee_now)?;

        env.ledger
            .transfer_from(&currency, &self.address, caller, &self.address, pulled)?;
        self.escrow.credit(key, &currency, pulled)?;

        if proposer_refund > 0 {
            self.pay_out(env, key, &currency, &proposer, proposer_refund)?;
            debug!("Refunded {} fee surplus to proposer {} of {}", proposer_refund, proposer, key);
        } else if delta > 0 {
            debug!("Disputer of {} covered fee increase of {} for both sides", key, delta);
        }

        let refund = if request.refund_on_dispute && request.reward > 0 {
            self.pay_out(env, key, &currency, &key.requester, request.reward)?;
            request.reward
        } else {
            0
        };

        // Each side now carries bond + fee_now; both stakes move up one layer
        let stake = request
            .bond
            .checked_add(fee_now)
            .ok_or(OracleError::Overflow("escalation stake"))?;
        let escalation =
            self.open_escalation(env, key, &request, &proposer, disputer, proposed, stake, opened)?;
        self.escrow.debit(key, stake.saturating_mul(2))?;

        let remaining_reward = request.reward - refund;
        if self.escrow.held(key) != remaining_reward {
            return Err(OracleError::EscrowMismatch {
                expected: remaining_reward,
                actual: self.escrow.held(key),
            });
        }

        let stored = self
            .requests
            .get_mut(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        stored.disputer = Some(disputer.clone());
        stored.final_fee = fee_now;
        stored.reward = remaining_reward;
        stored.escalation = Some(escalation.clone());
        let notify = stored.callbacks.on_disputed;

        info!(
            "Request {} disputed by {}; escalated as {}",
            key, disputer, escalation
        );
        if notify {
            self.outbox.push(OracleCallback::PriceDisputed {
                key: key.clone(),
                refund,
            });
        }
        Ok(pulled)
    }

    #[allow(clippy::too_many_arguments)]
    fn open_escalation(
        &mut self,
        env: &mut Env<'_>,
        key: &RequestKey,
        request: &Request,
        proposer: &Address,
        disputer: &Address,
        proposed: Outcome,
        stake: Amount,
        opened: &mut Option<RequestKey>,
    ) -> OracleResult<RequestKey> {
        let params = PriceRequest {
            identifier: key.identifier.clone(),
            timestamp: key.timestamp,
            ancillary: stamp_child_request(key),
            currency: request.currency.clone(),
            reward: 0,
            bond: request.bond,
            liveness: request.liveness,
        };
        let authority_address = self.authority.address().clone();
        let sub_key = self.authority.request_price(env, &self.address, params)?;
        *opened = Some(sub_key.clone());

        env.ledger
            .approve(&request.currency, &self.address, &authority_address, stake);
        let proposer_side = self
            .authority
            .propose_price_for(env, &self.address, proposer, &sub_key, proposed)?;
        env.ledger
            .approve(&request.currency, &self.address, &authority_address, stake);
        let disputer_side = self
            .authority
            .dispute_price_for(env, &self.address, disputer, &sub_key)?;
        env.ledger
            .approve(&request.currency, &self.address, &authority_address, 0);

        for side in [proposer_side, disputer_side] {
            if side != stake {
                return Err(OracleError::EscrowMismatch {
                    expected: stake,
                    actual: side,
                });
            }
        }
        Ok(sub_key)
    }

    /// Settle the request and return its value.
    ///
    /// Undisputed: only strictly after expiration; the proposer receives
    /// bond + fee + reward. Disputed: only once the authority has an answer;
    /// the proposal stands when the authority agrees with it, otherwise the
    /// authority's value replaces it. The reward follows the winning side.
    pub fn settle_and_get_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        key: &RequestKey,
    ) -> OracleResult<Outcome> {
        let request = self
            .requests
            .get(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        if request.settled {
            return Err(OracleError::AlreadySettled);
        }
        if request.proposer.is_none() {
            return Err(OracleError::NotProposed);
        }

        self.finalize(env, caller, key)
    }

    /// Every check runs before the first payout, so a failure leaves nothing
    /// to undo
    fn finalize(&mut self, env: &mut Env<'_>, caller: &Address, key: &RequestKey) -> OracleResult<Outcome> {
        let request = self
            .requests
            .get(key)
            .cloned()
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        let proposer = request.proposer.clone().ok_or(OracleError::NotProposed)?;
        let proposed = request.proposed.ok_or(OracleError::NotProposed)?;
        let currency = request.currency.clone();

        let resolved = match (&request.disputer, &request.escalation) {
            (None, _) => {
                let expiration = request.expiration_time.ok_or(OracleError::NotProposed)?;
                if env.now <= expiration {
                    return Err(OracleError::LivenessNotElapsed {
                        expiration,
                        now: env.now,
                    });
                }
                let payout = request
                    .stake()
                    .and_then(|stake| stake.checked_add(request.reward))
                    .ok_or(OracleError::Overflow("settlement payout"))?;
                if self.escrow.held(key) != payout {
                    return Err(OracleError::EscrowMismatch {
                        expected: payout,
                        actual: self.escrow.held(key),
                    });
                }
                self.pay_out(env, key, &currency, &proposer, payout)?;
                proposed
            }
            (Some(disputer), Some(escalation)) => {
                if !self.authority.has_price(env, escalation) {
                    return Err(OracleError::EscalationPending);
                }
                if self.escrow.held(key) != request.reward {
                    return Err(OracleError::EscrowMismatch {
                        expected: request.reward,
                        actual: self.escrow.held(key),
                    });
                }
                let verdict = match self.authority.get_price(escalation) {
                    Ok(outcome) => outcome,
                    Err(_) => self
                        .authority
                        .settle_and_get_price(env, &self.address, escalation)?,
                };
                let upheld = verdict == proposed;
                let winner = if upheld { &proposer } else { disputer };
                self.pay_out(env, key, &currency, winner, request.reward)?;
                debug!(
                    "Escalation {} answered {}: proposal {}",
                    escalation,
                    verdict,
                    if upheld { "upheld" } else { "overturned" }
                );
                if upheld {
                    proposed
                } else {
                    verdict
                }
            }
            (Some(_), None) => {
                warn!("Request {} is disputed without an escalation key", key);
                return Err(OracleError::EscalationPending);
            }
        };

        if self.escrow.held(key) != 0 {
            return Err(OracleError::EscrowMismatch {
                expected: 0,
                actual: self.escrow.held(key),
            });
        }

        let stored = self
            .requests
            .get_mut(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        stored.settled = true;
        stored.resolved = Some(resolved);
        let notify = stored.callbacks.on_settled;

        info!("Request {} settled at {} (by {})", key, resolved, caller);
        if notify {
            self.outbox.push(OracleCallback::PriceSettled {
                key: key.clone(),
                outcome: resolved,
            });
        }
        Ok(resolved)
    }

    /// Amount a dispute of `key` would pull from its funder at the current fee
    pub fn dispute_stake(&self, env: &Env<'_>, key: &RequestKey) -> OracleResult<Amount> {
        let request = self
            .requests
            .get(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        let (pulled, _, _) = dispute_terms(request, env.fees.final_fee(&request.currency))?;
        Ok(pulled)
    }

    /// Value of a settled request
    pub fn get_price(&self, key: &RequestKey) -> OracleResult<Outcome> {
        let request = self
            .requests
            .get(key)
            .ok_or_else(|| OracleError::RequestNotFound(key.to_string()))?;
        match (request.settled, request.resolved) {
            (true, Some(outcome)) => Ok(outcome),
            _ => Err(OracleError::NotSettled),
        }
    }

    pub fn get_request(&self, key: &RequestKey) -> Option<&Request> {
        self.requests.get(key)
    }

    pub fn get_state(&self, env: &Env<'_>, key: &RequestKey) -> RequestState {
        match self.requests.get(key) {
            None => RequestState::Invalid,
            Some(request) => match request.local_state(env.now) {
                RequestState::Disputed => match &request.escalation {
                    Some(escalation) if self.authority.has_price(env, escalation) => {
                        RequestState::Resolved
                    }
                    _ => RequestState::Disputed,
                },
                state => state,
            },
        }
    }

    /// Whether `settle_and_get_price` would produce a value now
    pub fn has_price(&self, env: &Env<'_>, key: &RequestKey) -> bool {
        matches!(
            self.get_state(env, key),
            RequestState::Expired | RequestState::Resolved | RequestState::Settled
        )
    }

    /// Amount still held in escrow for `key`
    pub fn escrow_of(&self, key: &RequestKey) -> Amount {
        self.escrow.held(key)
    }

    /// Check the escrow book against the engine's ledger balances
    pub fn verify_escrow(&self, env: &Env<'_>) -> OracleResult<()> {
        let currencies: Vec<_> = self.requests.values().map(|r| r.currency.clone()).collect();
        self.escrow.verify(&*env.ledger, &self.address, &currencies)?;
        Ok(())
    }

    /// Hand queued consumer callbacks to the host, oldest first
    pub fn drain_callbacks(&mut self) -> Vec<OracleCallback> {
        std::mem::take(&mut self.outbox)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    fn pay_out(
        &mut self,
        env: &mut Env<'_>,
        key: &RequestKey,
        currency: &Currency,
        to: &Address,
        amount: Amount,
    ) -> OracleResult<()> {
        self.escrow.debit(key, amount)?;
        env.ledger.transfer(currency, &self.address, to, amount)?;
        Ok(())
    }

    fn checkpoint(&self, env: &mut Env<'_>, key: &RequestKey) -> RequestCheckpoint {
        RequestCheckpoint {
            request: self.requests.get(key).cloned(),
            escrow: self.escrow.entry(key),
            outbox: self.outbox.len(),
            ledger: env.ledger.checkpoint(),
        }
    }

    /// Put `key`'s record, its escrow entry, the outbox and the ledger back
    /// where `checkpoint` found them
    fn restore(&mut self, env: &mut Env<'_>, key: &RequestKey, checkpoint: RequestCheckpoint) {
        env.ledger.revert(checkpoint.ledger);
        match checkpoint.request {
            Some(request) => {
                self.requests.insert(key.clone(), request);
            }
            None => {
                self.requests.remove(key);
            }
        }
        self.escrow.restore(key, checkpoint.escrow);
        self.outbox.truncate(checkpoint.outbox);
    }
}

/// State a dispute may touch, captured before it starts. Other requests are
/// never written by a dispute, so only this one record is kept.
struct RequestCheckpoint {
    request: Option<Request>,
    escrow: Option<(Currency, Amount)>,
    outbox: usize,
    ledger: LedgerCheckpoint,
}

/// (amount pulled from the funder, refund owed to the proposer, fee delta)
fn dispute_terms(request: &Request, fee_now: Amount) -> OracleResult<(Amount, Amount, i128)> {
    let delta = signed(fee_now)? - signed(request.final_fee)?;
    if delta >= 0 {
        let surcharge = unsigned(delta.checked_mul(2).ok_or(OracleError::Overflow("fee delta"))?)?;
        let pulled = request
            .bond
            .checked_add(request.final_fee)
            .and_then(|a| a.checked_add(surcharge))
            .ok_or(OracleError::Overflow("dispute stake"))?;
        Ok((pulled, 0, delta))
    } else {
        let pulled = request
            .bond
            .checked_add(fee_now)
            .ok_or(OracleError::Overflow("dispute stake"))?;
        Ok((pulled, unsigned(-delta)?, delta))
    }
}

fn signed(amount: Amount) -> OracleResult<i128> {
    i128::try_from(amount).map_err(|_| OracleError::Overflow("fee conversion"))
}

fn unsigned(value: i128) -> OracleResult<Amount> {
    Amount::try_from(value).map_err(|_| OracleError::Overflow("fee conversion"))
}

/// An engine is itself a valid higher authority, so layers can be stacked
impl<A: EscalationAuthority + Clone> EscalationAuthority for EscalationEngine<A> {
    fn address(&self) -> &Address {
        &self.address
    }

    fn request_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        params: PriceRequest,
    ) -> OracleResult<RequestKey> {
        EscalationEngine::request_price(self, env, caller, params)
    }

    fn propose_price_for(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        proposer: &Address,
        key: &RequestKey,
        proposed: Outcome,
    ) -> OracleResult<Amount> {
        EscalationEngine::propose_price_for(self, env, caller, proposer, key, proposed)
    }

    fn dispute_price_for(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        disputer: &Address,
        key: &RequestKey,
    ) -> OracleResult<Amount> {
        EscalationEngine::dispute_price_for(self, env, caller, disputer, key)
    }

    fn settle_and_get_price(
        &mut self,
        env: &mut Env<'_>,
        caller: &Address,
        key: &RequestKey,
    ) -> OracleResult<Outcome> {
        EscalationEngine::settle_and_get_price(self, env, caller, key)
    }

    fn has_price(&self, env: &Env<'_>, key: &RequestKey) -> bool {
        EscalationEngine::has_price(self, env, key)
    }

    fn get_price(&self, key: &RequestKey) -> OracleResult<Outcome> {
        EscalationEngine::get_price(self, key)
    }

    fn ancillary_capacity(&self) -> usize {
        EscalationEngine::ancillary_capacity(self)
    }

    fn discard(&mut self, key: &RequestKey) {
        if let Some(request) = self.requests.remove(key) {
            if let Some(escalation) = request.escalation {
                self.authority.discard(&escalation);
            }
            debug!("Request {} discarded", key);
        }
        self.escrow.clear(key);
        self.outbox.retain(|callback| callback.key() != key);
    }
}
