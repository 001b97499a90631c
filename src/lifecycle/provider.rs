// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Provider side of the exchange.
//!
//! ```text
//! pending → claim_prepared → claim_finalized → claim_signed
//!         → claim_broadcast_and_notify → done
//! ```
//!
//! Before any action is enabled the controller reads the lock and refuses
//! to proceed unless it is addressed to this provider, unexpired, unclaimed
//! and unrefunded. That check is advisory — a counterparty can still settle
//! concurrently — so the ledger's own revert remains the source of truth.
//!
//! Ordering invariant: the encrypted response is transmitted in the same
//! logical step as the claim broadcast, and strictly before it, because the
//! secret becomes public the instant the claim lands. If the response were
//! sent only after a successful claim and the send then failed, the
//! requester could already read the secret off the ledger while holding no
//! payload — the accepted protocol risk this ordering minimizes.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use ring::rand::SystemRandom;
use tracing::{debug, info, warn};

use crate::commitment::{self, Secret};
use crate::error::ProtocolError;
use crate::escrow::{contract, Clock, EscrowReader, Lock, LockId, LockStatus, SystemClock};
use crate::notify::{AccessRequest, AccessResponse, NotificationAdapter, RelayPort};
use crate::payload;

use super::ports::{FinalizedTx, SignedTx, TxHash, TxIntention, WalletError, WalletPort};
use super::TransitionError;

/// Default bound on a single confirmation wait.
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Provider phase, one variant per protocol state.
#[derive(Debug, Clone)]
pub enum ProviderState {
    Pending,
    ClaimPrepared { intention: TxIntention },
    ClaimFinalized { finalized: FinalizedTx },
    ClaimSigned { signed: SignedTx },
    ClaimBroadcastAndNotify { tx_hash: TxHash },
    Done,
}

impl ProviderState {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderState::Pending => "pending",
            ProviderState::ClaimPrepared { .. } => "claim_prepared",
            ProviderState::ClaimFinalized { .. } => "claim_finalized",
            ProviderState::ClaimSigned { .. } => "claim_signed",
            ProviderState::ClaimBroadcastAndNotify { .. } => "claim_broadcast_and_notify",
            ProviderState::Done => "done",
        }
    }
}

/// Completed side effects, as fed back into the state machine.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ClaimIntentionPrepared(TxIntention),
    ClaimFinalizeDone(FinalizedTx),
    ClaimSignDone(SignedTx),
    ClaimBroadcastDone(TxHash),
    ClaimConfirmed,
}

impl ProviderEvent {
    fn name(&self) -> &'static str {
        match self {
            ProviderEvent::ClaimIntentionPrepared(_) => "claim_intention_prepared",
            ProviderEvent::ClaimFinalizeDone(_) => "claim_finalize_done",
            ProviderEvent::ClaimSignDone(_) => "claim_sign_done",
            ProviderEvent::ClaimBroadcastDone(_) => "claim_broadcast_done",
            ProviderEvent::ClaimConfirmed => "claim_confirmed",
        }
    }
}

/// Pure transition function.
pub fn transition(
    state: &ProviderState,
    event: ProviderEvent,
) -> Result<ProviderState, TransitionError> {
    use ProviderEvent as E;
    use ProviderState as S;

    let invalid = TransitionError {
        from: state.name(),
        event: event.name(),
    };

    match (state, event) {
        // A fresh prepare always supersedes a stale one.
        (
            S::Pending | S::ClaimPrepared { .. } | S::ClaimFinalized { .. } | S::ClaimSigned { .. },
            E::ClaimIntentionPrepared(intention),
        ) => Ok(S::ClaimPrepared { intention }),

        (S::ClaimPrepared { .. }, E::ClaimFinalizeDone(finalized)) => {
            Ok(S::ClaimFinalized { finalized })
        }
        (S::ClaimFinalized { .. }, E::ClaimSignDone(signed)) => Ok(S::ClaimSigned { signed }),
        (S::ClaimSigned { .. }, E::ClaimBroadcastDone(tx_hash)) => {
            Ok(S::ClaimBroadcastAndNotify { tx_hash })
        }
        (S::ClaimBroadcastAndNotify { .. }, E::ClaimConfirmed) => Ok(S::Done),

        _ => Err(invalid),
    }
}

/// Driver for the provider role. One instance per incoming request.
pub struct ProviderController<W, E, R>
where
    W: WalletPort,
    E: EscrowReader,
    R: RelayPort,
{
    wallet: W,
    escrow: E,
    adapter: NotificationAdapter<R>,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
    /// Escrow contract address.
    contract: Address,
    request: AccessRequest,
    lock_id: LockId,
    secret: Secret,
    confirmation_timeout: Duration,
    state: ProviderState,
    /// At most one response per lock id decision; a broadcast retry must
    /// not send a second copy.
    response_sent: bool,
}

impl<W, E, R> ProviderController<W, E, R>
where
    W: WalletPort,
    E: EscrowReader,
    R: RelayPort,
{
    /// Build a controller for an incoming request.
    ///
    /// The secret comes from the request itself (requester-generated) or,
    /// for a standing hashlock, from `standing_secret`.
    pub fn new(
        wallet: W,
        escrow: E,
        adapter: NotificationAdapter<R>,
        contract: Address,
        request: AccessRequest,
        standing_secret: Option<Secret>,
    ) -> Result<Self, ProtocolError> {
        let lock_id = request.lock_id()?;
        let secret = request
            .secret()?
            .or(standing_secret)
            .ok_or(ProtocolError::MissingSecret)?;

        Ok(Self {
            wallet,
            escrow,
            adapter,
            clock: Arc::new(SystemClock),
            rng: SystemRandom::new(),
            contract,
            request,
            lock_id,
            secret,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            state: ProviderState::Pending,
            response_sent: false,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn state(&self) -> &ProviderState {
        &self.state
    }

    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    fn apply(&mut self, event: ProviderEvent) -> Result<(), TransitionError> {
        let next = transition(&self.state, event)?;
        debug!(from = self.state.name(), to = next.name(), "Provider transition");
        self.state = next;
        Ok(())
    }

    /// Advisory on-chain validity check, run before any action is enabled.
    ///
    /// Verifies the lock exists, is addressed to this provider, matches the
    /// request's hashlock, is unexpired and unsettled, and that the secret
    /// actually opens the hashlock (fail fast instead of paying gas for a
    /// revert). The result can go stale immediately; the claim itself is
    /// still guarded by the ledger.
    pub async fn validate(&self) -> Result<Lock, ProtocolError> {
        let lock = self.escrow.read_lock(self.lock_id).await?;

        match lock.status(self.clock.now()) {
            LockStatus::Active => {}
            status => return Err(ProtocolError::LockUnavailable { status }),
        }
        if lock.provider != self.wallet.address() {
            return Err(ProtocolError::NotLockProvider);
        }
        if lock.hashlock != self.request.hashlock()? {
            return Err(ProtocolError::HashlockMismatch);
        }
        if !commitment::verify(&self.secret, &lock.hashlock) {
            return Err(ProtocolError::SecretMismatch);
        }

        Ok(lock)
    }

    /// Step 1: validate and assemble the claim intention.
    pub async fn prepare_claim(&mut self) -> Result<(), ProtocolError> {
        self.validate().await?;
        let intention = contract::claim_intention(self.contract, self.lock_id, self.secret.as_word());
        self.apply(ProviderEvent::ClaimIntentionPrepared(intention))?;
        Ok(())
    }

    /// Step 2: external fee calculation.
    pub async fn finalize_claim(&mut self) -> Result<(), ProtocolError> {
        let intention = match &self.state {
            ProviderState::ClaimPrepared { intention } => intention.clone(),
            _ => return Err(self.step_error("claim_finalize")),
        };
        let finalized = self.wallet.finalize(&intention).await?;
        self.apply(ProviderEvent::ClaimFinalizeDone(finalized))?;
        Ok(())
    }

    /// Step 3: sign the claim.
    pub async fn sign_claim(&mut self) -> Result<(), ProtocolError> {
        let finalized = match &self.state {
            ProviderState::ClaimFinalized { finalized } => finalized.clone(),
            _ => return Err(self.step_error("claim_sign")),
        };
        let signed = self.wallet.sign(&finalized).await?;
        self.apply(ProviderEvent::ClaimSignDone(signed))?;
        Ok(())
    }

    /// Step 4: transmit the encrypted payload, then broadcast the claim
    /// that reveals the secret.
    ///
    /// The response goes out first; on a broadcast failure the response is
    /// not re-sent when the step is retried.
    pub async fn broadcast_and_share(&mut self, payload_bytes: &[u8]) -> Result<TxHash, ProtocolError> {
        let signed = match &self.state {
            ProviderState::ClaimSigned { signed } => signed.clone(),
            _ => return Err(self.step_error("claim_broadcast_and_notify")),
        };

        if !self.response_sent {
            let encrypted = payload::encrypt_with_secret(payload_bytes, &self.secret, &self.rng)?;
            let response = AccessResponse {
                lock_id: self.request.lock_id.clone(),
                encrypted_payload: encrypted,
            };
            self.adapter
                .send_response(&self.request.requester_pubkey, &response)
                .await?;
            self.response_sent = true;
        }

        let tx_hash = self.wallet.broadcast(&signed).await?;
        info!(lock_id = %self.lock_id, tx_hash = %tx_hash, "Claim broadcast, secret revealed");
        self.apply(ProviderEvent::ClaimBroadcastDone(tx_hash))?;
        Ok(tx_hash)
    }

    /// Step 5: confirmation. After a timed-out wait or a reverted receipt
    /// the lock is re-read — its state, not the receipt, decides.
    pub async fn confirm_claim(&mut self) -> Result<(), ProtocolError> {
        let tx_hash = match &self.state {
            ProviderState::ClaimBroadcastAndNotify { tx_hash } => *tx_hash,
            _ => return Err(self.step_error("claim_confirm")),
        };

        match self
            .wallet
            .await_confirmation(tx_hash, self.confirmation_timeout)
            .await
        {
            Ok(receipt) if receipt.success => {}
            Ok(_) => {
                let lock = self.escrow.read_lock(self.lock_id).await?;
                if !lock.claimed {
                    return Err(self.settlement_error(&lock, tx_hash));
                }
            }
            Err(WalletError::ConfirmationTimeout) => {
                warn!(tx_hash = %tx_hash, "Claim confirmation timed out, re-reading lock");
                let lock = self.escrow.read_lock(self.lock_id).await?;
                if !lock.claimed {
                    return Err(self.settlement_error(&lock, tx_hash));
                }
            }
            Err(e) => return Err(e.into()),
        }

        self.apply(ProviderEvent::ClaimConfirmed)?;
        info!(lock_id = %self.lock_id, "Claim confirmed, funds received");
        Ok(())
    }

    /// Map an unclaimed-after-attempt lock state to the error a caller can
    /// act on.
    fn settlement_error(&self, lock: &Lock, tx_hash: TxHash) -> ProtocolError {
        match lock.status(self.clock.now()) {
            LockStatus::Refunded => ProtocolError::LockSettled {
                status: LockStatus::Refunded,
            },
            LockStatus::Expired => ProtocolError::Escrow(crate::escrow::EscrowError::Expired),
            LockStatus::Active => ProtocolError::Wallet(WalletError::ConfirmationTimeout),
            _ => ProtocolError::TransactionReverted { tx_hash },
        }
    }

    fn step_error(&self, event: &'static str) -> ProtocolError {
        TransitionError {
            from: self.state.name(),
            event,
        }
        .into()
    }
}
