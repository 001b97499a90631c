// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Requester side of the exchange.
//!
//! Drives lock placement and notification, and the refund sub-flow once a
//! lock is observed expired and unclaimed:
//!
//! ```text
//! idle → secret_generated → lock_prepared → lock_finalized → lock_signed
//!      → lock_broadcast → notified
//!                  └──(expired & unclaimed)──→ refund_prepared → ... → refunded
//! ```
//!
//! Transitions are pure ([`transition`]); the controller performs the I/O
//! and applies the resulting event. A failed step leaves the phase state
//! untouched so the exact same step can be retried; re-running a prepare
//! step always supersedes prior prepared-but-unsent material.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use ring::rand::SystemRandom;
use tracing::{debug, info, warn};

use crate::commitment::{self, Secret};
use crate::error::ProtocolError;
use crate::escrow::{
    contract, format_amount, Clock, EscrowReader, Hashlock, LockDiscovery, LockId, LockStatus,
    SystemClock,
};
use crate::notify::{
    AccessRequest, AccessResponse, NotificationAdapter, OutgoingRequestBackup,
    OutgoingRequestView, RelayPort,
};
use crate::payload;

use super::ports::{FinalizedTx, SignedTx, TxHash, TxIntention, WalletError, WalletPort};
use super::TransitionError;

/// Default bound on a single confirmation wait.
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Immutable parameters of one access request.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub provider_evm: Address,
    /// The provider's transport pubkey for notifications.
    pub provider_pubkey: String,
    pub amount_wei: U256,
    /// Relative timelock handed to the contract (seconds).
    pub timelock_duration: u64,
    /// A hashlock the provider has pre-published. When present, no secret
    /// is generated; the provider is assumed to hold the preimage.
    pub standing_hashlock: Option<Hashlock>,
}

/// Requester phase, one variant per protocol state. Variants carry only the
/// artifact the next step consumes.
#[derive(Debug, Clone)]
pub enum RequesterState {
    Idle,
    SecretGenerated,
    LockPrepared { intention: TxIntention },
    LockFinalized { finalized: FinalizedTx },
    LockSigned { signed: SignedTx },
    LockBroadcast { tx_hash: TxHash },
    Notified,
    RefundPrepared { intention: TxIntention },
    RefundFinalized { finalized: FinalizedTx },
    RefundSigned { signed: SignedTx },
    RefundBroadcast { tx_hash: TxHash },
    Refunded,
}

impl RequesterState {
    pub fn name(&self) -> &'static str {
        match self {
            RequesterState::Idle => "idle",
            RequesterState::SecretGenerated => "secret_generated",
            RequesterState::LockPrepared { .. } => "lock_prepared",
            RequesterState::LockFinalized { .. } => "lock_finalized",
            RequesterState::LockSigned { .. } => "lock_signed",
            RequesterState::LockBroadcast { .. } => "lock_broadcast",
            RequesterState::Notified => "notified",
            RequesterState::RefundPrepared { .. } => "refund_prepared",
            RequesterState::RefundFinalized { .. } => "refund_finalized",
            RequesterState::RefundSigned { .. } => "refund_signed",
            RequesterState::RefundBroadcast { .. } => "refund_broadcast",
            RequesterState::Refunded => "refunded",
        }
    }
}

/// Completed side effects, as fed back into the state machine.
#[derive(Debug, Clone)]
pub enum RequesterEvent {
    SecretReady,
    LockIntentionPrepared(TxIntention),
    LockFinalizeDone(FinalizedTx),
    LockSignDone(SignedTx),
    LockBroadcastDone(TxHash),
    ProviderNotified,
    RefundIntentionPrepared(TxIntention),
    RefundFinalizeDone(FinalizedTx),
    RefundSignDone(SignedTx),
    RefundBroadcastDone(TxHash),
    RefundConfirmed,
    /// Walk away before anything was broadcast. Safe: no external state has
    /// been mutated yet.
    Abandoned,
}

impl RequesterEvent {
    fn name(&self) -> &'static str {
        match self {
            RequesterEvent::SecretReady => "secret_ready",
            RequesterEvent::LockIntentionPrepared(_) => "lock_intention_prepared",
            RequesterEvent::LockFinalizeDone(_) => "lock_finalize_done",
            RequesterEvent::LockSignDone(_) => "lock_sign_done",
            RequesterEvent::LockBroadcastDone(_) => "lock_broadcast_done",
            RequesterEvent::ProviderNotified => "provider_notified",
            RequesterEvent::RefundIntentionPrepared(_) => "refund_intention_prepared",
            RequesterEvent::RefundFinalizeDone(_) => "refund_finalize_done",
            RequesterEvent::RefundSignDone(_) => "refund_sign_done",
            RequesterEvent::RefundBroadcastDone(_) => "refund_broadcast_done",
            RequesterEvent::RefundConfirmed => "refund_confirmed",
            RequesterEvent::Abandoned => "abandoned",
        }
    }
}

/// Pure transition function.
pub fn transition(
    state: &RequesterState,
    event: RequesterEvent,
) -> Result<RequesterState, TransitionError> {
    use RequesterEvent as E;
    use RequesterState as S;

    let invalid = TransitionError {
        from: state.name(),
        event: event.name(),
    };

    match (state, event) {
        (S::Idle | S::SecretGenerated, E::SecretReady) => Ok(S::SecretGenerated),

        // A fresh prepare always supersedes a stale one.
        (
            S::SecretGenerated
            | S::LockPrepared { .. }
            | S::LockFinalized { .. }
            | S::LockSigned { .. },
            E::LockIntentionPrepared(intention),
        ) => Ok(S::LockPrepared { intention }),

        (S::LockPrepared { .. }, E::LockFinalizeDone(finalized)) => {
            Ok(S::LockFinalized { finalized })
        }
        (S::LockFinalized { .. }, E::LockSignDone(signed)) => Ok(S::LockSigned { signed }),
        (S::LockSigned { .. }, E::LockBroadcastDone(tx_hash)) => {
            Ok(S::LockBroadcast { tx_hash })
        }
        (S::LockBroadcast { .. }, E::ProviderNotified) => Ok(S::Notified),

        // Refund sub-flow: available from any post-broadcast state.
        (
            S::LockBroadcast { .. }
            | S::Notified
            | S::RefundPrepared { .. }
            | S::RefundFinalized { .. }
            | S::RefundSigned { .. },
            E::RefundIntentionPrepared(intention),
        ) => Ok(S::RefundPrepared { intention }),

        (S::RefundPrepared { .. }, E::RefundFinalizeDone(finalized)) => {
            Ok(S::RefundFinalized { finalized })
        }
        (S::RefundFinalized { .. }, E::RefundSignDone(signed)) => Ok(S::RefundSigned { signed }),
        (S::RefundSigned { .. }, E::RefundBroadcastDone(tx_hash)) => {
            Ok(S::RefundBroadcast { tx_hash })
        }
        (S::RefundBroadcast { .. }, E::RefundConfirmed) => Ok(S::Refunded),

        // Abandoning is only safe while nothing has been broadcast.
        (
            S::Idle
            | S::SecretGenerated
            | S::LockPrepared { .. }
            | S::LockFinalized { .. }
            | S::LockSigned { .. },
            E::Abandoned,
        ) => Ok(S::Idle),

        _ => Err(invalid),
    }
}

/// Driver for the requester role. One instance per access request.
pub struct RequesterController<W, E, R>
where
    W: WalletPort,
    E: EscrowReader + LockDiscovery,
    R: RelayPort,
{
    wallet: W,
    escrow: E,
    adapter: NotificationAdapter<R>,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
    /// Escrow contract address.
    contract: Address,
    params: RequestParams,
    confirmation_timeout: Duration,
    state: RequesterState,
    secret: Option<Secret>,
    hashlock: Option<Hashlock>,
    lock_tx_hash: Option<TxHash>,
    lock_id: Option<LockId>,
}

impl<W, E, R> RequesterController<W, E, R>
where
    W: WalletPort,
    E: EscrowReader + LockDiscovery,
    R: RelayPort,
{
    pub fn new(
        wallet: W,
        escrow: E,
        adapter: NotificationAdapter<R>,
        contract: Address,
        params: RequestParams,
    ) -> Self {
        Self {
            wallet,
            escrow,
            adapter,
            clock: Arc::new(SystemClock),
            rng: SystemRandom::new(),
            contract,
            params,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
            state: RequesterState::Idle,
            secret: None,
            hashlock: None,
            lock_tx_hash: None,
            lock_id: None,
        }
    }

    /// Rebuild a controller for an already-notified request from its
    /// self-backup, as read back off the notification channel.
    pub fn resume_from_backup(
        wallet: W,
        escrow: E,
        adapter: NotificationAdapter<R>,
        contract: Address,
        view: &OutgoingRequestView,
    ) -> Result<Self, ProtocolError> {
        let backup = &view.backup;
        let secret = backup.secret()?;
        let hashlock = backup
            .hashlock
            .parse()
            .map_err(|_| ProtocolError::Notify(crate::notify::NotifyError::Malformed(
                format!("bad hashlock in backup: {}", backup.hashlock),
            )))?;
        let lock_id = backup.lock_id()?;
        let params = RequestParams {
            provider_evm: backup.provider_evm.parse().map_err(|_| {
                ProtocolError::Notify(crate::notify::NotifyError::Malformed(format!(
                    "bad providerEVM in backup: {}",
                    backup.provider_evm
                )))
            })?,
            provider_pubkey: backup.provider_pubkey.clone(),
            amount_wei: crate::escrow::parse_amount(&backup.amount)
                .map_err(|e| ProtocolError::Notify(crate::notify::NotifyError::Malformed(e.to_string())))?,
            timelock_duration: 0,
            standing_hashlock: secret.is_none().then_some(hashlock),
        };

        let mut controller = Self::new(wallet, escrow, adapter, contract, params);
        controller.state = RequesterState::Notified;
        controller.secret = secret;
        controller.hashlock = Some(hashlock);
        controller.lock_id = Some(lock_id);
        controller.lock_tx_hash = backup.tx_hash.parse().ok();
        Ok(controller)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn state(&self) -> &RequesterState {
        &self.state
    }

    pub fn secret(&self) -> Option<&Secret> {
        self.secret.as_ref()
    }

    pub fn hashlock(&self) -> Option<Hashlock> {
        self.hashlock
    }

    pub fn lock_id(&self) -> Option<LockId> {
        self.lock_id
    }

    /// Hash of the lock transaction, once broadcast.
    pub fn lock_tx_hash(&self) -> Option<TxHash> {
        self.lock_tx_hash
    }

    fn apply(&mut self, event: RequesterEvent) -> Result<(), TransitionError> {
        let next = transition(&self.state, event)?;
        debug!(from = self.state.name(), to = next.name(), "Requester transition");
        self.state = next;
        Ok(())
    }

    /// Step 1: establish the secret/hashlock commitment.
    ///
    /// Uses the provider's standing hashlock when one is published;
    /// otherwise generates a fresh 32-byte secret. Safe to re-run until the
    /// lock is prepared.
    pub fn generate_secret(&mut self) -> Result<Hashlock, ProtocolError> {
        let (secret, hashlock) = match self.params.standing_hashlock {
            Some(hashlock) => (None, hashlock),
            None => {
                let secret = commitment::generate_secret(&self.rng)?;
                let hashlock = commitment::hashlock(&secret);
                (Some(secret), hashlock)
            }
        };

        self.apply(RequesterEvent::SecretReady)?;
        self.secret = secret;
        self.hashlock = Some(hashlock);
        Ok(hashlock)
    }

    /// Step 2: assemble the lock intention. No external effect; always safe
    /// to re-run, and a re-run resets any prepared-but-unsent state.
    pub fn prepare_lock(&mut self) -> Result<(), ProtocolError> {
        let hashlock = self.hashlock.ok_or(ProtocolError::NoCommitment)?;
        let intention = contract::lock_intention(
            self.contract,
            self.params.provider_evm,
            hashlock,
            self.params.timelock_duration,
            self.params.amount_wei,
        );
        self.apply(RequesterEvent::LockIntentionPrepared(intention))?;
        Ok(())
    }

    /// Step 3: external fee calculation; produces the material to sign.
    pub async fn finalize_lock(&mut self) -> Result<(), ProtocolError> {
        let RequesterState::LockPrepared { intention } = &self.state else {
            return Err(self.step_error("lock_finalize"));
        };
        let finalized = self.wallet.finalize(&intention.clone()).await?;
        self.apply(RequesterEvent::LockFinalizeDone(finalized))?;
        Ok(())
    }

    /// Step 4: sign the finalized lock transaction.
    pub async fn sign_lock(&mut self) -> Result<(), ProtocolError> {
        let RequesterState::LockFinalized { finalized } = &self.state else {
            return Err(self.step_error("lock_sign"));
        };
        let signed = self.wallet.sign(&finalized.clone()).await?;
        self.apply(RequesterEvent::LockSignDone(signed))?;
        Ok(())
    }

    /// Step 5: broadcast. Once this succeeds the transaction cannot be
    /// withdrawn.
    pub async fn broadcast_lock(&mut self) -> Result<TxHash, ProtocolError> {
        let RequesterState::LockSigned { signed } = &self.state else {
            return Err(self.step_error("lock_broadcast"));
        };
        let tx_hash = self.wallet.broadcast(&signed.clone()).await?;
        info!(tx_hash = %tx_hash, "Lock transaction broadcast");
        self.apply(RequesterEvent::LockBroadcastDone(tx_hash))?;
        self.lock_tx_hash = Some(tx_hash);
        Ok(tx_hash)
    }

    /// Step 6: wait for inclusion and resolve the authoritative lock id
    /// from the `Locked` event.
    ///
    /// A timed-out wait does not imply failure: the receipt is re-queried
    /// once before the timeout is surfaced, and the step stays retryable.
    pub async fn confirm_lock(&mut self) -> Result<LockId, ProtocolError> {
        if let Some(lock_id) = self.lock_id {
            return Ok(lock_id);
        }
        let RequesterState::LockBroadcast { tx_hash } = &self.state else {
            return Err(self.step_error("lock_confirm"));
        };
        let tx_hash = *tx_hash;

        let receipt = match self
            .wallet
            .await_confirmation(tx_hash, self.confirmation_timeout)
            .await
        {
            Ok(receipt) => receipt,
            Err(WalletError::ConfirmationTimeout) => {
                warn!(tx_hash = %tx_hash, "Confirmation wait timed out, re-querying receipt");
                match self.wallet.transaction_status(tx_hash).await? {
                    Some(receipt) => receipt,
                    None => return Err(WalletError::ConfirmationTimeout.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        if !receipt.success {
            return Err(ProtocolError::TransactionReverted { tx_hash });
        }

        let lock_id = self
            .escrow
            .find_lock_id(tx_hash, receipt.block_number)
            .await?
            .ok_or(ProtocolError::LockIdNotFound { tx_hash })?;

        info!(tx_hash = %tx_hash, lock_id = %lock_id, "Lock confirmed");
        self.lock_id = Some(lock_id);
        Ok(lock_id)
    }

    /// Step 7: notify the provider, with the self-addressed backup that
    /// alone persists the secret.
    pub async fn notify_provider(&mut self) -> Result<LockId, ProtocolError> {
        let RequesterState::LockBroadcast { tx_hash } = &self.state else {
            return Err(self.step_error("notify_provider"));
        };
        let tx_hash = *tx_hash;
        let lock_id = self.lock_id.ok_or(ProtocolError::LockIdUnknown)?;
        let hashlock = self.hashlock.ok_or(ProtocolError::NoCommitment)?;

        let amount = format_amount(self.params.amount_wei);
        let timestamp = self.clock.now();
        let secret_hex = self.secret.as_ref().map(Secret::to_hex);

        let request = AccessRequest {
            lock_id: format!("{lock_id:#x}"),
            tx_hash: format!("{tx_hash:#x}"),
            hashlock: format!("{hashlock:#x}"),
            amount: amount.clone(),
            requester_pubkey: self.adapter.identity().to_string(),
            requester_evm: self.wallet.address().to_string(),
            timestamp,
            secret: secret_hex.clone(),
        };
        let backup = OutgoingRequestBackup {
            lock_id: format!("{lock_id:#x}"),
            tx_hash: format!("{tx_hash:#x}"),
            hashlock: format!("{hashlock:#x}"),
            amount,
            provider_pubkey: self.params.provider_pubkey.clone(),
            provider_evm: self.params.provider_evm.to_string(),
            timestamp,
            secret: secret_hex,
        };

        self.adapter
            .send_request(&self.params.provider_pubkey, &request, &backup)
            .await?;
        self.apply(RequesterEvent::ProviderNotified)?;
        Ok(lock_id)
    }

    /// Whether the refund sub-flow is currently available: the lock is
    /// observed expired and unclaimed. Advisory; the ledger remains the
    /// source of truth.
    pub async fn refund_available(&self) -> Result<bool, ProtocolError> {
        let Some(lock_id) = self.lock_id else {
            return Ok(false);
        };
        let lock = self.escrow.read_lock(lock_id).await?;
        Ok(lock.status(self.clock.now()) == LockStatus::Expired)
    }

    /// Refund step 1: gate on observed ledger state and assemble the
    /// intention.
    pub async fn prepare_refund(&mut self) -> Result<(), ProtocolError> {
        let lock_id = self.lock_id.ok_or(ProtocolError::LockIdUnknown)?;

        let lock = self.escrow.read_lock(lock_id).await?;
        match lock.status(self.clock.now()) {
            LockStatus::Expired => {}
            status => return Err(ProtocolError::RefundUnavailable { status }),
        }

        let intention = contract::refund_intention(self.contract, lock_id);
        self.apply(RequesterEvent::RefundIntentionPrepared(intention))?;
        Ok(())
    }

    pub async fn finalize_refund(&mut self) -> Result<(), ProtocolError> {
        let RequesterState::RefundPrepared { intention } = &self.state else {
            return Err(self.step_error("refund_finalize"));
        };
        let finalized = self.wallet.finalize(&intention.clone()).await?;
        self.apply(RequesterEvent::RefundFinalizeDone(finalized))?;
        Ok(())
    }

    pub async fn sign_refund(&mut self) -> Result<(), ProtocolError> {
        let RequesterState::RefundFinalized { finalized } = &self.state else {
            return Err(self.step_error("refund_sign"));
        };
        let signed = self.wallet.sign(&finalized.clone()).await?;
        self.apply(RequesterEvent::RefundSignDone(signed))?;
        Ok(())
    }

    pub async fn broadcast_refund(&mut self) -> Result<TxHash, ProtocolError> {
        let RequesterState::RefundSigned { signed } = &self.state else {
            return Err(self.step_error("refund_broadcast"));
        };
        let tx_hash = self.wallet.broadcast(&signed.clone()).await?;
        info!(tx_hash = %tx_hash, "Refund transaction broadcast");
        self.apply(RequesterEvent::RefundBroadcastDone(tx_hash))?;
        Ok(tx_hash)
    }

    /// Refund confirmation; re-reads the ledger after a timed-out wait or a
    /// reverted receipt, since the lock state is the source of truth.
    pub async fn confirm_refund(&mut self) -> Result<(), ProtocolError> {
        let RequesterState::RefundBroadcast { tx_hash } = &self.state else {
            return Err(self.step_error("refund_confirm"));
        };
        let tx_hash = *tx_hash;
        let lock_id = self.lock_id.ok_or(ProtocolError::LockIdUnknown)?;

        let settled = |lock: crate::escrow::Lock, now: u64| -> Result<(), ProtocolError> {
            match lock.status(now) {
                LockStatus::Refunded => Ok(()),
                LockStatus::Claimed => Err(ProtocolError::LockSettled {
                    status: LockStatus::Claimed,
                }),
                _ => Err(WalletError::ConfirmationTimeout.into()),
            }
        };

        match self
            .wallet
            .await_confirmation(tx_hash, self.confirmation_timeout)
            .await
        {
            Ok(receipt) if receipt.success => {}
            Ok(_) => {
                let lock = self.escrow.read_lock(lock_id).await?;
                if lock.status(self.clock.now()) != LockStatus::Refunded {
                    return Err(ProtocolError::TransactionReverted { tx_hash });
                }
            }
            Err(WalletError::ConfirmationTimeout) => {
                warn!(tx_hash = %tx_hash, "Refund confirmation timed out, re-reading lock");
                let lock = self.escrow.read_lock(lock_id).await?;
                settled(lock, self.clock.now())?;
            }
            Err(e) => return Err(e.into()),
        }

        self.apply(RequesterEvent::RefundConfirmed)?;
        info!(lock_id = %lock_id, "Refund confirmed");
        Ok(())
    }

    /// Decrypt a provider response with this request's secret.
    pub fn decrypt_response(&self, response: &AccessResponse) -> Result<Vec<u8>, ProtocolError> {
        let secret = self.secret.as_ref().ok_or(ProtocolError::MissingSecret)?;
        Ok(payload::decrypt_with_secret(
            &response.encrypted_payload,
            secret,
        )?)
    }

    /// Abandon the flow. Only possible before broadcast, where no external
    /// state has been mutated.
    pub fn abandon(&mut self) -> Result<(), ProtocolError> {
        self.apply(RequesterEvent::Abandoned)?;
        self.secret = None;
        self.hashlock = None;
        Ok(())
    }

    fn step_error(&self, event: &'static str) -> ProtocolError {
        TransitionError {
            from: self.state.name(),
            event,
        }
        .into()
    }
}
