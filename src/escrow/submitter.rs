// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Local-signer wallet implementing the two-phase transaction port.
//!
//! EIP-1559 transaction finalization (gas estimation, fee calculation,
//! nonce and chain id assignment), signing with a local key, raw broadcast,
//! and bounded receipt polling.

use std::time::Duration;

use alloy::{
    eips::eip2718::Encodable2718,
    network::{Ethereum, EthereumWallet, TransactionBuilder},
    primitives::{Address, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::TransactionRequest,
    signers::local::PrivateKeySigner,
};

use crate::lifecycle::ports::{
    FinalizedTx, GasEstimate, SignedTx, TxHash, TxIntention, TxReceipt, WalletError, WalletPort,
};

/// Interval between receipt polls while awaiting confirmation.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Standard priority fee (1.5 gwei).
const DEFAULT_PRIORITY_FEE: u128 = 1_500_000_000;

/// Fallback base fee when the latest block carries none (25 gwei).
const DEFAULT_BASE_FEE: u128 = 25_000_000_000;

type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Wallet port backed by an alloy local signer.
pub struct EvmWallet {
    provider: HttpProvider,
    wallet: EthereumWallet,
    sender: Address,
}

impl EvmWallet {
    /// Create a wallet for `signer` submitting through `rpc_url`.
    pub fn new(rpc_url: &str, signer: PrivateKeySigner) -> Result<Self, WalletError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| WalletError::Transport(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);
        let sender = signer.address();

        Ok(Self {
            provider,
            wallet: EthereumWallet::from(signer),
            sender,
        })
    }

    /// Create a wallet from a hex-encoded private key (no 0x prefix).
    pub fn from_private_key(rpc_url: &str, private_key_hex: &str) -> Result<Self, WalletError> {
        let key_bytes = alloy::hex::decode(private_key_hex)
            .map_err(|e| WalletError::InvalidTransaction(e.to_string()))?;
        let signer = PrivateKeySigner::from_slice(&key_bytes)
            .map_err(|e| WalletError::InvalidTransaction(e.to_string()))?;
        Self::new(rpc_url, signer)
    }

    /// Get current gas prices from the network.
    async fn get_gas_prices(&self) -> Result<(u128, u128), WalletError> {
        let block = self
            .provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
            .await
            .map_err(|e| WalletError::Transport(format!("Failed to get block: {e}")))?
            .ok_or_else(|| WalletError::Transport("No latest block".to_string()))?;

        let base_fee: u128 = block
            .header
            .base_fee_per_gas
            .map(|f| f as u128)
            .unwrap_or(DEFAULT_BASE_FEE);

        // Max fee = 2 * base_fee + priority_fee (allows for base fee increase)
        let max_fee = base_fee
            .saturating_mul(2)
            .saturating_add(DEFAULT_PRIORITY_FEE);

        Ok((max_fee, DEFAULT_PRIORITY_FEE))
    }

    fn receipt_from(raw: alloy::rpc::types::TransactionReceipt, tx_hash: TxHash) -> TxReceipt {
        TxReceipt {
            tx_hash,
            block_number: raw.block_number.unwrap_or(0),
            gas_used: raw.gas_used as u64,
            success: raw.status(),
        }
    }
}

impl WalletPort for EvmWallet {
    fn address(&self) -> Address {
        self.sender
    }

    async fn finalize(&self, intention: &TxIntention) -> Result<FinalizedTx, WalletError> {
        let tx = TransactionRequest::default()
            .from(self.sender)
            .to(intention.to)
            .value(intention.value)
            .input(intention.data.clone().into());

        let gas_limit = self
            .provider
            .estimate_gas(tx.clone())
            .await
            .map_err(|e| WalletError::Transport(format!("Gas estimation failed: {e}")))?;

        let (max_fee_per_gas, max_priority_fee_per_gas) = self.get_gas_prices().await?;

        let nonce = self
            .provider
            .get_transaction_count(self.sender)
            .await
            .map_err(|e| WalletError::Transport(format!("Nonce query failed: {e}")))?;

        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| WalletError::Transport(format!("Chain id query failed: {e}")))?;

        let mut request = tx
            .gas_limit(gas_limit)
            .max_fee_per_gas(max_fee_per_gas)
            .max_priority_fee_per_gas(max_priority_fee_per_gas);
        request.nonce = Some(nonce);
        request.chain_id = Some(chain_id);

        let estimated_cost_wei = U256::from(gas_limit) * U256::from(max_fee_per_gas);

        Ok(FinalizedTx {
            request,
            gas: GasEstimate {
                gas_limit,
                max_fee_per_gas,
                max_priority_fee_per_gas,
                estimated_cost_wei,
            },
        })
    }

    async fn sign(&self, finalized: &FinalizedTx) -> Result<SignedTx, WalletError> {
        let envelope = finalized
            .request
            .clone()
            .build(&self.wallet)
            .await
            .map_err(|e| WalletError::InvalidTransaction(e.to_string()))?;

        Ok(SignedTx {
            raw: envelope.encoded_2718(),
        })
    }

    async fn broadcast(&self, signed: &SignedTx) -> Result<TxHash, WalletError> {
        let pending = self
            .provider
            .send_raw_transaction(&signed.raw)
            .await
            .map_err(|e| WalletError::Broadcast(e.to_string()))?;

        Ok(*pending.tx_hash())
    }

    async fn await_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<TxReceipt, WalletError> {
        let poll = async {
            loop {
                match self.provider.get_transaction_receipt(tx_hash).await {
                    Ok(Some(receipt)) => return Ok(Self::receipt_from(receipt, tx_hash)),
                    Ok(None) => tokio::time::sleep(RECEIPT_POLL_INTERVAL).await,
                    Err(e) => return Err(WalletError::Transport(e.to_string())),
                }
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| WalletError::ConfirmationTimeout)?
    }

    async fn transaction_status(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<TxReceipt>, WalletError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| WalletError::Transport(e.to_string()))?;

        Ok(receipt.map(|r| Self::receipt_from(r, tx_hash)))
    }
}
