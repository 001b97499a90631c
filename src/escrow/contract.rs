// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 HealthSwap Contributors

//! Deployed escrow contract binding and read client.

use alloy::{
    network::Ethereum,
    primitives::{Address, B256, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::Filter,
    sol,
    sol_types::{SolCall, SolEvent},
};

use super::types::{EscrowError, Hashlock, Lock, LockId};
use crate::lifecycle::ports::TxIntention;

// Escrow contract interface. `getLock` returns the zero-valued struct for
// unknown ids; the client maps that to `Lock::default()` rather than an
// error.
sol! {
    #[sol(rpc)]
    interface IDataShareHTLC {
        struct Lock {
            address requester;
            address provider;
            uint256 amount;
            bytes32 hashlock;
            uint256 timelock;
            bool claimed;
            bool refunded;
        }

        function lock(address provider, bytes32 hashlock, uint256 timelockDuration)
            external payable returns (bytes32 lockId);
        function claim(bytes32 lockId, bytes32 preimage) external;
        function refund(bytes32 lockId) external;
        function getLock(bytes32 lockId) external view returns (Lock memory);

        event Locked(bytes32 indexed lockId, address indexed requester, address indexed provider, bytes32 hashlock, uint256 timelock, uint256 amount);
        event Claimed(bytes32 indexed lockId, bytes32 preimage);
        event Refunded(bytes32 indexed lockId);
    }
}

/// HTTP provider type with the standard fillers.
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<Ethereum>,
>;

/// Read client for the deployed escrow contract.
pub struct EvmEscrow {
    address: Address,
    provider: HttpProvider,
}

impl EvmEscrow {
    /// Connect to the escrow contract at `address` through `rpc_url`.
    pub fn new(rpc_url: &str, address: Address) -> Result<Self, EscrowError> {
        let url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| EscrowError::InvalidRpcUrl(e.to_string()))?;

        let provider = ProviderBuilder::new().connect_http(url);

        Ok(Self { address, provider })
    }

    /// Contract address this client is bound to.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Read a lock from the contract.
    pub async fn get_lock(&self, lock_id: LockId) -> Result<Lock, EscrowError> {
        let contract = IDataShareHTLC::new(self.address, self.provider.clone());
        let raw = contract
            .getLock(lock_id)
            .call()
            .await
            .map_err(|e| EscrowError::from_revert_reason(&e.to_string()))?;

        Ok(Lock {
            requester: raw.requester,
            provider: raw.provider,
            amount: raw.amount,
            hashlock: raw.hashlock,
            timelock: raw.timelock.try_into().unwrap_or(u64::MAX),
            claimed: raw.claimed,
            refunded: raw.refunded,
        })
    }

    /// Look up the lock id emitted by the `Locked` event of a mined lock
    /// transaction.
    pub async fn locked_event_id(
        &self,
        tx_hash: B256,
        block_number: u64,
    ) -> Result<Option<LockId>, EscrowError> {
        let filter = Filter::new()
            .address(vec![self.address])
            .event_signature(IDataShareHTLC::Locked::SIGNATURE_HASH)
            .from_block(block_number)
            .to_block(block_number);

        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| EscrowError::Rpc(e.to_string()))?;

        // lockId is the first indexed topic after the event signature.
        Ok(logs
            .iter()
            .find(|log| {
                log.transaction_hash == Some(tx_hash) && log.topics().len() >= 2
            })
            .map(|log| log.topics()[1]))
    }
}

impl super::EscrowReader for EvmEscrow {
    async fn read_lock(&self, lock_id: LockId) -> Result<Lock, EscrowError> {
        self.get_lock(lock_id).await
    }
}

impl super::LockDiscovery for EvmEscrow {
    async fn find_lock_id(
        &self,
        tx_hash: B256,
        block_number: u64,
    ) -> Result<Option<LockId>, EscrowError> {
        self.locked_event_id(tx_hash, block_number).await
    }
}

/// Build the calldata intention for `lock(provider, hashlock, timelockDuration)`.
pub fn lock_intention(
    contract: Address,
    provider: Address,
    hashlock: Hashlock,
    timelock_duration: u64,
    value: U256,
) -> TxIntention {
    let call = IDataShareHTLC::lockCall {
        provider,
        hashlock,
        timelockDuration: U256::from(timelock_duration),
    };
    TxIntention {
        to: contract,
        value,
        data: call.abi_encode(),
    }
}

/// Build the calldata intention for `claim(lockId, preimage)`.
pub fn claim_intention(contract: Address, lock_id: LockId, preimage: B256) -> TxIntention {
    let call = IDataShareHTLC::claimCall {
        lockId: lock_id,
        preimage,
    };
    TxIntention {
        to: contract,
        value: U256::ZERO,
        data: call.abi_encode(),
    }
}

/// Build the calldata intention for `refund(lockId)`.
pub fn refund_intention(contract: Address, lock_id: LockId) -> TxIntention {
    let call = IDataShareHTLC::refundCall { lockId: lock_id };
    TxIntention {
        to: contract,
        value: U256::ZERO,
        data: call.abi_encode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_intention_encodes_selector_and_value() {
        let contract = Address::repeat_byte(0xaa);
        let provider = Address::repeat_byte(0xbb);
        let hashlock = B256::repeat_byte(0xcc);

        let intention = lock_intention(contract, provider, hashlock, 3600, U256::from(7u64));

        assert_eq!(intention.to, contract);
        assert_eq!(intention.value, U256::from(7u64));
        assert_eq!(&intention.data[..4], IDataShareHTLC::lockCall::SELECTOR.as_slice());

        let decoded = IDataShareHTLC::lockCall::abi_decode(&intention.data).unwrap();
        assert_eq!(decoded.provider, provider);
        assert_eq!(decoded.hashlock, hashlock);
        assert_eq!(decoded.timelockDuration, U256::from(3600u64));
    }

    #[test]
    fn claim_intention_round_trips() {
        let contract = Address::repeat_byte(0x01);
        let lock_id = B256::repeat_byte(0x02);
        let preimage = B256::repeat_byte(0x03);

        let intention = claim_intention(contract, lock_id, preimage);
        assert!(intention.value.is_zero());

        let decoded = IDataShareHTLC::claimCall::abi_decode(&intention.data).unwrap();
        assert_eq!(decoded.lockId, lock_id);
        assert_eq!(decoded.preimage, preimage);
    }

    #[test]
    fn refund_intention_round_trips() {
        let contract = Address::repeat_byte(0x01);
        let lock_id = B256::repeat_byte(0x04);

        let intention = refund_intention(contract, lock_id);
        let decoded = IDataShareHTLC::refundCall::abi_decode(&intention.data).unwrap();
        assert_eq!(decoded.lockId, lock_id);
    }
}
