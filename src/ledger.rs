// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Wallet balances and the immutable transaction ledger.
//!
//! The ledger is the only writer of wallet balances. A transfer debits the
//! payer, credits the payee, and appends exactly one immutable
//! [`TransactionRecord`] keyed by its unique [`Reference`]. Re-driving a
//! reference that already posted returns [`TransferOutcome::AlreadyApplied`]
//! without touching any balance, which makes a failed settlement safe to
//! retry with the same key.

use crate::base::{Amount, BookingId, Reference, UserId};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Read-only view of a wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub user_id: UserId,
    pub balance: Amount,
    pub updated_at: DateTime<Utc>,
}

/// Ledger entry kind. Settlements are the only kind the core writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Payment,
}

/// Display details recorded alongside a settlement for audit and receipts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    pub service_name: String,
    pub payer_name: String,
    pub payee_name: String,
    /// Payment-stage tag, `first_installment` or `final_installment`.
    pub stage: String,
}

/// Immutable ledger entry. Created exactly once per settled installment,
/// never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub reference: Reference,
    pub amount: Amount,
    pub kind: TransactionKind,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub booking_id: BookingId,
    pub metadata: TransactionMetadata,
    pub created_at: DateTime<Utc>,
}

/// A single funds movement between two wallets.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub reference: Reference,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub amount: Amount,
    pub booking_id: BookingId,
    pub metadata: TransactionMetadata,
}

/// Result of driving a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Balances moved and a transaction record was written.
    Applied,
    /// The reference had already posted; nothing changed.
    AlreadyApplied,
}

/// Persistence for wallet balances and the immutable transaction log.
///
/// Implementations must make [`LedgerStore::transfer`] atomic as a unit: no
/// reader may observe the transaction record without the balance movement
/// or vice versa, and balance mutation must be an in-place increment, never
/// read-modify-write on a stale value.
pub trait LedgerStore: Send + Sync {
    /// Ensures a wallet exists for the user, starting at zero balance.
    fn open_wallet(&self, user_id: UserId);

    /// Provisioning credit from outside the settlement flow (top-ups are
    /// out of band for the core; drivers and tests use this).
    fn fund(&self, user_id: UserId, amount: Amount) -> Result<(), CoreError>;

    /// Current balance.
    fn balance(&self, user_id: UserId) -> Result<Amount, CoreError>;

    /// Point-in-time wallet view.
    fn snapshot(&self, user_id: UserId) -> Result<WalletSnapshot, CoreError>;

    /// Snapshots of every wallet, ordered by user id.
    fn snapshots(&self) -> Vec<WalletSnapshot>;

    /// Moves `amount` from payer to payee and appends the transaction
    /// record, idempotently on `request.reference`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::WalletNotFound`] - either wallet does not exist.
    /// - [`CoreError::SelfSettlement`] - payer and payee are the same wallet.
    /// - [`CoreError::InsufficientFunds`] - debit would take the payer
    ///   negative; nothing is written.
    /// - [`CoreError::InvalidAmount`] - credit would overflow the payee
    ///   balance; nothing is written.
    /// - [`CoreError::LedgerUnavailable`] - the store cannot currently
    ///   commit; retry with the same reference.
    fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome, CoreError>;

    /// Looks up a transaction by reference.
    fn transaction(&self, reference: Reference) -> Option<TransactionRecord>;

    /// All transactions recorded for a booking, oldest first.
    fn transactions_for_booking(&self, booking_id: BookingId) -> Vec<TransactionRecord>;
}

#[derive(Debug)]
struct WalletData {
    balance: Amount,
    updated_at: DateTime<Utc>,
}

impl WalletData {
    fn new() -> Self {
        Self {
            balance: 0,
            updated_at: Utc::now(),
        }
    }

    fn credit(&mut self, amount: Amount) -> Result<(), CoreError> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(CoreError::InvalidAmount)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Debits in place; the caller has already verified the balance under
    /// the same lock.
    fn debit(&mut self, amount: Amount) {
        debug_assert!(
            self.balance >= amount,
            "Invariant violated: debit {} exceeds balance {}",
            amount,
            self.balance
        );
        self.balance -= amount;
        self.updated_at = Utc::now();
    }
}

/// In-memory [`LedgerStore`].
///
/// Wallets are DashMap entries wrapping a `Mutex<WalletData>`; a transfer
/// locks both wallets in ascending user-id order so crossing transfers
/// cannot deadlock, and performs the balance check, record insert, debit,
/// and credit inside that critical section.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    wallets: DashMap<UserId, Mutex<WalletData>>,
    transactions: DashMap<Reference, TransactionRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn open_wallet(&self, user_id: UserId) {
        self.wallets
            .entry(user_id)
            .or_insert_with(|| Mutex::new(WalletData::new()));
    }

    fn fund(&self, user_id: UserId, amount: Amount) -> Result<(), CoreError> {
        if amount == 0 {
            return Err(CoreError::InvalidAmount);
        }
        self.open_wallet(user_id);
        let wallet = self.wallets.get(&user_id).ok_or(CoreError::WalletNotFound)?;
        wallet.lock().credit(amount)
    }

    fn balance(&self, user_id: UserId) -> Result<Amount, CoreError> {
        let wallet = self.wallets.get(&user_id).ok_or(CoreError::WalletNotFound)?;
        let balance = wallet.lock().balance;
        Ok(balance)
    }

    fn snapshot(&self, user_id: UserId) -> Result<WalletSnapshot, CoreError> {
        let wallet = self.wallets.get(&user_id).ok_or(CoreError::WalletNotFound)?;
        let data = wallet.lock();
        Ok(WalletSnapshot {
            user_id,
            balance: data.balance,
            updated_at: data.updated_at,
        })
    }

    fn snapshots(&self) -> Vec<WalletSnapshot> {
        let mut out: Vec<WalletSnapshot> = self
            .wallets
            .iter()
            .map(|entry| {
                let data = entry.value().lock();
                WalletSnapshot {
                    user_id: *entry.key(),
                    balance: data.balance,
                    updated_at: data.updated_at,
                }
            })
            .collect();
        out.sort_by_key(|s| s.user_id);
        out
    }

    fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome, CoreError> {
        if request.payer_id == request.payee_id {
            return Err(CoreError::SelfSettlement);
        }

        // Fast path: a posted reference means the whole transfer already
        // happened. Checked again under the wallet locks below to close the
        // race with a concurrent drive of the same reference.
        if self.transactions.contains_key(&request.reference) {
            return Ok(TransferOutcome::AlreadyApplied);
        }

        let payer_ref = self
            .wallets
            .get(&request.payer_id)
            .ok_or(CoreError::WalletNotFound)?;
        let payee_ref = self
            .wallets
            .get(&request.payee_id)
            .ok_or(CoreError::WalletNotFound)?;

        // Canonical lock order: ascending user id.
        let (mut payer, mut payee) = if request.payer_id < request.payee_id {
            let payer = payer_ref.lock();
            let payee = payee_ref.lock();
            (payer, payee)
        } else {
            let payee = payee_ref.lock();
            let payer = payer_ref.lock();
            (payer, payee)
        };

        if payer.balance < request.amount {
            return Err(CoreError::InsufficientFunds);
        }
        // Credit headroom is verified before anything is written, so the
        // record insert, debit, and credit below cannot half-apply.
        if payee.balance.checked_add(request.amount).is_none() {
            return Err(CoreError::InvalidAmount);
        }

        // Record first: the entry API makes the reference check-and-insert
        // atomic, so exactly one drive of a reference writes the record and
        // moves the money.
        match self.transactions.entry(request.reference) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Ok(TransferOutcome::AlreadyApplied);
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(TransactionRecord {
                    reference: request.reference,
                    amount: request.amount,
                    kind: TransactionKind::Payment,
                    payer_id: request.payer_id,
                    payee_id: request.payee_id,
                    booking_id: request.booking_id,
                    metadata: request.metadata,
                    created_at: Utc::now(),
                });
            }
        }

        payer.debit(request.amount);
        payee.credit(request.amount)?;
        Ok(TransferOutcome::Applied)
    }

    fn transaction(&self, reference: Reference) -> Option<TransactionRecord> {
        self.transactions.get(&reference).map(|r| r.clone())
    }

    fn transactions_for_booking(&self, booking_id: BookingId) -> Vec<TransactionRecord> {
        let mut out: Vec<TransactionRecord> = self
            .transactions
            .iter()
            .filter(|r| r.booking_id == booking_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }
}
