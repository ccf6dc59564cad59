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

//! # Bookline
//!
//! Booking lifecycle and wallet settlement core for a service marketplace.
//!
//! ## Core Components
//!
//! - [`LifecycleManager`]: owns the booking state machine and is the only
//!   entry point for mutations
//! - [`SettlementEngine`]: drives the idempotent two-wallet transfer
//!   protocol for each installment
//! - [`eligibility`]: pure precondition gates for cancel / pay / review /
//!   report
//! - [`LedgerStore`] / [`BookingStore`]: store seams with in-memory
//!   implementations ([`MemoryLedger`], [`MemoryBookingStore`])
//!
//! ## Example
//!
//! ```
//! use bookline::{
//!     BookingRequest, BookingStatus, LedgerStore, LifecycleManager, MemoryBookingStore,
//!     MemoryDirectory, MemoryLedger, MemoryReportStore, MemoryReviewStore, NullDispatcher,
//!     PaymentPlan, ProviderId, UserId,
//! };
//! use std::sync::Arc;
//!
//! let ledger = Arc::new(MemoryLedger::new());
//! let directory = Arc::new(MemoryDirectory::new());
//!
//! // Provider 9's wallet belongs to user 42; the two id spaces never mix.
//! directory.register(ProviderId(9), UserId(42));
//! ledger.fund(UserId(1), 10_000).unwrap();
//! ledger.open_wallet(UserId(42));
//!
//! let manager = LifecycleManager::new(
//!     Arc::new(MemoryBookingStore::new()),
//!     ledger.clone(),
//!     directory,
//!     Arc::new(MemoryReviewStore::new()),
//!     Arc::new(MemoryReportStore::new()),
//!     Arc::new(NullDispatcher),
//! );
//!
//! let booking = manager
//!     .request(BookingRequest {
//!         payer_id: UserId(1),
//!         payer_name: "Ada".into(),
//!         provider_id: ProviderId(9),
//!         provider_name: "Sparks Electrical".into(),
//!         service_name: "rewiring".into(),
//!         payment_plan: PaymentPlan::FullUpfront,
//!         amount: 10_000,
//!     })
//!     .unwrap();
//!
//! manager.accept(booking.id, ProviderId(9)).unwrap();
//! let receipt = manager.pay(booking.id, UserId(1), None).unwrap();
//!
//! assert_eq!(receipt.amount, 10_000);
//! assert_eq!(receipt.new_status, BookingStatus::InProgress);
//! assert_eq!(ledger.balance(UserId(42)).unwrap(), 10_000);
//! ```
//!
//! ## Concurrency
//!
//! Bookings and wallets live in sharded maps; transitions are conditional
//! updates under the record lock, wallet movements are atomic increments
//! under the wallet lock, and every settlement is keyed by a unique
//! reference so a retried drive can never double-charge.

pub mod base;
pub mod booking;
pub mod booking_store;
pub mod directory;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod feedback;
pub mod ledger;
pub mod lifecycle;
pub mod settlement;

pub use base::{Amount, BookingId, ProviderId, Reference, UserId};
pub use booking::{Booking, BookingRequest, BookingStatus, PaymentPlan, PaymentStage};
pub use booking_store::{BookingStore, MemoryBookingStore};
pub use directory::{MemoryDirectory, ProviderDirectory};
pub use error::CoreError;
pub use events::{
    DomainEvent, EventOutbox, NotificationDispatcher, NotificationError, NullDispatcher,
    TracingDispatcher,
};
pub use feedback::{
    MemoryReportStore, MemoryReviewStore, Report, ReportStatus, ReportStore, Review, ReviewStore,
};
pub use ledger::{
    LedgerStore, MemoryLedger, TransactionKind, TransactionMetadata, TransactionRecord,
    TransferOutcome, TransferRequest, WalletSnapshot,
};
pub use lifecycle::LifecycleManager;
pub use settlement::{SettlementEngine, SettlementReceipt};
