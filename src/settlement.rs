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

//! Payment settlement engine.
//!
//! Executes one funds-transfer step for a booking: verify funds, write the
//! reference-keyed transaction record, debit the payer, credit the payee,
//! then flip the booking's payment flags and compute the resulting status
//! from the plan and stage. The whole protocol runs inside the booking
//! record lock, so a racing cancel or a second pay observes a conflict
//! rather than a half-applied settlement.

use crate::base::{Amount, BookingId, Reference, UserId};
use crate::booking::{BookingStatus, PaymentStage};
use crate::booking_store::BookingStore;
use crate::eligibility;
use crate::error::CoreError;
use crate::events::{DomainEvent, EventOutbox};
use crate::ledger::{LedgerStore, TransactionMetadata, TransferOutcome, TransferRequest};
use std::sync::Arc;
use tracing::info;

/// Outcome of a driven settlement, returned to the caller as the receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// Idempotency key; reuse it to retry a failed settlement.
    pub reference: Reference,
    pub booking_id: BookingId,
    pub stage: PaymentStage,
    pub amount: Amount,
    pub payer_id: UserId,
    pub payee_id: UserId,
    pub new_status: BookingStatus,
    /// True when the reference had already posted and this drive was a
    /// recognized no-op on the ledger.
    pub already_applied: bool,
}

/// Executes funds transfers for bookings and updates their payment flags.
///
/// The engine is the only component that moves wallet balances; everything
/// else reads.
pub struct SettlementEngine {
    ledger: Arc<dyn LedgerStore>,
    bookings: Arc<dyn BookingStore>,
    outbox: Arc<EventOutbox>,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        bookings: Arc<dyn BookingStore>,
        outbox: Arc<EventOutbox>,
    ) -> Self {
        Self {
            ledger,
            bookings,
            outbox,
        }
    }

    /// Settles the next installment of a booking.
    ///
    /// `payee_user_id` must come from the provider directory. `reference`
    /// is the idempotency key: pass the same one when retrying after a
    /// [`CoreError::LedgerUnavailable`].
    ///
    /// On success the booking has moved `Accepted → InProgress` (first
    /// installment) or `InProgress → Completed` (final installment), the
    /// flags reflect the plan stage, and a [`DomainEvent::PaymentCompleted`]
    /// plus a [`DomainEvent::BookingStatusChanged`] sit on the outbox.
    ///
    /// # Errors
    ///
    /// Eligibility, state-conflict, and funds errors leave every store
    /// untouched. A ledger failure after the transaction record committed
    /// is recovered by re-driving the same reference.
    pub fn settle(
        &self,
        booking_id: BookingId,
        acting_user_id: UserId,
        payee_user_id: UserId,
        reference: Reference,
    ) -> Result<SettlementReceipt, CoreError> {
        let mut receipt: Option<SettlementReceipt> = None;
        let mut applied_now = false;

        let updated = self.bookings.update(booking_id, &mut |booking| {
            // Authoritative gate, re-run under the record lock.
            eligibility::can_pay(booking, acting_user_id)?;

            let stage = booking.next_stage().ok_or(CoreError::AlreadyPaid)?;
            let expected = stage.expected_status();
            if booking.status != expected {
                return Err(CoreError::StateConflict {
                    expected,
                    actual: booking.status,
                });
            }

            let amount = booking.payment_plan.installment(booking.amount, stage);
            let outcome = self.ledger.transfer(TransferRequest {
                reference,
                payer_id: booking.payer_id,
                payee_id: payee_user_id,
                amount,
                booking_id: booking.id,
                metadata: TransactionMetadata {
                    service_name: booking.service_name.clone(),
                    payer_name: booking.payer_name.clone(),
                    payee_name: booking.provider_name.clone(),
                    stage: stage.tag().to_owned(),
                },
            })?;

            if outcome == TransferOutcome::AlreadyApplied {
                // The reference posted on an earlier drive. A record for a
                // stage the booking already reflects must not replay its
                // flags, or a retried first-installment reference would
                // complete a half-paid booking. Only a record for the stage
                // still due (transfer committed, flag update lost) gets its
                // booking-side bookkeeping finished below.
                let record = self
                    .ledger
                    .transaction(reference)
                    .ok_or(CoreError::LedgerUnavailable)?;
                if let Some(posted) = PaymentStage::from_tag(&record.metadata.stage)
                    && posted != stage
                {
                    receipt = Some(SettlementReceipt {
                        reference,
                        booking_id: booking.id,
                        stage: posted,
                        amount: record.amount,
                        payer_id: booking.payer_id,
                        payee_id: payee_user_id,
                        new_status: booking.status,
                        already_applied: true,
                    });
                    return Ok(());
                }
            }

            // Money has moved (or already had); from here the booking must
            // reach the resulting state in this same critical section.
            booking.apply_installment(stage);
            booking.status = stage.resulting_status();
            booking.payer_viewed = false;
            booking.provider_viewed = false;
            booking.updated_at = chrono::Utc::now();

            applied_now = true;
            receipt = Some(SettlementReceipt {
                reference,
                booking_id: booking.id,
                stage,
                amount,
                payer_id: booking.payer_id,
                payee_id: payee_user_id,
                new_status: booking.status,
                already_applied: outcome == TransferOutcome::AlreadyApplied,
            });
            Ok(())
        })?;

        let receipt = receipt.ok_or(CoreError::LedgerUnavailable)?;

        if !applied_now {
            info!(
                booking = %booking_id,
                reference = %receipt.reference,
                "settlement already applied, booking unchanged"
            );
            return Ok(receipt);
        }

        info!(
            booking = %booking_id,
            reference = %receipt.reference,
            amount = receipt.amount,
            stage = receipt.stage.tag(),
            status = %receipt.new_status,
            "settlement committed"
        );

        self.outbox.push(DomainEvent::PaymentCompleted {
            booking_id,
            reference: receipt.reference,
            amount: receipt.amount,
            stage: receipt.stage.tag().to_owned(),
            payer_id: receipt.payer_id,
            payee_id: receipt.payee_id,
        });
        self.outbox.push(DomainEvent::BookingStatusChanged {
            booking_id,
            previous: receipt.stage.expected_status(),
            current: updated.status,
            actor: acting_user_id,
        });

        Ok(receipt)
    }
}
