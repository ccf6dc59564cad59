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

//! Booking records, the status state machine, and installment math.
//!
//! Status state machine:
//!
//! Pending ──accept──► Accepted ──first payment──► InProgress ──final payment / mark_done──► Completed
//!     │                   │                            │
//!     └──────reject───────┴──────────cancel────────────┘──► Cancelled
//!
//! `Completed` and `Cancelled` are terminal; `Completed` is never reachable
//! directly from `Pending`.

use crate::base::{Amount, BookingId, ProviderId, UserId};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of booking statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    /// The exhaustive transition table.
    ///
    /// Every mutation in the crate goes through a conditional update that
    /// consults this table; there are no ad hoc status comparisons at call
    /// sites.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Accepted, InProgress)
                | (InProgress, Completed)
                | (Pending, Cancelled)
                | (Accepted, Cancelled)
                | (InProgress, Cancelled)
        )
    }

    /// Whether the status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// How the booking price is collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentPlan {
    /// One installment for the full amount, due at acceptance.
    FullUpfront,
    /// Two installments: half at acceptance, the remainder at completion.
    Half,
}

impl PaymentPlan {
    /// Installment amount for a given stage.
    ///
    /// Under [`PaymentPlan::Half`] the final installment is the remainder
    /// (`amount - amount / 2`), never a second floored half, so the two
    /// installments sum exactly to `amount` for odd totals.
    pub fn installment(self, amount: Amount, stage: PaymentStage) -> Amount {
        match (self, stage) {
            (PaymentPlan::FullUpfront, _) => amount,
            (PaymentPlan::Half, PaymentStage::First) => amount / 2,
            (PaymentPlan::Half, PaymentStage::Final) => amount - amount / 2,
        }
    }
}

impl fmt::Display for PaymentPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentPlan::FullUpfront => "full_upfront",
            PaymentPlan::Half => "half",
        };
        f.write_str(s)
    }
}

/// Which installment of a booking a settlement covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStage {
    First,
    Final,
}

impl PaymentStage {
    /// Metadata tag recorded on the transaction for this stage.
    pub fn tag(self) -> &'static str {
        match self {
            PaymentStage::First => "first_installment",
            PaymentStage::Final => "final_installment",
        }
    }

    /// Parses a recorded metadata tag back into the stage it settled.
    pub fn from_tag(tag: &str) -> Option<PaymentStage> {
        match tag {
            "first_installment" => Some(PaymentStage::First),
            "final_installment" => Some(PaymentStage::Final),
            _ => None,
        }
    }

    /// Status the booking must currently hold for this stage to settle.
    pub fn expected_status(self) -> BookingStatus {
        match self {
            PaymentStage::First => BookingStatus::Accepted,
            PaymentStage::Final => BookingStatus::InProgress,
        }
    }

    /// Status the booking moves to once this stage settles.
    ///
    /// Computed here, never supplied by a caller, so a client cannot forge
    /// a status through the payment path.
    pub fn resulting_status(self) -> BookingStatus {
        match self {
            PaymentStage::First => BookingStatus::InProgress,
            PaymentStage::Final => BookingStatus::Completed,
        }
    }
}

/// Parameters for creating a booking.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub payer_id: UserId,
    pub payer_name: String,
    pub provider_id: ProviderId,
    pub provider_name: String,
    pub service_name: String,
    pub payment_plan: PaymentPlan,
    pub amount: Amount,
}

/// A single request-for-service instance tying a payer to a provider.
///
/// Created in `Pending`, mutated only by the lifecycle manager, never
/// deleted; terminally reaches `Completed` or `Cancelled`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub payer_id: UserId,
    pub payer_name: String,
    pub provider_id: ProviderId,
    pub provider_name: String,
    pub service_name: String,
    pub status: BookingStatus,
    pub payment_plan: PaymentPlan,
    pub amount: Amount,
    pub first_payment_completed: bool,
    pub final_payment_completed: bool,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<UserId>,
    pub cancellation_reason: Option<String>,
    /// Badge flags: reset on every status transition, set by the viewer.
    pub payer_viewed: bool,
    pub provider_viewed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Creates a booking in `Pending`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidAmount`] when the amount is zero.
    pub fn new(request: BookingRequest) -> Result<Self, CoreError> {
        if request.amount == 0 {
            return Err(CoreError::InvalidAmount);
        }
        let now = Utc::now();
        Ok(Self {
            id: BookingId::new(),
            payer_id: request.payer_id,
            payer_name: request.payer_name,
            provider_id: request.provider_id,
            provider_name: request.provider_name,
            service_name: request.service_name,
            status: BookingStatus::Pending,
            payment_plan: request.payment_plan,
            amount: request.amount,
            first_payment_completed: false,
            final_payment_completed: false,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            payer_viewed: false,
            provider_viewed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// The next installment due, or `None` when fully paid.
    pub fn next_stage(&self) -> Option<PaymentStage> {
        if !self.first_payment_completed {
            Some(PaymentStage::First)
        } else if self.payment_plan == PaymentPlan::Half && !self.final_payment_completed {
            Some(PaymentStage::Final)
        } else {
            None
        }
    }

    /// Whether every installment under the plan has settled.
    pub fn fully_paid(&self) -> bool {
        self.next_stage().is_none()
    }

    /// Records a settled installment, flipping the flags per plan.
    ///
    /// For `FullUpfront` both flags flip together on the single settlement;
    /// for `Half` they flip independently across two settlements.
    pub(crate) fn apply_installment(&mut self, stage: PaymentStage) {
        match (self.payment_plan, stage) {
            (PaymentPlan::FullUpfront, _) => {
                self.first_payment_completed = true;
                self.final_payment_completed = true;
            }
            (PaymentPlan::Half, PaymentStage::First) => self.first_payment_completed = true,
            (PaymentPlan::Half, PaymentStage::Final) => self.final_payment_completed = true,
        }
        self.assert_invariants();
    }

    pub(crate) fn assert_invariants(&self) {
        debug_assert!(
            self.first_payment_completed || !self.final_payment_completed,
            "Invariant violated: final payment completed before first on booking {}",
            self.id
        );
        if self.status == BookingStatus::Completed {
            debug_assert!(
                self.final_payment_completed,
                "Invariant violated: booking {} completed without final settlement",
                self.id
            );
        }
    }
}
