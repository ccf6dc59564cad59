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

//! Eligibility gates: pure precondition checks run before every
//! state-changing action.
//!
//! These functions take a booking snapshot and an explicit acting identity
//! and have no side effects, so authorization rules are testable without
//! any store fixture. The mutating callers re-run the relevant gate under
//! the booking record lock, making the verdict race-safe.

use crate::base::UserId;
use crate::booking::{Booking, BookingStatus, PaymentPlan};
use crate::error::CoreError;

/// Whether `actor` may cancel the booking right now.
///
/// A `Pending` or `Accepted` booking (no payment yet) is cancellable by its
/// payer. An `InProgress` booking stays cancellable unless the plan is
/// `Half` and the first installment has settled, which locks cancellation
/// for good.
pub fn can_cancel(booking: &Booking, actor: UserId) -> Result<(), CoreError> {
    if actor != booking.payer_id {
        return Err(CoreError::NotAuthorized);
    }
    match booking.status {
        BookingStatus::Pending | BookingStatus::Accepted => Ok(()),
        BookingStatus::InProgress => {
            if booking.payment_plan == PaymentPlan::Half && booking.first_payment_completed {
                Err(CoreError::CancellationLocked)
            } else {
                Ok(())
            }
        }
        BookingStatus::Completed | BookingStatus::Cancelled => Err(CoreError::NotCancellable),
    }
}

/// Whether `actor` may settle the next installment.
pub fn can_pay(booking: &Booking, actor: UserId) -> Result<(), CoreError> {
    if actor != booking.payer_id {
        return Err(CoreError::NotAuthorized);
    }
    if !matches!(
        booking.status,
        BookingStatus::Accepted | BookingStatus::InProgress
    ) {
        return Err(CoreError::StateConflict {
            expected: BookingStatus::Accepted,
            actual: booking.status,
        });
    }
    if booking.fully_paid() {
        return Err(CoreError::AlreadyPaid);
    }
    Ok(())
}

/// Whether `actor` may review the booking.
///
/// `already_reviewed` is the store's answer for the `(booking, actor)`
/// pair; the store's uniqueness constraint is the final guard either way.
pub fn can_review(booking: &Booking, actor: UserId, already_reviewed: bool) -> Result<(), CoreError> {
    if actor != booking.payer_id {
        return Err(CoreError::NotAuthorized);
    }
    if booking.status != BookingStatus::Completed {
        return Err(CoreError::StateConflict {
            expected: BookingStatus::Completed,
            actual: booking.status,
        });
    }
    if already_reviewed {
        return Err(CoreError::DuplicateReview);
    }
    Ok(())
}

/// Whether `actor` may report the other party of the booking.
///
/// `payee_user_id` is the provider's wallet-owning user, resolved through
/// the directory by the caller.
pub fn can_report(booking: &Booking, actor: UserId, payee_user_id: UserId) -> Result<(), CoreError> {
    if actor == booking.payer_id || actor == payee_user_id {
        Ok(())
    } else {
        Err(CoreError::NotAuthorized)
    }
}
