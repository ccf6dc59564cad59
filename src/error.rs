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

//! Error types for booking lifecycle and settlement operations.

use crate::booking::BookingStatus;
use thiserror::Error;

/// Errors surfaced by the lifecycle manager, settlement engine, and stores.
///
/// Validation and authorization variants are rejected before any store
/// access; state conflicts leave the operation a no-op; ledger failures are
/// retryable with the same reference.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Cancellation or report submitted without a reason text
    #[error("a reason is required")]
    MissingReason,

    /// Review submitted without a comment
    #[error("a review comment is required")]
    MissingComment,

    /// Review rating outside 1..=5
    #[error("rating must be between 1 and 5")]
    InvalidRating,

    /// Amount is zero, or a credit would overflow a wallet balance
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Actor is not the payer/provider this action belongs to
    #[error("actor is not permitted to perform this action")]
    NotAuthorized,

    /// A transition lost the race: the booking was no longer in the
    /// expected status when the conditional update ran
    #[error("booking is {actual}, expected {expected}")]
    StateConflict {
        expected: BookingStatus,
        actual: BookingStatus,
    },

    /// Booking is in a terminal or pre-payment state that cannot be cancelled
    #[error("booking can no longer be cancelled")]
    NotCancellable,

    /// Half-plan booking is cancellation-locked once the first installment clears
    #[error("booking cannot be cancelled after the first installment has settled")]
    CancellationLocked,

    /// Every installment for this booking has already settled
    #[error("booking is already fully paid")]
    AlreadyPaid,

    /// `mark_done` on a booking whose installments have not all settled
    #[error("settlement is not complete for this booking")]
    SettlementIncomplete,

    /// Second review for the same (booking, user) pair
    #[error("a review already exists for this booking")]
    DuplicateReview,

    /// Payer and payee resolve to the same wallet
    #[error("payer and payee wallets must differ")]
    SelfSettlement,

    /// Payer wallet balance is below the installment amount
    #[error("insufficient wallet balance")]
    InsufficientFunds,

    /// Referenced booking does not exist
    #[error("booking not found")]
    BookingNotFound,

    /// Referenced wallet does not exist
    #[error("wallet not found")]
    WalletNotFound,

    /// Provider id has no registered wallet-owning user
    #[error("provider not found")]
    ProviderNotFound,

    /// The ledger store is unavailable mid-protocol; safe to retry with the
    /// same reference
    #[error("ledger temporarily unavailable, try again")]
    LedgerUnavailable,
}

impl CoreError {
    /// Whether the caller may retry the same operation unchanged.
    ///
    /// Only ledger availability failures qualify; everything else requires
    /// corrected input or a fresh read of the booking state.
    pub fn retryable(&self) -> bool {
        matches!(self, CoreError::LedgerUnavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        assert_eq!(CoreError::MissingReason.to_string(), "a reason is required");
        assert_eq!(
            CoreError::InvalidRating.to_string(),
            "rating must be between 1 and 5"
        );
        assert_eq!(
            CoreError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            CoreError::InsufficientFunds.to_string(),
            "insufficient wallet balance"
        );
        assert_eq!(
            CoreError::StateConflict {
                expected: BookingStatus::Pending,
                actual: BookingStatus::Cancelled,
            }
            .to_string(),
            "booking is cancelled, expected pending"
        );
        assert_eq!(
            CoreError::DuplicateReview.to_string(),
            "a review already exists for this booking"
        );
        assert_eq!(
            CoreError::LedgerUnavailable.to_string(),
            "ledger temporarily unavailable, try again"
        );
    }

    #[test]
    fn only_ledger_failures_are_retryable() {
        assert!(CoreError::LedgerUnavailable.retryable());
        assert!(!CoreError::InsufficientFunds.retryable());
        assert!(
            !CoreError::StateConflict {
                expected: BookingStatus::Accepted,
                actual: BookingStatus::Cancelled,
            }
            .retryable()
        );
    }

    #[test]
    fn errors_are_cloneable() {
        let error = CoreError::InsufficientFunds;
        let cloned = error.clone();
        assert_eq!(error, cloned);
    }
}
