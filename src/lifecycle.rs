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

//! Booking lifecycle manager: the public API of the core.
//!
//! Owns the status state machine. Every operation takes the acting identity
//! explicitly, asks the eligibility gates for a verdict inside the booking
//! record lock, performs the conditional store mutation, and only then
//! emits domain events. Notification dispatch is fire-and-forget; its
//! failures never change the outcome reported to the caller.

use crate::base::{BookingId, ProviderId, Reference, UserId};
use crate::booking::{Booking, BookingRequest, BookingStatus};
use crate::booking_store::BookingStore;
use crate::directory::ProviderDirectory;
use crate::eligibility;
use crate::error::CoreError;
use crate::events::{DomainEvent, EventOutbox, NotificationDispatcher};
use crate::feedback::{Report, ReportStore, Review, ReviewStore};
use crate::ledger::LedgerStore;
use crate::settlement::{SettlementEngine, SettlementReceipt};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Central coordinator for booking state, settlements, and feedback.
///
/// Wallets and bookings are only ever mutated through this manager and its
/// settlement engine; UI layers call in with explicit actor identities and
/// read snapshots back.
pub struct LifecycleManager {
    bookings: Arc<dyn BookingStore>,
    directory: Arc<dyn ProviderDirectory>,
    reviews: Arc<dyn ReviewStore>,
    reports: Arc<dyn ReportStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    outbox: Arc<EventOutbox>,
    engine: SettlementEngine,
}

impl LifecycleManager {
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        ledger: Arc<dyn LedgerStore>,
        directory: Arc<dyn ProviderDirectory>,
        reviews: Arc<dyn ReviewStore>,
        reports: Arc<dyn ReportStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let outbox = Arc::new(EventOutbox::new());
        let engine = SettlementEngine::new(ledger, bookings.clone(), outbox.clone());
        Self {
            bookings,
            directory,
            reviews,
            reports,
            dispatcher,
            outbox,
            engine,
        }
    }

    /// Creates a booking in `Pending` on behalf of the payer.
    pub fn request(&self, request: BookingRequest) -> Result<Booking, CoreError> {
        // The provider must exist before anything downstream relies on its
        // wallet owner.
        self.directory
            .resolve_provider_user_id(request.provider_id)?;

        let booking = Booking::new(request)?;
        self.bookings.insert(booking.clone())?;
        info!(booking = %booking.id, payer = %booking.payer_id, "booking requested");

        self.outbox.push(DomainEvent::BookingRequested {
            booking_id: booking.id,
            payer_id: booking.payer_id,
            provider_id: booking.provider_id,
        });
        self.flush_notifications();
        Ok(booking)
    }

    /// Provider accepts a pending booking: `Pending → Accepted`.
    pub fn accept(
        &self,
        booking_id: BookingId,
        acting_provider_id: ProviderId,
    ) -> Result<Booking, CoreError> {
        let provider_user = self.directory.resolve_provider_user_id(acting_provider_id)?;

        let updated = self.bookings.update(booking_id, &mut |booking| {
            if booking.provider_id != acting_provider_id {
                return Err(CoreError::NotAuthorized);
            }
            Self::cas(booking, BookingStatus::Pending, BookingStatus::Accepted)
        })?;

        self.emit_status_change(booking_id, BookingStatus::Pending, &updated, provider_user);
        Ok(updated)
    }

    /// Provider declines a pending booking: `Pending → Cancelled`.
    pub fn reject(
        &self,
        booking_id: BookingId,
        acting_provider_id: ProviderId,
    ) -> Result<Booking, CoreError> {
        let provider_user = self.directory.resolve_provider_user_id(acting_provider_id)?;

        let updated = self.bookings.update(booking_id, &mut |booking| {
            if booking.provider_id != acting_provider_id {
                return Err(CoreError::NotAuthorized);
            }
            Self::cas(booking, BookingStatus::Pending, BookingStatus::Cancelled)?;
            booking.cancelled_at = Some(Utc::now());
            booking.cancelled_by = Some(provider_user);
            booking.cancellation_reason = Some("declined by provider".to_owned());
            Ok(())
        })?;

        self.emit_status_change(booking_id, BookingStatus::Pending, &updated, provider_user);
        Ok(updated)
    }

    /// Payer settles the next installment.
    ///
    /// The resulting status is computed from the plan and the installment
    /// that cleared (`Accepted → InProgress` on the first, `InProgress →
    /// Completed` on the final), never supplied by the caller.
    ///
    /// Pass `reference` when retrying a settlement that failed with a
    /// retryable error; leave it `None` to mint a fresh key.
    pub fn pay(
        &self,
        booking_id: BookingId,
        acting_user_id: UserId,
        reference: Option<Reference>,
    ) -> Result<SettlementReceipt, CoreError> {
        let booking = self.bookings.get(booking_id)?;
        let payee_user = self
            .directory
            .resolve_provider_user_id(booking.provider_id)?;
        let reference = reference.unwrap_or_default();

        let receipt = self
            .engine
            .settle(booking_id, acting_user_id, payee_user, reference)?;
        self.flush_notifications();
        Ok(receipt)
    }

    /// Payer cancels the booking: `Pending | Accepted | InProgress →
    /// Cancelled`, gated by [`eligibility::can_cancel`].
    pub fn cancel(
        &self,
        booking_id: BookingId,
        acting_user_id: UserId,
        reason: &str,
    ) -> Result<Booking, CoreError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::MissingReason);
        }

        let mut previous = BookingStatus::Pending;
        let updated = self.bookings.update(booking_id, &mut |booking| {
            eligibility::can_cancel(booking, acting_user_id)?;
            previous = booking.status;
            Self::cas(booking, previous, BookingStatus::Cancelled)?;
            booking.cancelled_at = Some(Utc::now());
            booking.cancelled_by = Some(acting_user_id);
            booking.cancellation_reason = Some(reason.to_owned());
            Ok(())
        })?;

        self.emit_status_change(booking_id, previous, &updated, acting_user_id);
        Ok(updated)
    }

    /// Provider asserts the work is finished: `InProgress → Completed`,
    /// legal only once every installment has settled.
    pub fn mark_done(
        &self,
        booking_id: BookingId,
        acting_provider_id: ProviderId,
    ) -> Result<Booking, CoreError> {
        let provider_user = self.directory.resolve_provider_user_id(acting_provider_id)?;

        let updated = self.bookings.update(booking_id, &mut |booking| {
            if booking.provider_id != acting_provider_id {
                return Err(CoreError::NotAuthorized);
            }
            if !booking.fully_paid() {
                return Err(CoreError::SettlementIncomplete);
            }
            Self::cas(booking, BookingStatus::InProgress, BookingStatus::Completed)
        })?;

        self.emit_status_change(booking_id, BookingStatus::InProgress, &updated, provider_user);
        Ok(updated)
    }

    /// Clears the viewer's notification badge. Not a status transition and
    /// never racing one: only the viewed flag moves.
    pub fn mark_viewed(
        &self,
        booking_id: BookingId,
        acting_user_id: UserId,
    ) -> Result<(), CoreError> {
        let booking = self.bookings.get(booking_id)?;
        let provider_user = self
            .directory
            .resolve_provider_user_id(booking.provider_id)?;

        self.bookings.update(booking_id, &mut |booking| {
            if acting_user_id == booking.payer_id {
                booking.payer_viewed = true;
            } else if acting_user_id == provider_user {
                booking.provider_viewed = true;
            } else {
                return Err(CoreError::NotAuthorized);
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Payer reviews a completed booking. One review per (booking, payer).
    pub fn submit_review(
        &self,
        booking_id: BookingId,
        acting_user_id: UserId,
        rating: u8,
        comment: &str,
    ) -> Result<Review, CoreError> {
        let booking = self.bookings.get(booking_id)?;
        let payee_user = self
            .directory
            .resolve_provider_user_id(booking.provider_id)?;

        let already = self.reviews.exists(booking_id, acting_user_id);
        eligibility::can_review(&booking, acting_user_id, already)?;

        let review = Review::new(booking_id, acting_user_id, payee_user, rating, comment)?;
        // The store enforces uniqueness again, closing the race between the
        // existence check and the insert.
        self.reviews.insert(review.clone())?;
        Ok(review)
    }

    /// Either party reports the other over a booking, or a user reports
    /// another user with no booking attached.
    pub fn submit_report(
        &self,
        acting_user_id: UserId,
        reported_user_id: UserId,
        booking_id: Option<BookingId>,
        reason: &str,
        description: &str,
    ) -> Result<Report, CoreError> {
        if let Some(id) = booking_id {
            let booking = self.bookings.get(id)?;
            let payee_user = self
                .directory
                .resolve_provider_user_id(booking.provider_id)?;
            eligibility::can_report(&booking, acting_user_id, payee_user)?;
        }

        let report = Report::new(
            acting_user_id,
            reported_user_id,
            booking_id,
            reason,
            description,
        )?;
        self.reports.insert(report.clone())?;
        Ok(report)
    }

    /// Snapshot of a booking.
    pub fn booking(&self, booking_id: BookingId) -> Result<Booking, CoreError> {
        self.bookings.get(booking_id)
    }

    /// Conditional status swap; the caller already holds the record lock.
    fn cas(
        booking: &mut Booking,
        expected: BookingStatus,
        next: BookingStatus,
    ) -> Result<(), CoreError> {
        if booking.status != expected {
            return Err(CoreError::StateConflict {
                expected,
                actual: booking.status,
            });
        }
        debug_assert!(
            expected.can_transition_to(next),
            "illegal transition {expected} -> {next}"
        );
        booking.status = next;
        booking.payer_viewed = false;
        booking.provider_viewed = false;
        booking.updated_at = Utc::now();
        Ok(())
    }

    fn emit_status_change(
        &self,
        booking_id: BookingId,
        previous: BookingStatus,
        updated: &Booking,
        actor: UserId,
    ) {
        self.outbox.push(DomainEvent::BookingStatusChanged {
            booking_id,
            previous,
            current: updated.status,
            actor,
        });
        self.flush_notifications();
    }

    fn flush_notifications(&self) {
        self.outbox.drain(self.dispatcher.as_ref());
    }
}
