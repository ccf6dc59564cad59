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

//! Reviews and reports for completed work.

use crate::base::{BookingId, UserId};
use crate::error::CoreError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A rating left by the payer of a completed booking.
///
/// At most one per `(booking, user)` pair; the payee user is resolved from
/// the provider through the directory, never taken from the provider record
/// itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub provider_user_id: UserId,
    pub rating: u8,
    pub comment: String,
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Validates rating and comment and builds the record.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InvalidRating`] - rating outside 1..=5.
    /// - [`CoreError::MissingComment`] - empty or whitespace comment.
    pub fn new(
        booking_id: BookingId,
        user_id: UserId,
        provider_user_id: UserId,
        rating: u8,
        comment: &str,
    ) -> Result<Self, CoreError> {
        if !(1..=5).contains(&rating) {
            return Err(CoreError::InvalidRating);
        }
        let comment = comment.trim();
        if comment.is_empty() {
            return Err(CoreError::MissingComment);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            booking_id,
            user_id,
            provider_user_id,
            rating,
            comment: comment.to_owned(),
            created_at: Utc::now(),
        })
    }
}

/// Moderation state of a report. Reports are created `Pending`; moderation
/// itself happens outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Pending,
}

/// A complaint filed by one party of a booking against the other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub reporter_id: UserId,
    pub reported_id: UserId,
    pub booking_id: Option<BookingId>,
    pub reason: String,
    pub description: String,
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// # Errors
    ///
    /// [`CoreError::MissingReason`] when the reason text is empty.
    pub fn new(
        reporter_id: UserId,
        reported_id: UserId,
        booking_id: Option<BookingId>,
        reason: &str,
        description: &str,
    ) -> Result<Self, CoreError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::MissingReason);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            reporter_id,
            reported_id,
            booking_id,
            reason: reason.to_owned(),
            description: description.trim().to_owned(),
            status: ReportStatus::Pending,
            created_at: Utc::now(),
        })
    }
}

/// Persistence for reviews with the `(booking_id, user_id)` uniqueness
/// constraint.
pub trait ReviewStore: Send + Sync {
    /// Inserts a review; duplicate `(booking, user)` pairs are rejected
    /// atomically.
    fn insert(&self, review: Review) -> Result<(), CoreError>;

    /// Whether a review exists for the pair.
    fn exists(&self, booking_id: BookingId, user_id: UserId) -> bool;

    /// All reviews written about a payee user.
    fn for_payee(&self, provider_user_id: UserId) -> Vec<Review>;
}

/// Persistence for reports. Append-only.
pub trait ReportStore: Send + Sync {
    fn insert(&self, report: Report) -> Result<(), CoreError>;
    fn count(&self) -> usize;
}

/// In-memory [`ReviewStore`]; the entry API makes the uniqueness check and
/// insert one atomic step.
#[derive(Debug, Default)]
pub struct MemoryReviewStore {
    reviews: DashMap<(BookingId, UserId), Review>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReviewStore for MemoryReviewStore {
    fn insert(&self, review: Review) -> Result<(), CoreError> {
        match self.reviews.entry((review.booking_id, review.user_id)) {
            Entry::Occupied(_) => Err(CoreError::DuplicateReview),
            Entry::Vacant(entry) => {
                entry.insert(review);
                Ok(())
            }
        }
    }

    fn exists(&self, booking_id: BookingId, user_id: UserId) -> bool {
        self.reviews.contains_key(&(booking_id, user_id))
    }

    fn for_payee(&self, provider_user_id: UserId) -> Vec<Review> {
        let mut out: Vec<Review> = self
            .reviews
            .iter()
            .filter(|r| r.provider_user_id == provider_user_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }
}

/// In-memory [`ReportStore`].
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: DashMap<Uuid, Report>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for MemoryReportStore {
    fn insert(&self, report: Report) -> Result<(), CoreError> {
        self.reports.insert(report.id, report);
        Ok(())
    }

    fn count(&self) -> usize {
        self.reports.len()
    }
}
