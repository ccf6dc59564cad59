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

//! Booking persistence with conditional, race-safe updates.

use crate::base::BookingId;
use crate::booking::Booking;
use crate::error::CoreError;
use dashmap::DashMap;

/// Persistence for booking records.
///
/// All mutation goes through [`BookingStore::update`], which runs the
/// closure while holding the record lock. Status compare-and-swap lives in
/// the closure, so two callers racing to transition the same booking get
/// exactly one winner; the loser observes [`CoreError::StateConflict`].
pub trait BookingStore: Send + Sync {
    /// Inserts a new booking.
    fn insert(&self, booking: Booking) -> Result<(), CoreError>;

    /// Snapshot of a booking.
    fn get(&self, booking_id: BookingId) -> Result<Booking, CoreError>;

    /// Mutates a booking under its record lock and returns the updated
    /// snapshot.
    ///
    /// The closure must not modify the record on the `Err` path: an error
    /// return means the operation was a no-op.
    fn update(
        &self,
        booking_id: BookingId,
        apply: &mut dyn FnMut(&mut Booking) -> Result<(), CoreError>,
    ) -> Result<Booking, CoreError>;
}

/// In-memory [`BookingStore`] on a sharded map; the shard write lock held
/// by `update` serializes transitions per booking.
#[derive(Debug, Default)]
pub struct MemoryBookingStore {
    bookings: DashMap<BookingId, Booking>,
}

impl MemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored bookings.
    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }
}

impl BookingStore for MemoryBookingStore {
    fn insert(&self, booking: Booking) -> Result<(), CoreError> {
        self.bookings.insert(booking.id, booking);
        Ok(())
    }

    fn get(&self, booking_id: BookingId) -> Result<Booking, CoreError> {
        self.bookings
            .get(&booking_id)
            .map(|b| b.clone())
            .ok_or(CoreError::BookingNotFound)
    }

    fn update(
        &self,
        booking_id: BookingId,
        apply: &mut dyn FnMut(&mut Booking) -> Result<(), CoreError>,
    ) -> Result<Booking, CoreError> {
        let mut entry = self
            .bookings
            .get_mut(&booking_id)
            .ok_or(CoreError::BookingNotFound)?;
        apply(entry.value_mut())?;
        entry.assert_invariants();
        Ok(entry.clone())
    }
}
