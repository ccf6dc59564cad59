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

//! Domain events and outbound notification dispatch.
//!
//! Events are pushed onto the outbox only after the triggering mutation has
//! committed, and drained fire-and-forget: a dispatcher failure is logged
//! and swallowed, never surfaced to the caller of the core. "Did the money
//! move" and "did the notification send" are decoupled by construction.

use crate::base::{Amount, BookingId, ProviderId, Reference, UserId};
use crate::booking::BookingStatus;
use crossbeam::queue::SegQueue;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Lifecycle and payment events consumed by the notification layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum DomainEvent {
    BookingRequested {
        booking_id: BookingId,
        payer_id: UserId,
        provider_id: ProviderId,
    },
    BookingStatusChanged {
        booking_id: BookingId,
        previous: BookingStatus,
        current: BookingStatus,
        actor: UserId,
    },
    PaymentCompleted {
        booking_id: BookingId,
        reference: Reference,
        amount: Amount,
        stage: String,
        payer_id: UserId,
        payee_id: UserId,
    },
}

/// Dispatch failure. Always non-fatal to the triggering operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("notification dispatch failed: {0}")]
pub struct NotificationError(pub String);

/// External collaborator responsible for user-visible notifications.
///
/// The core only calls it and tolerates its failure.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotificationError>;
}

/// Dispatcher that drops events. Useful when no notification layer exists.
#[derive(Debug, Default)]
pub struct NullDispatcher;

impl NotificationDispatcher for NullDispatcher {
    fn notify(&self, _event: &DomainEvent) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Dispatcher that logs events through `tracing`.
#[derive(Debug, Default)]
pub struct TracingDispatcher;

impl NotificationDispatcher for TracingDispatcher {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotificationError> {
        tracing::info!(?event, "domain event");
        Ok(())
    }
}

/// Outbound event queue.
///
/// Producers push after their store mutation commits; `drain` hands each
/// event to the dispatcher in FIFO order. The queue is lock-free and safe
/// for concurrent producers.
#[derive(Debug, Default)]
pub struct EventOutbox {
    queue: SegQueue<DomainEvent>,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues an event for delivery.
    pub fn push(&self, event: DomainEvent) {
        self.queue.push(event);
    }

    /// Number of undelivered events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Delivers every queued event to the dispatcher.
    ///
    /// Failures are logged and the event dropped; delivery is best-effort
    /// by design. Returns the number of events handed over successfully.
    pub fn drain(&self, dispatcher: &dyn NotificationDispatcher) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.queue.pop() {
            match dispatcher.notify(&event) {
                Ok(()) => {
                    delivered += 1;
                    debug!(?event, "notification dispatched");
                }
                Err(e) => {
                    warn!(?event, error = %e, "notification dispatch failed, dropping event");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        events: Mutex<Vec<DomainEvent>>,
    }

    impl NotificationDispatcher for Recording {
        fn notify(&self, event: &DomainEvent) -> Result<(), NotificationError> {
            self.events.lock().push(event.clone());
            Ok(())
        }
    }

    struct AlwaysFails;

    impl NotificationDispatcher for AlwaysFails {
        fn notify(&self, _event: &DomainEvent) -> Result<(), NotificationError> {
            Err(NotificationError("push gateway down".into()))
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::BookingRequested {
            booking_id: BookingId::new(),
            payer_id: UserId(1),
            provider_id: ProviderId(9),
        }
    }

    #[test]
    fn drain_delivers_in_fifo_order() {
        let outbox = EventOutbox::new();
        let first = sample_event();
        let second = DomainEvent::BookingStatusChanged {
            booking_id: BookingId::new(),
            previous: BookingStatus::Pending,
            current: BookingStatus::Accepted,
            actor: UserId(42),
        };
        outbox.push(first.clone());
        outbox.push(second.clone());

        let recorder = Recording {
            events: Mutex::new(Vec::new()),
        };
        let delivered = outbox.drain(&recorder);

        assert_eq!(delivered, 2);
        assert_eq!(outbox.pending(), 0);
        assert_eq!(*recorder.events.lock(), vec![first, second]);
    }

    #[test]
    fn dispatch_failure_is_swallowed() {
        let outbox = EventOutbox::new();
        outbox.push(sample_event());

        // No panic, no error; the event is dropped.
        let delivered = outbox.drain(&AlwaysFails);
        assert_eq!(delivered, 0);
        assert_eq!(outbox.pending(), 0);
    }
}
