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

//! Lifecycle manager public API integration tests.

use bookline::{
    Amount, BookingId, BookingRequest, BookingStatus, CoreError, DomainEvent, LedgerStore,
    LifecycleManager, MemoryBookingStore, MemoryDirectory, MemoryLedger, MemoryReportStore,
    MemoryReviewStore, NotificationDispatcher, NotificationError, PaymentPlan, PaymentStage,
    ProviderId, Reference, TransactionRecord, TransferOutcome, TransferRequest, UserId,
    WalletSnapshot,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const PAYER: UserId = UserId(1);
const PROVIDER: ProviderId = ProviderId(9);
const PROVIDER_USER: UserId = UserId(42);

/// Dispatcher that records every event it receives.
#[derive(Default)]
struct RecordingDispatcher {
    events: Mutex<Vec<DomainEvent>>,
}

impl NotificationDispatcher for RecordingDispatcher {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotificationError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Dispatcher that always fails; the core must not care.
struct FailingDispatcher;

impl NotificationDispatcher for FailingDispatcher {
    fn notify(&self, _event: &DomainEvent) -> Result<(), NotificationError> {
        Err(NotificationError("push gateway down".into()))
    }
}

/// Ledger wrapper whose first `fail_times` transfers report the store as
/// unavailable, for exercising the retry-with-same-reference path.
struct FlakyLedger {
    inner: MemoryLedger,
    remaining_failures: AtomicUsize,
}

impl FlakyLedger {
    fn new(fail_times: usize) -> Self {
        Self {
            inner: MemoryLedger::new(),
            remaining_failures: AtomicUsize::new(fail_times),
        }
    }
}

impl LedgerStore for FlakyLedger {
    fn open_wallet(&self, user_id: UserId) {
        self.inner.open_wallet(user_id)
    }

    fn fund(&self, user_id: UserId, amount: Amount) -> Result<(), CoreError> {
        self.inner.fund(user_id, amount)
    }

    fn balance(&self, user_id: UserId) -> Result<Amount, CoreError> {
        self.inner.balance(user_id)
    }

    fn snapshot(&self, user_id: UserId) -> Result<WalletSnapshot, CoreError> {
        self.inner.snapshot(user_id)
    }

    fn snapshots(&self) -> Vec<WalletSnapshot> {
        self.inner.snapshots()
    }

    fn transfer(&self, request: TransferRequest) -> Result<TransferOutcome, CoreError> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(CoreError::LedgerUnavailable);
        }
        self.inner.transfer(request)
    }

    fn transaction(&self, reference: Reference) -> Option<TransactionRecord> {
        self.inner.transaction(reference)
    }

    fn transactions_for_booking(&self, booking_id: BookingId) -> Vec<TransactionRecord> {
        self.inner.transactions_for_booking(booking_id)
    }
}

struct Fixture {
    manager: LifecycleManager,
    ledger: Arc<dyn LedgerStore>,
    dispatcher: Arc<RecordingDispatcher>,
}

fn fixture_with_ledger(ledger: Arc<dyn LedgerStore>) -> Fixture {
    let directory = Arc::new(MemoryDirectory::new());
    directory.register(PROVIDER, PROVIDER_USER);
    ledger.open_wallet(PROVIDER_USER);

    let dispatcher = Arc::new(RecordingDispatcher::default());
    let manager = LifecycleManager::new(
        Arc::new(MemoryBookingStore::new()),
        ledger.clone(),
        directory,
        Arc::new(MemoryReviewStore::new()),
        Arc::new(MemoryReportStore::new()),
        dispatcher.clone(),
    );
    Fixture {
        manager,
        ledger,
        dispatcher,
    }
}

fn fixture() -> Fixture {
    fixture_with_ledger(Arc::new(MemoryLedger::new()))
}

fn request(plan: PaymentPlan, amount: Amount) -> BookingRequest {
    BookingRequest {
        payer_id: PAYER,
        payer_name: "Ada".into(),
        provider_id: PROVIDER,
        provider_name: "Sparks Electrical".into(),
        service_name: "rewiring".into(),
        payment_plan: plan,
        amount,
    }
}

#[test]
fn full_upfront_happy_path() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 10_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 10_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();

    let receipt = fix.manager.pay(booking.id, PAYER, None).unwrap();
    assert_eq!(receipt.amount, 10_000);
    assert_eq!(receipt.new_status, BookingStatus::InProgress);

    let done = fix.manager.mark_done(booking.id, PROVIDER).unwrap();
    assert_eq!(done.status, BookingStatus::Completed);

    assert_eq!(fix.ledger.balance(PAYER).unwrap(), 0);
    assert_eq!(fix.ledger.balance(PROVIDER_USER).unwrap(), 10_000);
}

#[test]
fn half_plan_odd_amount_settles_exactly() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 10_001).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::Half, 10_001))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();

    let first = fix.manager.pay(booking.id, PAYER, None).unwrap();
    assert_eq!(first.amount, 5_000);
    assert_eq!(first.new_status, BookingStatus::InProgress);

    let second = fix.manager.pay(booking.id, PAYER, None).unwrap();
    assert_eq!(second.amount, 5_001);
    assert_eq!(second.new_status, BookingStatus::Completed);

    assert_eq!(fix.ledger.balance(PAYER).unwrap(), 0);
    assert_eq!(fix.ledger.balance(PROVIDER_USER).unwrap(), 10_001);
}

#[test]
fn insufficient_funds_rejected_before_any_write() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 4_999).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 5_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();

    let result = fix.manager.pay(booking.id, PAYER, None);
    assert_eq!(result, Err(CoreError::InsufficientFunds));

    assert_eq!(fix.ledger.balance(PAYER).unwrap(), 4_999);
    assert_eq!(fix.ledger.balance(PROVIDER_USER).unwrap(), 0);
    assert!(fix.ledger.transactions_for_booking(booking.id).is_empty());

    let loaded = fix.manager.booking(booking.id).unwrap();
    assert_eq!(loaded.status, BookingStatus::Accepted);
    assert!(!loaded.first_payment_completed);
}

#[test]
fn pay_before_acceptance_conflicts() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 10_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 1_000))
        .unwrap();

    let result = fix.manager.pay(booking.id, PAYER, None);
    assert!(matches!(result, Err(CoreError::StateConflict { .. })));
}

#[test]
fn half_plan_cancellation_locks_after_first_installment() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 10_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::Half, 10_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();

    // Cancellable while accepted.
    // (Checked by cancelling a sibling booking to keep this one alive.)
    let sibling = fix
        .manager
        .request(request(PaymentPlan::Half, 2_000))
        .unwrap();
    fix.manager.accept(sibling.id, PROVIDER).unwrap();
    let cancelled = fix
        .manager
        .cancel(sibling.id, PAYER, "changed plans")
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.cancelled_by, Some(PAYER));
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("changed plans"));

    // The instant the first installment clears, cancellation is locked.
    fix.manager.pay(booking.id, PAYER, None).unwrap();
    let result = fix.manager.cancel(booking.id, PAYER, "too late");
    assert_eq!(result, Err(CoreError::CancellationLocked));
}

#[test]
fn full_upfront_in_progress_still_cancellable() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 1_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 1_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();
    fix.manager.pay(booking.id, PAYER, None).unwrap();

    let cancelled = fix.manager.cancel(booking.id, PAYER, "no show").unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
}

#[test]
fn cancelled_booking_cannot_be_accepted_or_paid() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 1_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 1_000))
        .unwrap();
    fix.manager.cancel(booking.id, PAYER, "found someone else").unwrap();

    assert!(matches!(
        fix.manager.accept(booking.id, PROVIDER),
        Err(CoreError::StateConflict { .. })
    ));
    assert!(matches!(
        fix.manager.pay(booking.id, PAYER, None),
        Err(CoreError::StateConflict { .. })
    ));
}

#[test]
fn retry_with_same_reference_after_ledger_failure() {
    let flaky = Arc::new(FlakyLedger::new(1));
    let fix = fixture_with_ledger(flaky);
    fix.ledger.fund(PAYER, 10_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 10_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();

    let reference = Reference::new();
    let first = fix.manager.pay(booking.id, PAYER, Some(reference));
    assert_eq!(first, Err(CoreError::LedgerUnavailable));
    assert!(first.unwrap_err().retryable());

    // Booking untouched by the failed drive.
    let loaded = fix.manager.booking(booking.id).unwrap();
    assert_eq!(loaded.status, BookingStatus::Accepted);

    // Re-drive with the same reference: applies exactly once.
    let receipt = fix.manager.pay(booking.id, PAYER, Some(reference)).unwrap();
    assert_eq!(receipt.reference, reference);
    assert_eq!(fix.ledger.balance(PROVIDER_USER).unwrap(), 10_000);
    assert_eq!(fix.ledger.transactions_for_booking(booking.id).len(), 1);
}

#[test]
fn redrive_of_settled_installment_leaves_booking_unchanged() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 10_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::Half, 10_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();

    let reference = Reference::new();
    let first = fix.manager.pay(booking.id, PAYER, Some(reference)).unwrap();
    assert!(!first.already_applied);
    assert_eq!(first.new_status, BookingStatus::InProgress);

    // A client retrying a settlement that in fact succeeded must not
    // advance the booking past the money that actually moved.
    let redrive = fix.manager.pay(booking.id, PAYER, Some(reference)).unwrap();
    assert!(redrive.already_applied);
    assert_eq!(redrive.stage, PaymentStage::First);
    assert_eq!(redrive.amount, 5_000);
    assert_eq!(redrive.new_status, BookingStatus::InProgress);

    let loaded = fix.manager.booking(booking.id).unwrap();
    assert_eq!(loaded.status, BookingStatus::InProgress);
    assert!(loaded.first_payment_completed);
    assert!(!loaded.final_payment_completed);
    assert_eq!(fix.ledger.balance(PROVIDER_USER).unwrap(), 5_000);
    assert_eq!(fix.ledger.transactions_for_booking(booking.id).len(), 1);

    // The final installment still settles normally afterwards.
    let last = fix.manager.pay(booking.id, PAYER, None).unwrap();
    assert_eq!(last.new_status, BookingStatus::Completed);
    assert_eq!(fix.ledger.balance(PROVIDER_USER).unwrap(), 10_000);
}

#[test]
fn transaction_metadata_records_stage_and_names() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 10_001).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::Half, 10_001))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();
    fix.manager.pay(booking.id, PAYER, None).unwrap();
    fix.manager.pay(booking.id, PAYER, None).unwrap();

    let records = fix.ledger.transactions_for_booking(booking.id);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].metadata.stage, "first_installment");
    assert_eq!(records[1].metadata.stage, "final_installment");
    assert_eq!(records[0].metadata.service_name, "rewiring");
    assert_eq!(records[0].payee_id, PROVIDER_USER);
    assert_eq!(records[0].amount + records[1].amount, 10_001);
}

#[test]
fn review_once_after_completion() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 10_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::Half, 10_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();

    // Not reviewable before completion.
    assert!(matches!(
        fix.manager.submit_review(booking.id, PAYER, 5, "great"),
        Err(CoreError::StateConflict { .. })
    ));

    fix.manager.pay(booking.id, PAYER, None).unwrap();
    fix.manager.pay(booking.id, PAYER, None).unwrap();

    let review = fix
        .manager
        .submit_review(booking.id, PAYER, 5, "great work")
        .unwrap();
    assert_eq!(review.provider_user_id, PROVIDER_USER);

    // Second attempt conflicts and inserts nothing.
    assert_eq!(
        fix.manager.submit_review(booking.id, PAYER, 1, "actually no"),
        Err(CoreError::DuplicateReview)
    );
}

#[test]
fn review_validation_happens_before_store_access() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 1_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 1_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();
    fix.manager.pay(booking.id, PAYER, None).unwrap();
    fix.manager.mark_done(booking.id, PROVIDER).unwrap();

    assert_eq!(
        fix.manager.submit_review(booking.id, PAYER, 0, "meh"),
        Err(CoreError::InvalidRating)
    );
    assert_eq!(
        fix.manager.submit_review(booking.id, PAYER, 3, "  "),
        Err(CoreError::MissingComment)
    );
}

#[test]
fn report_requires_being_a_party() {
    let fix = fixture();
    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 1_000))
        .unwrap();

    let report = fix
        .manager
        .submit_report(PAYER, PROVIDER_USER, Some(booking.id), "no-show", "never arrived")
        .unwrap();
    assert_eq!(report.reporter_id, PAYER);
    assert_eq!(report.booking_id, Some(booking.id));

    assert_eq!(
        fix.manager
            .submit_report(UserId(999), PAYER, Some(booking.id), "spam", ""),
        Err(CoreError::NotAuthorized)
    );
}

#[test]
fn notification_failure_never_fails_the_action() {
    let ledger: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
    let directory = Arc::new(MemoryDirectory::new());
    directory.register(PROVIDER, PROVIDER_USER);
    ledger.open_wallet(PROVIDER_USER);
    ledger.fund(PAYER, 10_000).unwrap();

    let manager = LifecycleManager::new(
        Arc::new(MemoryBookingStore::new()),
        ledger.clone(),
        directory,
        Arc::new(MemoryReviewStore::new()),
        Arc::new(MemoryReportStore::new()),
        Arc::new(FailingDispatcher),
    );

    let booking = manager
        .request(request(PaymentPlan::FullUpfront, 10_000))
        .unwrap();
    manager.accept(booking.id, PROVIDER).unwrap();
    let receipt = manager.pay(booking.id, PAYER, None).unwrap();

    // Money moved despite every notification failing.
    assert_eq!(receipt.new_status, BookingStatus::InProgress);
    assert_eq!(ledger.balance(PROVIDER_USER).unwrap(), 10_000);
}

#[test]
fn lifecycle_events_reach_the_dispatcher() {
    let fix = fixture();
    fix.ledger.fund(PAYER, 1_000).unwrap();

    let booking = fix
        .manager
        .request(request(PaymentPlan::FullUpfront, 1_000))
        .unwrap();
    fix.manager.accept(booking.id, PROVIDER).unwrap();
    fix.manager.pay(booking.id, PAYER, None).unwrap();

    let events = fix.dispatcher.events.lock();
    assert!(matches!(events[0], DomainEvent::BookingRequested { .. }));
    assert!(
        events
            .iter()
            .any(|e| matches!(e, DomainEvent::PaymentCompleted { amount: 1_000, .. }))
    );
    assert!(events.iter().any(|e| matches!(
        e,
        DomainEvent::BookingStatusChanged {
            current: BookingStatus::InProgress,
            ..
        }
    )));
}
