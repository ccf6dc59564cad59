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

use bookline::{
    BookingId, BookingRequest, LedgerStore, LifecycleManager, MemoryBookingStore, MemoryDirectory,
    MemoryLedger, MemoryReportStore, MemoryReviewStore, PaymentPlan, ProviderId,
    TracingDispatcher, UserId,
};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::warn;

/// Bookline replay driver - process marketplace intent CSV files
///
/// Reads intents from a CSV file, replays them against an in-memory core,
/// and writes the resulting wallet snapshots to stdout. Useful for
/// simulation and manual reconciliation.
#[derive(Parser, Debug)]
#[command(name = "bookline")]
#[command(about = "Replays marketplace intents against the booking core", long_about = None)]
struct Args {
    /// Path to CSV file with intents
    ///
    /// Expected format: op,booking,user,provider,amount,plan,note
    /// Example: cargo run -- intents.csv > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let replay = match process_intents(BufReader::new(file)) {
        Ok(replay) => replay,
        Err(e) => {
            eprintln!("Error processing intents: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_wallets(&replay, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, booking, user, provider, amount, plan, note`. Which fields
/// are required depends on the op; `note` carries the service name for
/// `request` and the reason for `cancel`.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    booking: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    user: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    provider: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option", default)]
    amount: Option<u64>,
    #[serde(default)]
    plan: Option<String>,
    #[serde(default)]
    note: Option<String>,
}

/// The core plus the CSV-key to booking-id mapping built during a replay.
pub struct Replay {
    pub manager: LifecycleManager,
    pub ledger: Arc<MemoryLedger>,
    pub bookings: HashMap<u64, BookingId>,
}

fn parse_plan(plan: Option<&str>) -> Option<PaymentPlan> {
    match plan?.to_lowercase().as_str() {
        "full_upfront" => Some(PaymentPlan::FullUpfront),
        "half" => Some(PaymentPlan::Half),
        _ => None,
    }
}

/// Replays intents from a CSV reader.
///
/// Streaming and forgiving, like any batch reconciliation tool: malformed
/// rows and rejected intents are logged and skipped, valid ones apply in
/// order.
pub fn process_intents<R: Read>(reader: R) -> Result<Replay, csv::Error> {
    let directory = Arc::new(MemoryDirectory::new());
    let ledger = Arc::new(MemoryLedger::new());
    let manager = LifecycleManager::new(
        Arc::new(MemoryBookingStore::new()),
        ledger.clone(),
        directory.clone(),
        Arc::new(MemoryReviewStore::new()),
        Arc::new(MemoryReportStore::new()),
        Arc::new(TracingDispatcher),
    );
    let mut bookings: HashMap<u64, BookingId> = HashMap::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(line, error = %e, "skipping malformed row");
                continue;
            }
        };

        let outcome: Result<(), String> = (|| {
            match record.op.to_lowercase().as_str() {
                "provider" => {
                    let provider = record.provider.ok_or("missing provider")?;
                    let owner = record.user.ok_or("missing user")?;
                    directory.register(ProviderId(provider), UserId(owner));
                    ledger.open_wallet(UserId(owner));
                }
                "fund" => {
                    let user = record.user.ok_or("missing user")?;
                    let amount = record.amount.ok_or("missing amount")?;
                    ledger
                        .fund(UserId(user), amount)
                        .map_err(|e| e.to_string())?;
                }
                "request" => {
                    let key = record.booking.ok_or("missing booking key")?;
                    let payer = record.user.ok_or("missing user")?;
                    let provider = record.provider.ok_or("missing provider")?;
                    let amount = record.amount.ok_or("missing amount")?;
                    let plan = parse_plan(record.plan.as_deref()).ok_or("missing plan")?;
                    let service_name = record.note.clone().unwrap_or_else(|| "service".into());

                    let booking = manager
                        .request(BookingRequest {
                            payer_id: UserId(payer),
                            payer_name: format!("user-{payer}"),
                            provider_id: ProviderId(provider),
                            provider_name: format!("provider-{provider}"),
                            service_name,
                            payment_plan: plan,
                            amount,
                        })
                        .map_err(|e| e.to_string())?;
                    bookings.insert(key, booking.id);
                }
                "accept" => {
                    let id = lookup(&bookings, record.booking)?;
                    let provider = record.provider.ok_or("missing provider")?;
                    manager
                        .accept(id, ProviderId(provider))
                        .map_err(|e| e.to_string())?;
                }
                "reject" => {
                    let id = lookup(&bookings, record.booking)?;
                    let provider = record.provider.ok_or("missing provider")?;
                    manager
                        .reject(id, ProviderId(provider))
                        .map_err(|e| e.to_string())?;
                }
                "pay" => {
                    let id = lookup(&bookings, record.booking)?;
                    let user = record.user.ok_or("missing user")?;
                    manager
                        .pay(id, UserId(user), None)
                        .map_err(|e| e.to_string())?;
                }
                "cancel" => {
                    let id = lookup(&bookings, record.booking)?;
                    let user = record.user.ok_or("missing user")?;
                    let reason = record.note.as_deref().unwrap_or("cancelled via replay");
                    manager
                        .cancel(id, UserId(user), reason)
                        .map_err(|e| e.to_string())?;
                }
                "done" => {
                    let id = lookup(&bookings, record.booking)?;
                    let provider = record.provider.ok_or("missing provider")?;
                    manager
                        .mark_done(id, ProviderId(provider))
                        .map_err(|e| e.to_string())?;
                }
                other => return Err(format!("unknown op '{other}'")),
            }
            Ok(())
        })();

        if let Err(reason) = outcome {
            warn!(line, op = %record.op, %reason, "skipping intent");
        }
    }

    Ok(Replay {
        manager,
        ledger,
        bookings,
    })
}

fn lookup(bookings: &HashMap<u64, BookingId>, key: Option<u64>) -> Result<BookingId, String> {
    let key = key.ok_or("missing booking key")?;
    bookings
        .get(&key)
        .copied()
        .ok_or_else(|| format!("unknown booking key {key}"))
}

/// Writes wallet snapshots as CSV.
///
/// Columns: `user_id, balance, updated_at`, ordered by user id.
pub fn write_wallets<W: Write>(replay: &Replay, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for snapshot in replay.ledger.snapshots() {
        wtr.serialize(&snapshot)?;
    }
    wtr.flush()?;
    Ok(())
}
