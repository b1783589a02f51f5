// 💾 Writer - output tables as CSV
//
// Both tables have a fixed column order. The header is written explicitly so
// that an empty table still carries it. The events table can also be read
// back (previous run output, part-2 fallback files).

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::conversion::{ConversionEvent, ConversionType, FirstPurchase, LeadStatus};
use crate::error::{LoadError, WriteError};
use crate::lead_conversion::LeadConversionRow;
use crate::normalize::{format_timestamp, timestamp_field};
use crate::records::check_required_columns;

// ============================================================================
// COLUMN LAYOUT
// ============================================================================

/// Column order of `fct_client_conversion_events.csv`
pub const CLIENT_CONVERSION_COLUMNS: [&str; 17] = [
    "user_id",
    "branch_id",
    "local_user_created_at",
    "lead_status",
    "client_conversion_event_type",
    "client_conversion_event_id",
    "client_conversion_event_local_created_at",
    "client_conversion_event_name",
    "client_conversion_event_source",
    "first_user_membership_id",
    "first_local_membership_purchased_at",
    "first_membership_name",
    "first_membership_source",
    "first_credit_pack_id",
    "first_local_credit_pack_purchased_at",
    "first_credit_pack_name",
    "first_credit_pack_source",
];

/// Column order of `fct_lead_conversions.csv`
pub const LEAD_CONVERSION_COLUMNS: [&str; 18] = [
    "client_conversion_event_filter",
    "user_id",
    "branch_id",
    "local_user_created_at",
    "lead_status",
    "client_conversion_event_type",
    "client_conversion_event_id",
    "client_conversion_event_local_created_at",
    "client_conversion_event_name",
    "client_conversion_event_source",
    "first_user_membership_id",
    "first_local_membership_purchased_at",
    "first_membership_name",
    "first_membership_source",
    "first_credit_pack_id",
    "first_local_credit_pack_purchased_at",
    "first_credit_pack_name",
    "first_credit_pack_source",
];

/// Columns an events file must have to be read back
pub const REQUIRED_EVENT_COLUMNS: &[&str] = &["user_id", "branch_id", "lead_status"];

// ============================================================================
// ROW RECORDS
// ============================================================================

/// Flat CSV shape of one conversion event (fields in column order)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConversionRecord {
    pub user_id: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub local_user_created_at: Option<String>,
    pub lead_status: String,
    #[serde(default)]
    pub client_conversion_event_type: Option<String>,
    #[serde(default)]
    pub client_conversion_event_id: Option<String>,
    #[serde(default)]
    pub client_conversion_event_local_created_at: Option<String>,
    #[serde(default)]
    pub client_conversion_event_name: Option<String>,
    #[serde(default)]
    pub client_conversion_event_source: Option<String>,
    #[serde(default)]
    pub first_user_membership_id: Option<String>,
    #[serde(default)]
    pub first_local_membership_purchased_at: Option<String>,
    #[serde(default)]
    pub first_membership_name: Option<String>,
    #[serde(default)]
    pub first_membership_source: Option<String>,
    #[serde(default)]
    pub first_credit_pack_id: Option<String>,
    #[serde(default)]
    pub first_local_credit_pack_purchased_at: Option<String>,
    #[serde(default)]
    pub first_credit_pack_name: Option<String>,
    #[serde(default)]
    pub first_credit_pack_source: Option<String>,
}

/// Flat CSV shape of one lead conversion row (fields in column order)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LeadConversionRecord {
    pub client_conversion_event_filter: String,
    pub user_id: String,
    pub branch_id: Option<String>,
    pub local_user_created_at: Option<String>,
    pub lead_status: String,
    pub client_conversion_event_type: Option<String>,
    pub client_conversion_event_id: Option<String>,
    pub client_conversion_event_local_created_at: Option<String>,
    pub client_conversion_event_name: Option<String>,
    pub client_conversion_event_source: Option<String>,
    pub first_user_membership_id: Option<String>,
    pub first_local_membership_purchased_at: Option<String>,
    pub first_membership_name: Option<String>,
    pub first_membership_source: Option<String>,
    pub first_credit_pack_id: Option<String>,
    pub first_local_credit_pack_purchased_at: Option<String>,
    pub first_credit_pack_name: Option<String>,
    pub first_credit_pack_source: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// id, timestamp, name, source columns for one optional purchase
fn purchase_columns(
    purchase: Option<&FirstPurchase>,
) -> (Option<String>, Option<String>, Option<String>, Option<String>) {
    match purchase {
        Some(p) => (
            non_empty(&p.id),
            p.purchased_at.as_ref().map(format_timestamp),
            p.name.clone(),
            p.source.clone(),
        ),
        None => (None, None, None, None),
    }
}

impl From<&ConversionEvent> for ClientConversionRecord {
    fn from(event: &ConversionEvent) -> Self {
        let (conversion_id, conversion_at, conversion_name, conversion_source) =
            purchase_columns(event.conversion.as_ref());
        let (membership_id, membership_at, membership_name, membership_source) =
            purchase_columns(event.first_membership.as_ref());
        let (credit_id, credit_at, credit_name, credit_source) =
            purchase_columns(event.first_credit_pack.as_ref());

        ClientConversionRecord {
            user_id: event.user_id.clone(),
            branch_id: non_empty(&event.branch_id),
            local_user_created_at: event.user_created_at.as_ref().map(format_timestamp),
            lead_status: event.status.as_str().to_string(),
            client_conversion_event_type: Some(event.conversion_type.as_str().to_string()),
            client_conversion_event_id: conversion_id,
            client_conversion_event_local_created_at: conversion_at,
            client_conversion_event_name: conversion_name,
            client_conversion_event_source: conversion_source,
            first_user_membership_id: membership_id,
            first_local_membership_purchased_at: membership_at,
            first_membership_name: membership_name,
            first_membership_source: membership_source,
            first_credit_pack_id: credit_id,
            first_local_credit_pack_purchased_at: credit_at,
            first_credit_pack_name: credit_name,
            first_credit_pack_source: credit_source,
        }
    }
}

impl From<&LeadConversionRow> for LeadConversionRecord {
    fn from(row: &LeadConversionRow) -> Self {
        let event = ClientConversionRecord::from(&row.event);

        LeadConversionRecord {
            client_conversion_event_filter: row.filter.as_str().to_string(),
            user_id: event.user_id,
            branch_id: event.branch_id,
            local_user_created_at: event.local_user_created_at,
            lead_status: event.lead_status,
            client_conversion_event_type: event.client_conversion_event_type,
            client_conversion_event_id: event.client_conversion_event_id,
            client_conversion_event_local_created_at: event.client_conversion_event_local_created_at,
            client_conversion_event_name: event.client_conversion_event_name,
            client_conversion_event_source: event.client_conversion_event_source,
            first_user_membership_id: event.first_user_membership_id,
            first_local_membership_purchased_at: event.first_local_membership_purchased_at,
            first_membership_name: event.first_membership_name,
            first_membership_source: event.first_membership_source,
            first_credit_pack_id: event.first_credit_pack_id,
            first_local_credit_pack_purchased_at: event.first_local_credit_pack_purchased_at,
            first_credit_pack_name: event.first_credit_pack_name,
            first_credit_pack_source: event.first_credit_pack_source,
        }
    }
}

/// Rebuild a purchase from its four columns; absent when all are empty
fn purchase_from_columns(
    column: &'static str,
    id: Option<String>,
    purchased_at: Option<String>,
    name: Option<String>,
    source: Option<String>,
) -> Option<FirstPurchase> {
    if id.is_none() && purchased_at.is_none() && name.is_none() && source.is_none() {
        return None;
    }

    Some(FirstPurchase {
        id: id.unwrap_or_default(),
        purchased_at: timestamp_field(column, purchased_at.as_deref()),
        name,
        source,
    })
}

impl ClientConversionRecord {
    /// Parse back into an event. Unknown status/type values are load errors.
    pub fn into_event(self, table: &'static str, line: u64) -> Result<ConversionEvent, LoadError> {
        let status: LeadStatus =
            self.lead_status
                .parse()
                .map_err(|value| LoadError::InvalidValue {
                    table,
                    line,
                    column: "lead_status",
                    value,
                })?;

        let conversion_type: ConversionType = self
            .client_conversion_event_type
            .as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(|value| LoadError::InvalidValue {
                table,
                line,
                column: "client_conversion_event_type",
                value,
            })?;

        Ok(ConversionEvent {
            user_id: self.user_id,
            branch_id: self.branch_id.unwrap_or_default(),
            user_created_at: timestamp_field(
                "local_user_created_at",
                self.local_user_created_at.as_deref(),
            ),
            status,
            conversion_type,
            conversion: purchase_from_columns(
                "client_conversion_event_local_created_at",
                self.client_conversion_event_id,
                self.client_conversion_event_local_created_at,
                self.client_conversion_event_name,
                self.client_conversion_event_source,
            ),
            first_membership: self.first_user_membership_id.map(|id| FirstPurchase {
                id,
                purchased_at: timestamp_field(
                    "first_local_membership_purchased_at",
                    self.first_local_membership_purchased_at.as_deref(),
                ),
                name: self.first_membership_name,
                source: self.first_membership_source,
            }),
            first_credit_pack: self.first_credit_pack_id.map(|id| FirstPurchase {
                id,
                purchased_at: timestamp_field(
                    "first_local_credit_pack_purchased_at",
                    self.first_local_credit_pack_purchased_at.as_deref(),
                ),
                name: self.first_credit_pack_name,
                source: self.first_credit_pack_source,
            }),
        })
    }
}

// ============================================================================
// WRITING
// ============================================================================

/// Write `rows` under a fixed header, replacing any existing file.
///
/// Parent directories are created as needed. Returns the number of data rows.
pub fn write_csv<T: Serialize>(
    path: &Path,
    header: &[&str],
    rows: &[T],
) -> Result<usize, WriteError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| WriteError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let csv_error = |source: csv::Error| WriteError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(csv_error)?;

    writer.write_record(header).map_err(csv_error)?;
    for row in rows {
        writer.serialize(row).map_err(csv_error)?;
    }
    writer.flush().map_err(|source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(rows = rows.len(), path = %path.display(), "Saved table");
    Ok(rows.len())
}

pub fn write_client_conversion_events(
    path: &Path,
    events: &[ConversionEvent],
) -> Result<usize, WriteError> {
    let records: Vec<ClientConversionRecord> =
        events.iter().map(ClientConversionRecord::from).collect();
    write_csv(path, &CLIENT_CONVERSION_COLUMNS, &records)
}

pub fn write_lead_conversions(path: &Path, rows: &[LeadConversionRow]) -> Result<usize, WriteError> {
    let records: Vec<LeadConversionRecord> = rows.iter().map(LeadConversionRecord::from).collect();
    write_csv(path, &LEAD_CONVERSION_COLUMNS, &records)
}

// ============================================================================
// READING BACK
// ============================================================================

/// Read an events table written by this pipeline (or supplied externally).
///
/// A file whose first row has no `user_id` cell is treated as header-less and
/// read with the canonical column order.
pub fn read_events(table: &'static str, path: &Path) -> Result<Vec<ConversionEvent>, LoadError> {
    let csv_error = |source: csv::Error| LoadError::Csv {
        table,
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => LoadError::Missing {
            table,
            path: path.to_path_buf(),
        },
        _ => csv_error(err.into()),
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(Trim::All)
        .from_reader(file);

    let mut records = reader.records();
    let first = match records.next() {
        Some(result) => result.map_err(csv_error)?,
        None => {
            warn!(table, path = %path.display(), "Events file is empty");
            return Ok(Vec::new());
        }
    };

    let (headers, pending) = if first.iter().any(|cell| cell == "user_id") {
        (first, None)
    } else {
        warn!(table, "No header row found; assuming canonical column order");
        (StringRecord::from(CLIENT_CONVERSION_COLUMNS.to_vec()), Some(first))
    };
    check_required_columns(table, &headers, REQUIRED_EVENT_COLUMNS)?;

    let mut events = Vec::new();
    for result in pending.into_iter().map(Ok).chain(records) {
        let record = result.map_err(csv_error)?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        let row: ClientConversionRecord = record.deserialize(Some(&headers)).map_err(csv_error)?;
        events.push(row.into_event(table, line)?);
    }

    info!(table, rows = events.len(), path = %path.display(), "Loaded events");
    Ok(events)
}
