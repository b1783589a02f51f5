// 📂 Record Loader - CSV extracts → typed, normalized rows
//
// Each source table is described by a `SourceTable` impl (name + required
// header columns + raw row shape). `load_table` does the CSV work once for all
// of them; the `load_*` functions then lower raw rows into domain types,
// running timestamps and JSON details through the normalizer.

use std::collections::HashMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conversion::ConversionType;
use crate::error::LoadError;
use crate::normalize::{details_field, timestamp_field, PurchaseDetails};

// ============================================================================
// SOURCE TABLES
// ============================================================================

/// A CSV extract with a fixed set of required header columns
pub trait SourceTable: DeserializeOwned {
    /// Table name used in logs and errors
    const TABLE: &'static str;

    /// Columns that must be present in the header row
    const REQUIRED_COLUMNS: &'static [&'static str];
}

/// Raw `dim_user.csv` row
#[derive(Debug, Clone, Deserialize)]
pub struct UserRow {
    pub user_id: String,
    pub branch_id: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl SourceTable for UserRow {
    const TABLE: &'static str = "dim_user";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["user_id", "branch_id"];
}

/// Raw `dim_branch.csv` row (descriptive columns are not used downstream)
#[derive(Debug, Clone, Deserialize)]
pub struct BranchRow {
    pub branch_id: String,
}

impl SourceTable for BranchRow {
    const TABLE: &'static str = "dim_branch";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["branch_id"];
}

/// Raw `fct_credit_pack_purchases.csv` row
#[derive(Debug, Clone, Deserialize)]
pub struct CreditPackRow {
    pub user_id: String,
    pub credit_pack_id: String,
    pub credit_pack_purchased_at: Option<String>,
    #[serde(default)]
    pub credit_pack_purchase_details: Option<String>,
}

impl SourceTable for CreditPackRow {
    const TABLE: &'static str = "fct_credit_pack_purchases";
    const REQUIRED_COLUMNS: &'static [&'static str] =
        &["user_id", "credit_pack_id", "credit_pack_purchased_at"];
}

/// Raw `fct_membership_purchases.csv` row
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipRow {
    pub user_id: String,
    pub membership_id: String,
    pub membership_purchased_at: Option<String>,
    #[serde(default)]
    pub membership_purchase_details: Option<String>,
}

impl SourceTable for MembershipRow {
    const TABLE: &'static str = "fct_membership_purchases";
    const REQUIRED_COLUMNS: &'static [&'static str] =
        &["user_id", "membership_id", "membership_purchased_at"];
}

/// Check that every required column appears in the header row
pub fn check_required_columns(
    table: &'static str,
    headers: &StringRecord,
    required: &'static [&'static str],
) -> Result<(), LoadError> {
    for &column in required {
        if !headers.iter().any(|header| header == column) {
            return Err(LoadError::MissingColumn { table, column });
        }
    }
    Ok(())
}

/// Read a whole table into memory, preserving file order.
///
/// Each row is paired with its 1-based line number in the source file.
pub fn load_table<T: SourceTable>(path: &Path) -> Result<Vec<(u64, T)>, LoadError> {
    let csv_error = |source: csv::Error| LoadError::Csv {
        table: T::TABLE,
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|err| match err.kind() {
        ErrorKind::NotFound => LoadError::Missing {
            table: T::TABLE,
            path: path.to_path_buf(),
        },
        _ => csv_error(err.into()),
    })?;

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(file);

    let headers = reader.headers().map_err(csv_error)?.clone();
    check_required_columns(T::TABLE, &headers, T::REQUIRED_COLUMNS)?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        let line = record.position().map(|pos| pos.line()).unwrap_or_default();
        let row: T = record.deserialize(Some(&headers)).map_err(csv_error)?;
        rows.push((line, row));
    }

    info!(table = T::TABLE, rows = rows.len(), path = %path.display(), "Loaded table");
    Ok(rows)
}

// ============================================================================
// USERS & BRANCHES
// ============================================================================

/// A user from `dim_user`
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub user_id: String,
    pub branch_id: String,
    pub created_at: Option<DateTime<Utc>>,
    pub line: u64,
}

pub fn load_users(path: &Path) -> Result<Vec<User>, LoadError> {
    let rows = load_table::<UserRow>(path)?;

    Ok(rows
        .into_iter()
        .map(|(line, row)| User {
            created_at: timestamp_field("created_at", row.created_at.as_deref()),
            user_id: row.user_id,
            branch_id: row.branch_id,
            line,
        })
        .collect())
}

/// A branch from `dim_branch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: String,
}

/// Lookup of branches by id
#[derive(Debug, Clone, Default)]
pub struct BranchRegistry {
    branches: HashMap<String, Branch>,
}

impl BranchRegistry {
    pub fn new() -> Self {
        BranchRegistry {
            branches: HashMap::new(),
        }
    }

    /// Register a branch (a later row with the same id replaces the earlier one)
    pub fn register(&mut self, branch: Branch) {
        self.branches.insert(branch.branch_id.clone(), branch);
    }

    pub fn find_by_id(&self, branch_id: &str) -> Option<&Branch> {
        self.branches.get(branch_id)
    }

    pub fn count(&self) -> usize {
        self.branches.len()
    }
}

pub fn load_branches(path: &Path) -> Result<BranchRegistry, LoadError> {
    let rows = load_table::<BranchRow>(path)?;

    let mut registry = BranchRegistry::new();
    for (line, row) in rows {
        if row.branch_id.is_empty() {
            debug!(line, "Skipping branch row without branch_id");
            continue;
        }
        registry.register(Branch {
            branch_id: row.branch_id,
        });
    }

    Ok(registry)
}

// ============================================================================
// PURCHASES
// ============================================================================

/// Which purchase table a row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PurchaseKind {
    CreditPack,
    Membership,
}

impl PurchaseKind {
    /// Conversion type a purchase of this kind produces
    pub fn conversion_type(&self) -> ConversionType {
        match self {
            PurchaseKind::CreditPack => ConversionType::UserCredit,
            PurchaseKind::Membership => ConversionType::Membership,
        }
    }
}

/// A credit-pack or membership purchase, normalized
#[derive(Debug, Clone, PartialEq)]
pub struct Purchase {
    pub kind: PurchaseKind,
    pub user_id: String,
    pub purchase_id: String,

    /// None when the source cell was empty or unparseable
    pub purchased_at: Option<DateTime<Utc>>,
    pub details: PurchaseDetails,
    pub line: u64,
}

impl Purchase {
    /// Timestamp used to pick the earliest purchase; undated purchases sort last
    pub fn ordering_timestamp(&self) -> DateTime<Utc> {
        self.purchased_at.unwrap_or_else(missing_purchase_timestamp)
    }
}

/// Ordering stand-in for purchases without a usable timestamp.
///
/// Sorts after every real timestamp, so such a purchase only wins when it is
/// the user's sole purchase. Never written to an output table.
pub fn missing_purchase_timestamp() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[allow(clippy::too_many_arguments)]
fn lower_purchase(
    kind: PurchaseKind,
    table: &'static str,
    line: u64,
    user_id: String,
    purchase_id: String,
    purchased_at_column: &'static str,
    purchased_at: Option<&str>,
    details_column: &'static str,
    details: Option<&str>,
) -> Option<Purchase> {
    if user_id.is_empty() || purchase_id.is_empty() {
        debug!(table, line, "Skipping purchase row without user or purchase id");
        return None;
    }

    let purchased_at = timestamp_field(purchased_at_column, purchased_at);
    if purchased_at.is_none() {
        debug!(table, line, user_id = %user_id, "Purchase has no usable date; it sorts last");
    }

    Some(Purchase {
        kind,
        user_id,
        purchase_id,
        purchased_at,
        details: details_field(details_column, details).unwrap_or_default(),
        line,
    })
}

pub fn load_credit_pack_purchases(path: &Path) -> Result<Vec<Purchase>, LoadError> {
    let rows = load_table::<CreditPackRow>(path)?;

    Ok(rows
        .into_iter()
        .filter_map(|(line, row)| {
            lower_purchase(
                PurchaseKind::CreditPack,
                CreditPackRow::TABLE,
                line,
                row.user_id,
                row.credit_pack_id,
                "credit_pack_purchased_at",
                row.credit_pack_purchased_at.as_deref(),
                "credit_pack_purchase_details",
                row.credit_pack_purchase_details.as_deref(),
            )
        })
        .collect())
}

pub fn load_membership_purchases(path: &Path) -> Result<Vec<Purchase>, LoadError> {
    let rows = load_table::<MembershipRow>(path)?;

    Ok(rows
        .into_iter()
        .filter_map(|(line, row)| {
            lower_purchase(
                PurchaseKind::Membership,
                MembershipRow::TABLE,
                line,
                row.user_id,
                row.membership_id,
                "membership_purchased_at",
                row.membership_purchased_at.as_deref(),
                "membership_purchase_details",
                row.membership_purchase_details.as_deref(),
            )
        })
        .collect())
}
