// 🧮 Lead Conversion Pivot - one event → one to three filtered rows
//
//   ALL          every event, as resolved (leads included)
//   MEMBERSHIP   clients with a first membership, showing that membership
//   USER_CREDIT  clients with a first credit pack, showing that credit pack
//
// Emission order: the whole ALL block, then MEMBERSHIP, then USER_CREDIT;
// each block follows event order.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::conversion::{ConversionEvent, ConversionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    All,
    Membership,
    UserCredit,
}

impl FilterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::All => "ALL",
            FilterType::Membership => "MEMBERSHIP",
            FilterType::UserCredit => "USER_CREDIT",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `fct_lead_conversions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadConversionRow {
    pub filter: FilterType,
    pub event: ConversionEvent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PivotReport {
    pub all: usize,
    pub membership: usize,
    pub user_credit: usize,
}

impl PivotReport {
    pub fn total(&self) -> usize {
        self.all + self.membership + self.user_credit
    }

    pub fn summary(&self) -> String {
        format!(
            "Created {} lead conversion records ({} MEMBERSHIP, {} USER_CREDIT, {} ALL)",
            self.total(),
            self.membership,
            self.user_credit,
            self.all
        )
    }
}

/// Re-point an event at one of its first purchases.
///
/// Events read from a part-2 file may carry only the converting purchase; the
/// filter row for the conversion's own type then falls back to that purchase.
fn filtered_row(event: &ConversionEvent, filter: FilterType) -> Option<LeadConversionRow> {
    if !event.is_client() {
        return None;
    }

    let (conversion_type, first) = match filter {
        FilterType::All => return None,
        FilterType::Membership => (ConversionType::Membership, event.first_membership.as_ref()),
        FilterType::UserCredit => (ConversionType::UserCredit, event.first_credit_pack.as_ref()),
    };

    let purchase = match first {
        Some(purchase) => purchase,
        None if event.conversion_type == conversion_type => event.conversion.as_ref()?,
        None => return None,
    };

    let mut event = event.clone();
    event.conversion_type = conversion_type;
    event.conversion = Some(purchase.clone());

    Some(LeadConversionRow { filter, event })
}

/// Expand conversion events into lead conversion rows
pub fn pivot(events: &[ConversionEvent]) -> (Vec<LeadConversionRow>, PivotReport) {
    let mut rows: Vec<LeadConversionRow> = events
        .iter()
        .map(|event| LeadConversionRow {
            filter: FilterType::All,
            event: event.clone(),
        })
        .collect();

    let memberships: Vec<LeadConversionRow> = events
        .iter()
        .filter_map(|event| filtered_row(event, FilterType::Membership))
        .collect();
    let user_credits: Vec<LeadConversionRow> = events
        .iter()
        .filter_map(|event| filtered_row(event, FilterType::UserCredit))
        .collect();

    let report = PivotReport {
        all: rows.len(),
        membership: memberships.len(),
        user_credit: user_credits.len(),
    };

    rows.extend(memberships);
    rows.extend(user_credits);

    info!("{}", report.summary());
    (rows, report)
}
