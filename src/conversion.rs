// 🔀 Conversion Resolver - earliest qualifying purchase per user
//
// For every user in dim_user:
//   - earliest credit pack purchase (if any)
//   - earliest membership purchase (if any)
//   - the earlier of the two is the conversion event
//
// Exact ties across kinds go to the credit pack. Within one kind the earlier
// file row wins.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::records::{BranchRegistry, Purchase, User};

// ============================================================================
// STATUS & TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LeadStatus {
    /// No qualifying purchase
    Lead,

    /// At least one credit pack or membership purchase
    Client,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::Lead => "LEAD",
            LeadStatus::Client => "CLIENT",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LEAD" => Ok(LeadStatus::Lead),
            "CLIENT" => Ok(LeadStatus::Client),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversionType {
    None,
    UserCredit,
    Membership,
}

impl ConversionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionType::None => "NONE",
            ConversionType::UserCredit => "USER_CREDIT",
            ConversionType::Membership => "MEMBERSHIP",
        }
    }
}

impl fmt::Display for ConversionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionType {
    type Err = String;

    /// An empty cell reads as `NONE`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "NONE" => Ok(ConversionType::None),
            "USER_CREDIT" => Ok(ConversionType::UserCredit),
            "MEMBERSHIP" => Ok(ConversionType::Membership),
            other => Err(other.to_string()),
        }
    }
}

// ============================================================================
// CONVERSION EVENT
// ============================================================================

/// The purchase fields carried into the output tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstPurchase {
    pub id: String,
    pub purchased_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub source: Option<String>,
}

impl From<&Purchase> for FirstPurchase {
    fn from(purchase: &Purchase) -> Self {
        FirstPurchase {
            id: purchase.purchase_id.clone(),
            purchased_at: purchase.purchased_at,
            name: purchase.details.name.clone(),
            source: purchase.details.source.clone(),
        }
    }
}

/// One row of `fct_client_conversion_events`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionEvent {
    pub user_id: String,
    pub branch_id: String,
    pub user_created_at: Option<DateTime<Utc>>,
    pub status: LeadStatus,
    pub conversion_type: ConversionType,

    /// The purchase that converted the user (None for leads)
    pub conversion: Option<FirstPurchase>,

    pub first_membership: Option<FirstPurchase>,
    pub first_credit_pack: Option<FirstPurchase>,
}

impl ConversionEvent {
    /// Event for a user with no qualifying purchase
    pub fn lead(user_id: &str, branch_id: &str, user_created_at: Option<DateTime<Utc>>) -> Self {
        ConversionEvent {
            user_id: user_id.to_string(),
            branch_id: branch_id.to_string(),
            user_created_at,
            status: LeadStatus::Lead,
            conversion_type: ConversionType::None,
            conversion: None,
            first_membership: None,
            first_credit_pack: None,
        }
    }

    pub fn is_client(&self) -> bool {
        self.status == LeadStatus::Client
    }

    pub fn conversion_timestamp(&self) -> Option<DateTime<Utc>> {
        self.conversion.as_ref().and_then(|c| c.purchased_at)
    }
}

// ============================================================================
// RESOLVER
// ============================================================================

/// Counters logged after resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub users: usize,
    pub clients: usize,
    pub leads: usize,
    pub skipped_users: usize,
    pub unknown_branches: usize,
}

impl ResolutionReport {
    pub fn summary(&self) -> String {
        format!(
            "Created {} client conversion events ({} CLIENTs, {} LEADs, {} users skipped, {} unknown branches)",
            self.users, self.clients, self.leads, self.skipped_users, self.unknown_branches
        )
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub events: Vec<ConversionEvent>,
    pub report: ResolutionReport,
}

pub struct ConversionResolver;

impl ConversionResolver {
    pub fn new() -> Self {
        ConversionResolver
    }

    /// Earliest purchase per user, in one scan.
    ///
    /// A later row only replaces the current minimum when it is strictly
    /// earlier, so equal timestamps keep the first row seen.
    pub fn first_purchases(&self, purchases: &[Purchase]) -> HashMap<String, Purchase> {
        let mut earliest: HashMap<String, Purchase> = HashMap::new();

        for purchase in purchases {
            let is_earlier = earliest
                .get(&purchase.user_id)
                .map_or(true, |current| {
                    purchase.ordering_timestamp() < current.ordering_timestamp()
                });

            if is_earlier {
                earliest.insert(purchase.user_id.clone(), purchase.clone());
            }
        }

        earliest
    }

    /// Derive the conversion event for one user from their earliest purchases
    pub fn resolve_user(
        &self,
        user: &User,
        first_credit_pack: Option<&Purchase>,
        first_membership: Option<&Purchase>,
    ) -> ConversionEvent {
        let mut event = ConversionEvent::lead(&user.user_id, &user.branch_id, user.created_at);
        event.first_credit_pack = first_credit_pack.map(FirstPurchase::from);
        event.first_membership = first_membership.map(FirstPurchase::from);

        let winner = match (first_credit_pack, first_membership) {
            (None, None) => return event,
            (Some(credit), None) => credit,
            (None, Some(membership)) => membership,
            (Some(credit), Some(membership)) => {
                if credit.ordering_timestamp() <= membership.ordering_timestamp() {
                    credit
                } else {
                    membership
                }
            }
        };

        if winner.purchased_at.is_none() {
            warn!(
                user_id = %user.user_id,
                purchase_id = %winner.purchase_id,
                line = winner.line,
                "Converting purchase has no usable date; conversion timestamp left empty"
            );
        }

        event.status = LeadStatus::Client;
        event.conversion_type = winner.kind.conversion_type();
        event.conversion = Some(FirstPurchase::from(winner));
        event
    }

    /// One event per user, in user-table order
    pub fn resolve(
        &self,
        users: &[User],
        branches: &BranchRegistry,
        credit_packs: &[Purchase],
        memberships: &[Purchase],
    ) -> Resolution {
        let first_credit_packs = self.first_purchases(credit_packs);
        let first_memberships = self.first_purchases(memberships);
        info!(
            credit_pack_users = first_credit_packs.len(),
            membership_users = first_memberships.len(),
            "Computed earliest purchases per user"
        );

        let mut report = ResolutionReport::default();
        let mut events = Vec::with_capacity(users.len());

        for user in users {
            if user.user_id.is_empty() {
                debug!(line = user.line, "Skipping user row without user_id");
                report.skipped_users += 1;
                continue;
            }

            if branches.find_by_id(&user.branch_id).is_none() {
                debug!(
                    line = user.line,
                    user_id = %user.user_id,
                    branch_id = %user.branch_id,
                    "User references a branch missing from dim_branch"
                );
                report.unknown_branches += 1;
            }

            let event = self.resolve_user(
                user,
                first_credit_packs.get(&user.user_id),
                first_memberships.get(&user.user_id),
            );

            match event.status {
                LeadStatus::Client => report.clients += 1,
                LeadStatus::Lead => report.leads += 1,
            }
            events.push(event);
        }
        report.users = events.len();

        if report.unknown_branches > 0 {
            warn!(
                count = report.unknown_branches,
                "Users reference branches missing from dim_branch"
            );
        }
        info!("{}", report.summary());

        Resolution { events, report }
    }
}

impl Default for ConversionResolver {
    fn default() -> Self {
        Self::new()
    }
}
