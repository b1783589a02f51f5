// 🩹 Fallback Merger - part-2 conversion events override computed ones
//
// A pre-generated events file ("part 2") is authoritative: for every user it
// contains, its row replaces the computed row. Users only found in part 2 are
// appended after the computed users, in part-2 file order.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info};

use crate::conversion::ConversionEvent;
use crate::error::LoadError;
use crate::output::read_events;

/// Table name used for the part-2 input in logs and errors
pub const FALLBACK_TABLE: &str = "fct_client_conversion_events_part_2";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Base events kept as computed
    pub kept: usize,

    /// Base events replaced by a part-2 row
    pub overridden: usize,

    /// Part-2 users that were not in the base
    pub supplemented: usize,
}

impl MergeReport {
    pub fn summary(&self) -> String {
        format!(
            "Merged fallback events: {} kept, {} overridden, {} supplemented",
            self.kept, self.overridden, self.supplemented
        )
    }
}

/// Part-2 events keyed by user id, remembering file order
#[derive(Debug, Clone, Default)]
pub struct FallbackOverrides {
    by_user: HashMap<String, ConversionEvent>,
    order: Vec<String>,
}

impl FallbackOverrides {
    pub fn new() -> Self {
        FallbackOverrides {
            by_user: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Build from part-2 rows. A later row for the same user replaces the
    /// earlier one but keeps the earlier position.
    pub fn from_events(events: Vec<ConversionEvent>) -> Self {
        let mut overrides = FallbackOverrides::new();
        for event in events {
            overrides.insert(event);
        }
        overrides
    }

    pub fn insert(&mut self, event: ConversionEvent) {
        if !self.by_user.contains_key(&event.user_id) {
            self.order.push(event.user_id.clone());
        }
        self.by_user.insert(event.user_id.clone(), event);
    }

    pub fn get(&self, user_id: &str) -> Option<&ConversionEvent> {
        self.by_user.get(user_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Read a part-2 file (header-less files are accepted)
pub fn load_fallback_events(path: &Path) -> Result<FallbackOverrides, LoadError> {
    let events = read_events(FALLBACK_TABLE, path)?;
    Ok(FallbackOverrides::from_events(events))
}

/// Apply the overrides to the base events.
///
/// Base order is preserved; fallback-only users follow in part-2 order.
pub fn merge(
    base: Vec<ConversionEvent>,
    overrides: &FallbackOverrides,
) -> (Vec<ConversionEvent>, MergeReport) {
    let mut report = MergeReport::default();
    let mut merged = Vec::with_capacity(base.len() + overrides.len());
    let mut seen: HashSet<String> = HashSet::new();

    for event in base {
        seen.insert(event.user_id.clone());

        match overrides.get(&event.user_id) {
            Some(replacement) => {
                debug!(user_id = %event.user_id, "Fallback row overrides computed event");
                report.overridden += 1;
                merged.push(replacement.clone());
            }
            None => {
                report.kept += 1;
                merged.push(event);
            }
        }
    }

    for user_id in &overrides.order {
        if seen.contains(user_id) {
            continue;
        }
        if let Some(event) = overrides.get(user_id) {
            debug!(user_id = %user_id, "Fallback row adds a user missing from the base");
            report.supplemented += 1;
            merged.push(event.clone());
        }
    }

    info!("{}", report.summary());
    (merged, report)
}
