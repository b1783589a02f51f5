// Conversion Funnel - Core Library
// Exposes the pipeline stages for the CLI and tests

pub mod error;
pub mod normalize;        // Timestamps + JSON purchase details
pub mod records;          // CSV extracts → typed rows
pub mod conversion;       // Conversion Resolver (LEAD / CLIENT)
pub mod fallback;         // Part-2 fallback merge
pub mod lead_conversion;  // ALL / MEMBERSHIP / USER_CREDIT pivot
pub mod output;           // CSV writer + events read-back
pub mod config;
pub mod logging;
pub mod pipeline;

// Re-export commonly used types
pub use error::{LoadError, WriteError};
pub use normalize::{
    format_timestamp, normalize_timestamp, parse_timestamp, PurchaseDetails, CANONICAL_FORMAT,
};
pub use records::{
    load_branches, load_credit_pack_purchases, load_membership_purchases, load_users,
    Branch, BranchRegistry, Purchase, PurchaseKind, User,
};
pub use conversion::{
    ConversionEvent, ConversionResolver, ConversionType, FirstPurchase, LeadStatus,
    Resolution, ResolutionReport,
};
pub use fallback::{
    load_fallback_events, FallbackOverrides, MergeReport,
};
pub use lead_conversion::{pivot, FilterType, LeadConversionRow, PivotReport};
pub use output::{
    read_events, write_client_conversion_events, write_lead_conversions,
    CLIENT_CONVERSION_COLUMNS, LEAD_CONVERSION_COLUMNS,
};
pub use config::{InputPaths, OutputPaths, PipelineConfig};
pub use logging::init_logging;
pub use pipeline::{run, run_fallback_only, run_full, PipelineSummary, RunMode};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
