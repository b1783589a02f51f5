// 🚚 Pipeline - load → resolve → (merge fallback) → pivot → write
//
// Two entry points:
//   run_full           recompute everything from the raw extracts
//   run_fallback_only  merge the part-2 file into the previous run's output

use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::conversion::{ConversionEvent, ConversionResolver, ResolutionReport};
use crate::error::LoadError;
use crate::fallback::{self, load_fallback_events, MergeReport};
use crate::lead_conversion::{pivot, PivotReport};
use crate::output::{read_events, write_client_conversion_events, write_lead_conversions};
use crate::records::{
    load_branches, load_credit_pack_purchases, load_membership_purchases, load_users,
};

/// Table name of the primary events output when read back
pub const CLIENT_EVENTS_TABLE: &str = "fct_client_conversion_events";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    FallbackOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSummary {
    pub mode: RunMode,
    pub events_written: usize,
    pub lead_conversions_written: usize,
    pub resolution: Option<ResolutionReport>,
    pub merge: Option<MergeReport>,
    pub pivot: PivotReport,
}

impl PipelineSummary {
    pub fn summary(&self) -> String {
        format!(
            "{:?} run: {} client conversion events, {} lead conversions",
            self.mode, self.events_written, self.lead_conversions_written
        )
    }
}

pub fn run(config: &PipelineConfig, mode: RunMode) -> Result<PipelineSummary> {
    match mode {
        RunMode::Full => run_full(config),
        RunMode::FallbackOnly => run_fallback_only(config),
    }
}

/// Full pipeline from the raw extracts
pub fn run_full(config: &PipelineConfig) -> Result<PipelineSummary> {
    info!("Running full pipeline");
    let inputs = &config.input_paths;

    let branches = load_branches(&inputs.dim_branch)?;
    let users = load_users(&inputs.dim_user)?;
    let credit_packs = load_credit_pack_purchases(&inputs.fct_credit_pack_purchases)?;
    let memberships = load_membership_purchases(&inputs.fct_membership_purchases)?;

    let resolution =
        ConversionResolver::new().resolve(&users, &branches, &credit_packs, &memberships);

    let (events, merge) = match inputs.fct_client_conversion_events_part_2.as_deref() {
        Some(path) if path.exists() => {
            let (events, report) = merge_fallback(resolution.events, path)?;
            (events, Some(report))
        }
        Some(path) => {
            info!(path = %path.display(), "No fallback file present; skipping merge");
            (resolution.events, None)
        }
        None => (resolution.events, None),
    };

    finish(config, RunMode::Full, events, Some(resolution.report), merge)
}

/// Merge-only run against a previously written events table
pub fn run_fallback_only(config: &PipelineConfig) -> Result<PipelineSummary> {
    info!("Running fallback merge only");

    let Some(part_2) = config.input_paths.fct_client_conversion_events_part_2.as_deref() else {
        bail!("fallback-only mode needs input_paths.fct_client_conversion_events_part_2");
    };

    let base_path = &config.output_paths.fct_client_conversion_events;
    let base = match read_events(CLIENT_EVENTS_TABLE, base_path) {
        Ok(events) => events,
        Err(LoadError::Missing { .. }) => {
            warn!(path = %base_path.display(), "No previous output found; merging into an empty base");
            Vec::new()
        }
        Err(err) => return Err(err.into()),
    };

    let (events, report) = merge_fallback(base, part_2)?;
    finish(config, RunMode::FallbackOnly, events, None, Some(report))
}

fn merge_fallback(
    base: Vec<ConversionEvent>,
    path: &Path,
) -> Result<(Vec<ConversionEvent>, MergeReport)> {
    let overrides = load_fallback_events(path)?;
    Ok(fallback::merge(base, &overrides))
}

fn finish(
    config: &PipelineConfig,
    mode: RunMode,
    events: Vec<ConversionEvent>,
    resolution: Option<ResolutionReport>,
    merge: Option<MergeReport>,
) -> Result<PipelineSummary> {
    let (rows, pivot_report) = pivot(&events);
    let outputs = &config.output_paths;

    let events_written =
        write_client_conversion_events(&outputs.fct_client_conversion_events, &events)
            .context("Failed to write client conversion events")?;
    let lead_conversions_written = write_lead_conversions(&outputs.fct_lead_conversions, &rows)
        .context("Failed to write lead conversions")?;

    let summary = PipelineSummary {
        mode,
        events_written,
        lead_conversions_written,
        resolution,
        merge,
        pivot: pivot_report,
    };
    info!("{}", summary.summary());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InputPaths, OutputPaths};
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config_in(dir: &Path) -> PipelineConfig {
        let data = dir.join("data");
        let outputs = dir.join("outputs");
        PipelineConfig {
            input_paths: InputPaths {
                dim_branch: data.join("dim_branch.csv"),
                dim_user: data.join("dim_user.csv"),
                fct_credit_pack_purchases: data.join("fct_credit_pack_purchases.csv"),
                fct_membership_purchases: data.join("fct_membership_purchases.csv"),
                fct_client_conversion_events_part_2: Some(
                    data.join("fct_client_conversion_events_part_2.csv"),
                ),
            },
            output_paths: OutputPaths {
                fct_client_conversion_events: outputs.join("fct_client_conversion_events.csv"),
                fct_lead_conversions: outputs.join("fct_lead_conversions.csv"),
            },
            log_file: None,
        }
    }

    fn write(path: &PathBuf, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// u1: credit + later membership, u2: membership only, u3: lead,
    /// u4: malformed credit details, u5: credit/membership tie
    fn write_inputs(config: &PipelineConfig) {
        let inputs = &config.input_paths;
        write(&inputs.dim_branch, "branch_id,name\nb1,Downtown\nb2,Uptown\n");
        write(
            &inputs.dim_user,
            "user_id,branch_id,created_at\n\
             u1,b1,2023-01-01 09:00:00\n\
             u2,b2,\n\
             u3,b1,01/02/23 10:30\n\
             u4,b2,2023-02-01T00:00:00Z\n\
             u5,b1,2023-02-01T00:00:00Z\n",
        );
        write(
            &inputs.fct_credit_pack_purchases,
            "user_id,credit_pack_id,credit_pack_purchased_at,credit_pack_purchase_details\n\
             u1,c1b,2023-05-01T00:00:00Z,\n\
             u1,c1,2023-04-07T08:20:57.730+00:00,\"{\"\"name\"\": \"\"Starter\"\", \"\"source\"\": \"\"APP\"\"}\"\n\
             u4,c4,04/07/2023 8:20:57 AM,{oops\n\
             u5,c5,2023-06-01T12:00:00Z,\n",
        );
        write(
            &inputs.fct_membership_purchases,
            "user_id,membership_id,membership_purchased_at,membership_purchase_details\n\
             u1,m1,2023-04-08T00:00:00.000+00:00,\n\
             u2,m2,2023-03-03T03:03:03Z,\"{\"\"name\"\": \"\"Gold\"\", \"\"source\"\": \"\"DESK\"\"}\"\n\
             u5,m5,2023-06-01T14:00:00+02:00,\n",
        );
    }

    fn read_rows(path: &Path) -> Vec<HashMap<String, String>> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader.deserialize().map(|row| row.unwrap()).collect()
    }

    fn find<'a>(rows: &'a [HashMap<String, String>], user_id: &str) -> &'a HashMap<String, String> {
        rows.iter().find(|row| row["user_id"] == user_id).unwrap()
    }

    #[test]
    fn test_full_run_outputs() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write_inputs(&config);

        let summary = run_full(&config).unwrap();

        assert_eq!(summary.events_written, 5);
        // 5 ALL + u1/u2/u5 MEMBERSHIP + u1/u4/u5 USER_CREDIT
        assert_eq!(summary.lead_conversions_written, 11);
        assert_eq!(summary.merge, None);

        let events = read_rows(&config.output_paths.fct_client_conversion_events);
        let ids: Vec<&str> = events.iter().map(|row| row["user_id"].as_str()).collect();
        assert_eq!(ids, vec!["u1", "u2", "u3", "u4", "u5"]);

        let u1 = find(&events, "u1");
        assert_eq!(u1["lead_status"], "CLIENT");
        assert_eq!(u1["client_conversion_event_type"], "USER_CREDIT");
        assert_eq!(u1["client_conversion_event_id"], "c1");
        assert_eq!(u1["client_conversion_event_local_created_at"], "2023-04-07T08:20:57.730+00:00");
        assert_eq!(u1["client_conversion_event_name"], "Starter");
        assert_eq!(u1["first_user_membership_id"], "m1");
        assert_eq!(u1["local_user_created_at"], "2023-01-01T09:00:00.000+00:00");

        let u2 = find(&events, "u2");
        assert_eq!(u2["client_conversion_event_type"], "MEMBERSHIP");
        assert_eq!(u2["client_conversion_event_source"], "DESK");
        assert_eq!(u2["first_credit_pack_id"], "");

        let u3 = find(&events, "u3");
        assert_eq!(u3["lead_status"], "LEAD");
        assert_eq!(u3["client_conversion_event_type"], "NONE");
        assert_eq!(u3["client_conversion_event_local_created_at"], "");

        let u4 = find(&events, "u4");
        assert_eq!(u4["lead_status"], "CLIENT");
        assert_eq!(u4["client_conversion_event_local_created_at"], "2023-04-07T08:20:57.000+00:00");
        assert_eq!(u4["client_conversion_event_name"], "");
        assert_eq!(u4["client_conversion_event_source"], "");

        let u5 = find(&events, "u5");
        assert_eq!(u5["client_conversion_event_type"], "USER_CREDIT");
        assert_eq!(u5["client_conversion_event_id"], "c5");
    }

    #[test]
    fn test_every_event_has_one_matching_all_row() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write_inputs(&config);

        run_full(&config).unwrap();

        let events = read_rows(&config.output_paths.fct_client_conversion_events);
        let leads = read_rows(&config.output_paths.fct_lead_conversions);

        for event in &events {
            let matches: Vec<_> = leads
                .iter()
                .filter(|row| {
                    row["client_conversion_event_filter"] == "ALL"
                        && row["user_id"] == event["user_id"]
                })
                .collect();
            assert_eq!(matches.len(), 1, "user {}", event["user_id"]);
            for column in [
                "lead_status",
                "client_conversion_event_type",
                "client_conversion_event_local_created_at",
            ] {
                assert_eq!(matches[0][column], event[column]);
            }
        }

        let u3_rows = leads.iter().filter(|row| row["user_id"] == "u3").count();
        assert_eq!(u3_rows, 1);
        let u2_filters: Vec<&str> = leads
            .iter()
            .filter(|row| row["user_id"] == "u2")
            .map(|row| row["client_conversion_event_filter"].as_str())
            .collect();
        assert_eq!(u2_filters, vec!["ALL", "MEMBERSHIP"]);
    }

    #[test]
    fn test_full_run_applies_fallback_override() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write_inputs(&config);
        write(
            config.input_paths.fct_client_conversion_events_part_2.as_ref().unwrap(),
            "user_id,branch_id,lead_status,client_conversion_event_type,client_conversion_event_id,client_conversion_event_local_created_at\n\
             u3,b1,CLIENT,USER_CREDIT,cX,2023-09-09T09:09:09Z\n\
             u9,b2,LEAD,,,\n",
        );

        let summary = run_full(&config).unwrap();

        assert_eq!(
            summary.merge,
            Some(MergeReport {
                kept: 4,
                overridden: 1,
                supplemented: 1
            })
        );
        let events = read_rows(&config.output_paths.fct_client_conversion_events);
        assert_eq!(events.len(), 6);
        assert_eq!(find(&events, "u3")["client_conversion_event_id"], "cX");
        assert_eq!(events[5]["user_id"], "u9");

        let leads = read_rows(&config.output_paths.fct_lead_conversions);
        let u3_rows: Vec<(&str, &str)> = leads
            .iter()
            .filter(|row| row["user_id"] == "u3")
            .map(|row| {
                (
                    row["client_conversion_event_filter"].as_str(),
                    row["client_conversion_event_id"].as_str(),
                )
            })
            .collect();
        assert_eq!(u3_rows, vec![("ALL", "cX"), ("USER_CREDIT", "cX")]);
    }

    #[test]
    fn test_fallback_only_client_without_first_columns_gets_type_row() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write(
            config.input_paths.fct_client_conversion_events_part_2.as_ref().unwrap(),
            "user_id,branch_id,lead_status,client_conversion_event_type,client_conversion_event_id,client_conversion_event_local_created_at\n\
             u1,b1,CLIENT,USER_CREDIT,c1,2023-04-07T08:20:57.730+00:00\n",
        );

        let summary = run_fallback_only(&config).unwrap();

        assert_eq!(summary.lead_conversions_written, 2);
        let leads = read_rows(&config.output_paths.fct_lead_conversions);
        assert_eq!(leads[1]["client_conversion_event_filter"], "USER_CREDIT");
        assert_eq!(leads[1]["client_conversion_event_type"], "USER_CREDIT");
        assert_eq!(leads[1]["client_conversion_event_id"], "c1");
        assert_eq!(
            leads[1]["client_conversion_event_local_created_at"],
            "2023-04-07T08:20:57.730+00:00"
        );
    }

    #[test]
    fn test_unparseable_purchase_date_is_written_empty() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write_inputs(&config);
        write(
            &config.input_paths.fct_credit_pack_purchases,
            "user_id,credit_pack_id,credit_pack_purchased_at,credit_pack_purchase_details\n\
             u3,c3,garbage,\n",
        );

        run_full(&config).unwrap();

        let events = read_rows(&config.output_paths.fct_client_conversion_events);
        let u3 = find(&events, "u3");
        assert_eq!(u3["lead_status"], "CLIENT");
        assert_eq!(u3["client_conversion_event_type"], "USER_CREDIT");
        assert_eq!(u3["client_conversion_event_id"], "c3");
        assert_eq!(u3["client_conversion_event_local_created_at"], "");
        assert_eq!(u3["first_local_credit_pack_purchased_at"], "");
        assert!(events
            .iter()
            .all(|row| !row["client_conversion_event_local_created_at"].starts_with("9999")));
    }

    #[test]
    fn test_fallback_only_replaces_base_user() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write_inputs(&config);
        run_full(&config).unwrap();

        // Raw inputs are not consulted in this mode
        fs::remove_file(&config.input_paths.fct_credit_pack_purchases).unwrap();
        write(
            config.input_paths.fct_client_conversion_events_part_2.as_ref().unwrap(),
            "user_id,branch_id,lead_status,client_conversion_event_type,client_conversion_event_id,client_conversion_event_local_created_at,client_conversion_event_name\n\
             u1,b2,CLIENT,MEMBERSHIP,mZ,2022-12-31T23:00:00Z,Legacy\n",
        );

        let summary = run_fallback_only(&config).unwrap();

        assert_eq!(summary.mode, RunMode::FallbackOnly);
        assert_eq!(summary.resolution, None);
        let events = read_rows(&config.output_paths.fct_client_conversion_events);
        assert_eq!(events.len(), 5);
        let u1 = find(&events, "u1");
        assert_eq!(u1["branch_id"], "b2");
        assert_eq!(u1["client_conversion_event_type"], "MEMBERSHIP");
        assert_eq!(u1["client_conversion_event_id"], "mZ");
        assert_eq!(u1["client_conversion_event_name"], "Legacy");
        assert_eq!(u1["client_conversion_event_local_created_at"], "2022-12-31T23:00:00.000+00:00");

        // Untouched users survive the read-back unchanged
        assert_eq!(find(&events, "u2")["client_conversion_event_source"], "DESK");

        let leads = read_rows(&config.output_paths.fct_lead_conversions);
        let u1_all = leads
            .iter()
            .find(|row| row["user_id"] == "u1" && row["client_conversion_event_filter"] == "ALL")
            .unwrap();
        assert_eq!(u1_all["client_conversion_event_id"], "mZ");
    }

    #[test]
    fn test_fallback_only_without_base_uses_part2_alone() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write(
            config.input_paths.fct_client_conversion_events_part_2.as_ref().unwrap(),
            "u1,b1,,CLIENT,USER_CREDIT,c1,2023-01-01T00:00:00Z,Pack,APP,,,,,c1,2023-01-01T00:00:00Z,Pack,APP\n",
        );

        let summary = run_fallback_only(&config).unwrap();

        assert_eq!(summary.events_written, 1);
        assert_eq!(summary.lead_conversions_written, 2);
    }

    #[test]
    fn test_fallback_only_requires_part2_file() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());

        let err = run_fallback_only(&config).unwrap_err();
        assert!(err.to_string().contains("fct_client_conversion_events_part_2"));

        let mut no_path = config.clone();
        no_path.input_paths.fct_client_conversion_events_part_2 = None;
        assert!(run_fallback_only(&no_path).is_err());
    }

    #[test]
    fn test_missing_required_input_aborts() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write_inputs(&config);
        fs::remove_file(&config.input_paths.fct_membership_purchases).unwrap();

        let err = run_full(&config).unwrap_err();

        assert!(err.to_string().contains("fct_membership_purchases"));
        assert!(!config.output_paths.fct_client_conversion_events.exists());
    }

    #[test]
    fn test_malformed_fallback_aborts_full_run() {
        let dir = TempDir::new().unwrap();
        let config = config_in(dir.path());
        write_inputs(&config);
        write(
            config.input_paths.fct_client_conversion_events_part_2.as_ref().unwrap(),
            "user_id,branch_id,lead_status\nu1,b1,MAYBE\n",
        );

        let err = run(&config, RunMode::Full).unwrap_err();

        assert!(err.to_string().contains("lead_status"));
    }
}
