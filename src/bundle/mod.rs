//! Bundle assembly
//!
//! Drives the subsystem collectors, deduplicates archive paths, and writes
//! the final zip. Subsystems run serially in table order; entry fan-out
//! happens inside each collector. The zip writer has a single owner.

use crate::accessor::ClusterAccessor;
use crate::apis::ApiProbe;
use crate::collect::plans::{plan_for, OTEL_PLAN, SELECTABLE_PLANS, SHARED_PLAN};
use crate::collect::runner::{collect_subsystem, CollectContext, CollectOptions};
use crate::collect::{ArchiveEntry, SubsystemPlan};
use crate::error::{OpsError, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use kube::Client;
use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Tag embedded in the bundle filename
const SYSTEM_TAG: &str = "aio";

/// Lifecycle of one subsystem inside the assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsystemState {
    Pending,
    Probing,
    Collecting,
    Completed,
    Skipped,
    Failed,
}

impl std::fmt::Display for SubsystemState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            SubsystemState::Pending => "pending",
            SubsystemState::Probing => "probing",
            SubsystemState::Collecting => "collecting",
            SubsystemState::Completed => "completed",
            SubsystemState::Skipped => "skipped",
            SubsystemState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Whether `from -> to` is a legal state transition
pub fn is_valid_transition(from: SubsystemState, to: SubsystemState) -> bool {
    use SubsystemState::*;
    matches!(
        (from, to),
        (Pending, Probing)
            | (Probing, Collecting)
            | (Probing, Skipped)
            | (Collecting, Completed)
            | (_, Failed)
    )
}

/// Progress sink; rendering is the caller's concern
pub trait Progress: Send + Sync {
    fn begin(&self, _total_units: usize) {}
    fn subsystem(&self, _moniker: &str, _state: SubsystemState) {}
    fn entry(&self, _path: &str) {}
}

/// Default progress sink that reports through tracing
pub struct TracingProgress;

impl Progress for TracingProgress {
    fn begin(&self, total_units: usize) {
        info!(total_units, "collecting support bundle");
    }

    fn subsystem(&self, moniker: &str, state: SubsystemState) {
        info!(moniker, %state, "subsystem");
    }

    fn entry(&self, path: &str) {
        debug!(path, "archived");
    }
}

/// Caller-supplied bundle parameters
#[derive(Debug, Clone)]
pub struct BundleOptions {
    /// Monikers to collect; empty means auto (everything discovered)
    pub services: Vec<String>,
    /// Directory the zip is written into
    pub bundle_dir: PathBuf,
    /// Capture logs no older than this many seconds
    pub log_age_seconds: i64,
    /// Capture broker traces
    pub mq_traces: bool,
    /// Include Arc agent workloads in auto mode
    pub include_arc_agents: bool,
}

/// Outcome of a bundle run
#[derive(Debug)]
pub struct BundleSummary {
    /// Absolute path of the written zip
    pub path: PathBuf,
    /// Final state per subsystem, in collection order
    pub states: Vec<(String, SubsystemState)>,
    /// Subsystems that completed without producing a single entry
    pub empty_subsystems: Vec<String>,
}

/// Collect a support bundle; `Ok(None)` when nothing was discovered
pub async fn create_bundle(
    client: Client,
    options: &BundleOptions,
    progress: &dyn Progress,
) -> Result<Option<BundleSummary>> {
    let accessor = ClusterAccessor::new(client.clone());
    let probe = ApiProbe::new(client);
    let ctx = CollectContext {
        accessor: &accessor,
        probe: &probe,
        options: CollectOptions {
            log_age_seconds: options.log_age_seconds,
            mq_traces: options.mq_traces,
        },
    };

    let auto = options.services.is_empty();
    let Some(plans) = select_plans(&ctx, options).await? else {
        warn!("No known IoT Operations services discovered on cluster.");
        return Ok(None);
    };

    progress.begin(plans.iter().map(|p| p.unit_count()).sum());

    let bundle_path = bundle_file_path(&options.bundle_dir);
    let mut writer = BundleWriter::create(&bundle_path)?;

    let mut states = Vec::new();
    let mut empty_subsystems = Vec::new();

    for plan in &plans {
        progress.subsystem(plan.moniker, SubsystemState::Probing);

        if !plan.apis.is_empty() {
            if auto {
                if !probe.any_present(plan.apis).await? {
                    progress.subsystem(plan.moniker, SubsystemState::Skipped);
                    states.push((plan.moniker.to_string(), SubsystemState::Skipped));
                    continue;
                }
            } else {
                // The operator asked for this subsystem by name; a missing
                // API is fatal rather than silently skipped.
                probe.require_any(plan.apis).await?;
            }
        }

        progress.subsystem(plan.moniker, SubsystemState::Collecting);
        let entries = match collect_subsystem(&ctx, plan).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(moniker = plan.moniker, "subsystem collection failed: {e}");
                progress.subsystem(plan.moniker, SubsystemState::Failed);
                states.push((plan.moniker.to_string(), SubsystemState::Failed));
                continue;
            }
        };

        let mut written = 0usize;
        for entry in &entries {
            if writer.add(entry)? {
                progress.entry(&entry.path);
                written += 1;
            }
        }

        if written == 0 {
            empty_subsystems.push(plan.moniker.to_string());
        }
        progress.subsystem(plan.moniker, SubsystemState::Completed);
        states.push((plan.moniker.to_string(), SubsystemState::Completed));
    }

    writer.finish()?;

    let path = bundle_path.canonicalize().unwrap_or(bundle_path);
    Ok(Some(BundleSummary {
        path,
        states,
        empty_subsystems,
    }))
}

/// Resolve the subsystem selection into an ordered plan list.
///
/// Auto mode appends the shared and OTel plans; explicit mode includes them
/// only when named. `Ok(None)` means auto mode found no platform API at all.
async fn select_plans(
    ctx: &CollectContext<'_>,
    options: &BundleOptions,
) -> Result<Option<Vec<SubsystemPlan>>> {
    if options.services.is_empty() {
        let mut any_api_present = false;
        for plan in SELECTABLE_PLANS {
            if !plan.apis.is_empty() && ctx.probe.any_present(plan.apis).await? {
                any_api_present = true;
                break;
            }
        }
        if !any_api_present {
            return Ok(None);
        }

        let mut plans: Vec<SubsystemPlan> = SELECTABLE_PLANS
            .iter()
            .filter(|p| p.moniker != "arcagents" || options.include_arc_agents)
            .copied()
            .collect();
        plans.push(OTEL_PLAN);
        plans.push(SHARED_PLAN);
        return Ok(Some(plans));
    }

    let mut plans = Vec::new();
    for moniker in &options.services {
        let plan = plan_for(moniker)
            .ok_or_else(|| OpsError::UnknownService(moniker.clone()))?;
        if !plans.iter().any(|p: &SubsystemPlan| p.moniker == plan.moniker) {
            plans.push(*plan);
        }
    }
    Ok(Some(plans))
}

/// Single-owner zip writer with drop-later path deduplication
pub struct BundleWriter {
    zip: ZipWriter<File>,
    seen_paths: HashSet<String>,
}

impl BundleWriter {
    /// Create the bundle file; never overwrites an existing destination
    pub fn create(path: &std::path::Path) -> Result<Self> {
        let file = File::create_new(path)?;
        Ok(Self {
            zip: ZipWriter::new(file),
            seen_paths: HashSet::new(),
        })
    }

    /// Append one entry; returns false when its path was already taken
    pub fn add(&mut self, entry: &ArchiveEntry) -> Result<bool> {
        if !self.seen_paths.insert(entry.path.clone()) {
            debug!(path = %entry.path, "duplicate archive path dropped");
            return Ok(false);
        }

        let mut opts =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        if let Some(mtime) = entry.mtime {
            if let Some(zip_time) = to_zip_datetime(mtime) {
                opts = opts.last_modified_time(zip_time);
            }
        }

        self.zip.start_file(&entry.path, opts)?;
        self.zip.write_all(&entry.data)?;
        Ok(true)
    }

    /// Finalize the central directory
    pub fn finish(mut self) -> Result<()> {
        self.zip.finish()?;
        Ok(())
    }
}

/// `<bundle_dir>/support_bundle_<utc>_<tag>.zip`
fn bundle_file_path(bundle_dir: &std::path::Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    bundle_dir.join(format!("support_bundle_{stamp}_{SYSTEM_TAG}.zip"))
}

fn to_zip_datetime(t: DateTime<Utc>) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        t.year().try_into().ok()?,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use SubsystemState::*;
        assert!(is_valid_transition(Pending, Probing));
        assert!(is_valid_transition(Probing, Collecting));
        assert!(is_valid_transition(Probing, Skipped));
        assert!(is_valid_transition(Collecting, Completed));
        assert!(is_valid_transition(Collecting, Failed));
        assert!(!is_valid_transition(Completed, Collecting));
        assert!(!is_valid_transition(Skipped, Collecting));
        assert!(!is_valid_transition(Pending, Completed));
    }

    #[test]
    fn test_bundle_file_path_shape() {
        let path = bundle_file_path(std::path::Path::new("/tmp"));
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("support_bundle_"));
        assert!(name.ends_with("_aio.zip"));
        // support_bundle_YYYYMMDDTHHMMSS_aio.zip
        assert_eq!(name.len(), "support_bundle_".len() + 15 + "_aio.zip".len());
    }

    #[test]
    fn test_zip_datetime_conversion() {
        let t = DateTime::from_timestamp_nanos(1_701_380_840_937_645_506);
        let zdt = to_zip_datetime(t).unwrap();
        assert_eq!(zdt.year(), 2023);
        assert_eq!(zdt.month(), 11);
        assert_eq!(zdt.day(), 30);
        assert_eq!(zdt.hour(), 21);
        assert_eq!(zdt.minute(), 47);
        assert_eq!(zdt.second(), 20);
    }
}
