//! Support bundle command implementation

use crate::bundle::{create_bundle, BundleOptions, TracingProgress};
use crate::cli::CreateBundleArgs;
use crate::client::create_client;
use crate::error::{OpsError, Result};
use owo_colors::OwoColorize;

/// Run `support create-bundle`
pub async fn run_create_bundle(context: Option<&str>, args: &CreateBundleArgs) -> Result<()> {
    let log_age_seconds = parse_log_age(&args.log_age)?;

    if !args.bundle_dir.is_dir() {
        return Err(OpsError::InvalidArgument(format!(
            "bundle directory does not exist: {}",
            args.bundle_dir.display()
        )));
    }

    let client = create_client(context).await?;
    let options = BundleOptions {
        services: args.ops_services.clone(),
        bundle_dir: args.bundle_dir.clone(),
        log_age_seconds,
        mq_traces: args.mq_traces,
        include_arc_agents: args.include_arc_agents,
    };

    match create_bundle(client, &options, &TracingProgress).await? {
        Some(summary) => {
            println!(
                "{} {}",
                "Support bundle written to".green(),
                summary.path.display()
            );
            if !summary.empty_subsystems.is_empty() {
                println!(
                    "{} {}",
                    "Warning: no entries collected for:".yellow(),
                    summary.empty_subsystems.join(", ")
                );
            }
            Ok(())
        }
        None => {
            println!(
                "{}",
                "No known IoT Operations services discovered on cluster.".yellow()
            );
            Ok(())
        }
    }
}

/// Parse `--log-age`: plain seconds, or a humantime duration like "1h30m"
fn parse_log_age(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(OpsError::InvalidArgument("empty log age".to_string()));
    }

    if s.chars().all(|c| c.is_ascii_digit()) {
        return s
            .parse()
            .map_err(|_| OpsError::InvalidArgument(format!("invalid log age: {s}")));
    }

    match humantime::parse_duration(s) {
        Ok(duration) => Ok(duration.as_secs() as i64),
        Err(_) => Err(OpsError::InvalidArgument(format!(
            "invalid log age: {s} (expected seconds or a duration like 24h)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_age_seconds() {
        assert_eq!(parse_log_age("86400").unwrap(), 86400);
        assert_eq!(parse_log_age("30").unwrap(), 30);
    }

    #[test]
    fn test_parse_log_age_durations() {
        assert_eq!(parse_log_age("24h").unwrap(), 86400);
        assert_eq!(parse_log_age("1h30m").unwrap(), 5400);
        assert_eq!(parse_log_age("5m").unwrap(), 300);
    }

    #[test]
    fn test_parse_log_age_rejects_garbage() {
        assert!(parse_log_age("").is_err());
        assert!(parse_log_age("yesterday").is_err());
    }
}
