//! CLI parsing tests for the iotops command line interface

use clap::Parser;
use iotops::cli::{Cli, Command, SupportCommand};

// ============================================================================
// support create-bundle parsing
// ============================================================================

#[test]
fn test_parse_create_bundle_defaults() {
    let args = Cli::parse_from(["iotops", "support", "create-bundle"]);
    let Command::Support(SupportCommand::CreateBundle(args)) = args.command else {
        panic!("expected create-bundle");
    };
    assert!(args.ops_services.is_empty());
    assert_eq!(args.bundle_dir, std::path::PathBuf::from("."));
    assert_eq!(args.log_age, "86400");
    assert!(!args.mq_traces);
    assert!(!args.include_arc_agents);
}

#[test]
fn test_parse_create_bundle_alias() {
    let args = Cli::parse_from(["iotops", "support", "bundle"]);
    assert!(matches!(
        args.command,
        Command::Support(SupportCommand::CreateBundle(_))
    ));
}

#[test]
fn test_parse_create_bundle_services() {
    let args = Cli::parse_from([
        "iotops",
        "support",
        "create-bundle",
        "--ops-service",
        "mq",
        "--ops-service",
        "dataflow",
    ]);
    let Command::Support(SupportCommand::CreateBundle(args)) = args.command else {
        panic!("expected create-bundle");
    };
    assert_eq!(args.ops_services, vec!["mq", "dataflow"]);
}

#[test]
fn test_parse_create_bundle_flags() {
    let args = Cli::parse_from([
        "iotops",
        "support",
        "create-bundle",
        "--bundle-dir",
        "/tmp/bundles",
        "--log-age",
        "2h",
        "--mq-traces",
        "--include-arc-agents",
    ]);
    let Command::Support(SupportCommand::CreateBundle(args)) = args.command else {
        panic!("expected create-bundle");
    };
    assert_eq!(args.bundle_dir, std::path::PathBuf::from("/tmp/bundles"));
    assert_eq!(args.log_age, "2h");
    assert!(args.mq_traces);
    assert!(args.include_arc_agents);
}

#[test]
fn test_parse_global_context() {
    let args = Cli::parse_from([
        "iotops",
        "--context",
        "edge-cluster",
        "support",
        "create-bundle",
    ]);
    assert_eq!(args.context.as_deref(), Some("edge-cluster"));
}

#[test]
fn test_parse_completions() {
    let args = Cli::parse_from(["iotops", "completions", "bash"]);
    assert!(matches!(args.command, Command::Completions(_)));
}
