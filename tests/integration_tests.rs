//! CLI smoke tests: the `pxh` binary end to end against the simulated pool.

mod common;

use std::fs;

use serde_json::Value;

fn exit_code(result: &common::CmdResult) -> Option<i32> {
    result.status.code()
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: pxh [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains(env!("CARGO_PKG_VERSION")),
        "missing version; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_is_available() {
    for sub in ["run", "simulate", "classify", "probe", "config", "completions"] {
        let case = format!("subcommand_help_{sub}");
        let result = common::run_cli_case(&case, &[sub, "--help"]);
        assert!(
            result.status.success(),
            "{sub} --help failed; log: {}",
            result.log_path.display()
        );
        assert!(
            result.stdout.contains("Usage: pxh"),
            "{sub} help missing usage; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn completions_generate_for_bash() {
    let result = common::run_cli_case("completions_generate_for_bash", &["completions", "bash"]);
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stdout.contains("pxh"), "log: {}", result.log_path.display());
}

#[test]
fn simulate_passes_and_counts_one_signal_per_trial() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "simulate_passes_and_counts_one_signal_per_trial",
        &[
            "--config",
            &config_arg,
            "--json",
            "simulate",
            "--iterations",
            "3",
            "--strategy",
            "fixed",
            "--settle-secs",
            "0",
        ],
    );
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );

    let json = result.json();
    assert_eq!(json["command"], "run");
    assert_eq!(json["passed"], true);
    assert_eq!(json["result"]["ledger"]["completed_trials"], 3);
    assert_eq!(json["result"]["ledger"]["expected_signals"], 3);
    assert_eq!(json["result"]["trials"].as_array().map(Vec::len), Some(3));
}

#[test]
fn simulate_human_output_reports_pass() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case_with_env(
        "simulate_human_output_reports_pass",
        &[
            "--config",
            &config_arg,
            "--no-color",
            "simulate",
            "--iterations",
            "2",
        ],
        &[("PXH_OUTPUT_FORMAT", "human")],
    );
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("PASS 2 trial(s), 2 exhaustion signal(s)"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn simulate_accepted_overfill_exits_with_violation_code() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "simulate_accepted_overfill_exits_with_violation_code",
        &[
            "--config",
            &config_arg,
            "--json",
            "simulate",
            "--fault",
            "accept-overfill",
        ],
    );
    assert_eq!(
        exit_code(&result),
        Some(3),
        "log: {}",
        result.log_path.display()
    );
    let json = result.json();
    assert_eq!(json["passed"], false);
    assert_eq!(json["result"]["code"], "PXH-4001");
    assert_eq!(json["result"]["trial"], 1);
    assert_eq!(json["result"]["phase"], "AttemptOverfill");
    assert!(
        result.stderr.contains("but Passed"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn simulate_leak_fails_reclaim_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "simulate_leak_fails_reclaim_threshold",
        &[
            "--config",
            &config_arg,
            "--json",
            "simulate",
            "--fault",
            "leak",
            "--strategy",
            "fixed",
            "--settle-secs",
            "0",
        ],
    );
    assert_eq!(
        exit_code(&result),
        Some(3),
        "log: {}",
        result.log_path.display()
    );
    let message = result.json()["result"]["message"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert!(
        message.contains("93.0%"),
        "unexpected message {message:?}; log: {}",
        result.log_path.display()
    );
    assert!(message.contains("95.0%"), "{message}");
}

#[test]
fn simulate_unreachable_pool_is_infrastructure_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "simulate_unreachable_pool_is_infrastructure_failure",
        &[
            "--config",
            &config_arg,
            "--json",
            "simulate",
            "--fault",
            "unreachable",
        ],
    );
    assert_eq!(
        exit_code(&result),
        Some(2),
        "log: {}",
        result.log_path.display()
    );
    assert!(
        result.stderr.contains("PXH-2002"),
        "log: {}",
        result.log_path.display()
    );
}

#[test]
fn simulate_writes_jsonl_run_log() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let log = tmp.path().join("sim-run.jsonl");
    let log_arg = log.to_string_lossy();
    let result = common::run_cli_case(
        "simulate_writes_jsonl_run_log",
        &[
            "--config",
            &config_arg,
            "--json",
            "simulate",
            "--iterations",
            "2",
            "--strategy",
            "fixed",
            "--settle-secs",
            "0",
            "--log",
            &log_arg,
        ],
    );
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );

    let raw = fs::read_to_string(&log).unwrap();
    let events: Vec<Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.first().map(|e| e["event"].clone()), Some("run_start".into()));
    assert_eq!(events.last().map(|e| e["event"].clone()), Some("run_finish".into()));
    let passed = events
        .iter()
        .filter(|e| e["event"] == "trial_passed")
        .count();
    assert_eq!(passed, 2);
    let tallies: Vec<u64> = events
        .iter()
        .filter(|e| e["event"] == "log_tally")
        .filter_map(|e| e["expected_signals"].as_u64())
        .collect();
    assert_eq!(tallies, vec![1, 2]);
}

#[test]
fn simulate_rejects_zero_iterations() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "simulate_rejects_zero_iterations",
        &["--config", &config_arg, "simulate", "--iterations", "0"],
    );
    assert_eq!(
        exit_code(&result),
        Some(1),
        "log: {}",
        result.log_path.display()
    );
    assert!(result.stderr.contains("PXH-1001"), "log: {}", result.log_path.display());
}

#[test]
fn classify_counts_local_log_files() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let first = tmp.path().join("client-a.log");
    let second = tmp.path().join("client-b.log");
    fs::write(
        &first,
        "10/19 INFO io started\n\
         10/19 ERR  write failed: DER_NOSPACE(-1007)\n\
         10/19 ERR  rpc failed: DER_TIMEDOUT(-1011)\n",
    )
    .unwrap();
    fs::write(&second, "10/19 ERR  write failed: DER_NOSPACE(-1007)\n").unwrap();
    let first_arg = first.to_string_lossy();
    let second_arg = second.to_string_lossy();

    let result = common::run_cli_case(
        "classify_counts_local_log_files",
        &[
            "--config",
            &config_arg,
            "--json",
            "classify",
            &first_arg,
            &second_arg,
        ],
    );
    assert!(
        result.status.success(),
        "log: {}",
        result.log_path.display()
    );
    let json = result.json();
    assert_eq!(json["command"], "classify");
    assert_eq!(json["total"]["expected_signals"], 2);
    assert_eq!(json["total"]["other_errors"], 1);
    assert_eq!(json["clean"], false);
    assert_eq!(json["files"][1]["other_errors"], 0);
}

#[test]
fn classify_honors_marker_overrides() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let file = tmp.path().join("client.log");
    fs::write(&file, "E: out of space\nE: out of space\nI: fine\n").unwrap();
    let file_arg = file.to_string_lossy();

    let result = common::run_cli_case(
        "classify_honors_marker_overrides",
        &[
            "--config",
            &config_arg,
            "--json",
            "classify",
            "--error-marker",
            "E:",
            "--marker",
            "out of space",
            &file_arg,
        ],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json = result.json();
    assert_eq!(json["total"]["expected_signals"], 2);
    assert_eq!(json["clean"], true);
}

#[test]
fn classify_missing_file_is_io_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let missing = tmp.path().join("absent.log");
    let missing_arg = missing.to_string_lossy();
    let result = common::run_cli_case(
        "classify_missing_file_is_io_failure",
        &["--config", &config_arg, "classify", &missing_arg],
    );
    assert_eq!(exit_code(&result), Some(2), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("PXH-3002"), "log: {}", result.log_path.display());
}

#[test]
fn config_validate_reports_hash() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "[trial]\niterations = 4\n");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "config_validate_reports_hash",
        &["--config", &config_arg, "--json", "config", "validate"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json = result.json();
    assert_eq!(json["valid"], true);
    assert!(json["hash"].as_str().is_some_and(|h| !h.is_empty()));
}

#[test]
fn config_validate_rejects_bad_values() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "[trial]\nnominal_fill_pct = 140.0\n");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "config_validate_rejects_bad_values",
        &["--config", &config_arg, "--json", "config", "validate"],
    );
    assert_eq!(exit_code(&result), Some(1), "log: {}", result.log_path.display());
    let json = result.json();
    assert_eq!(json["valid"], false);
    assert_eq!(json["code"], "PXH-1001");
}

#[test]
fn config_show_reflects_file_values() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "[reclaim]\nstrategy = \"fixed\"\nsettle_secs = 7\n");
    let config_arg = config.to_string_lossy();
    let result = common::run_cli_case(
        "config_show_reflects_file_values",
        &["--config", &config_arg, "--json", "config", "show"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json = result.json();
    assert_eq!(json["config"]["reclaim"]["strategy"], "fixed");
    assert_eq!(json["config"]["reclaim"]["settle_secs"], 7);
}

#[test]
fn explicit_missing_config_is_user_error() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope.toml");
    let missing_arg = missing.to_string_lossy();
    let result = common::run_cli_case(
        "explicit_missing_config_is_user_error",
        &["--config", &missing_arg, "simulate"],
    );
    assert_eq!(exit_code(&result), Some(1), "log: {}", result.log_path.display());
    assert!(result.stderr.contains("PXH-1002"), "log: {}", result.log_path.display());
}

#[test]
fn probe_without_admin_tool_is_runtime_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let config = common::write_config(tmp.path(), "");
    let config_arg = config.to_string_lossy();
    let missing_bin = tmp.path().join("no-such-dmg");
    let missing_bin_arg = missing_bin.to_string_lossy();
    let result = common::run_cli_case_with_env(
        "probe_without_admin_tool_is_runtime_failure",
        &["--config", &config_arg, "probe", "--pool", "tank"],
        &[("PXH_POOL_DMG_BIN", &missing_bin_arg)],
    );
    assert_eq!(exit_code(&result), Some(2), "log: {}", result.log_path.display());
}
