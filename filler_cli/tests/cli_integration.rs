use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;
use tempfile::tempdir;

// Virtual time: the simulated fill runs to completion without sleeping.
const BASE: &str = r#"
[control]
tick_ms = 100

[sensor]
sampled = false

[telemetry]
enabled = true

[simulation]
virtual_time = true
auto_confirm = true
flow_per_sec_at_full = 4.0
"#;

// `extra` goes first so root keys stay out of the tables below.
fn write_config(dir: &tempfile::TempDir, extra: &str) -> PathBuf {
    let path = dir.path().join("filler.toml");
    fs::write(&path, format!("{extra}\n{BASE}")).unwrap();
    path
}

fn filler() -> Command {
    Command::cargo_bin("filler").unwrap()
}

#[rstest]
#[case(&["--help"], 0, "Usage:", "stdout")]
#[case(&["fill", "--target", "50"], 0, "complete", "stdout")]
#[case(&["fill", "--target", "50", "--mode", "zone"], 0, "mode zone", "stdout")]
#[case(&["fill", "--target", "50", "--mode", "pid"], 0, "mode pid", "stdout")]
#[case(&["fill", "--mode", "turbo"], 2, "invalid value", "stderr")]
#[case(&["fill", "--target", "5"], 1, "target weight out of range", "stderr")]
#[case(&["self-check"], 0, "OK", "stdout")]
#[case(&["show-config"], 0, "zones:", "stdout")]
fn cli_table_cases(
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    let mut cmd = filler();
    cmd.arg("--log-level").arg("error").arg("--config").arg(&cfg);
    for a in args {
        cmd.arg(a);
    }

    let assert = cmd.assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[rstest]
fn missing_config_file_is_explained() {
    let dir = tempdir().unwrap();
    filler()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .arg("show-config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("could not be read"));
}

#[rstest]
fn invalid_config_value_names_the_key() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[control]\ntick_ms = 0\n").unwrap();
    filler()
        .arg("--config")
        .arg(&path)
        .arg("show-config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("control.tick_ms"));
}

#[rstest]
fn cli_reports_bad_zone_csv_header() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("zones.csv");
    let mut f = fs::File::create(&csv).unwrap();
    writeln!(f, "end,base,band,gain").unwrap();
    writeln!(f, "100,50,10,1.0").unwrap();
    let cfg = write_config(&dir, "zones_csv = \"zones.csv\"");

    filler()
        .arg("--config")
        .arg(&cfg)
        .arg("show-config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid headers"));
}

#[rstest]
fn zone_csv_replaces_the_toml_table() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("zones.csv");
    fs::write(
        &csv,
        "end_percent,base_pressure_pct,pid_range_pct,gain_multiplier\n50,80,10,1.0\n99,30,5,0.5\n",
    )
    .unwrap();
    let cfg = write_config(&dir, "zones_csv = \"zones.csv\"");

    filler()
        .arg("--config")
        .arg(&cfg)
        .arg("show-config")
        .assert()
        .success()
        .stdout(predicate::str::contains("2: up to 99%"))
        .stdout(predicate::str::contains("3:").not());
}

#[rstest]
fn scale_loss_mid_fill_exits_with_sensor_code() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");
    // Lands in [simulation], the last table.
    let text = fs::read_to_string(&cfg).unwrap() + "fail_after_reads = 20\n";
    fs::write(&cfg, text).unwrap();

    filler()
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("fill")
        .arg("--target")
        .arg("50")
        .assert()
        .code(4)
        .stderr(predicate::str::contains("weight sensor stopped answering"));
}

#[rstest]
fn autotune_without_oscillation_reports_insufficient_data() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, "");

    filler()
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("autotune")
        .assert()
        .code(8)
        .stderr(predicate::str::contains("oscillation peaks"));
}

#[rstest]
fn autotune_save_writes_the_gain_store() {
    let dir = tempdir().unwrap();
    let store = dir.path().join("state").join("gains.toml");
    let cfg = dir.path().join("filler.toml");
    let text = format!(
        "{BASE}wobble_amplitude = 3.0\nwobble_period_ms = 2000\n\n[store]\npath = {:?}\n",
        store.display().to_string()
    );
    fs::write(&cfg, text).unwrap();

    filler()
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("autotune")
        .arg("--save")
        .assert()
        .success()
        .stdout(predicate::str::contains("auto-tune complete"))
        .stdout(predicate::str::contains("gains saved to"));

    let saved = fs::read_to_string(&store).unwrap();
    assert!(saved.contains("[pid]"), "store was: {saved}");
    assert!(saved.contains("kp"), "store was: {saved}");
}

#[rstest]
fn log_file_receives_json_lines() {
    let dir = tempdir().unwrap();
    let log = dir.path().join("filler.log");
    let cfg = write_config(
        &dir,
        &format!(
            "[logging]\nfile = {:?}\nlevel = \"info\"\n",
            log.display().to_string()
        ),
    );

    filler()
        .arg("--log-level")
        .arg("error")
        .arg("--config")
        .arg(&cfg)
        .arg("fill")
        .arg("--target")
        .arg("20")
        .assert()
        .success();

    let text = fs::read_to_string(&log).unwrap();
    assert!(text.contains("fill start"), "log was: {text}");
    assert!(text.lines().all(|l| serde_json::from_str::<serde_json::Value>(l).is_ok()));
}
