#![cfg(unix)]

use assert_cmd::prelude::*;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const WHITE: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
const BLACK: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
const ENDGAME: &str = "4k3/8/8/8/8/8/8/4K2R w K - 0 1";

fn stub_engine() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/stub_engine.sh")
}

fn gen_evals(args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("gen_evals").expect("binary exists");
    cmd.arg("--engine-path").arg("/bin/sh").arg("--engine-args").arg(stub_engine());
    cmd.args(args);
    cmd
}

fn epd_suite(args: &[&str]) -> Command {
    let mut cmd = Command::cargo_bin("epd_suite").expect("binary exists");
    cmd.arg("--engine").arg("/bin/sh").arg("--engine-args").arg(stub_engine());
    cmd.args(args);
    cmd
}

fn path_arg(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

#[test]
fn gen_evals_writes_scores_in_input_order() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("fens.txt");
    fs::write(&input, format!("{WHITE} [1.0]\n{BLACK}\n\n{ENDGAME}\n")).unwrap();
    let output = tmp.path().join("labels.txt");

    gen_evals(&[
        "--fens",
        &path_arg(&input),
        "--output",
        &path_arg(&output),
        "--workers",
        "2",
        "--depth",
        "1",
    ])
    .assert()
    .success();

    let text = fs::read_to_string(&output).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![format!("{WHITE};12"), format!("{BLACK};-12"), format!("{ENDGAME};12")]
    );
}

#[test]
fn gen_evals_defaults_output_name_to_range() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("fens.txt");
    fs::write(&input, format!("{WHITE}\n{BLACK}\n{ENDGAME}\n")).unwrap();

    gen_evals(&["--fens", &path_arg(&input), "--workers", "1", "--start", "1", "--limit", "5"])
        .current_dir(tmp.path())
        .assert()
        .success();

    let text = fs::read_to_string(tmp.path().join("fens_evals_1_3.txt")).unwrap();
    assert_eq!(text, format!("{BLACK};-12\n{ENDGAME};12\n"));
}

#[test]
fn gen_evals_scores_hung_engine_as_zero_with_deadline() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("fens.txt");
    fs::write(&input, format!("{WHITE}\n{BLACK}\n")).unwrap();
    let output = tmp.path().join("labels.txt");

    let mut cmd = Command::cargo_bin("gen_evals").expect("binary exists");
    cmd.arg("--engine-path")
        .arg("/bin/sh")
        .arg("--engine-args")
        .arg(stub_engine())
        .arg("hang")
        .args(["--fens", &path_arg(&input), "--output", &path_arg(&output)])
        .args(["--workers", "2", "--timeout-ms", "200"])
        .assert()
        .success();

    let text = fs::read_to_string(&output).unwrap();
    assert_eq!(text, format!("{WHITE};0\n{BLACK};0\n"));
}

#[test]
fn gen_evals_keeps_score_after_non_utf8_engine_output() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("fens.txt");
    fs::write(&input, format!("{ENDGAME}\n{BLACK}\n")).unwrap();
    let output = tmp.path().join("labels.txt");

    let mut cmd = Command::cargo_bin("gen_evals").expect("binary exists");
    cmd.arg("--engine-path")
        .arg("/bin/sh")
        .arg("--engine-args")
        .arg(stub_engine())
        .arg("binary")
        .args(["--fens", &path_arg(&input), "--output", &path_arg(&output), "--workers", "1"])
        .assert()
        .success();

    let text = fs::read_to_string(&output).unwrap();
    assert_eq!(text, format!("{ENDGAME};12\n{BLACK};-12\n"));
}

#[test]
fn gen_evals_fails_fast_on_missing_input() {
    let tmp = TempDir::new().unwrap();
    let output = tmp.path().join("labels.txt");
    gen_evals(&[
        "--fens",
        &path_arg(&tmp.path().join("missing.txt")),
        "--output",
        &path_arg(&output),
    ])
    .assert()
    .failure();
    assert!(!output.exists());

    gen_evals(&["--fens", "-", "--workers", "0"]).assert().failure();
}

#[test]
fn epd_suite_reports_all_passed() {
    let tmp = TempDir::new().unwrap();
    let suite = tmp.path().join("suite.epd");
    fs::write(
        &suite,
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - bm e2e4; id \"open.1\";\n\
         rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - bm d2d4 e2e4; id \"open.2\";\n",
    )
    .unwrap();

    let out = epd_suite(&["--suite", &path_arg(&suite), "--movetime-ms", "10", "--pool-size", "2"])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("Total tests: 2"), "{stdout}");
    assert!(stdout.contains("Passed: 2 (100.00%)"), "{stdout}");
    assert!(stdout.contains("Failed: 0 (0.00%)"), "{stdout}");
}

#[test]
fn epd_suite_itemizes_failures_in_json() {
    let tmp = TempDir::new().unwrap();
    let suite = tmp.path().join("suite.epd");
    fs::write(
        &suite,
        "# one of each\n\
         rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - bm e2e4; id \"pass\";\n\
         rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - bm g1f3; id \"fail\";\n",
    )
    .unwrap();
    let json = tmp.path().join("report.json");

    let out = epd_suite(&["--suite", &path_arg(&suite), "--depth", "1", "--json", &path_arg(&json)])
        .output()
        .unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("Passed: 1 (50.00%)"), "{stdout}");

    let report: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(report["total"], 2);
    assert_eq!(report["failures"][0]["label"], "fail");
    assert_eq!(report["failures"][0]["actual"], "e2e4");
    assert_eq!(report["failures"][0]["pv"], "info depth 1 score cp 12");
}

#[test]
fn epd_suite_reads_gzipped_suite() {
    let tmp = TempDir::new().unwrap();
    let suite = tmp.path().join("suite.epd.gz");
    let mut enc = flate2::write::GzEncoder::new(fs::File::create(&suite).unwrap(), flate2::Compression::default());
    enc.write_all(b"rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - bm e2e4; id \"gz.1\";\n")
        .unwrap();
    enc.finish().unwrap();

    let out = epd_suite(&["--suite", &path_arg(&suite), "--movetime-ms", "10"]).output().unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("Passed: 1 (100.00%)"), "{stdout}");
}

#[test]
fn epd_suite_rejects_malformed_suite_before_starting_engines() {
    let tmp = TempDir::new().unwrap();
    let suite = tmp.path().join("suite.epd");
    fs::write(&suite, "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - id \"x\";\n").unwrap();

    let out = Command::cargo_bin("epd_suite")
        .expect("binary exists")
        .args(["--engine", "/nonexistent/engine", "--suite", &path_arg(&suite)])
        .output()
        .unwrap();
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("line 1"));
}
