use assert_cmd::prelude::*;
use serde_json::Value;
use std::path::Path;
use std::process::Command;

const CONFIG: &str = "tests/fixtures/empty_config.yaml";

fn flowreplay() -> Command {
    let bin = assert_cmd::cargo::cargo_bin!("flowreplay");
    let mut cmd = Command::new(bin);
    cmd.env_remove("RUST_LOG")
        .env_remove("FLOWREPLAY_WS_URL")
        .env_remove("FLOWREPLAY_RECOVERY_URL")
        .args(["--config", CONFIG]);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    let stdout = String::from_utf8(output.stdout.clone()).expect("utf8 output");
    serde_json::from_str(stdout.trim()).expect("valid json")
}

#[test]
fn candidates_are_printed_best_first() {
    let element = Path::new("tests/fixtures/element_submit.json");
    assert!(element.exists(), "fixture missing");

    let assert = flowreplay()
        .args(["--output", "json", "candidates", element.to_str().unwrap()])
        .assert()
        .success();
    let value = stdout_json(assert.get_output());
    let candidates = value.as_array().expect("candidate array");

    assert_eq!(candidates[0]["selector"].as_str(), Some("#submit"));
    assert_eq!(candidates[0]["source"].as_str(), Some("id"));
    let scores: Vec<i64> = candidates
        .iter()
        .map(|c| c["score"].as_i64().unwrap())
        .collect();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    assert!(candidates
        .iter()
        .any(|c| c["selector"].as_str() == Some("[data-testid=\"submit\"]")));
    assert!(candidates
        .iter()
        .any(|c| c["selector"].as_str() == Some("button.btn.btn-primary")));
}

#[test]
fn candidates_human_output_lists_selectors() {
    let assert = flowreplay()
        .args(["candidates", "tests/fixtures/element_submit.json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let first = stdout.lines().next().expect("at least one line");
    assert!(first.contains("#submit"), "unexpected first line: {first}");
}

#[test]
fn inspect_prints_the_execution_tree() {
    let assert = flowreplay()
        .args(["--output", "json", "inspect", "tests/fixtures/orders_flow.json"])
        .assert()
        .success();
    let value = stdout_json(assert.get_output());

    assert_eq!(value["steps"].as_u64(), Some(6));
    assert_eq!(value["reachable"].as_u64(), Some(5));
    assert_eq!(value["orphans"][0].as_str(), Some("stray"));

    let tree = value["tree"].as_array().unwrap();
    let order: Vec<(u64, &str)> = tree
        .iter()
        .map(|n| (n["depth"].as_u64().unwrap(), n["id"].as_str().unwrap()))
        .collect();
    assert_eq!(
        order,
        vec![
            (0, "open"),
            (0, "orders"),
            (0, "each-order"),
            (1, "open-order"),
            (1, "note")
        ]
    );
    assert_eq!(tree[2]["type"].as_str(), Some("dataLoop"));
    assert_eq!(tree[2]["label"].as_str(), Some("Each open order"));
}

#[test]
fn inspect_rejects_a_tree_without_roots() {
    flowreplay()
        .args(["inspect", "tests/fixtures/cyclic_flow.json"])
        .assert()
        .failure();
}

#[test]
fn replay_requires_a_browser_address() {
    let assert = flowreplay()
        .args(["replay", "tests/fixtures/orders_flow.json"])
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("--ws-url"), "unexpected stderr: {stderr}");
}

#[test]
fn unreadable_step_file_fails() {
    flowreplay()
        .args(["inspect", "tests/fixtures/does_not_exist.json"])
        .assert()
        .failure();
}
