use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

fn promptlab_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("promptlab"));
    cmd.env("HOME", home).env("USERPROFILE", home).env_remove("RUST_LOG");
    cmd
}

fn add_prompt(home: &Path, id: &str, body: &str) {
    promptlab_cmd(home)
        .args(["prompt", "add", id, "--name", "Greeting", "--body", body])
        .assert()
        .success()
        .stdout(contains(format!("Created prompt '{id}'")));
}

#[test]
fn render_substitutes_parameters() {
    let home = TempDir::new().expect("home");
    promptlab_cmd(home.path())
        .args(["render", "Hello {{ name }}!", "-p", "name=World"])
        .assert()
        .success()
        .stdout("Hello World!\n");
}

#[test]
fn render_failure_prints_template_unchanged() {
    let home = TempDir::new().expect("home");
    promptlab_cmd(home.path())
        .args(["render", "Hello {{ name }}!"])
        .assert()
        .success()
        .stdout("Hello {{ name }}!\n");
}

#[test]
fn render_reads_template_from_file() {
    let home = TempDir::new().expect("home");
    let file = home.path().join("greeting.txt");
    fs::write(&file, "Hi {{ who }}").expect("write template");
    promptlab_cmd(home.path())
        .args(["render", &format!("@{}", file.display()), "-p", "who=there"])
        .assert()
        .success()
        .stdout("Hi there\n");
}

#[test]
fn test_json_reports_structured_result() {
    let home = TempDir::new().expect("home");
    let assert = promptlab_cmd(home.path())
        .args(["test", "--template", "Hello {{ name }}!", "-p", "name=<b>x</b>", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let payload: Value = serde_json::from_str(&stdout).expect("json");
    assert_eq!(payload["success"], true);
    assert!(!payload["content"].as_str().unwrap_or_default().contains("<b>"));
    assert_eq!(payload["metadata"]["engine"], "tera");
    assert_eq!(payload["metadata"]["circuit_state"], "closed");
}

#[test]
fn test_rejects_bad_parameter_names() {
    let home = TempDir::new().expect("home");
    promptlab_cmd(home.path())
        .args(["test", "--template", "Hello {{ name }}!", "-p", "1bad-key=x", "--json"])
        .assert()
        .failure()
        .stdout(contains("\"kind\": \"validation\""))
        .stderr(contains("test failed"));
}

#[test]
fn test_honours_engine_preference() {
    let home = TempDir::new().expect("home");
    promptlab_cmd(home.path())
        .args(["test", "--template", "Hi {{name}}", "-p", "name=Al", "--engine", "fallback"])
        .assert()
        .success()
        .stdout(contains("Hi Al").and(contains("engine: \"fallback\"")));
}

#[test]
fn test_without_input_is_an_error() {
    let home = TempDir::new().expect("home");
    promptlab_cmd(home.path())
        .arg("test")
        .assert()
        .failure()
        .stderr(contains("nothing to test"));
}

#[test]
fn prompt_lifecycle_and_versioned_tests() {
    let home = TempDir::new().expect("home");
    add_prompt(home.path(), "greet", "Hello {{ name }}");

    promptlab_cmd(home.path())
        .args(["prompt", "revise", "greet", "--body", "Hey {{ name }}", "--note", "casual"])
        .assert()
        .success()
        .stdout(contains("version 2"));

    promptlab_cmd(home.path())
        .args(["test", "--prompt", "greet", "-p", "name=Bo"])
        .assert()
        .success()
        .stdout(contains("Hey Bo"));

    promptlab_cmd(home.path())
        .args(["test", "--prompt", "greet", "--version", "1", "-p", "name=Bo"])
        .assert()
        .success()
        .stdout(contains("Hello Bo"));

    promptlab_cmd(home.path())
        .args(["prompt", "list"])
        .assert()
        .success()
        .stdout(contains("greet").and(contains("Greeting")));
}

#[test]
fn duplicate_prompt_is_rejected() {
    let home = TempDir::new().expect("home");
    add_prompt(home.path(), "greet", "Hello");
    promptlab_cmd(home.path())
        .args(["prompt", "add", "greet", "--name", "Again", "--body", "x"])
        .assert()
        .failure()
        .stderr(contains("failed to create prompt 'greet'"));
}

#[test]
fn unknown_prompt_fails() {
    let home = TempDir::new().expect("home");
    promptlab_cmd(home.path())
        .args(["test", "--prompt", "ghost"])
        .assert()
        .failure()
        .stderr(contains("not found"));
}

#[test]
fn custom_template_still_requires_a_known_prompt() {
    let home = TempDir::new().expect("home");
    promptlab_cmd(home.path())
        .args(["test", "--prompt", "ghost", "--template", "Hi {{ name }}", "-p", "name=x"])
        .assert()
        .failure()
        .stderr(contains("prompt not found: ghost"));
}

#[test]
fn params_lists_discovered_parameters() {
    let home = TempDir::new().expect("home");
    let assert = promptlab_cmd(home.path())
        .args(["params", "--template", "{{ user.name }} {{ title }}", "--json"])
        .assert()
        .success();
    let payload: Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json");
    let names: Vec<&String> = payload["parameters"].as_object().expect("map").keys().collect();
    assert_eq!(names, vec!["title", "user"]);
    assert_eq!(payload["parameters"]["title"]["type"], "string");
}

#[test]
fn params_for_stored_prompt() {
    let home = TempDir::new().expect("home");
    add_prompt(home.path(), "greet", "Hello {{ name }}");
    promptlab_cmd(home.path())
        .args(["params", "--prompt", "greet"])
        .assert()
        .success()
        .stdout(contains("Prompt: Greeting").and(contains("name")));
}

#[test]
fn engines_lists_primary_and_fallback() {
    let home = TempDir::new().expect("home");
    let assert = promptlab_cmd(home.path()).args(["engines", "--json"]).assert().success();
    let payload: Value = serde_json::from_slice(&assert.get_output().stdout).expect("json");
    assert_eq!(payload[0]["name"], "tera");
    assert_eq!(payload[0]["is_default"], true);
    assert_eq!(payload[1]["name"], "fallback");
}

#[test]
fn config_file_changes_engine_priorities() {
    let home = TempDir::new().expect("home");
    let root = home.path().join(".promptlab");
    fs::create_dir_all(&root).expect("mkdir");
    fs::write(root.join("config.yaml"), "engine:\n  primary_priority: -1\n").expect("config");

    promptlab_cmd(home.path())
        .args(["test", "--template", "{% if x %}y{% endif %}", "--engine", "missing"])
        .assert()
        .success()
        .stdout(contains("engine: \"fallback\""));
}

#[test]
fn malformed_config_is_reported() {
    let home = TempDir::new().expect("home");
    let root = home.path().join(".promptlab");
    fs::create_dir_all(&root).expect("mkdir");
    fs::write(root.join("config.yaml"), "timeout: [unclosed").expect("config");

    promptlab_cmd(home.path())
        .args(["engines"])
        .assert()
        .failure()
        .stderr(contains("config.yaml"));
}
