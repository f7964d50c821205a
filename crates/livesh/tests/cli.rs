use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

const FRAGMENT: &str = r"#version 450
layout(location = 0) in vec2 v_uv;
layout(location = 0) out vec4 out_color;

layout(set = 0, binding = 0) uniform Params {
    vec4 tint;
    float time;
} params;

void main() {
    out_color = params.tint * (0.5 + 0.5 * sin(params.time + v_uv.x));
}
";

const BROKEN: &str = r"#version 450
layout(location = 0) out vec4 out_color;
void main() {
    out_color = vec4(missing_symbol, 1.0);
}
";

fn livesh(config_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_livesh"))
        .args(args)
        .env("LIVESH_CONFIG_DIR", config_dir)
        .env_remove("LIVESH_CONFIG")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run livesh")
}

fn write_shader(dir: &TempDir, name: &str, source: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, source).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn compile_reports_success() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(&dir, "tint.frag", FRAGMENT);

    let output = livesh(dir.path(), &["compile", &shader, "--compiler", "naga"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("compiled fragment stage"), "stdout: {stdout}");
}

#[test]
fn compile_failure_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(&dir, "broken.frag", BROKEN);

    let output = livesh(dir.path(), &["compile", &shader, "--compiler", "naga"]);
    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}

#[test]
fn compile_missing_file_names_path() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.frag");

    let output = livesh(dir.path(), &["compile", &missing.to_string_lossy()]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("absent.frag"), "stderr: {stderr}");
}

#[test]
fn reflect_prints_bindings_as_json() {
    let dir = TempDir::new().unwrap();
    let shader = write_shader(&dir, "tint.frag", FRAGMENT);

    let output = livesh(dir.path(), &["reflect", &shader, "--compiler", "naga"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["stage"], "fragment");
    assert_eq!(json["entry_point"], "main");
    let bindings = json["bindings"].as_array().unwrap();
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0]["index"], 0);
    assert_eq!(bindings[0]["kind"], "uniform-buffer");
    assert_eq!(bindings[0]["byte_size"], 32);
}

#[test]
fn where_reports_config_dir_override() {
    let dir = TempDir::new().unwrap();

    let output = livesh(dir.path(), &["where"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&*dir.path().to_string_lossy()));
    assert!(stdout.contains("livesh.toml (missing)"));

    fs::write(dir.path().join("livesh.toml"), "version = 1\n").unwrap();
    let output = livesh(dir.path(), &["where"]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("livesh.toml (present)"));
}
