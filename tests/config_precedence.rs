use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

fn ucof_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ucof"));
    cmd.env("HOME", home);
    for var in [
        "UCOF_CONFIG",
        "UCOF_PATH",
        "UCOF_LOG",
        "UCOF_ENGINE_COMMAND",
        "UCOF_ENGINE_TIMEOUT_SECS",
        "UCOF_MODEL_CHEAP",
        "UCOF_MODEL_STANDARD",
        "UCOF_MODEL_ADVANCED",
        "UCOF_MAX_PARALLEL",
        "UCOF_OUTPUT_DIR",
        "UCOF_UI_COLOR",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

fn make_temp_home() -> PathBuf {
    static HOME_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = HOME_SEQ.fetch_add(1, Ordering::Relaxed);
    let home = std::env::temp_dir().join(format!("ucof-config-test-{}-{seq}", std::process::id()));
    let _ = std::fs::remove_dir_all(&home);
    std::fs::create_dir_all(&home).expect("create home");
    home
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdirs");
    }
    std::fs::write(path, bytes).expect("write");
}

fn show(out: &Output) -> serde_json::Value {
    assert!(
        out.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&out.stderr)
    );
    serde_json::from_slice(&out.stdout).expect("parse config json")
}

const CONFIG: &[u8] = br#"
[engine]
command = "my-engine"
timeout_secs = 60

[engine.models]
standard = "model-from-file"

[pipeline]
max_parallel = 3

[pipeline.tiers]
security = "standard"
synthesis = "cheap"
"#;

#[test]
fn defaults_apply_without_a_config_file() {
    let home = make_temp_home();
    let out = ucof_cmd(&home)
        .args(["config", "--show", "--json"])
        .output()
        .expect("run ucof");
    let v = show(&out);
    assert_eq!(v["engine"]["command"], "claude");
    assert_eq!(v["engine"]["timeout_secs"], 300);
    assert_eq!(v["pipeline"]["output_dir"], ".optimization");
    assert_eq!(v["pipeline"]["max_parallel"], 4);
    assert_eq!(v["pipeline"]["tiers"]["discovery"], "cheap");
    assert_eq!(v["pipeline"]["tiers"]["synthesis"], "advanced");

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn file_then_env_then_flags() {
    let home = make_temp_home();
    write_file(&home.join(".config/ucof/config.toml"), CONFIG);

    let out = ucof_cmd(&home)
        .args(["config", "--show", "--json"])
        .output()
        .expect("run ucof");
    let v = show(&out);
    assert_eq!(v["engine"]["command"], "my-engine");
    assert_eq!(v["engine"]["timeout_secs"], 60);
    assert_eq!(v["engine"]["models"]["standard"], "model-from-file");
    assert_eq!(v["pipeline"]["max_parallel"], 3);
    assert_eq!(v["pipeline"]["tiers"]["domains"]["security"], "standard");
    assert_eq!(v["pipeline"]["tiers"]["synthesis"], "cheap");

    let out = ucof_cmd(&home)
        .env("UCOF_ENGINE_TIMEOUT_SECS", "90")
        .env("UCOF_MODEL_STANDARD", "model-from-env")
        .env("UCOF_MAX_PARALLEL", "2")
        .args(["config", "--show", "--json"])
        .output()
        .expect("run ucof");
    let v = show(&out);
    assert_eq!(v["engine"]["timeout_secs"], 90);
    assert_eq!(v["engine"]["models"]["standard"], "model-from-env");
    assert_eq!(v["pipeline"]["max_parallel"], 2);

    let out = ucof_cmd(&home)
        .env("UCOF_ENGINE_TIMEOUT_SECS", "90")
        .env("UCOF_MAX_PARALLEL", "2")
        .args(["--timeout", "120", "--jobs", "1", "config", "--show", "--json"])
        .output()
        .expect("run ucof");
    let v = show(&out);
    assert_eq!(v["engine"]["timeout_secs"], 120);
    assert_eq!(v["pipeline"]["max_parallel"], 1);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn explicit_config_path_beats_the_default_location() {
    let home = make_temp_home();
    write_file(&home.join(".config/ucof/config.toml"), CONFIG);
    let other = home.join("other.toml");
    write_file(&other, b"[engine]\ncommand = \"other-engine\"\n");

    let out = ucof_cmd(&home)
        .env("UCOF_CONFIG", &other)
        .args(["config", "--show", "--json"])
        .output()
        .expect("run ucof");
    let v = show(&out);
    assert_eq!(v["engine"]["command"], "other-engine");
    assert_eq!(v["engine"]["timeout_secs"], 300);

    let _ = std::fs::remove_dir_all(&home);
}

#[test]
fn invalid_values_are_argument_errors() {
    let home = make_temp_home();
    write_file(
        &home.join(".config/ucof/config.toml"),
        b"[pipeline.tiers]\nsecurity = \"gigantic\"\n",
    );
    let out = ucof_cmd(&home)
        .args(["config", "--show"])
        .output()
        .expect("run ucof");
    assert_eq!(out.status.code(), Some(2));

    let home2 = make_temp_home();
    let out = ucof_cmd(&home2)
        .env("UCOF_UI_COLOR", "sometimes")
        .args(["config", "--show"])
        .output()
        .expect("run ucof");
    assert_eq!(out.status.code(), Some(2));

    let _ = std::fs::remove_dir_all(&home);
    let _ = std::fs::remove_dir_all(&home2);
}
