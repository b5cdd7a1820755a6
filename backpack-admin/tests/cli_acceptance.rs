use backpack_core::{ActivityKind, Database};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    home: PathBuf,
    xdg_data: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_data = base.join("xdg-data");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        for dir in [&home, &xdg_data, &xdg_config, &xdg_state] {
            fs::create_dir_all(dir).expect("failed to create test dir");
        }

        Self {
            _temp_dir: temp_dir,
            home,
            xdg_data,
            xdg_config,
            xdg_state,
        }
    }

    fn store_dir(&self) -> PathBuf {
        self.xdg_data.join("backpacktrack")
    }

    fn db_path(&self) -> PathBuf {
        self.store_dir().join("BackPackTrackII")
    }
}

fn run_admin(env: &CliTestEnv, args: &[&str]) -> Output {
    Command::new(assert_cmd::cargo::cargo_bin!("backpack-admin"))
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_DATA_HOME", &env.xdg_data)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .output()
        .unwrap_or_else(|e| panic!("failed to execute backpack-admin: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }
    panic!(
        "backpack-admin {} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        args.join(" "),
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn seed(path: &Path) {
    let db = Database::open(path).expect("failed to open seed store");
    db.update_steps(backpack_core::now_ms(), 321)
        .expect("failed to seed steps");
    db.update_activity(backpack_core::now_ms(), ActivityKind::Running, 60_000)
        .expect("failed to seed activity");
}

#[test]
fn migrate_creates_store_at_default_location() {
    let env = CliTestEnv::new();

    let output = run_admin(&env, &["migrate"]);
    assert_success(&["migrate"], &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Created store at schema version 12"),
        "unexpected output:\n{stdout}"
    );
    assert!(env.db_path().exists());

    let again = run_admin(&env, &["migrate"]);
    assert!(String::from_utf8_lossy(&again.stdout).contains("already at schema version 12"));
}

#[test]
fn status_json_reports_row_counts() {
    let env = CliTestEnv::new();
    let path = env.xdg_data.join("explicit.db");
    seed(&path);

    let path_arg = path.to_string_lossy().into_owned();
    let args = ["status", "--json", "--db", path_arg.as_str()];
    let output = run_admin(&env, &args);
    assert_success(&args, &output);

    let status: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("status output should be JSON");
    assert_eq!(status["schema_version"], 12);
    assert_eq!(status["rows"]["step"], 1);
    assert_eq!(status["rows"]["activitylog"], 1);
    assert_eq!(status["rows"]["location"], 0);
}

#[test]
fn legacy_store_is_relocated_before_vacuum() {
    let env = CliTestEnv::new();
    fs::create_dir_all(env.store_dir()).unwrap();
    seed(&env.store_dir().join("BACKPACKTRACKII"));

    let output = run_admin(&env, &["vacuum"]);
    assert_success(&["vacuum"], &output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Vacuum complete"));

    assert!(env.db_path().exists());
    assert!(!env.store_dir().join("BACKPACKTRACKII").exists());
    let db = Database::open(&env.db_path()).unwrap();
    assert_eq!(db.get_steps(true).unwrap()[0].count, 321);
}
