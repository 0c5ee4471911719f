use std::fs;

use tempfile::TempDir;

use shieldq::{
    config::{Config, ConfigError},
    types::PoolType,
    upgrade::{UpgradeId, UpgradeSchedule, UpgradeStatus},
};

const REGTEST: &str = r#"
[upgrades]
overwinter = 1
sapling = 1
blossom = 205
heartwood = 210
canopy = 220

[policy]
cutover = "canopy"
deprecated_pool = "sprout"

[runtime]
workers = 2
batch_max_latency_ms = 10
"#;

#[test]
fn parses_regtest_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("shieldq.toml");
    fs::write(&path, REGTEST).expect("write");

    let config = Config::load(&path).expect("load");
    let schedule = config.schedule().expect("schedule");
    assert_eq!(schedule.activation_height(UpgradeId::Canopy), Some(220));
    assert_eq!(schedule.activation_height(UpgradeId::Nu5), None);
    assert_eq!(schedule.status(UpgradeId::Canopy, 219), UpgradeStatus::Pending);

    let policy = config.policy().expect("policy");
    assert_eq!(policy.cutover(), UpgradeId::Canopy);
    assert_eq!(policy.deprecated_pool(), PoolType::Sprout);
    assert!(policy.cutover_active(220));

    let runtime = config.runtime().expect("runtime");
    assert_eq!(runtime.workers, 2);
    assert_eq!(runtime.batch_max_latency_ms, 10);
    assert!(runtime.flush_on_submit);
}

#[test]
fn empty_config_means_mainnet_defaults() {
    let config = Config::from_toml_str("").expect("parse");
    let schedule = config.schedule().expect("schedule");
    let mainnet = UpgradeSchedule::mainnet();
    assert_eq!(schedule.iter().collect::<Vec<_>>(), mainnet.iter().collect::<Vec<_>>());
    assert_eq!(schedule.activation_height(UpgradeId::Canopy), Some(1_046_400));
    assert_eq!(config.runtime().expect("runtime").workers, 4);
}

#[test]
fn rejects_bad_upgrades() {
    let unknown = Config::from_toml_str("[upgrades]\nsapling = 1\nzip999 = 5\n").expect("parse");
    assert!(matches!(unknown.schedule(), Err(ConfigError::UnknownUpgrade(name)) if name == "zip999"));

    let backwards = Config::from_toml_str(
        "[upgrades]\noverwinter = 10\nsapling = 10\nblossom = 30\nheartwood = 20\n",
    )
    .expect("parse");
    assert!(matches!(
        backwards.schedule(),
        Err(ConfigError::NonMonotonic {
            upgrade: UpgradeId::Heartwood,
            ..
        })
    ));

    let unknown_cutover = Config::from_toml_str("[policy]\ncutover = \"zip999\"\n");
    assert!(matches!(unknown_cutover, Err(ConfigError::Parse { .. })));
}

#[test]
fn rejects_zero_workers() {
    let config = Config::from_toml_str("[runtime]\nworkers = 0\n").expect("parse");
    assert!(matches!(config.runtime(), Err(ConfigError::NoWorkers)));
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = TempDir::new().expect("tempdir");
    let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}
