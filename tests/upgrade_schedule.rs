use std::sync::Arc;

use shieldq::{
    chain::{ChainTip, ChainView},
    config::ConfigError,
    types::Height,
    upgrade::{UpgradeId, UpgradeSchedule, UpgradeStatus},
};

fn regtest() -> UpgradeSchedule {
    UpgradeSchedule::new([
        (UpgradeId::Overwinter, 1),
        (UpgradeId::Sapling, 1),
        (UpgradeId::Blossom, 205),
        (UpgradeId::Heartwood, 210),
        (UpgradeId::Canopy, 220),
        (UpgradeId::Nu5, 225),
    ])
    .expect("schedule")
}

#[test]
fn activation_is_inclusive_of_the_configured_height() {
    let schedule = regtest();
    assert!(!schedule.is_active(UpgradeId::Canopy, 219));
    assert!(schedule.is_active(UpgradeId::Canopy, 220));
    assert_eq!(schedule.status(UpgradeId::Canopy, 219), UpgradeStatus::Pending);
    assert_eq!(schedule.status(UpgradeId::Canopy, 220), UpgradeStatus::Active);
    assert_eq!(schedule.current_upgrade(222), Some(UpgradeId::Canopy));
    assert_eq!(schedule.current_upgrade(0), None);
}

#[test]
fn unconfigured_upgrades_never_activate() {
    let schedule = UpgradeSchedule::new([(UpgradeId::Overwinter, 10)]).expect("schedule");
    assert!(!schedule.is_active(UpgradeId::Nu5, Height::MAX));
    assert_eq!(schedule.status(UpgradeId::Nu5, 0), UpgradeStatus::Disabled);
}

#[test]
fn decreasing_heights_are_rejected() {
    let err = UpgradeSchedule::new([
        (UpgradeId::Overwinter, 1),
        (UpgradeId::Sapling, 1),
        (UpgradeId::Blossom, 300),
        (UpgradeId::Heartwood, 200),
    ])
    .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::NonMonotonic {
            upgrade: UpgradeId::Heartwood,
            earlier: UpgradeId::Blossom,
            ..
        }
    ));
}

#[test]
fn gaps_before_a_configured_upgrade_are_rejected() {
    let err = UpgradeSchedule::new([(UpgradeId::Overwinter, 1), (UpgradeId::Canopy, 20)]).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MissingHeight {
            upgrade: UpgradeId::Sapling,
            required_by: UpgradeId::Canopy,
        }
    ));
}

#[test]
fn names_parse_case_insensitively() {
    assert_eq!("NU5".parse::<UpgradeId>().expect("parse"), UpgradeId::Nu5);
    assert!("zip-999".parse::<UpgradeId>().is_err());
    assert_eq!(format!("{:08x}", UpgradeId::Canopy.branch_id()), "e9ff75a6");
}

#[test]
fn chain_tip_reports_upgrade_status_and_never_moves_back() {
    let tip = ChainTip::new(Arc::new(regtest()), 215);
    assert_eq!(tip.next_height(), 216);
    assert_eq!(tip.upgrade_status(UpgradeId::Canopy), UpgradeStatus::Pending);

    assert_eq!(tip.advance(5), 220);
    assert_eq!(tip.upgrade_status(UpgradeId::Canopy), UpgradeStatus::Active);

    assert_eq!(tip.set_height(210), 220);
    assert_eq!(tip.current_height(), 220);

    let canopy = tip
        .upgrades()
        .into_iter()
        .find(|info| info.upgrade == UpgradeId::Canopy)
        .expect("canopy row");
    assert_eq!(canopy.branch_id, 0xe9ff_75a6);
    assert_eq!(canopy.activation_height, Some(220));
    assert_eq!(canopy.status, UpgradeStatus::Active);
}

#[test]
fn chain_tip_saturates_instead_of_wrapping() {
    let tip = ChainTip::new(Arc::new(regtest()), 100);
    assert_eq!(tip.advance(Height::MAX), Height::MAX);
    assert_eq!(tip.current_height(), Height::MAX);

    assert_eq!(tip.advance(1), Height::MAX);
    assert_eq!(tip.current_height(), Height::MAX);
    assert_eq!(tip.next_height(), Height::MAX);
}
