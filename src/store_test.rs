use anyhow::Result;

use crate::config::Config;
use crate::error::RingError;
use crate::fixtures;
use crate::models::RingName;

#[test]
fn initialize_creates_empty_builder() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let mut store = fixtures::store(&config);
    assert!(!store.is_initialized(RingName::Object), "expected object ring not to be initialized yet");

    store.initialize(RingName::Object, 6, 3, 1, false)?;

    assert!(store.is_initialized(RingName::Object), "expected object ring to be initialized");
    assert!(!store.is_initialized(RingName::Account), "expected account ring to remain uninitialized");
    let builder = store.load(RingName::Object)?;
    assert!(builder.part_power == 6, "expected part power 6 got {}", builder.part_power);
    assert!(builder.replicas == 3, "expected 3 replicas got {}", builder.replicas);
    assert!(builder.min_part_hours == 1, "expected min_part_hours 1 got {}", builder.min_part_hours);
    assert!(builder.devs.is_empty(), "expected no devices got {}", builder.devs.len());
    Ok(())
}

#[test]
fn initialize_twice_requires_force() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let mut store = fixtures::store(&config);
    store.initialize(RingName::Account, 6, 3, 1, false)?;
    store.add_device(RingName::Account, fixtures::node_settings("10.0.0.2", 1, &["sdb"]).devices_for(RingName::Account).remove(0)?)?;

    let err = store
        .initialize(RingName::Account, 8, 3, 1, false)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected second initialization to fail"))?;
    assert!(
        matches!(err.downcast_ref::<RingError>(), Some(RingError::AlreadyInitialized(RingName::Account))),
        "expected AlreadyInitialized error got {:?}",
        err
    );
    let builder = store.load(RingName::Account)?;
    assert!(builder.devs.len() == 1, "expected existing builder to be kept, got {} devices", builder.devs.len());

    store.initialize(RingName::Account, 8, 3, 1, true)?;
    let builder = store.load(RingName::Account)?;
    assert!(builder.part_power == 8, "expected forced re-initialization to replace builder, got part power {}", builder.part_power);
    assert!(builder.devs.is_empty(), "expected no devices after re-initialization got {}", builder.devs.len());
    Ok(())
}

#[test]
fn add_device_is_idempotent() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let mut store = fixtures::store(&config);
    store.initialize(RingName::Container, 6, 3, 1, false)?;
    let device = fixtures::node_settings("10.0.0.2", 1, &["sdb"]).devices_for(RingName::Container).remove(0)?;

    let first = store.add_device(RingName::Container, device.clone())?;
    let before = std::fs::read(store.paths().builder_path(RingName::Container))?;
    let second = store.add_device(RingName::Container, device)?;
    let after = std::fs::read(store.paths().builder_path(RingName::Container))?;

    assert!(first, "expected first add to report the device as added");
    assert!(!second, "expected second add to report the device as present");
    assert!(before == after, "expected builder not to be rewritten by a duplicate add");
    let devs = store.load(RingName::Container)?.devs;
    assert!(devs.len() == 1, "expected 1 device got {}", devs.len());
    Ok(())
}

#[test]
fn load_uninitialized_ring_is_persistence_error() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let store = fixtures::store(&config);

    let err = store
        .load(RingName::Object)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected load of a missing builder to fail"))?;

    assert!(RingError::is_persistence(&err), "expected persistence error got {:?}", err);
    Ok(())
}

#[test]
fn load_corrupt_builder_is_persistence_error() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let store = fixtures::store(&config);
    let path = store.paths().builder_path(RingName::Object);
    std::fs::create_dir_all(path.parent().ok_or_else(|| anyhow::anyhow!("builder path has no parent"))?)?;
    std::fs::write(&path, b"{not json")?;

    let err = store
        .load(RingName::Object)
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected load of a corrupt builder to fail"))?;

    assert!(RingError::is_persistence(&err), "expected persistence error got {:?}", err);
    Ok(())
}

#[test]
fn min_part_hours_get_and_set() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let mut store = fixtures::store(&config);
    store.initialize(RingName::Object, 6, 3, 1, false)?;

    assert!(store.get_min_part_hours(RingName::Object)? == 1, "expected initial min_part_hours of 1");
    assert!(store.set_min_part_hours(RingName::Object, 4, false)?, "expected raise to be applied");
    assert!(!store.set_min_part_hours(RingName::Object, 4, false)?, "expected equal value to be a no-op");
    assert!(store.set_min_part_hours(RingName::Object, 2, false).is_err(), "expected decrease without override to fail");
    assert!(store.get_min_part_hours(RingName::Object)? == 4, "expected refused decrease to leave the value at 4");
    assert!(store.set_min_part_hours(RingName::Object, 2, true)?, "expected decrease with override to be applied");
    assert!(store.get_min_part_hours(RingName::Object)? == 2, "expected min_part_hours of 2");
    Ok(())
}

#[test]
fn writes_leave_no_temp_files_behind() -> Result<()> {
    let (config, _tmpdir) = Config::new_test()?;
    let mut store = fixtures::initialized_store(&config, 4, 3, 0)?;
    let mut builder = store.load(RingName::Object)?;
    builder.version = 7;
    store.save(RingName::Object, &builder)?;
    store.write_ring(RingName::Object, &builder)?;

    let mut names: Vec<_> = std::fs::read_dir(&config.swift_conf_dir)?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    names.sort();

    let expected = vec!["account.builder", "container.builder", "object.builder", "object.ring"];
    assert!(names == expected, "expected conf dir to contain {:?} got {:?}", expected, names);
    let version = store.load(RingName::Object)?.version;
    assert!(version == 7, "expected saved builder to be reloaded with version 7 got {}", version);
    Ok(())
}
