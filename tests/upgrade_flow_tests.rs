//! End-to-end upgrade runs against recording fakes

use pgupgrade::{HopState, UpgradeError};
use std::fs;
use std::sync::Arc;


use upgrade_fixture::{
    Event, FakeProbe, Fixture, JOBS, RecordingRunner, SERVICE_USER, is_environment,
    is_precondition, new_log,
};

fn upgrade_argv(fixture: &Fixture, old: u32, new: u32, old_port: u16, new_port: u16) -> Vec<String> {
    let conf = |version: u32, port: u16| {
        fixture
            .config
            .tmp_conf_dir(version, port)
            .join("postgresql.conf")
            .display()
            .to_string()
    };
    vec![
        fixture.tool(new, "pg_upgrade"),
        "--jobs".to_string(),
        JOBS.to_string(),
        "--old-bindir".to_string(),
        fixture.config.bin_dir(old).display().to_string(),
        "--new-bindir".to_string(),
        fixture.config.bin_dir(new).display().to_string(),
        "--old-datadir".to_string(),
        fixture.config.main_dir(old).display().to_string(),
        "--new-datadir".to_string(),
        fixture.config.main_dir(new).display().to_string(),
        "--old-port".to_string(),
        old_port.to_string(),
        "--new-port".to_string(),
        new_port.to_string(),
        "--old-options".to_string(),
        format!(" -c config_file={}", conf(old, old_port)),
        "--new-options".to_string(),
        format!(" -c config_file={}", conf(new, new_port)),
        "--link".to_string(),
        "--verbose".to_string(),
    ]
}

#[tokio::test]
async fn test_upgrade_through_intermediate_version() {
    let fixture = Fixture::new(11, 13);
    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 3));

    let report = fixture.upgrader(runner, probe).run(11, 13).await.unwrap();

    assert!(!fixture.config.data_dir(11).exists());
    assert!(!fixture.config.data_dir(12).exists());
    assert!(fixture.config.main_dir(13).join("PG_VERSION").is_file());

    assert_eq!(report.hops.len(), 2);
    for hop in &report.hops {
        assert_eq!(
            hop.states,
            vec![
                HopState::Planned,
                HopState::Initialized,
                HopState::CompatibilityChecked,
                HopState::Upgraded,
                HopState::SupersededDataPurged,
            ]
        );
        assert_eq!(hop.removed_byproducts.len(), 2);
    }
    assert_eq!(report.hops[0].purged_data_dir, fixture.config.data_dir(11));
    assert_eq!(report.maintenance.version, 13);
    assert_eq!(report.maintenance.port, 50435);
    assert_eq!(report.maintenance.readiness_attempts, 3);
    assert!(!fixture.config.data_root.join("delete_old_cluster.sh").exists());

    let events = events.lock().unwrap().clone();
    let programs: Vec<String> = events.iter().filter_map(Event::program).collect();
    assert_eq!(
        programs,
        vec![
            "initdb", "pg_upgrade", "pg_upgrade", "initdb", "pg_upgrade", "pg_upgrade",
            "postgres", "vacuumdb",
        ]
    );

    let mut check = upgrade_argv(&fixture, 11, 12, 50432, 50433);
    check.push("--check".to_string());
    assert_eq!(events[1], Event::Run(check));
    assert_eq!(events[2], Event::Run(upgrade_argv(&fixture, 11, 12, 50432, 50433)));
    assert_eq!(events[5], Event::Run(upgrade_argv(&fixture, 12, 13, 50434, 50435)));

    assert_eq!(
        events[3],
        Event::Run(vec![
            fixture.tool(13, "initdb"),
            "--pgdata".to_string(),
            fixture.config.main_dir(13).display().to_string(),
            "--data-checksums".to_string(),
            "--encoding".to_string(),
            "UTF-8".to_string(),
            "--lc-collate".to_string(),
            "en_US.UTF-8".to_string(),
            "--lc-ctype".to_string(),
            "en_US.UTF-8".to_string(),
        ])
    );

    let ready = events
        .iter()
        .position(|event| *event == Event::ProbeReady(50435))
        .unwrap();
    let vacuum = events
        .iter()
        .position(|event| event.program().as_deref() == Some("vacuumdb"))
        .unwrap();
    assert!(ready < vacuum);
    assert_eq!(events.last(), Some(&Event::Terminate));
}

#[tokio::test]
async fn test_failed_check_leaves_old_data_intact() {
    let fixture = Fixture::new(11, 13);
    let events = new_log();
    let runner = Arc::new(
        RecordingRunner::new(events.clone())
            .fail_when(|command| command.args.iter().any(|arg| arg == "--check")),
    );
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let result = fixture.upgrader(runner, probe).run(11, 13).await;

    match result {
        Err(UpgradeError::ExternalTool { command, exit_code, .. }) => {
            assert_eq!(exit_code, 1);
            assert!(command.contains("--check"));
        }
        other => panic!("expected tool failure, got {:?}", other.map(|_| ())),
    }
    assert!(fixture.config.main_dir(11).join("PG_VERSION").is_file());

    let events = events.lock().unwrap().clone();
    assert!(!events.iter().any(|event| matches!(event, Event::Spawn(_))));
    assert_eq!(events.len(), 2);
}

#[tokio::test]
async fn test_mid_chain_failure_keeps_committed_hops() {
    let fixture = Fixture::new(11, 13);
    let target_upgrade = fixture.tool(13, "pg_upgrade");
    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()).fail_when(move |command| {
        command.program.display().to_string() == target_upgrade
            && !command.args.iter().any(|arg| arg == "--check")
    }));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let result = fixture.upgrader(runner, probe).run(11, 13).await;

    assert!(matches!(result, Err(UpgradeError::ExternalTool { .. })));
    assert!(!fixture.config.data_dir(11).exists());
    assert!(fixture.config.main_dir(12).join("PG_VERSION").is_file());
    assert!(fixture.config.main_dir(13).exists());
}

#[tokio::test]
async fn test_wrong_user_is_rejected_before_any_command() {
    let fixture = Fixture::new(11, 12);
    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let result = fixture
        .upgrader(runner, probe)
        .invoking_user("root")
        .run(11, 12)
        .await;

    assert!(is_environment(&result));
    assert!(result.unwrap_err().to_string().contains(SERVICE_USER));
    assert!(events.lock().unwrap().is_empty());
    assert!(fixture.config.data_dir(11).exists());
}

#[tokio::test]
async fn test_downgrade_is_rejected() {
    let fixture = Fixture::new(11, 12);
    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let result = fixture.upgrader(runner, probe).run(12, 11).await;

    assert!(is_precondition(&result));
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_existing_target_stops_before_first_hop() {
    let fixture = Fixture::new(11, 13);
    fs::create_dir_all(fixture.config.data_dir(13)).unwrap();
    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let result = fixture.upgrader(runner, probe).run(11, 13).await;

    assert!(is_precondition(&result));
    assert!(events.lock().unwrap().is_empty());
    assert!(fixture.config.main_dir(11).join("PG_VERSION").is_file());
    assert!(!fixture.config.data_dir(12).exists());
}

#[tokio::test]
async fn test_memory_probe_and_pre_upgrade_hook() {
    let mut fixture = Fixture::new(11, 12);
    let probe_path = fixture.temp_dir.path().join("container_memory_limit.sh");
    let hook_path = fixture.temp_dir.path().join("update_memory_config.sh");
    fixture.config.ram_mb = None;
    fixture.config.memory_probe = probe_path.clone();
    fixture.config.pre_upgrade_hook = Some(hook_path.clone());

    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()).output_for(&probe_path, "8192\n"));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let report = fixture.upgrader(runner, probe).run(11, 12).await.unwrap();

    assert_eq!(report.ram_mb, 8192);
    let conf = fs::read_to_string(fixture.config.tmp_conf_dir(12, 50433).join("postgresql.conf"))
        .unwrap();
    assert!(conf.contains("maintenance_work_mem = 819MB"));

    let events = events.lock().unwrap().clone();
    assert_eq!(events[0], Event::Run(vec![hook_path.display().to_string()]));
    assert_eq!(events[1], Event::Run(vec![probe_path.display().to_string()]));
}

#[tokio::test]
async fn test_zero_memory_is_rejected() {
    let mut fixture = Fixture::new(11, 12);
    let probe_path = fixture.temp_dir.path().join("container_memory_limit.sh");
    fixture.config.ram_mb = None;
    fixture.config.memory_probe = probe_path.clone();

    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()).output_for(&probe_path, "0\n"));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let result = fixture.upgrader(runner, probe).run(11, 12).await;

    assert!(is_environment(&result));
    assert!(fixture.config.main_dir(11).exists());
    assert!(!fixture.config.data_dir(12).exists());
}

#[tokio::test]
async fn test_stale_byproducts_are_removed_first() {
    let fixture = Fixture::new(11, 12);
    let stale = fixture.config.data_root.join("pg_upgrade_dump_16384.custom");
    fs::write(&stale, "").unwrap();
    fs::write(fixture.config.data_root.join("notes.txt"), "").unwrap();

    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let report = fixture.upgrader(runner, probe).run(11, 12).await.unwrap();

    assert_eq!(report.removed_stale_byproducts, vec![stale.clone()]);
    assert!(!stale.exists());
    assert!(fixture.config.data_root.join("notes.txt").exists());
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let fixture = Fixture::new(11, 12);
    let events = new_log();
    let runner = Arc::new(RecordingRunner::new(events.clone()));
    let probe = Arc::new(FakeProbe::opens_after(events.clone(), 1));

    let report = fixture.upgrader(runner, probe).run(11, 12).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["source_version"], 11);
    assert_eq!(json["target_version"], 12);
    assert_eq!(json["hops"][0]["states"][4], "superseded_data_purged");
    assert_eq!(json["maintenance"]["port"], 50433);
    assert!(report.finished_at >= report.started_at);
}
