#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use meter_recorder::{
    config::{AppConfig, CommandConfig, DatabaseConfig, DedupConfig, IngestConfig, SupervisorConfig},
    errors::MeterRecorderError,
    recorder,
};

const SCENARIO: [&str; 3] = [
    r#"{"Time":"2023-05-01T10:15:30.123456-05:00","Offset":0,"Length":0,"Type":"SCM","Message":{"ID":42,"Type":12,"TamperPhy":0,"TamperEnc":0,"EndpointID":42,"Consumption":100.5,"ChecksumVal":0}}"#,
    r#"{"Time":"2023-05-01T10:16:30.654321-05:00","Offset":0,"Length":0,"Type":"SCM","Message":{"ID":42,"Type":12,"TamperPhy":0,"TamperEnc":0,"EndpointID":42,"Consumption":100.5,"ChecksumVal":0}}"#,
    r#"{"Time":"2023-05-01T10:17:30-05:00","Offset":0,"Length":0,"Type":"SCM","Message":{"ID":42,"Type":12,"TamperPhy":0,"TamperEnc":0,"EndpointID":42,"Consumption":101.0,"ChecksumVal":0}}"#,
];

fn shell(script: &str) -> CommandConfig {
    CommandConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

fn decoder_printing(lines: &[&str]) -> CommandConfig {
    let quoted: Vec<String> = lines.iter().map(|l| format!("'{}'", l)).collect();
    shell(&format!("sleep 0.5; printf '%s\\n' {}", quoted.join(" ")))
}

fn app_config(db_path: &Path, bridge: CommandConfig, decoder: CommandConfig) -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            path: db_path.to_path_buf(),
        },
        supervisor: SupervisorConfig {
            bridge,
            decoder,
            grace_period: Duration::from_millis(200),
        },
        dedup: DedupConfig {
            window: Duration::from_secs(900),
        },
        ingest: IngestConfig::default(),
    }
}

fn stored_rows(db_path: &Path) -> Vec<(i64, i64, String, i64, f64)> {
    let conn = Connection::open(db_path).unwrap();
    let mut stmt = conn
        .prepare("SELECT id, datetime, type, endpoint_id, reading FROM meter_readings ORDER BY id")
        .unwrap();
    stmt.query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    })
    .unwrap()
    .collect::<Result<Vec<_>, _>>()
    .unwrap()
}

#[tokio::test]
async fn test_retransmissions_persist_once() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let config = app_config(&db_path, shell("sleep 30"), decoder_printing(&SCENARIO));

    let stats = recorder::run(&config, CancellationToken::new())
        .await
        .expect("recorder should stop cleanly when the decoder exits");

    assert_eq!(stats.received, 3);
    assert_eq!(stats.suppressed, 1);
    assert_eq!(stats.persisted, 2);

    let rows = stored_rows(&db_path);
    assert_eq!(rows.len(), 2);
    assert!(rows[0].0 < rows[1].0);
    assert_eq!(
        (rows[0].1, rows[0].2.as_str(), rows[0].3, rows[0].4),
        (1682954130, "SCM", 42, 100.5)
    );
    assert_eq!(
        (rows[1].1, rows[1].2.as_str(), rows[1].3, rows[1].4),
        (1682954250, "SCM", 42, 101.0)
    );
}

#[tokio::test]
async fn test_malformed_decoder_output_is_skipped() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let lines = [
        "garbage",
        r#"{"Time":"later","Type":"SCM","Message":{"EndpointID":1,"Consumption":2}}"#,
        SCENARIO[0],
    ];
    let config = app_config(&db_path, shell("sleep 30"), decoder_printing(&lines));

    let stats = recorder::run(&config, CancellationToken::new()).await.unwrap();

    assert_eq!(stats.malformed, 2);
    assert_eq!(stats.persisted, 1);
    assert_eq!(stored_rows(&db_path).len(), 1);
}

#[tokio::test]
async fn test_bridge_startup_failure() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let config = app_config(&db_path, shell("exit 1"), decoder_printing(&SCENARIO));

    let err = recorder::run(&config, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err,
        MeterRecorderError::StartupFailure { ref process, .. } if process == "bridge"
    ));
    assert!(stored_rows(&db_path).is_empty());
}

#[tokio::test]
async fn test_decoder_startup_failure() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let config = app_config(&db_path, shell("sleep 30"), shell("exit 2"));

    let err = recorder::run(&config, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err,
        MeterRecorderError::StartupFailure { ref process, .. } if process == "decoder"
    ));
}

#[tokio::test]
async fn test_bridge_exit_while_running_is_fatal() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let config = app_config(&db_path, shell("sleep 1"), shell("sleep 30"));

    let err = recorder::run(&config, CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        err,
        MeterRecorderError::ProcessExited { ref process, .. } if process == "bridge"
    ));
}

#[tokio::test]
async fn test_shutdown_signal_stops_recorder() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let config = app_config(&db_path, shell("sleep 30"), shell("sleep 30"));
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        trigger.cancel();
    });

    let stats = tokio::time::timeout(Duration::from_secs(10), recorder::run(&config, shutdown))
        .await
        .expect("recorder should stop after cancellation")
        .unwrap();

    assert_eq!(stats.persisted, 0);
}

#[tokio::test]
async fn test_database_failure_mid_run_is_fatal() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let quoted: Vec<String> = SCENARIO.iter().map(|l| format!("'{}'", l)).collect();
    let decoder = shell(&format!(
        "sleep 1.5; printf '%s\\n' {}; exec sleep 30",
        quoted.join(" ")
    ));
    let config = app_config(&db_path, shell("sleep 30"), decoder);

    // The schema exists once the recorder is running; remove it before the
    // decoder starts printing.
    let breaker_path = db_path.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(800)).await;
        Connection::open(&breaker_path)
            .unwrap()
            .execute("DROP TABLE meter_readings", [])
            .unwrap();
    });

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        recorder::run(&config, CancellationToken::new()),
    )
    .await
    .expect("recorder should stop the decoder and return")
    .unwrap_err();

    assert!(matches!(err, MeterRecorderError::PersistenceError(_)));
}

#[tokio::test]
async fn test_shutdown_during_startup() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("meter.db");
    let mut config = app_config(&db_path, shell("sleep 30"), shell("sleep 30"));
    config.supervisor.grace_period = Duration::from_secs(30);
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(5), recorder::run(&config, shutdown))
        .await
        .expect("startup should not wait out the grace period")
        .unwrap();

    assert_eq!(stats.persisted, 0);
}
