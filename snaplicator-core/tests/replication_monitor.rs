//! Replication monitor tests against a scripted SQL endpoint.

mod support;

use snaplicator_core::{CopyStatus, ErrorKind, ReplicationMonitor, SqlTarget};
use std::sync::Arc;
use support::{rows, FakeSql};

fn replica() -> SqlTarget {
    SqlTarget::new("pgmain-replica", "postgres", "app")
}

fn monitor(sql: &Arc<FakeSql>) -> ReplicationMonitor {
    ReplicationMonitor::new(sql.clone())
}

#[tokio::test]
async fn test_lag_reports_maximums() {
    let sql = Arc::new(FakeSql::new());
    sql.respond("pg_stat_subscription", rows(&[&["1.5", "3.25"]]));

    let lag = monitor(&sql).lag(&replica()).await.unwrap();
    assert_eq!(lag.network_lag_seconds, 1.5);
    assert_eq!(lag.apply_lag_seconds, 3.25);

    let executed = sql.executed();
    assert_eq!(executed[0].0, replica());
}

#[tokio::test]
async fn test_lag_without_subscriptions_is_zero() {
    for stdout in ["0\u{1f}0", "\\N\u{1f}\\N", ""] {
        let sql = Arc::new(FakeSql::new());
        sql.respond("pg_stat_subscription", stdout);

        let lag = monitor(&sql).lag(&replica()).await.unwrap();
        assert_eq!(lag.network_lag_seconds, 0.0, "{:?}", stdout);
        assert_eq!(lag.apply_lag_seconds, 0.0, "{:?}", stdout);
    }
}

#[tokio::test]
async fn test_lag_query_failure_propagates() {
    let sql = Arc::new(FakeSql::new());
    sql.fail_on("pg_stat_subscription", "psql: error: connection refused");

    let err = monitor(&sql).lag(&replica()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn test_progress_idle_without_tables() {
    let sql = Arc::new(FakeSql::new());
    sql.respond("count(*)", rows(&[&["0", "0"]]));

    let progress = monitor(&sql).copy_progress(&replica()).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Idle);
    assert_eq!(progress.percent, 0.0);
    assert_eq!(progress.details, None);
    assert_eq!(progress.active, None);
    // Nothing is tracked, so the detail queries never run.
    assert_eq!(sql.executed().len(), 1);
}

#[tokio::test]
async fn test_progress_while_copying() {
    let sql = Arc::new(FakeSql::new());
    sql.respond("count(*)", rows(&[&["3", "1"]]));
    sql.respond("srsubstate <> 'r'", rows(&[&["public.orders", "d"], &["public.users", "i"]]));
    sql.respond("pg_stat_progress_copy", rows(&[&["public.orders", "1048576", "4194304", "1200"]]));

    let progress = monitor(&sql).copy_progress(&replica()).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Copying);
    assert_eq!(progress.total_tables, 3);
    assert_eq!(progress.finished_tables, 1);
    assert!((progress.percent - 33.33).abs() < 0.01);

    let details = progress.details.unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].table, "public.orders");
    assert_eq!(details[0].state, "d");
    assert_eq!(details[0].state_label, "data copy");
    assert_eq!(details[1].state_label, "initialize");

    let active = progress.active.unwrap();
    assert_eq!(active[0].bytes_processed, 1_048_576);
    assert_eq!(active[0].bytes_total, 4_194_304);
    assert_eq!(active[0].tuples_processed, 1200);
}

#[tokio::test]
async fn test_progress_complete() {
    let sql = Arc::new(FakeSql::new());
    sql.respond("count(*)", rows(&[&["3", "3"]]));

    let progress = monitor(&sql).copy_progress(&replica()).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Complete);
    assert_eq!(progress.percent, 100.0);
    assert_eq!(progress.details, Some(Vec::new()));
}

#[tokio::test]
async fn test_progress_detail_failures_degrade() {
    let sql = Arc::new(FakeSql::new());
    sql.respond("count(*)", rows(&[&["2", "1"]]));
    sql.fail_on("srsubstate <> 'r'", "ERROR:  permission denied for table pg_subscription_rel");
    sql.fail_on("pg_stat_progress_copy", "ERROR:  relation \"pg_stat_progress_copy\" does not exist");

    let progress = monitor(&sql).copy_progress(&replica()).await.unwrap();
    assert_eq!(progress.status, CopyStatus::Copying);
    assert_eq!(progress.percent, 50.0);
    assert_eq!(progress.details, None);
    assert_eq!(progress.active, None);
}

#[tokio::test]
async fn test_progress_counts_failure_propagates() {
    let sql = Arc::new(FakeSql::new());
    sql.fail_on("count(*)", "psql: error: connection refused");

    let err = monitor(&sql).copy_progress(&replica()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}
