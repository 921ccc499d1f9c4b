//! Change-only history of the result store.

mod helpers;

use scan_fleet::models::{Analysis, ScanType, Severity, TargetRef};
use scan_fleet::storage::scans::{add_scan_at, had_scan_with_points, scan_history};
use scan_fleet::storage::AddScanOutcome;

use helpers::{create_file_pool, seed_url};

fn ftp(rating: &str, severity: Severity, message: &str) -> Analysis {
    Analysis::new(ScanType::Ftp, rating, severity, message)
}

async fn ftp_endpoint(pool: &sqlx::SqlitePool) -> TargetRef {
    let (_, endpoints) = seed_url(pool, "Org", "NL", "municipality", "host-a.nl", &[("ftp", 21)]).await;
    TargetRef::endpoint(endpoints[0])
}

#[tokio::test]
async fn test_identical_observations_keep_one_record() {
    let (_dir, pool) = create_file_pool().await;
    let target = ftp_endpoint(&pool).await;
    let secure = ftp("secure", Severity::Ok, "ok");

    let mut outcomes = Vec::new();
    for moment in [1_000, 2_000, 3_000] {
        outcomes.push(add_scan_at(&pool, target, &secure, moment).await.unwrap());
    }

    assert_eq!(
        outcomes,
        vec![
            AddScanOutcome::Created,
            AddScanOutcome::Refreshed,
            AddScanOutcome::Refreshed
        ]
    );
    let history = scan_history(&pool, ScanType::Ftp, target).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].last_scan_moment_ms, 3_000);
    assert_eq!(history[0].rating_determined_on_ms, 1_000);
    assert!(history[0].is_the_latest_scan);
}

#[tokio::test]
async fn test_rating_change_creates_new_latest_record() {
    let (_dir, pool) = create_file_pool().await;
    let target = ftp_endpoint(&pool).await;

    add_scan_at(&pool, target, &ftp("insecure", Severity::High, "no tls"), 1_000)
        .await
        .unwrap();
    assert!(had_scan_with_points(&pool, ScanType::Ftp, target).await.unwrap());

    add_scan_at(&pool, target, &ftp("secure", Severity::Ok, "tls ok"), 2_000)
        .await
        .unwrap();

    let history = scan_history(&pool, ScanType::Ftp, target).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[0].is_the_latest_scan);
    assert!(history[1].is_the_latest_scan);
    assert_eq!(history[1].rating, "secure");
    assert!(!had_scan_with_points(&pool, ScanType::Ftp, target).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_identical_reports_do_not_duplicate() {
    let (_dir, pool) = create_file_pool().await;
    let target = ftp_endpoint(&pool).await;

    let mut writers = Vec::new();
    for moment in 0..8 {
        let pool = pool.clone();
        writers.push(tokio::spawn(async move {
            add_scan_at(&pool, target, &ftp("secure", Severity::Ok, "ok"), 1_000 + moment)
                .await
                .unwrap()
        }));
    }
    let mut created = 0;
    for writer in writers {
        if writer.await.unwrap() == AddScanOutcome::Created {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    let history = scan_history(&pool, ScanType::Ftp, target).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].last_scan_moment_ms, 1_007);
}
