//! Resume, reconciliation and cancellation tests
//!
//! Each test runs the crawler more than once against the same output
//! directory and checks that every listing ends up in the file exactly once.

mod common;

use common::*;
use listing_harvester::crawler::Coordinator;
use listing_harvester::storage::{open_storage, RunStatus, Storage};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CRAWL_ID: &str = "lianjia:bj:chengjiao";

fn resume_site() -> Vec<DistrictFixture> {
    vec![district(
        "shunyi",
        "顺义",
        vec![
            county("houshayu", "后沙峪", vec![vec![1, 2], vec![3, 4], vec![5]]),
            county("mapo", "马坡", vec![vec![6, 2, 7]]),
        ],
    )]
}

/// `sourceUrl`s of the parseable lines, keeping repeats
fn valid_source_urls(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|v| v["sourceUrl"].as_str().map(str::to_string))
        .collect()
}

async fn crawl_once(server: &MockServer, dir: &Path) -> Vec<String> {
    let config = create_test_config(&server.uri(), dir);
    let output = config.output_path();
    Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();
    sorted_source_urls(&output)
}

#[tokio::test]
async fn test_resume_after_crash_matches_uninterrupted_run() {
    let server = MockServer::start().await;
    // The first two requests for page 2 fail, exhausting the first run's attempts
    Mock::given(method("GET"))
        .and(path("/chengjiao/houshayu/pg2/"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_site(&server, &resume_site()).await;
    mount_details(&server, 1..=7).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();
    let state_path = config.state_path();

    let first = Coordinator::new(config.clone(), "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();
    assert_eq!(first.pages_failed, 1);
    assert_eq!(first.records_written, 5);

    // Simulate a crash: the run never finished and the last write was cut short
    {
        let mut store = open_storage(&state_path).unwrap();
        store.update_run_status(first.run_id, RunStatus::Running).unwrap();
    }
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&output).unwrap();
        file.write_all(br#"{"sourceUrl":"http://127.0.0.1/chengjiao/9"#).unwrap();
    }

    let second = Coordinator::new(config, "hash".to_string(), false).unwrap();
    assert!(second.is_resuming());
    let summary = second.run().await.unwrap();

    assert!(summary.resumed);
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.pages_resumed, 3);
    assert_eq!(summary.pages_fetched, 1);
    assert_eq!(summary.records_written, 2);

    let urls = valid_source_urls(&output);
    let unique: HashSet<&String> = urls.iter().collect();
    assert_eq!(unique.len(), urls.len(), "output holds a duplicate");

    let mut resumed = urls.clone();
    resumed.sort();

    let clean_dir = TempDir::new().unwrap();
    let uninterrupted = crawl_once(&server, clean_dir.path()).await;
    assert_eq!(resumed, uninterrupted);
    assert_eq!(uninterrupted.len(), 7);

    let store = open_storage(&state_path).unwrap();
    let runs = store.list_runs(CRAWL_ID).unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().any(|run| run.status == RunStatus::Completed));
}

#[tokio::test]
async fn test_lost_state_store_is_rebuilt_from_output() {
    let server = MockServer::start().await;
    mount_site(&server, &resume_site()).await;
    mount_details(&server, 1..=7).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();
    let state_path = config.state_path();

    let before = crawl_once(&server, dir.path()).await;
    assert_eq!(before.len(), 7);

    std::fs::remove_file(&state_path).unwrap();
    for suffix in ["-wal", "-shm"] {
        let mut side = state_path.clone().into_os_string();
        side.push(suffix);
        let _ = std::fs::remove_file(side);
    }

    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_resumed, 0);
    assert_eq!(summary.records_written, 0);
    assert_eq!(summary.records_skipped_seen, 8);
    assert_eq!(sorted_source_urls(&output), before);

    let store = open_storage(&state_path).unwrap();
    assert_eq!(store.count_seen(CRAWL_ID).unwrap(), 7);
}

#[tokio::test]
async fn test_fresh_run_moves_output_aside() {
    let server = MockServer::start().await;
    mount_site(&server, &resume_site()).await;
    mount_details(&server, 1..=7).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();

    let before = crawl_once(&server, dir.path()).await;

    let summary = Coordinator::new(config, "hash".to_string(), true)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert!(!summary.resumed);
    assert_eq!(summary.pages_resumed, 0);
    assert_eq!(summary.records_written, 7);
    assert_eq!(sorted_source_urls(&output), before);

    let mut backup = output.clone().into_os_string();
    backup.push(".bak");
    assert_eq!(sorted_source_urls(Path::new(&backup)), before);
}

#[tokio::test]
async fn test_cancelled_page_is_redone_on_resume() {
    let server = MockServer::start().await;
    mount_site(
        &server,
        &[district("tongzhou", "通州", vec![county("liyuan", "梨园", vec![vec![61], vec![62]])])],
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/chengjiao/61.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_page(61))
                .set_delay(Duration::from_millis(1500)),
        )
        .mount(&server)
        .await;
    mount_details(&server, [62]).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();
    let state_path = config.state_path();

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel_tx.send(true).unwrap();
        cancel_tx
    });

    let summary = Coordinator::new(config.clone(), "hash".to_string(), false)
        .unwrap()
        .with_cancellation(cancel_rx)
        .run()
        .await
        .unwrap();
    let _cancel_tx = canceller.await.unwrap();

    assert_eq!(summary.status, RunStatus::Interrupted);
    assert!(!valid_source_urls(&output).contains(&detail_url(&server.uri(), 61)));

    let pages: Vec<u32> = open_storage(&state_path)
        .unwrap()
        .load_completed_pages(CRAWL_ID)
        .unwrap()
        .into_iter()
        .map(|(_, page)| page)
        .collect();
    assert!(!pages.contains(&1));

    let resumed = Coordinator::new(config, "hash".to_string(), false).unwrap();
    assert!(resumed.is_resuming());
    let summary = resumed.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(
        sorted_source_urls(&output),
        vec![detail_url(&server.uri(), 61), detail_url(&server.uri(), 62)]
    );
}
