//! Integration tests for the crawler
//!
//! These tests use wiremock to serve a small listing site and run the full
//! walk → fetch → extract → sink cycle end-to-end.

mod common;

use async_trait::async_trait;
use common::*;
use listing_harvester::config::{Backoff, FetcherConfig};
use listing_harvester::crawler::{Coordinator, Fetcher, Walker};
use listing_harvester::storage::{open_storage, FailureScope, RunStatus, Storage};
use listing_harvester::{DriverPhase, FetchError, PageCount, Region, WalkError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn two_county_site() -> Vec<DistrictFixture> {
    vec![district(
        "dongcheng",
        "东城",
        vec![
            county("andingmen", "安定门", vec![vec![1, 2, 3], vec![4, 5]]),
            // 3 is listed in both counties
            county("anzhen", "安贞", vec![vec![6, 3, 7]]),
        ],
    )]
}

#[tokio::test]
async fn test_full_crawl_writes_each_listing_once() {
    let server = MockServer::start().await;
    mount_site(&server, &two_county_site()).await;
    mount_details(&server, 1..=7).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();

    let coordinator = Coordinator::new(config, "hash-1".to_string(), false).unwrap();
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(coordinator.phase(), DriverPhase::Done);
    assert_eq!(summary.pages_fetched, 3);
    assert_eq!(summary.pages_failed, 0);
    assert_eq!(summary.records_written, 7);
    assert_eq!(summary.records_skipped_seen, 1);
    assert_eq!(summary.records_failed, 0);

    let urls = sorted_source_urls(&output);
    let expected: Vec<String> = {
        let mut v: Vec<String> = (1..=7).map(|id| detail_url(&server.uri(), id)).collect();
        v.sort();
        v
    };
    assert_eq!(urls, expected);

    let lines = read_lines(&output);
    let first = lines
        .iter()
        .find(|v| v["sourceUrl"] == detail_url(&server.uri(), 1).as_str())
        .unwrap();
    assert_eq!(first["house_code"], "1");
    assert_eq!(first["deal_price"], 301.0);
    assert_eq!(first["district"], "东城");
    assert_eq!(first["county"], "安定门");
    assert_eq!(first["city"], "北京");
    assert_eq!(first["lng"], 116.41);
    assert!(first["heating"].is_null());
}

#[tokio::test]
async fn test_written_records_round_trip() {
    let server = MockServer::start().await;
    mount_site(
        &server,
        &[district("xicheng", "西城", vec![county("deshengmen", "德胜门", vec![vec![11, 12]])])],
    )
    .await;
    mount_details(&server, [11, 12]).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();
    Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    let (records, skipped) = listing_harvester::storage::read_records(&output).unwrap();
    assert_eq!(skipped, 0);
    assert_eq!(records.len(), 2);

    for (record, line) in records.iter().zip(std::fs::read_to_string(&output).unwrap().lines()) {
        assert_eq!(serde_json::to_string(record).unwrap(), line);
        assert!(line.starts_with("{\"sourceUrl\":"));
    }
}

#[tokio::test]
async fn test_rerun_after_completed_crawl_picks_up_new_listings() {
    let server = MockServer::start().await;
    mount_site(&server, &two_county_site()).await;
    mount_details(&server, 1..=7).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();

    Coordinator::new(config.clone(), "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    // Listing 8 appears on the second county's page after the first crawl
    server.reset().await;
    let site = vec![district(
        "dongcheng",
        "东城",
        vec![
            county("andingmen", "安定门", vec![vec![1, 2, 3], vec![4, 5]]),
            county("anzhen", "安贞", vec![vec![8, 6, 3, 7]]),
        ],
    )];
    mount_site(&server, &site).await;
    mount_details(&server, 1..=8).await;

    let second = Coordinator::new(config, "hash".to_string(), false).unwrap();
    assert!(!second.is_resuming());
    let summary = second.run().await.unwrap();

    assert_eq!(summary.pages_resumed, 0);
    assert_eq!(summary.pages_fetched, 3);
    assert_eq!(summary.records_written, 1);
    assert_eq!(summary.records_skipped_seen, 8);

    let urls = sorted_source_urls(&output);
    assert_eq!(urls.len(), 8);
    assert!(urls.contains(&detail_url(&server.uri(), 8)));
}

#[tokio::test]
async fn test_failed_page_is_skipped_without_checkpoint() {
    let server = MockServer::start().await;
    let site = vec![district(
        "chaoyang",
        "朝阳",
        vec![county("wangjing", "望京", vec![vec![21], vec![22], vec![23]])],
    )];

    // Mounted first so it wins over the listing page mounted by mount_site
    Mock::given(method("GET"))
        .and(path("/chengjiao/wangjing/pg2/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    mount_site(&server, &site).await;
    mount_details(&server, [21, 22, 23]).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let state_path = config.state_path();
    let output = config.output_path();

    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(summary.pages_failed, 1);
    assert_eq!(
        sorted_source_urls(&output),
        vec![detail_url(&server.uri(), 21), detail_url(&server.uri(), 23)]
    );

    let store = open_storage(&state_path).unwrap();
    let crawl_id = "lianjia:bj:chengjiao";
    let pages: HashSet<u32> = store
        .load_completed_pages(crawl_id)
        .unwrap()
        .into_iter()
        .map(|(_, page)| page)
        .collect();
    assert_eq!(pages, HashSet::from([1, 3]));

    let failures = store.get_failures(summary.run_id).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].scope, FailureScope::Page);
    assert!(failures[0].url.ends_with("/chengjiao/wangjing/pg2/"));
}

#[tokio::test]
async fn test_pacing_waits_do_not_stall_pages() {
    let server = MockServer::start().await;
    let site = vec![district(
        "haidian",
        "海淀",
        vec![county("shangdi", "上地", vec![vec![31, 32, 33, 34, 35], vec![36, 37, 38, 39, 40]])],
    )];
    mount_site(&server, &site).await;
    mount_details(&server, 31..=40).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server.uri(), dir.path());
    config.fetcher.timeout = 1500;
    config.pacing.workers = 2;
    config.pacing.delay = 200;
    config.pacing.page_timeout = 1500;
    let output = config.output_path();

    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    // Each page spends over two seconds waiting on the shared limiter
    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.pages_requeued, 0);
    assert_eq!(summary.pages_failed, 0);
    assert_eq!(summary.records_written, 10);
    assert_eq!(sorted_source_urls(&output).len(), 10);
}

#[tokio::test]
async fn test_stalled_page_is_requeued_once_then_failed() {
    let server = MockServer::start().await;
    let site = vec![district(
        "xicheng",
        "西城",
        vec![county("deshengmen", "德胜门", vec![vec![91], vec![92]])],
    )];

    // Two slow requests in a row push page 1 past its busy limit on every attempt
    Mock::given(method("GET"))
        .and(path("/chengjiao/deshengmen/pg1/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(listing_page(&[91]))
                .set_delay(Duration::from_millis(700)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/chengjiao/91.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_page(91))
                .set_delay(Duration::from_millis(700)),
        )
        .mount(&server)
        .await;
    mount_site(&server, &site).await;
    mount_details(&server, [92]).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server.uri(), dir.path());
    config.fetcher.timeout = 1000;
    config.pacing.page_timeout = 1000;
    let state_path = config.state_path();
    let output = config.output_path();

    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.pages_requeued, 1);
    assert_eq!(summary.pages_failed, 1);
    assert_eq!(summary.records_written, 1);
    assert_eq!(sorted_source_urls(&output), vec![detail_url(&server.uri(), 92)]);

    let store = open_storage(&state_path).unwrap();
    let pages: HashSet<u32> = store
        .load_completed_pages("lianjia:bj:chengjiao")
        .unwrap()
        .into_iter()
        .map(|(_, page)| page)
        .collect();
    assert_eq!(pages, HashSet::from([2]));

    let failures = store.get_failures(summary.run_id).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].scope, FailureScope::Page);
    assert!(failures[0].url.ends_with("/chengjiao/deshengmen/pg1/"));
}

#[tokio::test]
async fn test_failed_detail_skips_only_that_record() {
    let server = MockServer::start().await;
    mount_site(
        &server,
        &[district("haidian", "海淀", vec![county("wudaokou", "五道口", vec![vec![31, 32, 33]])])],
    )
    .await;
    mount_details(&server, [31, 33]).await;
    Mock::given(method("GET"))
        .and(path("/chengjiao/32.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let output = config.output_path();

    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.records_written, 2);
    assert_eq!(summary.records_failed, 1);
    assert_eq!(read_lines(&output).len(), 2);
}

#[tokio::test]
async fn test_no_districts_ends_run_cleanly() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/chengjiao/",
        "<html><body><p>系统维护中</p></body></html>".to_string(),
    )
    .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());

    let coordinator = Coordinator::new(config, "hash".to_string(), false).unwrap();
    let summary = coordinator.run().await.unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.records_written, 0);
    assert_eq!(coordinator.phase(), DriverPhase::Done);
}

#[tokio::test]
async fn test_stop_page_limits_pagination() {
    let server = MockServer::start().await;
    mount_site(
        &server,
        &[district(
            "fengtai",
            "丰台",
            vec![county("kandan", "看丹", vec![vec![41], vec![42], vec![43]])],
        )],
    )
    .await;
    mount_details(&server, [41, 42, 43]).await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&server.uri(), dir.path());
    config.crawl.start_page = 2;
    config.crawl.stop_page = Some(2);
    let output = config.output_path();

    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.pages_fetched, 1);
    assert_eq!(sorted_source_urls(&output), vec![detail_url(&server.uri(), 42)]);
}

/// Walker with fixed regions; county "b" has no page-count indicator
struct StubWalker {
    base: String,
}

impl StubWalker {
    fn county(&self, slug: &str) -> Region {
        Region::new(slug, format!("{}/chengjiao/{}/", self.base, slug))
    }
}

#[async_trait]
impl Walker for StubWalker {
    async fn list_districts(&self) -> Result<Vec<Region>, WalkError> {
        Ok(vec![Region::new("stub", format!("{}/chengjiao/stub/", self.base))])
    }

    async fn list_counties(&self, _district: &Region) -> Result<Vec<Region>, WalkError> {
        Ok(vec![self.county("a"), self.county("b"), self.county("c")])
    }

    async fn page_count(&self, county: &Region) -> Result<PageCount, WalkError> {
        Ok(match county.name.as_str() {
            "b" => PageCount::Unknown,
            _ => PageCount::Known(1),
        })
    }
}

#[tokio::test]
async fn test_unknown_page_count_skips_county() {
    let server = MockServer::start().await;
    mount_html(&server, "/chengjiao/a/pg1/", listing_page(&[51, 52])).await;
    mount_html(&server, "/chengjiao/c/pg1/", listing_page(&[53])).await;
    Mock::given(method("GET"))
        .and(path("/chengjiao/b/pg1/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&[99])))
        .expect(0)
        .mount(&server)
        .await;
    mount_details(&server, [51, 52, 53]).await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), dir.path());
    let state_path = config.state_path();
    let output = config.output_path();

    let walker = Arc::new(StubWalker { base: server.uri() });
    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .with_walker(walker)
        .run()
        .await
        .unwrap();

    assert_eq!(summary.counties_skipped, 1);
    assert_eq!(summary.pages_fetched, 2);
    assert_eq!(
        sorted_source_urls(&output),
        vec![
            detail_url(&server.uri(), 51),
            detail_url(&server.uri(), 52),
            detail_url(&server.uri(), 53),
        ]
    );

    let store = open_storage(&state_path).unwrap();
    let failures = store.get_failures(summary.run_id).unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].scope, FailureScope::County);
}

#[tokio::test]
async fn test_fetcher_exhausted_after_exact_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/always-down"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let fetcher = Fetcher::new(&FetcherConfig {
        max_retries: 3,
        retry_delay: 5,
        max_retry_delay: 50,
        backoff: Backoff::Exponential,
        timeout: 2000,
        user_agents: vec![],
    })
    .unwrap();

    let err = fetcher
        .fetch(&format!("{}/always-down", server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }), "{:?}", err);
    server.verify().await;
}

#[tokio::test]
async fn test_aqi_month_tables() {
    let server = MockServer::start().await;
    let table = |month: &str| {
        format!(
            r#"<html><body><table>
            <tr><th>日期</th><th>AQI</th><th>质量等级</th><th>PM2.5</th></tr>
            <tr><td>{m}-01</td><td>76</td><td>良</td><td>52</td></tr>
            <tr><td>{m}-02</td><td>143</td><td>轻度污染</td><td></td></tr>
            </table></body></html>"#,
            m = month
        )
    };
    for month in ["201401", "201402"] {
        Mock::given(method("GET"))
            .and(path("/historydata/daydata.php"))
            .and(query_param("month", month))
            .respond_with(ResponseTemplate::new(200).set_body_string(table(month)))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/historydata/daydata.php"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html><body><p>月份</p></body></html>"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = create_test_config(&format!("{}/historydata/", server.uri()), dir.path());
    config.crawl.site = "aqi".to_string();
    config.crawl.city = "beijing".to_string();
    config.crawl.category = "daily".to_string();
    config.crawl.start_month = Some("201401".to_string());
    config.crawl.stop_month = Some("201402".to_string());
    let output = config.output_path();

    let summary = Coordinator::new(config, "hash".to_string(), false)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(summary.records_written, 4);
    let lines = read_lines(&output);
    assert_eq!(lines.len(), 4);
    assert!(lines
        .iter()
        .all(|v| v["sourceUrl"].as_str().unwrap().contains('#')));
    let missing_pm = lines
        .iter()
        .find(|v| v["sourceUrl"].as_str().unwrap().ends_with("#201401-02"))
        .unwrap();
    assert_eq!(missing_pm["AQI"], 143.0);
    assert!(missing_pm["PM2.5"].is_null());
}
