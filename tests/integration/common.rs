//! Mock listing site shared by the integration tests

#![allow(dead_code)]

use listing_harvester::config::{
    Backoff, Config, CrawlConfig, FetcherConfig, OutputConfig, PacingConfig,
};
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A county and the house ids listed on each of its pages
pub struct CountyFixture {
    pub slug: &'static str,
    pub name: &'static str,
    pub pages: Vec<Vec<u32>>,
}

pub struct DistrictFixture {
    pub slug: &'static str,
    pub name: &'static str,
    pub counties: Vec<CountyFixture>,
}

pub fn county(slug: &'static str, name: &'static str, pages: Vec<Vec<u32>>) -> CountyFixture {
    CountyFixture { slug, name, pages }
}

pub fn district(
    slug: &'static str,
    name: &'static str,
    counties: Vec<CountyFixture>,
) -> DistrictFixture {
    DistrictFixture {
        slug,
        name,
        counties,
    }
}

/// Creates a closed-transaction crawl configuration against `base_url`
pub fn create_test_config(base_url: &str, dir: &Path) -> Config {
    Config {
        crawl: CrawlConfig {
            site: "lianjia".to_string(),
            city: "bj".to_string(),
            category: "chengjiao".to_string(),
            city_name: Some("北京".to_string()),
            base_url: Some(base_url.to_string()),
            start_page: 1,
            stop_page: None,
            districts: vec![],
            counties: vec![],
            start_month: None,
            stop_month: None,
        },
        fetcher: FetcherConfig {
            max_retries: 2,
            retry_delay: 5,
            max_retry_delay: 20,
            backoff: Backoff::Fixed,
            timeout: 5000,
            user_agents: vec!["HarvestTest/1.0".to_string()],
        },
        pacing: PacingConfig {
            delay: 1,
            burst: 1,
            workers: 2,
            page_timeout: 10_000,
        },
        output: OutputConfig {
            directory: dir.join("data").to_string_lossy().into_owned(),
            state_path: None,
            summary_path: None,
        },
    }
}

fn filter_bar(districts: &[DistrictFixture], counties: &[CountyFixture]) -> String {
    let district_links: String = districts
        .iter()
        .map(|d| format!(r#"<a href="/chengjiao/{}/">{}</a>"#, d.slug, d.name))
        .collect();
    let county_links: String = counties
        .iter()
        .map(|c| format!(r#"<a href="/chengjiao/{}/">{}</a>"#, c.slug, c.name))
        .collect();

    format!(
        r#"<html><body><div class="position"><div data-role="ershoufang">
        <div>{}</div><div>{}</div>
        </div></div></body></html>"#,
        district_links, county_links
    )
}

pub fn pager_page(total: usize) -> String {
    format!(
        r#"<html><body><div class="page-box house-lst-page-box" page-data='{{"totalPage":{},"curPage":1}}'></div></body></html>"#,
        total
    )
}

pub fn listing_page(ids: &[u32]) -> String {
    let items: String = ids
        .iter()
        .map(|id| {
            format!(
                r#"<li><div class="info"><div class="title"><a href="/chengjiao/{id}.html">小区{id} 2室1厅 60平米</a></div></div></li>"#,
                id = id
            )
        })
        .collect();
    format!(
        r#"<html><body><ul class="listContent">{}</ul></body></html>"#,
        items
    )
}

pub fn detail_page(id: u32) -> String {
    format!(
        r#"<html><body>
        <div class="house-title" data-lj_action_housedel_id="{id}">
          <div class="wrapper">小区{id} 2室1厅 <span>2020.07.01 成交</span></div>
        </div>
        <div class="price"><span class="dealTotalPrice"><i>{price}</i>万</span><b>85950</b>元/平</div>
        <div class="base"><div class="content"><ul>
          <li><span class="label">房屋户型</span>2室1厅1厨1卫</li>
          <li><span class="label">建筑面积</span>60.5㎡</li>
        </ul></div></div>
        <script>resblockPosition:'116.41,39.97'</script>
        </body></html>"#,
        id = id,
        price = 300 + id
    )
}

pub fn detail_url(base_url: &str, id: u32) -> String {
    format!("{}/chengjiao/{}.html", base_url, id)
}

pub async fn mount_html(server: &MockServer, route: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(body)
                .insert_header("content-type", "text/html; charset=utf-8"),
        )
        .mount(server)
        .await;
}

/// Mounts the region pages, pagers and listing pages of a site
///
/// Detail pages are mounted separately so tests can make some of them fail.
pub async fn mount_site(server: &MockServer, districts: &[DistrictFixture]) {
    mount_html(server, "/chengjiao/", filter_bar(districts, &[])).await;

    for d in districts {
        mount_html(
            server,
            &format!("/chengjiao/{}/", d.slug),
            filter_bar(districts, &d.counties),
        )
        .await;

        for c in &d.counties {
            mount_html(server, &format!("/chengjiao/{}/", c.slug), pager_page(c.pages.len())).await;
            for (index, ids) in c.pages.iter().enumerate() {
                mount_html(
                    server,
                    &format!("/chengjiao/{}/pg{}/", c.slug, index + 1),
                    listing_page(ids),
                )
                .await;
            }
        }
    }
}

pub async fn mount_details(server: &MockServer, ids: impl IntoIterator<Item = u32>) {
    for id in ids {
        mount_html(server, &format!("/chengjiao/{}.html", id), detail_page(id)).await;
    }
}

/// Reads every line of the output file as a JSON object
pub fn read_lines(path: &Path) -> Vec<serde_json::Value> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).expect("output line is valid JSON"))
        .collect()
}

/// `sourceUrl` of every output line, sorted
pub fn sorted_source_urls(path: &Path) -> Vec<String> {
    let mut urls: Vec<String> = read_lines(path)
        .iter()
        .map(|v| v["sourceUrl"].as_str().expect("sourceUrl").to_string())
        .collect();
    urls.sort();
    urls
}
