//! Adapter for lianjia.com real-estate listings
//!
//! The site is organized as `/{category}/` → district filter → county
//! filter → `pg{n}/` result pages. Districts and counties come from the two
//! rows of the region filter bar; the page count from the `page-data`
//! attribute of the pager.

use crate::config::CrawlConfig;
use crate::crawler::parser::{
    complete_record, element_text, extract_position, parse_document, resolve_link, selector,
    FieldSpec, Locator,
};
use crate::site::{FieldValue, PageCount, PartialRecord, Record, Region, SiteAdapter};
use crate::{ConfigError, ExtractError, HarvestError, WalkError};
use scraper::Html;
use serde::Deserialize;
use url::Url;

pub const SITE_NAME: &str = "lianjia";

pub const CATEGORIES: &[&str] = &["chengjiao", "xiaoqu", "ershoufang"];

const DISTRICT_LINKS: &str = "div[data-role='ershoufang'] > div:nth-child(1) > a";
const COUNTY_LINKS: &str = "div[data-role='ershoufang'] > div:nth-child(2) > a";
const PAGER: &str = "div.page-box[page-data]";
const LISTING_LINKS: &str = "ul.listContent > li .title > a, ul.sellListContent > li .title > a";

const BASE_ITEM: &str = ".base .content li";
const TRANSACTION_ITEM: &str = ".transaction .content li";
const ITEM_LABEL: &str = ".label";

const fn base(label: &'static str) -> Locator {
    Locator::Labeled {
        item: BASE_ITEM,
        label_selector: ITEM_LABEL,
        label,
        value: None,
    }
}

const fn transaction(label: &'static str) -> Locator {
    Locator::Labeled {
        item: TRANSACTION_ITEM,
        label_selector: ITEM_LABEL,
        label,
        value: None,
    }
}

const fn xiaoqu_info(label: &'static str) -> Locator {
    Locator::Labeled {
        item: ".xiaoquInfoItem",
        label_selector: ".xiaoquInfoLabel",
        label,
        value: Some(".xiaoquInfoContent"),
    }
}

/// Closed transactions
const CHENGJIAO_FIELDS: &[FieldSpec] = &[
    FieldSpec::text(
        "house_code",
        Locator::Attr {
            selector: "div.house-title",
            attr: "data-lj_action_housedel_id",
        },
    )
    .required(),
    FieldSpec::text("deal_date", Locator::Css(".house-title .wrapper span")),
    FieldSpec::number("deal_price", Locator::Css(".dealTotalPrice i")),
    FieldSpec::number("unit_price", Locator::Css(".price b")),
    FieldSpec::number("listing_price", Locator::Css(".msg > span:nth-child(1) label")),
    FieldSpec::number("deal_cycle", Locator::Css(".msg > span:nth-child(2) label")),
    FieldSpec::number("price_adjustments", Locator::Css(".msg > span:nth-child(3) label")),
    FieldSpec::number("viewings", Locator::Css(".msg > span:nth-child(4) label")),
    FieldSpec::number("followers", Locator::Css(".msg > span:nth-child(5) label")),
    FieldSpec::number("page_views", Locator::Css(".msg > span:nth-child(6) label")),
    FieldSpec::text("layout", base("房屋户型")),
    FieldSpec::text("floor", base("所在楼层")),
    FieldSpec::number("area", base("建筑面积")),
    FieldSpec::text("orientation", base("房屋朝向")),
    FieldSpec::text("decoration", base("装修情况")),
    FieldSpec::text("elevator", base("配备电梯")),
    FieldSpec::text("building_type", base("建筑类型")),
    FieldSpec::number("building_age", base("建成年代")),
    FieldSpec::text("structure", base("建筑结构")),
    FieldSpec::text("elevator_ratio", base("梯户比例")),
    FieldSpec::text("heating", base("供暖方式")),
    FieldSpec::text("listed_at", transaction("挂牌时间")),
    FieldSpec::text("ownership", transaction("交易权属")),
    FieldSpec::text("usage", transaction("房屋用途")),
    FieldSpec::text("property_right", transaction("房权所属")),
    FieldSpec::number("community_avg_price", Locator::Css(".chengjiao_xiaoqu .price")),
];

/// Second-hand listings
const ERSHOUFANG_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("house_code", Locator::Css(".houseRecord .info")).required(),
    FieldSpec::number("total_price", Locator::Css(".price .total")),
    FieldSpec::number("unit_price", Locator::Css(".unitPriceValue")),
    FieldSpec::text("community", Locator::Css(".communityName a.info")),
    FieldSpec::text("layout", base("房屋户型")),
    FieldSpec::text("floor", base("所在楼层")),
    FieldSpec::number("area", base("建筑面积")),
    FieldSpec::text("orientation", base("房屋朝向")),
    FieldSpec::text("decoration", base("装修情况")),
    FieldSpec::text("elevator", base("配备电梯")),
    FieldSpec::text("building_type", base("建筑类型")),
    FieldSpec::text("structure", base("建筑结构")),
    FieldSpec::text("elevator_ratio", base("梯户比例")),
    FieldSpec::text("heating", base("供暖方式")),
    FieldSpec::text("listed_at", transaction("挂牌时间")),
    FieldSpec::text("ownership", transaction("交易权属")),
    FieldSpec::text("last_traded", transaction("上次交易")),
    FieldSpec::text("usage", transaction("房屋用途")),
    FieldSpec::text("holding_period", transaction("房屋年限")),
    FieldSpec::text("property_right", transaction("产权所属")),
];

/// Residential neighborhoods
const XIAOQU_FIELDS: &[FieldSpec] = &[
    FieldSpec::text("name", Locator::Css("h1.detailTitle")).required(),
    FieldSpec::text("address", Locator::Css(".detailDesc")),
    FieldSpec::number("unit_price", Locator::Css(".xiaoquUnitPrice")),
    FieldSpec::number("building_age", xiaoqu_info("建筑年代")),
    FieldSpec::text("building_types", xiaoqu_info("建筑类型")),
    FieldSpec::text("property_cost", xiaoqu_info("物业费用")),
    FieldSpec::text("property_company", xiaoqu_info("物业公司")),
    FieldSpec::text("property_developers", xiaoqu_info("开发商")),
    FieldSpec::number("num_building", xiaoqu_info("楼栋总数")),
    FieldSpec::number("num_house", xiaoqu_info("房屋总数")),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Chengjiao,
    Xiaoqu,
    Ershoufang,
}

impl Category {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "chengjiao" => Some(Self::Chengjiao),
            "xiaoqu" => Some(Self::Xiaoqu),
            "ershoufang" => Some(Self::Ershoufang),
            _ => None,
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Self::Chengjiao => "chengjiao",
            Self::Xiaoqu => "xiaoqu",
            Self::Ershoufang => "ershoufang",
        }
    }

    fn fields(&self) -> &'static [FieldSpec] {
        match self {
            Self::Chengjiao => CHENGJIAO_FIELDS,
            Self::Xiaoqu => XIAOQU_FIELDS,
            Self::Ershoufang => ERSHOUFANG_FIELDS,
        }
    }
}

/// Pager attribute, e.g. `{"totalPage":30,"curPage":1}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageData {
    total_page: u32,
}

/// Lianjia site adapter for one city and category
#[derive(Debug, Clone)]
pub struct LianjiaAdapter {
    root: Url,
    category: Category,
    city_label: String,
}

impl LianjiaAdapter {
    /// Builds the adapter from the `[crawl]` section
    ///
    /// The site root defaults to `https://{city}.lianjia.com`.
    pub fn from_config(crawl: &CrawlConfig) -> Result<Self, HarvestError> {
        let category = Category::parse(&crawl.category).ok_or_else(|| {
            ConfigError::Validation(format!(
                "category '{}' is not supported by site '{}'",
                crawl.category, SITE_NAME
            ))
        })?;

        let root = match &crawl.base_url {
            Some(base) => base.clone(),
            None => format!("https://{}.lianjia.com", crawl.city),
        };
        let root = Url::parse(&root)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid site root '{}': {}", root, e)))?;

        Ok(Self {
            root,
            category,
            city_label: crawl.city_name.clone().unwrap_or_else(|| crawl.city.clone()),
        })
    }

    fn parse_markup(&self, markup: &str) -> Result<Html, WalkError> {
        Ok(parse_document(markup)?)
    }

    fn region_links(&self, document: &Html, css: &str) -> Result<Vec<Region>, WalkError> {
        let links = selector(css)?;
        let mut regions: Vec<Region> = Vec::new();

        for anchor in document.select(&links) {
            let name = element_text(&anchor);
            let Some(locator) = anchor
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, &self.root))
            else {
                continue;
            };
            if name.is_empty() || regions.iter().any(|r| r.locator == locator) {
                continue;
            }
            regions.push(Region::new(name, locator));
        }

        Ok(regions)
    }
}

impl SiteAdapter for LianjiaAdapter {
    fn name(&self) -> &str {
        SITE_NAME
    }

    fn entry_url(&self) -> String {
        self.root
            .join(&format!("/{}/", self.category.path()))
            .map(|u| u.to_string())
            .unwrap_or_else(|_| {
                let root = self.root.as_str().trim_end_matches('/');
                format!("{}/{}/", root, self.category.path())
            })
    }

    fn parse_districts(&self, markup: &str) -> Result<Vec<Region>, WalkError> {
        let document = self.parse_markup(markup)?;
        let districts = self.region_links(&document, DISTRICT_LINKS)?;

        if districts.is_empty() {
            return Err(WalkError::NoDistricts {
                url: self.entry_url(),
            });
        }
        Ok(districts)
    }

    fn parse_counties(&self, _district: &Region, markup: &str) -> Result<Vec<Region>, WalkError> {
        let document = self.parse_markup(markup)?;
        self.region_links(&document, COUNTY_LINKS)
    }

    fn parse_page_count(&self, markup: &str) -> PageCount {
        let Ok(document) = parse_document(markup) else {
            return PageCount::Unknown;
        };
        let Ok(pager) = selector(PAGER) else {
            return PageCount::Unknown;
        };

        document
            .select(&pager)
            .next()
            .and_then(|el| el.value().attr("page-data"))
            .and_then(|raw| serde_json::from_str::<PageData>(raw).ok())
            .map(|data| PageCount::Known(data.total_page))
            .unwrap_or(PageCount::Unknown)
    }

    fn page_url(&self, county: &Region, page: u32) -> String {
        let locator = county.locator.trim_end_matches('/');
        format!("{}/pg{}/", locator, page)
    }

    fn extract_listing(
        &self,
        page_url: &str,
        markup: &str,
    ) -> Result<Vec<PartialRecord>, ExtractError> {
        let document = parse_document(markup)?;
        let links = selector(LISTING_LINKS)?;
        let base = Url::parse(page_url).unwrap_or_else(|_| self.root.clone());

        let mut stubs = Vec::new();
        for anchor in document.select(&links) {
            let Some(url) = anchor
                .value()
                .attr("href")
                .and_then(|href| resolve_link(href, &base))
            else {
                tracing::debug!(page = page_url, "Skipping listing without a usable link");
                continue;
            };
            let title = element_text(&anchor);

            let mut stub = PartialRecord::new(url.clone(), Some(url));
            stub.tag("city", self.city_label.as_str());
            match self.category {
                Category::Xiaoqu => stub.tag("name", title),
                Category::Chengjiao | Category::Ershoufang => {
                    let block_name = title.split_whitespace().next().map(str::to_string);
                    stub.tag("title", title.as_str());
                    stub.tag("block_name", block_name);
                }
            }
            stubs.push(stub);
        }

        Ok(stubs)
    }

    fn extract_detail(&self, markup: &str, partial: PartialRecord) -> Result<Record, ExtractError> {
        let document = parse_document(markup)?;
        let record = complete_record(&document, partial, self.category.fields())?;

        let (lng, lat) = match extract_position(&document) {
            Some((lng, lat)) => (FieldValue::Number(lng), FieldValue::Number(lat)),
            None => {
                tracing::debug!(url = record.source_url(), "No geo position on detail page");
                (FieldValue::Null, FieldValue::Null)
            }
        };

        Ok(record.with_field("lng", lng).with_field("lat", lat))
    }
}
