//! Adapter for the aqistudy.cn daily air-quality history
//!
//! The hierarchy is flattened onto the generic walk: the single district is
//! the configured city, counties are months and every month has exactly one
//! page holding a table with one row per day. Rows are complete records, so
//! no detail page is fetched.

use crate::config::CrawlConfig;
use crate::crawler::parser::{element_text, parse_document, selector};
use crate::site::{FieldValue, PageCount, PartialRecord, Record, Region, SiteAdapter};
use crate::{ConfigError, ExtractError, HarvestError, WalkError};
use chrono::{Datelike, Local, NaiveDate};
use url::Url;

pub const SITE_NAME: &str = "aqi";

pub const CATEGORIES: &[&str] = &["daily"];

const DEFAULT_ROOT: &str = "https://www.aqistudy.cn/historydata/";
const DAY_DATA_PAGE: &str = "daydata.php";
const MONTH_LINKS: &str = "ul.unstyled li a";

/// Column name used for the day when the table has no header row
const DATE_COLUMN: &str = "date";

/// Aqistudy adapter for one city
#[derive(Debug, Clone)]
pub struct AqiAdapter {
    root: Url,
    city: String,
    months: Option<(NaiveDate, NaiveDate)>,
}

impl AqiAdapter {
    /// Builds the adapter from the `[crawl]` section
    ///
    /// When `start-month` is set the months are generated locally; a missing
    /// `stop-month` means the current month and a reversed range is swapped.
    pub fn from_config(crawl: &CrawlConfig) -> Result<Self, HarvestError> {
        let root = crawl.base_url.as_deref().unwrap_or(DEFAULT_ROOT);
        let mut root = Url::parse(root)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid site root '{}': {}", root, e)))?;
        if !root.path().ends_with('/') {
            let path = format!("{}/", root.path());
            root.set_path(&path);
        }

        let months = match &crawl.start_month {
            Some(start) => {
                let start = parse_month(start)?;
                let stop = match &crawl.stop_month {
                    Some(stop) => parse_month(stop)?,
                    None => first_of_month(Local::now().date_naive()),
                };
                Some(if stop < start { (stop, start) } else { (start, stop) })
            }
            None => None,
        };

        Ok(Self {
            root,
            city: crawl.city.clone(),
            months,
        })
    }

    fn day_data_url(&self, month: Option<&str>) -> String {
        let mut url = match self.root.join(DAY_DATA_PAGE) {
            Ok(url) => url,
            Err(_) => self.root.clone(),
        };
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("city", &self.city);
            if let Some(month) = month {
                query.append_pair("month", month);
            }
        }
        url.to_string()
    }

    fn month_region(&self, month: &str) -> Region {
        Region::new(month, self.day_data_url(Some(month)))
    }
}

fn parse_month(month: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(&format!("{}01", month), "%Y%m%d")
        .map_err(|_| {
            ConfigError::Validation(format!("month '{}' must have the form YYYYMM", month))
        })
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// All months from `start` to `stop` inclusive as `YYYYMM`
fn month_range(start: NaiveDate, stop: NaiveDate) -> Vec<String> {
    let mut months = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());

    while (year, month) <= (stop.year(), stop.month()) {
        months.push(format!("{:04}{:02}", year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    months
}

/// `"2014年09月"` → `"201409"`
fn month_from_label(label: &str) -> Option<String> {
    let digits: String = label.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 6 {
        Some(digits)
    } else {
        None
    }
}

fn cell_value(text: String) -> FieldValue {
    if text.is_empty() {
        return FieldValue::Null;
    }
    match text.parse::<f64>() {
        Ok(n) if n.is_finite() => FieldValue::Number(n),
        _ => FieldValue::Text(text),
    }
}

impl SiteAdapter for AqiAdapter {
    fn name(&self) -> &str {
        SITE_NAME
    }

    fn entry_url(&self) -> String {
        self.day_data_url(None)
    }

    fn parse_districts(&self, _markup: &str) -> Result<Vec<Region>, WalkError> {
        Ok(vec![Region::new(self.city.as_str(), self.entry_url())])
    }

    fn parse_counties(&self, _district: &Region, markup: &str) -> Result<Vec<Region>, WalkError> {
        if let Some((start, stop)) = self.months {
            return Ok(month_range(start, stop)
                .iter()
                .map(|month| self.month_region(month))
                .collect());
        }

        let document = parse_document(markup)?;
        let links = selector(MONTH_LINKS)?;

        let mut months: Vec<String> = document
            .select(&links)
            .filter_map(|a| month_from_label(&element_text(&a)))
            .collect();
        months.sort();
        months.dedup();

        Ok(months.iter().map(|month| self.month_region(month)).collect())
    }

    fn parse_page_count(&self, markup: &str) -> PageCount {
        let Ok(document) = parse_document(markup) else {
            return PageCount::Unknown;
        };
        let Ok(cells) = selector("table tr td") else {
            return PageCount::Unknown;
        };

        if document.select(&cells).next().is_some() {
            PageCount::Known(1)
        } else {
            PageCount::Unknown
        }
    }

    fn page_url(&self, county: &Region, _page: u32) -> String {
        county.locator.clone()
    }

    fn extract_listing(
        &self,
        page_url: &str,
        markup: &str,
    ) -> Result<Vec<PartialRecord>, ExtractError> {
        let document = parse_document(markup)?;
        let table_sel = selector("table")?;
        let row_sel = selector("tr")?;
        let header_sel = selector("th")?;
        let cell_sel = selector("td")?;

        let table = document
            .select(&table_sel)
            .next()
            .ok_or_else(|| {
                ExtractError::MalformedMarkup(format!("no data table at {}", page_url))
            })?;

        let mut columns: Vec<String> = Vec::new();
        let mut records = Vec::new();

        for row in table.select(&row_sel) {
            let headers: Vec<String> =
                row.select(&header_sel).map(|th| element_text(&th)).collect();
            if !headers.is_empty() {
                columns = headers;
                continue;
            }

            let cells: Vec<String> = row.select(&cell_sel).map(|td| element_text(&td)).collect();
            let Some(date) = cells.first().filter(|d| !d.is_empty()) else {
                tracing::debug!(page = page_url, "Skipping table row without a date");
                continue;
            };

            let mut record = PartialRecord::new(format!("{}#{}", page_url, date), None);
            record.tag("city", self.city.as_str());
            for (i, text) in cells.iter().enumerate() {
                let column = match columns.get(i) {
                    Some(name) if !name.is_empty() => name.clone(),
                    _ if i == 0 => DATE_COLUMN.to_string(),
                    _ => format!("col_{}", i),
                };
                let value = if i == 0 {
                    FieldValue::Text(text.clone())
                } else {
                    cell_value(text.clone())
                };
                record.tag(&column, value);
            }
            records.push(record);
        }

        Ok(records)
    }

    fn extract_detail(
        &self,
        _markup: &str,
        partial: PartialRecord,
    ) -> Result<Record, ExtractError> {
        Ok(partial.into_record())
    }
}
