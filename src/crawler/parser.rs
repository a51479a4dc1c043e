//! Declarative record extraction
//!
//! Records are described by a static table of [`FieldSpec`]s, each naming a
//! field and the locator that finds it in the markup. The extractor applies
//! the table to a parsed document:
//!
//! - a missing optional field becomes `null` and is logged
//! - a missing required field fails the record with
//!   [`ExtractError::MissingRequiredField`]
//! - numeric fields take the first number found in the text
//!
//! Geo positions are read from the page's embedded script block.

use crate::site::{FieldValue, PartialRecord, Record};
use crate::ExtractError;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Script variable holding "lng,lat" on listing detail pages
const POSITION_MARKER: &str = "resblockPosition";

/// Where a field lives in the markup
#[derive(Debug, Clone, Copy)]
pub enum Locator {
    /// Text of the first element matching a CSS selector
    Css(&'static str),

    /// Attribute of the first element matching a CSS selector
    Attr {
        selector: &'static str,
        attr: &'static str,
    },

    /// Item of a label/value list whose label text equals `label`
    ///
    /// The value is the text of `value` inside the item when given,
    /// otherwise the item text with the label removed.
    Labeled {
        item: &'static str,
        label_selector: &'static str,
        label: &'static str,
        value: Option<&'static str>,
    },
}

/// How a located text is turned into a value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
}

/// One row of a field mapping
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub locator: Locator,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn text(name: &'static str, locator: Locator) -> Self {
        Self {
            name,
            locator,
            kind: FieldKind::Text,
            required: false,
        }
    }

    pub const fn number(name: &'static str, locator: Locator) -> Self {
        Self {
            name,
            locator,
            kind: FieldKind::Number,
            required: false,
        }
    }

    /// Marks the field as the record's key; extraction fails without it
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Parses markup into a document, rejecting empty input
pub fn parse_document(markup: &str) -> Result<Html, ExtractError> {
    if markup.trim().is_empty() {
        return Err(ExtractError::MalformedMarkup("empty document".to_string()));
    }

    let document = Html::parse_document(markup);
    let body = selector("body")?;
    let has_content = document
        .select(&body)
        .next()
        .map(|body| {
            body.text().any(|t| !t.trim().is_empty())
                || body.children().any(|c| c.value().is_element())
        })
        .unwrap_or(false);

    if !has_content {
        return Err(ExtractError::MalformedMarkup(
            "document has no body content".to_string(),
        ));
    }

    Ok(document)
}

/// Compiles a CSS selector
pub fn selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css).map_err(|_| ExtractError::InvalidSelector {
        selector: css.to_string(),
    })
}

/// Concatenated text of an element with runs of whitespace collapsed
pub fn element_text(element: &ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Resolves a locator against a document
pub fn locate(document: &Html, locator: &Locator) -> Result<Option<String>, ExtractError> {
    match *locator {
        Locator::Css(css) => {
            let sel = selector(css)?;
            Ok(document
                .select(&sel)
                .next()
                .and_then(|el| non_empty(element_text(&el))))
        }

        Locator::Attr { selector: css, attr } => {
            let sel = selector(css)?;
            Ok(document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr(attr))
                .and_then(|v| non_empty(v.trim().to_string())))
        }

        Locator::Labeled {
            item,
            label_selector,
            label,
            value,
        } => {
            let item_sel = selector(item)?;
            let label_sel = selector(label_selector)?;
            let value_sel = value.map(selector).transpose()?;

            for element in document.select(&item_sel) {
                let Some(label_el) = element.select(&label_sel).next() else {
                    continue;
                };
                let label_text = element_text(&label_el);
                if label_text.trim_end_matches(['：', ':']) != label {
                    continue;
                }

                let text = match &value_sel {
                    Some(value_sel) => element
                        .select(value_sel)
                        .next()
                        .map(|el| element_text(&el))
                        .unwrap_or_default(),
                    None => {
                        let full = element_text(&element);
                        full.strip_prefix(label_text.as_str())
                            .unwrap_or(&full)
                            .trim()
                            .to_string()
                    }
                };
                return Ok(non_empty(text));
            }

            Ok(None)
        }
    }
}

/// Parses the first number in a text, e.g. `"74944元/平米"` → `74944`
pub fn parse_number(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let negative = text[..start].ends_with('-');

    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .filter(|c| *c != ',')
        .collect();

    let value: f64 = digits.trim_end_matches('.').parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Applies a field mapping to a document
///
/// Returns the fields in mapping order, or the first missing required field.
pub fn extract_fields(
    document: &Html,
    specs: &[FieldSpec],
) -> Result<Vec<(String, FieldValue)>, ExtractError> {
    let mut fields = Vec::with_capacity(specs.len());

    for spec in specs {
        let raw = locate(document, &spec.locator)?;

        let value = match (raw, spec.kind) {
            (Some(text), FieldKind::Text) => FieldValue::Text(text),
            (Some(text), FieldKind::Number) => match parse_number(&text) {
                Some(n) => FieldValue::Number(n),
                None => {
                    tracing::debug!(
                        field = spec.name,
                        text = %text,
                        "Field is not numeric, recording null"
                    );
                    FieldValue::Null
                }
            },
            (None, _) => FieldValue::Null,
        };

        if value.is_null() {
            if spec.required {
                return Err(ExtractError::MissingRequiredField {
                    field: spec.name.to_string(),
                });
            }
            tracing::debug!(field = spec.name, "Optional field missing, recording null");
        }

        fields.push((spec.name.to_string(), value));
    }

    Ok(fields)
}

/// Completes a listing stub from its detail page using a field mapping
///
/// Stub fields come first, followed by the mapped fields in mapping order.
pub fn extract_detail(
    markup: &str,
    partial: PartialRecord,
    specs: &[FieldSpec],
) -> Result<Record, ExtractError> {
    let document = parse_document(markup)?;
    complete_record(&document, partial, specs)
}

/// Same as [`extract_detail`] for an already parsed document
pub fn complete_record(
    document: &Html,
    partial: PartialRecord,
    specs: &[FieldSpec],
) -> Result<Record, ExtractError> {
    let fields = extract_fields(document, specs)?;

    let mut record = partial.into_record();
    for (name, value) in fields {
        record = record.with_field(&name, value);
    }
    Ok(record)
}

/// Reads `(longitude, latitude)` from the embedded position script
pub fn extract_position(document: &Html) -> Option<(f64, f64)> {
    let scripts = selector("script").ok()?;

    document.select(&scripts).find_map(|script| {
        let text = script.text().collect::<String>();
        parse_position(&text)
    })
}

fn parse_position(script: &str) -> Option<(f64, f64)> {
    let after_marker = &script[script.find(POSITION_MARKER)? + POSITION_MARKER.len()..];
    let quote_at = after_marker.find(['\'', '"'])?;
    let quote = after_marker[quote_at..].chars().next()?;
    let rest = &after_marker[quote_at + 1..];
    let value = &rest[..rest.find(quote)?];

    let (lng, lat) = value.split_once(',')?;
    Some((lng.trim().parse().ok()?, lat.trim().parse().ok()?))
}

/// Resolves a link href to an absolute http(s) URL
///
/// Returns None for empty hrefs, fragment-only links and
/// `javascript:`/`mailto:`/`tel:`/`data:` schemes.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if absolute_url.scheme() == "http" || absolute_url.scheme() == "https" => {
            Some(absolute_url.to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID_PRICE: &[FieldSpec] = &[
        FieldSpec::text("id", Locator::Css(".id")).required(),
        FieldSpec::text("price", Locator::Css(".price")),
    ];

    fn stub() -> PartialRecord {
        PartialRecord::new(
            "https://example.com/house/1.html",
            Some("https://example.com/house/1.html".to_string()),
        )
    }

    #[test]
    fn test_missing_optional_field_is_null() {
        let html = r#"<html><body><div class="id">A-1</div></body></html>"#;
        let record = extract_detail(html, stub(), ID_PRICE).unwrap();

        assert_eq!(record.get("id"), Some(&FieldValue::from("A-1")));
        assert_eq!(record.get("price"), Some(&FieldValue::Null));
    }

    #[test]
    fn test_missing_required_field_is_error() {
        let html = r#"<html><body><div class="price">500万</div></body></html>"#;
        let err = extract_detail(html, stub(), ID_PRICE).unwrap_err();

        assert!(matches!(
            err,
            ExtractError::MissingRequiredField { ref field } if field == "id"
        ));
    }

    #[test]
    fn test_empty_markup_is_malformed() {
        assert!(matches!(
            extract_detail("   ", stub(), ID_PRICE),
            Err(ExtractError::MalformedMarkup(_))
        ));
        assert!(matches!(
            parse_document("<html><body></body></html>"),
            Err(ExtractError::MalformedMarkup(_))
        ));
    }

    #[test]
    fn test_invalid_selector() {
        const BROKEN: &[FieldSpec] = &[FieldSpec::text("x", Locator::Css("div[["))];
        let html = r#"<html><body><p>x</p></body></html>"#;
        assert!(matches!(
            extract_detail(html, stub(), BROKEN),
            Err(ExtractError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn test_stub_fields_come_first() {
        let mut partial = stub();
        partial.tag("district", "朝阳");
        let html = r#"<html><body><div class="id">A-1</div><div class="price">500</div></body></html>"#;

        let record = extract_detail(html, partial, ID_PRICE).unwrap();
        assert_eq!(
            record.field_names().collect::<Vec<_>>(),
            vec!["district", "id", "price"]
        );
    }

    #[test]
    fn test_number_fields() {
        const SPECS: &[FieldSpec] = &[
            FieldSpec::number("unit_price", Locator::Css(".unit")),
            FieldSpec::number("area", Locator::Css(".area")),
        ];
        let html = r#"<html><body>
            <span class="unit">74944元/平米</span>
            <span class="area">暂无数据</span>
        </body></html>"#;

        let doc = parse_document(html).unwrap();
        let fields = extract_fields(&doc, SPECS).unwrap();

        assert_eq!(fields[0].1, FieldValue::Number(74944.0));
        assert_eq!(fields[1].1, FieldValue::Null);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("89.5㎡"), Some(89.5));
        assert_eq!(parse_number("共12栋"), Some(12.0));
        assert_eq!(parse_number("1,234,000"), Some(1_234_000.0));
        assert_eq!(parse_number("-3 层"), Some(-3.0));
        assert_eq!(parse_number("2000年建"), Some(2000.0));
        assert_eq!(parse_number("暂无"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_attr_locator() {
        let html = r#"<html><body><div class="box" data-id=" 42 "></div></body></html>"#;
        let doc = parse_document(html).unwrap();
        let locator = Locator::Attr {
            selector: "div.box",
            attr: "data-id",
        };
        assert_eq!(locate(&doc, &locator).unwrap(), Some("42".to_string()));
    }

    #[test]
    fn test_labeled_locator_strips_label() {
        let html = r#"<html><body><div class="base"><ul>
            <li><span class="label">房屋户型</span>2室1厅1厨1卫</li>
            <li><span class="label">所在楼层</span> 中楼层(共6层) </li>
            <li><span class="label">配备电梯</span></li>
        </ul></div></body></html>"#;
        let doc = parse_document(html).unwrap();

        let layout = Locator::Labeled {
            item: ".base li",
            label_selector: ".label",
            label: "房屋户型",
            value: None,
        };
        let floor = Locator::Labeled {
            item: ".base li",
            label_selector: ".label",
            label: "所在楼层",
            value: None,
        };
        let elevator = Locator::Labeled {
            item: ".base li",
            label_selector: ".label",
            label: "配备电梯",
            value: None,
        };
        let missing = Locator::Labeled {
            item: ".base li",
            label_selector: ".label",
            label: "供暖方式",
            value: None,
        };

        assert_eq!(locate(&doc, &layout).unwrap().as_deref(), Some("2室1厅1厨1卫"));
        assert_eq!(locate(&doc, &floor).unwrap().as_deref(), Some("中楼层(共6层)"));
        assert_eq!(locate(&doc, &elevator).unwrap(), None);
        assert_eq!(locate(&doc, &missing).unwrap(), None);
    }

    #[test]
    fn test_labeled_locator_with_value_selector() {
        let html = r#"<html><body>
            <div class="item"><span class="k">建筑年代：</span><span class="v">2004年建成</span></div>
            <div class="item"><span class="k">物业公司</span><span class="v">万科物业</span></div>
        </body></html>"#;
        let doc = parse_document(html).unwrap();
        let locator = Locator::Labeled {
            item: ".item",
            label_selector: ".k",
            label: "建筑年代",
            value: Some(".v"),
        };
        assert_eq!(locate(&doc, &locator).unwrap().as_deref(), Some("2004年建成"));
    }

    #[test]
    fn test_extract_position() {
        let html = r#"<html><body><p>x</p><script>
            require(['ershoufang/sellDetail/detailV3'], function (main) {
                main({ resblockId:'1111027376982', resblockPosition:'116.4537,39.9127', city_id: '110000' });
            });
        </script></body></html>"#;
        let doc = parse_document(html).unwrap();
        assert_eq!(extract_position(&doc), Some((116.4537, 39.9127)));
    }

    #[test]
    fn test_extract_position_failure_is_none() {
        let no_script = parse_document("<html><body><p>x</p></body></html>").unwrap();
        assert_eq!(extract_position(&no_script), None);

        let garbled = parse_document(
            r#"<html><body><p>x</p><script>var resblockPosition = '';</script></body></html>"#,
        )
        .unwrap();
        assert_eq!(extract_position(&garbled), None);
    }

    #[test]
    fn test_resolve_link() {
        let base = Url::parse("https://bj.lianjia.com/chengjiao/chaoyang/pg2/").unwrap();

        assert_eq!(
            resolve_link("/chengjiao/101.html", &base).as_deref(),
            Some("https://bj.lianjia.com/chengjiao/101.html")
        );
        assert_eq!(
            resolve_link("https://other.com/x", &base).as_deref(),
            Some("https://other.com/x")
        );
        assert_eq!(resolve_link("javascript:void(0)", &base), None);
        assert_eq!(resolve_link("#top", &base), None);
        assert_eq!(resolve_link("   ", &base), None);
    }
}
