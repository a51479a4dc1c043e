//! Data model shared by the walker, the extractor and the sink

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// JSON key holding a record's unique key
pub const SOURCE_URL_KEY: &str = "sourceUrl";

/// A navigable node in the district/county hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    /// Display name, e.g. "朝阳" or "201401"
    pub name: String,

    /// Absolute URL of the region's landing page
    pub locator: String,
}

impl Region {
    pub fn new(name: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locator: locator.into(),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.locator)
    }
}

/// Number of listing pages in a county
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCount {
    Known(u32),
    /// The page-count indicator was absent from the markup
    Unknown,
}

/// Progress marker within one county's pagination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub district: Region,
    pub county: Region,
    pub page_number: u32,
    pub total_pages: u32,
}

/// A scalar field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Renders the value as a plain cell (empty for null)
    pub fn to_cell(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.clone(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Inserts or replaces a field while keeping first-insertion order
fn set_field(fields: &mut Vec<(String, FieldValue)>, name: &str, value: FieldValue) {
    match fields.iter_mut().find(|(existing, _)| existing == name) {
        Some((_, slot)) => *slot = value,
        None => fields.push((name.to_string(), value)),
    }
}

/// A listing stub extracted from a listing page
#[derive(Debug, Clone, PartialEq)]
pub struct PartialRecord {
    /// Unique key of the eventual record
    pub source_url: String,

    /// Page holding the full record; `None` when the stub is already complete
    pub detail_url: Option<String>,

    fields: Vec<(String, FieldValue)>,
}

impl PartialRecord {
    pub fn new(source_url: impl Into<String>, detail_url: Option<String>) -> Self {
        Self {
            source_url: source_url.into(),
            detail_url,
            fields: Vec::new(),
        }
    }

    /// Sets a field known at listing time (title, district, county, ...)
    pub fn tag(&mut self, name: &str, value: impl Into<FieldValue>) {
        set_field(&mut self.fields, name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    /// Finalizes a stub that needs no detail page
    pub fn into_record(self) -> Record {
        Record {
            source_url: self.source_url,
            fields: self.fields,
        }
    }
}

/// One fully extracted entity, keyed by its source URL
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    source_url: String,
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field insertion; replaces an existing field of the same name
    pub fn with_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        set_field(&mut self.fields, name, value.into());
        self
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry(SOURCE_URL_KEY, &self.source_url)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a flat JSON object with a \"{}\" key", SOURCE_URL_KEY)
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut source_url = None;
                let mut fields = Vec::new();

                while let Some(key) = access.next_key::<String>()? {
                    if key == SOURCE_URL_KEY {
                        source_url = Some(access.next_value::<String>()?);
                    } else {
                        let value = access.next_value::<FieldValue>()?;
                        set_field(&mut fields, &key, value);
                    }
                }

                let source_url =
                    source_url.ok_or_else(|| de::Error::missing_field(SOURCE_URL_KEY))?;
                Ok(Record { source_url, fields })
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}
