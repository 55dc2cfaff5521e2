//! Raw catalog sources
//!
//! Turns a catalog file into an ordered list of [`RawRecord`]s. Validation
//! happens in [`Catalog::load`](super::Catalog::load).

use super::CatalogError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One unvalidated record as it appears in the source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based line (or array position) in the source
    #[serde(skip)]
    pub line: usize,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub long_description: Option<String>,
}

/// Supported catalog source layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// CMS `icd10cm_order` fixed-width file
    #[default]
    Order,
    /// `code<TAB>short[<TAB>long]`
    Tsv,
    /// JSON array of records
    Json,
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "order" => Ok(Self::Order),
            "tsv" => Ok(Self::Tsv),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "Unsupported catalog format '{}'. Supported: order, tsv, json",
                other
            )),
        }
    }
}

// Column layout of the CMS order file (0-based byte offsets)
const ORDER_CODE: std::ops::Range<usize> = 6..13;
const ORDER_FLAG: usize = 14;
const ORDER_SHORT: std::ops::Range<usize> = 16..76;
const ORDER_LONG_START: usize = 77;

/// Read and parse a catalog file
pub fn read_source(
    path: &Path,
    format: SourceFormat,
    billable_only: bool,
) -> Result<Vec<RawRecord>, CatalogError> {
    let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Read {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_source(&content, format, billable_only)
}

/// Parse catalog content already held in memory
pub fn parse_source(
    content: &str,
    format: SourceFormat,
    billable_only: bool,
) -> Result<Vec<RawRecord>, CatalogError> {
    match format {
        SourceFormat::Order => OrderParser::new()?.parse(content, billable_only),
        SourceFormat::Tsv => Ok(parse_tsv(content)),
        SourceFormat::Json => parse_json(content),
    }
}

struct OrderParser {
    loose: Regex,
}

impl OrderParser {
    fn new() -> Result<Self, CatalogError> {
        let loose = Regex::new(r"^\s*(\d+)\s+(\S+)\s+([01])\s+(.*)$")
            .map_err(|e| CatalogError::Parse(format!("Invalid order-line pattern: {}", e)))?;
        Ok(Self { loose })
    }

    fn parse(&self, content: &str, billable_only: bool) -> Result<Vec<RawRecord>, CatalogError> {
        let mut records = Vec::new();

        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            if is_skippable(line) {
                continue;
            }

            let (record, billable) = match self.parse_fixed(line, line_no) {
                Some(parsed) => parsed,
                None => self.parse_loose(line, line_no)?,
            };

            if billable_only && !billable {
                continue;
            }
            records.push(record);
        }

        tracing::debug!("Parsed {} order-file records", records.len());
        Ok(records)
    }

    fn parse_fixed(&self, line: &str, line_no: usize) -> Option<(RawRecord, bool)> {
        if line.len() <= ORDER_LONG_START {
            return None;
        }
        let bytes = line.as_bytes();
        if bytes[5] != b' ' || bytes[13] != b' ' || bytes[15] != b' ' || bytes[76] != b' ' {
            return None;
        }
        let flag = match bytes[ORDER_FLAG] {
            b'0' => false,
            b'1' => true,
            _ => return None,
        };

        let record = RawRecord {
            line: line_no,
            code: line.get(ORDER_CODE)?.trim().to_string(),
            short_description: Some(line.get(ORDER_SHORT)?.trim().to_string()),
            long_description: Some(line.get(ORDER_LONG_START..)?.trim().to_string()),
        };
        Some((record, flag))
    }

    fn parse_loose(&self, line: &str, line_no: usize) -> Result<(RawRecord, bool), CatalogError> {
        let caps = self
            .loose
            .captures(line)
            .ok_or_else(|| CatalogError::Malformed {
                line: line_no,
                reason: "expected '<order> <code> <flag> <description>'".to_string(),
            })?;

        let record = RawRecord {
            line: line_no,
            code: caps[2].to_string(),
            short_description: Some(caps[4].trim().to_string()),
            long_description: None,
        };
        Ok((record, &caps[3] == "1"))
    }
}

fn parse_tsv(content: &str) -> Vec<RawRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !is_skippable(line))
        .map(|(i, line)| {
            let mut fields = line.split('\t').map(str::trim);
            RawRecord {
                line: i + 1,
                code: fields.next().unwrap_or_default().to_string(),
                short_description: fields.next().map(str::to_string),
                long_description: fields.next().map(str::to_string),
            }
        })
        .collect()
}

fn parse_json(content: &str) -> Result<Vec<RawRecord>, CatalogError> {
    let mut records: Vec<RawRecord> = serde_json::from_str(content)
        .map_err(|e| CatalogError::Parse(format!("Invalid JSON catalog: {}", e)))?;
    for (i, record) in records.iter_mut().enumerate() {
        record.line = i + 1;
    }
    Ok(records)
}

fn is_skippable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}
