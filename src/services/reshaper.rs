//! Wide-to-long reshaping of the "Quarter" sheet
//!
//! The sheet has one row per supply line and one column per quarter. Rows are
//! classified by position (the sheet nests "Crude oil", "NGLs" and
//! "Feedstocks" under unlabelled group headers), crude oil and NGLs production
//! is folded into a single aggregate line, and every quarter column is then
//! unpivoted into its own output row.

use chrono::NaiveDate;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::importers::quarter_sheet::{Cell, WideTable};
use crate::quarter::quarter_token;

pub const CATEGORY_COLUMN: &str = "Category";
const SOURCE_CATEGORY_COLUMN: &str = "Column1";
const SUB_CATEGORY_SEPARATOR: char = '_';

const INDIGENOUS_PRODUCTION: &str = "Indigenous production";
const EXCLUDED_FROM_AGGREGATE: &str = "Indigenous production_Feedstocks";
const AGGREGATE_SUB_CATEGORY: &str = "Indigenous production_Crude Oil & NGLs";
const SUPERSEDED_BY_AGGREGATE: [&str; 2] = [
    "Indigenous production_Crude oil",
    "Indigenous production_NGLs",
];

static NOTE_ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\[note\s*\d+\]").expect("valid note regex"));

#[derive(Error, Debug, PartialEq)]
pub enum ReshapeError {
    #[error("No category column (expected Column1 or Category) among {0:?}")]
    MissingCategoryColumn(Vec<String>),

    #[error("Unexpected sheet layout: row {ordinal} should be {expected:?} but is {found:?}")]
    LayoutMismatch {
        ordinal: usize,
        expected: String,
        found: String,
    },
}

/// One output row of the long table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongRow {
    #[serde(rename = "Category")]
    pub category: String,
    #[serde(rename = "Sub_Category")]
    pub sub_category: String,
    #[serde(rename = "Quarter")]
    pub quarter: String,
    #[serde(rename = "Quantity")]
    pub quantity: Option<f64>,
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "ProcessedDate", serialize_with = "serialize_processed_date")]
    pub processed_date: NaiveDate,
}

fn serialize_processed_date<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&date.format("%d/%m/%Y"))
}

/// A group of rows that sit under a header row
///
/// Rows at `ordinals` get `"{label}_"` prefixed to their sub-category. The row
/// at `anchor` is the group header and must read `label` for the rule to be
/// trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutRule {
    pub label: String,
    pub anchor: usize,
    pub ordinals: Vec<usize>,
}

impl LayoutRule {
    pub fn new(label: impl Into<String>, anchor: usize, ordinals: &[usize]) -> Self {
        Self {
            label: label.into(),
            anchor,
            ordinals: ordinals.to_vec(),
        }
    }
}

/// Position-based classification table for the "Quarter" sheet
#[derive(Debug, Clone, PartialEq)]
pub struct SheetLayout {
    rules: Vec<LayoutRule>,
}

impl SheetLayout {
    pub fn new(rules: Vec<LayoutRule>) -> Self {
        Self { rules }
    }

    /// Layout of the published crude oil supply table (0-based row ordinals)
    pub fn energy_trends() -> Self {
        Self::new(vec![
            LayoutRule::new(INDIGENOUS_PRODUCTION, 0, &[1, 2, 3]),
            LayoutRule::new("Imports", 4, &[5, 6]),
            LayoutRule::new("Exports", 7, &[8, 9]),
        ])
    }

    pub fn sub_category(&self, ordinal: usize, category: &str) -> String {
        match self.rules.iter().find(|r| r.ordinals.contains(&ordinal)) {
            Some(rule) => format!("{}{}{}", rule.label, SUB_CATEGORY_SEPARATOR, category),
            None => category.to_string(),
        }
    }

    /// Check each group header that is present in `categories`
    pub fn validate(&self, categories: &[String]) -> Result<(), ReshapeError> {
        for rule in &self.rules {
            let Some(found) = categories.get(rule.anchor) else {
                continue;
            };
            if found != &rule.label {
                return Err(ReshapeError::LayoutMismatch {
                    ordinal: rule.anchor,
                    expected: rule.label.clone(),
                    found: found.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for SheetLayout {
    fn default() -> Self {
        Self::energy_trends()
    }
}

/// What to do when a group header is not where the layout expects it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutCheck {
    #[default]
    Strict,
    Warn,
}

#[derive(Debug)]
struct ClassifiedRow {
    category: String,
    sub_category: String,
    values: Vec<Option<f64>>,
}

pub struct Reshaper {
    layout: SheetLayout,
    check: LayoutCheck,
}

impl Reshaper {
    pub fn new(layout: SheetLayout, check: LayoutCheck) -> Self {
        Self { layout, check }
    }

    /// Turn the wide sheet into long rows stamped with `file_name` and
    /// `processed_date`
    ///
    /// Classification happens on the original row order, before aggregation
    /// and before any column is renamed.
    pub fn reshape(
        &self,
        table: &WideTable,
        file_name: &str,
        processed_date: NaiveDate,
    ) -> Result<Vec<LongRow>, ReshapeError> {
        let columns: Vec<String> = table.columns.iter().map(|c| normalize_column(c)).collect();
        let category_idx = columns
            .iter()
            .position(|c| c == CATEGORY_COLUMN)
            .ok_or_else(|| ReshapeError::MissingCategoryColumn(columns.clone()))?;

        let value_columns: Vec<(usize, &str)> = columns
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != category_idx)
            .map(|(i, name)| (i, name.as_str()))
            .collect();

        let categories: Vec<String> = table
            .rows
            .iter()
            .map(|cells| clean_category(&cells.get(category_idx).map(Cell::as_text).unwrap_or_default()))
            .collect();

        if let Err(e) = self.layout.validate(&categories) {
            match self.check {
                LayoutCheck::Strict => return Err(e),
                LayoutCheck::Warn => warn!("{}; classifying by position anyway", e),
            }
        }

        let mut rows: Vec<ClassifiedRow> = table
            .rows
            .iter()
            .zip(categories)
            .enumerate()
            .map(|(ordinal, (cells, category))| {
                let sub_category = self.layout.sub_category(ordinal, &category);
                let category = if sub_category != category {
                    sub_category
                        .split(SUB_CATEGORY_SEPARATOR)
                        .next()
                        .unwrap_or_default()
                        .to_string()
                } else {
                    category
                };
                let values = value_columns
                    .iter()
                    .map(|(i, _)| cells.get(*i).and_then(Cell::as_number))
                    .collect();
                ClassifiedRow {
                    category,
                    sub_category,
                    values,
                }
            })
            .collect();
        debug!("Classified {} rows", rows.len());

        if let Some(aggregate) = aggregate_crude_and_ngls(&rows, value_columns.len()) {
            rows.push(aggregate);
        }
        rows.retain(|r| !SUPERSEDED_BY_AGGREGATE.contains(&r.sub_category.as_str()));
        info!("Row count after aggregation: {}", rows.len());

        let quarters = rename_quarter_columns(&value_columns);

        let mut long_rows = Vec::with_capacity(rows.len() * quarters.len());
        for row in &rows {
            for (value_pos, token) in &quarters {
                long_rows.push(LongRow {
                    category: row.category.clone(),
                    sub_category: row.sub_category.clone(),
                    quarter: token.clone(),
                    quantity: row.values[*value_pos],
                    file_name: file_name.to_string(),
                    processed_date,
                });
            }
        }

        info!(
            "Unpivoted {} rows x {} quarters into {} long rows",
            rows.len(),
            quarters.len(),
            long_rows.len()
        );
        Ok(long_rows)
    }
}

impl Default for Reshaper {
    fn default() -> Self {
        Self::new(SheetLayout::default(), LayoutCheck::default())
    }
}

/// Spaces become underscores; the unnamed first column becomes `Category`
fn normalize_column(name: &str) -> String {
    let name = name.replace(' ', "_");
    if name == SOURCE_CATEGORY_COLUMN {
        CATEGORY_COLUMN.to_string()
    } else {
        name
    }
}

fn clean_category(raw: &str) -> String {
    NOTE_ANNOTATION.replace_all(raw.trim(), "").trim().to_string()
}

/// Sum of the production lines other than feedstocks, per column
///
/// Missing cells are skipped; a column with no values stays missing.
fn aggregate_crude_and_ngls(rows: &[ClassifiedRow], width: usize) -> Option<ClassifiedRow> {
    let members: Vec<&ClassifiedRow> = rows
        .iter()
        .filter(|r| {
            r.category == INDIGENOUS_PRODUCTION
                && r.sub_category != INDIGENOUS_PRODUCTION
                && r.sub_category != EXCLUDED_FROM_AGGREGATE
        })
        .collect();

    if members.is_empty() {
        debug!("No production lines to aggregate");
        return None;
    }

    let values = (0..width)
        .map(|j| {
            members
                .iter()
                .filter_map(|r| r.values[j])
                .fold(None, |acc: Option<f64>, v| Some(acc.unwrap_or(0.0) + v))
        })
        .collect();

    debug!("Aggregated {} production lines", members.len());
    Some(ClassifiedRow {
        category: INDIGENOUS_PRODUCTION.to_string(),
        sub_category: AGGREGATE_SUB_CATEGORY.to_string(),
        values,
    })
}

/// `(position in value columns, YYYYQQ token)` for every quarter column
fn rename_quarter_columns(value_columns: &[(usize, &str)]) -> Vec<(usize, String)> {
    value_columns
        .iter()
        .enumerate()
        .filter_map(|(pos, (_, name))| match quarter_token(name) {
            Some(token) => Some((pos, token)),
            None => {
                warn!("Skipping renaming for column: {} (not a quarter)", name);
                None
            }
        })
        .collect()
}
