/*!
 * Plan execution
 *
 * Runs a [`QueryPlan`] over a borrowed slice of practitioner records and
 * returns named result points. Execution is deterministic for a given plan,
 * dataset and `now`; it never mutates the records.
 *
 * The pipeline:
 *
 * 1. Enrich every record relative to `now`
 * 2. Keep records matching all filters
 * 3. Grouped plans: when a limit and a field sort key are both present, sort
 *    and truncate the records first, then bucket and aggregate. Ungrouped
 *    plans produce one row per record.
 * 4. Sort rows and apply any limit not already consumed
 */

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::NaiveDate;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use crate::data_types::{normalize_text, Field, FieldValue, PractitionerRecord};
use crate::enrichment::{enrich_all, EnrichedRecord};
use crate::plan::{Aggregation, FilterPredicate, FilterValue, GroupDimension, Metric, Operator, QueryPlan, SortOrder};
use crate::Result;

/// Bucket labels of the fixed grouping tables, in emission order
pub const VINGTILE_BUCKETS: [&str; 4] = ["V1-2", "V3-5", "V6-10", "V11+"];
/// Loyalty is fractional; each bucket includes its upper bound
pub const LOYALTY_BUCKETS: [&str; 5] = ["≤2", "2-4", "4-6", "6-8", ">8"];
pub const RECENCY_BUCKETS: [&str; 5] = ["0-30 days", "31-60 days", "61-90 days", "90+ days", "Never"];
pub const KOL_BUCKETS: [&str; 2] = ["KOL", "Non-KOL"];
pub const RISK_BUCKETS: [&str; 3] = ["High", "Medium", "Low"];
pub const TOTAL_BUCKET: &str = "Total";
/// Raw-value groups collect records with no value here
pub const OTHER_BUCKET: &str = "Other";

/// One output row: a label plus one value per metric, in metric order
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPoint {
    pub name: String,
    pub values: Vec<(String, f64)>,
}

impl ResultPoint {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self { name: name.into(), values: Vec::new() }
    }

    pub fn with_value<S: Into<String>>(mut self, metric: S, value: f64) -> Self {
        self.values.push((metric.into(), value));
        self
    }

    /// Value of a metric by name
    pub fn value(&self, metric: &str) -> Option<f64> {
        self.values.iter().find(|(name, _)| name == metric).map(|(_, v)| *v)
    }

    /// Value of the first metric
    pub fn primary_value(&self) -> f64 {
        self.values.first().map(|(_, v)| *v).unwrap_or(0.0)
    }
}

// Serialized flat: {"name": "Lyon", "value": 800}
impl Serialize for ResultPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("name", &self.name)?;
        for (metric, value) in &self.values {
            map.serialize_entry(metric, value)?;
        }
        map.end()
    }
}

/// Execute a plan over a dataset
///
/// # Errors
///
/// Returns [`crate::MedrepError::InvalidPlan`] when the plan has no metrics.
pub fn execute(plan: &QueryPlan, records: &[PractitionerRecord], now: NaiveDate) -> Result<Vec<ResultPoint>> {
    plan.validate()?;

    let enriched = enrich_all(records, now);
    let mut subset: Vec<&EnrichedRecord> = enriched
        .iter()
        .filter(|record| plan.filters.iter().all(|f| matches_filter(f, record)))
        .collect();
    debug!(total = records.len(), matched = subset.len(), "filtered records");

    if subset.is_empty() {
        return Ok(Vec::new());
    }

    let sort_field = plan.sort_field();
    let mut limit = plan.limit;

    let mut rows = match &plan.group_by {
        Some(dimension) => {
            // "top N by field, grouped": the limit selects records, not groups
            if let (Some(n), Some(field)) = (limit, sort_field.as_ref()) {
                sort_records(&mut subset, field, plan.sort_order);
                subset.truncate(n);
                limit = None;
            }
            let mut rows = group_rows(dimension, &plan.metrics, &subset);
            if let Some(metric) = plan.sort_metric() {
                sort_rows(&mut rows, &metric.name, plan.sort_order);
            }
            rows
        }
        None => {
            if let Some(field) = sort_field.as_ref() {
                sort_records(&mut subset, field, plan.sort_order);
            }
            let mut rows: Vec<ResultPoint> = subset
                .iter()
                .map(|record| row_for(record.record.display_name(), &plan.metrics, std::slice::from_ref(record)))
                .collect();
            if sort_field.is_none() {
                if let Some(metric) = plan.sort_metric() {
                    sort_rows(&mut rows, &metric.name, plan.sort_order);
                }
            }
            rows
        }
    };

    if let Some(n) = limit {
        rows.truncate(n);
    }
    debug!(rows = rows.len(), group_by = ?plan.group_by, "executed plan");
    Ok(rows)
}

/// Whether an enriched record satisfies a predicate.
///
/// Missing values, unknown fields and unrecognized operators never match.
pub fn matches_filter(predicate: &FilterPredicate, record: &EnrichedRecord) -> bool {
    let actual = record.value(&predicate.field);
    if actual.is_missing() {
        return false;
    }
    let expected = &predicate.value;

    match &predicate.operator {
        Operator::Equals | Operator::In => values_equal(&actual, expected),
        Operator::NotEquals => !values_equal(&actual, expected),
        Operator::GreaterThan => compare_numeric(&actual, expected).is_some_and(|o| o == Ordering::Greater),
        Operator::GreaterOrEqual => compare_numeric(&actual, expected).is_some_and(|o| o != Ordering::Less),
        Operator::LessThan => compare_numeric(&actual, expected).is_some_and(|o| o == Ordering::Less),
        Operator::LessOrEqual => compare_numeric(&actual, expected).is_some_and(|o| o != Ordering::Greater),
        Operator::Contains => text_contains(&actual, expected),
        Operator::Unrecognized(_) => false,
    }
}

fn values_equal(actual: &FieldValue, expected: &FilterValue) -> bool {
    match expected {
        FilterValue::List(items) => items.iter().any(|item| values_equal(actual, item)),
        FilterValue::Bool(b) => match actual {
            FieldValue::Bool(a) => a == b,
            FieldValue::Text(t) => parse_bool(t) == Some(*b),
            _ => false,
        },
        FilterValue::Number(n) => numeric(actual).is_some_and(|a| (a - n).abs() < 1e-9),
        FilterValue::Text(s) => match actual {
            FieldValue::Bool(a) => parse_bool(s) == Some(*a),
            FieldValue::Number(a) => s.trim().parse::<f64>().is_ok_and(|n| (a - n).abs() < 1e-9),
            other => other.label().is_some_and(|label| normalize_text(&label) == normalize_text(s)),
        },
    }
}

fn compare_numeric(actual: &FieldValue, expected: &FilterValue) -> Option<Ordering> {
    let a = numeric(actual)?;
    let e = match expected {
        FilterValue::Number(n) => *n,
        FilterValue::Text(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    a.partial_cmp(&e)
}

fn text_contains(actual: &FieldValue, expected: &FilterValue) -> bool {
    let Some(haystack) = actual.label().map(|l| normalize_text(&l)) else {
        return false;
    };
    let needle_matches = |needle: &FilterValue| match needle {
        FilterValue::Text(s) => {
            let needle = normalize_text(s);
            !needle.is_empty() && haystack.contains(&needle)
        }
        FilterValue::Number(n) => haystack.contains(&crate::data_types::format_number(*n)),
        _ => false,
    };
    match expected {
        FilterValue::List(items) => items.iter().any(needle_matches),
        single => needle_matches(single),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match normalize_text(text).as_str() {
        "true" | "yes" | "oui" | "1" | "vrai" => Some(true),
        "false" | "no" | "non" | "0" | "faux" => Some(false),
        _ => None,
    }
}

/// Numeric view used for aggregation and ordering; booleans count as 1 and 0
fn numeric(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        other => other.as_number(),
    }
}

/// Label of the bucket a record falls in
pub fn bucket_label(dimension: &GroupDimension, record: &EnrichedRecord) -> String {
    let r = record.record;
    match dimension {
        GroupDimension::Vingtile => {
            let label = match r.vingtile {
                0..=2 => VINGTILE_BUCKETS[0],
                3..=5 => VINGTILE_BUCKETS[1],
                6..=10 => VINGTILE_BUCKETS[2],
                _ => VINGTILE_BUCKETS[3],
            };
            label.to_string()
        }
        GroupDimension::Loyalty => {
            let score = r.loyalty_score;
            let label = if score <= 2.0 {
                LOYALTY_BUCKETS[0]
            } else if score <= 4.0 {
                LOYALTY_BUCKETS[1]
            } else if score <= 6.0 {
                LOYALTY_BUCKETS[2]
            } else if score <= 8.0 {
                LOYALTY_BUCKETS[3]
            } else {
                LOYALTY_BUCKETS[4]
            };
            label.to_string()
        }
        GroupDimension::VisitRecency => {
            let label = if record.never_contacted() {
                RECENCY_BUCKETS[4]
            } else if record.days_since_contact <= 30 {
                RECENCY_BUCKETS[0]
            } else if record.days_since_contact <= 60 {
                RECENCY_BUCKETS[1]
            } else if record.days_since_contact <= 90 {
                RECENCY_BUCKETS[2]
            } else {
                RECENCY_BUCKETS[3]
            };
            label.to_string()
        }
        GroupDimension::Kol => {
            let label = if r.is_kol { KOL_BUCKETS[0] } else { KOL_BUCKETS[1] };
            label.to_string()
        }
        GroupDimension::RiskTier => record.risk_tier.label().to_string(),
        GroupDimension::Total => TOTAL_BUCKET.to_string(),
        GroupDimension::Field(field) => record.value(field).label().unwrap_or_else(|| OTHER_BUCKET.to_string()),
    }
}

/// Fixed bucket table of a dimension; raw-value dimensions have none
fn fixed_buckets(dimension: &GroupDimension) -> Option<&'static [&'static str]> {
    match dimension {
        GroupDimension::Vingtile => Some(&VINGTILE_BUCKETS),
        GroupDimension::Loyalty => Some(&LOYALTY_BUCKETS),
        GroupDimension::VisitRecency => Some(&RECENCY_BUCKETS),
        GroupDimension::Kol => Some(&KOL_BUCKETS),
        GroupDimension::RiskTier => Some(&RISK_BUCKETS),
        GroupDimension::Total => Some(&[TOTAL_BUCKET]),
        GroupDimension::Field(_) => None,
    }
}

/// Bucket records and aggregate each bucket.
///
/// Fixed tables emit in table order and skip empty buckets, except the KOL
/// split which always emits both. Raw-value groups emit in first-appearance order.
fn group_rows(dimension: &GroupDimension, metrics: &[Metric], records: &[&EnrichedRecord]) -> Vec<ResultPoint> {
    let fixed = fixed_buckets(dimension);
    let mut groups: Vec<(String, Vec<&EnrichedRecord>)> = fixed
        .map(|labels| labels.iter().map(|l| (l.to_string(), Vec::new())).collect())
        .unwrap_or_default();
    let mut index: HashMap<String, usize> = groups.iter().enumerate().map(|(i, (label, _))| (label.clone(), i)).collect();

    for record in records {
        let label = bucket_label(dimension, record);
        // Raw values group like filters compare them; the first spelling seen is displayed
        let key = if fixed.is_some() { label.clone() } else { normalize_text(&label) };
        let slot = match index.get(&key) {
            Some(slot) => *slot,
            None => {
                groups.push((label, Vec::new()));
                index.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        groups[slot].1.push(*record);
    }

    let keep_empty = *dimension == GroupDimension::Kol;
    groups
        .into_iter()
        .filter(|(_, members)| keep_empty || !members.is_empty())
        .map(|(label, members)| row_for(label, metrics, &members))
        .collect()
}

fn row_for(name: String, metrics: &[Metric], members: &[&EnrichedRecord]) -> ResultPoint {
    ResultPoint {
        name,
        values: metrics.iter().map(|m| (m.name.clone(), aggregate(m, members))).collect(),
    }
}

/// Aggregate one metric over a group, then apply its format; empty groups yield 0
pub fn aggregate(metric: &Metric, members: &[&EnrichedRecord]) -> f64 {
    let raw = match (metric.aggregation, metric.field.as_ref()) {
        (Aggregation::Count, _) => members.len() as f64,
        (_, None) => 0.0,
        (aggregation, Some(field)) => {
            let values: Vec<f64> = members.iter().filter_map(|r| numeric(&r.value(field))).collect();
            if values.is_empty() {
                0.0
            } else {
                match aggregation {
                    Aggregation::Sum => values.iter().sum(),
                    Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
                    Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                    Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    Aggregation::Count => values.len() as f64,
                }
            }
        }
    };
    metric.effective_format().apply(raw)
}

#[derive(Debug, Clone, PartialEq, PartialOrd)]
enum SortValue {
    Number(f64),
    Text(String),
}

fn sort_value(value: &FieldValue) -> Option<SortValue> {
    match numeric(value) {
        Some(n) => Some(SortValue::Number(n)),
        None => value.label().map(|l| SortValue::Text(normalize_text(&l))),
    }
}

/// Stable order with missing values last in both directions
fn compare_sort_values(a: &Option<SortValue>, b: &Option<SortValue>, order: SortOrder) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ord = x.partial_cmp(y).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    }
}

fn sort_records(records: &mut Vec<&EnrichedRecord>, field: &Field, order: SortOrder) {
    let mut keyed: Vec<(Option<SortValue>, &EnrichedRecord)> =
        records.iter().map(|r| (sort_value(&r.value(field)), *r)).collect();
    keyed.sort_by(|a, b| compare_sort_values(&a.0, &b.0, order));
    *records = keyed.into_iter().map(|(_, r)| r).collect();
}

fn sort_rows(rows: &mut [ResultPoint], metric: &str, order: SortOrder) {
    rows.sort_by(|a, b| {
        let key = |row: &ResultPoint| row.value(metric).filter(|v| v.is_finite()).map(SortValue::Number);
        compare_sort_values(&key(a), &key(b), order)
    });
}
