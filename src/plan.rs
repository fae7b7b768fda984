/*!
 * Query plans
 *
 * A [`QueryPlan`] is the canonical, engine-ready form of a question: filters,
 * an optional grouping dimension, named metrics, sort and limit. Plans come
 * from two places:
 *
 * - [`PlanBuilder::from_intent`] turns a keyword-analyzed [`QueryIntent`] into a plan.
 * - [`ExternalSpec::parse`] reads a loosely-typed JSON fragment (typically LLM
 *   output) into a tagged intermediate form, recording which fields were
 *   recognized, coerced into shape, or replaced by a documented default.
 *
 * The only rejection anywhere in this module is a plan whose metrics resolve to
 * an empty list.
 */

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::data_types::{normalize_text, Field};
use crate::intent::{specialty_stems, IntentCategory, QueryIntent};
use crate::{MedrepError, Result};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn from_code(code: &str) -> Option<Self> {
        match normalize_text(code).as_str() {
            "asc" | "ascending" | "croissant" | "up" => Some(SortOrder::Asc),
            "desc" | "descending" | "decroissant" | "down" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

/// Filter comparison operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    /// Case- and accent-insensitive substring match; a list matches if any element does
    Contains,
    /// Set membership
    In,
    /// Kept so the plan can be displayed; never matches a record
    Unrecognized(String),
}

impl Operator {
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_lowercase().as_str() {
            "=" | "==" | "eq" | "equals" | "equal" | "is" => Operator::Equals,
            "!=" | "<>" | "ne" | "neq" | "not_equals" | "notequals" | "not" => Operator::NotEquals,
            ">" | "gt" | "greater" | "greater_than" | "greaterthan" => Operator::GreaterThan,
            ">=" | "gte" | "ge" | "greater_or_equal" | "greaterorequal" => Operator::GreaterOrEqual,
            "<" | "lt" | "less" | "less_than" | "lessthan" => Operator::LessThan,
            "<=" | "lte" | "le" | "less_or_equal" | "lessorequal" => Operator::LessOrEqual,
            "contains" | "like" | "includes" | "ilike" => Operator::Contains,
            "in" | "one_of" | "oneof" | "any" => Operator::In,
            other => Operator::Unrecognized(other.to_string()),
        }
    }

    pub fn as_code(&self) -> &str {
        match self {
            Operator::Equals => "eq",
            Operator::NotEquals => "ne",
            Operator::GreaterThan => "gt",
            Operator::GreaterOrEqual => "gte",
            Operator::LessThan => "lt",
            Operator::LessOrEqual => "lte",
            Operator::Contains => "contains",
            Operator::In => "in",
            Operator::Unrecognized(code) => code,
        }
    }

    /// Operators that only make sense against numbers
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Operator::GreaterThan | Operator::GreaterOrEqual | Operator::LessThan | Operator::LessOrEqual
        )
    }
}

impl From<String> for Operator {
    fn from(code: String) -> Self {
        Operator::from_code(&code)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_code().to_string()
    }
}

/// Right-hand side of a filter predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FilterValue>),
}

impl FilterValue {
    pub fn text<S: Into<String>>(s: S) -> Self {
        FilterValue::Text(s.into())
    }

    /// Build a value from a list of strings: one element stays scalar
    pub fn from_texts<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut values: Vec<FilterValue> = items.into_iter().map(|s| FilterValue::Text(s.into())).collect();
        if values.len() == 1 {
            values.remove(0)
        } else {
            FilterValue::List(values)
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(FilterValue::Bool(*b)),
            Value::Number(n) => n.as_f64().map(FilterValue::Number),
            Value::String(s) => Some(FilterValue::Text(s.clone())),
            Value::Array(items) => {
                let values: Vec<_> = items.iter().filter_map(FilterValue::from_json).collect();
                if values.is_empty() {
                    None
                } else {
                    Some(FilterValue::List(values))
                }
            }
            Value::Null | Value::Object(_) => None,
        }
    }
}

/// One `field operator value` condition; a plan ANDs all of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub field: Field,
    pub operator: Operator,
    pub value: FilterValue,
}

impl FilterPredicate {
    pub fn new(field: Field, operator: Operator, value: FilterValue) -> Self {
        Self { field, operator, value }
    }

    pub fn equals(field: Field, value: FilterValue) -> Self {
        Self::new(field, Operator::Equals, value)
    }

    /// Equality for one value, set membership for several
    pub fn one_of<I, S>(field: Field, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match FilterValue::from_texts(items) {
            list @ FilterValue::List(_) => Self::new(field, Operator::In, list),
            single => Self::new(field, Operator::Equals, single),
        }
    }
}

/// Grouping dimension
///
/// The named dimensions use fixed bucket tables; `Field` groups by the raw
/// string value of any catalogued field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GroupDimension {
    /// 1-2 / 3-5 / 6-10 / 11+
    Vingtile,
    /// five levels at 2/4/6/8
    Loyalty,
    /// 30/60/90 days plus never
    VisitRecency,
    /// always exactly two buckets
    Kol,
    RiskTier,
    /// one bucket holding everything
    Total,
    Field(Field),
}

impl GroupDimension {
    pub fn from_name(name: &str) -> Self {
        let key: String = normalize_text(name).chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        match key.as_str() {
            "vingtile" | "vingtilebucket" | "vingtiles" => GroupDimension::Vingtile,
            "loyalty" | "loyaltyscore" | "loyaltybucket" | "fidelite" => GroupDimension::Loyalty,
            "visitrecency" | "lastvisit" | "lastvisitdate" | "dayssincecontact" | "recency" | "dernierevisite" => {
                GroupDimension::VisitRecency
            }
            "kol" | "iskol" | "kolstatus" => GroupDimension::Kol,
            "risk" | "risktier" | "risklevel" | "risque" => GroupDimension::RiskTier,
            "total" | "all" | "none" | "global" => GroupDimension::Total,
            _ => GroupDimension::Field(Field::from_name(name)),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GroupDimension::Vingtile => "vingtile",
            GroupDimension::Loyalty => "loyalty",
            GroupDimension::VisitRecency => "visitRecency",
            GroupDimension::Kol => "isKOL",
            GroupDimension::RiskTier => "riskTier",
            GroupDimension::Total => "total",
            GroupDimension::Field(field) => field.as_str(),
        }
    }

    /// Whether the name resolved to something the engine knows how to bucket
    pub fn is_recognized(&self) -> bool {
        !matches!(self, GroupDimension::Field(Field::Unknown(_)))
    }
}

impl From<String> for GroupDimension {
    fn from(name: String) -> Self {
        GroupDimension::from_name(&name)
    }
}

impl From<GroupDimension> for String {
    fn from(dim: GroupDimension) -> Self {
        dim.as_str().to_string()
    }
}

impl fmt::Display for GroupDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregation function applied per group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum,
    #[serde(alias = "avg")]
    Average,
    Min,
    Max,
}

impl Aggregation {
    pub fn from_code(code: &str) -> Option<Self> {
        match normalize_text(code).as_str() {
            "count" | "cnt" | "nombre" | "number" | "compte" => Some(Aggregation::Count),
            "sum" | "total" | "somme" | "cumul" => Some(Aggregation::Sum),
            "avg" | "average" | "mean" | "moyenne" => Some(Aggregation::Average),
            "min" | "minimum" => Some(Aggregation::Min),
            "max" | "maximum" => Some(Aggregation::Max),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "total",
            Aggregation::Average => "average",
            Aggregation::Min => "minimum",
            Aggregation::Max => "maximum",
        }
    }
}

/// Final numeric transform of a metric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ValueFormat {
    /// Divide by 1000
    Thousands,
    /// Multiply by 100 and round
    Percent,
    /// Round to one decimal place
    #[default]
    Decimal,
}

impl ValueFormat {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_lowercase().as_str() {
            "thousands" | "thousand" | "k" | "milliers" | "kilo" => Some(ValueFormat::Thousands),
            "percent" | "percentage" | "%" | "pct" | "pourcentage" => Some(ValueFormat::Percent),
            "decimal" | "number" | "default" | "numeric" | "raw" => Some(ValueFormat::Decimal),
            _ => None,
        }
    }

    /// Apply the format to an aggregated value
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            ValueFormat::Thousands => value / 1000.0,
            ValueFormat::Percent => (value * 100.0).round(),
            ValueFormat::Decimal => (value * 10.0).round() / 10.0,
        }
    }
}

/// A named output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Display name, also the key of the value in each result point
    pub name: String,
    /// Source field; count metrics do not need one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Field>,
    pub aggregation: Aggregation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ValueFormat>,
}

impl Metric {
    pub fn new<S: Into<String>>(name: S, field: Option<Field>, aggregation: Aggregation) -> Self {
        Self { name: name.into(), field, aggregation, format: None }
    }

    pub fn count<S: Into<String>>(name: S) -> Self {
        Self::new(name, None, Aggregation::Count)
    }

    pub fn sum<S: Into<String>>(name: S, field: Field) -> Self {
        Self::new(name, Some(field), Aggregation::Sum)
    }

    pub fn average<S: Into<String>>(name: S, field: Field) -> Self {
        Self::new(name, Some(field), Aggregation::Average)
    }

    pub fn min<S: Into<String>>(name: S, field: Field) -> Self {
        Self::new(name, Some(field), Aggregation::Min)
    }

    pub fn max<S: Into<String>>(name: S, field: Field) -> Self {
        Self::new(name, Some(field), Aggregation::Max)
    }

    pub fn with_format(mut self, format: ValueFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Per-record column for a field, named after it.
    ///
    /// Volume reads in thousands like the rest of the dashboard.
    pub fn for_field(field: Field) -> Self {
        let metric = Self::sum(field.as_str(), field.clone());
        match field {
            Field::Volume => metric.with_format(ValueFormat::Thousands),
            _ => metric,
        }
    }

    pub fn effective_format(&self) -> ValueFormat {
        self.format.unwrap_or_default()
    }
}

/// Presentation hint carried by the plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ChartType {
    #[default]
    Bar,
    HorizontalBar,
    Line,
    Pie,
    Doughnut,
    Table,
    Kpi,
}

impl ChartType {
    pub fn from_code(code: &str) -> Option<Self> {
        let key: String = normalize_text(code).chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        match key.as_str() {
            "bar" | "bars" | "column" | "histogram" | "barres" => Some(ChartType::Bar),
            "horizontalbar" | "hbar" | "barh" => Some(ChartType::HorizontalBar),
            "line" | "lines" | "courbe" => Some(ChartType::Line),
            "pie" | "camembert" => Some(ChartType::Pie),
            "doughnut" | "donut" => Some(ChartType::Doughnut),
            "table" | "list" | "tableau" => Some(ChartType::Table),
            "kpi" | "metric" | "number" | "stat" => Some(ChartType::Kpi),
            _ => None,
        }
    }

    /// Charts that read as parts of a whole
    pub fn is_proportional(&self) -> bool {
        matches!(self, ChartType::Pie | ChartType::Doughnut)
    }
}

/// Canonical, executable query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// Name of the collection the plan reads
    pub source: String,
    #[serde(default)]
    pub filters: Vec<FilterPredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<GroupDimension>,
    pub metrics: Vec<Metric>,
    /// Metric name or field name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub chart_type: ChartType,
}

impl QueryPlan {
    /// Start a plan over the named source
    pub fn new<S: Into<String>>(source: S) -> Self {
        Self {
            source: source.into(),
            filters: Vec::new(),
            group_by: None,
            metrics: Vec::new(),
            sort_by: None,
            sort_order: SortOrder::Desc,
            limit: None,
            chart_type: ChartType::Bar,
        }
    }

    pub fn filter(mut self, predicate: FilterPredicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn group_by(mut self, dimension: GroupDimension) -> Self {
        self.group_by = Some(dimension);
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metrics.push(metric);
        self
    }

    pub fn sort_by<S: Into<String>>(mut self, key: S, order: SortOrder) -> Self {
        self.sort_by = Some(key.into());
        self.sort_order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn chart(mut self, chart_type: ChartType) -> Self {
        self.chart_type = chart_type;
        self
    }

    /// Reject plans that cannot produce any value
    pub fn validate(&self) -> Result<()> {
        if self.metrics.is_empty() {
            return Err(MedrepError::empty_metrics());
        }
        Ok(())
    }

    /// Metric the result rows are sorted by.
    ///
    /// The sort key may name a metric or a source field; when it names neither,
    /// rows sort by the first metric.
    pub fn sort_metric(&self) -> Option<&Metric> {
        let key = self.sort_by.as_deref()?;
        self.metric_named(key)
            .or_else(|| {
                let field = Field::from_name(key);
                self.metrics.iter().find(|m| m.field.as_ref() == Some(&field))
            })
            .or_else(|| self.metrics.first())
    }

    /// Field individual records are ordered by, if the sort key resolves to one
    pub fn sort_field(&self) -> Option<Field> {
        let key = self.sort_by.as_deref()?;
        if let Some(metric) = self.metric_named(key) {
            return metric.field.clone();
        }
        match Field::from_name(key) {
            Field::Unknown(_) => None,
            field => Some(field),
        }
    }

    pub fn metric_named(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_metric(&self) -> Option<&Metric> {
        self.metrics.first()
    }
}

/// Builds plans from intents and external specifications
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    source: String,
    default_limit: Option<usize>,
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            source: crate::constants::DEFAULT_SOURCE.to_string(),
            default_limit: None,
        }
    }

    /// Set the source name stamped on built plans
    pub fn with_source<S: Into<String>>(mut self, source: S) -> Self {
        self.source = source.into();
        self
    }

    /// Limit applied to ungrouped intent plans that carry no limit of their own
    pub fn with_default_limit(mut self, limit: Option<usize>) -> Self {
        self.default_limit = limit;
        self
    }

    /// Turn an analyzed intent into a plan
    pub fn from_intent(&self, intent: &QueryIntent) -> Result<QueryPlan> {
        let mut plan = QueryPlan::new(self.source.clone());
        plan.filters = entity_filters(intent);
        plan.filters.extend(intent.filters.iter().cloned());

        match intent.category {
            IntentCategory::Count => {
                let dimension = intent.group_by.clone().unwrap_or(GroupDimension::Total);
                plan.chart_type = if dimension == GroupDimension::Total { ChartType::Kpi } else { ChartType::Bar };
                plan.metrics.push(intent.metric.clone().unwrap_or_else(|| Metric::count("count")));
                if dimension != GroupDimension::Total {
                    plan.sort_by = Some(plan.metrics[0].name.clone());
                }
                plan.group_by = Some(dimension);
                plan.limit = intent.limit;
            }
            IntentCategory::Aggregate | IntentCategory::Compare => {
                let dimension = intent
                    .group_by
                    .clone()
                    .unwrap_or_else(|| comparison_dimension(intent));
                plan.chart_type = if dimension == GroupDimension::Kol { ChartType::Pie } else { ChartType::Bar };
                plan.metrics.push(intent.metric.clone().unwrap_or_else(|| Metric::count("count")));
                plan.sort_by = Some(plan.metrics[0].name.clone());
                plan.group_by = Some(dimension);
                plan.limit = intent.limit;
            }
            IntentCategory::Rank => {
                let sort = intent.sort.clone().unwrap_or_else(|| crate::intent::SortSpec::new(Field::Volume, SortOrder::Desc));
                plan.sort_by = Some(sort.field.as_str().to_string());
                plan.sort_order = sort.order;
                match &intent.group_by {
                    // "top 15 by volume, by city": limit applies to records, then grouped
                    Some(dimension) => {
                        plan.group_by = Some(dimension.clone());
                        plan.metrics.push(intent.metric.clone().unwrap_or_else(|| Metric::count("count")));
                        plan.chart_type = ChartType::Bar;
                        plan.limit = intent.limit.or(self.default_limit);
                    }
                    None => {
                        plan.metrics.push(Metric::for_field(sort.field.clone()));
                        if let Some(metric) = &intent.metric {
                            if metric.name != plan.metrics[0].name {
                                plan.metrics.push(metric.clone());
                            }
                        }
                        plan.chart_type = ChartType::HorizontalBar;
                        plan.limit = intent.limit.or(self.default_limit);
                    }
                }
            }
            IntentCategory::Info => {
                plan.metrics = vec![
                    Metric::for_field(Field::Volume),
                    Metric::for_field(Field::LoyaltyScore),
                    Metric::for_field(Field::Vingtile),
                    Metric::for_field(Field::DaysSinceContact),
                ];
                plan.chart_type = ChartType::Table;
                plan.limit = intent.limit.or(self.default_limit);
            }
            IntentCategory::Search => {
                match &intent.group_by {
                    Some(dimension) => {
                        plan.group_by = Some(dimension.clone());
                        plan.metrics.push(intent.metric.clone().unwrap_or_else(|| Metric::count("count")));
                        plan.limit = intent.limit;
                    }
                    None => {
                        let field = intent.sort.as_ref().map(|s| s.field.clone()).unwrap_or(Field::Volume);
                        plan.metrics.push(Metric::for_field(field));
                        plan.chart_type = ChartType::Table;
                        plan.limit = intent.limit.or(self.default_limit);
                    }
                }
                if let Some(sort) = &intent.sort {
                    plan.sort_by = Some(sort.field.as_str().to_string());
                    plan.sort_order = sort.order;
                }
            }
        }

        debug!(category = ?intent.category, filters = plan.filters.len(), group_by = ?plan.group_by, "built plan from intent");
        plan.validate()?;
        Ok(plan)
    }

    /// Parse an external specification and build a plan from it
    pub fn from_external(&self, spec: &Value) -> Result<QueryPlan> {
        parse_external(spec).into_plan(&self.source)
    }
}

/// Coerce an untrusted plan fragment into its tagged form.
///
/// This is the single entry point for model-emitted plans; it never fails and
/// records every fix-up it had to make.
pub fn parse_external(spec: &Value) -> ExternalSpec {
    ExternalSpec::parse(spec)
}

/// Filters derived from the entities an intent recognized
fn entity_filters(intent: &QueryIntent) -> Vec<FilterPredicate> {
    let entities = &intent.entities;
    let mut filters = Vec::new();

    if !entities.first_names.is_empty() {
        filters.push(FilterPredicate::one_of(Field::FirstName, entities.first_names.iter().cloned()));
    }
    if !entities.last_names.is_empty() {
        filters.push(FilterPredicate::one_of(Field::LastName, entities.last_names.iter().cloned()));
    }
    if !entities.cities.is_empty() {
        filters.push(FilterPredicate::one_of(Field::City, entities.cities.iter().cloned()));
    }
    if !entities.specialties.is_empty() {
        let stems: Vec<String> = entities
            .specialties
            .iter()
            .flat_map(|label| specialty_stems(label).iter().map(|s| s.to_string()))
            .collect();
        filters.push(FilterPredicate::new(
            Field::Specialty,
            Operator::Contains,
            FilterValue::List(stems.into_iter().map(FilterValue::Text).collect()),
        ));
    }
    if !entities.products.is_empty() {
        filters.push(FilterPredicate::new(
            Field::ProductsDiscussed,
            Operator::Contains,
            FilterValue::List(entities.products.iter().cloned().map(FilterValue::Text).collect()),
        ));
    }

    filters
}

/// Dimension that tells apart the entities a comparison names
fn comparison_dimension(intent: &QueryIntent) -> GroupDimension {
    let entities = &intent.entities;
    if entities.cities.len() >= 2 {
        GroupDimension::Field(Field::City)
    } else if entities.specialties.len() >= 2 {
        GroupDimension::Field(Field::Specialty)
    } else if intent.category == IntentCategory::Compare && entities.cities.is_empty() && entities.specialties.is_empty() {
        GroupDimension::Kol
    } else {
        GroupDimension::Field(Field::City)
    }
}

/// How a field of an external specification was resolved
#[derive(Debug, Clone, PartialEq)]
pub enum Tagged<T> {
    /// Present and well-formed
    Recognized(T),
    /// Present in a near-miss shape and fixed up, e.g. a single object wrapped in a list
    Coerced(T),
    /// Absent or unrecognized; `raw` holds what was there, if anything
    Defaulted { raw: Option<String>, value: T },
}

impl<T> Tagged<T> {
    pub fn value(&self) -> &T {
        match self {
            Tagged::Recognized(v) | Tagged::Coerced(v) => v,
            Tagged::Defaulted { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Tagged::Recognized(v) | Tagged::Coerced(v) => v,
            Tagged::Defaulted { value, .. } => value,
        }
    }

    pub fn is_recognized(&self) -> bool {
        matches!(self, Tagged::Recognized(_))
    }

    pub fn is_coerced(&self) -> bool {
        matches!(self, Tagged::Coerced(_))
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Tagged::Defaulted { .. })
    }
}

/// A metric read from an external specification
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    pub name: String,
    pub field: Option<Field>,
    /// Unrecognized aggregations default to count
    pub aggregation: Tagged<Aggregation>,
    /// Unrecognized formats default to one-decimal rounding
    pub format: Tagged<Option<ValueFormat>>,
}

impl MetricSpec {
    pub fn to_metric(&self) -> Metric {
        Metric {
            name: self.name.clone(),
            field: self.field.clone(),
            aggregation: *self.aggregation.value(),
            format: *self.format.value(),
        }
    }
}

/// Tagged intermediate form of an untrusted plan fragment
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSpec {
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: Tagged<String>,
    /// Unrecognized chart types default to bar
    pub chart_type: Tagged<ChartType>,
    pub filters: Tagged<Vec<FilterPredicate>>,
    pub group_by: Option<Tagged<GroupDimension>>,
    pub metrics: Tagged<Vec<MetricSpec>>,
    pub sort_by: Option<String>,
    /// Absent or unrecognized orders default to the sort field's natural order
    pub sort_order: Tagged<SortOrder>,
    pub limit: Option<Tagged<usize>>,
    /// Fragments that could not be used at all
    pub dropped: Vec<String>,
}

impl ExternalSpec {
    /// Parse any JSON value; never fails
    pub fn parse(spec: &Value) -> Self {
        let empty = Map::new();
        let root = spec.as_object().unwrap_or(&empty);
        // Chart descriptors often nest the query under "query"
        let query = lookup(root, &["query", "plan"]).and_then(Value::as_object).unwrap_or(root);
        let mut dropped = Vec::new();

        let title = lookup(root, &["title", "titre"]).and_then(Value::as_str).map(str::to_string);
        let description = lookup(root, &["description", "subtitle"]).and_then(Value::as_str).map(str::to_string);

        let source = match lookup(query, &["source", "collection", "dataset"]) {
            Some(Value::String(s)) if !s.trim().is_empty() => Tagged::Recognized(s.trim().to_string()),
            other => Tagged::Defaulted {
                raw: other.map(|v| v.to_string()),
                value: crate::constants::DEFAULT_SOURCE.to_string(),
            },
        };

        let chart_type = match lookup(root, &["chartType", "chart_type", "type", "chart"]).or_else(|| lookup(query, &["chartType", "chart_type"])) {
            Some(Value::String(s)) => match ChartType::from_code(s) {
                Some(ct) => Tagged::Recognized(ct),
                None => Tagged::Defaulted { raw: Some(s.clone()), value: ChartType::Bar },
            },
            other => Tagged::Defaulted { raw: other.map(|v| v.to_string()), value: ChartType::Bar },
        };

        let filters = parse_filters(lookup(query, &["filters", "filter", "where"]), &mut dropped);

        let group_by = match lookup(query, &["groupBy", "group_by", "groupby", "dimension"]) {
            Some(Value::String(s)) if !s.trim().is_empty() => {
                let dim = GroupDimension::from_name(s);
                Some(if dim.is_recognized() {
                    Tagged::Recognized(dim)
                } else {
                    Tagged::Defaulted { raw: Some(s.clone()), value: dim }
                })
            }
            Some(Value::Object(obj)) => lookup(obj, &["field", "name", "dimension"])
                .and_then(Value::as_str)
                .map(|s| Tagged::Coerced(GroupDimension::from_name(s))),
            Some(Value::Null) | None => None,
            Some(other) => {
                dropped.push(format!("groupBy: {}", other));
                None
            }
        };

        let metrics = parse_metrics(lookup(query, &["metrics", "metric", "measures", "measure"]), &mut dropped);

        let sort_by = match lookup(query, &["sortBy", "sort_by", "orderBy", "order_by", "sort"]) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Object(obj)) => lookup(obj, &["field", "name", "by"]).and_then(Value::as_str).map(str::to_string),
            _ => None,
        };

        let natural_order = sort_by
            .as_deref()
            .map(|key| natural_order(key, &metrics))
            .unwrap_or(SortOrder::Desc);
        let sort_order = match lookup(query, &["sortOrder", "sort_order", "order", "direction"]) {
            Some(Value::String(s)) => match SortOrder::from_code(s) {
                Some(order) => Tagged::Recognized(order),
                None => Tagged::Defaulted { raw: Some(s.clone()), value: natural_order },
            },
            other => Tagged::Defaulted { raw: other.map(|v| v.to_string()), value: natural_order },
        };

        let limit = match lookup(query, &["limit", "top", "max"]) {
            None | Some(Value::Null) => None,
            Some(value) => match parse_limit(value) {
                Some(limit) => Some(limit),
                None => {
                    dropped.push(format!("limit: {}", value));
                    None
                }
            },
        };

        Self {
            title,
            description,
            source,
            chart_type,
            filters,
            group_by,
            metrics,
            sort_by,
            sort_order,
            limit,
            dropped,
        }
    }

    /// Build the canonical plan; fails only when no metric survived parsing
    pub fn into_plan(self, default_source: &str) -> Result<QueryPlan> {
        let source = match self.source {
            Tagged::Defaulted { .. } => default_source.to_string(),
            tagged => tagged.into_value(),
        };
        let plan = QueryPlan {
            source,
            filters: self.filters.into_value(),
            group_by: self.group_by.map(Tagged::into_value),
            metrics: self.metrics.value().iter().map(MetricSpec::to_metric).collect(),
            sort_by: self.sort_by,
            sort_order: self.sort_order.into_value(),
            limit: self.limit.map(Tagged::into_value),
            chart_type: self.chart_type.into_value(),
        };
        if !self.dropped.is_empty() {
            debug!(dropped = ?self.dropped, "ignored unusable plan fragments");
        }
        plan.validate()?;
        Ok(plan)
    }
}

fn lookup<'v>(obj: &'v Map<String, Value>, keys: &[&str]) -> Option<&'v Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

fn natural_order(key: &str, metrics: &Tagged<Vec<MetricSpec>>) -> SortOrder {
    let field = metrics
        .value()
        .iter()
        .find(|m| m.name.eq_ignore_ascii_case(key))
        .and_then(|m| m.field.clone())
        .unwrap_or_else(|| Field::from_name(key));
    field.default_order()
}

fn parse_limit(value: &Value) -> Option<Tagged<usize>> {
    match value {
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                (u > 0).then(|| Tagged::Recognized(u as usize))
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 1.0)
                    .map(|f| Tagged::Coerced(f.floor() as usize))
            }
        }
        Value::String(s) => s.trim().parse::<usize>().ok().filter(|u| *u > 0).map(Tagged::Coerced),
        _ => None,
    }
}

fn parse_filters(value: Option<&Value>, dropped: &mut Vec<String>) -> Tagged<Vec<FilterPredicate>> {
    match value {
        None | Some(Value::Null) => Tagged::Recognized(Vec::new()),
        Some(Value::Array(items)) => {
            let mut coerced = false;
            let mut filters = Vec::new();
            for item in items {
                match item.as_object() {
                    Some(obj) => match parse_filter_object(obj) {
                        Some((filter, fixed)) => {
                            coerced |= fixed;
                            filters.push(filter);
                        }
                        None => dropped.push(format!("filter: {}", item)),
                    },
                    None => dropped.push(format!("filter: {}", item)),
                }
            }
            if coerced {
                Tagged::Coerced(filters)
            } else {
                Tagged::Recognized(filters)
            }
        }
        Some(Value::Object(obj)) if lookup(obj, &["field", "column"]).is_some() => {
            match parse_filter_object(obj) {
                Some((filter, _)) => Tagged::Coerced(vec![filter]),
                None => {
                    dropped.push(format!("filter: {}", Value::Object(obj.clone())));
                    Tagged::Coerced(Vec::new())
                }
            }
        }
        // {"city": "Lyon", "isKOL": true}
        Some(Value::Object(obj)) => {
            let mut filters = Vec::new();
            for (key, raw) in obj {
                match FilterValue::from_json(raw) {
                    Some(list @ FilterValue::List(_)) => {
                        filters.push(FilterPredicate::new(Field::from_name(key), Operator::In, list))
                    }
                    Some(single) => filters.push(FilterPredicate::equals(Field::from_name(key), single)),
                    None => dropped.push(format!("filter {}: {}", key, raw)),
                }
            }
            Tagged::Coerced(filters)
        }
        Some(other) => Tagged::Defaulted { raw: Some(other.to_string()), value: Vec::new() },
    }
}

/// Returns the predicate and whether it had to be fixed up
fn parse_filter_object(obj: &Map<String, Value>) -> Option<(FilterPredicate, bool)> {
    let field = lookup(obj, &["field", "column", "name"]).and_then(Value::as_str)?;
    let value = FilterValue::from_json(lookup(obj, &["value", "values"])?)?;
    let (operator, coerced) = match lookup(obj, &["operator", "op", "comparison"]).and_then(Value::as_str) {
        Some(op) => (Operator::from_code(op), false),
        None if matches!(value, FilterValue::List(_)) => (Operator::In, true),
        None => (Operator::Equals, true),
    };
    Some((FilterPredicate::new(Field::from_name(field), operator, value), coerced))
}

fn parse_metrics(value: Option<&Value>, dropped: &mut Vec<String>) -> Tagged<Vec<MetricSpec>> {
    match value {
        Some(Value::Array(items)) => {
            let mut coerced = false;
            let mut metrics = Vec::new();
            for item in items {
                match parse_metric(item) {
                    Some((metric, fixed)) => {
                        coerced |= fixed;
                        metrics.push(metric);
                    }
                    None => dropped.push(format!("metric: {}", item)),
                }
            }
            if coerced {
                Tagged::Coerced(metrics)
            } else {
                Tagged::Recognized(metrics)
            }
        }
        Some(single @ (Value::Object(_) | Value::String(_))) => match parse_metric(single) {
            Some((metric, _)) => Tagged::Coerced(vec![metric]),
            None => {
                dropped.push(format!("metric: {}", single));
                Tagged::Coerced(Vec::new())
            }
        },
        other => Tagged::Defaulted { raw: other.map(|v| v.to_string()), value: Vec::new() },
    }
}

fn parse_metric(value: &Value) -> Option<(MetricSpec, bool)> {
    match value {
        // "count" or a bare field name
        Value::String(s) if !s.trim().is_empty() => {
            let metric = match Aggregation::from_code(s) {
                Some(Aggregation::Count) => MetricSpec {
                    name: "count".to_string(),
                    field: None,
                    aggregation: Tagged::Coerced(Aggregation::Count),
                    format: Tagged::Recognized(None),
                },
                _ => {
                    let field = Field::from_name(s);
                    MetricSpec {
                        name: field.as_str().to_string(),
                        field: Some(field),
                        aggregation: Tagged::Coerced(Aggregation::Sum),
                        format: Tagged::Recognized(None),
                    }
                }
            };
            Some((metric, true))
        }
        Value::Object(obj) => {
            let field = lookup(obj, &["field", "source", "column", "sourceField"])
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(Field::from_name);
            let aggregation = match lookup(obj, &["aggregation", "agg", "function", "aggregate", "type"]) {
                Some(Value::String(s)) => match Aggregation::from_code(s) {
                    Some(agg) => Tagged::Recognized(agg),
                    None => Tagged::Defaulted { raw: Some(s.clone()), value: Aggregation::Count },
                },
                other => Tagged::Defaulted { raw: other.map(|v| v.to_string()), value: Aggregation::Count },
            };
            let format = match lookup(obj, &["format", "outputFormat", "output_format"]) {
                None | Some(Value::Null) => Tagged::Recognized(None),
                Some(Value::String(s)) => match ValueFormat::from_code(s) {
                    Some(fmt) => Tagged::Recognized(Some(fmt)),
                    None => Tagged::Defaulted { raw: Some(s.clone()), value: None },
                },
                Some(other) => Tagged::Defaulted { raw: Some(other.to_string()), value: None },
            };
            let name = lookup(obj, &["name", "label", "displayName", "alias"])
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| match (&field, aggregation.value()) {
                    (_, Aggregation::Count) | (None, _) => "count".to_string(),
                    (Some(f), _) => f.as_str().to_string(),
                });
            // A value metric needs a field; without one only counting makes sense
            if field.is_none() && *aggregation.value() != Aggregation::Count {
                let aggregation = Tagged::Defaulted {
                    raw: Some(format!("{:?} without field", aggregation.value())),
                    value: Aggregation::Count,
                };
                return Some((MetricSpec { name, field, aggregation, format }, true));
            }
            Some((MetricSpec { name, field, aggregation, format }, false))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_rejects_empty_metrics() {
        let plan = QueryPlan::new("practitioners");
        assert!(plan.validate().unwrap_err().is_invalid_plan());
    }

    #[test]
    fn test_sort_metric_resolution() {
        let plan = QueryPlan::new("practitioners")
            .metric(Metric::count("count"))
            .metric(Metric::sum("Volume (k)", Field::Volume).with_format(ValueFormat::Thousands))
            .sort_by("volume", SortOrder::Desc);
        assert_eq!(plan.sort_metric().unwrap().name, "Volume (k)");
        assert_eq!(plan.sort_field(), Some(Field::Volume));

        let by_name = plan.clone().sort_by("count", SortOrder::Desc);
        assert_eq!(by_name.sort_metric().unwrap().name, "count");
        assert_eq!(by_name.sort_field(), None);
    }

    #[test]
    fn test_value_format_applies_after_aggregation() {
        assert_eq!(ValueFormat::Thousands.apply(800_000.0), 800.0);
        assert_eq!(ValueFormat::Percent.apply(0.456), 46.0);
        assert_eq!(ValueFormat::Decimal.apply(7.26), 7.3);
    }

    #[test]
    fn test_external_single_filter_and_metric_are_wrapped() {
        let spec = json!({
            "chartType": "pie",
            "query": {
                "source": "practitioners",
                "filters": {"field": "city", "operator": "equals", "value": "Lyon"},
                "groupBy": "isKOL",
                "metrics": {"name": "count", "aggregation": "count"}
            }
        });
        let parsed = ExternalSpec::parse(&spec);
        assert!(parsed.filters.is_coerced());
        assert!(parsed.metrics.is_coerced());
        assert!(parsed.chart_type.is_recognized());
        assert_eq!(parsed.group_by.as_ref().map(|g| g.value().clone()), Some(GroupDimension::Kol));

        let plan = parsed.into_plan("practitioners").unwrap();
        assert_eq!(plan.filters.len(), 1);
        assert_eq!(plan.metrics.len(), 1);
        assert_eq!(plan.chart_type, ChartType::Pie);
    }

    #[test]
    fn test_external_unknown_types_fall_back() {
        let spec = json!({
            "chartType": "sunburst",
            "metrics": [{"name": "v", "field": "volume", "aggregation": "median", "format": "roman"}],
            "sortBy": "vingtile",
        });
        let parsed = ExternalSpec::parse(&spec);
        assert_eq!(parsed.chart_type, Tagged::Defaulted { raw: Some("sunburst".into()), value: ChartType::Bar });
        let metric = &parsed.metrics.value()[0];
        assert!(metric.aggregation.is_defaulted());
        assert_eq!(*metric.aggregation.value(), Aggregation::Count);
        assert!(metric.format.is_defaulted());
        // vingtile sorts best (lowest) first when no order is given
        assert!(parsed.sort_order.is_defaulted());
        assert_eq!(*parsed.sort_order.value(), SortOrder::Asc);
    }

    #[test]
    fn test_external_without_metrics_is_rejected() {
        let spec = json!({"groupBy": "city", "metrics": []});
        let err = PlanBuilder::new().from_external(&spec).unwrap_err();
        assert!(err.is_invalid_plan());

        let spec = json!({"groupBy": "city", "metrics": [42, null]});
        assert!(PlanBuilder::new().from_external(&spec).unwrap_err().is_invalid_plan());
    }

    #[test]
    fn test_external_field_map_filters_and_string_limit() {
        let spec = json!({
            "filters": {"city": ["Lyon", "Grenoble"], "isKOL": true},
            "metrics": ["count"],
            "limit": "15",
        });
        let parsed = ExternalSpec::parse(&spec);
        assert!(parsed.filters.is_coerced());
        assert_eq!(parsed.limit, Some(Tagged::Coerced(15)));
        let plan = parsed.into_plan("practitioners").unwrap();
        assert!(plan.filters.iter().any(|f| f.field == Field::City && f.operator == Operator::In));
        assert!(plan.filters.iter().any(|f| f.field == Field::IsKol && f.operator == Operator::Equals));
    }

    #[test]
    fn test_external_unknown_group_dimension_is_tagged() {
        let spec = json!({"groupBy": "favouriteColour", "metrics": ["count"]});
        let parsed = ExternalSpec::parse(&spec);
        let group = parsed.group_by.unwrap();
        assert!(group.is_defaulted());
        assert_eq!(group.into_value(), GroupDimension::Field(Field::Unknown("favouriteColour".into())));
    }

    #[test]
    fn test_unrecognized_operator_is_kept() {
        let spec = json!({"filters": [{"field": "volume", "operator": "between", "value": 3}], "metrics": ["count"]});
        let plan = PlanBuilder::new().from_external(&spec).unwrap();
        assert_eq!(plan.filters[0].operator, Operator::Unrecognized("between".into()));
    }

    #[test]
    fn test_plan_serde_roundtrip_uses_canonical_names() {
        let plan = QueryPlan::new("practitioners")
            .filter(FilterPredicate::equals(Field::IsKol, FilterValue::Bool(true)))
            .group_by(GroupDimension::Field(Field::City))
            .metric(Metric::sum("value", Field::Volume).with_format(ValueFormat::Thousands))
            .sort_by("value", SortOrder::Desc);
        let json = serde_json::to_value(&plan).unwrap();
        assert_eq!(json["groupBy"], "city");
        assert_eq!(json["filters"][0]["field"], "isKOL");
        let back: QueryPlan = serde_json::from_value(json).unwrap();
        assert_eq!(back, plan);
    }
}
