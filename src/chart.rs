/*!
 * Chart specifications
 *
 * Packages a plan, its results and insights into a [`ChartSpec`] a renderer
 * can draw, and keeps a bounded history of recent charts.
 */

use std::collections::VecDeque;

use serde::Serialize;

use crate::executor::ResultPoint;
use crate::plan::{ChartType, GroupDimension, QueryPlan, ValueFormat};

/// One plotted series: a metric key in the data points and how to read it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSpec {
    pub key: String,
    pub format: ValueFormat,
}

/// Everything needed to render one answer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub chart_type: ChartType,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Label of the category axis
    pub category_label: String,
    pub series: Vec<SeriesSpec>,
    pub data: Vec<ResultPoint>,
    pub insights: Vec<String>,
    pub plan: QueryPlan,
}

impl ChartSpec {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Assemble a chart from an executed plan.
///
/// Without a title one is derived from the primary metric and the grouping.
pub fn assemble(
    plan: &QueryPlan,
    title: Option<&str>,
    description: Option<&str>,
    results: Vec<ResultPoint>,
    insights: Vec<String>,
) -> ChartSpec {
    let series = plan
        .metrics
        .iter()
        .map(|m| SeriesSpec { key: m.name.clone(), format: m.effective_format() })
        .collect();

    ChartSpec {
        chart_type: plan.chart_type,
        title: title.map(str::to_string).unwrap_or_else(|| default_title(plan)),
        description: description.map(str::to_string),
        category_label: category_label(plan.group_by.as_ref()),
        series,
        data: results,
        insights,
        plan: plan.clone(),
    }
}

fn category_label(group_by: Option<&GroupDimension>) -> String {
    match group_by {
        None => "practitioner".to_string(),
        Some(GroupDimension::Kol) => "KOL status".to_string(),
        Some(GroupDimension::VisitRecency) => "last visit".to_string(),
        Some(GroupDimension::RiskTier) => "risk tier".to_string(),
        Some(dimension) => dimension.as_str().to_string(),
    }
}

fn default_title(plan: &QueryPlan) -> String {
    let metric = plan.primary_metric().map(|m| m.name.as_str()).unwrap_or("value");
    match &plan.group_by {
        Some(GroupDimension::Total) => metric.to_string(),
        Some(dimension) => format!("{} by {}", metric, category_label(Some(dimension))),
        None if plan.chart_type == ChartType::Kpi => metric.to_string(),
        None => format!("{} per practitioner", metric),
    }
}

/// Most recent charts, oldest evicted first
#[derive(Debug, Clone)]
pub struct ChartHistory {
    capacity: usize,
    entries: VecDeque<ChartSpec>,
}

impl ChartHistory {
    /// History holding at most `capacity` charts (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, chart: ChartSpec) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(chart);
    }

    pub fn latest(&self) -> Option<&ChartSpec> {
        self.entries.back()
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &ChartSpec> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ChartHistory {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_HISTORY_CAPACITY)
    }
}
