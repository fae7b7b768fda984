/*!
 * # medrep: natural-language analytics over practitioner portfolios
 *
 * A Rust library that answers sales questions ("top 10 cardiologists in Lyon",
 * "how many KOLs at risk?", "volume by city") over an in-memory portfolio of
 * practitioner records.
 *
 * ## Features
 *
 * - 🔎 **Question Analysis**: Keyword-driven intent detection in English and French
 * - 🧭 **Typed Plans**: Filters, grouping, metrics, sort and limit as plain data
 * - 🛟 **Forgiving Input**: Loosely-typed JSON plans are coerced, never rejected for shape
 * - 📊 **Domain Buckets**: Vingtile, loyalty, visit recency, KOL and risk tier groupings
 * - 💡 **Insights**: Leader, shares, spread and head-to-head observations
 * - 💾 **Multiple Formats**: Load and export JSON, JSON Lines and CSV
 *
 * ## Quick Start
 *
 * ```no_run
 * use medrep::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let dataset = PractitionerDataset::load("data/portfolio.json")?;
 *
 * let outcome = dataset.ask("top 5 practitioners by volume in Lyon")?;
 * for point in &outcome.results {
 *     println!("{}: {:?}", point.name, point.value("volume"));
 * }
 * for insight in &outcome.insights {
 *     println!("- {}", insight);
 * }
 * # Ok(())
 * # }
 * ```
 *
 * ## Structured Plans
 *
 * Plans emitted by a language model go through [`plan::parse_external`], which
 * records every field as recognized, coerced or defaulted.
 *
 * ```no_run
 * # use medrep::prelude::*;
 * # fn main() -> Result<()> {
 * # let dataset = PractitionerDataset::load("data/portfolio.json")?;
 * let spec = serde_json::json!({
 *     "title": "Volume by city",
 *     "chartType": "bar",
 *     "query": {
 *         "groupBy": "city",
 *         "metrics": [{"name": "value", "field": "volume", "aggregation": "sum", "format": "thousands"}],
 *         "sortBy": "value",
 *         "sortOrder": "desc"
 *     }
 * });
 * let chart = dataset.chart_for_spec(&spec)?;
 * println!("{} ({} bars)", chart.title, chart.data.len());
 * # Ok(())
 * # }
 * ```
 *
 * ## Building Plans by Hand
 *
 * ```no_run
 * # use medrep::prelude::*;
 * # fn main() -> Result<()> {
 * # let dataset = PractitionerDataset::load("data/portfolio.json")?;
 * // Top 15 practitioners by volume, then counted per city
 * let plan = QueryPlan::new("practitioners")
 *     .group_by(GroupDimension::Field(Field::City))
 *     .metric(Metric::count("count"))
 *     .sort_by("volume", SortOrder::Desc)
 *     .limit(15);
 * let rows = execute(&plan, &dataset.practitioners, dataset.reference_date())?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Configuration
 *
 * ```no_run
 * # use medrep::prelude::*;
 * # fn main() -> Result<()> {
 * // Defaults, then ~/.config/medrep/config.toml, then MEDREP_* variables
 * let config = MedrepConfig::load()?;
 *
 * // Or build your own
 * let config = ConfigBuilder::new()
 *     .default_limit(Some(10))
 *     .extra_city("Bourg-en-Bresse")
 *     .build();
 * let dataset = PractitionerDatasetBuilder::new()
 *     .data("data/portfolio.csv")
 *     .config(config)
 *     .build()?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Portfolio Files
 *
 * - **JSON**: an array of records (or `{"practitioners": [...]}`) with nested notes, news and visits
 * - **JSON Lines**: one record per line
 * - **CSV**: the flat columns of [`schema::PractitionerCsvSchema`], without nested collections
 */

// Re-export error types from root
pub use error::{ErrorContext, ExportFormat, MedrepError, Result};

// Public modules
pub mod chart;
pub mod config;
pub mod data_types;
pub mod dataset;
pub mod enrichment;
pub mod error;
pub mod executor;
pub mod export;
pub mod insights;
pub mod intent;
pub mod plan;
pub mod reader;
pub mod sample;
pub mod schema;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use medrep::prelude::*;
/// ```
pub mod prelude {
    pub use crate::chart::{assemble, ChartHistory, ChartSpec};
    pub use crate::config::{ConfigBuilder, MedrepConfig};
    pub use crate::data_types::*;
    pub use crate::dataset::{DatasetStatistics, PractitionerDataset, PractitionerDatasetBuilder, QueryOutcome};
    pub use crate::enrichment::{enrich, EnrichedRecord};
    pub use crate::error::{MedrepError, Result};
    pub use crate::executor::{execute, ResultPoint};
    pub use crate::export::{CsvExporter, Exporter, JsonExporter};
    pub use crate::insights::insights;
    pub use crate::intent::{IntentCategory, IntentStrategy, KeywordIntentAnalyzer, QueryIntent};
    pub use crate::plan::{
        parse_external, Aggregation, ChartType, FilterPredicate, FilterValue, GroupDimension, Metric, Operator,
        PlanBuilder, QueryPlan, SortOrder, ValueFormat,
    };
    pub use crate::reader::PractitionerReader;
    pub use crate::sample::SampleGenerator;
    pub use crate::ExportFormat;
}

/// Domain constants
pub mod constants {
    /// News item type counted as a publication
    pub const PUBLICATION_NEWS_TYPE: &str = "publication";

    /// Days-since-contact value for practitioners never visited
    pub const NEVER_CONTACTED_DAYS: i64 = 999;

    /// Beyond this many days without contact a practitioner is high risk
    pub const HIGH_RISK_DAYS: i64 = 60;

    /// Beyond this many days without contact a practitioner is at least medium risk
    pub const MEDIUM_RISK_DAYS: i64 = 30;

    /// Loyalty below this is high risk
    pub const HIGH_RISK_LOYALTY: f64 = 5.0;

    /// Loyalty below this is at least medium risk
    pub const MEDIUM_RISK_LOYALTY: f64 = 7.0;

    /// Row limit for ungrouped answers that name none
    pub const DEFAULT_RESULT_LIMIT: usize = 20;

    /// Charts kept for follow-up questions
    pub const DEFAULT_HISTORY_CAPACITY: usize = 5;

    /// Collection name stamped on plans
    pub const DEFAULT_SOURCE: &str = "practitioners";

    /// Invalid records logged individually before only the total is reported
    pub const MAX_REPORTED_INVALID_RECORDS: usize = 10;
}

/// Common recipes and utility functions
pub mod cookbook {
    use crate::prelude::*;

    /// Top practitioners by a field, in that field's natural order
    ///
    /// Vingtile ranks ascending (1 is the best tier); every other field descending.
    ///
    /// # Example
    /// ```no_run
    /// # use medrep::prelude::*;
    /// # use medrep::cookbook::top_practitioners;
    /// # fn main() -> Result<()> {
    /// # let dataset = PractitionerDataset::load("data/portfolio.json")?;
    /// let best = top_practitioners(&dataset, Field::Vingtile, 10)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn top_practitioners(dataset: &PractitionerDataset, field: Field, n: usize) -> Result<Vec<ResultPoint>> {
        let order = field.default_order();
        let plan = QueryPlan::new(crate::constants::DEFAULT_SOURCE)
            .metric(Metric::for_field(field.clone()))
            .sort_by(field.as_str(), order)
            .limit(n)
            .chart(ChartType::HorizontalBar);
        Ok(dataset.run_plan(&plan)?.results)
    }

    /// Practitioner count on each side of the KOL split, always both buckets
    pub fn kol_split(dataset: &PractitionerDataset) -> Result<Vec<ResultPoint>> {
        let plan = QueryPlan::new(crate::constants::DEFAULT_SOURCE)
            .group_by(GroupDimension::Kol)
            .metric(Metric::count("count"))
            .chart(ChartType::Pie);
        Ok(dataset.run_plan(&plan)?.results)
    }

    /// Practitioners currently in the high risk tier
    pub fn at_risk_practitioners(dataset: &PractitionerDataset) -> Vec<&PractitionerRecord> {
        let now = dataset.reference_date();
        dataset
            .practitioners
            .iter()
            .filter(|p| enrich(p, now).risk_tier == RiskTier::High)
            .collect()
    }

    /// Total volume per city, in thousands, largest first
    pub fn volume_by_city(dataset: &PractitionerDataset) -> Result<Vec<ResultPoint>> {
        let plan = QueryPlan::new(crate::constants::DEFAULT_SOURCE)
            .group_by(GroupDimension::Field(Field::City))
            .metric(Metric::sum("volume", Field::Volume).with_format(ValueFormat::Thousands))
            .sort_by("volume", SortOrder::Desc);
        Ok(dataset.run_plan(&plan)?.results)
    }
}

#[cfg(test)]
mod tests {
    use super::cookbook::*;
    use super::prelude::*;
    use crate::sample::practitioner;
    use chrono::NaiveDate;

    fn dataset() -> PractitionerDataset {
        let mut kol = practitioner("P1", "Jean", "Dupont", "Lyon", 500_000.0);
        kol.is_kol = true;
        kol.vingtile = 1;
        kol.last_visit_date = NaiveDate::from_ymd_opt(2024, 5, 25);
        let mut middling = practitioner("P2", "Marie", "Martin", "Lyon", 300_000.0);
        middling.vingtile = 4;
        PractitionerDatasetBuilder::new()
            .records(vec![kol, middling, practitioner("P3", "Paul", "Durand", "Grenoble", 100_000.0)])
            .reference_date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .build()
            .unwrap()
    }

    #[test]
    fn test_top_practitioners_by_vingtile_is_ascending() {
        let rows = top_practitioners(&dataset(), Field::Vingtile, 2).unwrap();
        let names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Jean Dupont", "Marie Martin"]);
    }

    #[test]
    fn test_kol_split_has_both_buckets() {
        let rows = kol_split(&dataset()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.iter().map(ResultPoint::primary_value).sum::<f64>(), 3.0);
    }

    #[test]
    fn test_at_risk_skips_recent_loyal_practitioners() {
        let dataset = dataset();
        let ids: Vec<_> = at_risk_practitioners(&dataset).iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["P2", "P3"]);
    }

    #[test]
    fn test_volume_by_city() {
        let rows = volume_by_city(&dataset()).unwrap();
        assert_eq!(rows[0].name, "Lyon");
        assert_eq!(rows[0].value("volume"), Some(800.0));
        assert_eq!(rows[1].value("volume"), Some(100.0));
    }
}
