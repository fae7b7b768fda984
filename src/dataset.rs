/*!
 * Unified dataset API for practitioner portfolios
 *
 * Owns a loaded portfolio with its lookup indexes and wires the query
 * pipeline end to end: question → intent → plan → results → insights.
 */

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, debug_span, info};

use crate::chart::{assemble, ChartSpec};
use crate::config::MedrepConfig;
use crate::data_types::*;
use crate::enrichment::enrich_all;
use crate::executor::{execute, ResultPoint};
use crate::insights::insights;
use crate::intent::{IntentStrategy, KeywordIntentAnalyzer, QueryIntent, Vocabulary};
use crate::plan::{parse_external, PlanBuilder, QueryPlan};
use crate::reader::PractitionerReader;
use crate::{MedrepError, Result};

/// Builder for loading a practitioner dataset
///
/// # Example
/// ```no_run
/// # use medrep::dataset::PractitionerDatasetBuilder;
/// let dataset = PractitionerDatasetBuilder::new()
///     .data("data/portfolio.json")
///     .skip_invalid_records(true)
///     .build()?;
/// # Ok::<(), medrep::MedrepError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct PractitionerDatasetBuilder {
    data_path: Option<PathBuf>,
    records: Option<Vec<PractitionerRecord>>,
    config: MedrepConfig,
}

impl PractitionerDatasetBuilder {
    /// Create a new dataset builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the path to the portfolio file (.json, .jsonl or .csv)
    pub fn data<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Use records already in memory instead of a file
    pub fn records(mut self, records: Vec<PractitionerRecord>) -> Self {
        self.records = Some(records);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: MedrepConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable or disable skipping invalid records
    pub fn skip_invalid_records(mut self, skip: bool) -> Self {
        self.config.skip_invalid_records = skip;
        self
    }

    /// Enable or disable automatic index building
    pub fn build_indexes(mut self, build: bool) -> Self {
        self.config.index_on_load = build;
        self
    }

    /// Pin the date recency is computed against
    pub fn reference_date(mut self, date: NaiveDate) -> Self {
        self.config.reference_date = Some(date);
        self
    }

    /// Build the dataset, loading the file if one was given
    pub fn build(self) -> Result<PractitionerDataset> {
        let practitioners = match (self.records, &self.data_path) {
            (Some(records), _) => records,
            (None, Some(path)) => PractitionerReader::new()
                .with_skip_invalid_records(self.config.skip_invalid_records)
                .with_record_validation(self.config.validate_records)
                .load(path)?,
            (None, None) => {
                return Err(MedrepError::Custom {
                    message: "No practitioner data specified".to_string(),
                    suggestion: Some("Use .data() to point at a portfolio file or .records() to pass records".to_string()),
                })
            }
        };

        let dataset = PractitionerDataset::with_config(practitioners, self.config);
        info!(
            practitioners = dataset.len(),
            indexed = dataset.id_index.is_some(),
            "dataset ready"
        );
        Ok(dataset)
    }
}

/// Result of answering one question or spec
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOutcome {
    /// Present when the plan came from a free-text question
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<QueryIntent>,
    pub plan: QueryPlan,
    pub results: Vec<ResultPoint>,
    pub insights: Vec<String>,
}

impl QueryOutcome {
    /// Package the outcome for a renderer
    pub fn into_chart(self, title: Option<&str>, description: Option<&str>) -> ChartSpec {
        assemble(&self.plan, title, description, self.results, self.insights)
    }
}

/// A loaded portfolio and the analyzer that knows its names
#[derive(Debug, Clone)]
pub struct PractitionerDataset {
    /// Practitioner records in load order
    pub practitioners: Vec<PractitionerRecord>,
    config: MedrepConfig,
    analyzer: KeywordIntentAnalyzer,

    // Indexes for fast lookup
    id_index: Option<HashMap<PractitionerId, usize>>,
    city_index: Option<HashMap<String, Vec<usize>>>,
}

impl PractitionerDataset {
    /// Dataset with the default configuration
    pub fn new(practitioners: Vec<PractitionerRecord>) -> Self {
        Self::with_config(practitioners, MedrepConfig::default())
    }

    /// Dataset with an explicit configuration
    pub fn with_config(practitioners: Vec<PractitionerRecord>, config: MedrepConfig) -> Self {
        let vocabulary = Vocabulary::from_records(&practitioners)
            .with_defaults()
            .with_cities(&config.extra_cities)
            .with_first_names(&config.extra_first_names)
            .with_last_names(&config.extra_last_names);

        let mut dataset = Self {
            practitioners,
            analyzer: KeywordIntentAnalyzer::new(vocabulary),
            config,
            id_index: None,
            city_index: None,
        };
        if dataset.config.index_on_load {
            dataset.build_indexes();
        }
        dataset
    }

    /// Load a portfolio file with the default configuration
    ///
    /// # Example
    /// ```no_run
    /// # use medrep::dataset::PractitionerDataset;
    /// let dataset = PractitionerDataset::load("data/portfolio.json")?;
    /// # Ok::<(), medrep::MedrepError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        PractitionerDatasetBuilder::new().data(path).build()
    }

    /// Get the total number of practitioners
    pub fn len(&self) -> usize {
        self.practitioners.len()
    }

    /// Check if the dataset is empty
    pub fn is_empty(&self) -> bool {
        self.practitioners.is_empty()
    }

    pub fn config(&self) -> &MedrepConfig {
        &self.config
    }

    pub fn analyzer(&self) -> &KeywordIntentAnalyzer {
        &self.analyzer
    }

    /// The "today" used for recency
    pub fn reference_date(&self) -> NaiveDate {
        self.config.reference_date_or_today()
    }

    /// Build indexes for fast lookups
    pub fn build_indexes(&mut self) {
        let mut id_index = HashMap::with_capacity(self.practitioners.len());
        let mut city_index: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, practitioner) in self.practitioners.iter().enumerate() {
            id_index.entry(practitioner.id.clone()).or_insert(idx);
            city_index.entry(normalize_text(&practitioner.city)).or_default().push(idx);
        }

        self.id_index = Some(id_index);
        self.city_index = Some(city_index);
    }

    /// Get a practitioner by id (O(1) if indexed)
    pub fn get_by_id(&self, id: &PractitionerId) -> Option<&PractitionerRecord> {
        if let Some(index) = &self.id_index {
            index.get(id).and_then(|&idx| self.practitioners.get(idx))
        } else {
            self.practitioners.iter().find(|p| &p.id == id)
        }
    }

    /// Get all practitioners in a city, ignoring case and accents
    pub fn get_by_city(&self, city: &str) -> Vec<&PractitionerRecord> {
        let key = normalize_text(city);
        if let Some(index) = &self.city_index {
            index
                .get(&key)
                .map(|indices| indices.iter().filter_map(|&idx| self.practitioners.get(idx)).collect())
                .unwrap_or_default()
        } else {
            self.practitioners.iter().filter(|p| normalize_text(&p.city) == key).collect()
        }
    }

    fn plan_builder(&self) -> PlanBuilder {
        PlanBuilder::new().with_default_limit(self.config.default_limit)
    }

    /// Read a question without running it
    pub fn analyze(&self, question: &str) -> QueryIntent {
        self.analyzer.analyze(question)
    }

    /// Answer a free-text question
    ///
    /// # Example
    /// ```no_run
    /// # use medrep::dataset::PractitionerDataset;
    /// let dataset = PractitionerDataset::load("data/portfolio.json")?;
    /// let outcome = dataset.ask("top 10 practitioners by volume in Lyon")?;
    /// for insight in &outcome.insights {
    ///     println!("{}", insight);
    /// }
    /// # Ok::<(), medrep::MedrepError>(())
    /// ```
    pub fn ask(&self, question: &str) -> Result<QueryOutcome> {
        let _span = debug_span!("ask", question = %question).entered();
        let intent = self.analyze(question);
        let plan = self.plan_builder().from_intent(&intent)?;
        let mut outcome = self.run_plan(&plan)?;
        outcome.intent = Some(intent);
        Ok(outcome)
    }

    /// Run a loosely-typed JSON plan
    pub fn run_spec(&self, spec: &Value) -> Result<QueryOutcome> {
        let _span = debug_span!("run_spec").entered();
        let plan = self.plan_builder().from_external(spec)?;
        self.run_plan(&plan)
    }

    /// Run a JSON plan and package it as a chart, keeping its title and description
    pub fn chart_for_spec(&self, spec: &Value) -> Result<ChartSpec> {
        let parsed = parse_external(spec);
        let title = parsed.title.clone();
        let description = parsed.description.clone();
        let plan = parsed.into_plan(crate::constants::DEFAULT_SOURCE)?;
        let outcome = self.run_plan(&plan)?;
        Ok(outcome.into_chart(title.as_deref(), description.as_deref()))
    }

    /// Answer a question and package it as a chart
    pub fn chart_for(&self, question: &str) -> Result<ChartSpec> {
        let outcome = self.ask(question)?;
        Ok(outcome.into_chart(None, Some(question)))
    }

    /// Execute an already-built plan
    pub fn run_plan(&self, plan: &QueryPlan) -> Result<QueryOutcome> {
        let results = execute(plan, &self.practitioners, self.reference_date())?;
        let insights = insights(plan, &results);
        debug!(rows = results.len(), insights = insights.len(), "answered");
        Ok(QueryOutcome {
            intent: None,
            plan: plan.clone(),
            results,
            insights,
        })
    }

    /// Get dataset statistics
    pub fn statistics(&self) -> DatasetStatistics {
        DatasetStatistics::from_dataset(self)
    }
}

/// Dataset statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetStatistics {
    pub total_practitioners: usize,
    pub kol_practitioners: usize,
    pub cities_represented: usize,
    pub specialties_represented: usize,
    pub total_volume: f64,
    pub average_loyalty: f64,
    pub never_contacted: usize,
    pub with_publications: usize,
    /// Practitioners per risk tier, as of the reference date
    pub risk_tiers: BTreeMap<RiskTier, usize>,
    pub reference_date: NaiveDate,
}

impl DatasetStatistics {
    /// Calculate statistics from a dataset
    pub fn from_dataset(dataset: &PractitionerDataset) -> Self {
        let reference_date = dataset.reference_date();
        let enriched = enrich_all(&dataset.practitioners, reference_date);

        let mut cities = HashSet::new();
        let mut specialties = HashSet::new();
        let mut risk_tiers = BTreeMap::new();
        let mut stats = Self {
            total_practitioners: dataset.len(),
            kol_practitioners: 0,
            cities_represented: 0,
            specialties_represented: 0,
            total_volume: 0.0,
            average_loyalty: 0.0,
            never_contacted: 0,
            with_publications: 0,
            risk_tiers: BTreeMap::new(),
            reference_date,
        };

        for record in &enriched {
            let practitioner = record.record;
            if practitioner.is_kol {
                stats.kol_practitioners += 1;
            }
            if record.never_contacted() {
                stats.never_contacted += 1;
            }
            if record.publication_count > 0 {
                stats.with_publications += 1;
            }
            stats.total_volume += practitioner.volume;
            stats.average_loyalty += practitioner.loyalty_score;
            cities.insert(normalize_text(&practitioner.city));
            specialties.insert(normalize_text(&practitioner.specialty));
            *risk_tiers.entry(record.risk_tier).or_insert(0) += 1;
        }

        if stats.total_practitioners > 0 {
            stats.average_loyalty /= stats.total_practitioners as f64;
        }
        stats.cities_represented = cities.len();
        stats.specialties_represented = specialties.len();
        stats.risk_tiers = risk_tiers;
        stats
    }

    fn share(&self, count: usize) -> f64 {
        if self.total_practitioners == 0 {
            0.0
        } else {
            count as f64 / self.total_practitioners as f64 * 100.0
        }
    }

    /// Print a formatted summary of the statistics
    pub fn print_summary(&self) {
        println!("=== Portfolio Statistics ({}) ===", self.reference_date);
        println!("Total Practitioners: {}", self.total_practitioners);
        println!(
            "  KOL: {} ({:.1}%)",
            self.kol_practitioners,
            self.share(self.kol_practitioners)
        );
        println!(
            "  With publications: {} ({:.1}%)",
            self.with_publications,
            self.share(self.with_publications)
        );
        println!(
            "  Never contacted: {} ({:.1}%)",
            self.never_contacted,
            self.share(self.never_contacted)
        );
        println!("Cities Represented: {}", self.cities_represented);
        println!("Specialties Represented: {}", self.specialties_represented);
        println!("Total Volume: {}k", format_number((self.total_volume / 1000.0).round()));
        println!("Average Loyalty: {:.1}", self.average_loyalty);
        println!("Risk Tiers:");
        for (tier, count) in self.risk_tiers.iter().rev() {
            println!("  {}: {} ({:.1}%)", tier.label(), count, self.share(*count));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::practitioner;
    use serde_json::json;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn dataset() -> PractitionerDataset {
        let mut lyon_kol = practitioner("P1", "Jean", "Dupont", "Lyon", 500_000.0);
        lyon_kol.is_kol = true;
        lyon_kol.last_visit_date = NaiveDate::from_ymd_opt(2024, 5, 20);
        let records = vec![
            lyon_kol,
            practitioner("P2", "Marie", "Martin", "Lyon", 300_000.0),
            practitioner("P3", "Paul", "Durand", "Grenoble", 100_000.0),
        ];
        PractitionerDatasetBuilder::new()
            .records(records)
            .reference_date(reference())
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_data() {
        assert!(PractitionerDatasetBuilder::new().build().is_err());
    }

    #[test]
    fn test_lookups() {
        let dataset = dataset();
        let id = PractitionerId::new("P3");
        assert_eq!(dataset.get_by_id(&id).map(|p| p.city.as_str()), Some("Grenoble"));
        assert_eq!(dataset.get_by_city("LYON").len(), 2);

        let unindexed = PractitionerDatasetBuilder::new()
            .records(dataset.practitioners.clone())
            .build_indexes(false)
            .build()
            .unwrap();
        assert_eq!(unindexed.get_by_id(&id).map(|p| p.city.as_str()), Some("Grenoble"));
        assert_eq!(unindexed.get_by_city("lyon").len(), 2);
    }

    #[test]
    fn test_ask_counts_kols() {
        let outcome = dataset().ask("How many KOLs?").unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].primary_value(), 1.0);
        assert!(outcome.intent.is_some());
    }

    #[test]
    fn test_ask_without_entities_returns_everyone() {
        let outcome = dataset().ask("show me the practitioners").unwrap();
        assert_eq!(outcome.results.len(), 3);
    }

    #[test]
    fn test_run_spec_groups_by_city() {
        let spec = json!({
            "chartType": "bar",
            "query": {
                "groupBy": "city",
                "metrics": [{"name": "value", "field": "volume", "aggregation": "sum", "format": "thousands"}],
                "sortBy": "value",
                "sortOrder": "desc"
            }
        });
        let outcome = dataset().run_spec(&spec).unwrap();
        assert_eq!(outcome.results[0].name, "Lyon");
        assert_eq!(outcome.results[0].value("value"), Some(800.0));
        assert_eq!(outcome.results[1].value("value"), Some(100.0));
        assert_eq!(outcome.insights[0], "Lyon leads with 800k value");
    }

    #[test]
    fn test_chart_for_spec_keeps_title() {
        let spec = json!({
            "title": "Volume by city",
            "query": {"groupBy": "city", "metrics": {"name": "count", "aggregation": "count"}}
        });
        let chart = dataset().chart_for_spec(&spec).unwrap();
        assert_eq!(chart.title, "Volume by city");
        assert_eq!(chart.data.len(), 2);
    }

    #[test]
    fn test_run_spec_without_metrics_is_rejected() {
        let err = dataset().run_spec(&json!({"query": {"groupBy": "city"}})).unwrap_err();
        assert!(err.is_invalid_plan());
    }

    #[test]
    fn test_statistics() {
        let stats = dataset().statistics();
        assert_eq!(stats.total_practitioners, 3);
        assert_eq!(stats.kol_practitioners, 1);
        assert_eq!(stats.cities_represented, 2);
        assert_eq!(stats.never_contacted, 2);
        // two never visited, one seen 12 days ago with loyalty 8
        assert_eq!(stats.risk_tiers.get(&RiskTier::High), Some(&2));
        assert_eq!(stats.risk_tiers.get(&RiskTier::Low), Some(&1));
        assert_eq!(stats.total_volume, 900_000.0);
    }
}
