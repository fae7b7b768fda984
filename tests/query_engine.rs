/*!
 * End-to-end tests for the query engine
 *
 * Exercises the public API the way an application does: load or build a
 * portfolio, ask questions or run JSON plans, read rows and insights.
 */

use chrono::{Duration, NaiveDate};
use medrep::chart::ChartHistory;
use medrep::enrichment::enrich;
use medrep::insights::NO_DATA_MESSAGE;
use medrep::prelude::*;
use medrep::sample::practitioner;
use serde_json::json;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

/// Lyon holds 500k + 300k of volume, Grenoble 100k
fn three_cities() -> PractitionerDataset {
    let records = vec![
        practitioner("P1", "Jean", "Dupont", "Lyon", 500_000.0),
        practitioner("P2", "Marie", "Martin", "Lyon", 300_000.0),
        practitioner("P3", "Paul", "Durand", "Grenoble", 100_000.0),
    ];
    PractitionerDatasetBuilder::new()
        .records(records)
        .reference_date(today())
        .build()
        .unwrap()
}

fn sample_portfolio(count: usize) -> PractitionerDataset {
    let records = SampleGenerator::new(2024).with_reference_date(today()).generate(count);
    PractitionerDatasetBuilder::new()
        .records(records)
        .reference_date(today())
        .build()
        .unwrap()
}

#[test]
fn test_never_visited_is_high_risk() {
    let record = practitioner("P1", "Jean", "Dupont", "Lyon", 1.0);
    let enriched = enrich(&record, today());
    assert_eq!(enriched.days_since_contact, 999);
    assert_eq!(enriched.risk_tier, RiskTier::High);
}

#[test]
fn test_risk_tier_follows_recency_for_loyal_practitioners() {
    let mut record = practitioner("P1", "Jean", "Dupont", "Lyon", 1.0);
    record.loyalty_score = 8.0;
    let tier_after = |days: i64, record: &mut PractitionerRecord| {
        record.last_visit_date = Some(today() - Duration::days(days));
        enrich(record, today()).risk_tier
    };
    assert_eq!(tier_after(0, &mut record), RiskTier::Low);
    assert_eq!(tier_after(30, &mut record), RiskTier::Low);
    assert_eq!(tier_after(31, &mut record), RiskTier::Medium);
    assert_eq!(tier_after(60, &mut record), RiskTier::Medium);
    assert_eq!(tier_after(61, &mut record), RiskTier::High);
}

#[test]
fn test_kol_split_covers_every_record() {
    let dataset = sample_portfolio(200);
    let plan = QueryPlan::new("practitioners")
        .group_by(GroupDimension::Kol)
        .metric(Metric::count("count"));
    let rows = execute(&plan, &dataset.practitioners, today()).unwrap();

    let mut names: Vec<_> = rows.iter().map(|r| r.name.as_str()).collect();
    names.sort_unstable();
    assert_eq!(names, vec!["KOL", "Non-KOL"]);
    assert_eq!(rows.iter().map(ResultPoint::primary_value).sum::<f64>(), 200.0);
}

#[test]
fn test_top_n_then_group_counts_n_records() {
    let dataset = sample_portfolio(200);
    let plan = QueryPlan::new("practitioners")
        .group_by(GroupDimension::Field(Field::City))
        .metric(Metric::count("count"))
        .sort_by("volume", SortOrder::Desc)
        .limit(15);
    let rows = execute(&plan, &dataset.practitioners, today()).unwrap();
    assert_eq!(rows.iter().map(ResultPoint::primary_value).sum::<f64>(), 15.0);
}

#[test]
fn test_rank_by_one_field_grouped_by_another() {
    let dataset = sample_portfolio(200);
    let outcome = dataset.ask("top 15 by vingtile by city").unwrap();
    assert_eq!(outcome.plan.group_by, Some(GroupDimension::Field(Field::City)));
    assert_eq!(outcome.plan.sort_by.as_deref(), Some("vingtile"));
    assert_eq!(outcome.results.iter().map(ResultPoint::primary_value).sum::<f64>(), 15.0);
}

#[test]
fn test_execute_is_idempotent() {
    let dataset = sample_portfolio(120);
    let plan = QueryPlan::new("practitioners")
        .group_by(GroupDimension::VisitRecency)
        .metric(Metric::average("loyalty", Field::LoyaltyScore));
    let first = execute(&plan, &dataset.practitioners, today()).unwrap();
    let second = execute(&plan, &dataset.practitioners, today()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_question_without_entities_returns_rows() {
    let dataset = sample_portfolio(50);
    let outcome = dataset.ask("show me the practitioners").unwrap();
    let intent = outcome.intent.as_ref().unwrap();
    assert!(intent.entities.is_empty());
    assert!(!outcome.results.is_empty());
    assert!(outcome.results.len() <= medrep::constants::DEFAULT_RESULT_LIMIT);
}

#[test]
fn test_no_match_yields_single_insight() {
    let dataset = three_cities();
    let plan = QueryPlan::new("practitioners")
        .filter(FilterPredicate::equals(Field::City, FilterValue::text("Nowhere")))
        .metric(Metric::count("count"));
    let outcome = dataset.run_plan(&plan).unwrap();
    assert!(outcome.results.is_empty());
    assert_eq!(outcome.insights, vec![NO_DATA_MESSAGE.to_string()]);
}

#[test]
fn test_sum_volume_by_city_in_thousands() {
    let spec = json!({
        "chartType": "bar",
        "query": {
            "groupBy": "city",
            "metrics": [{"name": "value", "field": "volume", "aggregation": "sum", "format": "thousands"}],
            "sortBy": "value",
            "sortOrder": "desc"
        }
    });
    let outcome = three_cities().run_spec(&spec).unwrap();
    let rows: Vec<_> = outcome.results.iter().map(|r| (r.name.as_str(), r.value("value"))).collect();
    assert_eq!(rows, vec![("Lyon", Some(800.0)), ("Grenoble", Some(100.0))]);
}

#[test]
fn test_limit_before_group_keeps_top_records() {
    let spec = json!({
        "query": {
            "groupBy": "city",
            "metrics": [{"name": "count", "aggregation": "count"}],
            "sortBy": "volume",
            "sortOrder": "desc",
            "limit": 2
        }
    });
    let outcome = three_cities().run_spec(&spec).unwrap();
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].name, "Lyon");
    assert_eq!(outcome.results[0].value("count"), Some(2.0));
}

#[test]
fn test_ask_top_n_in_a_city() {
    let mut records: Vec<PractitionerRecord> = (1..=7)
        .map(|i| practitioner(&format!("L{}", i), "Claire", "Bonnet", "Lyon", f64::from(i) * 10_000.0))
        .collect();
    records.push(practitioner("G1", "Luc", "Mercier", "Grenoble", 1_000_000.0));
    let dataset = PractitionerDataset::new(records);

    let outcome = dataset.ask("top 5 practitioners by volume in Lyon").unwrap();
    let intent = outcome.intent.as_ref().unwrap();
    assert_eq!(intent.category, IntentCategory::Rank);
    assert_eq!(intent.limit, Some(5));
    assert_eq!(intent.entities.cities, vec!["Lyon".to_string()]);

    assert_eq!(outcome.results.len(), 5);
    let values: Vec<f64> = outcome.results.iter().map(ResultPoint::primary_value).collect();
    assert_eq!(values, vec![70.0, 60.0, 50.0, 40.0, 30.0]);
}

#[test]
fn test_french_count_question() {
    let mut kol = practitioner("P1", "Jean", "Dupont", "Grenoble", 1.0);
    kol.is_kol = true;
    let records = vec![
        kol,
        practitioner("P2", "Marie", "Martin", "Grenoble", 1.0),
        practitioner("P3", "Paul", "Durand", "Lyon", 1.0),
    ];
    let dataset = PractitionerDataset::new(records);

    let outcome = dataset.ask("Combien de KOL à Grenoble ?").unwrap();
    assert_eq!(outcome.intent.as_ref().map(|i| i.category), Some(IntentCategory::Count));
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].primary_value(), 1.0);
}

#[test]
fn test_compound_city_is_not_a_first_name() {
    let records = vec![
        practitioner("P1", "Étienne", "Faure", "Lyon", 1.0),
        practitioner("P2", "Anne", "Perrin", "Saint-Étienne", 1.0),
    ];
    let dataset = PractitionerDataset::new(records);

    let outcome = dataset.ask("how many practitioners in Saint-Étienne").unwrap();
    let intent = outcome.intent.as_ref().unwrap();
    assert_eq!(intent.entities.cities, vec!["Saint-Étienne".to_string()]);
    assert!(intent.entities.first_names.is_empty());
    assert_eq!(outcome.results[0].primary_value(), 1.0);
}

#[test]
fn test_malformed_external_plan_degrades() {
    let spec = json!({
        "chartType": "sparkline",
        "query": {
            "filters": {"field": "city", "operator": "eq", "value": "Lyon"},
            "metrics": {"name": "n", "aggregation": "median"},
            "limit": "10"
        }
    });
    let parsed = parse_external(&spec);
    assert!(parsed.chart_type.is_defaulted());
    assert!(parsed.filters.is_coerced());
    assert!(parsed.metrics.is_coerced());

    let outcome = three_cities().run_spec(&spec).unwrap();
    assert_eq!(outcome.plan.chart_type, ChartType::Bar);
    assert_eq!(outcome.plan.limit, Some(10));
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.iter().all(|r| r.value("n") == Some(1.0)));
}

#[test]
fn test_chart_history_keeps_recent_answers() {
    let dataset = three_cities();
    let mut history = ChartHistory::new(dataset.config().history_capacity);
    for question in ["how many practitioners by city", "top 2 by volume", "who is Jean Dupont"] {
        history.push(dataset.chart_for(question).unwrap());
    }
    assert_eq!(history.len(), 3);
    assert_eq!(history.latest().and_then(|c| c.description.as_deref()), Some("who is Jean Dupont"));
}

#[test]
fn test_load_json_portfolio_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portfolio.json");
    let records = SampleGenerator::new(9).with_reference_date(today()).generate(40);
    medrep::export::export_practitioners(&records, &path, ExportFormat::Json).unwrap();

    let dataset = PractitionerDatasetBuilder::new()
        .data(&path)
        .reference_date(today())
        .build()
        .unwrap();
    assert_eq!(dataset.practitioners, records);
    assert_eq!(dataset.statistics().total_practitioners, 40);
}
