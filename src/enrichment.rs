/*!
 * Record enrichment
 *
 * Derives the fields filters and metrics need but the data source does not
 * store: days since last contact, relationship risk tier and publication count.
 * Enriched records borrow their source record and are rebuilt on every query,
 * so they can never drift from it.
 */

use chrono::NaiveDate;
use serde::Serialize;

use crate::constants::{
    HIGH_RISK_DAYS, HIGH_RISK_LOYALTY, MEDIUM_RISK_DAYS, MEDIUM_RISK_LOYALTY, NEVER_CONTACTED_DAYS,
};
use crate::data_types::*;

/// A practitioner record plus its derived fields
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedRecord<'a> {
    #[serde(flatten)]
    pub record: &'a PractitionerRecord,
    /// Whole days since the last visit, or [`NEVER_CONTACTED_DAYS`]
    pub days_since_contact: i64,
    pub risk_tier: RiskTier,
    pub publication_count: usize,
}

/// Enrich a single record relative to `now`
pub fn enrich(record: &PractitionerRecord, now: NaiveDate) -> EnrichedRecord<'_> {
    let days_since_contact = days_since_contact(record.last_visit_date, now);
    let risk_tier = risk_tier(days_since_contact, record.loyalty_score);
    let publication_count = record.news.iter().filter(|n| n.is_publication()).count();

    EnrichedRecord {
        record,
        days_since_contact,
        risk_tier,
        publication_count,
    }
}

/// Enrich a whole collection, preserving input order
pub fn enrich_all(records: &[PractitionerRecord], now: NaiveDate) -> Vec<EnrichedRecord<'_>> {
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        records.par_iter().map(|r| enrich(r, now)).collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        records.iter().map(|r| enrich(r, now)).collect()
    }
}

/// Whole days between the last visit and `now`; visits dated in the future count as 0
pub fn days_since_contact(last_visit: Option<NaiveDate>, now: NaiveDate) -> i64 {
    match last_visit {
        Some(date) => (now - date).num_days().max(0),
        None => NEVER_CONTACTED_DAYS,
    }
}

/// High is checked before medium: a record meeting both lands in high.
pub fn risk_tier(days_since_contact: i64, loyalty_score: f64) -> RiskTier {
    if days_since_contact > HIGH_RISK_DAYS || loyalty_score < HIGH_RISK_LOYALTY {
        RiskTier::High
    } else if days_since_contact > MEDIUM_RISK_DAYS || loyalty_score < MEDIUM_RISK_LOYALTY {
        RiskTier::Medium
    } else {
        RiskTier::Low
    }
}

impl<'a> EnrichedRecord<'a> {
    /// Whether the practitioner has never been visited
    pub fn never_contacted(&self) -> bool {
        self.record.last_visit_date.is_none()
    }

    /// Read any catalogued field as a flat value
    pub fn value(&self, field: &Field) -> FieldValue {
        let r = self.record;
        match field {
            Field::Id => FieldValue::Text(r.id.to_string()),
            Field::Name => FieldValue::Text(r.display_name()),
            Field::FirstName => FieldValue::Text(r.first_name.clone()),
            Field::LastName => FieldValue::Text(r.last_name.clone()),
            Field::Title => r.title.clone().map(FieldValue::Text).unwrap_or(FieldValue::Missing),
            Field::Specialty => FieldValue::Text(r.specialty.clone()),
            Field::IsKol => FieldValue::Bool(r.is_kol),
            Field::City => FieldValue::Text(r.city.clone()),
            Field::PostalCode => r.postal_code.clone().map(FieldValue::Text).unwrap_or(FieldValue::Missing),
            Field::Volume => FieldValue::Number(r.volume),
            Field::LoyaltyScore => FieldValue::Number(r.loyalty_score),
            Field::Vingtile => FieldValue::Number(f64::from(r.vingtile)),
            Field::PotentialGrowth => FieldValue::Number(r.potential_growth),
            Field::LastVisitDate => r.last_visit_date.map(FieldValue::Date).unwrap_or(FieldValue::Missing),
            Field::DaysSinceContact => FieldValue::Number(self.days_since_contact as f64),
            Field::RiskTier => FieldValue::Text(self.risk_tier.as_code().to_string()),
            Field::PublicationCount => FieldValue::Number(self.publication_count as f64),
            Field::HasPublications => FieldValue::Bool(self.publication_count > 0),
            Field::VisitCount => FieldValue::Number(r.visits.len() as f64),
            Field::NoteCount => FieldValue::Number(r.notes.len() as f64),
            Field::ProductsDiscussed => {
                let products = r.products_discussed();
                if products.is_empty() {
                    FieldValue::Missing
                } else {
                    FieldValue::Text(products.join(", "))
                }
            }
            Field::Unknown(_) => FieldValue::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::practitioner;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_never_contacted_is_sentinel_and_high_risk() {
        let mut record = practitioner("p1", "Jean", "Dupont", "Lyon", 100_000.0);
        record.last_visit_date = None;
        record.loyalty_score = 10.0;

        let enriched = enrich(&record, date("2024-06-01"));
        assert_eq!(enriched.days_since_contact, 999);
        assert_eq!(enriched.risk_tier, RiskTier::High);
        assert!(enriched.never_contacted());
    }

    #[test]
    fn test_future_visit_clamps_to_zero() {
        let mut record = practitioner("p1", "Jean", "Dupont", "Lyon", 100_000.0);
        record.last_visit_date = Some(date("2024-07-01"));
        let enriched = enrich(&record, date("2024-06-01"));
        assert_eq!(enriched.days_since_contact, 0);
    }

    #[test]
    fn test_risk_tier_is_monotonic_in_days_for_loyal_practitioners() {
        for days in 0..=120 {
            let expected = if days <= 30 {
                RiskTier::Low
            } else if days <= 60 {
                RiskTier::Medium
            } else {
                RiskTier::High
            };
            assert_eq!(risk_tier(days, 8.0), expected, "days = {}", days);
        }
    }

    #[test]
    fn test_high_wins_over_medium() {
        // 45 days alone is medium, loyalty 4 alone is high
        assert_eq!(risk_tier(45, 4.0), RiskTier::High);
        assert_eq!(risk_tier(10, 6.0), RiskTier::Medium);
    }

    #[test]
    fn test_publication_count_only_counts_publications() {
        let mut record = practitioner("p1", "Jean", "Dupont", "Lyon", 100_000.0);
        record.news = vec![
            NewsItem { title: "Trial results".into(), kind: "Publication".into(), date: None, summary: None },
            NewsItem { title: "Congress".into(), kind: "event".into(), date: None, summary: None },
            NewsItem { title: "Review".into(), kind: "publication".into(), date: None, summary: None },
        ];
        let enriched = enrich(&record, date("2024-06-01"));
        assert_eq!(enriched.publication_count, 2);
        assert_eq!(enriched.value(&Field::HasPublications), FieldValue::Bool(true));
    }

    #[test]
    fn test_enrich_all_preserves_order() {
        let records: Vec<_> = (0..50)
            .map(|i| practitioner(&format!("p{}", i), "A", "B", "Lyon", i as f64))
            .collect();
        let enriched = enrich_all(&records, date("2024-06-01"));
        let ids: Vec<_> = enriched.iter().map(|e| e.record.id.as_str()).collect();
        let expected: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_unknown_field_reads_missing() {
        let record = practitioner("p1", "Jean", "Dupont", "Lyon", 100_000.0);
        let enriched = enrich(&record, date("2024-06-01"));
        assert!(enriched.value(&Field::Unknown("shoeSize".into())).is_missing());
        assert_eq!(enriched.value(&Field::Vingtile), FieldValue::Number(f64::from(record.vingtile)));
    }
}
