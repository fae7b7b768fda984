/*!
 * Sample portfolios
 *
 * Deterministic, seeded generation of practitioner records for demos,
 * benchmarks and tests. The same seed and reference date always produce the
 * same portfolio.
 */

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::constants::PUBLICATION_NEWS_TYPE;
use crate::data_types::*;
use crate::intent::{product_names, specialty_labels};

const FIRST_NAMES: &[&str] = &[
    "Jean", "Marie", "Pierre", "Sophie", "Philippe", "Isabelle", "Nicolas", "Nathalie", "François", "Catherine",
    "Claire", "Antoine", "Julie", "Camille", "Hélène", "Mathieu", "Élodie", "Olivier", "Aurélie", "Julien",
];
const LAST_NAMES: &[&str] = &[
    "Martin", "Bernard", "Dubois", "Robert", "Richard", "Durand", "Dupont", "Lefebvre", "Moreau", "Simon",
    "Garcia", "Fournier", "Girard", "Bonnet", "Mercier", "Blanchard", "Chevalier", "Faure", "Rousseau", "Perrin",
];
const CITIES: &[(&str, &str)] = &[
    ("Lyon", "69003"),
    ("Villeurbanne", "69100"),
    ("Grenoble", "38000"),
    ("Saint-Étienne", "42000"),
    ("Annecy", "74000"),
    ("Chambéry", "73000"),
    ("Valence", "26000"),
    ("Clermont-Ferrand", "63000"),
];
const NEWS_KINDS: &[&str] = &[PUBLICATION_NEWS_TYPE, "event", "award", "congress"];

/// A minimal record for fixtures: vingtile 10, loyalty 8, never visited
pub fn practitioner(id: &str, first_name: &str, last_name: &str, city: &str, volume: f64) -> PractitionerRecord {
    PractitionerRecord {
        id: PractitionerId::new(id),
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        title: Some("Dr.".to_string()),
        specialty: "General Practitioner".to_string(),
        is_kol: false,
        city: city.to_string(),
        postal_code: None,
        volume,
        loyalty_score: 8.0,
        vingtile: 10,
        potential_growth: 10.0,
        last_visit_date: None,
        notes: Vec::new(),
        news: Vec::new(),
        visits: Vec::new(),
    }
}

/// Seeded generator of realistic portfolios
#[derive(Debug, Clone)]
pub struct SampleGenerator {
    rng: StdRng,
    reference_date: NaiveDate,
    kol_ratio: f64,
}

impl SampleGenerator {
    /// Create a generator; visits are dated relative to today
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            reference_date: chrono::Local::now().date_naive(),
            kol_ratio: 0.15,
        }
    }

    /// Date visits are counted back from
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = date;
        self
    }

    /// Share of generated practitioners flagged as KOL, clamped to 0..=1
    pub fn with_kol_ratio(mut self, ratio: f64) -> Self {
        self.kol_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    /// Generate `count` records with ids `P0001`, `P0002`, ...
    pub fn generate(&mut self, count: usize) -> Vec<PractitionerRecord> {
        (1..=count).map(|i| self.record(i)).collect()
    }

    fn pick<'a>(&mut self, items: &'a [&'a str]) -> &'a str {
        items[self.rng.gen_range(0..items.len())]
    }

    fn record(&mut self, index: usize) -> PractitionerRecord {
        let specialties: Vec<&str> = specialty_labels().collect();
        let products: Vec<&str> = product_names().collect();
        let (city, postal_code) = CITIES[self.rng.gen_range(0..CITIES.len())];

        let is_kol = self.rng.gen_bool(self.kol_ratio);
        let vingtile: u8 = self.rng.gen_range(1..=20);
        // better vingtiles carry more volume
        let volume_ceiling = 1_000_000.0 / f64::from(vingtile);
        let volume = (self.rng.gen_range(0.2..1.0) * volume_ceiling).round();
        let loyalty_score = (self.rng.gen_range(0.0..10.0_f64) * 10.0).round() / 10.0;
        let potential_growth = (self.rng.gen_range(0.0..50.0_f64) * 10.0).round() / 10.0;

        let visits: Vec<Visit> = (0..self.rng.gen_range(0..5))
            .map(|_| {
                let days_ago = self.rng.gen_range(0..180);
                let discussed = (0..self.rng.gen_range(0..3)).map(|_| self.pick(&products).to_string()).collect();
                Visit {
                    date: self.reference_date - Duration::days(days_ago),
                    summary: None,
                    products: discussed,
                }
            })
            .collect();
        let last_visit_date = visits.iter().map(|v| v.date).max();

        let news = (0..self.rng.gen_range(0..if is_kol { 5 } else { 2 }))
            .map(|n| {
                let kind = self.pick(NEWS_KINDS).to_string();
                NewsItem {
                    title: format!("{} #{}", kind, n + 1),
                    kind,
                    date: Some(self.reference_date - Duration::days(self.rng.gen_range(0..720))),
                    summary: None,
                }
            })
            .collect();

        let notes = (0..self.rng.gen_range(0..3))
            .map(|_| Note {
                date: Some(self.reference_date - Duration::days(self.rng.gen_range(0..365))),
                content: "Follow-up requested".to_string(),
            })
            .collect();

        PractitionerRecord {
            id: PractitionerId::new(format!("P{:04}", index)),
            first_name: self.pick(FIRST_NAMES).to_string(),
            last_name: self.pick(LAST_NAMES).to_string(),
            title: Some("Dr.".to_string()),
            specialty: self.pick(&specialties).to_string(),
            is_kol,
            city: city.to_string(),
            postal_code: Some(postal_code.to_string()),
            volume,
            loyalty_score,
            vingtile,
            potential_growth,
            last_visit_date,
            notes,
            news,
            visits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    #[test]
    fn test_same_seed_same_portfolio() {
        let a = SampleGenerator::new(7).with_reference_date(reference()).generate(25);
        let b = SampleGenerator::new(7).with_reference_date(reference()).generate(25);
        assert_eq!(a, b);
    }

    #[test]
    fn test_generated_records_respect_ranges() {
        let records = SampleGenerator::new(42).with_reference_date(reference()).generate(200);
        assert_eq!(records.len(), 200);
        for record in &records {
            assert!((1..=20).contains(&record.vingtile));
            assert!((0.0..=10.0).contains(&record.loyalty_score));
            assert!(record.volume >= 0.0);
            if let Some(date) = record.last_visit_date {
                assert!(date <= reference());
            }
        }
        assert_eq!(records[0].id.as_str(), "P0001");
    }

    #[test]
    fn test_kol_ratio_extremes() {
        let none = SampleGenerator::new(1).with_kol_ratio(0.0).generate(50);
        assert!(none.iter().all(|r| !r.is_kol));
        let all = SampleGenerator::new(1).with_kol_ratio(1.0).generate(50);
        assert!(all.iter().all(|r| r.is_kol));
    }
}
