/*!
 * Data type definitions for practitioner records
 *
 * This module contains the record shape the query engine is specialized to,
 * the closed catalogue of queryable fields, and the flattened value type that
 * filters, groupings and metrics read.
 */

use serde::{Deserialize, Serialize};
use chrono::NaiveDate;
use std::fmt;

/// Stable, unique practitioner identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PractitionerId(pub String);

impl PractitionerId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        PractitionerId(id.into())
    }

    /// Get the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PractitionerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Free-text note attached to a practitioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub content: String,
}

/// News or publication item about a practitioner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    /// Item kind, e.g. "publication", "event", "award"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub summary: Option<String>,
}

impl NewsItem {
    pub fn is_publication(&self) -> bool {
        self.kind.trim().eq_ignore_ascii_case(crate::constants::PUBLICATION_NEWS_TYPE)
    }
}

/// A past visit report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visit {
    pub date: NaiveDate,
    #[serde(default)]
    pub summary: Option<String>,
    /// Products presented during the visit
    #[serde(default)]
    pub products: Vec<String>,
}

/// A practitioner in the sales portfolio
///
/// Owned by the data source; the query core only ever reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PractitionerRecord {
    pub id: PractitionerId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub specialty: String,
    #[serde(rename = "isKOL", default)]
    pub is_kol: bool,
    pub city: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    /// Annual volume
    #[serde(default)]
    pub volume: f64,
    /// Loyalty score, 0 to 10
    #[serde(default)]
    pub loyalty_score: f64,
    /// 1 to 20, 1 is the best-performing tier
    pub vingtile: u8,
    /// Potential growth in percent
    #[serde(default)]
    pub potential_growth: f64,
    #[serde(default)]
    pub last_visit_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub news: Vec<NewsItem>,
    #[serde(default)]
    pub visits: Vec<Visit>,
}

impl PractitionerRecord {
    /// Name shown in result rows
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Name including the title, e.g. "Dr. Jean Dupont"
    pub fn full_display_name(&self) -> String {
        match self.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(title) => format!("{} {}", title, self.display_name()),
            None => self.display_name(),
        }
    }

    /// Products discussed across all visits, in visit order, without duplicates
    pub fn products_discussed(&self) -> Vec<&str> {
        let mut products: Vec<&str> = Vec::new();
        for visit in &self.visits {
            for product in &visit.products {
                if !products.iter().any(|p| p.eq_ignore_ascii_case(product)) {
                    products.push(product);
                }
            }
        }
        products
    }
}

/// Relationship risk tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn from_code(code: &str) -> Option<Self> {
        match normalize_text(code).as_str() {
            "low" | "faible" | "bas" => Some(RiskTier::Low),
            "medium" | "moyen" | "modere" => Some(RiskTier::Medium),
            "high" | "eleve" | "haut" | "fort" => Some(RiskTier::High),
            _ => None,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }

    /// Bucket label used when grouping by risk
    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Low => "Low",
            RiskTier::Medium => "Medium",
            RiskTier::High => "High",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Queryable fields of an enriched practitioner record
///
/// Names coming from outside (LLM output, CLI flags) are resolved through
/// [`Field::from_name`]; anything unknown is kept verbatim and reads as missing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Field {
    Id,
    Name,
    FirstName,
    LastName,
    Title,
    Specialty,
    IsKol,
    City,
    PostalCode,
    Volume,
    LoyaltyScore,
    Vingtile,
    PotentialGrowth,
    LastVisitDate,
    DaysSinceContact,
    RiskTier,
    PublicationCount,
    HasPublications,
    VisitCount,
    NoteCount,
    ProductsDiscussed,
    Unknown(String),
}

impl Field {
    /// Every known field, in catalogue order
    pub const ALL: [Field; 21] = [
        Field::Id,
        Field::Name,
        Field::FirstName,
        Field::LastName,
        Field::Title,
        Field::Specialty,
        Field::IsKol,
        Field::City,
        Field::PostalCode,
        Field::Volume,
        Field::LoyaltyScore,
        Field::Vingtile,
        Field::PotentialGrowth,
        Field::LastVisitDate,
        Field::DaysSinceContact,
        Field::RiskTier,
        Field::PublicationCount,
        Field::HasPublications,
        Field::VisitCount,
        Field::NoteCount,
        Field::ProductsDiscussed,
    ];

    /// Resolve a field from any of its accepted spellings
    pub fn from_name(name: &str) -> Self {
        let key: String = normalize_text(name)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        match key.as_str() {
            "id" | "practitionerid" => Field::Id,
            "name" | "fullname" | "displayname" | "nom" | "nomcomplet" => Field::Name,
            "firstname" | "prenom" => Field::FirstName,
            "lastname" | "surname" | "nomdefamille" => Field::LastName,
            "title" | "titre" => Field::Title,
            "specialty" | "speciality" | "specialite" => Field::Specialty,
            "iskol" | "kol" => Field::IsKol,
            "city" | "ville" => Field::City,
            "postalcode" | "zipcode" | "zip" | "codepostal" => Field::PostalCode,
            "volume" | "annualvolume" | "volumeannuel" | "sales" => Field::Volume,
            "loyaltyscore" | "loyalty" | "fidelite" | "scorefidelite" => Field::LoyaltyScore,
            "vingtile" | "rank" => Field::Vingtile,
            "potentialgrowth" | "growthpotential" | "potential" | "potentiel" | "potentielcroissance" => {
                Field::PotentialGrowth
            }
            "lastvisitdate" | "lastvisit" | "lastcontact" | "dernierevisite" => Field::LastVisitDate,
            "dayssincecontact" | "dayssincevisit" | "dayssincelastvisit" | "recency" => Field::DaysSinceContact,
            "risktier" | "risk" | "risklevel" | "churnrisk" | "risque" => Field::RiskTier,
            "publicationcount" | "publications" | "nbpublications" => Field::PublicationCount,
            "haspublications" => Field::HasPublications,
            "visitcount" | "visits" | "nbvisites" => Field::VisitCount,
            "notecount" | "notes" => Field::NoteCount,
            "productsdiscussed" | "products" | "produits" => Field::ProductsDiscussed,
            _ => Field::Unknown(name.trim().to_string()),
        }
    }

    /// Canonical camelCase name
    pub fn as_str(&self) -> &str {
        match self {
            Field::Id => "id",
            Field::Name => "name",
            Field::FirstName => "firstName",
            Field::LastName => "lastName",
            Field::Title => "title",
            Field::Specialty => "specialty",
            Field::IsKol => "isKOL",
            Field::City => "city",
            Field::PostalCode => "postalCode",
            Field::Volume => "volume",
            Field::LoyaltyScore => "loyaltyScore",
            Field::Vingtile => "vingtile",
            Field::PotentialGrowth => "potentialGrowth",
            Field::LastVisitDate => "lastVisitDate",
            Field::DaysSinceContact => "daysSinceContact",
            Field::RiskTier => "riskTier",
            Field::PublicationCount => "publicationCount",
            Field::HasPublications => "hasPublications",
            Field::VisitCount => "visitCount",
            Field::NoteCount => "noteCount",
            Field::ProductsDiscussed => "productsDiscussed",
            Field::Unknown(name) => name,
        }
    }

    /// Whether the field holds a number
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Field::Volume
                | Field::LoyaltyScore
                | Field::Vingtile
                | Field::PotentialGrowth
                | Field::DaysSinceContact
                | Field::PublicationCount
                | Field::VisitCount
                | Field::NoteCount
        )
    }

    /// Default sort direction when none is given.
    ///
    /// Vingtile ranks are inverted: 1 is the best tier, so "best first" means
    /// ascending. Every other numeric field sorts descending by default.
    pub fn default_order(&self) -> crate::plan::SortOrder {
        match self {
            Field::Vingtile => crate::plan::SortOrder::Asc,
            _ => crate::plan::SortOrder::Desc,
        }
    }
}

impl From<String> for Field {
    fn from(name: String) -> Self {
        Field::from_name(&name)
    }
}

impl From<Field> for String {
    fn from(field: Field) -> Self {
        field.as_str().to_string()
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A flattened field value read from an enriched record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    Text(String),
    Missing,
}

impl FieldValue {
    /// Numeric view; only true numbers qualify
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, FieldValue::Missing)
    }

    /// String form used for raw-value grouping and text comparison
    pub fn label(&self) -> Option<String> {
        match self {
            FieldValue::Number(n) => Some(format_number(*n)),
            FieldValue::Bool(b) => Some(b.to_string()),
            FieldValue::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            FieldValue::Text(s) if s.trim().is_empty() => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Missing => None,
        }
    }
}

/// Render a number without a trailing ".0" for integral values
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Lowercase, strip diacritics and collapse punctuation to single spaces.
///
/// Every text comparison in the crate goes through this so "Saint-Étienne",
/// "saint etienne" and "SAINT ETIENNE" are the same key.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut push = |c: char, out: &mut String| {
        for lc in c.to_lowercase() {
            if lc.is_alphanumeric() {
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(lc);
            } else {
                pending_space = true;
            }
        }
    };
    for c in text.chars() {
        match fold_diacritic(c) {
            Some(folded) => folded.chars().for_each(|f| push(f, &mut out)),
            None => push(c, &mut out),
        }
    }
    out
}

fn fold_diacritic(c: char) -> Option<&'static str> {
    let folded = match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' => "a",
        'æ' | 'Æ' => "ae",
        'ç' | 'Ç' => "c",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' => "i",
        'ñ' | 'Ñ' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' => "o",
        'œ' | 'Œ' => "oe",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' => "u",
        'ý' | 'ÿ' | 'Ý' | 'Ÿ' => "y",
        _ => return None,
    };
    Some(folded)
}
