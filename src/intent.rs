/*!
 * Question analysis
 *
 * Turns a free-text question (English or French) into a [`QueryIntent`]: a
 * category, the entities it names, inferred filters, an optional sort, limit,
 * grouping dimension and metric. Analysis is pure and never fails; a question
 * nothing recognizes is a plain search with no entities.
 *
 * Matching runs on [`normalize_text`] output and only on whole words, so
 * "top" never fires inside "stop" and accents never matter.
 */

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::data_types::{normalize_text, Field, PractitionerRecord};
use crate::plan::{Aggregation, FilterPredicate, FilterValue, GroupDimension, Metric, Operator, SortOrder, ValueFormat};

/// What kind of answer the question asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentCategory {
    Count,
    Compare,
    Rank,
    Aggregate,
    Info,
    Search,
}

/// Entities recognized in the question, each list distinct and in order of appearance
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entities {
    pub first_names: Vec<String>,
    pub last_names: Vec<String>,
    pub cities: Vec<String>,
    /// Canonical specialty labels
    pub specialties: Vec<String>,
    /// Canonical product names
    pub products: Vec<String>,
    pub numbers: Vec<u64>,
}

impl Entities {
    pub fn is_empty(&self) -> bool {
        self.first_names.is_empty()
            && self.last_names.is_empty()
            && self.cities.is_empty()
            && self.specialties.is_empty()
            && self.products.is_empty()
    }
}

/// A field and the direction to order it in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortSpec {
    pub field: Field,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: Field, order: SortOrder) -> Self {
        Self { field, order }
    }
}

/// Structured reading of a question
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryIntent {
    pub question: String,
    pub category: IntentCategory,
    pub entities: Entities,
    /// Filters inferred from keywords; entity filters are added by the plan builder
    pub filters: Vec<FilterPredicate>,
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub group_by: Option<GroupDimension>,
    pub metric: Option<Metric>,
}

/// A way of turning questions into intents
///
/// The keyword analyzer is the only built-in strategy; model-backed analyzers
/// plug in at the same seam.
pub trait IntentStrategy: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Analyze a question
    fn analyze(&self, question: &str) -> QueryIntent;
}

/// Analyze a question against the names and cities of a dataset
pub fn analyze(question: &str, records: &[PractitionerRecord]) -> QueryIntent {
    KeywordIntentAnalyzer::from_records(records).analyze(question)
}

// Category keyword tables, checked in this order; the first table with a hit wins
const COUNT_KEYWORDS: &[&str] = &["how many", "count", "number of", "combien", "nombre de", "nombre d"];
const COMPARE_KEYWORDS: &[&str] = &[
    "compare", "comparison", "versus", "vs", "difference between", "comparer", "comparaison", "compare a",
];
const RANK_KEYWORDS: &[&str] = &[
    "top", "most", "best", "highest", "biggest", "largest", "lowest", "least", "worst", "ranking",
    "plus gros", "plus grands", "meilleur", "meilleurs", "meilleure", "meilleures", "le plus", "la plus",
    "les plus", "le moins", "les moins", "classement", "premiers",
];
const AGGREGATE_KEYWORDS: &[&str] = &[
    "average", "mean", "total", "sum", "by", "per", "breakdown", "distribution", "split", "moyenne",
    "moyen", "somme", "par", "repartition",
];
const INFO_KEYWORDS: &[&str] = &[
    "who is", "tell me about", "profile of", "details on", "qui est", "profil de", "fiche", "parle moi de",
];

const KOL_KEYWORDS: &[&str] = &[
    "kol", "kols", "key opinion leader", "key opinion leaders", "leader d opinion", "leaders d opinion",
];
const NON_KOL_KEYWORDS: &[&str] = &["non kol", "non kols", "not kol", "not kols", "pas kol", "hors kol"];
const PUBLICATION_KEYWORDS: &[&str] = &[
    "publication", "publications", "published", "publish", "publishing", "article", "articles", "publie",
    "publient", "publiant",
];
const RISK_KEYWORDS: &[&str] = &[
    "risk", "at risk", "risky", "churn", "attrition", "losing", "risque", "a risque", "en danger",
];
const RISK_INTENSIFIERS: &[&str] = &["very", "severe", "severely", "tres", "fort", "critical", "critique"];

// A bare superlative asks for a single answer
const SINGLE_ANSWER_KEYWORDS: &[&str] = &[
    "the most", "the best", "the highest", "the biggest", "le plus", "la plus", "le meilleur", "la meilleure",
];

/// Ordered group phrases; the first phrase found sets the dimension
const GROUP_PHRASES: &[(&[&str], GroupKey)] = &[
    (&["kol vs non kol", "kol versus non kol", "kols vs non kols", "kol and non kol", "by kol", "per kol", "par kol", "kol status", "statut kol"], GroupKey::Kol),
    (&["by risk tier", "by risk", "per risk", "by risk level", "par niveau de risque", "par risque"], GroupKey::Risk),
    (&["by vingtile", "per vingtile", "par vingtile", "by vingtiles", "par vingtiles"], GroupKey::Vingtile),
    (&["by loyalty score", "by loyalty", "per loyalty", "par fidelite", "par score de fidelite"], GroupKey::Loyalty),
    (&["by last visit", "by visit recency", "by recency", "by days since visit", "par derniere visite", "par anciennete de visite"], GroupKey::Recency),
    (&["by city", "per city", "by town", "each city", "par ville", "par villes", "chaque ville"], GroupKey::City),
    (&["by specialty", "per specialty", "by speciality", "each specialty", "par specialite", "par specialites"], GroupKey::Specialty),
    (&["by postal code", "by zip code", "par code postal"], GroupKey::PostalCode),
];

#[derive(Debug, Clone, Copy)]
enum GroupKey {
    Kol,
    Risk,
    Vingtile,
    Loyalty,
    Recency,
    City,
    Specialty,
    PostalCode,
}

impl GroupKey {
    fn dimension(self) -> GroupDimension {
        match self {
            GroupKey::Kol => GroupDimension::Kol,
            GroupKey::Risk => GroupDimension::RiskTier,
            GroupKey::Vingtile => GroupDimension::Vingtile,
            GroupKey::Loyalty => GroupDimension::Loyalty,
            GroupKey::Recency => GroupDimension::VisitRecency,
            GroupKey::City => GroupDimension::Field(Field::City),
            GroupKey::Specialty => GroupDimension::Field(Field::Specialty),
            GroupKey::PostalCode => GroupDimension::Field(Field::PostalCode),
        }
    }

    /// Record field the buckets are cut from
    fn field(self) -> Field {
        match self {
            GroupKey::Kol => Field::IsKol,
            GroupKey::Risk => Field::RiskTier,
            GroupKey::Vingtile => Field::Vingtile,
            GroupKey::Loyalty => Field::LoyaltyScore,
            GroupKey::Recency => Field::DaysSinceContact,
            GroupKey::City => Field::City,
            GroupKey::Specialty => Field::Specialty,
            GroupKey::PostalCode => Field::PostalCode,
        }
    }
}

/// Ordered sort phrases; specific phrasings come before the generic field words
const SORT_TABLE: &[(&[&str], SortKey, SortOrder)] = &[
    (&["lowest volume", "smallest volume", "least volume", "smallest prescribers", "plus petit volume", "plus faible volume", "plus petits prescripteurs"], SortKey::Volume, SortOrder::Asc),
    (&["most volume", "highest volume", "biggest volume", "largest volume", "biggest prescribers", "top prescribers", "largest prescribers", "plus gros volume", "plus gros prescripteurs", "plus gros"], SortKey::Volume, SortOrder::Desc),
    (&["least loyal", "lowest loyalty", "worst loyalty", "moins fidele", "moins fideles"], SortKey::Loyalty, SortOrder::Asc),
    (&["most loyal", "most faithful", "highest loyalty", "best loyalty", "plus fidele", "plus fideles", "meilleure fidelite"], SortKey::Loyalty, SortOrder::Desc),
    // vingtile 1 is the best tier
    (&["best vingtile", "top vingtile", "lowest vingtile", "meilleur vingtile", "meilleurs vingtiles"], SortKey::Vingtile, SortOrder::Asc),
    (&["worst vingtile", "highest vingtile", "pire vingtile"], SortKey::Vingtile, SortOrder::Desc),
    (&["longest without visit", "longest unvisited", "not visited", "not seen", "least recently visited", "without a visit", "sans visite", "pas vus depuis", "pas vu depuis", "plus longtemps"], SortKey::Recency, SortOrder::Desc),
    (&["most recently visited", "recently visited", "last visited", "vus recemment", "visites recemment"], SortKey::Recency, SortOrder::Asc),
    (&["growth potential", "most potential", "highest potential", "potential growth", "plus de potentiel", "potentiel de croissance", "potentiel"], SortKey::Growth, SortOrder::Desc),
    (&["most published", "most publications", "plus de publications", "publient le plus"], SortKey::Publications, SortOrder::Desc),
    (&["volume", "volumes", "prescribers", "prescripteurs"], SortKey::Volume, SortOrder::Desc),
    (&["loyal", "loyalty", "fidele", "fideles", "fidelite"], SortKey::Loyalty, SortOrder::Desc),
    (&["vingtile", "vingtiles"], SortKey::Vingtile, SortOrder::Asc),
];

#[derive(Debug, Clone, Copy)]
enum SortKey {
    Volume,
    Loyalty,
    Vingtile,
    Recency,
    Growth,
    Publications,
}

impl SortKey {
    fn field(self) -> Field {
        match self {
            SortKey::Volume => Field::Volume,
            SortKey::Loyalty => Field::LoyaltyScore,
            SortKey::Vingtile => Field::Vingtile,
            SortKey::Recency => Field::DaysSinceContact,
            SortKey::Growth => Field::PotentialGrowth,
            SortKey::Publications => Field::PublicationCount,
        }
    }
}

const AGGREGATION_WORDS: &[(&[&str], Aggregation)] = &[
    (&["average", "mean", "moyenne", "moyen", "moyens"], Aggregation::Average),
    (&["total", "sum", "somme", "cumul", "cumule"], Aggregation::Sum),
    (&["maximum", "max"], Aggregation::Max),
    (&["minimum", "min"], Aggregation::Min),
];

const METRIC_FIELD_WORDS: &[(&[&str], SortKey)] = &[
    (&["volume", "volumes", "sales", "ventes", "chiffre"], SortKey::Volume),
    (&["loyalty", "fidelite", "loyalty score"], SortKey::Loyalty),
    (&["vingtile", "vingtiles"], SortKey::Vingtile),
    (&["potential", "growth", "potentiel", "croissance"], SortKey::Growth),
    (&["publications", "publication"], SortKey::Publications),
    (&["days since", "jours depuis", "recency"], SortKey::Recency),
];

/// A specialty: display label, substrings matched against record specialties, question keywords
struct SpecialtyTerm {
    label: &'static str,
    stems: &'static [&'static str],
    keywords: &'static [&'static str],
}

const SPECIALTIES: &[SpecialtyTerm] = &[
    SpecialtyTerm {
        label: "General Practitioner",
        stems: &["general"],
        keywords: &["gp", "gps", "general practitioner", "general practitioners", "generalist", "generalists", "generaliste", "generalistes", "family doctor", "family doctors"],
    },
    SpecialtyTerm {
        label: "Cardiology",
        stems: &["cardio"],
        keywords: &["cardiologist", "cardiologists", "cardiology", "cardio", "cardiologue", "cardiologues", "cardiologie"],
    },
    SpecialtyTerm {
        label: "Pulmonology",
        stems: &["pulmo", "pneumo"],
        keywords: &["pulmonologist", "pulmonologists", "pulmonology", "pneumologue", "pneumologues", "pneumologie"],
    },
    SpecialtyTerm {
        label: "Endocrinology",
        stems: &["endocrin", "diabet"],
        keywords: &["endocrinologist", "endocrinologists", "endocrinology", "endocrinologue", "endocrinologues", "diabetologist", "diabetologue", "diabetologues"],
    },
    SpecialtyTerm {
        label: "Dermatology",
        stems: &["dermato"],
        keywords: &["dermatologist", "dermatologists", "dermatology", "dermatologue", "dermatologues", "dermatologie"],
    },
    SpecialtyTerm {
        label: "Rheumatology",
        stems: &["rheumato", "rhumato"],
        keywords: &["rheumatologist", "rheumatologists", "rheumatology", "rhumatologue", "rhumatologues", "rhumatologie"],
    },
    SpecialtyTerm {
        label: "Neurology",
        stems: &["neuro"],
        keywords: &["neurologist", "neurologists", "neurology", "neurologue", "neurologues", "neurologie"],
    },
    SpecialtyTerm {
        label: "Pediatrics",
        stems: &["pediatr", "paediatr"],
        keywords: &["pediatrician", "pediatricians", "pediatrics", "pediatre", "pediatres", "pediatrie"],
    },
    SpecialtyTerm {
        label: "Gynecology",
        stems: &["gyneco", "gynaeco"],
        keywords: &["gynecologist", "gynecologists", "gynecology", "gynecologue", "gynecologues", "gyneco"],
    },
    SpecialtyTerm {
        label: "Psychiatry",
        stems: &["psychiatr"],
        keywords: &["psychiatrist", "psychiatrists", "psychiatry", "psychiatre", "psychiatres", "psychiatrie"],
    },
];

/// Product portfolio: canonical name and question keywords
const PRODUCTS: &[(&str, &[&str])] = &[
    ("Cardiotensor", &["cardiotensor"]),
    ("Respirol", &["respirol"]),
    ("Glucomax", &["glucomax"]),
    ("Dermaclear", &["dermaclear"]),
    ("Neurolax", &["neurolax"]),
    ("Osteoflex", &["osteoflex"]),
];

/// Substrings a specialty label matches in record specialties
pub fn specialty_stems(label: &str) -> &'static [&'static str] {
    SPECIALTIES
        .iter()
        .find(|s| s.label.eq_ignore_ascii_case(label))
        .map(|s| s.stems)
        .unwrap_or(&[])
}

/// Canonical specialty labels, in table order
pub fn specialty_labels() -> impl Iterator<Item = &'static str> {
    SPECIALTIES.iter().map(|s| s.label)
}

/// Canonical product names, in table order
pub fn product_names() -> impl Iterator<Item = &'static str> {
    PRODUCTS.iter().map(|(name, _)| *name)
}

const DEFAULT_CITIES: &[&str] = &[
    "Paris", "Lyon", "Marseille", "Toulouse", "Nice", "Nantes", "Strasbourg", "Montpellier", "Bordeaux",
    "Lille", "Rennes", "Grenoble", "Saint-Étienne", "Clermont-Ferrand", "Dijon", "Annecy", "Villeurbanne",
    "Chambéry", "Valence", "Toulon",
];
const DEFAULT_FIRST_NAMES: &[&str] = &[
    "Jean", "Marie", "Pierre", "Sophie", "Philippe", "Isabelle", "Nicolas", "Nathalie", "François",
    "Catherine", "Claire", "Antoine", "Julie", "Thomas", "Camille", "Étienne", "Anne", "Luc",
];
const DEFAULT_LAST_NAMES: &[&str] = &[
    "Martin", "Bernard", "Dubois", "Thomas", "Robert", "Richard", "Durand", "Dupont", "Lefebvre", "Moreau",
    "Laurent", "Simon", "Michel", "Garcia", "Fournier", "Girard", "Bonnet", "Mercier",
];

// Words that never count as a name or city on their own
const STOPWORDS: &[&str] = &[
    "a", "an", "the", "of", "in", "on", "at", "by", "for", "to", "and", "or", "with", "who", "what", "how",
    "many", "much", "is", "are", "top", "best", "most", "show", "list", "me", "my", "all", "de", "des", "du",
    "la", "le", "les", "et", "ou", "en", "au", "aux", "par", "pour", "avec", "qui", "quel", "quels", "quelle",
    "quelles", "combien", "sont", "est", "mes", "tous", "toutes", "plus", "moins", "dr", "docteur", "doctor",
    "kol", "kols", "vs", "versus", "practitioner", "practitioners", "medecin", "medecins",
];

lazy_static! {
    static ref LIMIT_BEFORE_NUMBER: Regex = Regex::new(
        r"\b(?:top|first|best|premiers|premieres|premier|meilleurs|meilleures)\s+(\d{1,4})\b"
    )
    .expect("limit pattern");
    // "les 10 médecins les plus fidèles": the ranking word may trail the number
    static ref LIMIT_AFTER_ARTICLE: Regex = Regex::new(
        r"\b(?:the|les)\s+(\d{1,4})\s+(?:\w+\s+){0,2}(?:most|best|biggest|largest|highest|first|top|plus|meilleurs|meilleures|premiers|premieres)\b"
    )
    .expect("limit pattern");
    static ref LIMIT_AFTER_NUMBER: Regex = Regex::new(
        r"\b(\d{1,4})\s+(?:first|best|top|biggest|largest|most|premiers|premieres|meilleurs|meilleures|plus)\b"
    )
    .expect("limit pattern");
    static ref NUMBER: Regex = Regex::new(r"\b\d+\b").expect("number pattern");
}

/// Multi-word phrases indexed by their first word
#[derive(Debug, Clone, Default)]
struct PhraseIndex {
    by_head: HashMap<String, Vec<(Vec<String>, String)>>,
}

impl PhraseIndex {
    fn insert(&mut self, display: &str) {
        let tokens: Vec<String> = normalize_text(display).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect();
        let Some(head) = tokens.first().cloned() else {
            return;
        };
        if tokens.len() == 1 && (head.len() < 2 || STOPWORDS.contains(&head.as_str())) {
            return;
        }
        let entries = self.by_head.entry(head).or_default();
        if entries.iter().any(|(t, _)| *t == tokens) {
            return;
        }
        entries.push((tokens, display.trim().to_string()));
        // Longest phrase first so "saint etienne" beats "saint"
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    fn len(&self) -> usize {
        self.by_head.values().map(Vec::len).sum()
    }

    /// Claim unclaimed token runs matching a phrase; returns distinct display forms in order
    fn find(&self, tokens: &[&str], claimed: &mut [bool]) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let mut advanced = false;
            if !claimed[i] {
                if let Some(entries) = self.by_head.get(tokens[i]) {
                    for (phrase, display) in entries {
                        let end = i + phrase.len();
                        if end <= tokens.len()
                            && !claimed[i..end].iter().any(|c| *c)
                            && tokens[i..end].iter().zip(phrase).all(|(t, p)| *t == p.as_str())
                        {
                            claimed[i..end].iter_mut().for_each(|c| *c = true);
                            if !found.iter().any(|f| normalize_text(f) == normalize_text(display)) {
                                found.push(display.clone());
                            }
                            i = end;
                            advanced = true;
                            break;
                        }
                    }
                }
            }
            if !advanced {
                i += 1;
            }
        }
        found
    }
}

/// Names and cities the analyzer can recognize
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    first_names: PhraseIndex,
    last_names: PhraseIndex,
    cities: PhraseIndex,
}

impl Vocabulary {
    /// Empty vocabulary
    pub fn new() -> Self {
        Self::default()
    }

    /// Vocabulary drawn from the first names, last names and cities of a dataset
    pub fn from_records(records: &[PractitionerRecord]) -> Self {
        let mut vocabulary = Self::new();
        for record in records {
            vocabulary.first_names.insert(&record.first_name);
            vocabulary.last_names.insert(&record.last_name);
            vocabulary.cities.insert(&record.city);
        }
        vocabulary
    }

    /// Add the built-in supplementary names and cities
    pub fn with_defaults(mut self) -> Self {
        DEFAULT_CITIES.iter().for_each(|c| self.cities.insert(c));
        DEFAULT_FIRST_NAMES.iter().for_each(|n| self.first_names.insert(n));
        DEFAULT_LAST_NAMES.iter().for_each(|n| self.last_names.insert(n));
        self
    }

    pub fn with_cities<I, S>(mut self, cities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        cities.into_iter().for_each(|c| self.cities.insert(c.as_ref()));
        self
    }

    pub fn with_first_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().for_each(|n| self.first_names.insert(n.as_ref()));
        self
    }

    pub fn with_last_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().for_each(|n| self.last_names.insert(n.as_ref()));
        self
    }

    /// Number of (first names, last names, cities) known
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.first_names.len(), self.last_names.len(), self.cities.len())
    }
}

/// Keyword-table analyzer
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentAnalyzer {
    vocabulary: Vocabulary,
}

impl KeywordIntentAnalyzer {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self { vocabulary }
    }

    /// Analyzer knowing the dataset's names plus the built-in defaults
    pub fn from_records(records: &[PractitionerRecord]) -> Self {
        Self::new(Vocabulary::from_records(records).with_defaults())
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn extract_entities(&self, text: &str, tokens: &[&str]) -> Entities {
        let mut claimed = vec![false; tokens.len()];
        // Cities first so "saint etienne" is never read as a first name
        let cities = self.vocabulary.cities.find(tokens, &mut claimed);
        let first_names = self.vocabulary.first_names.find(tokens, &mut claimed);
        // Tokens already claimed as first names are skipped here
        let last_names = self.vocabulary.last_names.find(tokens, &mut claimed);

        let specialties = SPECIALTIES
            .iter()
            .filter(|s| contains_any(text, s.keywords))
            .map(|s| s.label.to_string())
            .collect();
        let products = PRODUCTS
            .iter()
            .filter(|(_, keywords)| contains_any(text, keywords))
            .map(|(name, _)| name.to_string())
            .collect();
        let numbers = NUMBER
            .find_iter(text)
            .filter_map(|m| m.as_str().parse::<u64>().ok())
            .collect();

        Entities {
            first_names,
            last_names,
            cities,
            specialties,
            products,
            numbers,
        }
    }
}

impl IntentStrategy for KeywordIntentAnalyzer {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn analyze(&self, question: &str) -> QueryIntent {
        let text = normalize_text(question);
        let tokens: Vec<&str> = text.split(' ').filter(|t| !t.is_empty()).collect();

        let category = classify(&text);
        let entities = self.extract_entities(&text, &tokens);

        let sort = infer_sort(&text);
        // In "top 15 by vingtile by city" the vingtile phrase names the ranking, not the grouping
        let ranked_field = match category {
            IntentCategory::Rank => sort.as_ref().map(|s| &s.field),
            _ => None,
        };
        let (group_by, filter_text) = match find_group_phrase(&text, ranked_field) {
            Some((key, phrase)) => (Some(key.dimension()), strip_phrase(&text, phrase)),
            None => (None, text.clone()),
        };
        let filters = infer_filters(&filter_text, group_by.as_ref());
        let limit = infer_limit(&text);
        let metric = infer_metric(&text, category);

        let intent = QueryIntent {
            question: question.to_string(),
            category,
            entities,
            filters,
            sort,
            limit,
            group_by,
            metric,
        };
        debug!(
            strategy = self.name(),
            category = ?intent.category,
            cities = ?intent.entities.cities,
            filters = intent.filters.len(),
            limit = ?intent.limit,
            "analyzed question"
        );
        intent
    }
}

/// Whole-word phrase containment on normalized text
fn contains_phrase(text: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    let padded = format!(" {} ", text);
    padded.contains(&format!(" {} ", phrase))
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(text, p))
}

fn strip_phrase(text: &str, phrase: &str) -> String {
    let padded = format!(" {} ", text);
    padded.replace(&format!(" {} ", phrase), " ").trim().to_string()
}

fn classify(text: &str) -> IntentCategory {
    if contains_any(text, COUNT_KEYWORDS) {
        IntentCategory::Count
    } else if contains_any(text, COMPARE_KEYWORDS) {
        IntentCategory::Compare
    } else if contains_any(text, RANK_KEYWORDS) {
        IntentCategory::Rank
    } else if contains_any(text, AGGREGATE_KEYWORDS) {
        IntentCategory::Aggregate
    } else if contains_any(text, INFO_KEYWORDS) {
        IntentCategory::Info
    } else {
        IntentCategory::Search
    }
}

/// First group phrase in table order, skipping the dimension of the ranked field
fn find_group_phrase(text: &str, ranked_field: Option<&Field>) -> Option<(GroupKey, &'static str)> {
    GROUP_PHRASES
        .iter()
        .filter(|(_, key)| ranked_field != Some(&key.field()))
        .find_map(|(phrases, key)| phrases.iter().find(|p| contains_phrase(text, p)).map(|p| (*key, *p)))
}

fn infer_filters(text: &str, group_by: Option<&GroupDimension>) -> Vec<FilterPredicate> {
    let mut filters = Vec::new();

    if group_by != Some(&GroupDimension::Kol) {
        if contains_any(text, NON_KOL_KEYWORDS) {
            filters.push(FilterPredicate::equals(Field::IsKol, FilterValue::Bool(false)));
        } else if contains_any(text, KOL_KEYWORDS) {
            filters.push(FilterPredicate::equals(Field::IsKol, FilterValue::Bool(true)));
        }
    }

    if contains_any(text, PUBLICATION_KEYWORDS) {
        filters.push(FilterPredicate::equals(Field::HasPublications, FilterValue::Bool(true)));
    }

    if group_by != Some(&GroupDimension::RiskTier) && contains_any(text, RISK_KEYWORDS) {
        let tiers = if contains_any(text, RISK_INTENSIFIERS) { vec!["high", "medium"] } else { vec!["high"] };
        filters.push(FilterPredicate::new(
            Field::RiskTier,
            Operator::In,
            FilterValue::List(tiers.into_iter().map(FilterValue::text).collect()),
        ));
    }

    filters
}

fn infer_sort(text: &str) -> Option<SortSpec> {
    SORT_TABLE
        .iter()
        .find(|(phrases, _, _)| contains_any(text, phrases))
        .map(|(_, key, order)| SortSpec::new(key.field(), *order))
}

fn infer_limit(text: &str) -> Option<usize> {
    let explicit = LIMIT_BEFORE_NUMBER
        .captures(text)
        .or_else(|| LIMIT_AFTER_NUMBER.captures(text))
        .or_else(|| LIMIT_AFTER_ARTICLE.captures(text))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .filter(|n| *n > 0);

    explicit.or_else(|| contains_any(text, SINGLE_ANSWER_KEYWORDS).then_some(1))
}

fn infer_metric(text: &str, category: IntentCategory) -> Option<Metric> {
    let aggregation = AGGREGATION_WORDS
        .iter()
        .find(|(words, _)| contains_any(text, words))
        .map(|(_, agg)| *agg);
    let field = METRIC_FIELD_WORDS
        .iter()
        .find(|(words, _)| contains_any(text, words))
        .map(|(_, key)| key.field())?;

    let aggregation = match aggregation {
        Some(agg) => agg,
        // "compare volume of Lyon and Grenoble": totals for extensive fields, means otherwise
        None if matches!(category, IntentCategory::Compare | IntentCategory::Aggregate) => match field {
            Field::Volume | Field::PublicationCount => Aggregation::Sum,
            _ => Aggregation::Average,
        },
        None => return None,
    };

    let metric = Metric::new(format!("{} {}", aggregation.label(), field.as_str()), Some(field.clone()), aggregation);
    Some(match (field, aggregation) {
        (Field::Volume, Aggregation::Sum | Aggregation::Average | Aggregation::Min | Aggregation::Max) => {
            metric.with_format(ValueFormat::Thousands)
        }
        _ => metric,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::practitioner;

    fn analyzer() -> KeywordIntentAnalyzer {
        let records = vec![
            practitioner("p1", "Zoé", "Faure", "Lyon", 800_000.0),
            practitioner("p2", "Marc", "Petitjean", "Grenoble", 100_000.0),
        ];
        KeywordIntentAnalyzer::from_records(&records)
    }

    #[test]
    fn test_count_with_kol_filter_and_city() {
        let intent = analyzer().analyze("How many KOLs in Lyon?");
        assert_eq!(intent.category, IntentCategory::Count);
        assert_eq!(intent.entities.cities, vec!["Lyon"]);
        assert_eq!(intent.filters, vec![FilterPredicate::equals(Field::IsKol, FilterValue::Bool(true))]);
    }

    #[test]
    fn test_rank_with_limit_and_specialty() {
        let intent = analyzer().analyze("Top 5 cardiologists by volume");
        assert_eq!(intent.category, IntentCategory::Rank);
        assert_eq!(intent.limit, Some(5));
        assert_eq!(intent.entities.specialties, vec!["Cardiology"]);
        assert_eq!(intent.sort, Some(SortSpec::new(Field::Volume, SortOrder::Desc)));
    }

    #[test]
    fn test_french_question_with_accents() {
        let intent = analyzer().analyze("Quels sont les 10 médecins les plus fidèles à Saint-Étienne ?");
        assert_eq!(intent.category, IntentCategory::Rank);
        assert_eq!(intent.limit, Some(10));
        assert_eq!(intent.entities.cities, vec!["Saint-Étienne"]);
        // "etienne" belongs to the city, not to the first names
        assert!(intent.entities.first_names.is_empty());
        assert_eq!(intent.sort, Some(SortSpec::new(Field::LoyaltyScore, SortOrder::Desc)));
    }

    #[test]
    fn test_risk_intensifier_widens_tiers() {
        let plain = analyzer().analyze("Which practitioners are at risk?");
        let widened = analyzer().analyze("Which practitioners are at very high risk?");
        let tiers = |intent: &QueryIntent| {
            intent
                .filters
                .iter()
                .find(|f| f.field == Field::RiskTier)
                .map(|f| f.value.clone())
        };
        assert_eq!(tiers(&plain), Some(FilterValue::List(vec![FilterValue::text("high")])));
        assert_eq!(
            tiers(&widened),
            Some(FilterValue::List(vec![FilterValue::text("high"), FilterValue::text("medium")]))
        );
    }

    #[test]
    fn test_compare_cities() {
        let intent = analyzer().analyze("Compare Lyon and Grenoble");
        assert_eq!(intent.category, IntentCategory::Compare);
        assert_eq!(intent.entities.cities, vec!["Lyon", "Grenoble"]);
        assert!(intent.group_by.is_none());
    }

    #[test]
    fn test_kol_split_does_not_filter_on_kol() {
        let intent = analyzer().analyze("KOL vs non-KOL volume");
        assert_eq!(intent.category, IntentCategory::Compare);
        assert_eq!(intent.group_by, Some(GroupDimension::Kol));
        assert!(intent.filters.iter().all(|f| f.field != Field::IsKol));
        let metric = intent.metric.unwrap();
        assert_eq!(metric.aggregation, Aggregation::Sum);
        assert_eq!(metric.format, Some(ValueFormat::Thousands));
    }

    #[test]
    fn test_last_name_already_claimed_as_first_name() {
        let intent = analyzer().analyze("Who is Thomas Martin?");
        assert_eq!(intent.category, IntentCategory::Info);
        assert_eq!(intent.entities.first_names, vec!["Thomas"]);
        assert_eq!(intent.entities.last_names, vec!["Martin"]);
    }

    #[test]
    fn test_dataset_names_are_recognized() {
        let intent = analyzer().analyze("tell me about zoe faure");
        assert_eq!(intent.entities.first_names, vec!["Zoé"]);
        assert_eq!(intent.entities.last_names, vec!["Faure"]);
    }

    #[test]
    fn test_bare_superlative_limits_to_one() {
        let intent = analyzer().analyze("Who is the most loyal practitioner?");
        assert_eq!(intent.category, IntentCategory::Rank);
        assert_eq!(intent.limit, Some(1));
    }

    #[test]
    fn test_number_after_article_is_not_a_limit() {
        for question in [
            "Quels médecins ont été visités dans les 3 derniers mois ?",
            "practitioners seen in the 2 weeks before the congress",
            "show the 12 practitioners in Lyon",
        ] {
            let intent = analyzer().analyze(question);
            assert!(intent.limit.is_none(), "{} gave {:?}", question, intent.limit);
        }
    }

    #[test]
    fn test_article_then_ranking_word_is_a_limit() {
        assert_eq!(analyzer().analyze("les 5 cardiologues les plus fidèles").limit, Some(5));
        assert_eq!(analyzer().analyze("the 3 most loyal practitioners").limit, Some(3));
    }

    #[test]
    fn test_ranked_field_phrase_does_not_take_the_group() {
        let intent = analyzer().analyze("top 15 by vingtile by city");
        assert_eq!(intent.category, IntentCategory::Rank);
        assert_eq!(intent.sort, Some(SortSpec::new(Field::Vingtile, SortOrder::Asc)));
        assert_eq!(intent.group_by, Some(GroupDimension::Field(Field::City)));
        assert_eq!(intent.limit, Some(15));

        // Outside a ranking the phrase still groups
        let grouped = analyzer().analyze("average volume by vingtile");
        assert_eq!(grouped.group_by, Some(GroupDimension::Vingtile));
    }

    #[test]
    fn test_unrecognized_question_is_plain_search() {
        let intent = analyzer().analyze("show me everything");
        assert_eq!(intent.category, IntentCategory::Search);
        assert!(intent.entities.is_empty());
        assert!(intent.filters.is_empty());
        assert!(intent.limit.is_none());
    }

    #[test]
    fn test_average_metric_by_city() {
        let intent = analyzer().analyze("average loyalty by city");
        assert_eq!(intent.category, IntentCategory::Aggregate);
        assert_eq!(intent.group_by, Some(GroupDimension::Field(Field::City)));
        let metric = intent.metric.unwrap();
        assert_eq!(metric.aggregation, Aggregation::Average);
        assert_eq!(metric.field, Some(Field::LoyaltyScore));
    }

    #[test]
    fn test_words_match_whole_only() {
        // "stop" must not read as "top"
        assert!(!contains_phrase("stop the count", "top"));
        assert!(contains_phrase("the top 3", "top"));
        assert_eq!(classify("stop showing lyon"), IntentCategory::Search);
    }

    #[test]
    fn test_products_and_numbers() {
        let intent = analyzer().analyze("practitioners who discussed Cardiotensor in 2024");
        assert_eq!(intent.entities.products, vec!["Cardiotensor"]);
        assert_eq!(intent.entities.numbers, vec![2024]);
    }
}
