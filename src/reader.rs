/*!
 * Portfolio file reader
 *
 * Loads practitioner records from JSON arrays, JSON Lines and flat CSV files
 * with record validation and an optional skip-invalid mode. Each record is
 * decoded on its own, so one malformed entry can be skipped without losing
 * the rest of the file.
 */

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use chrono::NaiveDate;
use csv::ReaderBuilder;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    constants::MAX_REPORTED_INVALID_RECORDS,
    data_types::*,
    schema::PractitionerCsvSchema,
    ErrorContext, MedrepError, Result,
};

/// Supported input formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// A JSON array of records, or an object with a `practitioners` array
    Json,
    /// One JSON record per line
    JsonLines,
    /// Flat CSV without nested collections
    Csv,
}

impl InputFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(InputFormat::Json),
            "jsonl" | "ndjson" => Some(InputFormat::JsonLines),
            "csv" => Some(InputFormat::Csv),
            _ => None,
        }
    }
}

/// Practitioner data reader
#[derive(Debug, Clone)]
pub struct PractitionerReader {
    /// Whether to validate CSV headers against the expected schema
    validate_headers: bool,
    /// Whether to skip invalid records (true) or fail on first error (false)
    skip_invalid_records: bool,
    /// Whether to check value ranges after decoding
    validate_records: bool,
}

impl Default for PractitionerReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PractitionerReader {
    /// Create a new reader with default settings
    pub fn new() -> Self {
        Self {
            validate_headers: true,
            skip_invalid_records: false,
            validate_records: true,
        }
    }

    /// Enable or disable CSV header validation
    pub fn with_header_validation(mut self, validate: bool) -> Self {
        self.validate_headers = validate;
        self
    }

    /// Skip invalid records instead of failing
    pub fn with_skip_invalid_records(mut self, skip: bool) -> Self {
        self.skip_invalid_records = skip;
        self
    }

    /// Enable or disable range checks on decoded records
    pub fn with_record_validation(mut self, validate: bool) -> Self {
        self.validate_records = validate;
        self
    }

    /// Load a file, picking the format from its extension
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PractitionerRecord>> {
        let path = path.as_ref();
        match InputFormat::from_path(path) {
            Some(InputFormat::Json) => self.load_json(path),
            Some(InputFormat::JsonLines) => self.load_json_lines(path),
            Some(InputFormat::Csv) => self.load_csv(path),
            None => {
                ensure_exists(path)?;
                Err(MedrepError::Custom {
                    message: format!("Unsupported dataset format: {}", path.display()),
                    suggestion: Some("Use a .json, .jsonl or .csv file".to_string()),
                })
            }
        }
    }

    /// Load a JSON array of records
    pub fn load_json<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PractitionerRecord>> {
        let path = path.as_ref();
        ensure_exists(path)?;
        let start_time = Instant::now();

        let file = File::open(path)?;
        let document: Value = serde_json::from_reader(BufReader::new(file)).map_err(|e| with_path(e.into(), path))?;
        let records = self.records_from_json(document, Some(path))?;

        log_loaded(path, records.len(), start_time);
        Ok(records)
    }

    /// Parse records from an in-memory JSON document
    pub fn from_json_str(&self, json: &str) -> Result<Vec<PractitionerRecord>> {
        let document: Value = serde_json::from_str(json)?;
        self.records_from_json(document, None)
    }

    fn records_from_json(&self, document: Value, path: Option<&Path>) -> Result<Vec<PractitionerRecord>> {
        let items = match document {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("practitioners") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(MedrepError::JsonParse {
                        message: "expected an array of practitioners".to_string(),
                        context: ErrorContext {
                            file_path: path.map(Path::to_path_buf),
                            ..Default::default()
                        },
                    })
                }
            },
            _ => {
                return Err(MedrepError::JsonParse {
                    message: "expected an array of practitioners".to_string(),
                    context: ErrorContext {
                        file_path: path.map(Path::to_path_buf),
                        ..Default::default()
                    },
                })
            }
        };

        let mut records = Vec::with_capacity(items.len());
        let mut invalid_count = 0;
        for (index, item) in items.into_iter().enumerate() {
            let parsed = serde_json::from_value::<PractitionerRecord>(item)
                .map_err(|e| MedrepError::JsonParse {
                    message: format!("record {}: {}", index + 1, e),
                    context: ErrorContext {
                        file_path: path.map(Path::to_path_buf),
                        line_number: Some(index + 1),
                        ..Default::default()
                    },
                })
                .and_then(|record| self.check(record));
            self.accept(parsed, &mut records, &mut invalid_count)?;
        }

        self.finish(records, invalid_count)
    }

    /// Load one JSON record per line; blank lines are ignored
    pub fn load_json_lines<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PractitionerRecord>> {
        let path = path.as_ref();
        ensure_exists(path)?;
        let start_time = Instant::now();

        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        let mut invalid_count = 0;

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed = serde_json::from_str::<PractitionerRecord>(&line)
                .map_err(|e| MedrepError::JsonParse {
                    message: e.to_string(),
                    context: ErrorContext {
                        file_path: Some(path.to_path_buf()),
                        line_number: Some(index + 1),
                        ..Default::default()
                    },
                })
                .and_then(|record| self.check(record));
            self.accept(parsed, &mut records, &mut invalid_count)?;
        }

        let records = self.finish(records, invalid_count)?;
        log_loaded(path, records.len(), start_time);
        Ok(records)
    }

    /// Load a flat CSV file
    pub fn load_csv<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PractitionerRecord>> {
        let path = path.as_ref();
        ensure_exists(path)?;
        let start_time = Instant::now();

        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new().has_headers(true).trim(csv::Trim::All).from_reader(file);

        if self.validate_headers {
            let headers: Vec<String> = reader.headers()?.iter().map(|s| s.to_string()).collect();
            PractitionerCsvSchema::validate_headers(&headers)?;
        }

        let mut records = Vec::new();
        let mut invalid_count = 0;

        for (index, result) in reader.records().enumerate() {
            // Header is line 1
            let line_number = index + 2;
            let parsed = match result {
                Ok(csv_record) => self
                    .parse_csv_record(&csv_record, line_number)
                    .and_then(|record| self.check(record)),
                Err(e) => Err(MedrepError::CsvParse {
                    message: format!("CSV error: {}", e),
                    line: Some(line_number),
                    column: None,
                    context: ErrorContext {
                        file_path: Some(path.to_path_buf()),
                        line_number: Some(line_number),
                        ..Default::default()
                    },
                }),
            };
            self.accept(parsed, &mut records, &mut invalid_count)?;
        }

        let records = self.finish(records, invalid_count)?;
        log_loaded(path, records.len(), start_time);
        Ok(records)
    }

    fn parse_csv_record(&self, record: &csv::StringRecord, line_number: usize) -> Result<PractitionerRecord> {
        let get_field = |index: usize| -> Option<String> {
            record.get(index).filter(|s| !s.trim().is_empty()).map(|s| s.trim().to_string())
        };

        let get_required_field = |index: usize, field_name: &str| -> Result<String> {
            get_field(index).ok_or_else(|| MedrepError::DataValidation {
                message: format!("Missing required field: {}", field_name),
                field: Some(field_name.to_string()),
                value: None,
                context: ErrorContext {
                    line_number: Some(line_number),
                    ..Default::default()
                },
            })
        };

        let get_number = |index: usize, field_name: &str| -> Result<f64> {
            match get_field(index) {
                None => Ok(0.0),
                Some(raw) => raw.replace(',', ".").parse::<f64>().map_err(|_| MedrepError::DataValidation {
                    message: format!("'{}' is not a number", raw),
                    field: Some(field_name.to_string()),
                    value: Some(raw.clone()),
                    context: ErrorContext {
                        line_number: Some(line_number),
                        column_name: Some(field_name.to_string()),
                        ..Default::default()
                    },
                }),
            }
        };

        let id = get_required_field(PractitionerCsvSchema::ID, "id")?;
        let vingtile_raw = get_required_field(PractitionerCsvSchema::VINGTILE, "vingtile")?;
        let vingtile = vingtile_raw
            .parse::<u8>()
            .map_err(|_| MedrepError::invalid_record(&id, "vingtile", &vingtile_raw, "is not an integer"))?;

        let is_kol = match get_field(PractitionerCsvSchema::IS_KOL).as_deref().map(str::to_ascii_lowercase) {
            None => false,
            Some(flag) => matches!(flag.as_str(), "true" | "1" | "yes" | "y" | "oui"),
        };

        let last_visit_date = get_field(PractitionerCsvSchema::LAST_VISIT_DATE)
            .map(|raw| self.parse_date(&raw))
            .transpose()?;

        Ok(PractitionerRecord {
            id: PractitionerId::new(id),
            first_name: get_required_field(PractitionerCsvSchema::FIRST_NAME, "firstName")?,
            last_name: get_required_field(PractitionerCsvSchema::LAST_NAME, "lastName")?,
            title: get_field(PractitionerCsvSchema::TITLE),
            specialty: get_field(PractitionerCsvSchema::SPECIALTY).unwrap_or_default(),
            is_kol,
            city: get_required_field(PractitionerCsvSchema::CITY, "city")?,
            postal_code: get_field(PractitionerCsvSchema::POSTAL_CODE),
            volume: get_number(PractitionerCsvSchema::VOLUME, "volume")?,
            loyalty_score: get_number(PractitionerCsvSchema::LOYALTY_SCORE, "loyaltyScore")?,
            vingtile,
            potential_growth: get_number(PractitionerCsvSchema::POTENTIAL_GROWTH, "potentialGrowth")?,
            last_visit_date,
            notes: Vec::new(),
            news: Vec::new(),
            visits: Vec::new(),
        })
    }

    /// Parse a date in ISO (YYYY-MM-DD) or French (DD/MM/YYYY) form
    fn parse_date(&self, date_str: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(date_str, "%d/%m/%Y"))
            .map_err(|_| MedrepError::date_parse_with_format(date_str, "YYYY-MM-DD or DD/MM/YYYY"))
    }

    fn check(&self, record: PractitionerRecord) -> Result<PractitionerRecord> {
        if self.validate_records {
            validate_record(&record)?;
        }
        Ok(record)
    }

    /// Keep a parsed record, or count and report the failure
    fn accept(
        &self,
        parsed: Result<PractitionerRecord>,
        records: &mut Vec<PractitionerRecord>,
        invalid_count: &mut usize,
    ) -> Result<()> {
        match parsed {
            Ok(record) => records.push(record),
            Err(e) => {
                if !self.skip_invalid_records {
                    return Err(e);
                }
                *invalid_count += 1;
                if *invalid_count <= MAX_REPORTED_INVALID_RECORDS {
                    warn!("Skipping invalid record: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Enforce unique ids and report skipped records
    fn finish(&self, records: Vec<PractitionerRecord>, mut invalid_count: usize) -> Result<Vec<PractitionerRecord>> {
        let mut seen = HashSet::with_capacity(records.len());
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            if seen.insert(record.id.clone()) {
                unique.push(record);
                continue;
            }
            let err = MedrepError::invalid_record(record.id.as_str(), "id", record.id.as_str(), "is duplicated");
            if !self.skip_invalid_records {
                return Err(err);
            }
            invalid_count += 1;
            if invalid_count <= MAX_REPORTED_INVALID_RECORDS {
                warn!("Skipping invalid record: {}", err);
            }
        }

        if invalid_count > 0 {
            warn!("Skipped {} invalid records", invalid_count);
        }
        Ok(unique)
    }
}

/// Check the value ranges every record must satisfy
pub fn validate_record(record: &PractitionerRecord) -> Result<()> {
    let id = record.id.as_str();
    if id.trim().is_empty() {
        return Err(MedrepError::invalid_record("<empty>", "id", "", "must not be empty"));
    }
    if !(1..=20).contains(&record.vingtile) {
        return Err(MedrepError::invalid_record(id, "vingtile", record.vingtile, "must be between 1 and 20"));
    }
    if !record.loyalty_score.is_finite() || !(0.0..=10.0).contains(&record.loyalty_score) {
        return Err(MedrepError::invalid_record(id, "loyaltyScore", record.loyalty_score, "must be between 0 and 10"));
    }
    if !record.volume.is_finite() || record.volume < 0.0 {
        return Err(MedrepError::invalid_record(id, "volume", record.volume, "must be a non-negative number"));
    }
    if !record.potential_growth.is_finite() {
        return Err(MedrepError::invalid_record(id, "potentialGrowth", record.potential_growth, "must be a number"));
    }
    Ok(())
}

fn ensure_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(MedrepError::file_not_found_with_suggestion(path.to_path_buf()))
    }
}

fn with_path(err: MedrepError, path: &Path) -> MedrepError {
    match err {
        MedrepError::JsonParse { message, mut context } => {
            context.file_path = Some(path.to_path_buf());
            MedrepError::JsonParse { message, context }
        }
        other => other,
    }
}

fn log_loaded(path: &Path, count: usize, start_time: Instant) {
    let elapsed = start_time.elapsed();
    let size = std::fs::metadata(path).map(|m| m.len() as usize).unwrap_or(0);
    info!(
        "Loaded {} practitioner records from {} ({}) in {:.2}s",
        count,
        path.display(),
        format_bytes(size),
        elapsed.as_secs_f64()
    );
}

/// Format bytes into human-readable string
fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CSV_HEADER: &str =
        "id,firstName,lastName,title,specialty,isKOL,city,postalCode,volume,loyaltyScore,vingtile,potentialGrowth,lastVisitDate";

    fn temp_file(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_json_array() {
        let json = r#"[
            {"id": "P1", "firstName": "Jean", "lastName": "Dupont", "specialty": "Cardiology",
             "isKOL": true, "city": "Lyon", "volume": 500000, "loyaltyScore": 8.5, "vingtile": 2,
             "potentialGrowth": 12, "lastVisitDate": "2024-05-02",
             "news": [{"title": "Trial", "type": "publication"}],
             "visits": [{"date": "2024-05-02", "products": ["Cardiotensor"]}]}
        ]"#;
        let file = temp_file(".json", json);
        let records = PractitionerReader::new().load(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_kol);
        assert_eq!(records[0].products_discussed(), vec!["Cardiotensor"]);
    }

    #[test]
    fn test_wrapped_json_object() {
        let json = r#"{"practitioners": [{"id": "P1", "firstName": "A", "lastName": "B", "specialty": "GP", "city": "Lyon", "vingtile": 3}]}"#;
        let records = PractitionerReader::new().from_json_str(json).unwrap();
        assert_eq!(records[0].vingtile, 3);
    }

    #[test]
    fn test_invalid_record_fails_or_is_skipped() {
        let json = r#"[
            {"id": "P1", "firstName": "A", "lastName": "B", "specialty": "GP", "city": "Lyon", "vingtile": 3},
            {"id": "P2", "firstName": "C", "lastName": "D", "specialty": "GP", "city": "Lyon", "vingtile": 42}
        ]"#;
        assert!(PractitionerReader::new().from_json_str(json).is_err());

        let records = PractitionerReader::new().with_skip_invalid_records(true).from_json_str(json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "P1");
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let json = r#"[
            {"id": "P1", "firstName": "A", "lastName": "B", "specialty": "GP", "city": "Lyon", "vingtile": 3},
            {"id": "P1", "firstName": "C", "lastName": "D", "specialty": "GP", "city": "Lyon", "vingtile": 4}
        ]"#;
        assert!(PractitionerReader::new().from_json_str(json).is_err());
        let records = PractitionerReader::new().with_skip_invalid_records(true).from_json_str(json).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].first_name, "A");
    }

    #[test]
    fn test_load_json_lines_skips_blank_lines() {
        let jsonl = "{\"id\":\"P1\",\"firstName\":\"A\",\"lastName\":\"B\",\"specialty\":\"GP\",\"city\":\"Lyon\",\"vingtile\":1}\n\n\
                     {\"id\":\"P2\",\"firstName\":\"C\",\"lastName\":\"D\",\"specialty\":\"GP\",\"city\":\"Annecy\",\"vingtile\":9}\n";
        let file = temp_file(".jsonl", jsonl);
        let records = PractitionerReader::new().load(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].city, "Annecy");
    }

    #[test]
    fn test_load_csv_with_french_dates() {
        let csv = format!(
            "{}\nP1,Jean,Dupont,Dr.,Cardiology,true,Lyon,69003,500000,8.5,2,12,02/05/2024\nP2,Anne,Moreau,,GP,0,Grenoble,,\"1000,5\",6,11,3,\n",
            CSV_HEADER
        );
        let file = temp_file(".csv", &csv);
        let records = PractitionerReader::new().load(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].last_visit_date, NaiveDate::from_ymd_opt(2024, 5, 2));
        assert!(records[0].is_kol);
        assert_eq!(records[1].volume, 1000.5);
        assert_eq!(records[1].last_visit_date, None);
        assert_eq!(records[1].title, None);
    }

    #[test]
    fn test_csv_header_mismatch() {
        let csv = "id,name\nP1,Jean\n";
        let file = temp_file(".csv", csv);
        let err = PractitionerReader::new().load(file.path()).unwrap_err();
        assert!(matches!(err, MedrepError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = PractitionerReader::new().load("does/not/exist.json").unwrap_err();
        assert!(matches!(err, MedrepError::FileNotFound { .. }));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512.00 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
    }
}
