/*!
 * Export functionality for answers and portfolios
 *
 * Result rows export as JSON, JSON Lines or CSV (`name` plus one column per
 * metric). Portfolios export as JSON with every nested collection, or as the
 * flat CSV layout the reader accepts.
 */

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::data_types::*;
use crate::dataset::{PractitionerDataset, QueryOutcome};
use crate::executor::ResultPoint;
use crate::plan::QueryPlan;
use crate::schema::{PractitionerCsvSchema, ResultCsvSchema};
use crate::{ExportFormat, MedrepError, Result};

/// Trait for implementing exporters
pub trait Exporter {
    /// Write result rows in the plan's metric order
    fn export_results(&self, plan: &QueryPlan, results: &[ResultPoint], out: &mut dyn Write) -> Result<()>;

    /// Write practitioner records
    fn export_practitioners(&self, records: &[PractitionerRecord], out: &mut dyn Write) -> Result<()>;

    /// Get the export format
    fn format(&self) -> ExportFormat;
}

/// Exporter for a format with its default settings
pub fn exporter_for(format: ExportFormat) -> Box<dyn Exporter> {
    match format {
        ExportFormat::Json => Box::new(JsonExporter::new()),
        ExportFormat::JsonLines => Box::new(JsonExporter::new().as_json_lines()),
        ExportFormat::Csv => Box::new(CsvExporter::new()),
    }
}

/// Pick a format from a file extension
pub fn format_for_path(path: &Path) -> Option<ExportFormat> {
    match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "json" => Some(ExportFormat::Json),
        "jsonl" | "ndjson" => Some(ExportFormat::JsonLines),
        "csv" => Some(ExportFormat::Csv),
        _ => None,
    }
}

/// JSON exporter
#[derive(Debug, Clone)]
pub struct JsonExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
    /// Whether to export as JSON Lines (one record per line)
    pub json_lines: bool,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self {
            pretty_print: true,
            json_lines: false,
        }
    }
}

impl JsonExporter {
    /// Create a new JSON exporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set pretty printing
    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    /// Set JSON Lines format
    pub fn as_json_lines(mut self) -> Self {
        self.json_lines = true;
        self.pretty_print = false; // one document per line
        self
    }

    fn write_items<T: serde::Serialize>(&self, items: &[T], out: &mut dyn Write) -> Result<()> {
        let format = self.format();
        if self.json_lines {
            for item in items {
                serde_json::to_writer(&mut *out, item).map_err(|e| export_error(format, e))?;
                writeln!(out)?;
            }
        } else if self.pretty_print {
            serde_json::to_writer_pretty(&mut *out, items).map_err(|e| export_error(format, e))?;
            writeln!(out)?;
        } else {
            serde_json::to_writer(&mut *out, items).map_err(|e| export_error(format, e))?;
        }
        Ok(())
    }
}

impl Exporter for JsonExporter {
    fn export_results(&self, _plan: &QueryPlan, results: &[ResultPoint], out: &mut dyn Write) -> Result<()> {
        self.write_items(results, out)
    }

    fn export_practitioners(&self, records: &[PractitionerRecord], out: &mut dyn Write) -> Result<()> {
        self.write_items(records, out)
    }

    fn format(&self) -> ExportFormat {
        if self.json_lines {
            ExportFormat::JsonLines
        } else {
            ExportFormat::Json
        }
    }
}

/// CSV exporter
///
/// Practitioner exports are flat: notes, news and visits are not written.
#[derive(Debug, Clone)]
pub struct CsvExporter {
    /// Whether to include headers
    pub include_headers: bool,
    /// Field delimiter
    pub delimiter: u8,
}

impl Default for CsvExporter {
    fn default() -> Self {
        Self {
            include_headers: true,
            delimiter: b',',
        }
    }
}

impl CsvExporter {
    /// Create a new CSV exporter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the field delimiter
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set whether to write a header row
    pub fn with_headers(mut self, include: bool) -> Self {
        self.include_headers = include;
        self
    }

    fn writer<'w>(&self, out: &'w mut dyn Write) -> csv::Writer<&'w mut dyn Write> {
        csv::WriterBuilder::new().delimiter(self.delimiter).has_headers(false).from_writer(out)
    }
}

impl Exporter for CsvExporter {
    fn export_results(&self, plan: &QueryPlan, results: &[ResultPoint], out: &mut dyn Write) -> Result<()> {
        let metric_names: Vec<&str> = plan.metrics.iter().map(|m| m.name.as_str()).collect();
        let mut writer = self.writer(out);

        if self.include_headers {
            writer.write_record(ResultCsvSchema::column_names(metric_names.iter().copied()))?;
        }
        for point in results {
            let mut row = Vec::with_capacity(metric_names.len() + 1);
            row.push(point.name.clone());
            for name in &metric_names {
                row.push(point.value(name).map(format_number).unwrap_or_default());
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn export_practitioners(&self, records: &[PractitionerRecord], out: &mut dyn Write) -> Result<()> {
        let mut writer = self.writer(out);

        if self.include_headers {
            writer.write_record(PractitionerCsvSchema::column_names())?;
        }
        for record in records {
            writer.write_record(practitioner_row(record))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn format(&self) -> ExportFormat {
        ExportFormat::Csv
    }
}

/// Flat row in [`PractitionerCsvSchema`] column order
fn practitioner_row(record: &PractitionerRecord) -> Vec<String> {
    let mut row = vec![String::new(); PractitionerCsvSchema::column_count()];
    row[PractitionerCsvSchema::ID] = record.id.to_string();
    row[PractitionerCsvSchema::FIRST_NAME] = record.first_name.clone();
    row[PractitionerCsvSchema::LAST_NAME] = record.last_name.clone();
    row[PractitionerCsvSchema::TITLE] = record.title.clone().unwrap_or_default();
    row[PractitionerCsvSchema::SPECIALTY] = record.specialty.clone();
    row[PractitionerCsvSchema::IS_KOL] = record.is_kol.to_string();
    row[PractitionerCsvSchema::CITY] = record.city.clone();
    row[PractitionerCsvSchema::POSTAL_CODE] = record.postal_code.clone().unwrap_or_default();
    row[PractitionerCsvSchema::VOLUME] = record.volume.to_string();
    row[PractitionerCsvSchema::LOYALTY_SCORE] = record.loyalty_score.to_string();
    row[PractitionerCsvSchema::VINGTILE] = record.vingtile.to_string();
    row[PractitionerCsvSchema::POTENTIAL_GROWTH] = record.potential_growth.to_string();
    row[PractitionerCsvSchema::LAST_VISIT_DATE] = record
        .last_visit_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    row
}

fn export_error(format: ExportFormat, err: impl std::fmt::Display) -> MedrepError {
    MedrepError::Export {
        message: err.to_string(),
        format,
        suggestion: None,
    }
}

/// Create `path` (and its parent directories) and hand a buffered writer to `write`
fn write_to_path<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    write(&mut writer)?;
    writer.flush()?;
    Ok(())
}

impl QueryOutcome {
    /// Export the result rows
    pub fn export<P: AsRef<Path>>(&self, path: P, format: ExportFormat) -> Result<()> {
        let exporter = exporter_for(format);
        write_to_path(path.as_ref(), |out| exporter.export_results(&self.plan, &self.results, out))
    }
}

impl PractitionerDataset {
    /// Export to JSON format
    pub fn export_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.export(path, ExportFormat::Json)
    }

    /// Export to flat CSV format
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.export(path, ExportFormat::Csv)
    }

    /// Export every practitioner in the given format
    pub fn export<P: AsRef<Path>>(&self, path: P, format: ExportFormat) -> Result<()> {
        export_practitioners(&self.practitioners, path, format)
    }

    /// Export only the practitioners matching a predicate
    pub fn export_subset<P: AsRef<Path>, F>(&self, path: P, filter: F, format: ExportFormat) -> Result<()>
    where
        F: Fn(&PractitionerRecord) -> bool,
    {
        let subset: Vec<PractitionerRecord> = self.practitioners.iter().filter(|p| filter(*p)).cloned().collect();
        export_practitioners(&subset, path, format)
    }
}

/// Write records to a file
pub fn export_practitioners<P: AsRef<Path>>(records: &[PractitionerRecord], path: P, format: ExportFormat) -> Result<()> {
    let exporter = exporter_for(format);
    write_to_path(path.as_ref(), |out| exporter.export_practitioners(records, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{GroupDimension, Metric, ValueFormat};
    use crate::reader::PractitionerReader;
    use crate::sample::{practitioner, SampleGenerator};
    use chrono::NaiveDate;

    fn plan() -> QueryPlan {
        QueryPlan::new("practitioners")
            .group_by(GroupDimension::Field(Field::City))
            .metric(Metric::sum("value", Field::Volume).with_format(ValueFormat::Thousands))
            .metric(Metric::count("count"))
    }

    fn rows() -> Vec<ResultPoint> {
        vec![
            ResultPoint::new("Lyon").with_value("value", 800.0).with_value("count", 2.0),
            ResultPoint::new("Saint-Étienne, Loire").with_value("value", 12.5).with_value("count", 1.0),
        ]
    }

    #[test]
    fn test_results_to_csv() {
        let mut out = Vec::new();
        CsvExporter::new().export_results(&plan(), &rows(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "name,value,count\nLyon,800,2\n\"Saint-Étienne, Loire\",12.5,1\n");
    }

    #[test]
    fn test_results_to_semicolon_csv_without_headers() {
        let mut out = Vec::new();
        CsvExporter::new()
            .with_delimiter(b';')
            .with_headers(false)
            .export_results(&plan(), &rows(), &mut out)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Lyon;800;2\nSaint-Étienne, Loire;12.5;1\n");
    }

    #[test]
    fn test_results_to_json_lines() {
        let mut out = Vec::new();
        JsonExporter::new().as_json_lines().export_results(&plan(), &rows(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"name":"Lyon","value":800.0,"count":2.0}"#);
    }

    #[test]
    fn test_csv_practitioners_load_back() {
        let records = SampleGenerator::new(3)
            .with_reference_date(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
            .generate(20);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("portfolio.csv");
        export_practitioners(&records, &path, ExportFormat::Csv).unwrap();

        let loaded = PractitionerReader::new().load(&path).unwrap();
        assert_eq!(loaded.len(), records.len());
        for (original, flat) in records.iter().zip(&loaded) {
            assert_eq!(flat.id, original.id);
            assert_eq!(flat.vingtile, original.vingtile);
            assert_eq!(flat.last_visit_date, original.last_visit_date);
            assert!(flat.visits.is_empty());
        }
    }

    #[test]
    fn test_dataset_subset_export() {
        let dataset = PractitionerDataset::new(vec![
            practitioner("P1", "Jean", "Dupont", "Lyon", 10.0),
            practitioner("P2", "Marie", "Martin", "Annecy", 20.0),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("lyon.json");
        dataset.export_subset(&path, |p| p.city == "Lyon", ExportFormat::Json).unwrap();

        let loaded = PractitionerReader::new().load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].first_name, "Jean");
    }

    #[test]
    fn test_format_for_path() {
        assert_eq!(format_for_path(Path::new("a.CSV")), Some(ExportFormat::Csv));
        assert_eq!(format_for_path(Path::new("a.ndjson")), Some(ExportFormat::JsonLines));
        assert_eq!(format_for_path(Path::new("a.parquet")), None);
    }
}
