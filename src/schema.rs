/*!
 * Schema definitions for flat practitioner files
 *
 * CSV exports of a portfolio carry one row per practitioner and no nested
 * collections (notes, news, visits). This module fixes the column order the
 * reader expects and the exporter writes.
 */

use crate::MedrepError;

/// Flat practitioner CSV schema
///
/// Defines the 13 columns of a portfolio CSV file
pub struct PractitionerCsvSchema;

impl PractitionerCsvSchema {
    pub const ID: usize = 0;
    pub const FIRST_NAME: usize = 1;
    pub const LAST_NAME: usize = 2;
    pub const TITLE: usize = 3;
    pub const SPECIALTY: usize = 4;
    pub const IS_KOL: usize = 5;
    pub const CITY: usize = 6;
    pub const POSTAL_CODE: usize = 7;
    pub const VOLUME: usize = 8;
    pub const LOYALTY_SCORE: usize = 9;
    pub const VINGTILE: usize = 10;
    pub const POTENTIAL_GROWTH: usize = 11;
    pub const LAST_VISIT_DATE: usize = 12;

    /// Get all column names in the exact order they appear in the file
    pub fn column_names() -> Vec<&'static str> {
        vec![
            "id",
            "firstName",
            "lastName",
            "title",
            "specialty",
            "isKOL",
            "city",
            "postalCode",
            "volume",
            "loyaltyScore",
            "vingtile",
            "potentialGrowth",
            "lastVisitDate",
        ]
    }

    pub fn column_count() -> usize {
        Self::column_names().len()
    }

    /// Validate that a header row matches the schema.
    ///
    /// Names compare case-insensitively after trimming, so `IsKol` and
    /// ` isKOL ` are both accepted.
    pub fn validate_headers(headers: &[String]) -> Result<(), MedrepError> {
        let expected_columns = Self::column_names();

        if headers.len() != expected_columns.len() {
            return Err(MedrepError::schema_mismatch_detailed(
                expected_columns.len(),
                headers.len(),
                None,
            ));
        }

        for (i, (expected, actual)) in expected_columns.iter().zip(headers.iter()).enumerate() {
            if !expected.eq_ignore_ascii_case(actual.trim()) {
                return Err(MedrepError::schema_mismatch_detailed(
                    expected_columns.len(),
                    headers.len(),
                    Some((i, expected.to_string(), actual.clone())),
                ));
            }
        }

        Ok(())
    }
}

/// Result-point CSV schema: `name` followed by one column per metric
pub struct ResultCsvSchema;

impl ResultCsvSchema {
    pub const NAME_COLUMN: &'static str = "name";

    /// Header row for a set of metric names
    pub fn column_names<'a>(metrics: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        std::iter::once(Self::NAME_COLUMN).chain(metrics).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_column_indexes_match_names() {
        let columns = PractitionerCsvSchema::column_names();
        assert_eq!(columns[PractitionerCsvSchema::IS_KOL], "isKOL");
        assert_eq!(columns[PractitionerCsvSchema::LAST_VISIT_DATE], "lastVisitDate");
        assert_eq!(PractitionerCsvSchema::column_count(), 13);
    }

    #[test]
    fn test_validate_headers_accepts_case_variants() {
        let mut names = PractitionerCsvSchema::column_names();
        names[PractitionerCsvSchema::IS_KOL] = " IsKol ";
        assert!(PractitionerCsvSchema::validate_headers(&headers(&names)).is_ok());
    }

    #[test]
    fn test_validate_headers_reports_mismatch() {
        let mut names = PractitionerCsvSchema::column_names();
        names[PractitionerCsvSchema::CITY] = "town";
        let err = PractitionerCsvSchema::validate_headers(&headers(&names)).unwrap_err();
        match err {
            MedrepError::SchemaMismatch { mismatched_column, .. } => {
                assert_eq!(mismatched_column, Some((6, "city".to_string(), "town".to_string())));
            }
            other => panic!("unexpected error: {other}"),
        }

        let short = headers(&["id", "firstName"]);
        assert!(PractitionerCsvSchema::validate_headers(&short).is_err());
    }

    #[test]
    fn test_result_columns() {
        assert_eq!(ResultCsvSchema::column_names(["value", "count"]), vec!["name", "value", "count"]);
    }
}
