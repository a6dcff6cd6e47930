//
// output.rs
// Dicom-Trolley-Tool-rs
//
// Turns query results into text for the console: an indented raw dump of the study tree, or a flat
// table with one row per object at the deepest level found.
//
// Thales Matheus Mendonça Santos - October 2026

use std::collections::BTreeSet;
use std::fmt::Write;

use dicom::core::value::Value;
use dicom::object::InMemDicomObject;
use tracing::{debug, warn};

use crate::client::Study;
use crate::dicom_access::{element_text, format_tag, keyword_for, keyword_values};
use crate::error::{Result, TrolleyToolError};
use crate::query::{split_error_results, QueryResult, StudyResult};

const TAB: &str = "  ";

/// How to display query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultFormat {
    #[default]
    Raw,
    Table,
    /// Github markup table
    Github,
    Csv,
}

/// Which DICOM object level rows are made of. Normally the deepest level present in the results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatLevel {
    Study,
    Series,
    Instance,
}

/// Turn query results into something you can print to console.
pub fn format_query_results(
    results: &[QueryResult],
    output_format: ResultFormat,
    output_field_filter: Option<&[String]>,
    format_level: Option<FormatLevel>,
) -> Result<String> {
    debug!("Formatting query results as {:?}", output_format);
    match output_format {
        ResultFormat::Raw => format_query_results_raw(results, output_field_filter),
        ResultFormat::Table => format_query_results_table(
            results,
            output_field_filter,
            format_level,
            TableStyle::Simple,
        ),
        ResultFormat::Github => format_query_results_table(
            results,
            output_field_filter,
            format_level,
            TableStyle::Github,
        ),
        ResultFormat::Csv => Err(TrolleyToolError::NotImplemented("CSV output".into())),
    }
}

/// Everything, as plainly as possible. Series and instances are indented.
pub fn format_query_results_raw(
    results: &[QueryResult],
    output_field_filter: Option<&[String]>,
) -> Result<String> {
    if output_field_filter.is_some_and(|f| !f.is_empty()) {
        return Err(TrolleyToolError::NotImplemented(
            "Field filtering for raw output (use grep)".into(),
        ));
    }
    let mut out = String::new();
    for (idx, result) in results.iter().enumerate() {
        let idx = idx + 1;
        let _ = writeln!(out, "= Query {idx} =");
        let _ = writeln!(out, "{}", result.query().short_string());
        match result {
            QueryResult::Error(error) => {
                let _ = writeln!(out, "Error. No Results found. Error: {}", error.error);
            }
            QueryResult::Study(found) => {
                let _ = writeln!(out, "= Result for query {idx} =");
                write_study(&found.study, &mut out);
            }
        }
    }
    Ok(out.trim_end().to_string())
}

fn write_study(study: &Study, out: &mut String) {
    let _ = writeln!(out, "Study: {}", study.uid);
    format_dataset(&study.data, 1, out);
    for series in &study.series {
        let _ = writeln!(out, "{TAB}Series: {}", series.uid);
        format_dataset(&series.data, 2, out);
        for instance in &series.instances {
            let _ = writeln!(out, "{TAB}{TAB}Instance: {}", instance.uid);
            format_dataset(&instance.data, 3, out);
        }
    }
}

/// One line per element, sequence items nested below their parent.
fn format_dataset(obj: &InMemDicomObject, depth: usize, out: &mut String) {
    let indent = TAB.repeat(depth);
    for elem in obj.iter() {
        let tag = elem.header().tag;
        let _ = writeln!(
            out,
            "{}{} {} {}: {}",
            indent,
            format_tag(tag),
            keyword_for(tag),
            elem.header().vr,
            element_text(elem)
        );
        if let Value::Sequence(seq) = elem.value() {
            for (idx, item) in seq.items().iter().enumerate() {
                let _ = writeln!(out, "{}{TAB}Item {}", indent, idx + 1);
                format_dataset(item, depth + 2, out);
            }
        }
    }
}

/// Level of detail shared by all results. Looks at the first series of each study only.
pub fn infer_format_level(results: &[&StudyResult]) -> Result<FormatLevel> {
    if results.is_empty() {
        return Err(TrolleyToolError::EmptyInput("Query results"));
    }
    let levels: BTreeSet<FormatLevel> = results
        .iter()
        .map(|result| match result.study.series.first() {
            Some(series) if !series.instances.is_empty() => FormatLevel::Instance,
            Some(_) => FormatLevel::Series,
            None => FormatLevel::Study,
        })
        .collect();

    let mut levels = levels.into_iter();
    match (levels.next(), levels.next()) {
        (Some(level), None) => {
            debug!(
                "Guessing format level {:?} based on content of {} results",
                level,
                results.len()
            );
            Ok(level)
        }
        (Some(first), Some(second)) => {
            let mut found = vec![first, second];
            found.extend(levels);
            Err(TrolleyToolError::InconsistentLevel(found))
        }
        (None, _) => Err(TrolleyToolError::EmptyInput("Query results")),
    }
}

/// A named column of cell values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<String>,
}

/// Rectangular table: every column holds one value per row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    /// Pad rows out to the union of their keys, in order of first appearance.
    fn from_rows(rows: Vec<Row>) -> Self {
        let mut headers: Vec<String> = Vec::new();
        for row in &rows {
            for (key, _) in &row.0 {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
        let columns = headers
            .into_iter()
            .map(|name| {
                let values = rows
                    .iter()
                    .map(|row| row.get(&name).unwrap_or_default().to_string())
                    .collect();
                Column { name, values }
            })
            .collect();
        Self { columns }
    }

    /// Keep only the named columns, in the order given. Unknown names are skipped.
    fn filtered(mut self, fields: &[String]) -> Self {
        let columns = fields
            .iter()
            .filter_map(|field| {
                let pos = self.columns.iter().position(|c| &c.name == field)?;
                Some(self.columns.remove(pos))
            })
            .collect();
        Self { columns }
    }
}

/// Keyword/value pairs for one row. Later values for the same keyword replace earlier ones in place.
#[derive(Debug, Clone, Default)]
struct Row(Vec<(String, String)>);

impl Row {
    fn set(&mut self, key: String, value: String) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key, value)),
        }
    }

    fn extend(&mut self, pairs: Vec<(String, String)>) {
        for (key, value) in pairs {
            self.set(key, value);
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn level_row(uid_keyword: &str, uid: &str, data: &InMemDicomObject, parent: Option<&Row>) -> Row {
    let mut row = parent.cloned().unwrap_or_default();
    row.set(uid_keyword.to_string(), uid.to_string());
    row.extend(keyword_values(data));
    row
}

/// Flatten the study trees into a table with one row per object at `format_level`. Parent values are
/// repeated on every child row so each line can be grepped on its own.
pub fn query_results_to_table(
    results: &[&StudyResult],
    output_field_filter: Option<&[String]>,
    format_level: Option<FormatLevel>,
) -> Result<Table> {
    let format_level = match format_level {
        Some(level) => level,
        None => infer_format_level(results)?,
    };

    let mut rows = Vec::new();
    for result in results {
        let study = &result.study;
        let study_row = level_row("StudyInstanceUID", &study.uid, &study.data, None);
        if format_level == FormatLevel::Study {
            rows.push(study_row);
            continue;
        }
        for series in &study.series {
            let series_row =
                level_row("SeriesInstanceUID", &series.uid, &series.data, Some(&study_row));
            if format_level == FormatLevel::Series {
                rows.push(series_row);
                continue;
            }
            for instance in &series.instances {
                rows.push(level_row(
                    "SOPInstanceUID",
                    &instance.uid,
                    &instance.data,
                    Some(&series_row),
                ));
            }
        }
    }

    let table = Table::from_rows(rows);
    match output_field_filter {
        Some(fields) if !fields.is_empty() => {
            debug!("Output field filter was given, filtering by {:?}", fields);
            Ok(table.filtered(fields))
        }
        _ => Ok(table),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableStyle {
    Simple,
    Github,
}

fn format_query_results_table(
    results: &[QueryResult],
    output_field_filter: Option<&[String]>,
    format_level: Option<FormatLevel>,
    style: TableStyle,
) -> Result<String> {
    let (studies, errors) = split_error_results(results);
    let table = query_results_to_table(&studies, output_field_filter, format_level)?;
    if !errors.is_empty() {
        warn!(
            "{} queries resulted in error. Excluding those from table",
            errors.len()
        );
    }
    Ok(render_table(&table, style))
}

/// Values are printed as given, so "00123" stays "00123".
fn render_table(table: &Table, style: TableStyle) -> String {
    if table.columns.is_empty() {
        return String::new();
    }
    let widths: Vec<usize> = table
        .columns
        .iter()
        .map(|c| {
            c.values
                .iter()
                .map(|v| v.chars().count())
                .chain(std::iter::once(c.name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        match style {
            TableStyle::Simple => padded.join("  ").trim_end().to_string(),
            TableStyle::Github => format!("| {} |", padded.join(" | ")),
        }
    };
    let rule = match style {
        TableStyle::Simple => widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("  "),
        TableStyle::Github => format!(
            "|{}|",
            widths
                .iter()
                .map(|w| "-".repeat(w + 2))
                .collect::<Vec<_>>()
                .join("|")
        ),
    };

    let mut lines = vec![line(table.headers()), rule];
    for row in 0..table.row_count() {
        lines.push(line(
            table
                .columns
                .iter()
                .map(|c| c.values[row].as_str())
                .collect(),
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{DicomClientError, Instance, Query, QueryLevel, Series};
    use crate::query::ErrorResult;
    use dicom::core::{DataElement, PrimitiveValue, Tag, VR};

    fn dataset(elements: &[(Tag, VR, &str)]) -> InMemDicomObject {
        InMemDicomObject::from_element_iter(
            elements
                .iter()
                .map(|(tag, vr, value)| DataElement::new(*tag, *vr, PrimitiveValue::from(*value))),
        )
    }

    const ACCESSION: Tag = Tag(0x0008, 0x0050);
    const PATIENT_ID: Tag = Tag(0x0010, 0x0020);
    const MODALITY: Tag = Tag(0x0008, 0x0060);
    const INSTANCE_NUMBER: Tag = Tag(0x0020, 0x0013);

    /// Study with `series` series of `instances` instances each. Only the first instance has
    /// an InstanceNumber, so tables must pad the others.
    fn a_study(uid: &str, accession: &str, series: usize, instances: usize) -> Study {
        let mut study = Study::new(
            uid,
            dataset(&[(ACCESSION, VR::SH, accession), (PATIENT_ID, VR::LO, "patient1")]),
        );
        for s in 0..series {
            study.series.push(Series {
                uid: format!("{uid}.{s}"),
                data: dataset(&[(MODALITY, VR::CS, "CT")]),
                instances: (0..instances)
                    .map(|i| Instance {
                        uid: format!("{uid}.{s}.{i}"),
                        data: if i == 0 {
                            dataset(&[(INSTANCE_NUMBER, VR::IS, "1")])
                        } else {
                            InMemDicomObject::new_empty()
                        },
                    })
                    .collect(),
            });
        }
        study
    }

    fn found(study: Study) -> QueryResult {
        QueryResult::Study(StudyResult {
            query: Query::by_study_uid(&study.uid).with_level(QueryLevel::Instance),
            study,
        })
    }

    fn failed(accession: &str) -> QueryResult {
        QueryResult::Error(ErrorResult {
            error: DicomClientError::NoResults(accession.into()),
            query: Query::by_accession_number(accession),
        })
    }

    fn studies(results: &[QueryResult]) -> Vec<&StudyResult> {
        split_error_results(results).0
    }

    #[test]
    fn level_is_inferred_from_the_tree_depth() {
        let study_only = [found(a_study("1", "a", 0, 0))];
        let with_series = [found(a_study("1", "a", 2, 0))];
        let with_instances = [found(a_study("1", "a", 1, 2))];

        assert_eq!(infer_format_level(&studies(&study_only)).unwrap(), FormatLevel::Study);
        assert_eq!(infer_format_level(&studies(&with_series)).unwrap(), FormatLevel::Series);
        assert_eq!(
            infer_format_level(&studies(&with_instances)).unwrap(),
            FormatLevel::Instance
        );
    }

    #[test]
    fn mixed_levels_are_rejected() {
        let mixed = [found(a_study("1", "a", 0, 0)), found(a_study("2", "b", 1, 1))];
        match infer_format_level(&studies(&mixed)) {
            Err(TrolleyToolError::InconsistentLevel(levels)) => {
                assert_eq!(levels, vec![FormatLevel::Study, FormatLevel::Instance]);
            }
            other => panic!("expected InconsistentLevel, got {other:?}"),
        }
        assert!(matches!(
            infer_format_level(&[]),
            Err(TrolleyToolError::EmptyInput(_))
        ));
    }

    #[test]
    fn instance_table_is_rectangular() {
        let results = [found(a_study("1", "a", 2, 3)), found(a_study("2", "b", 1, 1))];
        let table = query_results_to_table(&studies(&results), None, None).expect("table");

        assert_eq!(table.row_count(), 7);
        for column in table.columns() {
            assert_eq!(column.values.len(), 7, "column {} is ragged", column.name);
        }
        let numbers = table.column("InstanceNumber").expect("column");
        assert_eq!(numbers.iter().filter(|v| v.is_empty()).count(), 4);
        assert_eq!(table.column("PatientID").expect("column")[6], "patient1");
        assert_eq!(table.column("SOPInstanceUID").expect("column")[4], "1.1.1");
        assert_eq!(
            table.headers(),
            vec![
                "StudyInstanceUID",
                "AccessionNumber",
                "PatientID",
                "SeriesInstanceUID",
                "Modality",
                "SOPInstanceUID",
                "InstanceNumber",
            ]
        );
    }

    #[test]
    fn private_creators_get_separate_columns() {
        let study = Study::new(
            "1",
            dataset(&[
                (Tag(0x0009, 0x0010), VR::LO, "VENDOR_A"),
                (Tag(0x0019, 0x0010), VR::LO, "VENDOR_B"),
            ]),
        );
        let results = [found(study)];
        let table = query_results_to_table(&studies(&results), None, None).expect("table");

        assert_eq!(
            table.headers(),
            vec!["StudyInstanceUID", "(0009,0010)", "(0019,0010)"]
        );
        assert_eq!(table.column("(0009,0010)").expect("column"), ["VENDOR_A"]);
        assert_eq!(table.column("(0019,0010)").expect("column"), ["VENDOR_B"]);
    }

    #[test]
    fn field_filter_keeps_requested_columns_only() {
        let results = [found(a_study("1", "a", 2, 0))];
        let filter = vec![
            "Modality".to_string(),
            "AccessionNumber".to_string(),
            "StudyDate".to_string(),
        ];
        let table = query_results_to_table(&studies(&results), Some(&filter), None).expect("table");

        assert_eq!(table.headers(), vec!["Modality", "AccessionNumber"]);
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn explicit_level_overrides_inference() {
        let results = [found(a_study("1", "a", 2, 2))];
        let table =
            query_results_to_table(&studies(&results), None, Some(FormatLevel::Study)).expect("table");
        assert_eq!(table.row_count(), 1);
        assert!(table.column("Modality").is_none());
    }

    #[test]
    fn table_keeps_leading_zeros() {
        let results = [found(a_study("1", "00123", 0, 0)), failed("4")];
        let text = format_query_results(&results, ResultFormat::Table, None, None).expect("text");

        let mut lines = text.lines();
        let header = lines.next().expect("header");
        assert!(header.starts_with("StudyInstanceUID  AccessionNumber"));
        assert!(lines.next().expect("rule").starts_with("----------------"));
        let row = lines.next().expect("row");
        assert!(row.contains("00123"), "{row}");
        assert!(lines.next().is_none(), "error results are not rows");
    }

    #[test]
    fn github_table_has_pipes() {
        let results = [found(a_study("1", "00123", 0, 0))];
        let text = format_query_results(&results, ResultFormat::Github, None, None).expect("text");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("| StudyInstanceUID |"));
        assert!(lines[1].starts_with("|------------------|"));
        assert!(lines[2].contains("| 00123 "));
    }

    #[test]
    fn raw_output_shows_tree_and_errors_in_order() {
        let results = [found(a_study("1.2", "a", 1, 1)), failed("4")];
        let text = format_query_results(&results, ResultFormat::Raw, None, None).expect("text");

        assert!(text.starts_with("= Query 1 =\nINSTANCE level, StudyInstanceUID=1.2"));
        assert!(text.contains("= Result for query 1 =\nStudy: 1.2\n"));
        assert!(text.contains("  Series: 1.2.0\n"));
        assert!(text.contains("    Instance: 1.2.0.0\n"));
        assert!(text.contains("(0008,0050) AccessionNumber SH: a"));
        let error_at = text.find("= Query 2 =").expect("second query");
        assert!(text[error_at..].contains("Error. No Results found. Error:"));
    }

    #[test]
    fn unsupported_formats_are_not_implemented() {
        let results = [found(a_study("1", "a", 0, 0))];
        let filter = vec!["PatientID".to_string()];
        assert!(matches!(
            format_query_results(&results, ResultFormat::Raw, Some(&filter), None),
            Err(TrolleyToolError::NotImplemented(_))
        ));
        assert!(matches!(
            format_query_results(&results, ResultFormat::Csv, None, None),
            Err(TrolleyToolError::NotImplemented(_))
        ));
    }
}
