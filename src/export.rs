//! Export of classified records to JSON and Excel.
//!
//! Both formats use the flat row shape of [`FlatRecord`], so a record reads
//! the same in a spreadsheet, a JSON file and the CLI table.

use crate::error::InspectError;
use crate::output::{Classification, ClassifiedDefectRecord, FlatRecord};
use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};
use std::path::Path;
use tracing::info;

/// Sheet names paired with the classification they hold (`None` = all).
const SHEETS: [(&str, Option<Classification>); 3] = [
    ("All Defects", None),
    ("Site-Related Defects", Some(Classification::SiteRelated)),
    ("Equipment-Related Defects", Some(Classification::EquipmentRelated)),
];

/// Column widths in characters, in [`FlatRecord::COLUMNS`] order.
const COLUMN_WIDTHS: [f64; 10] = [28.0, 6.0, 8.0, 8.0, 60.0, 60.0, 14.0, 20.0, 11.0, 50.0];

/// Pretty-printed JSON array of flat records.
pub fn to_json<'a>(
    records: impl IntoIterator<Item = &'a ClassifiedDefectRecord>,
) -> Result<String, InspectError> {
    let flat: Vec<FlatRecord> = records.into_iter().map(|r| r.to_flat()).collect();
    serde_json::to_string_pretty(&flat)
        .map_err(|e| InspectError::ExportFailed(format!("JSON serialisation: {e}")))
}

/// Build the workbook in memory and return the `.xlsx` bytes.
pub fn xlsx_bytes(records: &[ClassifiedDefectRecord]) -> Result<Vec<u8>, InspectError> {
    let mut workbook = build_workbook(records)?;
    Ok(workbook.save_to_buffer()?)
}

/// Write the workbook to `path`.
///
/// Uses atomic write (temp file + rename) so a reader never sees a partial
/// spreadsheet.
pub fn write_xlsx(
    records: &[ClassifiedDefectRecord],
    path: impl AsRef<Path>,
) -> Result<(), InspectError> {
    let path = path.as_ref();
    let bytes = xlsx_bytes(records)?;

    let write_err = |e: std::io::Error| InspectError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }

    let tmp_path = path.with_extension("xlsx.tmp");
    std::fs::write(&tmp_path, &bytes).map_err(write_err)?;
    std::fs::rename(&tmp_path, path).map_err(write_err)?;

    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// The workbook's sheets in order, each with the rows it holds.
///
/// "All Defects" holds every record; the other two hold only their
/// classification. Relative record order is kept on every sheet.
pub fn sheet_rows(records: &[ClassifiedDefectRecord]) -> Vec<(&'static str, Vec<FlatRecord>)> {
    SHEETS
        .iter()
        .map(|&(name, only)| {
            let rows = records
                .iter()
                .filter(|r| only.is_none_or(|c| r.classification == c))
                .map(|r| r.to_flat())
                .collect();
            (name, rows)
        })
        .collect()
}

fn build_workbook(records: &[ClassifiedDefectRecord]) -> Result<Workbook, XlsxError> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let wrap = Format::new().set_text_wrap();

    for (name, rows) in sheet_rows(records) {
        let sheet = workbook.add_worksheet();
        sheet.set_name(name)?;
        write_sheet(sheet, &rows, &header, &wrap)?;
    }

    Ok(workbook)
}

fn write_sheet(
    sheet: &mut Worksheet,
    rows: &[FlatRecord],
    header: &Format,
    wrap: &Format,
) -> Result<(), XlsxError> {
    for (col, (title, width)) in FlatRecord::COLUMNS.iter().zip(COLUMN_WIDTHS).enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, *title, header)?;
        sheet.set_column_width(col, width)?;
    }
    sheet.set_freeze_panes(1, 0)?;

    for (i, row) in rows.iter().enumerate() {
        let r = (i + 1) as u32;
        sheet.write_string(r, 0, row.file.as_str())?;
        sheet.write_number(r, 1, row.page as f64)?;
        sheet.write_string(r, 2, row.number.as_str())?;
        sheet.write_string(r, 3, row.code.as_str())?;
        sheet.write_string_with_format(r, 4, row.description.as_str(), wrap)?;
        sheet.write_string_with_format(r, 5, row.english_translation.as_str(), wrap)?;
        sheet.write_string(r, 6, row.severity.as_str())?;
        sheet.write_string(r, 7, row.classification.label())?;
        sheet.write_string(r, 8, row.confidence.label())?;
        sheet.write_string_with_format(r, 9, row.reasoning.as_str(), wrap)?;
    }

    if !rows.is_empty() {
        sheet.autofilter(0, 0, rows.len() as u32, (FlatRecord::COLUMNS.len() - 1) as u16)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{ClassificationResult, Confidence, Provenance, RawDefectCandidate};

    fn record(description: &str, classification: Classification) -> ClassifiedDefectRecord {
        let mut candidate = RawDefectCandidate::new(description);
        candidate.code = Some("704".into());
        ClassifiedDefectRecord::new(
            candidate,
            ClassificationResult {
                classification,
                confidence: Confidence::High,
                reasoning: "test".into(),
                english_translation: description.into(),
            },
            Provenance {
                source_filename: "report.pdf".into(),
                page_number: 2,
                extraction_order: 0,
            },
        )
    }

    #[test]
    fn json_uses_flat_rows() {
        let records = vec![record("Door sensor faulty", Classification::EquipmentRelated)];
        let json = to_json(&records).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["file"], "report.pdf");
        assert_eq!(value[0]["page"], 2);
        assert_eq!(value[0]["code"], "704");
        assert_eq!(value[0]["number"], "");
        assert_eq!(value[0]["classification"], "EquipmentRelated");
    }

    #[test]
    fn json_of_nothing_is_empty_array() {
        assert_eq!(to_json(&Vec::<ClassifiedDefectRecord>::new()).unwrap(), "[]");
    }

    #[test]
    fn xlsx_bytes_is_a_zip_container() {
        let records = vec![
            record("Door sensor faulty", Classification::EquipmentRelated),
            record("Shaft lighting missing", Classification::SiteRelated),
        ];
        let bytes = xlsx_bytes(&records).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn sheets_hold_matching_records_in_order() {
        let records = vec![
            record("Door sensor faulty", Classification::EquipmentRelated),
            record("Shaft lighting missing", Classification::SiteRelated),
            record("Logbook incomplete", Classification::EquipmentRelated),
            record("Pit flooded", Classification::SiteRelated),
            record("Rope tension uneven", Classification::ClassificationError),
        ];
        let sheets = sheet_rows(&records);
        let names: Vec<&str> = sheets.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec!["All Defects", "Site-Related Defects", "Equipment-Related Defects"]
        );

        let descriptions = |i: usize| -> Vec<String> {
            sheets[i].1.iter().map(|r| r.description.clone()).collect()
        };
        assert_eq!(descriptions(0).len(), 5);
        assert_eq!(descriptions(1), vec!["Shaft lighting missing", "Pit flooded"]);
        assert_eq!(descriptions(2), vec!["Door sensor faulty", "Logbook incomplete"]);
    }

    #[test]
    fn empty_result_still_produces_workbook() {
        assert!(!xlsx_bytes(&[]).unwrap().is_empty());
    }

    #[test]
    fn write_xlsx_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("analysis.xlsx");
        write_xlsx(&[record("Brake worn", Classification::EquipmentRelated)], &path).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("xlsx.tmp").exists());
        assert_eq!(&std::fs::read(&path).unwrap()[..2], b"PK");
    }
}
