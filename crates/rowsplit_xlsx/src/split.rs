//! Split pipeline: load -> detect -> extract -> partition -> emit.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use crate::reader::XlsxSheetReader;
use crate::report::ReportSplit;
use crate::spec::{
    EnumBodyStyleMode, EnumNumFilesMode, SpecSplitOptions, SpecSplitSize, SplitError,
};
use crate::util::{
    SpecIdentifierPattern, derive_output_file_name, detect_data_start_row, extract_header_rows,
    extract_valid_data_rows, plan_column_widths, plan_row_chunks, plan_row_heights,
    resolve_layout, select_merged_ranges, validate_chunk_capacity,
};
use crate::writer::{SpecChunkTemplate, XlsxChunkWriter};

/// Split the data rows of one worksheet into `{prefix}_{NN}.xlsx` files.
///
/// Every argument is validated before the workbook is opened. On dry run
/// nothing is written and `dir_out` is not created. A failure while writing
/// aborts the run; files already written stay on disk.
pub fn split_workbook(
    file_in: &Path,
    dir_out: &Path,
    split_size: SpecSplitSize,
    options: &SpecSplitOptions,
) -> Result<ReportSplit, SplitError> {
    let t_start = Instant::now();
    let mut report = run_split(file_in, dir_out, split_size, options)?;
    report.duration_elapsed = t_start.elapsed();

    info!(
        files = report.files_written.len(),
        elapsed_secs = report.duration_elapsed.as_secs_f64(),
        "Split finished"
    );
    Ok(report)
}

fn run_split(
    file_in: &Path,
    dir_out: &Path,
    split_size: SpecSplitSize,
    options: &SpecSplitOptions,
) -> Result<ReportSplit, SplitError> {
    split_size.validate()?;
    validate_prefix(&options.prefix)?;
    let pattern = SpecIdentifierPattern::from_rule(&options.identifier_rule)?;
    let layout = resolve_layout(&options.layout)?;

    let mut reader = XlsxSheetReader::open(file_in)?;
    let c_sheet_name = reader.resolve_sheet_name(&options.sheet_selector)?;
    let mut sheet = reader.read_values(&c_sheet_name)?;
    if sheet.height() <= 1 {
        return Err(SplitError::EmptySheet {
            sheet_name: c_sheet_name,
        });
    }

    let n_row_data_start = detect_data_start_row(&sheet.rows, &pattern)?;
    let n_rows_header = n_row_data_start - 1;
    debug!(
        sheet = %c_sheet_name,
        data_start = n_row_data_start,
        "Detected header boundary"
    );

    if !options.if_dry_run {
        let n_rows_styled = match options.rule_body_style {
            EnumBodyStyleMode::ValuesOnly => n_rows_header,
            EnumBodyStyleMode::Styled => sheet.height(),
        };
        reader.read_formats(&mut sheet, 0..n_rows_styled)?;
    }

    let l_data_rows = extract_valid_data_rows(&sheet.rows, n_row_data_start, &pattern);
    let n_rows_valid = l_data_rows.len();
    let l_chunks = plan_row_chunks(n_rows_valid, split_size, options.rule_num_files);
    validate_chunk_capacity(n_rows_header, &l_chunks)?;
    debug!(rows = n_rows_valid, chunks = l_chunks.len(), "Planned row chunks");

    let mut report = ReportSplit {
        sheet_name: c_sheet_name,
        n_row_data_start,
        cnt_rows_scanned: sheet.height() as u64,
        cnt_rows_header: n_rows_header as u64,
        cnt_rows_valid: n_rows_valid as u64,
        cnt_rows_dropped: (sheet.height() - n_rows_header - n_rows_valid) as u64,
        chunk_sizes: l_chunks.iter().map(|(_, n_len)| *n_len).collect(),
        if_dry_run: options.if_dry_run,
        ..ReportSplit::default()
    };

    if let SpecSplitSize::NumFiles(n_files) = split_size
        && options.rule_num_files == EnumNumFilesMode::Legacy
        && l_chunks.len() < n_files
    {
        report.warn(format!(
            "Requested {n_files} files but {n_rows_valid} valid rows only yield {}.",
            l_chunks.len()
        ));
    }

    if options.if_dry_run {
        return Ok(report);
    }

    std::fs::create_dir_all(dir_out).map_err(|e| SplitError::OutputFailure {
        path: dir_out.to_path_buf(),
        message: e.to_string(),
    })?;

    let template = SpecChunkTemplate {
        header_rows: extract_header_rows(&sheet.rows, n_row_data_start).to_vec(),
        formats: std::mem::take(&mut sheet.formats),
        merged_ranges: select_merged_ranges(
            &sheet.merged_ranges,
            0..n_rows_header,
            layout.rule_merged_ranges,
        ),
        col_widths: plan_column_widths(&sheet.col_widths, &layout.cols_width_alias),
        row_heights: plan_row_heights(&sheet.row_heights, &layout.rows_height_copied),
        rows_hidden: layout.rows_hidden.clone(),
        cols_hidden: layout.cols_hidden.clone(),
        rule_body_style: options.rule_body_style,
    };

    for (n_idx, (n_row_start, n_row_len)) in l_chunks.iter().enumerate() {
        let path_file_out = dir_out.join(derive_output_file_name(&options.prefix, n_idx + 1));
        let derive_output_error = |message: String| SplitError::OutputFailure {
            path: path_file_out.clone(),
            message,
        };

        let mut writer = XlsxChunkWriter::new(&path_file_out, &template);
        writer
            .write_chunk(&l_data_rows[*n_row_start..n_row_start + n_row_len])
            .map_err(derive_output_error)?;
        writer.close().map_err(derive_output_error)?;

        info!("Written: {}", writer.file_out());
        report.files_written.push(path_file_out);
    }

    Ok(report)
}

fn validate_prefix(prefix: &str) -> Result<(), SplitError> {
    if prefix.is_empty() {
        return Err(SplitError::InvalidSplitSpec(
            "`prefix` must not be empty.".to_string(),
        ));
    }
    if prefix.contains(['/', '\\']) {
        return Err(SplitError::InvalidSplitSpec(format!(
            "`prefix` must not contain path separators: {prefix:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    use super::split_workbook;
    use crate::reader::read_sheet;
    use crate::spec::{
        EnumBodyStyleMode, EnumCellValue, EnumMergeScope, EnumNumFilesMode, EnumSheetSelector,
        SpecLayoutConventions, SpecMergedRange, SpecSheet, SpecSplitOptions, SpecSplitSize,
        SplitError,
    };
    use crate::util::derive_identifier_text;

    static N_TEST_DIRS: AtomicUsize = AtomicUsize::new(0);

    struct TestDir {
        path: PathBuf,
    }

    impl TestDir {
        fn new() -> Self {
            let n = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos();
            let k = N_TEST_DIRS.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!("rowsplit_xlsx_test_{n}_{k}"));
            std::fs::create_dir_all(&path).expect("create test dir");
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TestDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    const N_ROWS_VALID: u64 = 25;

    /// Cover sheet + data sheet: 3 header rows, 25 valid rows with a subtotal,
    /// a blank row and a merged footer mixed in. Returns the valid ids in order.
    fn write_fixture(path: &Path) -> Vec<String> {
        let mut workbook = Workbook::new();
        let fmt_bold = Format::new().set_bold();
        let fmt_italic = Format::new().set_italic();
        let fmt_protected = Format::new().set_unlocked().set_hidden();
        let fmt_date = Format::new().set_num_format("dd/mm/yyyy");
        let date_first = ExcelDateTime::from_ymd(2024, 1, 1).expect("date");

        let cover = workbook.add_worksheet();
        cover.set_name("Cover").expect("name");
        cover.write_string(0, 0, "cover page").expect("write");

        let sheet = workbook.add_worksheet();
        sheet.set_name("Data").expect("name");
        sheet
            .merge_range(0, 0, 0, 3, "Report Title", &fmt_bold)
            .expect("merge");
        sheet.write_string(1, 0, "Generated").expect("write");
        sheet.set_row_height(1, 30).expect("height");
        sheet.write_string(2, 0, "No").expect("write");
        sheet.write_string(2, 5, "Identifier").expect("write");
        sheet
            .write_string_with_format(2, 6, "Name", &fmt_protected)
            .expect("write");
        sheet.write_string(2, 7, "Joined").expect("write");
        sheet.set_column_width(11, 30).expect("width");
        sheet.set_column_width(12, 8).expect("width");

        let mut l_ids = Vec::new();
        let mut n_row = 3u32;
        for i in 0..N_ROWS_VALID {
            let n_id = 100_000_000_001u64 + i;
            sheet.write_number(n_row, 0, (i + 1) as f64).expect("write");
            if i == 7 {
                sheet.write_number(n_row, 5, n_id as f64).expect("write");
            } else {
                sheet.write_string(n_row, 5, n_id.to_string()).expect("write");
            }
            sheet
                .write_string_with_format(n_row, 6, format!("name {i}"), &fmt_italic)
                .expect("write");
            if i == 0 {
                sheet
                    .write_datetime_with_format(n_row, 7, &date_first, &fmt_date)
                    .expect("write");
            }
            l_ids.push(n_id.to_string());
            n_row += 1;

            if i == 4 {
                sheet.write_string(n_row, 5, "subtotal").expect("write");
                n_row += 1;
            }
            if i == 14 {
                n_row += 1;
            }
        }
        sheet
            .merge_range(n_row, 0, n_row, 2, "Total", &fmt_bold)
            .expect("merge");

        workbook.save(path).expect("save fixture");
        l_ids
    }

    fn read_output(path: &Path) -> SpecSheet {
        read_sheet(path, &EnumSheetSelector::Position(0), true).expect("read output")
    }

    fn derive_body_ids(sheet: &SpecSheet, n_rows_header: usize) -> Vec<String> {
        sheet.rows[n_rows_header..]
            .iter()
            .filter_map(|row| derive_identifier_text(&row[5]))
            .collect()
    }

    #[test]
    fn split_per_file_writes_expected_files() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out/nested");
        let l_ids = write_fixture(&file_in);

        let report = split_workbook(
            &file_in,
            &dir_out,
            SpecSplitSize::PerFile(10),
            &SpecSplitOptions::default(),
        )
        .expect("split");

        assert_eq!(report.sheet_name, "Data");
        assert_eq!(report.n_row_data_start, 4);
        assert_eq!(report.cnt_rows_header, 3);
        assert_eq!(report.cnt_rows_valid, N_ROWS_VALID);
        assert_eq!(report.chunk_sizes, vec![10, 10, 5]);
        assert_eq!(report.files_written.len(), 3);
        assert!(report.warnings.is_empty());
        assert!(dir_out.join("split_01.xlsx").exists());
        assert!(dir_out.join("split_02.xlsx").exists());
        assert!(dir_out.join("split_03.xlsx").exists());
        assert!(!dir_out.join("split_04.xlsx").exists());

        let mut l_ids_out = Vec::new();
        for (path, n_len) in report.files_written.iter().zip(&report.chunk_sizes) {
            let sheet = read_output(path);
            assert_eq!(sheet.sheet_name, "Sheet1");
            assert_eq!(sheet.height(), 3 + n_len);
            assert_eq!(
                sheet.rows[0][0],
                EnumCellValue::String("Report Title".to_string())
            );
            assert_eq!(
                sheet.rows[2][5],
                EnumCellValue::String("Identifier".to_string())
            );
            l_ids_out.extend(derive_body_ids(&sheet, 3));
        }
        assert_eq!(l_ids_out, l_ids);
    }

    #[test]
    fn split_output_carries_header_layout() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out");
        write_fixture(&file_in);

        split_workbook(
            &file_in,
            &dir_out,
            SpecSplitSize::NumFiles(1),
            &SpecSplitOptions::default(),
        )
        .expect("split");
        let sheet = read_output(&dir_out.join("split_01.xlsx"));

        assert_eq!(
            sheet.merged_ranges,
            vec![SpecMergedRange {
                row_start: 0,
                col_start: 0,
                row_end: 0,
                col_end: 3,
            }]
        );
        assert_eq!(sheet.formats.get(&(0, 0)).and_then(|f| f.bold), Some(true));
        assert_eq!(sheet.row_heights.get(&1), Some(&30.0));

        let n_width_l = sheet.col_widths.get(&11).copied().expect("width L");
        let n_width_m = sheet.col_widths.get(&12).copied().expect("width M");
        assert!((n_width_l - 30.0).abs() < 1.0);
        assert!((n_width_m - n_width_l).abs() < 1e-6);

        // Data rows are written as bare values by default.
        assert_ne!(sheet.formats.get(&(3, 6)).and_then(|f| f.italic), Some(true));
        assert_eq!(sheet.rows[3][6], EnumCellValue::String("name 0".to_string()));
    }

    #[test]
    fn split_output_keeps_dates_and_protection() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out");
        write_fixture(&file_in);

        split_workbook(
            &file_in,
            &dir_out,
            SpecSplitSize::PerFile(10),
            &SpecSplitOptions::default(),
        )
        .expect("split");
        let sheet = read_output(&dir_out.join("split_01.xlsx"));

        // Values-only body still reads back as a date, not a bare serial.
        assert_eq!(sheet.rows[3][7], EnumCellValue::DateTime(45292.0));
        assert_eq!(
            sheet.formats.get(&(3, 7)).and_then(|f| f.num_format.as_deref()),
            Some("yyyy-mm-dd")
        );

        let spec_fmt = sheet.formats.get(&(2, 6)).expect("header format");
        assert_eq!(spec_fmt.locked, Some(false));
        assert_eq!(spec_fmt.hidden, Some(true));
    }

    #[test]
    fn split_styled_body_keeps_source_date_format() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out");
        write_fixture(&file_in);

        let options = SpecSplitOptions {
            rule_body_style: EnumBodyStyleMode::Styled,
            ..SpecSplitOptions::default()
        };
        split_workbook(&file_in, &dir_out, SpecSplitSize::PerFile(10), &options).expect("split");
        let sheet = read_output(&dir_out.join("split_01.xlsx"));

        assert_eq!(sheet.rows[3][7], EnumCellValue::DateTime(45292.0));
        assert_eq!(
            sheet.formats.get(&(3, 7)).and_then(|f| f.num_format.as_deref()),
            Some("dd/mm/yyyy")
        );
    }

    #[test]
    fn split_styled_body_and_all_merges() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out");
        write_fixture(&file_in);

        let options = SpecSplitOptions {
            rule_body_style: EnumBodyStyleMode::Styled,
            layout: SpecLayoutConventions {
                rule_merged_ranges: EnumMergeScope::All,
                ..SpecLayoutConventions::default()
            },
            ..SpecSplitOptions::default()
        };
        split_workbook(&file_in, &dir_out, SpecSplitSize::NumFiles(1), &options).expect("split");
        let sheet = read_output(&dir_out.join("split_01.xlsx"));

        assert_eq!(sheet.formats.get(&(3, 6)).and_then(|f| f.italic), Some(true));
        assert_eq!(sheet.merged_ranges.len(), 2);
    }

    #[test]
    fn split_num_files_uses_ceiling_stride() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        write_fixture(&file_in);

        let report = split_workbook(
            &file_in,
            &tmp.path().join("out"),
            SpecSplitSize::NumFiles(3),
            &SpecSplitOptions::default(),
        )
        .expect("split");
        assert_eq!(report.chunk_sizes, vec![9, 9, 7]);
        assert_eq!(report.files_written.len(), 3);
    }

    #[test]
    fn split_num_files_legacy_undercount_warns_and_balanced_does_not() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        write_fixture(&file_in);

        // ceil(25 / 8) = 4 leaves only 7 chunks.
        let options = SpecSplitOptions {
            if_dry_run: true,
            ..SpecSplitOptions::default()
        };
        let report = split_workbook(
            &file_in,
            &tmp.path().join("out"),
            SpecSplitSize::NumFiles(8),
            &options,
        )
        .expect("split");
        assert_eq!(report.chunk_count(), 7);
        assert_eq!(report.warnings.len(), 1);

        let options = SpecSplitOptions {
            if_dry_run: true,
            rule_num_files: EnumNumFilesMode::Balanced,
            ..SpecSplitOptions::default()
        };
        let report = split_workbook(
            &file_in,
            &tmp.path().join("out"),
            SpecSplitSize::NumFiles(8),
            &options,
        )
        .expect("split");
        assert_eq!(report.chunk_sizes, vec![4, 3, 3, 3, 3, 3, 3, 3]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn split_dry_run_writes_nothing() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out");
        write_fixture(&file_in);

        let options = SpecSplitOptions {
            if_dry_run: true,
            ..SpecSplitOptions::default()
        };
        let report =
            split_workbook(&file_in, &dir_out, SpecSplitSize::PerFile(10), &options).expect("split");
        assert!(report.if_dry_run);
        assert_eq!(report.cnt_rows_valid, N_ROWS_VALID);
        assert_eq!(report.chunk_count(), 3);
        assert!(report.files_written.is_empty());
        assert!(!dir_out.exists());
    }

    #[test]
    fn split_is_idempotent_across_runs() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        write_fixture(&file_in);

        let l_dirs = [tmp.path().join("run1"), tmp.path().join("run2")];
        let mut l_runs = Vec::new();
        for dir_out in &l_dirs {
            let report = split_workbook(
                &file_in,
                dir_out,
                SpecSplitSize::PerFile(7),
                &SpecSplitOptions::default(),
            )
            .expect("split");
            let l_rows: Vec<Vec<Vec<EnumCellValue>>> = report
                .files_written
                .iter()
                .map(|path| read_output(path).rows)
                .collect();
            l_runs.push(l_rows);
        }
        assert_eq!(l_runs[0], l_runs[1]);
    }

    #[test]
    fn split_custom_prefix_and_sheet_name() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out");
        write_fixture(&file_in);

        let options = SpecSplitOptions {
            sheet_selector: EnumSheetSelector::Name("Data".to_string()),
            prefix: "batch".to_string(),
            ..SpecSplitOptions::default()
        };
        let report =
            split_workbook(&file_in, &dir_out, SpecSplitSize::PerFile(30), &options).expect("split");
        assert_eq!(report.files_written, vec![dir_out.join("batch_01.xlsx")]);
    }

    #[test]
    fn split_reports_selection_and_content_errors() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("out");
        write_fixture(&file_in);

        let run = |options: SpecSplitOptions| {
            split_workbook(&file_in, &dir_out, SpecSplitSize::PerFile(10), &options)
        };

        let err = run(SpecSplitOptions {
            sheet_selector: EnumSheetSelector::Name("Nope".to_string()),
            ..SpecSplitOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, SplitError::SheetNotFound { .. }));

        let err = run(SpecSplitOptions {
            sheet_selector: EnumSheetSelector::Position(5),
            ..SpecSplitOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, SplitError::SheetNotFound { .. }));

        // The cover sheet holds a single row.
        let err = run(SpecSplitOptions {
            sheet_selector: EnumSheetSelector::Position(0),
            ..SpecSplitOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, SplitError::EmptySheet { .. }));

        let mut options = SpecSplitOptions::default();
        options.identifier_rule.n_digits = 13;
        let err = run(options).unwrap_err();
        assert!(matches!(err, SplitError::NoDataFound { n_digits: 13, .. }));
        assert!(!dir_out.exists());
    }

    #[test]
    fn split_rejects_bad_arguments_before_reading() {
        let tmp = TestDir::new();
        let file_missing = tmp.path().join("missing.xlsx");
        let dir_out = tmp.path().join("out");

        let err = split_workbook(
            &file_missing,
            &dir_out,
            SpecSplitSize::PerFile(0),
            &SpecSplitOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::InvalidSplitSpec(_)));

        let options = SpecSplitOptions {
            prefix: "a/b".to_string(),
            ..SpecSplitOptions::default()
        };
        let err = split_workbook(&file_missing, &dir_out, SpecSplitSize::PerFile(1), &options)
            .unwrap_err();
        assert!(matches!(err, SplitError::InvalidSplitSpec(_)));

        let options = SpecSplitOptions {
            layout: SpecLayoutConventions {
                cols_hidden: vec!["?".to_string()],
                ..SpecLayoutConventions::default()
            },
            ..SpecSplitOptions::default()
        };
        let err = split_workbook(&file_missing, &dir_out, SpecSplitSize::PerFile(1), &options)
            .unwrap_err();
        assert!(matches!(err, SplitError::InvalidLayout(_)));

        let err = split_workbook(
            &file_missing,
            &dir_out,
            SpecSplitSize::PerFile(1),
            &SpecSplitOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::LoadFailure { .. }));
    }

    #[test]
    fn split_output_dir_collision_is_output_failure() {
        let tmp = TestDir::new();
        let file_in = tmp.path().join("input.xlsx");
        let dir_out = tmp.path().join("occupied");
        write_fixture(&file_in);
        std::fs::write(&dir_out, "not a directory").expect("write file");

        let err = split_workbook(
            &file_in,
            &dir_out,
            SpecSplitSize::PerFile(10),
            &SpecSplitOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplitError::OutputFailure { .. }));
    }
}
