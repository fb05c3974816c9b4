//! XLSX chunk writer that stamps the shared header template onto one chunk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rust_xlsxwriter::{
    Format, FormatAlign, FormatBorder, FormatPattern, FormatUnderline, Workbook, Worksheet,
    XlsxError,
};

use crate::conf::{
    C_NUM_FORMAT_DATE, C_NUM_FORMAT_DATETIME, C_NUM_FORMAT_DURATION, C_NUM_FORMAT_TIME,
    C_OUTPUT_SHEET_NAME,
};
use crate::spec::{
    EnumBodyStyleMode, EnumCellValue, SpecCellFormat, SpecDataRow, SpecMergedRange,
};

/// Everything shared by every output file of one split run.
#[derive(Debug, Clone, Default)]
pub struct SpecChunkTemplate {
    /// Header rows (values), anchored at A1.
    pub header_rows: Vec<Vec<EnumCellValue>>,
    /// Source cell formats keyed by `(row, col)`. Covers the header, plus the
    /// data rows when body styling is on.
    pub formats: BTreeMap<(usize, usize), SpecCellFormat>,
    /// Merges reapplied at their source coordinates.
    pub merged_ranges: Vec<SpecMergedRange>,
    /// Column widths, alias already applied.
    pub col_widths: BTreeMap<usize, f64>,
    /// Row heights to reapply.
    pub row_heights: BTreeMap<usize, f64>,
    /// Zero-based hidden rows.
    pub rows_hidden: Vec<usize>,
    /// Zero-based hidden columns.
    pub cols_hidden: Vec<usize>,
    /// Data-row formatting.
    pub rule_body_style: EnumBodyStyleMode,
}

/// Stateful single-chunk workbook writer.
pub struct XlsxChunkWriter<'a> {
    path_file_out: PathBuf,
    workbook: Workbook,
    template: &'a SpecChunkTemplate,
    if_written: bool,
    if_closed: bool,
}

impl<'a> XlsxChunkWriter<'a> {
    /// Create writer bound to output path and shared template.
    ///
    /// The workbook is buffered in memory until [`Self::close`] is called.
    pub fn new(path_file_out: &Path, template: &'a SpecChunkTemplate) -> Self {
        Self {
            path_file_out: path_file_out.to_path_buf(),
            workbook: Workbook::new(),
            template,
            if_written: false,
            if_closed: false,
        }
    }

    /// Return output file path as string.
    pub fn file_out(&self) -> String {
        self.path_file_out.to_string_lossy().to_string()
    }

    /// Build the output worksheet for one chunk.
    pub fn write_chunk(&mut self, rows: &[SpecDataRow<'_>]) -> Result<(), String> {
        if self.if_closed {
            return Err("Cannot write after close().".to_string());
        }
        if self.if_written {
            return Err("Chunk already written; one chunk per file.".to_string());
        }

        let template = self.template;
        let worksheet = self.workbook.add_worksheet();
        worksheet
            .set_name(C_OUTPUT_SHEET_NAME)
            .map_err(derive_xlsx_error_text)?;

        write_merged_ranges(worksheet, template)?;
        write_header(worksheet, template)?;
        write_layout_dimensions(worksheet, template)?;
        write_body(worksheet, template, rows)?;
        write_hidden(worksheet, template)?;

        self.if_written = true;
        Ok(())
    }

    /// Flush workbook to disk. Idempotent.
    pub fn close(&mut self) -> Result<(), String> {
        if self.if_closed {
            return Ok(());
        }
        self.workbook
            .save(&self.path_file_out)
            .map_err(derive_xlsx_error_text)?;
        self.if_closed = true;
        Ok(())
    }
}

// Merges go first: `merge_range` stamps its format over the whole range, the
// per-cell writes that follow restore each cell's own value and format.
fn write_merged_ranges(
    worksheet: &mut Worksheet,
    template: &SpecChunkTemplate,
) -> Result<(), String> {
    for merge in &template.merged_ranges {
        let fmt = template
            .formats
            .get(&(merge.row_start, merge.col_start))
            .map(derive_rust_xlsx_format)
            .unwrap_or_else(Format::new);
        worksheet
            .merge_range(
                cast_row_num(merge.row_start)?,
                cast_col_num(merge.col_start)?,
                cast_row_num(merge.row_end)?,
                cast_col_num(merge.col_end)?,
                "",
                &fmt,
            )
            .map_err(derive_xlsx_error_text)?;
    }
    Ok(())
}

fn write_header(worksheet: &mut Worksheet, template: &SpecChunkTemplate) -> Result<(), String> {
    for (row_idx, row_values) in template.header_rows.iter().enumerate() {
        for (col_idx, cell_value) in row_values.iter().enumerate() {
            let spec_fmt = template.formats.get(&(row_idx, col_idx));
            let fmt = derive_cell_rust_format(spec_fmt, cell_value);
            write_cell(worksheet, row_idx, col_idx, cell_value, fmt.as_ref())?;
        }
    }
    Ok(())
}

fn write_layout_dimensions(
    worksheet: &mut Worksheet,
    template: &SpecChunkTemplate,
) -> Result<(), String> {
    for (col_idx, width) in &template.col_widths {
        worksheet
            .set_column_width(cast_col_num(*col_idx)?, *width)
            .map_err(derive_xlsx_error_text)?;
    }
    for (row_idx, height) in &template.row_heights {
        worksheet
            .set_row_height(cast_row_num(*row_idx)?, *height)
            .map_err(derive_xlsx_error_text)?;
    }
    Ok(())
}

fn write_body(
    worksheet: &mut Worksheet,
    template: &SpecChunkTemplate,
    rows: &[SpecDataRow<'_>],
) -> Result<(), String> {
    let n_row_offset = template.header_rows.len();
    let if_styled = template.rule_body_style == EnumBodyStyleMode::Styled;

    for (row_offset, data_row) in rows.iter().enumerate() {
        let row_idx = n_row_offset + row_offset;
        for (col_idx, cell_value) in data_row.cells.iter().enumerate() {
            let spec_fmt = if if_styled {
                template.formats.get(&(data_row.row_idx_src, col_idx))
            } else {
                None
            };
            let fmt = derive_cell_rust_format(spec_fmt, cell_value);
            write_cell(worksheet, row_idx, col_idx, cell_value, fmt.as_ref())?;
        }
    }
    Ok(())
}

fn write_hidden(worksheet: &mut Worksheet, template: &SpecChunkTemplate) -> Result<(), String> {
    for row_idx in &template.rows_hidden {
        worksheet
            .set_row_hidden(cast_row_num(*row_idx)?)
            .map_err(derive_xlsx_error_text)?;
    }
    for col_idx in &template.cols_hidden {
        worksheet
            .set_column_hidden(cast_col_num(*col_idx)?)
            .map_err(derive_xlsx_error_text)?;
    }
    Ok(())
}

/// Write one cell. Unformatted blanks are skipped.
fn write_cell(
    worksheet: &mut Worksheet,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    format: Option<&Format>,
) -> Result<(), String> {
    let n_row = cast_row_num(row_idx)?;
    let n_col = cast_col_num(col_idx)?;

    match (value, format) {
        (EnumCellValue::None, None) => {}
        (EnumCellValue::None, Some(fmt)) => {
            worksheet
                .write_blank(n_row, n_col, fmt)
                .map_err(derive_xlsx_error_text)?;
        }
        (EnumCellValue::String(val), None) => {
            worksheet
                .write_string(n_row, n_col, val)
                .map_err(derive_xlsx_error_text)?;
        }
        (EnumCellValue::String(val), Some(fmt)) => {
            worksheet
                .write_string_with_format(n_row, n_col, val, fmt)
                .map_err(derive_xlsx_error_text)?;
        }
        (EnumCellValue::Number(val), None) => {
            worksheet
                .write_number(n_row, n_col, *val)
                .map_err(derive_xlsx_error_text)?;
        }
        (EnumCellValue::DateTime(val) | EnumCellValue::Duration(val), None) => {
            let c_num_format = derive_temporal_num_format(value).unwrap_or(C_NUM_FORMAT_DATETIME);
            let fmt = Format::new().set_num_format(c_num_format);
            worksheet
                .write_number_with_format(n_row, n_col, *val, &fmt)
                .map_err(derive_xlsx_error_text)?;
        }
        (
            EnumCellValue::Number(val)
            | EnumCellValue::DateTime(val)
            | EnumCellValue::Duration(val),
            Some(fmt),
        ) => {
            worksheet
                .write_number_with_format(n_row, n_col, *val, fmt)
                .map_err(derive_xlsx_error_text)?;
        }
        (EnumCellValue::Boolean(val), None) => {
            worksheet
                .write_boolean(n_row, n_col, *val)
                .map_err(derive_xlsx_error_text)?;
        }
        (EnumCellValue::Boolean(val), Some(fmt)) => {
            worksheet
                .write_boolean_with_format(n_row, n_col, *val, fmt)
                .map_err(derive_xlsx_error_text)?;
        }
    }
    Ok(())
}

/// Output format of one cell: its source format, with a date format added
/// when a temporal value has none.
fn derive_cell_rust_format(
    spec_fmt: Option<&SpecCellFormat>,
    value: &EnumCellValue,
) -> Option<Format> {
    let c_num_format = derive_temporal_num_format(value);
    match (spec_fmt, c_num_format) {
        (Some(spec), Some(code)) if spec.num_format.is_none() => {
            Some(derive_rust_xlsx_format(spec).set_num_format(code))
        }
        (Some(spec), _) => Some(derive_rust_xlsx_format(spec)),
        (None, Some(code)) => Some(Format::new().set_num_format(code)),
        (None, None) => None,
    }
}

fn derive_temporal_num_format(value: &EnumCellValue) -> Option<&'static str> {
    match value {
        EnumCellValue::DateTime(val) if *val < 1.0 => Some(C_NUM_FORMAT_TIME),
        EnumCellValue::DateTime(val) if val.fract() == 0.0 => Some(C_NUM_FORMAT_DATE),
        EnumCellValue::DateTime(_) => Some(C_NUM_FORMAT_DATETIME),
        EnumCellValue::Duration(_) => Some(C_NUM_FORMAT_DURATION),
        _ => None,
    }
}

fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.italic.unwrap_or(false) {
        format = format.set_italic();
    }
    if let Some(val) = &spec.underline
        && let Some(underline) = derive_format_underline(val)
    {
        format = format.set_underline(underline);
    }
    if spec.strikethrough.unwrap_or(false) {
        format = format.set_font_strikethrough();
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }
    if let Some(val) = spec.rotation {
        format = format.set_rotation(val);
    }
    if let Some(val) = spec.indent {
        format = format.set_indent(val);
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    }
    if let Some(val) = &spec.bg_color {
        format = format
            .set_pattern(FormatPattern::Solid)
            .set_background_color(val.as_str());
    }

    if let Some(val) = spec.top {
        format = format.set_border_top(derive_format_border(val));
    }
    if let Some(val) = spec.bottom {
        format = format.set_border_bottom(derive_format_border(val));
    }
    if let Some(val) = spec.left {
        format = format.set_border_left(derive_format_border(val));
    }
    if let Some(val) = spec.right {
        format = format.set_border_right(derive_format_border(val));
    }
    if let Some(val) = &spec.top_color {
        format = format.set_border_top_color(val.as_str());
    }
    if let Some(val) = &spec.bottom_color {
        format = format.set_border_bottom_color(val.as_str());
    }
    if let Some(val) = &spec.left_color {
        format = format.set_border_left_color(val.as_str());
    }
    if let Some(val) = &spec.right_color {
        format = format.set_border_right_color(val.as_str());
    }

    if spec.locked == Some(false) {
        format = format.set_unlocked();
    }
    if spec.hidden.unwrap_or(false) {
        format = format.set_hidden();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        0 => FormatBorder::None,
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        8 => FormatBorder::MediumDashed,
        9 => FormatBorder::DashDot,
        10 => FormatBorder::MediumDashDot,
        11 => FormatBorder::DashDotDot,
        12 => FormatBorder::MediumDashDotDot,
        13 => FormatBorder::SlantDashDot,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        "top" => Some(FormatAlign::Top),
        "bottom" => Some(FormatAlign::Bottom),
        "vcenter" | "vertical_center" => Some(FormatAlign::VerticalCenter),
        "vjustify" | "vertical_justify" => Some(FormatAlign::VerticalJustify),
        "vdistributed" | "vertical_distributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

fn derive_format_underline(underline: &str) -> Option<FormatUnderline> {
    match underline {
        "single" => Some(FormatUnderline::Single),
        "double" => Some(FormatUnderline::Double),
        "single_accounting" => Some(FormatUnderline::SingleAccounting),
        "double_accounting" => Some(FormatUnderline::DoubleAccounting),
        _ => None,
    }
}

fn cast_row_num(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("row index overflow: {value}"))
}

fn cast_col_num(value: usize) -> Result<u16, String> {
    u16::try_from(value).map_err(|_| format!("column index overflow: {value}"))
}

fn derive_xlsx_error_text(err: XlsxError) -> String {
    format!("xlsx write error: {err}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_format_align_accepts_vertical_tokens() {
        assert_eq!(derive_format_align("vcenter"), Some(FormatAlign::VerticalCenter));
        assert_eq!(derive_format_align(" Left "), Some(FormatAlign::Left));
        assert_eq!(derive_format_align("sideways"), None);
    }

    #[test]
    fn test_derive_format_border_falls_back_to_none() {
        assert_eq!(derive_format_border(1), FormatBorder::Thin);
        assert_eq!(derive_format_border(13), FormatBorder::SlantDashDot);
        assert_eq!(derive_format_border(99), FormatBorder::None);
    }

    #[test]
    fn test_derive_temporal_num_format_by_value() {
        assert_eq!(
            derive_temporal_num_format(&EnumCellValue::DateTime(45292.0)),
            Some(C_NUM_FORMAT_DATE)
        );
        assert_eq!(
            derive_temporal_num_format(&EnumCellValue::DateTime(45292.25)),
            Some(C_NUM_FORMAT_DATETIME)
        );
        assert_eq!(
            derive_temporal_num_format(&EnumCellValue::DateTime(0.5)),
            Some(C_NUM_FORMAT_TIME)
        );
        assert_eq!(
            derive_temporal_num_format(&EnumCellValue::Duration(1.5)),
            Some(C_NUM_FORMAT_DURATION)
        );
        assert_eq!(derive_temporal_num_format(&EnumCellValue::Number(45292.0)), None);
    }

    #[test]
    fn test_derive_cell_rust_format_keeps_source_num_format() {
        let value = EnumCellValue::DateTime(45292.0);
        assert!(derive_cell_rust_format(None, &value).is_some());
        assert!(derive_cell_rust_format(None, &EnumCellValue::Number(1.0)).is_none());

        let spec_fmt = SpecCellFormat {
            num_format: Some("dd/mm/yyyy".to_string()),
            ..SpecCellFormat::default()
        };
        assert_eq!(
            derive_cell_rust_format(Some(&spec_fmt), &value),
            Some(derive_rust_xlsx_format(&spec_fmt))
        );
    }

    #[test]
    fn test_write_chunk_twice_is_rejected() {
        let template = SpecChunkTemplate::default();
        let mut writer = XlsxChunkWriter::new(Path::new("unused.xlsx"), &template);
        writer.write_chunk(&[]).unwrap();
        assert!(writer.write_chunk(&[]).is_err());
    }
}
