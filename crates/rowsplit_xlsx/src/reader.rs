//! Workbook loader backed by `calamine-styles`.
//!
//! Values, merges and row/column dimensions are read eagerly; cell formats
//! are read on demand for a row window so a values-only split never walks
//! the style grid of the data region.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::{Path, PathBuf};

use calamine_styles::{
    Alignment, BorderStyle as CalBorderStyle, Color, Data, Fill, FillPattern, Font, FontStyle,
    FontWeight, HorizontalAlignment, Reader, Style, TextRotation, UnderlineStyle,
    VerticalAlignment, Xlsx,
};
use chrono::NaiveDateTime;
use tracing::debug;

use crate::conf::N_NCOLS_EXCEL_MAX;
use crate::spec::{
    EnumCellValue, EnumSheetSelector, SpecCellFormat, SpecMergedRange, SpecSheet, SplitError,
};

type XlsxReader = Xlsx<BufReader<File>>;

// Excel stores column widths with font-metric padding included.
const N_WIDTH_PADDING_CALIBRI: f64 = 0.83203125;
const N_WIDTH_PADDING_ALT: f64 = 0.7109375;
const N_WIDTH_TOLERANCE: f64 = 0.0005;

// 1970-01-01 in the 1900 date system.
const N_SERIAL_UNIX_EPOCH: f64 = 25_569.0;
const N_MS_PER_DAY: f64 = 86_400_000.0;

/// Open workbook handle used by the split pipeline.
pub struct XlsxSheetReader {
    path_file_in: PathBuf,
    workbook: XlsxReader,
    l_sheet_names: Vec<String>,
}

impl XlsxSheetReader {
    /// Open the workbook at `path_file_in`.
    pub fn open(path_file_in: &Path) -> Result<Self, SplitError> {
        let file = File::open(path_file_in)
            .map_err(|e| derive_load_error(path_file_in, format!("Failed to open file: {e}")))?;
        let workbook: XlsxReader = Xlsx::new(BufReader::new(file))
            .map_err(|e| derive_load_error(path_file_in, format!("Failed to parse xlsx: {e}")))?;
        let l_sheet_names = workbook.sheet_names().to_vec();

        Ok(Self {
            path_file_in: path_file_in.to_path_buf(),
            workbook,
            l_sheet_names,
        })
    }

    /// Sheet names in document order.
    pub fn sheet_names(&self) -> &[String] {
        &self.l_sheet_names
    }

    /// Resolve a selector to an existing sheet name.
    pub fn resolve_sheet_name(&self, selector: &EnumSheetSelector) -> Result<String, SplitError> {
        let c_sheet_name = match selector {
            EnumSheetSelector::Name(name) => self.l_sheet_names.iter().find(|c| *c == name),
            EnumSheetSelector::Position(idx) => self.l_sheet_names.get(*idx),
        };
        c_sheet_name.cloned().ok_or_else(|| SplitError::SheetNotFound {
            selector: selector.clone(),
            sheet_names: self.l_sheet_names.clone(),
        })
    }

    /// Read values, merges, column widths and row heights of one sheet.
    ///
    /// The returned sheet has an empty format map; see [`Self::read_formats`].
    pub fn read_values(&mut self, sheet_name: &str) -> Result<SpecSheet, SplitError> {
        let range = self
            .workbook
            .worksheet_range(sheet_name)
            .map_err(|e| self.derive_error(format!("Failed to read sheet {sheet_name}: {e}")))?;

        let (n_height, n_width) = range.get_size();
        let (n_row_origin, n_col_origin) = range.start().unwrap_or((0, 0));
        let (n_row_origin, n_col_origin) = (n_row_origin as usize, n_col_origin as usize);

        let mut rows = Vec::new();
        if n_height > 0 && n_width > 0 {
            let n_cols = n_col_origin + n_width;
            rows.reserve(n_row_origin + n_height);
            rows.resize_with(n_row_origin, || vec![EnumCellValue::None; n_cols]);
            for row_src in range.rows() {
                let mut row = vec![EnumCellValue::None; n_cols];
                for (col_offset, value) in row_src.iter().enumerate() {
                    row[n_col_origin + col_offset] = derive_cell_value(value);
                }
                rows.push(row);
            }
        }

        let merged_ranges = self.read_merged_ranges(sheet_name)?;

        let layout = self
            .workbook
            .worksheet_layout(sheet_name)
            .map_err(|e| self.derive_error(format!("Layout error for {sheet_name}: {e}")))?;
        let n_cols_layout = rows.first().map_or(0, Vec::len);

        // Width rules may target columns beyond the used range.
        let mut col_widths = BTreeMap::new();
        for col_idx in 0..N_NCOLS_EXCEL_MAX {
            let Ok(col_num) = u32::try_from(col_idx) else {
                break;
            };
            if let Some(width) = layout
                .get_column_width(col_num)
                .filter(|cw| cw.custom_width)
                .map(|cw| strip_excel_padding(cw.width))
            {
                col_widths.insert(col_idx, width);
            }
        }

        let mut row_heights = BTreeMap::new();
        for row_idx in 0..rows.len() {
            let Ok(row_num) = u32::try_from(row_idx) else {
                break;
            };
            if let Some(height) = layout
                .get_row_height(row_num)
                .filter(|rh| rh.custom_height)
                .map(|rh| rh.height)
            {
                row_heights.insert(row_idx, height);
            }
        }

        debug!(
            sheet = sheet_name,
            n_rows = rows.len(),
            n_cols = n_cols_layout,
            n_merges = merged_ranges.len(),
            "Loaded sheet values"
        );

        Ok(SpecSheet {
            sheet_name: sheet_name.to_string(),
            rows,
            formats: BTreeMap::new(),
            merged_ranges,
            col_widths,
            row_heights,
        })
    }

    /// Read non-empty cell formats for `rows` into `sheet.formats`.
    pub fn read_formats(
        &mut self,
        sheet: &mut SpecSheet,
        rows: Range<usize>,
    ) -> Result<(), SplitError> {
        let styles = self.workbook.worksheet_style(&sheet.sheet_name).map_err(|e| {
            self.derive_error(format!("Style error for {}: {e}", sheet.sheet_name))
        })?;
        let (n_row_origin, n_col_origin) = styles.start().unwrap_or((0, 0));
        let (n_row_origin, n_col_origin) = (n_row_origin as usize, n_col_origin as usize);
        let n_cols = sheet.width();

        for row_idx in rows.start..rows.end.min(sheet.height()) {
            if row_idx < n_row_origin {
                continue;
            }
            for col_idx in n_col_origin..n_cols {
                let Some(style) = styles.get((row_idx - n_row_origin, col_idx - n_col_origin))
                else {
                    continue;
                };
                let spec_fmt = derive_cell_format(style);
                if !spec_fmt.is_empty() {
                    sheet.formats.insert((row_idx, col_idx), spec_fmt);
                }
            }
        }
        Ok(())
    }

    fn read_merged_ranges(&mut self, sheet_name: &str) -> Result<Vec<SpecMergedRange>, SplitError> {
        self.workbook
            .load_merged_regions()
            .map_err(|e| self.derive_error(format!("Failed to load merged regions: {e}")))?;

        let l_dims = match self.workbook.worksheet_merge_cells(sheet_name) {
            Some(Ok(l_dims)) => l_dims,
            Some(Err(e)) => {
                return Err(self.derive_error(format!(
                    "Failed to read merged cells of {sheet_name}: {e}"
                )));
            }
            None => Vec::new(),
        };

        let mut l_merges: Vec<SpecMergedRange> = l_dims
            .iter()
            .map(|dim| SpecMergedRange {
                row_start: dim.start.0 as usize,
                col_start: dim.start.1 as usize,
                row_end: dim.end.0 as usize,
                col_end: dim.end.1 as usize,
            })
            .collect();
        l_merges.sort_unstable();
        Ok(l_merges)
    }

    fn derive_error(&self, message: String) -> SplitError {
        derive_load_error(&self.path_file_in, message)
    }
}

/// Load one sheet, optionally with every cell format.
pub fn read_sheet(
    path_file_in: &Path,
    selector: &EnumSheetSelector,
    if_read_formats: bool,
) -> Result<SpecSheet, SplitError> {
    let mut reader = XlsxSheetReader::open(path_file_in)?;
    let c_sheet_name = reader.resolve_sheet_name(selector)?;
    let mut sheet = reader.read_values(&c_sheet_name)?;
    if if_read_formats {
        let n_rows = sheet.height();
        reader.read_formats(&mut sheet, 0..n_rows)?;
    }
    Ok(sheet)
}

fn derive_load_error(path: &Path, message: String) -> SplitError {
    SplitError::LoadFailure {
        path: path.to_path_buf(),
        message,
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region ValueConversion

fn derive_cell_value(value: &Data) -> EnumCellValue {
    match value {
        Data::Empty => EnumCellValue::None,
        Data::String(s) => EnumCellValue::String(s.clone()),
        Data::Float(f) => EnumCellValue::Number(*f),
        Data::Int(i) => EnumCellValue::Number(*i as f64),
        Data::Bool(b) => EnumCellValue::Boolean(*b),
        Data::DateTime(dt) if dt.is_duration() => EnumCellValue::Duration(dt.as_f64()),
        Data::DateTime(dt) => EnumCellValue::DateTime(
            dt.as_datetime()
                .map_or_else(|| dt.as_f64(), |ndt| derive_excel_serial(&ndt)),
        ),
        Data::DateTimeIso(s) | Data::DurationIso(s) => EnumCellValue::String(s.clone()),
        Data::RichText(rt) => EnumCellValue::String(rt.plain_text().to_string()),
        Data::Error(e) => EnumCellValue::String(format!("{e}")),
    }
}

/// 1900-epoch serial of a calendar datetime.
///
/// Serials below 61 keep Excel's phantom 1900-02-29, so January and February
/// 1900 sit one day lower than the plain day count.
fn derive_excel_serial(ndt: &NaiveDateTime) -> f64 {
    let n_days = ndt.and_utc().timestamp_millis() as f64 / N_MS_PER_DAY + N_SERIAL_UNIX_EPOCH;
    if n_days < 61.0 { n_days - 1.0 } else { n_days }
}

fn strip_excel_padding(raw: f64) -> f64 {
    let frac = raw % 1.0;
    for padding in [N_WIDTH_PADDING_CALIBRI, N_WIDTH_PADDING_ALT] {
        if (frac - padding).abs() < N_WIDTH_TOLERANCE {
            let adjusted = raw - padding;
            if adjusted >= 0.0 {
                return (adjusted * 10000.0).round() / 10000.0;
            }
        }
    }
    (raw * 10000.0).round() / 10000.0
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FormatConversion

fn derive_cell_format(style: &Style) -> SpecCellFormat {
    let mut spec_fmt = SpecCellFormat::default();

    if let Some(font) = &style.font {
        apply_font(&mut spec_fmt, font);
    }
    if let Some(fill) = &style.fill {
        apply_fill(&mut spec_fmt, fill);
    }
    if let Some(nf) = &style.number_format
        && nf.format_code != "General"
    {
        spec_fmt.num_format = Some(nf.format_code.clone());
    }
    if let Some(align) = &style.alignment {
        apply_alignment(&mut spec_fmt, align);
    }
    if let Some(protection) = &style.protection {
        spec_fmt.locked = (!protection.locked).then_some(false);
        spec_fmt.hidden = protection.hidden.then_some(true);
    }
    if let Some(borders) = &style.borders {
        (spec_fmt.top, spec_fmt.top_color) = derive_border_edge(&borders.top);
        (spec_fmt.bottom, spec_fmt.bottom_color) = derive_border_edge(&borders.bottom);
        (spec_fmt.left, spec_fmt.left_color) = derive_border_edge(&borders.left);
        (spec_fmt.right, spec_fmt.right_color) = derive_border_edge(&borders.right);
    }

    spec_fmt
}

fn apply_font(spec_fmt: &mut SpecCellFormat, font: &Font) {
    if font.weight == FontWeight::Bold {
        spec_fmt.bold = Some(true);
    }
    if font.style == FontStyle::Italic {
        spec_fmt.italic = Some(true);
    }
    spec_fmt.underline = derive_underline_token(&font.underline).map(str::to_string);
    if font.strikethrough {
        spec_fmt.strikethrough = Some(true);
    }
    spec_fmt.font_name = font.name.clone();
    spec_fmt.font_size = font.size.map(f64::from);
    spec_fmt.font_color = font.color.as_ref().map(derive_color_hex);
}

fn apply_fill(spec_fmt: &mut SpecCellFormat, fill: &Fill) {
    if fill.pattern != FillPattern::None
        && let Some(color) = fill.get_color()
    {
        spec_fmt.bg_color = Some(derive_color_hex(&color));
    }
}

fn apply_alignment(spec_fmt: &mut SpecCellFormat, align: &Alignment) {
    spec_fmt.align = derive_align_token(&align.horizontal).map(str::to_string);
    spec_fmt.valign = derive_valign_token(&align.vertical).map(str::to_string);
    if align.wrap_text {
        spec_fmt.text_wrap = Some(true);
    }
    spec_fmt.rotation = match align.text_rotation {
        TextRotation::None => None,
        TextRotation::Degrees(deg) => i16::try_from(deg).ok().filter(|deg| *deg != 0),
        TextRotation::Stacked => Some(255),
    };
    spec_fmt.indent = align
        .indent
        .and_then(|indent| u8::try_from(indent).ok())
        .filter(|indent| *indent > 0);
}

fn derive_border_edge(border: &calamine_styles::Border) -> (Option<i64>, Option<String>) {
    let n_code = derive_border_code(&border.style);
    if n_code == 0 {
        return (None, None);
    }
    (Some(n_code), border.color.as_ref().map(derive_color_hex))
}

fn derive_color_hex(c: &Color) -> String {
    format!("#{:02X}{:02X}{:02X}", c.red, c.green, c.blue)
}

/// Border style to the writer's numeric border code.
fn derive_border_code(style: &CalBorderStyle) -> i64 {
    match style {
        CalBorderStyle::None => 0,
        CalBorderStyle::Thin => 1,
        CalBorderStyle::Medium => 2,
        CalBorderStyle::Dashed => 3,
        CalBorderStyle::Dotted => 4,
        CalBorderStyle::Thick => 5,
        CalBorderStyle::Double => 6,
        CalBorderStyle::Hair => 7,
        CalBorderStyle::MediumDashed => 8,
        CalBorderStyle::DashDot => 9,
        CalBorderStyle::DashDotDot => 11,
        CalBorderStyle::SlantDashDot => 13,
    }
}

fn derive_align_token(align: &HorizontalAlignment) -> Option<&'static str> {
    match align {
        HorizontalAlignment::General => None,
        HorizontalAlignment::Left => Some("left"),
        HorizontalAlignment::Center => Some("center"),
        HorizontalAlignment::Right => Some("right"),
        HorizontalAlignment::Justify => Some("justify"),
        HorizontalAlignment::Distributed => Some("distributed"),
        HorizontalAlignment::Fill => Some("fill"),
    }
}

fn derive_valign_token(align: &VerticalAlignment) -> Option<&'static str> {
    match align {
        VerticalAlignment::Bottom => None,
        VerticalAlignment::Top => Some("top"),
        VerticalAlignment::Center => Some("vcenter"),
        VerticalAlignment::Justify => Some("vjustify"),
        VerticalAlignment::Distributed => Some("vdistributed"),
    }
}

fn derive_underline_token(underline: &UnderlineStyle) -> Option<&'static str> {
    match underline {
        UnderlineStyle::None => None,
        UnderlineStyle::Single => Some("single"),
        UnderlineStyle::Double => Some("double"),
        UnderlineStyle::SingleAccounting => Some("single_accounting"),
        UnderlineStyle::DoubleAccounting => Some("double_accounting"),
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
