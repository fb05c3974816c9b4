//! Shared split models, options and top-level error types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::conf::{
    N_COL_IDENTIFIER_DEFAULT, N_DIGITS_IDENTIFIER_DEFAULT, N_SHEET_POSITION_DEFAULT,
    C_OUTPUT_PREFIX_DEFAULT, derive_default_layout_conventions,
};

////////////////////////////////////////////////////////////////////////////////
// #region CellSpecification

/// Normalized cell value as read from the source sheet.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EnumCellValue {
    /// Missing/blank value.
    #[default]
    None,
    /// Text value.
    String(String),
    /// Numeric value.
    Number(f64),
    /// Boolean value.
    Boolean(bool),
    /// Date/time as a 1900-epoch Excel serial, whatever the source epoch.
    DateTime(f64),
    /// Elapsed time in days.
    Duration(f64),
}

/// Cell format captured from the source sheet.
///
/// Alignment tokens and border codes follow the writer's vocabulary
/// (`"left"`, `"vcenter"`, `1` = thin, ...), colors are `#RRGGBB`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<f64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,
    /// Underline style token (`single`, `double`, ...).
    pub underline: Option<String>,
    /// Strikethrough style.
    pub strikethrough: Option<bool>,
    /// Font color.
    pub font_color: Option<String>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Text wrap.
    pub text_wrap: Option<bool>,
    /// Text rotation in degrees (`255` = stacked).
    pub rotation: Option<i16>,
    /// Indent level.
    pub indent: Option<u8>,

    /// Top border style code.
    pub top: Option<i64>,
    /// Bottom border style code.
    pub bottom: Option<i64>,
    /// Left border style code.
    pub left: Option<i64>,
    /// Right border style code.
    pub right: Option<i64>,
    /// Top border color.
    pub top_color: Option<String>,
    /// Bottom border color.
    pub bottom_color: Option<String>,
    /// Left border color.
    pub left_color: Option<String>,
    /// Right border color.
    pub right_color: Option<String>,

    /// Number format code.
    pub num_format: Option<String>,
    /// Background fill color.
    pub bg_color: Option<String>,

    /// `Some(false)` when the cell is unlocked (Excel locks by default).
    pub locked: Option<bool>,
    /// Formula hidden under sheet protection.
    pub hidden: Option<bool>,
}

impl SpecCellFormat {
    /// Whether no property is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetSpecification

/// Merged cell range, zero-based inclusive coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpecMergedRange {
    /// First row.
    pub row_start: usize,
    /// First column.
    pub col_start: usize,
    /// Last row.
    pub row_end: usize,
    /// Last column.
    pub col_end: usize,
}

impl SpecMergedRange {
    /// Whether the range covers exactly one cell.
    pub fn is_single_cell(&self) -> bool {
        self.row_start == self.row_end && self.col_start == self.col_end
    }
}

/// One worksheet held in memory.
///
/// `rows` is anchored at A1: `rows[r][c]` is the cell at zero-based row `r`
/// and column `c`. Every row has the same length.
#[derive(Debug, Clone, Default)]
pub struct SpecSheet {
    /// Source sheet name.
    pub sheet_name: String,
    /// Cell values.
    pub rows: Vec<Vec<EnumCellValue>>,
    /// Non-empty cell formats keyed by `(row, col)`.
    pub formats: BTreeMap<(usize, usize), SpecCellFormat>,
    /// Merged cell ranges.
    pub merged_ranges: Vec<SpecMergedRange>,
    /// Custom column widths keyed by zero-based column.
    pub col_widths: BTreeMap<usize, f64>,
    /// Custom row heights keyed by zero-based row.
    pub row_heights: BTreeMap<usize, f64>,
}

impl SpecSheet {
    /// Number of rows.
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }
}

/// One validated data row, borrowed from the source sheet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpecDataRow<'a> {
    /// Zero-based row index in the source sheet.
    pub row_idx_src: usize,
    /// Cell values of the row.
    pub cells: &'a [EnumCellValue],
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SelectionAndValidation

/// Worksheet selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumSheetSelector {
    /// Select by exact sheet name.
    Name(String),
    /// Select by zero-based position in document order.
    ///
    /// This is a positional heuristic: the default (`1`, the second sheet)
    /// assumes a leading cover sheet that should be skipped.
    Position(usize),
}

impl Default for EnumSheetSelector {
    fn default() -> Self {
        Self::Position(N_SHEET_POSITION_DEFAULT)
    }
}

impl fmt::Display for EnumSheetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "'{name}'"),
            Self::Position(idx) => write!(f, "at position {}", idx + 1),
        }
    }
}

/// Identifier rule shared by boundary detection and row filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecIdentifierRule {
    /// Zero-based designated column.
    pub col_idx: usize,
    /// Exact number of decimal digits.
    pub n_digits: usize,
}

impl Default for SpecIdentifierRule {
    fn default() -> Self {
        Self {
            col_idx: N_COL_IDENTIFIER_DEFAULT,
            n_digits: N_DIGITS_IDENTIFIER_DEFAULT,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SplitOptions

/// Requested split size: exactly one of rows-per-file or number of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecSplitSize {
    /// Fixed number of rows per output file.
    PerFile(usize),
    /// Target number of output files.
    NumFiles(usize),
}

impl SpecSplitSize {
    /// Build from the two mutually exclusive optional arguments.
    ///
    /// Fails when both or neither are given, or when the value is not a
    /// positive integer.
    pub fn from_args(per_file: Option<i64>, num_files: Option<i64>) -> Result<Self, SplitError> {
        match (per_file, num_files) {
            (Some(_), Some(_)) => Err(SplitError::InvalidSplitSpec(
                "`per_file` and `num_files` are mutually exclusive.".to_string(),
            )),
            (None, None) => Err(SplitError::InvalidSplitSpec(
                "Either `per_file` or `num_files` must be specified.".to_string(),
            )),
            (Some(n), None) => Ok(Self::PerFile(cast_positive(n, "per_file")?)),
            (None, Some(n)) => Ok(Self::NumFiles(cast_positive(n, "num_files")?)),
        }
    }

    /// Re-check positivity for values constructed directly.
    pub fn validate(&self) -> Result<(), SplitError> {
        let (n, name) = match self {
            Self::PerFile(n) => (*n, "per_file"),
            Self::NumFiles(n) => (*n, "num_files"),
        };
        if n == 0 {
            return Err(SplitError::InvalidSplitSpec(format!(
                "`{name}` must be a positive integer, got 0."
            )));
        }
        Ok(())
    }
}

fn cast_positive(value: i64, name: &str) -> Result<usize, SplitError> {
    if value <= 0 {
        return Err(SplitError::InvalidSplitSpec(format!(
            "`{name}` must be a positive integer, got {value}."
        )));
    }
    usize::try_from(value).map_err(|_| {
        SplitError::InvalidSplitSpec(format!("`{name}` is out of range: {value}."))
    })
}

/// Chunk size derivation for [`SpecSplitSize::NumFiles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumNumFilesMode {
    /// `ceil(total / num_files)` applied as a fixed stride. May yield fewer
    /// files than requested.
    #[default]
    Legacy,
    /// Exactly `min(num_files, total)` chunks whose sizes differ by at most
    /// one; earlier chunks take the remainder.
    Balanced,
}

/// Formatting applied to data rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumBodyStyleMode {
    /// Write data rows as bare values (default).
    #[default]
    ValuesOnly,
    /// Copy source cell formats onto data rows as well.
    Styled,
}

/// Which source merges are reapplied to every output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumMergeScope {
    /// Only merges lying entirely inside the header region.
    #[default]
    Header,
    /// Every source merge, at its source coordinates.
    All,
}

/// Presentation conventions applied to each output file.
///
/// Rows are 1-based, columns are letters, matching how the conventions are
/// written by hand in a layout file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpecLayoutConventions {
    /// Rows hidden in every output.
    pub rows_hidden: Vec<usize>,
    /// Columns hidden in every output.
    pub cols_hidden: Vec<String>,
    /// Rows whose source height is reapplied.
    pub rows_height_copied: Vec<usize>,
    /// Target column -> source column whose width it takes.
    pub cols_width_alias: BTreeMap<String, String>,
    /// Merge reapplication scope.
    pub rule_merged_ranges: EnumMergeScope,
}

impl Default for SpecLayoutConventions {
    fn default() -> Self {
        derive_default_layout_conventions()
    }
}

impl SpecLayoutConventions {
    /// Parse conventions from JSON text. Missing keys keep their defaults.
    pub fn from_json_str(txt: &str) -> Result<Self, SplitError> {
        serde_json::from_str(txt).map_err(|e| SplitError::InvalidLayout(e.to_string()))
    }
}

/// Layout conventions resolved to zero-based indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecResolvedLayout {
    /// Zero-based hidden rows.
    pub rows_hidden: Vec<usize>,
    /// Zero-based hidden columns.
    pub cols_hidden: Vec<usize>,
    /// Zero-based rows whose height is copied.
    pub rows_height_copied: Vec<usize>,
    /// Zero-based target column -> source column.
    pub cols_width_alias: BTreeMap<usize, usize>,
    /// Merge reapplication scope.
    pub rule_merged_ranges: EnumMergeScope,
}

/// Input options for `split_workbook`.
#[derive(Debug, Clone)]
pub struct SpecSplitOptions {
    /// Worksheet selection policy.
    pub sheet_selector: EnumSheetSelector,
    /// Designated column and identifier length.
    pub identifier_rule: SpecIdentifierRule,
    /// Chunk size derivation for `NumFiles`.
    pub rule_num_files: EnumNumFilesMode,
    /// Data-row formatting.
    pub rule_body_style: EnumBodyStyleMode,
    /// Presentation conventions.
    pub layout: SpecLayoutConventions,
    /// Output file name prefix.
    pub prefix: String,
    /// Plan only; write nothing.
    pub if_dry_run: bool,
}

impl Default for SpecSplitOptions {
    fn default() -> Self {
        Self {
            sheet_selector: EnumSheetSelector::default(),
            identifier_rule: SpecIdentifierRule::default(),
            rule_num_files: EnumNumFilesMode::Legacy,
            rule_body_style: EnumBodyStyleMode::ValuesOnly,
            layout: SpecLayoutConventions::default(),
            prefix: C_OUTPUT_PREFIX_DEFAULT.to_string(),
            if_dry_run: false,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Errors

/// Top-level split failures. All are fatal for the call.
#[derive(Debug, Error)]
pub enum SplitError {
    /// Input workbook unreadable or corrupt.
    #[error("Failed to load workbook {}: {message}", path.display())]
    LoadFailure {
        /// Input path.
        path: PathBuf,
        /// Underlying reader error text.
        message: String,
    },
    /// Requested worksheet absent.
    #[error("Sheet {selector} not found in workbook (available: {sheet_names:?}).")]
    SheetNotFound {
        /// Selection that failed.
        selector: EnumSheetSelector,
        /// Sheets present in the workbook.
        sheet_names: Vec<String>,
    },
    /// Selected sheet has no row beyond a putative header.
    #[error("Worksheet '{sheet_name}' appears to be empty or lacks data beyond the header.")]
    EmptySheet {
        /// Selected sheet.
        sheet_name: String,
    },
    /// No row satisfies the identifier rule.
    #[error("No valid data rows with a {n_digits}-digit ID found in column {col_letter}.")]
    NoDataFound {
        /// Designated column letter.
        col_letter: String,
        /// Identifier length.
        n_digits: usize,
    },
    /// Split arguments missing, both present, or non-positive.
    #[error("Invalid split specification: {0}")]
    InvalidSplitSpec(String),
    /// Identifier rule cannot be compiled.
    #[error("Invalid identifier rule: {0}")]
    InvalidIdentifierRule(String),
    /// Layout conventions reference invalid rows/columns or fail to parse.
    #[error("Invalid layout conventions: {0}")]
    InvalidLayout(String),
    /// Output directory or file could not be written.
    #[error("Failed to write {}: {message}", path.display())]
    OutputFailure {
        /// Output path.
        path: PathBuf,
        /// Underlying error text.
        message: String,
    },
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
