//! Stateless helper utilities used by the split pipeline.

use std::collections::BTreeMap;
use std::ops::Range;

use regex::Regex;

use crate::conf::{C_OUTPUT_EXTENSION, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, N_WIDTH_OUTPUT_INDEX};
use crate::spec::{
    EnumCellValue, EnumMergeScope, EnumNumFilesMode, SpecDataRow, SpecIdentifierRule,
    SpecLayoutConventions, SpecMergedRange, SpecResolvedLayout, SpecSplitSize, SplitError,
};

////////////////////////////////////////////////////////////////////////////////
// #region IdentifierValidation

/// Compiled form of [`SpecIdentifierRule`].
///
/// Compiling once keeps the per-row predicate allocation-light; boundary
/// detection and filtering must share the same instance.
#[derive(Debug, Clone)]
pub struct SpecIdentifierPattern {
    col_idx: usize,
    n_digits: usize,
    pattern: Regex,
}

impl SpecIdentifierPattern {
    /// Compile `^[0-9]{D}$` for the rule.
    pub fn from_rule(rule: &SpecIdentifierRule) -> Result<Self, SplitError> {
        if rule.n_digits == 0 {
            return Err(SplitError::InvalidIdentifierRule(
                "`n_digits` must be >= 1.".to_string(),
            ));
        }
        if rule.col_idx >= N_NCOLS_EXCEL_MAX {
            return Err(SplitError::InvalidIdentifierRule(format!(
                "column index {} exceeds Excel limit ({N_NCOLS_EXCEL_MAX}).",
                rule.col_idx
            )));
        }
        let pattern = Regex::new(&format!("^[0-9]{{{}}}$", rule.n_digits))
            .map_err(|e| SplitError::InvalidIdentifierRule(e.to_string()))?;

        Ok(Self {
            col_idx: rule.col_idx,
            n_digits: rule.n_digits,
            pattern,
        })
    }

    /// Zero-based designated column.
    pub fn col_idx(&self) -> usize {
        self.col_idx
    }

    /// Identifier length.
    pub fn n_digits(&self) -> usize {
        self.n_digits
    }

    /// Whether `row` carries a valid identifier in the designated column.
    ///
    /// Rows shorter than the designated column fail.
    pub fn is_match_row(&self, row: &[EnumCellValue]) -> bool {
        row.get(self.col_idx)
            .is_some_and(|value| is_valid_identifier(value, self))
    }
}

/// Render a cell value as identifier text.
///
/// Text is trimmed. Numbers render only when finite and integral, so
/// `123456789012.0` becomes `"123456789012"`. Everything else has no text.
pub fn derive_identifier_text(value: &EnumCellValue) -> Option<String> {
    match value {
        EnumCellValue::String(s) => Some(s.trim().to_string()),
        EnumCellValue::Number(n) => {
            if !n.is_finite() || n.fract() != 0.0 || *n < 0.0 {
                return None;
            }
            // Above 2^53 the float no longer holds an exact integer.
            if *n >= 9_007_199_254_740_992.0 {
                return None;
            }
            Some(format!("{}", *n as u64))
        }
        EnumCellValue::None
        | EnumCellValue::Boolean(_)
        | EnumCellValue::DateTime(_)
        | EnumCellValue::Duration(_) => None,
    }
}

/// Pure, total identifier predicate.
pub fn is_valid_identifier(value: &EnumCellValue, pattern: &SpecIdentifierPattern) -> bool {
    derive_identifier_text(value).is_some_and(|txt| pattern.pattern.is_match(&txt))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowClassification

/// Return the 1-based position of the first row carrying a valid identifier.
pub fn detect_data_start_row(
    rows: &[Vec<EnumCellValue>],
    pattern: &SpecIdentifierPattern,
) -> Result<usize, SplitError> {
    rows.iter()
        .position(|row| pattern.is_match_row(row))
        .map(|n_idx| n_idx + 1)
        .ok_or_else(|| SplitError::NoDataFound {
            col_letter: derive_column_letter(pattern.col_idx()),
            n_digits: pattern.n_digits(),
        })
}

/// Rows strictly above the 1-based boundary.
pub fn extract_header_rows(
    rows: &[Vec<EnumCellValue>],
    n_row_data_start: usize,
) -> &[Vec<EnumCellValue>] {
    let n_rows_header = n_row_data_start.saturating_sub(1).min(rows.len());
    &rows[..n_rows_header]
}

/// Rows at or below the 1-based boundary that pass the identifier rule.
///
/// The boundary row itself is re-validated.
pub fn extract_valid_data_rows<'a>(
    rows: &'a [Vec<EnumCellValue>],
    n_row_data_start: usize,
    pattern: &SpecIdentifierPattern,
) -> Vec<SpecDataRow<'a>> {
    let n_row_idx_start = n_row_data_start.saturating_sub(1);
    rows.iter()
        .enumerate()
        .skip(n_row_idx_start)
        .filter(|(_, row)| pattern.is_match_row(row))
        .map(|(row_idx_src, row)| SpecDataRow {
            row_idx_src,
            cells: row.as_slice(),
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region RowChunking

/// Derive the stride used by fixed-size chunking.
///
/// `NumFiles(n)` gives `ceil(total / n)`; `total == 0` gives `0`.
pub fn calculate_chunk_size(n_rows_total: usize, split_size: SpecSplitSize) -> usize {
    match split_size {
        SpecSplitSize::PerFile(n) => n,
        SpecSplitSize::NumFiles(0) => 0,
        SpecSplitSize::NumFiles(n) => n_rows_total.div_ceil(n),
    }
}

/// Generate `(row_start, row_len)` chunks for `n_rows_total`.
pub fn generate_row_chunks(n_rows_total: usize, size_rows_chunk: usize) -> Vec<(usize, usize)> {
    let mut l_chunks = Vec::new();
    if size_rows_chunk == 0 {
        return l_chunks;
    }
    let mut n_row_cursor = 0;
    while n_row_cursor < n_rows_total {
        let n_rows_per_chunk = usize::min(size_rows_chunk, n_rows_total - n_row_cursor);
        l_chunks.push((n_row_cursor, n_rows_per_chunk));
        n_row_cursor += n_rows_per_chunk;
    }
    l_chunks
}

/// Generate exactly `min(n_chunks, n_rows_total)` chunks whose sizes differ
/// by at most one; earlier chunks absorb the remainder.
pub fn generate_balanced_row_chunks(n_rows_total: usize, n_chunks: usize) -> Vec<(usize, usize)> {
    let n_chunks = usize::min(n_chunks, n_rows_total);
    if n_chunks == 0 {
        return vec![];
    }
    let n_rows_base = n_rows_total / n_chunks;
    let n_rows_extra = n_rows_total % n_chunks;

    let mut l_chunks = Vec::with_capacity(n_chunks);
    let mut n_row_cursor = 0;
    for n_idx in 0..n_chunks {
        let n_rows_per_chunk = n_rows_base + usize::from(n_idx < n_rows_extra);
        l_chunks.push((n_row_cursor, n_rows_per_chunk));
        n_row_cursor += n_rows_per_chunk;
    }
    l_chunks
}

/// Plan chunks for `n_rows_total` validated rows.
pub fn plan_row_chunks(
    n_rows_total: usize,
    split_size: SpecSplitSize,
    rule_num_files: EnumNumFilesMode,
) -> Vec<(usize, usize)> {
    match (split_size, rule_num_files) {
        (SpecSplitSize::NumFiles(n), EnumNumFilesMode::Balanced) => {
            generate_balanced_row_chunks(n_rows_total, n)
        }
        _ => generate_row_chunks(n_rows_total, calculate_chunk_size(n_rows_total, split_size)),
    }
}

/// Check that header plus the largest chunk fits one worksheet.
pub fn validate_chunk_capacity(
    n_rows_header: usize,
    l_chunks: &[(usize, usize)],
) -> Result<(), SplitError> {
    let n_rows_chunk_max = l_chunks.iter().map(|(_, n_len)| *n_len).max().unwrap_or(0);
    if n_rows_header + n_rows_chunk_max > N_NROWS_EXCEL_MAX {
        return Err(SplitError::InvalidSplitSpec(format!(
            "{n_rows_header} header rows + {n_rows_chunk_max} data rows exceed Excel limit ({N_NROWS_EXCEL_MAX})."
        )));
    }
    Ok(())
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnReferences

/// Parse a column letter (`A`, `m`, `AB`) to a zero-based index.
pub fn parse_column_letter(letter: &str) -> Result<usize, String> {
    let c_letter = letter.trim();
    if c_letter.is_empty() || !c_letter.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(format!("Invalid column letter: {letter:?}"));
    }

    let mut n_col = 0usize;
    for c in c_letter.chars() {
        let n_digit = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n_col = n_col
            .checked_mul(26)
            .and_then(|n| n.checked_add(n_digit))
            .ok_or_else(|| format!("Column letter out of range: {letter:?}"))?;
        if n_col > N_NCOLS_EXCEL_MAX {
            return Err(format!("Column letter out of range: {letter:?}"));
        }
    }
    Ok(n_col - 1)
}

/// Parse a column reference: a letter, or a 1-based column number.
pub fn parse_column_ref(col_ref: &str) -> Result<usize, String> {
    let c_ref = col_ref.trim();
    if let Ok(n_col) = c_ref.parse::<usize>() {
        if n_col == 0 || n_col > N_NCOLS_EXCEL_MAX {
            return Err(format!("Column number out of range: {col_ref:?}"));
        }
        return Ok(n_col - 1);
    }
    parse_column_letter(c_ref)
}

/// Render a zero-based column index as its letter (`0 -> A`, `27 -> AB`).
pub fn derive_column_letter(col_idx: usize) -> String {
    let mut l_chars = Vec::new();
    let mut n_col = col_idx + 1;
    while n_col > 0 {
        let n_rem = (n_col - 1) % 26;
        l_chars.push((b'A' + n_rem as u8) as char);
        n_col = (n_col - 1) / 26;
    }
    l_chars.iter().rev().collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region LayoutPlanning

fn resolve_row_numbers(rows: &[usize], name: &str) -> Result<Vec<usize>, SplitError> {
    let mut l_rows = Vec::with_capacity(rows.len());
    for n_row in rows {
        if *n_row == 0 || *n_row > N_NROWS_EXCEL_MAX {
            return Err(SplitError::InvalidLayout(format!(
                "`{name}` holds an out-of-range row: {n_row}."
            )));
        }
        l_rows.push(n_row - 1);
    }
    l_rows.sort_unstable();
    l_rows.dedup();
    Ok(l_rows)
}

fn resolve_column_letter(letter: &str, name: &str) -> Result<usize, SplitError> {
    parse_column_letter(letter).map_err(|e| SplitError::InvalidLayout(format!("`{name}`: {e}")))
}

/// Resolve hand-written conventions into zero-based indices.
pub fn resolve_layout(layout: &SpecLayoutConventions) -> Result<SpecResolvedLayout, SplitError> {
    let rows_hidden = resolve_row_numbers(&layout.rows_hidden, "rows_hidden")?;
    let rows_height_copied = resolve_row_numbers(&layout.rows_height_copied, "rows_height_copied")?;

    let mut cols_hidden = layout
        .cols_hidden
        .iter()
        .map(|letter| resolve_column_letter(letter, "cols_hidden"))
        .collect::<Result<Vec<_>, _>>()?;
    cols_hidden.sort_unstable();
    cols_hidden.dedup();

    let mut cols_width_alias = BTreeMap::new();
    for (c_target, c_source) in &layout.cols_width_alias {
        cols_width_alias.insert(
            resolve_column_letter(c_target, "cols_width_alias")?,
            resolve_column_letter(c_source, "cols_width_alias")?,
        );
    }

    Ok(SpecResolvedLayout {
        rows_hidden,
        cols_hidden,
        rows_height_copied,
        cols_width_alias,
        rule_merged_ranges: layout.rule_merged_ranges,
    })
}

/// Source widths plus alias targets taking their source column's width.
///
/// An alias whose source has no custom width leaves the target untouched.
pub fn plan_column_widths(
    col_widths: &BTreeMap<usize, f64>,
    cols_width_alias: &BTreeMap<usize, usize>,
) -> BTreeMap<usize, f64> {
    let mut dict_widths = col_widths.clone();
    for (col_target, col_source) in cols_width_alias {
        if let Some(width) = col_widths.get(col_source) {
            dict_widths.insert(*col_target, *width);
        }
    }
    dict_widths
}

/// Source heights restricted to the rows whose height is copied.
pub fn plan_row_heights(
    row_heights: &BTreeMap<usize, f64>,
    rows_height_copied: &[usize],
) -> BTreeMap<usize, f64> {
    rows_height_copied
        .iter()
        .filter_map(|row_idx| row_heights.get(row_idx).map(|h| (*row_idx, *h)))
        .collect()
}

/// Select merges to reapply.
///
/// `Header` keeps merges lying entirely in `rows_header`; `All` keeps every
/// merge at its source coordinates. Single-cell ranges are always dropped.
pub fn select_merged_ranges(
    merged_ranges: &[SpecMergedRange],
    rows_header: Range<usize>,
    rule: EnumMergeScope,
) -> Vec<SpecMergedRange> {
    merged_ranges
        .iter()
        .filter(|merge| !merge.is_single_cell())
        .filter(|merge| match rule {
            EnumMergeScope::All => true,
            EnumMergeScope::Header => {
                rows_header.contains(&merge.row_start) && rows_header.contains(&merge.row_end)
            }
        })
        .copied()
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region OutputNaming

/// Output file name `{prefix}_{NN}.xlsx` for a 1-based chunk index.
pub fn derive_output_file_name(prefix: &str, part_idx_1based: usize) -> String {
    format!(
        "{prefix}_{part_idx_1based:0width$}.{C_OUTPUT_EXTENSION}",
        width = N_WIDTH_OUTPUT_INDEX
    )
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
