//! Split constants and default preset factories.

use std::collections::BTreeMap;

use crate::spec::{EnumMergeScope, SpecLayoutConventions, SpecSplitOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;

/// Zero-based designated identifier column (`F`).
pub const N_COL_IDENTIFIER_DEFAULT: usize = 5;
/// Identifier length in decimal digits.
pub const N_DIGITS_IDENTIFIER_DEFAULT: usize = 12;
/// Zero-based default worksheet position (the second sheet).
pub const N_SHEET_POSITION_DEFAULT: usize = 1;

/// Output file name prefix.
pub const C_OUTPUT_PREFIX_DEFAULT: &str = "split";
/// Worksheet title in every output file.
pub const C_OUTPUT_SHEET_NAME: &str = "Sheet1";
/// Output file extension.
pub const C_OUTPUT_EXTENSION: &str = "xlsx";
/// Minimum zero-padded width of the output file index.
pub const N_WIDTH_OUTPUT_INDEX: usize = 2;

/// Number formats for temporal cells that carry no source format.
pub const C_NUM_FORMAT_DATE: &str = "yyyy-mm-dd";
pub const C_NUM_FORMAT_DATETIME: &str = "yyyy-mm-dd h:mm:ss";
pub const C_NUM_FORMAT_TIME: &str = "h:mm:ss";
pub const C_NUM_FORMAT_DURATION: &str = "[h]:mm:ss";

/// Build the default presentation conventions.
///
/// Rows 1 and 5 and columns A..C are hidden, row 2 keeps its source height,
/// and column M takes the source width of column L. Only header merges are
/// reapplied; merges below the header would land on unrelated data rows.
pub fn derive_default_layout_conventions() -> SpecLayoutConventions {
    let mut dict_width_alias = BTreeMap::new();
    dict_width_alias.insert("M".to_string(), "L".to_string());

    SpecLayoutConventions {
        rows_hidden: vec![1, 5],
        cols_hidden: vec!["A".to_string(), "B".to_string(), "C".to_string()],
        rows_height_copied: vec![2],
        cols_width_alias: dict_width_alias,
        rule_merged_ranges: EnumMergeScope::Header,
    }
}

/// Build default split options.
pub fn derive_default_split_options() -> SpecSplitOptions {
    SpecSplitOptions::default()
}
