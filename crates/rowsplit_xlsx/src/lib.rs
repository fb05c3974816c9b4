//! `rowsplit_xlsx` v1:
//! Rust-side kernel that splits one worksheet's data rows into several
//! `.xlsx` files, each carrying the styled source header.
//!
//! Modules:
//! - `conf`   : constants and default presets
//! - `spec`   : specs/models/options/errors
//! - `util`   : pure helpers (identifier rule, row classification, chunking)
//! - `reader` : `calamine-styles` workbook loader
//! - `writer` : `rust_xlsxwriter` chunk writer
//! - `report` : run report
//! - `split`  : end-to-end pipeline
pub mod conf;
pub mod reader;
pub mod report;
pub mod spec;
pub mod split;
pub mod util;
pub mod writer;

pub use conf::{
    C_OUTPUT_PREFIX_DEFAULT, C_OUTPUT_SHEET_NAME, N_COL_IDENTIFIER_DEFAULT,
    N_DIGITS_IDENTIFIER_DEFAULT, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX, N_SHEET_POSITION_DEFAULT,
    derive_default_layout_conventions, derive_default_split_options,
};
pub use reader::{XlsxSheetReader, read_sheet};
pub use report::ReportSplit;
pub use spec::{
    EnumBodyStyleMode, EnumCellValue, EnumMergeScope, EnumNumFilesMode, EnumSheetSelector,
    SpecCellFormat, SpecDataRow, SpecIdentifierRule, SpecLayoutConventions, SpecMergedRange,
    SpecResolvedLayout, SpecSheet, SpecSplitOptions, SpecSplitSize, SplitError,
};
pub use split::split_workbook;
pub use util::{
    SpecIdentifierPattern, calculate_chunk_size, derive_column_letter, derive_output_file_name,
    detect_data_start_row, extract_header_rows, extract_valid_data_rows, is_valid_identifier,
    parse_column_letter, parse_column_ref, plan_row_chunks, resolve_layout,
};
pub use writer::{SpecChunkTemplate, XlsxChunkWriter};
