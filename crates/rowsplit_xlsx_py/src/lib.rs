use std::collections::BTreeMap;
use std::path::PathBuf;

use pyo3::exceptions::{PyKeyError, PyOSError, PyValueError};
use pyo3::prelude::*;
use rowsplit_xlsx::{
    EnumBodyStyleMode, EnumNumFilesMode, EnumSheetSelector, ReportSplit, SpecIdentifierRule,
    SpecLayoutConventions, SpecSplitOptions, SpecSplitSize, SplitError, split_workbook,
};

const N_BRIDGE_ABI_VERSION: u64 = 1;
const C_BRIDGE_CONTRACT_VERSION: &str = "rowsplit.xlsx.split.v1";
const C_BRIDGE_TRANSPORT: &str = "rust_native";

#[pyclass(name = "ReportSplit")]
#[derive(Debug, Clone)]
struct PyReportSplit {
    #[pyo3(get)]
    sheet_name: String,
    #[pyo3(get)]
    n_row_data_start: usize,
    #[pyo3(get)]
    cnt_rows_scanned: u64,
    #[pyo3(get)]
    cnt_rows_header: u64,
    #[pyo3(get)]
    cnt_rows_valid: u64,
    #[pyo3(get)]
    cnt_rows_dropped: u64,
    #[pyo3(get)]
    chunk_sizes: Vec<usize>,
    #[pyo3(get)]
    files_written: Vec<String>,
    #[pyo3(get)]
    warnings: Vec<String>,
    #[pyo3(get)]
    if_dry_run: bool,
    #[pyo3(get)]
    duration_elapsed: f64,
    inner: ReportSplit,
}

impl From<ReportSplit> for PyReportSplit {
    fn from(report_split: ReportSplit) -> Self {
        Self {
            sheet_name: report_split.sheet_name.clone(),
            n_row_data_start: report_split.n_row_data_start,
            cnt_rows_scanned: report_split.cnt_rows_scanned,
            cnt_rows_header: report_split.cnt_rows_header,
            cnt_rows_valid: report_split.cnt_rows_valid,
            cnt_rows_dropped: report_split.cnt_rows_dropped,
            chunk_sizes: report_split.chunk_sizes.clone(),
            files_written: report_split
                .files_written
                .iter()
                .map(|path| path.to_string_lossy().to_string())
                .collect(),
            warnings: report_split.warnings.clone(),
            if_dry_run: report_split.if_dry_run,
            duration_elapsed: report_split.duration_elapsed.as_secs_f64(),
            inner: report_split,
        }
    }
}

#[pymethods]
impl PyReportSplit {
    #[getter]
    fn chunk_count(&self) -> usize {
        self.inner.chunk_count()
    }

    #[getter]
    fn warning_count(&self) -> usize {
        self.inner.warning_count()
    }

    fn to_dict(&self) -> BTreeMap<String, u64> {
        self.inner.to_dict()
    }

    #[pyo3(signature = (prefix = "[SPLIT]"))]
    fn format(&self, prefix: &str) -> String {
        self.inner.format(prefix)
    }

    fn __str__(&self) -> String {
        self.inner.to_string()
    }
}

fn parse_rule_num_files(value: &str) -> PyResult<EnumNumFilesMode> {
    match value {
        "legacy" => Ok(EnumNumFilesMode::Legacy),
        "balanced" => Ok(EnumNumFilesMode::Balanced),
        _ => Err(PyValueError::new_err(format!(
            "Invalid num-files rule: `{value}`. Expected one of: ['legacy', 'balanced']"
        ))),
    }
}

fn parse_sheet_selector(sheet_name: Option<String>, sheet_position: usize) -> EnumSheetSelector {
    match sheet_name {
        Some(name) => EnumSheetSelector::Name(name),
        None => EnumSheetSelector::Position(sheet_position),
    }
}

fn map_split_error(exception: SplitError) -> PyErr {
    let c_msg = exception.to_string();
    match exception {
        SplitError::LoadFailure { .. } | SplitError::OutputFailure { .. } => {
            PyOSError::new_err(c_msg)
        }
        SplitError::SheetNotFound { .. } => PyKeyError::new_err(c_msg),
        SplitError::EmptySheet { .. }
        | SplitError::NoDataFound { .. }
        | SplitError::InvalidSplitSpec(_)
        | SplitError::InvalidIdentifierRule(_)
        | SplitError::InvalidLayout(_) => PyValueError::new_err(c_msg),
    }
}

#[pyfunction(name = "split_xlsx")]
#[pyo3(signature = (
    file_in,
    dir_out,
    per_file = None,
    num_files = None,
    sheet_name = None,
    sheet_position = 1,
    prefix = "split",
    col_id = 5,
    n_digits = 12,
    rule_num_files = "legacy",
    layout_json = None,
    if_style_body = false,
    if_dry_run = false
))]
#[allow(clippy::too_many_arguments)]
fn split_xlsx_py(
    py: Python<'_>,
    file_in: String,
    dir_out: String,
    per_file: Option<i64>,
    num_files: Option<i64>,
    sheet_name: Option<String>,
    sheet_position: usize,
    prefix: &str,
    col_id: usize,
    n_digits: usize,
    rule_num_files: &str,
    layout_json: Option<&str>,
    if_style_body: bool,
    if_dry_run: bool,
) -> PyResult<PyReportSplit> {
    let split_size = SpecSplitSize::from_args(per_file, num_files).map_err(map_split_error)?;
    let layout = match layout_json {
        Some(txt) => SpecLayoutConventions::from_json_str(txt).map_err(map_split_error)?,
        None => SpecLayoutConventions::default(),
    };

    let spec_split_options = SpecSplitOptions {
        sheet_selector: parse_sheet_selector(sheet_name, sheet_position),
        identifier_rule: SpecIdentifierRule {
            col_idx: col_id,
            n_digits,
        },
        rule_num_files: parse_rule_num_files(rule_num_files)?,
        rule_body_style: if if_style_body {
            EnumBodyStyleMode::Styled
        } else {
            EnumBodyStyleMode::ValuesOnly
        },
        layout,
        prefix: prefix.to_string(),
        if_dry_run,
    };

    let path_file_in = PathBuf::from(file_in);
    let path_dir_out = PathBuf::from(dir_out);
    let report_split = py.allow_threads(|| {
        split_workbook(&path_file_in, &path_dir_out, split_size, &spec_split_options)
    });
    let report_split = report_split.map_err(map_split_error)?;
    Ok(PyReportSplit::from(report_split))
}

#[pymodule]
fn _rowsplit_xlsx_rs(module: &Bound<'_, PyModule>) -> PyResult<()> {
    module.add_class::<PyReportSplit>()?;
    module.add_function(wrap_pyfunction!(split_xlsx_py, module)?)?;
    module.add("__bridge_abi__", N_BRIDGE_ABI_VERSION)?;
    module.add("__bridge_contract__", C_BRIDGE_CONTRACT_VERSION)?;
    module.add("__bridge_transport__", C_BRIDGE_TRANSPORT)?;
    Ok(())
}

