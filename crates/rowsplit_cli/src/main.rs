//! `rowsplit`: split the data rows of one worksheet into several xlsx files,
//! each keeping the styled source header.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Parser};
use rowsplit_xlsx::{
    C_OUTPUT_PREFIX_DEFAULT, EnumBodyStyleMode, EnumNumFilesMode, EnumSheetSelector,
    N_DIGITS_IDENTIFIER_DEFAULT, ReportSplit, SpecIdentifierRule, SpecLayoutConventions,
    SpecSplitOptions, SpecSplitSize, derive_default_split_options, parse_column_ref,
    split_workbook,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rowsplit", version, about, long_about = None)]
struct Cli {
    /// Input workbook (.xlsx)
    #[arg(short, long)]
    input: PathBuf,

    /// Directory receiving the output files (created if missing)
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Rows per output file
    #[arg(short, long, allow_negative_numbers = true)]
    per_file: Option<i64>,

    /// Number of output files
    #[arg(short, long, allow_negative_numbers = true)]
    num_files: Option<i64>,

    /// Sheet to split, by name (overrides --sheet-position)
    #[arg(short, long)]
    sheet_name: Option<String>,

    /// Sheet to split, 1-based position in the workbook
    #[arg(long, default_value_t = 2)]
    sheet_position: usize,

    /// Output file name prefix
    #[arg(long, default_value = C_OUTPUT_PREFIX_DEFAULT)]
    prefix: String,

    /// Identifier column: letter (F) or 1-based number (6)
    #[arg(long, default_value = "F")]
    id_column: String,

    /// Identifier length in digits
    #[arg(long, default_value_t = N_DIGITS_IDENTIFIER_DEFAULT)]
    id_digits: usize,

    /// With --num-files: produce exactly min(N, rows) files of near-equal size
    #[arg(long)]
    balanced: bool,

    /// Copy source formats onto data rows as well as the header
    #[arg(long)]
    style_body: bool,

    /// JSON file overriding hidden rows/columns, copied heights, width aliases and merge scope
    ///
    /// Only merges inside the header are copied by default.
    ///
    /// Set "rule_merged_ranges": "all" to copy every source merge.
    #[arg(long)]
    layout: Option<PathBuf>,

    /// Report what would be written without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(n_verbose: u8) {
    let c_level = match n_verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(c_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let split_size = SpecSplitSize::from_args(cli.per_file, cli.num_files)?;
    let options = derive_split_options(cli)?;
    debug!(?split_size, ?options, "Parsed arguments");

    let report = split_workbook(&cli.input, &cli.output_dir, split_size, &options)
        .with_context(|| format!("Failed to split {}", cli.input.display()))?;

    print_report(&report, cli.json)
}

fn derive_split_options(cli: &Cli) -> Result<SpecSplitOptions> {
    let sheet_selector = match &cli.sheet_name {
        Some(name) => EnumSheetSelector::Name(name.clone()),
        None => {
            let Some(n_idx) = cli.sheet_position.checked_sub(1) else {
                bail!("--sheet-position is 1-based, got 0");
            };
            EnumSheetSelector::Position(n_idx)
        }
    };

    let col_idx = parse_column_ref(&cli.id_column).map_err(|e| anyhow!("--id-column: {e}"))?;

    let layout = match &cli.layout {
        Some(path) => {
            let txt = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read layout file {}", path.display()))?;
            SpecLayoutConventions::from_json_str(&txt)
                .with_context(|| format!("Failed to parse layout file {}", path.display()))?
        }
        None => SpecLayoutConventions::default(),
    };

    let mut options = derive_default_split_options();
    options.sheet_selector = sheet_selector;
    options.identifier_rule = SpecIdentifierRule {
        col_idx,
        n_digits: cli.id_digits,
    };
    if cli.balanced {
        options.rule_num_files = EnumNumFilesMode::Balanced;
    }
    if cli.style_body {
        options.rule_body_style = EnumBodyStyleMode::Styled;
    }
    options.layout = layout;
    options.prefix = cli.prefix.clone();
    options.if_dry_run = cli.dry_run;
    Ok(options)
}

fn print_report(report: &ReportSplit, if_json: bool) -> Result<()> {
    if report.if_dry_run {
        println!("[Dry Run] Total valid entries: {}", report.cnt_rows_valid);
        println!(
            "[Dry Run] Number of files to be created: {}",
            report.chunk_count()
        );
    } else {
        for path in &report.files_written {
            println!("Written: {}", path.display());
        }
    }

    if if_json {
        let txt = serde_json::to_string(&report.to_dict()).context("Failed to encode report")?;
        println!("{txt}");
    } else {
        println!("{report}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_short_flags() {
        let cli = Cli::try_parse_from(["rowsplit", "-i", "in.xlsx", "-n", "3", "-s", "Data"])
            .expect("parse");
        assert_eq!(cli.num_files, Some(3));
        assert_eq!(cli.per_file, None);
        assert_eq!(cli.output_dir, PathBuf::from("."));

        let options = derive_split_options(&cli).expect("options");
        assert_eq!(
            options.sheet_selector,
            EnumSheetSelector::Name("Data".to_string())
        );
        assert_eq!(options.identifier_rule.col_idx, 5);
        assert_eq!(options.prefix, "split");
    }

    #[test]
    fn cli_sheet_position_is_one_based() {
        let cli = Cli::try_parse_from(["rowsplit", "-i", "in.xlsx", "-p", "5"]).expect("parse");
        let options = derive_split_options(&cli).expect("options");
        assert_eq!(options.sheet_selector, EnumSheetSelector::Position(1));

        let cli = Cli::try_parse_from(["rowsplit", "-i", "x", "-p", "5", "--sheet-position", "0"])
            .expect("parse");
        assert!(derive_split_options(&cli).is_err());
    }

    #[test]
    fn cli_id_column_accepts_letter_or_number() {
        let cli = Cli::try_parse_from(["rowsplit", "-i", "x", "-p", "1", "--id-column", "7"])
            .expect("parse");
        assert_eq!(derive_split_options(&cli).unwrap().identifier_rule.col_idx, 6);

        let cli = Cli::try_parse_from(["rowsplit", "-i", "x", "-p", "1", "--id-column", "b"])
            .expect("parse");
        assert_eq!(derive_split_options(&cli).unwrap().identifier_rule.col_idx, 1);
    }
}
