use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use fit_diagnostics::{
    DiagnosticsConfig, DiagnosticsError, HessianReport, LabeledMatrix, OptimizerEstimates,
    ScreeningReport, VcovDiagnosis, analyze_hessian, diagnose_vcov, screen_estimates,
};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "fit-diagnostics")]
#[command(about = "Eigen-direction diagnostics for fitted-model covariance matrices and Hessians", long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find small or negative eigen-directions of a covariance matrix.
    Vcov(VcovArgs),
    /// Find relatively flat directions of a Hessian and its standard errors.
    Hessian(HessianArgs),
    /// Screen point estimates, standard errors and gradient.
    Screen(ScreenArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON input file.
    #[arg(long = "input", short = 'i')]
    input: PathBuf,
    /// Optional JSON configuration; command-line flags override it.
    #[arg(long = "config")]
    config: Option<PathBuf>,
    /// Print the report as JSON instead of a table.
    #[arg(long = "json", default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct VcovArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long = "tolerance")]
    tolerance: Option<f64>,
    #[arg(long = "digits")]
    digits: Option<u32>,
}

#[derive(Args, Debug)]
struct HessianArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long = "eigen-tol")]
    eigen_tol: Option<f64>,
    #[arg(long = "vector-tol")]
    vector_tol: Option<f64>,
}

#[derive(Args, Debug)]
struct ScreenArgs {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long = "big-coef")]
    big_coef: Option<f64>,
    #[arg(long = "big-zstat")]
    big_zstat: Option<f64>,
    #[arg(long = "gradient-tol")]
    gradient_tol: Option<f64>,
}

/// `null` entries read as NaN so failed covariance estimates survive JSON.
type JsonMatrix = Vec<Vec<Option<f64>>>;

#[derive(Deserialize, Debug)]
struct MatrixInput {
    labels: Vec<String>,
    matrix: JsonMatrix,
    /// Fallback for `vcov` when `matrix` has non-finite entries.
    #[serde(default)]
    hessian: Option<JsonMatrix>,
    /// Parameters flagged by an earlier standard-error report.
    #[serde(default)]
    flagged_non_finite: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct EstimatesInput {
    labels: Vec<String>,
    estimates: Vec<f64>,
    #[serde(default)]
    standard_errors: Option<Vec<Option<f64>>>,
    #[serde(default)]
    gradient: Option<Vec<f64>>,
}

fn init_logging() {
    // Diagnostics go to stdout; keep stderr for warnings unless RUST_LOG says otherwise.
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .try_init();
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Vcov(args) => run_vcov(args),
        Command::Hessian(args) => run_hessian(args),
        Command::Screen(args) => run_screen(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<DiagnosticsConfig, String> {
    let Some(path) = path else {
        return Ok(DiagnosticsConfig::default());
    };
    let payload = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
    serde_json::from_str(&payload).map_err(|e| format!("failed to parse config json: {e}"))
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, String> {
    let payload = fs::read_to_string(path)
        .map_err(|e| format!("failed to read input '{}': {e}", path.display()))?;
    serde_json::from_str(&payload).map_err(|e| format!("failed to parse input json: {e}"))
}

fn matrix_from_rows(rows: &JsonMatrix, what: &str) -> Result<Array2<f64>, String> {
    let n = rows.len();
    let ncols = rows.first().map(Vec::len).unwrap_or(0);
    let mut out = Array2::<f64>::zeros((n, ncols));
    for (i, row) in rows.iter().enumerate() {
        if row.len() != ncols {
            return Err(format!(
                "{what}: row {i} has {} entries, expected {ncols}",
                row.len()
            ));
        }
        for (j, value) in row.iter().enumerate() {
            out[[i, j]] = value.unwrap_or(f64::NAN);
        }
    }
    Ok(out)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let payload = serde_json::to_string_pretty(value)
        .map_err(|e| format!("failed to serialize report: {e}"))?;
    println!("{payload}");
    Ok(())
}

fn run_vcov(args: VcovArgs) -> Result<(), String> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(tol) = args.tolerance {
        config.vcov.tolerance = tol;
    }
    if let Some(digits) = args.digits {
        config.vcov.digits = digits;
    }

    let input: MatrixInput = load_json(&args.common.input)?;
    let vcov = LabeledMatrix::new(matrix_from_rows(&input.matrix, "matrix")?, input.labels)
        .map_err(|e| e.to_string())?;
    let diagnosis = match input.hessian.as_ref() {
        Some(rows) => {
            let mut fallback = || -> Result<Array2<f64>, DiagnosticsError> {
                matrix_from_rows(rows, "hessian").map_err(DiagnosticsError::InvalidInput)
            };
            diagnose_vcov(&vcov, &config.vcov, Some(&mut fallback))
        }
        None => diagnose_vcov(&vcov, &config.vcov, None),
    }
    .map_err(|e| e.to_string())?;

    if args.common.json {
        return print_json(&diagnosis);
    }
    print_vcov_table(&diagnosis);
    Ok(())
}

fn run_hessian(args: HessianArgs) -> Result<(), String> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(tol) = args.eigen_tol {
        config.hessian.eigen_tol = tol;
    }
    if let Some(tol) = args.vector_tol {
        config.hessian.vector_tol = tol;
    }

    let input: MatrixInput = load_json(&args.common.input)?;
    let hessian = LabeledMatrix::new(matrix_from_rows(&input.matrix, "matrix")?, input.labels)
        .map_err(|e| e.to_string())?;
    let report = analyze_hessian(&hessian, &config.hessian, &input.flagged_non_finite)
        .map_err(|e| e.to_string())?;

    if args.common.json {
        return print_json(&report);
    }
    print_hessian_table(&report);
    Ok(())
}

fn run_screen(args: ScreenArgs) -> Result<(), String> {
    let mut config = load_config(args.common.config.as_deref())?;
    if let Some(v) = args.big_coef {
        config.screening.big_coef = v;
    }
    if let Some(v) = args.big_zstat {
        config.screening.big_zstat = v;
    }
    if let Some(v) = args.gradient_tol {
        config.screening.gradient_tol = v;
    }

    let input: EstimatesInput = load_json(&args.common.input)?;
    let mut estimates = OptimizerEstimates::new(input.labels, Array1::from(input.estimates))
        .map_err(|e| e.to_string())?;
    if let Some(se) = input.standard_errors {
        let se: Array1<f64> = se.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect();
        estimates = estimates
            .with_standard_errors(se)
            .map_err(|e| e.to_string())?;
    }
    if let Some(grad) = input.gradient {
        estimates = estimates
            .with_gradient(Array1::from(grad))
            .map_err(|e| e.to_string())?;
    }
    let report = screen_estimates(&estimates, &config.screening).map_err(|e| e.to_string())?;

    if args.common.json {
        return print_json(&report);
    }
    print_screening_table(&report);
    Ok(())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn print_vcov_table(diagnosis: &VcovDiagnosis) {
    let Some(report) = diagnosis.report() else {
        println!("{diagnosis}");
        return;
    };
    if report.is_empty() {
        println!("{report}");
        return;
    }
    let mut table = new_table(vec!["#", "eigenvalue", "parameter", "loading"]);
    for (i, dir) in report.directions.iter().enumerate() {
        for (j, loading) in dir.loadings.iter().enumerate() {
            let (idx, eig) = if j == 0 {
                ((i + 1).to_string(), format!("{:.4e}", dir.eigenvalue))
            } else {
                (String::new(), String::new())
            };
            table.add_row(Row::from(vec![
                Cell::new(idx),
                Cell::new(eig),
                Cell::new(&loading.label),
                Cell::new(loading.value),
            ]));
        }
    }
    println!(
        "Bad eigen-directions of the {} (tolerance {:.1e}, worst first):",
        report.source, report.tolerance
    );
    println!("{table}");
}

fn print_hessian_table(report: &HessianReport) {
    println!("{report}");
    let mut table = new_table(vec!["index", "eigenvalue", "relative", "flat", "parameters"]);
    for entry in &report.spectrum {
        let flat = report
            .flat_directions
            .iter()
            .find(|d| d.index == entry.index);
        table.add_row(Row::from(vec![
            Cell::new(entry.index),
            Cell::new(format!("{:.4e}", entry.eigenvalue)),
            Cell::new(format!("{:.3e}", entry.relative_value)),
            Cell::new(if flat.is_some() { "yes" } else { "" }),
            Cell::new(flat.map(|d| d.labels.join(", ")).unwrap_or_default()),
        ]));
    }
    println!("{table}");

    let mut se_table = new_table(vec!["parameter", "std. error"]);
    for (label, se) in report.labels.iter().zip(report.standard_errors.iter()) {
        se_table.add_row(Row::from(vec![
            Cell::new(label),
            Cell::new(format!("{se:.6}")),
        ]));
    }
    println!("{se_table}");
}

fn print_screening_table(report: &ScreeningReport) {
    if report.is_clean() {
        println!("{report}");
        return;
    }
    let mut table = new_table(vec!["check", "parameter", "value"]);
    let sections = [
        ("large coefficient", &report.large_coefficients),
        ("large Z statistic", &report.large_zstats),
        ("non-finite std. error", &report.non_finite_standard_errors),
        ("large gradient", &report.large_gradients),
    ];
    for (check, findings) in sections {
        for finding in findings.iter() {
            table.add_row(Row::from(vec![
                Cell::new(check),
                Cell::new(&finding.label),
                Cell::new(format!("{:.4e}", finding.value)),
            ]));
        }
    }
    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_matrix_entries_become_nan() {
        let rows: JsonMatrix = vec![vec![Some(1.0), None], vec![None, Some(2.0)]];
        let m = matrix_from_rows(&rows, "matrix").expect("matrix");
        assert_eq!(m[[0, 0]], 1.0);
        assert!(m[[0, 1]].is_nan());
        assert!(m[[1, 0]].is_nan());
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let rows: JsonMatrix = vec![vec![Some(1.0), Some(0.0)], vec![Some(2.0)]];
        assert!(matrix_from_rows(&rows, "matrix").is_err());
    }

    #[test]
    fn matrix_input_parses_optional_fields() {
        let input: MatrixInput = serde_json::from_str(
            r#"{ "labels": ["a", "b"], "matrix": [[1.0, null], [null, 1.0]],
                 "hessian": [[2.0, 0.0], [0.0, 3.0]] }"#,
        )
        .expect("input");
        assert_eq!(input.labels, vec!["a", "b"]);
        assert!(input.hessian.is_some());
        assert!(input.flagged_non_finite.is_empty());
    }

    #[test]
    fn cli_parses_subcommand_overrides() {
        let cli = Cli::try_parse_from([
            "fit-diagnostics",
            "vcov",
            "--input",
            "vcov.json",
            "--tolerance",
            "1e-7",
            "--json",
        ])
        .expect("cli should parse");
        match cli.command {
            Command::Vcov(args) => {
                assert_eq!(args.tolerance, Some(1e-7));
                assert!(args.common.json);
                assert_eq!(args.common.input, PathBuf::from("vcov.json"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
