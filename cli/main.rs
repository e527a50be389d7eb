#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array2, Axis, concatenate};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use polychaos::algorithm::study_basis;
use polychaos::data::{load_sample, load_table, load_weights, write_table};
use polychaos::sensitivity::ChaosSensitivity;
use polychaos::strategy::{GreedyProgress, GreedyTrace};
use polychaos::{
    FunctionalChaosAlgorithm, FunctionalChaosResult, IsoprobabilisticTransform, OrthogonalBasis,
    StudyConfig,
};

#[derive(Parser)]
#[command(
    name = "polychaos",
    about = "Sparse polynomial chaos surrogates from input/output samples",
    long_about = "Fits functional chaos expansions by projection, least squares or \
                 greedy orthogonal matching pursuit, and reports their moments and Sobol indices."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit an expansion to a sample
    #[command(about = "Fit a chaos expansion (outputs: report.toml)")]
    Fit {
        /// Input sample CSV, one column per input variable
        #[arg(long)]
        input: PathBuf,

        /// Output sample CSV, one column per output component
        #[arg(long)]
        output: PathBuf,

        /// Study description (.toml)
        #[arg(long)]
        config: PathBuf,

        /// Single-column CSV of observation weights
        #[arg(long)]
        weights: Option<PathBuf>,

        /// Where to write the report
        #[arg(long, default_value = "report.toml")]
        report: PathBuf,
    },

    /// Write a Gauss tensor-product design for the study's inputs
    #[command(about = "Generate quadrature nodes (outputs: nodes.csv)")]
    Quadrature {
        /// Study description (.toml)
        #[arg(long)]
        config: PathBuf,

        /// Gauss nodes per input dimension
        #[arg(long)]
        nodes: usize,

        /// Where to write the nodes and their weights
        #[arg(long, default_value = "nodes.csv")]
        out: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli { command } = Cli::parse();

    let result = match command {
        Some(Commands::Fit {
            input,
            output,
            config,
            weights,
            report,
        }) => run_fit(input, output, config, weights, report),
        Some(Commands::Quadrature { config, nodes, out }) => run_quadrature(config, nodes, out),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
                process::exit(1);
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[derive(Serialize)]
struct FitReport {
    strategy: String,
    sample_size: usize,
    outputs: Vec<String>,
    residuals: Vec<f64>,
    relative_errors: Vec<f64>,
    terms: Vec<TermReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    moments: Option<MomentsReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sobol: Option<SobolReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    greedy: Vec<GreedyTrace>,
}

#[derive(Serialize)]
struct TermReport {
    rank: usize,
    multi_index: Vec<usize>,
    coefficients: Vec<f64>,
}

#[derive(Serialize)]
struct MomentsReport {
    mean: Vec<f64>,
    variance: Vec<f64>,
}

/// Rows are inputs, columns are outputs.
#[derive(Serialize)]
struct SobolReport {
    first_order: Vec<Vec<f64>>,
    total_order: Vec<Vec<f64>>,
}

fn run_fit(
    input: PathBuf,
    output: PathBuf,
    config: PathBuf,
    weights: Option<PathBuf>,
    report: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let study = StudyConfig::load(&config)?;
    let input_sample = load_sample(&input)?;
    let sample_size = input_sample.nrows();
    let output_table = load_table(&output)?;
    let output_names = output_table.columns.clone();

    let progress = ProgressBar::new(0);
    progress.set_style(
        ProgressStyle::with_template(">  Greedy selection [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    let sink = progress.clone();
    let outputs = output_names.len() as u64;
    let callback = Arc::new(move |p: &GreedyProgress| {
        sink.set_length(p.max_iterations as u64 * outputs);
        sink.inc(1);
        sink.set_message(format!("best error {:.3e}", p.best_error));
    });

    let mut algorithm =
        FunctionalChaosAlgorithm::from_study(input_sample, output_table.values, &study)?
            .with_progress(callback);
    if let Some(path) = weights {
        algorithm = algorithm.with_weights(load_weights(&path)?);
    }
    let result = algorithm.run()?;
    progress.finish_and_clear();

    let summary = summarise(&result, &study, sample_size, output_names)?;
    println!(
        "Selected {} of {} candidate terms; relative errors {:?}",
        summary.terms.len(),
        study.chaos.basis_size,
        summary.relative_errors
    );
    fs::write(&report, toml::to_string_pretty(&summary)?)?;
    println!("Report written to {}", report.display());
    Ok(())
}

fn summarise(
    result: &FunctionalChaosResult,
    study: &StudyConfig,
    sample_size: usize,
    outputs: Vec<String>,
) -> Result<FitReport, Box<dyn std::error::Error>> {
    let coefficients = result.coefficients();
    let terms = result
        .indices()
        .iter()
        .zip(result.multi_indices()?)
        .zip(coefficients.rows())
        .map(|((&rank, multi_index), row)| TermReport {
            rank,
            multi_index,
            coefficients: row.to_vec(),
        })
        .collect();

    let (moments, sobol) = match ChaosSensitivity::new(result) {
        Ok(sensitivity) => (
            Some(MomentsReport {
                mean: sensitivity.mean().to_vec(),
                variance: sensitivity.variance().to_vec(),
            }),
            Some(SobolReport {
                first_order: rows_of(&sensitivity.first_order_indices()),
                total_order: rows_of(&sensitivity.total_order_indices()),
            }),
        ),
        Err(e) => {
            log::warn!("Skipping moments and Sobol indices: {e}");
            (None, None)
        }
    };

    Ok(FitReport {
        strategy: format!("{:?}", study.strategy),
        sample_size,
        outputs,
        residuals: result.residuals().to_vec(),
        relative_errors: result.relative_errors().to_vec(),
        terms,
        moments,
        sobol,
        greedy: result.greedy_traces().to_vec(),
    })
}

fn rows_of(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

fn run_quadrature(
    config: PathBuf,
    nodes: usize,
    out: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    let study = StudyConfig::load(&config)?;
    let (distribution, basis) = study_basis(&study)?;
    let (standard_nodes, weights) =
        polychaos::basis::gauss_product_experiment(basis.families(), &vec![nodes; basis.dimension()])?;

    let to_input = IsoprobabilisticTransform::new(&distribution, &basis.measure())?.inverse();
    let points = to_input.apply_sample(standard_nodes.view())?;
    let table = concatenate(Axis(1), &[points.view(), weights.view().insert_axis(Axis(1))])?;

    let mut header: Vec<String> = (1..=basis.dimension()).map(|d| format!("x{d}")).collect();
    header.push("weight".to_string());
    write_table(&out, &header, &table)?;
    println!("Wrote {} nodes to {}", table.nrows(), out.display());
    Ok(())
}
