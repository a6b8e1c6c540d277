//! Ethotrack CLI - Command-line interface for Ethotrack
//!
//! Commands:
//! - analyze: Run one behavior domain on one keypoint table
//! - batch: Run one domain on every keypoint table in a directory
//! - config: Print the default configuration
//! - inspect: List the keypoints and frame count of a table

use clap::{Parser, Subcommand, ValueEnum};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use ethotrack::pipeline::{AnalysisOutput, AnalysisReport, BatchOutcome};
use ethotrack::table::{write_bouts, write_counts, write_rows, write_trajectory};
use ethotrack::{
    read_keypoint_csv, read_keypoint_table, AnalysisConfig, AnalysisError, BehaviorAnalyzer,
    BehaviorDomain, VERSION,
};
use tracing::info;

/// Ethotrack - Behavior events from animal pose-tracking output
#[derive(Parser)]
#[command(name = "ethotrack")]
#[command(version = VERSION)]
#[command(about = "Detect behavior bouts and events in pose-tracking tables", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyse one keypoint table
    Analyze {
        /// Input CSV path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Behavior domain
        #[arg(short, long)]
        domain: DomainArg,

        /// Configuration JSON; omitted sections keep their defaults
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the frame rate of every domain
        #[arg(long)]
        fps: Option<f64>,

        /// Directory for CSV result tables
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Report file path (use - for stdout)
        #[arg(long, default_value = "-")]
        report: PathBuf,
    },

    /// Analyse every CSV table in a directory
    Batch {
        /// Directory holding keypoint CSV files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Behavior domain
        #[arg(short, long)]
        domain: DomainArg,

        /// Configuration JSON
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the frame rate of every domain
        #[arg(long)]
        fps: Option<f64>,

        /// Directory for per-video CSV result tables
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Config,

    /// List keypoints and frame count of a table
    Inspect {
        /// Input CSV path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DomainArg {
    /// Reach-and-grab detection
    Catch,
    /// Two-animal interaction and proximity
    Social,
    /// Conditioned place preference sides
    Cpp,
    /// Paw-to-mouth grooming
    Grooming,
    /// Body-bend swimming
    Swimming,
    /// Three-chamber paw contact
    ThreeChamber,
    /// Scratch counts per minute
    Scratch,
}

impl From<DomainArg> for BehaviorDomain {
    fn from(arg: DomainArg) -> Self {
        match arg {
            DomainArg::Catch => BehaviorDomain::Catch,
            DomainArg::Social => BehaviorDomain::Social,
            DomainArg::Cpp => BehaviorDomain::Cpp,
            DomainArg::Grooming => BehaviorDomain::Grooming,
            DomainArg::Swimming => BehaviorDomain::Swimming,
            DomainArg::ThreeChamber => BehaviorDomain::ThreeChamber,
            DomainArg::Scratch => BehaviorDomain::Scratch,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), EthotrackCliError> {
    match command {
        Commands::Analyze {
            input,
            domain,
            config,
            fps,
            output_dir,
            report,
        } => cmd_analyze(
            &input,
            domain.into(),
            config.as_deref(),
            fps,
            output_dir.as_deref(),
            &report,
        ),

        Commands::Batch {
            input_dir,
            domain,
            config,
            fps,
            output_dir,
        } => cmd_batch(&input_dir, domain.into(), config.as_deref(), fps, output_dir.as_deref()),

        Commands::Config => cmd_config(),

        Commands::Inspect { input, json } => cmd_inspect(&input, json),
    }
}

fn load_analyzer(config: Option<&Path>, fps: Option<f64>) -> Result<BehaviorAnalyzer, EthotrackCliError> {
    let mut config = match config {
        Some(path) => AnalysisConfig::from_path(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(fps) = fps {
        config.set_fps(fps);
    }
    Ok(BehaviorAnalyzer::new(config)?)
}

fn is_stdin(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn read_table(input: &Path) -> Result<ethotrack::types::KeypointTable, EthotrackCliError> {
    if is_stdin(input) {
        if atty::is(atty::Stream::Stdin) {
            return Err(EthotrackCliError::NoInput);
        }
        Ok(read_keypoint_table(io::stdin().lock())?)
    } else {
        Ok(read_keypoint_csv(input)?)
    }
}

fn cmd_analyze(
    input: &Path,
    domain: BehaviorDomain,
    config: Option<&Path>,
    fps: Option<f64>,
    output_dir: Option<&Path>,
    report_path: &Path,
) -> Result<(), EthotrackCliError> {
    let analyzer = load_analyzer(config, fps)?;
    let table = read_table(input)?;
    let source = if is_stdin(input) {
        None
    } else {
        Some(input.display().to_string())
    };

    let report = analyzer.report(domain, &table, source.as_deref())?;

    if let Some(dir) = output_dir {
        let stem = input
            .file_stem()
            .filter(|_| !is_stdin(input))
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "stdin".to_string());
        write_tables(dir, &stem, &report)?;
    }

    let json = report.to_json()?;
    if is_stdin(report_path) {
        println!("{}", json);
    } else {
        fs::write(report_path, json)?;
    }
    Ok(())
}

fn cmd_batch(
    input_dir: &Path,
    domain: BehaviorDomain,
    config: Option<&Path>,
    fps: Option<f64>,
    output_dir: Option<&Path>,
) -> Result<(), EthotrackCliError> {
    let analyzer = load_analyzer(config, fps)?;

    let mut paths: Vec<PathBuf> = fs::read_dir(input_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
        })
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(EthotrackCliError::NoTables(input_dir.display().to_string()));
    }

    let outcomes = analyzer.analyze_batch(domain, &paths);

    if let Some(dir) = output_dir {
        for (path, outcome) in paths.iter().zip(&outcomes) {
            if let BatchOutcome::Completed { report, .. } = outcome {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "video".to_string());
                write_tables(dir, &stem, report)?;
            }
        }
    }

    let completed = outcomes.iter().filter(|o| o.is_completed()).count();
    info!(completed, failed = outcomes.len() - completed, "batch finished");

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}

fn cmd_config() -> Result<(), EthotrackCliError> {
    println!("{}", AnalysisConfig::default().to_json()?);
    Ok(())
}

#[derive(serde::Serialize)]
struct TableSummary {
    frame_count: usize,
    keypoints: Vec<KeypointSummary>,
}

#[derive(serde::Serialize)]
struct KeypointSummary {
    keypoint: String,
    valid_frames: usize,
}

fn cmd_inspect(input: &Path, json: bool) -> Result<(), EthotrackCliError> {
    let table = read_table(input)?;
    let mut keypoints = Vec::new();
    for key in table.keys() {
        keypoints.push(KeypointSummary {
            keypoint: key.to_string(),
            valid_frames: table.get(key)?.valid_count(),
        });
    }
    let summary = TableSummary {
        frame_count: table.frame_count(),
        keypoints,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Frames: {}", summary.frame_count);
        println!("Keypoints:");
        for kp in &summary.keypoints {
            println!("  {:<32} {} with coordinates", kp.keypoint, kp.valid_frames);
        }
    }
    Ok(())
}

/// Write the CSV tables of one report into `dir`, prefixed with `stem`
fn write_tables(dir: &Path, stem: &str, report: &AnalysisReport) -> Result<(), EthotrackCliError> {
    fs::create_dir_all(dir)?;
    let create = |suffix: &str| -> Result<BufWriter<File>, EthotrackCliError> {
        Ok(BufWriter::new(File::create(dir.join(format!("{stem}_{suffix}.csv")))?))
    };

    match &report.output {
        AnalysisOutput::Catch(analysis) => {
            write_rows(create("catch_results")?, &analysis.records)?;
            for slice in &analysis.trajectories {
                write_trajectory(create(&format!("trajectory_{}", slice.event_index))?, slice)?;
            }
        }
        AnalysisOutput::Bouts(analysis) => {
            write_bouts(create(&format!("{}_bouts", report.domain))?, &analysis.bouts)?;
        }
        AnalysisOutput::Scratch(score) => {
            write_counts(create("scratch_per_minute")?, "minute", &score.per_minute)?;
            write_counts(create("scratch_per_interval")?, "interval", &score.per_interval)?;
        }
    }
    Ok(())
}

// Error handling

#[derive(Debug)]
enum EthotrackCliError {
    Io(io::Error),
    Analysis(AnalysisError),
    Json(serde_json::Error),
    NoInput,
    NoTables(String),
}

impl From<io::Error> for EthotrackCliError {
    fn from(e: io::Error) -> Self {
        EthotrackCliError::Io(e)
    }
}

impl From<AnalysisError> for EthotrackCliError {
    fn from(e: AnalysisError) -> Self {
        EthotrackCliError::Analysis(e)
    }
}

impl From<serde_json::Error> for EthotrackCliError {
    fn from(e: serde_json::Error) -> Self {
        EthotrackCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<EthotrackCliError> for CliError {
    fn from(e: EthotrackCliError) -> Self {
        match e {
            EthotrackCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            EthotrackCliError::Analysis(e) => {
                let hint = match &e {
                    AnalysisError::MissingInput(_) => {
                        Some("Run 'ethotrack inspect' to list the keypoints in the table".to_string())
                    }
                    AnalysisError::Configuration(_) => {
                        Some("Run 'ethotrack config' to print a valid configuration".to_string())
                    }
                    AnalysisError::Parse(_) | AnalysisError::Csv(_) => {
                        Some("Ensure input is a pose-tracking CSV with scorer/bodyparts/coords header rows".to_string())
                    }
                    _ => None,
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint,
                }
            }
            EthotrackCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            EthotrackCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "No input piped on stdin".to_string(),
                hint: Some("Pipe a CSV table or pass a file path with --input".to_string()),
            },
            EthotrackCliError::NoTables(dir) => CliError {
                code: "NO_TABLES".to_string(),
                message: format!("No CSV tables found in {dir}"),
                hint: Some("Point --input-dir at a directory of keypoint CSV files".to_string()),
            },
        }
    }
}
