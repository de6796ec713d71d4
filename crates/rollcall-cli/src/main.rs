use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::training::{self, TrainingConfig};
use rollcall_service::{AttendanceService, Config, ConsistencyReport};
use rollcall_store::{AttendanceStore, ReportFilter};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the attendance database if it does not exist
    InitDb,
    /// Save the first face of each image into a student's dataset folder
    Capture {
        /// Dataset folder name (e.g. "ENG2023001_samuel")
        #[arg(short, long)]
        folder: String,
        /// Stop after this many faces have been saved
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Still images to read faces from
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Register a student whose dataset folder already exists
    Register {
        #[arg(short, long)]
        folder: String,
        #[arg(short, long)]
        matric: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
    /// Train the recognizer from the dataset and print the evaluation
    Train {
        /// Print the full report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Recognize a face in an image and log attendance
    Scan {
        /// Image file, or "-" to read from stdin
        image: PathBuf,
        #[arg(short, long)]
        course: Option<String>,
    },
    /// List attendance, optionally filtered by course and/or date (YYYY-MM-DD)
    Report {
        #[arg(short, long)]
        course: Option<String>,
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Cross-check dataset folders, the trained model and registered students
    Check,
    /// Show model and database status
    Status,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    match cli.command {
        Commands::InitDb => {
            let store = AttendanceStore::open(&config.db_path)?;
            println!("Database ready: {}", store.path().display());
        }
        Commands::Capture {
            folder,
            count,
            images,
        } => {
            let report = rollcall_service::capture_dataset(&config, &folder, &images, count)?;
            print_json(&report)?;
        }
        Commands::Register {
            folder,
            matric,
            name,
        } => {
            let service = AttendanceService::open(config)?;
            let outcome = service.register(&folder, matric.as_deref(), name.as_deref())?;
            print_json(&outcome)?;
        }
        Commands::Train { json } => {
            let training_config =
                TrainingConfig::new(config.dataset_dir.clone(), config.model_path(), config.labels_path());
            let report = training::train(&training_config)?;
            if json {
                print_json(&report)?;
            } else {
                println!("{}", report.evaluation);
                println!(
                    "Trained on {} of {} images across {} students.",
                    report.train_samples,
                    report.samples,
                    report.folders.len()
                );
                println!("Model saved to {}", config.model_path().display());
                println!("Labels saved to {}", config.labels_path().display());
            }
        }
        Commands::Scan { image, course } => {
            let payload = read_payload(&image)?;
            let service = AttendanceService::open(config)?;
            let outcome = service.scan(&payload, course.as_deref())?;
            print_json(&outcome)?;
        }
        Commands::Report { course, date } => {
            let store = AttendanceStore::open(&config.db_path)?;
            let rows = store.report(&ReportFilter { course, date })?;
            print_json(&rows)?;
        }
        Commands::Check => {
            let service = AttendanceService::open(config)?;
            let report: ConsistencyReport = service.check_consistency()?;
            print_json(&report)?;
            if !report.is_consistent() {
                std::process::exit(1);
            }
        }
        Commands::Status => {
            let service = AttendanceService::open(config)?;
            print_json(&service.status()?)?;
        }
    }

    Ok(())
}

fn read_payload(image: &Path) -> Result<Vec<u8>> {
    if image.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("reading image from stdin")?;
        Ok(buf)
    } else {
        std::fs::read(image).with_context(|| format!("reading {}", image.display()))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
