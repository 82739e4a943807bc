use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use facegate_core::ArcFaceExtractor;
use facegate_store::NewStudent;
use facegated::{engine, fanout, CheckinOutcome, Config, LogNotifier};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a student to the roster
    AddStudent {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        class_name: Option<String>,
        #[arg(long)]
        school_id: Option<String>,
    },
    /// Enroll a face image for a rostered student
    Enroll {
        #[arg(long)]
        student_id: String,
        #[arg(long)]
        name: String,
        /// Path to a face crop image (PNG/JPEG)
        image: String,
    },
    /// Run one recognition-and-check-in pass over an image
    Checkin {
        #[arg(long)]
        school_id: String,
        /// Camera label recorded with the attendance row (e.g., gate_in)
        #[arg(long, default_value = "gate_in")]
        camera: String,
        /// Path to a face crop image (PNG/JPEG)
        image: String,
    },
    /// List students, optionally for one school
    Students {
        #[arg(long)]
        school_id: Option<String>,
    },
    /// List attendance rows, newest first
    Attendance {
        #[arg(long)]
        school_id: Option<String>,
        /// Calendar date filter (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

/// Build the full engine from env configuration. Only the image
/// commands pay the model-loading cost.
fn build_engine(config: &Config) -> Result<(Arc<engine::Engine>, tokio::task::JoinHandle<()>)> {
    let store = facegate_store::open_store(&config.store)?;
    let extractor = ArcFaceExtractor::load(&config.model_path.to_string_lossy())?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let fanout_task = fanout::spawn_fanout(events_rx, vec![Box::new(LogNotifier)]);

    let engine = Arc::new(engine::Engine::new(
        engine::EngineConfig {
            quality: config.quality.clone(),
            liveness: config.liveness.clone(),
            confidence_threshold: config.confidence_threshold,
            cooldown: config.cooldown,
            max_embeddings_per_identity: config.max_embeddings_per_identity,
            gallery_path: config.gallery_path.clone(),
        },
        Box::new(extractor),
        store,
        events_tx,
    ));
    Ok((engine, fanout_task))
}

fn load_image(path: &str) -> Result<image::RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("failed to open image: {path}"))?
        .to_rgb8())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::AddStudent { student_id, name, class_name, school_id } => {
            let store = facegate_store::open_store(&config.store)?;
            let student = store.add_student(&NewStudent {
                student_id,
                name,
                class_name,
                school_id,
                image_path: None,
            })?;
            println!("{}", serde_json::to_string_pretty(&student)?);
        }
        Commands::Enroll { student_id, name, image } => {
            let (engine, fanout_task) = build_engine(&config)?;
            let face = load_image(&image)?;
            match engine.enroll_face(&student_id, &name, &face) {
                Ok(()) => println!("enrolled {student_id}"),
                Err(e) => {
                    eprintln!("enrollment rejected: {e}");
                    std::process::exit(1);
                }
            }
            drop(engine);
            let _ = fanout_task.await;
        }
        Commands::Checkin { school_id, camera, image } => {
            let (engine, fanout_task) = build_engine(&config)?;
            let face = load_image(&image)?;
            match engine.recognize_and_checkin(&face, &school_id, &camera, Utc::now()) {
                Ok(CheckinOutcome::Recorded { student_id, name, confidence, record }) => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "outcome": "recorded",
                            "student_id": student_id,
                            "name": name,
                            "confidence": confidence,
                            "record_id": record.id,
                        })
                    );
                }
                Ok(CheckinOutcome::Suppressed { student_id, name, confidence }) => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "outcome": "suppressed",
                            "student_id": student_id,
                            "name": name,
                            "confidence": confidence,
                        })
                    );
                }
                Err(e) => {
                    eprintln!("not recorded: {e}");
                    std::process::exit(1);
                }
            }
            drop(engine);
            let _ = fanout_task.await;
        }
        Commands::Students { school_id } => {
            let store = facegate_store::open_store(&config.store)?;
            let students = store.get_students(school_id.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&students)?);
        }
        Commands::Attendance { school_id, date } => {
            let store = facegate_store::open_store(&config.store)?;
            let rows = store.get_attendance(school_id.as_deref(), date)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
    }

    Ok(())
}
