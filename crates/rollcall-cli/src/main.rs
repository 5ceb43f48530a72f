use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::{AttendanceConfig, AttendanceLog, CsvAttendanceStore, ReferenceIndex};
use rollcall_hw::Camera;
use std::path::PathBuf;

#[zbus::proxy(
    interface = "org.rollcall.Rollcall1",
    default_service = "org.rollcall.Rollcall1",
    default_path = "/org/rollcall/Rollcall1"
)]
trait Rollcall {
    async fn start(&self) -> zbus::Result<()>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn shutdown(&self) -> zbus::Result<()>;
}

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face-recognition attendance CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start recognizing faces and marking attendance
    Start,
    /// Pause recognition (the camera stays open)
    Stop,
    /// Show daemon status
    Status,
    /// Release the camera and stop the daemon
    Shutdown,
    /// Print attendance records for one day
    Log {
        /// Day to show (YYYY-MM-DD, default today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
        /// Attendance CSV file
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// List enrolled identities in the reference database
    Identities {
        /// Reference database directory
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// List V4L2 capture devices
    Devices,
    /// Capture one frame and report what the camera sees
    Test {
        /// Camera device path
        #[arg(short, long, default_value = "/dev/video0")]
        device: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let defaults = AttendanceConfig::default();

    match cli.command {
        Commands::Start => {
            proxy().await?.start().await.context("start failed")?;
            println!("Recognition started");
        }
        Commands::Stop => {
            proxy().await?.stop().await.context("stop failed")?;
            println!("Recognition stopped");
        }
        Commands::Status => {
            let raw = proxy().await?.status().await.context("status failed")?;
            print_status(&raw)?;
        }
        Commands::Shutdown => {
            proxy().await?.shutdown().await.context("shutdown failed")?;
            println!("rollcalld: camera released, daemon exiting");
        }
        Commands::Log { date, path } => {
            let path = path.unwrap_or(defaults.log_path);
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let store = CsvAttendanceStore::new(&path);
            let records = store.records_on(date)?;
            if records.is_empty() {
                println!("No attendance recorded on {date} in {}", path.display());
            } else {
                println!("{:<24} {:<10} {}", "Name", "Date", "Time");
                for r in &records {
                    println!(
                        "{:<24} {:<10} {}",
                        r.name.as_str(),
                        r.date,
                        r.time.format("%H:%M:%S")
                    );
                }
                println!("{} present", records.len());
            }
        }
        Commands::Identities { db } => {
            let db = db.unwrap_or(defaults.reference_db);
            let index = ReferenceIndex::scan(&db)
                .with_context(|| format!("failed to read reference database {}", db.display()))?;
            if index.is_empty() {
                println!("No identities enrolled in {}", db.display());
            }
            for identity in index.identities() {
                println!("{:<24} {} image(s)", identity.as_str(), index.images(identity).len());
            }
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { device } => {
            println!("Testing camera {device}...");
            let mut camera = Camera::open(&device)?;
            let frame = camera.capture_frame()?;
            println!("  format:     {:?}", camera.pixel_format());
            println!("  resolution: {}x{}", frame.width, frame.height);
            println!("  sequence:   {}", frame.sequence);
            println!("  brightness: {:.1}", frame.avg_brightness());
            if frame.is_dark {
                println!("  warning: frame is nearly black (lens covered or no light?)");
            }
        }
    }

    Ok(())
}

async fn proxy() -> Result<RollcallProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    tracing::debug!("connected to session bus");
    RollcallProxy::new(&conn)
        .await
        .context("rollcalld is not reachable")
}

fn print_status(raw: &str) -> Result<()> {
    let status: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned malformed status")?;
    println!("rollcalld {}", status["version"].as_str().unwrap_or("?"));
    println!("  state:     {}", status["state"].as_str().unwrap_or("?"));
    println!("  last tick: {}", status["last_tick"].as_str().unwrap_or("?"));
    println!(
        "  recording: {}",
        if status["recording_enabled"].as_bool().unwrap_or(false) {
            "enabled"
        } else {
            "disabled (attendance log unavailable)"
        }
    );
    println!("  ledger:    {} entries", status["ledger_entries"]);
    if let Some(stats) = status["stats"].as_object() {
        for (k, v) in stats {
            println!("    {k}: {v}");
        }
    }
    Ok(())
}
