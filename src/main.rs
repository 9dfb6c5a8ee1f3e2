use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use uuid::Uuid;

mod aggregate;
mod config;
mod db;
mod error;
mod models;
mod optimistic;
mod report;
mod store;

use config::{AggregatorConfig, DEFAULT_ABSENCE_THRESHOLD, DEFAULT_ALERT_WINDOW};
use db::PgAttendanceStore;
use models::{AttendanceStats, AttendanceStatus, SundayAttendanceRecord, SundayStats};
use optimistic::{CacheScope, RecordCache, WriteIntent, WriteOutcome};
use store::AttendanceStore;

#[derive(Parser)]
#[command(name = "sunday-attendance")]
#[command(about = "Attendance tracking for Sunday lessons across service times", long_about = None)]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Settings {
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,
    #[arg(long, env = "ATTENDANCE_LOG", default_value = "info", global = true)]
    log_level: String,
    #[arg(
        long,
        env = "ATTENDANCE_ABSENCE_THRESHOLD",
        default_value_t = DEFAULT_ABSENCE_THRESHOLD,
        global = true
    )]
    absence_threshold: usize,
    #[arg(
        long,
        env = "ATTENDANCE_ALERT_WINDOW",
        default_value_t = DEFAULT_ALERT_WINDOW,
        global = true
    )]
    alert_window: usize,
    #[arg(long, env = "ATTENDANCE_DEFAULT_SERVICE_TIME", global = true)]
    default_service_time: Option<Uuid>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo roster with two services and four Sundays
    Seed,
    /// Import attendance rows from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a student's status for one lesson
    Mark {
        #[arg(long)]
        student: Uuid,
        #[arg(long)]
        schedule: Uuid,
        #[arg(long)]
        status: AttendanceStatus,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Remove an attendance record
    Unmark {
        #[arg(long)]
        record: Uuid,
        #[arg(long)]
        schedule: Uuid,
    },
    /// Show a student's Sunday timeline
    Student {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        json: bool,
        /// List Sundays oldest first
        #[arg(long)]
        chronological: bool,
    },
    /// Show statistics for one lesson
    Schedule {
        #[arg(long)]
        id: Uuid,
    },
    /// List students on a consecutive-absence streak
    Alerts,
    /// Generate a markdown report for a student
    Report {
        #[arg(long)]
        student: Uuid,
        #[arg(long, default_value = "attendance.md")]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct StudentSummary<'a> {
    student_id: Uuid,
    consecutive_absences: usize,
    absence_alert: bool,
    sunday_stats: &'a SundayStats,
    service_stats: &'a AttendanceStats,
    sundays: &'a [SundayAttendanceRecord],
}

fn print_schedule_stats(stats: &AttendanceStats) {
    println!(
        "present {} | late {} | excused {} | absent {} | visitors {} | accounted for {}/{}",
        stats.present,
        stats.late,
        stats.excused,
        stats.absent,
        stats.visitors,
        stats.total_present,
        stats.total
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&settings.log_level))
        .init();

    let config = AggregatorConfig::new(
        settings.absence_threshold,
        settings.alert_window,
        settings.default_service_time,
    )?;
    let database_url = settings
        .database_url
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgAttendanceStore::new(pool.clone());

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Recorded {written} attendance rows from {}.", csv.display());
        }
        Commands::Mark {
            student,
            schedule,
            status,
            notes,
        } => {
            let mut cache = RecordCache::load(&store, CacheScope::Schedule(schedule)).await?;
            let intent = WriteIntent::Upsert {
                student_id: student,
                schedule_id: schedule,
                status,
                notes,
            };
            if let WriteOutcome::Upserted(record) =
                optimistic::commit(&mut cache, &store, intent).await?
            {
                println!("Recorded {} as {} (record {}).", student, record.status, record.id);
            }
            print_schedule_stats(&aggregate::compute_stats(cache.records()));
        }
        Commands::Unmark { record, schedule } => {
            let mut cache = RecordCache::load(&store, CacheScope::Schedule(schedule)).await?;
            if let WriteOutcome::Deleted(record_id) =
                optimistic::commit(&mut cache, &store, WriteIntent::Delete { record_id: record })
                    .await?
            {
                println!("Removed record {record_id}.");
            }
            print_schedule_stats(&aggregate::compute_stats(cache.records()));
        }
        Commands::Student {
            id,
            json,
            chronological,
        } => {
            let records = store.fetch_records_for_student(id).await?;
            let sundays = aggregate::group_by_date(&records, &config);
            let sunday_stats = aggregate::compute_sunday_stats(&sundays);
            let service_stats = aggregate::compute_stats(&records);
            let streak = aggregate::consecutive_absences(&sundays);
            let alert = aggregate::has_absence_alert(streak, &config);

            if json {
                let summary = StudentSummary {
                    student_id: id,
                    consecutive_absences: streak,
                    absence_alert: alert,
                    sunday_stats: &sunday_stats,
                    service_stats: &service_stats,
                    sundays: &sundays,
                };
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            if sundays.is_empty() {
                println!("No attendance recorded for this student.");
                return Ok(());
            }

            println!(
                "{} Sundays, attendance rate {}% ({} consecutive absences{})",
                sunday_stats.total,
                sunday_stats.attendance_rate,
                streak,
                if alert { ", ALERT" } else { "" }
            );
            let listing = if chronological {
                aggregate::group_by_date_ascending(&records, &config)
            } else {
                sundays
            };
            for sunday in listing.iter() {
                println!(
                    "- {} {} ({} services attended){}",
                    sunday.date,
                    sunday.status,
                    sunday.service_times_attended.len(),
                    sunday
                        .notes
                        .as_deref()
                        .map(|note| format!(": {note}"))
                        .unwrap_or_default()
                );
            }
        }
        Commands::Schedule { id } => {
            let records = store.fetch_records_for_schedule(id).await?;
            print_schedule_stats(&aggregate::compute_stats(&records));
        }
        Commands::Alerts => {
            let schedules = store.fetch_recent_schedules(config.alert_window).await?;
            let ids: Vec<Uuid> = schedules.iter().map(|schedule| schedule.id).collect();
            let records = store.fetch_records_for_schedules(&ids).await?;
            let alerts = aggregate::roster_absence_alerts(&records, &schedules, &config);
            info!(schedules = schedules.len(), alerts = alerts.len(), "roster scan complete");
            print!("{}", report::build_roster_report(&alerts, &config));
        }
        Commands::Report { student, out } => {
            let name = store
                .fetch_student_name(student)
                .await?
                .with_context(|| format!("no student with id {student}"))?;
            let records = store.fetch_records_for_student(student).await?;
            let report = report::build_student_report(&name, &records, &config);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
