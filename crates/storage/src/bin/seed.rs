use chrono::{DateTime, Utc};
use clap::Parser;
use progress_core::model::{EnrollAccess, Enrollment, UserId};
use storage::repository::Storage;
use storage::seed::seed_demo;

/// Seed a `SQLite` database with the demo formation.
#[derive(Debug, Parser)]
#[command(name = "seed")]
struct Args {
    /// `SQLite` URL
    #[arg(long = "db", env = "PROGRESS_DB_URL", default_value = "sqlite://progress.sqlite3?mode=rwc")]
    db_url: String,

    /// Enroll these learners into the demo formation
    #[arg(long = "enroll", value_delimiter = ',')]
    enroll: Vec<UserId>,

    /// Fixed current time for deterministic seeding (RFC 3339)
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Storage::sqlite(&args.db_url).await?;
    let formation = seed_demo(&storage).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let mut enrolled = 0_u32;
    for user_id in args.enroll {
        if storage
            .enrollments
            .get_enrollment(user_id, formation.id)
            .await?
            .is_some()
        {
            continue;
        }
        let enrollment = Enrollment::enroll(user_id, formation.id, EnrollAccess::Granted, now)?;
        storage.enrollments.upsert_enrollment(&enrollment).await?;
        enrolled += 1;
    }

    println!(
        "Seeded formation '{}' ({} lessons) into {}; {enrolled} new enrollment(s).",
        formation.slug,
        formation.lesson_count(),
        args.db_url
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = run(args).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}
