use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use progress_core::Clock;
use progress_core::model::{EnrollmentState, LessonId, UserId};
use server::ServerConfig;
use services::api::{CatalogApi, ProgressApi};
use services::{
    HttpProgressClient, LessonPlayer, LocalProgressApi, Notice, ProgressService,
    ProgressSyncClient, SessionConfig, SimulatedPlayback, SyncConfig,
};
use storage::repository::Storage;
use storage::seed::seed_demo;

const DEFAULT_DB_URL: &str = "sqlite://progress.sqlite3?mode=rwc";

/// Anonymous learner used when no `--user` is given.
const GUEST: UserId = UserId::new(0);

/// Track lesson and formation progress.
#[derive(Debug, Parser)]
#[command(name = "progress", version)]
struct Cli {
    /// `SQLite` URL of the local backend
    #[arg(long = "db", env = "PROGRESS_DB_URL", default_value = DEFAULT_DB_URL, global = true)]
    db_url: String,

    /// Talk to a progress server instead of the local database
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Bearer token for `--remote`
    #[arg(long, global = true)]
    token: Option<String>,

    /// Learner id for the local backend; omit to act as a guest
    #[arg(long, env = "PROGRESS_USER", global = true)]
    user: Option<UserId>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load the demo formation into the local database
    Seed {
        /// Grant these learners an enrollment
        #[arg(long, value_delimiter = ',')]
        enroll: Vec<UserId>,
    },
    /// Enroll in a formation
    Enroll { slug: String },
    /// Play a lesson from its resume point up to `--to` seconds
    Watch {
        slug: String,
        lesson: LessonId,
        /// Stop at this media position (defaults to the end)
        #[arg(long)]
        to: Option<f64>,
        /// Media seconds advanced per tick
        #[arg(long, default_value_t = 10.0)]
        step: f64,
        /// Wall-clock milliseconds per tick
        #[arg(long, default_value_t = 1_000)]
        interval_ms: u64,
    },
    /// Mark a lesson as completed
    Complete { slug: String, lesson: LessonId },
    /// Replace the notes of a lesson
    Notes {
        slug: String,
        lesson: LessonId,
        text: String,
    },
    /// Show chapter and formation progress
    Status { slug: String },
    /// Show totals, certificates and streaks
    Dashboard,
    /// Serve the progress API over HTTP from the local database
    Serve,
}

struct Backend {
    catalog: Arc<dyn CatalogApi>,
    progress: Arc<dyn ProgressApi>,
    local: Option<Arc<ProgressService>>,
}

impl Backend {
    async fn connect(cli: &Cli, sync: &SyncConfig) -> anyhow::Result<Self> {
        if let Some(client) = HttpProgressClient::from_config(sync)? {
            info!(url = sync.api_url.as_deref().unwrap_or_default(), "using remote progress API");
            let client = Arc::new(client);
            return Ok(Self {
                catalog: client.clone(),
                progress: client,
                local: None,
            });
        }

        let storage = Storage::sqlite(&cli.db_url)
            .await
            .with_context(|| format!("opening {}", cli.db_url))?;
        info!(db = %cli.db_url, "using local database");
        let service = Arc::new(ProgressService::new(Clock::system(), storage));
        let api = Arc::new(LocalProgressApi::new(service.clone(), cli.user));
        Ok(Self {
            catalog: api.clone(),
            progress: api,
            local: Some(service),
        })
    }

    fn local(&self) -> anyhow::Result<&Arc<ProgressService>> {
        self.local
            .as_ref()
            .context("this command only works against the local database")
    }

    fn player(&self, cli: &Cli, sync: &SyncConfig) -> LessonPlayer {
        LessonPlayer::new(
            self.catalog.clone(),
            ProgressSyncClient::new(self.progress.clone()),
            cli.user.unwrap_or(GUEST),
            Clock::system(),
            SessionConfig::from(sync),
        )
    }
}

fn print_notices(player: &mut LessonPlayer) {
    for notice in player.take_notices() {
        match notice {
            Notice::SignInRequired => {
                eprintln!("! sign in again: progress is no longer being saved");
            }
            Notice::FormationCompleted(slug) => println!("Formation '{slug}' completed!"),
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut sync = SyncConfig::from_env()?;
    if let Some(remote) = &cli.remote {
        sync.api_url = Some(remote.clone());
    }
    if let Some(token) = &cli.token {
        sync.token = Some(token.clone());
    }
    let backend = Backend::connect(&cli, &sync).await?;

    match &cli.command {
        Command::Seed { enroll } => {
            let service = backend.local()?;
            let formation = seed_demo(service.storage()).await?;
            for user_id in enroll {
                service.grant_enrollment(*user_id, &formation.slug).await?;
            }
            println!(
                "Seeded '{}' ({} lessons); {} learner(s) enrolled.",
                formation.slug,
                formation.lesson_count(),
                enroll.len()
            );
        }
        Command::Enroll { slug } => {
            let mut player = backend.player(&cli, &sync);
            player.open_formation(slug).await?;
            let enrollment = player.enroll().await?;
            println!(
                "Enrolled in '{slug}' ({}% complete).",
                enrollment.progress_percentage
            );
            print_notices(&mut player);
        }
        Command::Watch {
            slug,
            lesson,
            to,
            step,
            interval_ms,
        } => {
            let mut player = backend.player(&cli, &sync);
            player.open_formation(slug).await?;
            let opened = player.open_lesson(*lesson).await?;
            let Some(duration) = opened.lesson.content.duration_seconds() else {
                bail!(
                    "lesson {lesson} is a {} without media; use `complete`",
                    opened.lesson.kind().as_str()
                );
            };
            let duration = f64::from(duration);
            let mut source = SimulatedPlayback::new(
                duration,
                to.unwrap_or(duration),
                *step,
                Duration::from_millis(*interval_ms),
            );
            println!(
                "Playing '{}' from {:.0}s",
                opened.lesson.title,
                opened.resume.position_seconds()
            );

            let report = player.play(*lesson, &mut source).await?;
            if let Some(last) = &report.last {
                println!(
                    "Stopped at {:.0}s: {:.1}% watched{}, {} write(s), {} saved.",
                    last.position_seconds,
                    last.completion_percentage,
                    if last.is_completed { ", completed" } else { "" },
                    report.writes,
                    report.acknowledged
                );
            }
            print_notices(&mut player);
        }
        Command::Complete { slug, lesson } => {
            let mut player = backend.player(&cli, &sync);
            player.open_formation(slug).await?;
            player.mark_completed(*lesson).await?;
            println!("Lesson {lesson} marked as completed.");
            print_notices(&mut player);
        }
        Command::Notes { slug, lesson, text } => {
            let mut player = backend.player(&cli, &sync);
            player.open_formation(slug).await?;
            player.save_notes(*lesson, text.as_str()).await?;
            println!("Notes saved for lesson {lesson}.");
            print_notices(&mut player);
        }
        Command::Status { slug } => {
            let mut player = backend.player(&cli, &sync);
            player.open_formation(slug).await?;
            let aggregator = player.aggregator().context("formation not loaded")?;
            let formation = aggregator.formation();
            let rollup = aggregator.rollup();

            println!(
                "{} [{}] {}% ({}/{} lessons)",
                formation.title,
                match aggregator.state() {
                    EnrollmentState::NotEnrolled => "guest",
                    EnrollmentState::Enrolled => "enrolled",
                    EnrollmentState::Completed => "completed",
                },
                rollup.percentage,
                rollup.completed_lessons,
                rollup.total_lessons
            );
            for chapter in &formation.chapters {
                let progress = rollup.chapter(chapter.id);
                println!(
                    "  {} {}%",
                    chapter.title,
                    progress.map_or(0, |p| p.percentage)
                );
                for lesson in &chapter.lessons {
                    let mark = match player.progress(lesson.id) {
                        Some(p) if p.is_completed => "x",
                        Some(_) => "~",
                        None if aggregator.access().allows(lesson) => " ",
                        None => "-",
                    };
                    println!("    [{mark}] {:>3} {}", lesson.id.value(), lesson.title);
                }
            }

            let resume_at = aggregator
                .enrollment()
                .and_then(|e| e.current_lesson_id)
                .and_then(|id| formation.lesson(id))
                .or_else(|| formation.first_lesson());
            if let Some(lesson) = resume_at {
                println!("Continue with lesson {}: {}", lesson.id, lesson.title);
            }
        }
        Command::Dashboard => {
            let dashboard = ProgressSyncClient::new(backend.progress.clone())
                .dashboard()
                .await?;
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
        }
        Command::Serve => {
            let service = backend.local()?.clone();
            let config = ServerConfig::from_env()?;
            server::serve(config, service).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn watch_parses_ids_and_defaults() {
        let cli = Cli::try_parse_from([
            "progress",
            "--user",
            "7",
            "watch",
            "intro-to-rust",
            "5",
            "--to",
            "120",
        ])
        .unwrap();
        assert_eq!(cli.user, Some(UserId::new(7)));
        let Command::Watch {
            lesson,
            to,
            step,
            interval_ms,
            ..
        } = cli.command
        else {
            panic!("expected watch");
        };
        assert_eq!(lesson, LessonId::new(5));
        assert_eq!(to, Some(120.0));
        assert_eq!(step, 10.0);
        assert_eq!(interval_ms, 1_000);
    }

    #[test]
    fn seed_takes_a_comma_separated_learner_list() {
        let cli = Cli::try_parse_from(["progress", "seed", "--enroll", "1,2"]).unwrap();
        assert!(matches!(cli.command, Command::Seed { enroll } if enroll.len() == 2));
    }
}
