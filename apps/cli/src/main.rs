use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use videowise_core::{
    Config, ExecutionMode, Job, JobStatus, ModePolicy, OwnerId, Phase, ProcessingOptions,
    ProgressSink, Session, SummaryFormat, SummaryStyle, WordTarget, format_job_row,
    format_summary_readable,
};

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let whole = secs.round() as u64;
        format!("{}m {}s", whole / 60, whole % 60)
    }
}

/// CLI wrapper for SummaryStyle (needed for clap ValueEnum)
#[derive(Clone, Copy, Default, ValueEnum)]
enum CliStyle {
    #[default]
    Default,
    Professional,
    Commercial,
    Educational,
    Casual,
    Technical,
}

impl From<CliStyle> for SummaryStyle {
    fn from(cli: CliStyle) -> Self {
        match cli {
            CliStyle::Default => SummaryStyle::Default,
            CliStyle::Professional => SummaryStyle::Professional,
            CliStyle::Commercial => SummaryStyle::Commercial,
            CliStyle::Educational => SummaryStyle::Educational,
            CliStyle::Casual => SummaryStyle::Casual,
            CliStyle::Technical => SummaryStyle::Technical,
        }
    }
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum CliFormat {
    #[default]
    Paragraph,
    Bullet,
    Timeline,
    Chapters,
    Highlights,
}

impl From<CliFormat> for SummaryFormat {
    fn from(cli: CliFormat) -> Self {
        match cli {
            CliFormat::Paragraph => SummaryFormat::Paragraph,
            CliFormat::Bullet => SummaryFormat::Bullet,
            CliFormat::Timeline => SummaryFormat::Timeline,
            CliFormat::Chapters => SummaryFormat::Chapters,
            CliFormat::Highlights => SummaryFormat::Highlights,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Auto,
    Local,
    Remote,
}

impl From<CliMode> for ModePolicy {
    fn from(cli: CliMode) -> Self {
        match cli {
            CliMode::Auto => ModePolicy::Auto,
            CliMode::Local => ModePolicy::Local,
            CliMode::Remote => ModePolicy::Remote,
        }
    }
}

#[derive(Parser)]
#[command(name = "videowise")]
#[command(
    about = "Summarize videos with a multimodal AI provider, through a VideoWise backend or directly"
)]
struct Cli {
    /// Identity that owns submitted jobs
    #[arg(long, global = true)]
    owner: Option<String>,

    /// Where processing happens (auto probes the backend)
    #[arg(long, global = true)]
    mode: Option<CliMode>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Summarize a local video file, a direct video URL or a video-site link
    Summarize {
        /// Path or URL
        input: String,

        #[arg(short, long, default_value = "default")]
        style: CliStyle,

        #[arg(short, long, default_value = "paragraph")]
        format: CliFormat,

        /// Number of key frames to describe (5-20)
        #[arg(long, default_value_t = 10)]
        frames: u32,

        /// Target summary length in words (50-2000) or "auto"
        #[arg(short, long, default_value = "auto")]
        words: WordTarget,

        /// Provider API key for this run (tried before cached and configured keys)
        #[arg(long)]
        api_key: Option<String>,

        /// Reader profile JSON used to personalize the summary
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Print the job as JSON instead of markdown
        #[arg(long)]
        json: bool,
    },

    /// List your jobs, newest first
    Jobs,

    /// Show one job
    Show {
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// Delete the cached provider key
    ForgetKey,
}

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("videowise=info,videowise_core=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .without_time()
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(spinner_style) = ProgressStyle::default_spinner()
        .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
        .template("{spinner:.cyan} {msg}")
    {
        pb.set_style(spinner_style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    if let Ok(bar_style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
    {
        pb.set_style(bar_style.progress_chars("=> "));
    }
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn print_banner() {
    println!(
        "\n{}  {}\n",
        style("videowise").cyan().bold(),
        style("Video Summarizer").dim()
    );
}

async fn summarize(
    session: &Session,
    input: &str,
    options: ProcessingOptions,
    json: bool,
) -> Result<()> {
    print_banner();
    let start = Instant::now();

    let (sink, mut rx) = ProgressSink::channel();
    let pb = create_progress_bar();
    let renderer = {
        let pb = pb.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                pb.set_position(u64::from(event.percent));
                let label = match event.phase {
                    Phase::Failed => style(event.phase.label()).red().to_string(),
                    _ => style(event.phase.label()).dim().to_string(),
                };
                pb.set_message(format!("{} {}", label, event.step));
            }
        })
    };

    let outcome = session.submit(input, &options, &sink).await;
    drop(sink);
    let _ = renderer.await;

    let submission = match outcome {
        Ok(submission) => submission,
        Err(e) => {
            pb.abandon_with_message(format!("{}", style("failed").red()));
            return Err(e.into());
        }
    };
    pb.finish_and_clear();

    let mode = match submission.mode {
        ExecutionMode::Remote => "backend",
        ExecutionMode::Local => "direct",
    };
    println!(
        "{} Processed via {} {}",
        style("✓").green().bold(),
        style(mode).yellow(),
        style(format!("[{}]", format_duration(start.elapsed()))).dim()
    );
    if submission.demoted {
        println!(
            "{} Backend unreachable, fell back to direct processing",
            style("!").yellow().bold()
        );
    }

    print_job(&submission.job, json)
}

fn print_job(job: &Job, json: bool) -> Result<()> {
    let view = job.view();
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!(
        "{} {}  {}",
        style("Job:").dim(),
        style(&view.id).cyan(),
        style(view.status.as_str()).bold()
    );
    println!("{}", style("─".repeat(60)).dim());

    match (&view.result, view.status) {
        (Some(result), _) => println!("{}", format_summary_readable(result)),
        (None, JobStatus::Failed) => println!("{} {}", style("Error:").red().bold(), view.step),
        (None, _) => {
            println!("{}% {}", view.progress, view.step);
            println!(
                "{}",
                style(format!("Check again with: videowise show {}", view.id)).dim()
            );
        }
    }
    Ok(())
}

async fn list_jobs(session: &Session) -> Result<()> {
    let spinner = create_spinner("Loading jobs...");
    let listing = session.jobs().await?;
    spinner.finish_and_clear();

    if !listing.remote_reachable {
        let reason = listing
            .remote_error
            .unwrap_or_else(|| "backend unavailable".to_string());
        println!(
            "{} {}",
            style("Showing local jobs only:").yellow(),
            style(reason).dim()
        );
    }

    if listing.jobs.is_empty() {
        println!("{}", style("No jobs yet").dim());
        return Ok(());
    }
    for job in &listing.jobs {
        println!("{}", format_job_row(&job.view()));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(owner) = cli.owner {
        config.owner = OwnerId::new(owner);
    }
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }
    tracing::debug!(?config, "Loaded configuration");

    match cli.command {
        Command::Summarize {
            input,
            style: summary_style,
            format,
            frames,
            words,
            api_key,
            profile,
            json,
        } => {
            if profile.is_some() {
                config.profile_path = profile;
            }
            let options = ProcessingOptions {
                frame_count: frames,
                style: summary_style.into(),
                format: format.into(),
                target_words: words,
            };
            options.validate()?;

            let session = Session::from_config(&config, api_key).await?;
            summarize(&session, &input, options, json).await
        }
        Command::Jobs => {
            let session = Session::from_config(&config, None).await?;
            list_jobs(&session).await
        }
        Command::Show { id, json } => {
            let session = Session::from_config(&config, None).await?;
            let job = session.job(&id).await?;
            print_job(&job, json)
        }
        Command::ForgetKey => {
            let session = Session::from_config(&config, None).await?;
            session.forget_credentials().await?;
            println!("{} Cached provider key removed", style("✓").green().bold());
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_roll_seconds_into_minutes() {
        assert_eq!(format_duration(Duration::from_millis(4_300)), "4.3s");
        assert_eq!(format_duration(Duration::from_millis(119_700)), "2m 0s");
        assert_eq!(format_duration(Duration::from_millis(125_400)), "2m 5s");
    }

    #[test]
    fn word_target_flag_accepts_auto_or_number() {
        let cli = Cli::try_parse_from(["videowise", "summarize", "clip.mp4", "--words", "300"]).unwrap();
        let Command::Summarize { words, .. } = cli.command else {
            panic!("expected summarize");
        };
        assert_eq!(words, WordTarget::Words(300));
    }
}
