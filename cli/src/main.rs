use std::{
    fs::File,
    io::{BufReader, stdout},
    path::{Path, PathBuf},
    process::ExitCode,
    time::{Duration, Instant, SystemTime},
};

use anyhow::{Context, Result, bail};
use backend::{Analysis, Cancellation, Settings, TrajectoryFormat};
use clap::Parser;
use fern::Dispatch;
use log::{LevelFilter, error, info, warn};

const LOG_FILE_NAME: &str = "saptracker.log";

#[derive(Parser, Debug)]
#[command(name = "saptracker", version)]
#[command(about = "Track a single particle released in a recorded video")]
struct Cli {
    /// Video to analyze, overrides `video_path` of the settings file.
    video: Option<PathBuf>,
    /// JSON settings file.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Where to record the trajectory.
    #[arg(long, short, value_name = "PATH")]
    output: Option<PathBuf>,
    /// Trajectory format, `text` or `json`.
    #[arg(long, value_name = "FORMAT")]
    format: Option<TrajectoryFormat>,
    /// Minimum proportion of dark pixels for lighting to be stable.
    #[arg(long, value_name = "FRACTION")]
    darkness: Option<f64>,
    /// Localizes from this frame, skipping calibration and motion onset.
    #[arg(long, value_name = "FRAME")]
    start_frame: Option<u32>,
    /// Stops tracking upon reading this frame.
    #[arg(long, value_name = "FRAME")]
    frame_limit: Option<u32>,
    /// Shows tracking in real-time.
    #[arg(long)]
    live: bool,
    /// Asks for a manual selection when the particle can't be found.
    #[arg(long)]
    manual_fallback: bool,
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// Logs per-frame details.
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match self.config.as_ref() {
            Some(path) => {
                let file = File::open(path)
                    .with_context(|| format!("cannot open settings {}", path.display()))?;
                serde_json::from_reader::<_, Settings>(BufReader::new(file))
                    .with_context(|| format!("cannot parse settings {}", path.display()))?
            }
            None => Settings::default(),
        };

        if let Some(video) = self.video.clone() {
            settings.video_path = video;
        }
        if settings.video_path.as_os_str().is_empty() {
            bail!("no video given, pass a path or set `video_path` in the settings file");
        }
        if let Some(output) = self.output.clone() {
            settings.output = Some(output);
        }
        if let Some(format) = self.format {
            settings.output_format = format;
        }
        if let Some(darkness) = self.darkness {
            settings.darkness_fraction = darkness;
        }
        if let Some(start_frame) = self.start_frame {
            settings.start_frame = Some(start_frame);
        }
        if let Some(frame_limit) = self.frame_limit {
            settings.frame_limit = frame_limit;
        }
        settings.live |= self.live;
        settings.manual_fallback |= self.manual_fallback;
        Ok(settings)
    }

    /// `--log-file`, or next to the trajectory output of `settings`.
    fn log_file(&self, settings: Option<&Settings>) -> PathBuf {
        if let Some(path) = self.log_file.clone() {
            return path;
        }
        settings
            .and_then(|settings| settings.output.as_deref())
            .or(self.output.as_deref())
            .and_then(Path::parent)
            .map(|dir| dir.join(LOG_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(LOG_FILE_NAME))
    }
}

fn init_logger(cli: &Cli, log_file: PathBuf) -> Result<()> {
    let level = if cli.verbose || cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .chain(stdout())
        .chain(fern::log_file(log_file)?)
        .apply()?;
    log_panics::init();
    Ok(())
}

async fn analyze(settings: Settings) -> Result<Analysis> {
    let cancellation = Cancellation::new();
    let token = cancellation.clone();
    let mut pipeline = tokio::task::spawn_blocking(move || backend::run(&settings, token));

    tokio::select! {
        result = &mut pipeline => Ok(result??),
        _ = tokio::signal::ctrl_c() => {
            warn!(target: "pipeline", "cancelling after the current frame");
            cancellation.cancel();
            Ok(pipeline.await??)
        }
    }
}

fn report(analysis: &Analysis, elapsed: Duration) {
    if let Some(calibration) = analysis.calibration {
        info!(
            target: "pipeline",
            "lighting stable at frame {} oriented {}",
            calibration.frame, calibration.orientation
        );
    }
    if let Some(onset) = analysis.onset {
        info!(target: "pipeline", "motion onset at frame {onset}");
    }
    let localization = &analysis.localization;
    info!(
        target: "pipeline",
        "{} particle at frame {} in {:?}",
        if analysis.manually_localized { "selected" } else { "localized" },
        localization.frame,
        localization.bbox
    );
    let outcome = &analysis.outcome;
    info!(
        target: "pipeline",
        "tracked {} frames, stopped with {}",
        outcome.trajectory.len(),
        outcome.stop_reason
    );
    let elapsed = Duration::from_millis(elapsed.as_millis() as u64);
    info!(target: "pipeline", "finished in {}", humantime::format_duration(elapsed));
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = cli.settings();
    if let Err(err) = init_logger(&cli, cli.log_file(settings.as_ref().ok())) {
        eprintln!("cannot initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    let settings = match settings {
        Ok(settings) => settings,
        Err(err) => {
            error!(target: "pipeline", "{err:#}");
            return ExitCode::FAILURE;
        }
    };
    info!(target: "pipeline", "analyzing {}", settings.video_path.display());

    let started = Instant::now();
    match analyze(settings).await {
        Ok(analysis) => {
            report(&analysis, started.elapsed());
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(target: "pipeline", "{err:#}");
            ExitCode::FAILURE
        }
    }
}
