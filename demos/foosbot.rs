use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use foosbot::{
    controller::RowCommander,
    display::{HighguiRenderer, Renderer},
    frame::{CameraSource, FrameSource, VideoFileSource},
    motor::{DryRunDriver, MotorDriver},
    Config, GameController, InlineRows, RowPool, Score, StopHandle,
};

#[derive(Parser, Debug)]
#[command(about = "Plays one game of table football against whoever is on the other side")]
struct Args {
    /// TOML config; built-in table defaults when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Recorded footage instead of a live camera
    #[arg(long, conflicts_with = "camera")]
    video: Option<PathBuf>,

    /// Live camera, by index; size and timing come from the config
    #[arg(long)]
    camera: Option<i32>,

    /// No windows
    #[arg(long)]
    headless: bool,

    /// Also show the ball mask
    #[arg(long)]
    show_mask: bool,

    /// Count step pulses instead of driving motors
    #[arg(long)]
    dry_run: bool,

    /// Run maneuvers on the control thread instead of per-row workers
    #[arg(long)]
    inline: bool,
}

/// Stops the game on Ctrl-C.
fn stop_on_ctrl_c(stop: StopHandle) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()?;

    std::thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        log::info!("interrupted, stopping");
                        stop.stop();
                    }
                    Err(err) => log::warn!("cannot listen for ctrl-c: {}", err),
                }
            })
        })?;

    Ok(())
}

fn play<C: RowCommander>(
    config: &Config,
    commander: C,
    source: &mut dyn FrameSource,
    headless: bool,
    show_mask: bool,
) -> anyhow::Result<Score> {
    let mut game = GameController::new(config, commander)?;
    stop_on_ctrl_c(game.stop_handle())?;

    let mut window = if headless {
        None
    } else {
        Some(HighguiRenderer::new("foosbot", show_mask)?)
    };

    let score = game.run(source, window.as_mut().map(|w| w as &mut dyn Renderer))?;

    Ok(score)
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if !args.dry_run {
        bail!("no motor hardware driver is built in, rerun with --dry-run");
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.validate()?;

    let mut source: Box<dyn FrameSource> = match (&args.video, args.camera) {
        (Some(path), _) => Box::new(VideoFileSource::open(path)?),
        (None, Some(index)) => {
            config.camera.index = index;
            Box::new(CameraSource::start(&config.camera)?)
        }
        (None, None) => bail!("either --video or --camera is required"),
    };

    let score = if args.inline {
        let mut rows = InlineRows::new(&config, |r| DryRunDriver::new(r.index));
        rows.start()?;

        play(&config, rows, source.as_mut(), args.headless, args.show_mask)?
    } else {
        let rows = RowPool::spawn(&config, |r| {
            Box::new(DryRunDriver::new(r.index)) as Box<dyn MotorDriver>
        })?;

        play(&config, rows, source.as_mut(), args.headless, args.show_mask)?
    };

    println!("final score {} : {}", score.a, score.b);

    Ok(())
}
