use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use dialoguer::Select;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use kibitzer_rs::capture::capture_frame;
use kibitzer_rs::config::{Config, DEFAULT_CONFIG_PATH};
use kibitzer_rs::detect;
use kibitzer_rs::engine::{Engine, EngineCandidate, UciEngine};
use kibitzer_rs::overlay::{ConsoleOverlay, OverlaySink, Severity};
use kibitzer_rs::session::{ScanSession, TickAction};
use kibitzer_rs::template::{TemplateStore, auto_calibrate};
use kibitzer_rs::turn::Color;

enum QueryOutcome {
    Candidates(Vec<EngineCandidate>),
    /// Zero candidates came back; this is the plain best-move fallback.
    Fallback(Option<String>),
    Failed(String),
}

struct PendingQuery {
    position: String,
    handle: JoinHandle<QueryOutcome>,
}

struct App {
    session: ScanSession,
    overlay: ConsoleOverlay,
    engine: Arc<Mutex<UciEngine>>,
    pending: Option<PendingQuery>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("kibitzer")
        .version("0.1.0")
        .about("Screen-reading chess assistant with human-like move suggestions")
        .arg(
            Arg::new("site")
                .long("site")
                .value_name("SITE")
                .help("Chess site whose piece templates to use")
                .default_value("chesscom")
                .value_parser(["chesscom", "lichess"]),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("PATH")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .arg(
            Arg::new("engine")
                .long("engine")
                .value_name("PATH")
                .help("Engine binary (default: discover stockfish on PATH)"),
        )
        .arg(
            Arg::new("depth")
                .long("depth")
                .value_name("PLIES")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("interval-ms")
                .long("interval-ms")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("color")
                .long("color")
                .value_name("COLOR")
                .help("Skip the startup menu")
                .value_parser(["white", "black"]),
        )
        .arg(
            Arg::new("calibrate")
                .long("calibrate")
                .action(ArgAction::SetTrue)
                .help("Capture piece templates from a starting position, then exit"),
        )
        .get_matches();

    let site = matches.get_one::<String>("site").unwrap();
    let config_path = PathBuf::from(matches.get_one::<String>("config").unwrap());
    let mut config = Config::load(&config_path).context("Failed to load config")?;
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("could not write default config: {}", e);
        }
    }
    if let Some(depth) = matches.get_one::<u32>("depth") {
        config.engine_depth = *depth;
    }
    if let Some(interval) = matches.get_one::<u64>("interval-ms") {
        config.scan_interval_ms = *interval;
    }
    if let Some(engine) = matches.get_one::<String>("engine") {
        config.engine_path = Some(PathBuf::from(engine));
    }

    if matches.get_flag("calibrate") {
        return run_calibration(&config, site);
    }

    let color = match matches.get_one::<String>("color").map(String::as_str) {
        Some("white") => Color::White,
        Some("black") => Color::Black,
        _ => prompt_color()?,
    };

    let store = TemplateStore::load(config.template_dir(site))
        .context("Failed to load piece templates")?;

    let engine_binary = UciEngine::find_binary(config.engine_path.as_deref())
        .context("Failed to locate an engine")?;
    let engine = UciEngine::spawn(
        &engine_binary,
        config.engine_depth,
        Duration::from_millis(config.engine_timeout_ms),
    )
    .await
    .context("Failed to start the engine")?;

    let mut app = App {
        session: ScanSession::new(
            color,
            store,
            config.min_board_area,
            config.candidate_count,
        ),
        overlay: ConsoleOverlay::new(),
        engine: Arc::new(Mutex::new(engine)),
        pending: None,
    };

    if app.session.template_count() > 0 {
        app.overlay.set_status(
            &format!("Ready ({} templates loaded)", app.session.template_count()),
            Severity::Success,
            Some(Duration::from_secs(3)),
        );
    } else {
        app.overlay.set_status(
            "No templates; looking for a starting position to auto-calibrate...",
            Severity::Warning,
            None,
        );
    }
    info!(
        "Playing as {:?}, scanning every {}ms. Press Ctrl+C to stop.",
        app.session.player_color(),
        config.scan_interval_ms
    );

    let mut interval =
        tokio::time::interval(Duration::from_millis(config.scan_interval_ms.max(50)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => app.tick().await,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    if let Some(pending) = app.pending.take() {
        pending.handle.abort();
    }
    // A still-running query task keeps its Arc clone; the engine process
    // is reaped by kill_on_drop in that case.
    if let Ok(mutex) = Arc::try_unwrap(app.engine) {
        let _ = mutex.into_inner().quit().await;
    }
    Ok(())
}

impl App {
    /// One scan cycle: harvest finished engine work, capture, process.
    async fn tick(&mut self) {
        self.harvest_pending().await;

        let frame = match capture_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.overlay
                    .set_status(&format!("No frame: {}", e), Severity::Warning, None);
                return;
            }
        };

        match self.session.process_frame(&frame.image) {
            TickAction::BoardNotFound => {
                self.overlay.clear_highlights();
                self.overlay
                    .set_status("Scanning... no board found", Severity::Info, None);
            }
            TickAction::Calibrated(saved) => {
                self.overlay.set_status(
                    &format!("Auto-calibrated {} piece templates", saved),
                    Severity::Success,
                    Some(Duration::from_secs(3)),
                );
            }
            TickAction::CalibrationFailed => {
                self.overlay.set_status(
                    "Board found but calibration failed; check the starting position",
                    Severity::Error,
                    None,
                );
            }
            TickAction::TooFewPieces(count) => {
                self.overlay.clear_highlights();
                self.overlay.set_status(
                    &format!("Board found, but only {} pieces detected", count),
                    Severity::Warning,
                    None,
                );
            }
            TickAction::NoStableChange => {}
            TickAction::OpponentTurn => {
                // Any in-flight query is now for a bygone position.
                self.supersede();
                self.overlay.clear_highlights();
                self.overlay.set_status(
                    &format!("Opponent's turn (you are {:?})", self.session.player_color()),
                    Severity::Info,
                    None,
                );
            }
            TickAction::QueryEngine { position, fen } => {
                self.supersede();
                self.spawn_query(position, fen);
            }
        }
    }

    fn supersede(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("superseding engine query for {}", pending.position);
            // Detach rather than abort: the task finishes its UCI
            // exchange cleanly (the engine mutex serializes the next
            // query behind it) and its result is never harvested.
            // Aborting mid-protocol would leave the engine searching
            // with nobody draining its output.
            drop(pending.handle);
        }
    }

    fn spawn_query(&mut self, position: String, fen: String) {
        let engine = Arc::clone(&self.engine);
        let count = self.session.candidate_count();
        let handle = tokio::spawn(async move {
            let mut engine = engine.lock().await;
            match engine.top_moves(&fen, count).await {
                Ok(candidates) if candidates.is_empty() => match engine.best_move(&fen).await {
                    Ok(best) => QueryOutcome::Fallback(best),
                    Err(e) => QueryOutcome::Failed(e.to_string()),
                },
                Ok(candidates) => QueryOutcome::Candidates(candidates),
                Err(e) => QueryOutcome::Failed(e.to_string()),
            }
        });
        self.pending = Some(PendingQuery { position, handle });
    }

    async fn harvest_pending(&mut self) {
        let Some(pending) = self.pending.take_if(|p| p.handle.is_finished()) else {
            return;
        };
        let outcome = match pending.handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("engine query task ended abnormally: {}", e);
                return;
            }
        };

        let suggestion = match outcome {
            QueryOutcome::Candidates(candidates) => {
                self.session.apply_candidates(&pending.position, &candidates)
            }
            QueryOutcome::Fallback(best) => self.session.apply_fallback(&pending.position, best),
            QueryOutcome::Failed(reason) => {
                warn!("engine query failed: {}", reason);
                self.overlay.set_status(
                    &format!("Engine error: {}", reason),
                    Severity::Error,
                    Some(Duration::from_secs(5)),
                );
                return;
            }
        };

        match suggestion {
            Some(suggestion) => {
                if let Some((from, to)) = suggestion.rects {
                    self.overlay.set_highlights(&[from, to]);
                }
                self.overlay.set_status(
                    &format!("Best move: {}", suggestion.mv),
                    Severity::Success,
                    Some(Duration::from_secs(4)),
                );
                let stats = self.session.stats();
                debug!(
                    "moves {} best-rate {:.0}% total-loss {}cp opponent {:?}",
                    stats.total_moves,
                    100.0 * stats.best_move_rate(),
                    stats.total_centipawn_loss,
                    self.session.opponent_estimate(),
                );
            }
            None => {
                self.overlay.clear_highlights();
                self.overlay.set_status(
                    &format!(
                        "Opponent's turn (you are {:?})",
                        self.session.player_color()
                    ),
                    Severity::Info,
                    None,
                );
            }
        }
    }
}

fn prompt_color() -> Result<Color> {
    let index = Select::new()
        .with_prompt("Play as")
        .items(&["White", "Black"])
        .default(0)
        .interact()
        .context("Color selection aborted")?;
    Ok(if index == 0 { Color::White } else { Color::Black })
}

/// One-shot calibration mode: grab a frame showing the starting position
/// and write the piece templates for the chosen site.
fn run_calibration(config: &Config, site: &str) -> Result<()> {
    println!("Make sure the {} board is visible at the starting position.", site);

    let frame = capture_frame().context("Failed to capture screenshot")?;
    let geometry = detect::locate(&frame.image, config.min_board_area)
        .context("Could not detect a chess board on screen")?;
    println!(
        "Board found at ({}, {}), size {}x{} (square {:.1}px)",
        geometry.x,
        geometry.y,
        geometry.side,
        geometry.side,
        geometry.cell_size()
    );

    let mut store =
        TemplateStore::load(config.template_dir(site)).context("Failed to open template store")?;
    let saved =
        auto_calibrate(&frame.image, &geometry, &mut store).context("Calibration failed")?;

    // 20 pairs exist in the starting position: pawns and the doubled
    // minor/rook pieces cover both square colors, king and queen one.
    if saved == 20 {
        println!("All {} templates saved to {:?}", saved, store.dir());
    } else {
        println!(
            "{} templates saved to {:?}; some piece/background pairs may be missing",
            saved,
            store.dir()
        );
    }
    Ok(())
}
