use std::error::Error;
use std::fs::File;
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tracing_subscriber::EnvFilter;

use aineb::core::config::{ReferenceConfig, RunConfig};
use aineb::interface::state::AppState;
use aineb::interface::ui;
use aineb::solvers::coordinator;
use aineb::solvers::RunOutcome;

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "AI-NEB: active-learning nudged elastic band", long_about = None)]
struct Args {
    /// Run configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Number of ranks; must equal the number of interior images
    #[arg(short, long)]
    workers: Option<usize>,

    /// Plain log output instead of the dashboard
    #[arg(long)]
    headless: bool,

    /// Write log records here (dashboard mode)
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long)]
    max_iteration: Option<usize>,

    /// NEB force threshold (eV/Å)
    #[arg(long)]
    fmax: Option<f64>,

    /// NEB step budget per iteration
    #[arg(long)]
    steps: Option<usize>,

    /// Enable the climbing image
    #[arg(long)]
    climb: bool,
}

// --- Terminal Guard (RAII) ---

struct TuiContext {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
}

impl TuiContext {
    fn new() -> Result<Self> {
        enable_raw_mode().context("Failed to enable raw mode")?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("Failed to setup terminal alternate screen")?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend).context("Failed to create terminal backend")?;
        Ok(Self { terminal })
    }
}

impl Drop for TuiContext {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture);
        let _ = self.terminal.show_cursor();
    }
}

// --- Initialization Helpers ---

fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        // Restore the terminal before printing the panic
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
        original_hook(panic_info);
    }));
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Headless: log records go to stderr. Dashboard: to `log_file`, if any.
fn init_logging(headless: bool, log_file: Option<&Path>) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter()).with_target(false);
    match (headless, log_file) {
        (_, Some(path)) => {
            let file = File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow!("{}", e))?;
        }
        (true, None) => {
            builder.with_writer(io::stderr).try_init().map_err(|e| anyhow!("{}", e))?;
        }
        (false, None) => {}
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = RunConfig::load(&args.config)?;
    if let Some(n) = args.max_iteration {
        config.convergence.max_iteration = n;
    }
    if let Some(fmax) = args.fmax {
        config.neb.fmax = fmax;
    }
    if let Some(steps) = args.steps {
        config.neb.steps = steps;
    }
    if args.climb {
        config.neb.climb = true;
    }
    config.validate()?;
    Ok(config)
}

fn check_dependencies(config: &RunConfig) -> Result<()> {
    if let ReferenceConfig::Gulp { executable, .. } = &config.reference {
        if Command::new(executable).arg("help").output().is_err() {
            return Err(anyhow!(
                "Dependency Check Failed: '{}' executable not found.\n\
                 The GULP reference evaluator needs it for every validation.\n\
                 Install GULP or point reference.executable at it.",
                executable
            ));
        }
    }
    Ok(())
}

fn describe(outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::Converged { iteration } => format!("Converged at iteration {}", iteration),
        RunOutcome::Exhausted { iterations } => format!("Not converged after {} iterations", iterations),
    }
}

fn run_headless(config: &RunConfig, workers: usize) -> Result<()> {
    let outcome = coordinator::launch_configured(config, workers, None)?;
    log::info!("{}", describe(&outcome));
    Ok(())
}

fn run_dashboard(config: RunConfig, workers: usize) -> Result<()> {
    let mut tui = TuiContext::new().context("Failed to initialize TUI")?;
    let mut app = AppState::new(config.clone(), workers);

    let (tx, rx) = unbounded();
    app.set_channel(rx);

    thread::Builder::new()
        .name("aineb-run".to_string())
        .spawn(move || {
            if let Err(e) = coordinator::launch_configured(&config, workers, Some(tx)) {
                log::error!("{}", e);
            }
        })?;

    let tick_rate = Duration::from_millis(50);
    let mut last_tick = Instant::now();

    while !app.should_quit {
        tui.terminal.draw(|f| ui::draw(f, &app))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == event::KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char(c) => app.on_key(c),
                        KeyCode::Esc => app.should_quit = true,
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.tick();
            last_tick = Instant::now();
        }
    }

    drop(tui);
    if let Some(outcome) = &app.outcome {
        println!("{}", describe(outcome));
    }
    Ok(())
}

// --- Main ---

fn main() -> Result<(), Box<dyn Error>> {
    setup_panic_hook();
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    };
    let workers = args.workers.unwrap_or(config.num_inter_images);

    if let Err(e) = check_dependencies(&config) {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    init_logging(args.headless, args.log_file.as_deref())?;

    let result = if args.headless {
        run_headless(&config, workers)
    } else {
        run_dashboard(config, workers)
    };

    if let Err(e) = result {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
