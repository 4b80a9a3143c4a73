//! NIV Lab CLI
//!
//! Terminal front end for the ventilation sandbox: curves, live lab with
//! debounced expert advice, clinical case quiz, chat, and the HTTP server.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use niv_tutor::advice::{AdvicePanel, AdviceService};
use niv_tutor::case::{pick_theme, CaseQuiz, CASE_ERROR_MESSAGE, THEMES};
use niv_tutor::chat::{ChatSession, CHAT_ERROR_MESSAGE};
use niv_tutor::{create_router, AppState, Config, OptionVerdict, RequestState, TutorError};
use niv_waveform::{map_waveform, svg::SvgChart, Profile, Settings, Waveform};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// NIV Lab - Non-invasive ventilation learning sandbox
///
/// Explore how ventilator settings shape pressure and flow curves, get
/// expert feedback, and practise on generated clinical cases.
#[derive(Parser, Debug)]
#[command(name = "niv")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (default: niv.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the pressure and flow curves for a set of settings
    Curves {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = CurveFormat::Paths)]
        format: CurveFormat,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Interactive sandbox: edit settings as key=value lines
    Lab {
        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Generate a clinical case and answer it
    Case {
        /// Theme number (1-9); random when omitted
        #[arg(short, long, value_name = "N")]
        theme: Option<usize>,
    },

    /// One-shot expert advice on a set of settings
    Advise {
        #[command(flatten)]
        settings: SettingsArgs,
    },

    /// Chat with the NIV expert assistant
    Chat,

    /// Run the HTTP and WebSocket server
    Serve {
        /// Port to listen on (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Args, Debug, Clone)]
struct SettingsArgs {
    /// Patient profile: normal, obstructive or restrictive
    #[arg(long, default_value = "normal")]
    profile: Profile,

    /// PEEP in cmH2O (0-20)
    #[arg(long, default_value_t = 5)]
    peep: u32,

    /// Pressure support in cmH2O (0-25)
    #[arg(long, default_value_t = 10)]
    ps: u32,

    /// Respiratory rate in breaths/min (8-30)
    #[arg(long, default_value_t = 12)]
    rate: u32,

    /// Rise time in ms (100-600, step 50)
    #[arg(long, default_value_t = 200)]
    rise: u32,
}

impl SettingsArgs {
    fn to_settings(&self) -> anyhow::Result<Settings> {
        let settings = Settings {
            profile: self.profile,
            peep: self.peep,
            pressure_support: self.ps,
            respiratory_rate: self.rate,
            rise_time_ms: self.rise,
        };
        settings.validate().map_err(TutorError::from)?;
        Ok(settings)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum CurveFormat {
    /// SVG path strings and metrics
    Paths,
    /// Waveform as JSON
    Json,
    /// Standalone SVG document
    Svg,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?cli.config, command = ?cli.command, "Starting NIV Lab");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Curves {
            settings,
            format,
            output,
        } => run_curves(&settings.to_settings()?, format, output.as_deref()),
        Command::Lab { settings } => run_lab(config, settings.to_settings()?).await,
        Command::Case { theme } => run_case(config, theme).await,
        Command::Advise { settings } => run_advise(config, &settings.to_settings()?).await,
        Command::Chat => run_chat(config).await,
        Command::Serve { port } => run_serve(config, port).await,
    }
}

/// Loads configuration from the explicit path or the current directory.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Ok(Config::load_from_file(path)?)
        }
        None => Ok(Config::load()?),
    }
}

// ============================================================================
// curves
// ============================================================================

fn run_curves(settings: &Settings, format: CurveFormat, output: Option<&Path>) -> anyhow::Result<()> {
    let waveform = map_waveform(settings);
    let rendered = match format {
        CurveFormat::Paths => describe_waveform(settings, &waveform),
        CurveFormat::Json => serde_json::to_string_pretty(&waveform)? + "\n",
        CurveFormat::Svg => SvgChart::new(&waveform)
            .with_title(format!("Profil {}", settings.profile))
            .render(),
    };

    match output {
        Some(path) => {
            std::fs::write(path, rendered).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to write '{}': {e}\n\nSuggestion: Check write permissions",
                    path.display()
                )
            })?;
            println!("Written to {}", path.display());
        }
        None => print!("{rendered}"),
    }
    Ok(())
}

fn describe_waveform(settings: &Settings, waveform: &Waveform) -> String {
    let metrics = &waveform.metrics;
    let mut out = String::new();
    out.push_str(&format!(
        "Profile: {} (R={}, C={}, tau={:.2} s)\n",
        settings.profile,
        settings.profile.resistance(),
        settings.profile.compliance(),
        metrics.time_constant_s
    ));
    out.push_str(&format!(
        "Settings: PEEP {} cmH2O, PS {} cmH2O, rate {}/min, rise {} ms\n",
        settings.peep, settings.pressure_support, settings.respiratory_rate, settings.rise_time_ms
    ));
    out.push_str(&format!("Pressure: {}\n", waveform.pressure));
    out.push_str(&format!("Flow:     {}\n", waveform.flow));
    out.push_str(&format!(
        "Cycle: {:.0} ms (insp {:.0} ms, exp {:.0} ms)\n",
        metrics.cycle_ms, metrics.inspiratory_ms, metrics.expiratory_ms
    ));
    out.push_str(&format!(
        "End-expiratory flow: {:.2}\n",
        metrics.end_expiratory_flow
    ));
    out.push_str(if waveform.air_trapping {
        "Air trapping: YES - expiration is incomplete (risk of auto-PEEP)\n"
    } else {
        "Air trapping: no\n"
    });
    out
}

// ============================================================================
// lab
// ============================================================================

const LAB_HELP: &str = "Edit settings with key=value (profile, peep, ps, rate, rise), \
several per line allowed. Commands: show, help, quit.";

async fn run_lab(config: Config, mut settings: Settings) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let panel = AdvicePanel::new(state.advice(), state.config.advice_debounce());

    let mut updates = panel.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let current = updates.borrow_and_update().clone();
            match current {
                RequestState::Loading => println!("[expert] analyse en cours..."),
                RequestState::Success(advice) => println!("\n[expert]\n{advice}\n"),
                RequestState::Error(message) => println!("\n[expert] {message}\n"),
                RequestState::Idle => {}
            }
        }
    });

    println!("{LAB_HELP}");
    print!("{}", describe_waveform(&settings, &map_waveform(&settings)));
    panel.settings_changed(settings);

    let mut lines = stdin_lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => continue,
            "quit" | "exit" => break,
            "help" => println!("{LAB_HELP}"),
            "show" => print!("{}", describe_waveform(&settings, &map_waveform(&settings))),
            edits => match apply_edits(settings, edits) {
                Ok(updated) => {
                    settings = updated;
                    print!("{}", describe_waveform(&settings, &map_waveform(&settings)));
                    panel.settings_changed(settings);
                }
                Err(e) => println!("{e}"),
            },
        }
    }

    panel.reset();
    printer.abort();
    Ok(())
}

/// Applies whitespace-separated `key=value` edits, validating the result.
fn apply_edits(settings: Settings, line: &str) -> anyhow::Result<Settings> {
    let mut updated = settings;
    for edit in line.split_whitespace() {
        let (key, value) = edit
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("Expected key=value, got '{edit}'"))?;
        let number = || {
            value
                .parse::<u32>()
                .map_err(|_| anyhow::anyhow!("'{value}' is not a whole number"))
        };
        match key.to_lowercase().as_str() {
            "profile" => updated.profile = value.parse()?,
            "peep" | "pep" => updated.peep = number()?,
            "ps" | "ai" | "pressuresupport" => updated.pressure_support = number()?,
            "rate" | "fr" | "respiratoryrate" => updated.respiratory_rate = number()?,
            "rise" | "pente" | "risetimems" => updated.rise_time_ms = number()?,
            other => anyhow::bail!("Unknown setting '{other}'. {LAB_HELP}"),
        }
    }
    updated.validate()?;
    Ok(updated)
}

// ============================================================================
// case
// ============================================================================

async fn run_case(config: Config, theme: Option<usize>) -> anyhow::Result<()> {
    let theme = match theme {
        Some(n) => n
            .checked_sub(1)
            .and_then(|i| pick_theme(Some(i)))
            .ok_or_else(|| anyhow::anyhow!("Theme must be between 1 and {}", THEMES.len()))?,
        None => pick_theme(None).unwrap_or(THEMES[0]),
    };

    let state = AppState::from_config(config)?;
    println!("Génération d'un cas clinique : {theme}...");
    let case = match state.cases().generate_for(theme).await {
        Ok(case) => case,
        Err(TutorError::ServiceUnavailable) => return Err(TutorError::ServiceUnavailable.into()),
        Err(e) => {
            tracing::debug!(error = %e, "Case generation failed");
            anyhow::bail!("{CASE_ERROR_MESSAGE}\n\n{e}");
        }
    };

    println!();
    println!("## {}", case.category);
    println!();
    println!("{}", case.case);
    println!();
    println!("**{}**", case.question);
    for option in &case.options {
        println!("  {}. {}", option.id, option.text);
    }

    let mut quiz = CaseQuiz::new(case);
    let mut lines = stdin_lines();
    loop {
        print!("Votre réponse : ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        match quiz.select(&line.trim().to_uppercase()) {
            Ok(_) => break,
            Err(e) => println!("{e}"),
        }
    }

    let feedback = quiz.submit()?.clone();
    println!();
    if feedback.correct {
        println!("Bonne réponse !");
    } else {
        println!("Réponse incorrecte. La bonne réponse était {}.", feedback.correct_answer_id);
    }
    for option in &quiz.case().options {
        let mark = match quiz.option_verdict(&option.id) {
            OptionVerdict::Correct => "[v]",
            OptionVerdict::WrongSelection => "[x]",
            OptionVerdict::Neutral | OptionVerdict::Pending => "[ ]",
        };
        println!("  {mark} {}. {}", option.id, option.text);
    }
    println!();
    println!("{}", feedback.explanation);
    Ok(())
}

// ============================================================================
// advise
// ============================================================================

async fn run_advise(config: Config, settings: &Settings) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let service: AdviceService = state.advice();
    let advice = service.advise(settings).await?;
    println!("{advice}");
    Ok(())
}

// ============================================================================
// chat
// ============================================================================

async fn run_chat(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let session = ChatSession::new(state.generator.clone());

    for message in session.messages() {
        println!("{}", message.content);
    }
    println!("(Ctrl+C interrompt une réponse, /quit pour sortir)");

    let mut lines = stdin_lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "/quit" {
            break;
        }

        let reply = session.send(question, |chunk| {
            print!("{chunk}");
            let _ = std::io::stdout().flush();
        });
        tokio::select! {
            outcome = reply => {
                if let Err(e) = outcome {
                    tracing::debug!(error = %e, "Chat reply failed");
                    println!("\n{CHAT_ERROR_MESSAGE}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n[réponse interrompue]");
            }
        }
        println!();
    }
    Ok(())
}

// ============================================================================
// serve
// ============================================================================

async fn run_serve(mut config: Config, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    let addr = config.server.bind_addr();
    let state = AppState::from_config(config)?;
    let llm_available = state.generator.is_some();
    let router = create_router(state);

    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port")
    })?;

    println!("NIV Lab server running on http://{addr}");
    println!("  Chat WebSocket: ws://{addr}/ws/chat");
    if !llm_available {
        println!("  Expert features in degraded mode (no API key)");
    }
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await?;
    Ok(())
}

fn stdin_lines() -> Lines<BufReader<Stdin>> {
    BufReader::new(tokio::io::stdin()).lines()
}
