use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use tether_core::port::PrefixFilter;
use tether_core::smart_step::{self, CodeObject};
use tether_core::EngineBuilder;
use tether_protocol::{Session, SessionConfig};
use tether_utils::{info, init_logging_with, warn, LogFormat, LogLevel, TetherConfig};

mod replay;

use replay::{Script, ThreadPlayer};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// An attachable source-level debugger core with a remote command protocol.
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "An attachable source-level debugger core with a remote command protocol", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Serve a debug session over a recorded execution trace
    Replay
    {
        /// Trace script (JSON) to replay
        script: PathBuf,
        /// Address to listen on (overrides config and TETHER_LISTEN)
        #[arg(long)]
        listen: Option<String>,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Log level (error, warn, info, debug, trace)
        #[arg(long)]
        log_level: Option<LogLevel>,
        /// Log format (pretty or json)
        #[arg(long)]
        log_format: Option<LogFormat>,
        /// Pause every thread at its first traced event so the client can set breakpoints
        #[arg(long, default_value_t = false)]
        suspend_on_start: bool,
    },
    /// Print the smart-step-into targets of a code object
    Targets
    {
        /// Code object (JSON) to analyse
        code: PathBuf,
        /// First line of the range
        #[arg(long)]
        start: u32,
        /// Last line of the range (defaults to --start)
        #[arg(long)]
        end: Option<u32>,
        /// Offset the frame is executing; earlier targets are marked visited
        #[arg(long)]
        offset: Option<u32>,
    },
}

fn main()
{
    let cli = Cli::parse();

    if let Err(e) = run_command(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(cli: Cli) -> CliResult<()>
{
    match cli.command {
        Commands::Replay {
            script,
            listen,
            config,
            log_level,
            log_format,
            suspend_on_start,
        } => {
            let mut settings = TetherConfig::load(config.as_deref())?;
            if let Some(listen) = listen {
                settings.listen = listen;
            }
            if log_level.is_some() {
                settings.log_level = log_level;
            }
            if let Some(format) = log_format {
                settings.log_format = format;
            }
            settings.validate()?;
            init_logging_with(&settings.logging())?;
            replay(&settings, &script, suspend_on_start)
        }
        Commands::Targets { code, start, end, offset } => print_targets(&code, start, end.unwrap_or(start), offset),
    }
}

fn replay(settings: &TetherConfig, script_path: &Path, suspend_on_start: bool) -> CliResult<()>
{
    let script = Script::load(script_path)?;
    info!(
        script = %script_path.display(),
        threads = script.threads.len(),
        codes = script.codes.len(),
        "trace loaded"
    );

    let filter = PrefixFilter::new(&settings.library_roots, &settings.untraced_roots);
    let (engine, events) = EngineBuilder::new()
        .with_source_filter(Arc::new(filter))
        .with_condition_budget(settings.condition_budget())
        .build();

    let listener = TcpListener::bind(settings.listen_addr()?)?;
    info!(addr = %listener.local_addr()?, "waiting for a debugger client");
    let (stream, peer) = listener.accept()?;
    info!(%peer, "client connected");

    let session = Session::new(
        engine.clone(),
        SessionConfig {
            max_frame_len: settings.max_frame_len,
        },
    )
    .serve(stream, events)?;

    let codes = script.shared_codes();
    let players: Vec<ThreadPlayer> = script
        .threads
        .into_iter()
        .map(|thread| ThreadPlayer::attach(Arc::clone(engine.dispatcher()), thread, Arc::clone(&codes)))
        .collect();

    if suspend_on_start {
        for player in &players {
            engine.controller().request_pause(player.id())?;
        }
    }

    let workers: Vec<_> = players
        .into_iter()
        .map(|player| {
            let name = format!("replay-{}", player.id());
            thread::Builder::new().name(name).spawn(move || player.run())
        })
        .collect::<Result<_, _>>()?;

    for worker in workers {
        if worker.join().is_err() {
            warn!("a replay thread panicked");
        }
    }

    info!("trace finished; waiting for the client to disconnect");
    session.join();
    Ok(())
}

fn print_targets(path: &Path, start: u32, end: u32, offset: Option<u32>) -> CliResult<()>
{
    let code: CodeObject = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let targets = smart_step::resolve(&code, start, end, offset);
    println!("{}", serde_json::to_string_pretty(&targets)?);
    Ok(())
}
