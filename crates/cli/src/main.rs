mod daemon;
mod hooks;
mod optimiser;
mod reload;

use clap::{Parser, Subcommand};
use optiwatch_control::{ControlClient, PauseScope, ResponseStatus, SubmitOptions, SubmitRequest};
use optiwatch_core::FileType;
use optiwatch_core::config::AppConfig;
use optiwatch_core::settings::{OverridesFile, SettingsStore};
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Optiwatch - optimises images, videos and PDFs as they appear", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the watcher daemon (default)
    Daemon,
    /// Optimise files through the running daemon
    Optimise {
        /// Paths, URLs or inline data
        #[arg(required = true)]
        items: Vec<String>,
        /// Ids for the items, in order. Unnamed items use their own text
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Only report failures
        #[arg(long)]
        hide_result: bool,
        /// Downscale factor in (0, 1]
        #[arg(long)]
        downscale: Option<f64>,
        /// Speed-up factor for videos in (0, 1]
        #[arg(long)]
        speed: Option<f64>,
        #[arg(long)]
        aggressive: bool,
        /// Ask the daemon to copy the result to the clipboard
        #[arg(long)]
        copy: bool,
    },
    /// Stop running optimisations by id (a watched file's id is its path)
    Stop {
        #[arg(required = true)]
        ids: Vec<String>,
        /// Forget the optimisations instead of marking them stopped
        #[arg(long)]
        remove: bool,
    },
    /// Skip the next watched file, or pause watching entirely with --all
    Pause {
        #[arg(long)]
        all: bool,
    },
    /// Resume watching
    Resume,
    /// Turn a watcher back on after burst protection disabled it
    Enable {
        /// image, video or document
        file_type: FileType,
    },
    /// Print the effective watcher configuration
    Config,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let app_dir = optiwatch_core::path_utils::get_app_root();
    let _ = std::fs::create_dir_all(&app_dir);

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(app_dir.join("optiwatch.log"));

    // The guard must outlive the daemon so buffered lines get flushed
    let _guard = match (&args.command, log_file) {
        (Some(Commands::Daemon) | None, Ok(file)) => {
            // Daemon mode: log to file
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        _ => {
            // CLI mode: log to stderr for feedback
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_ansi(true)
                .init();
            None
        }
    };

    let config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Error: Configuration invalid: {}", e);
            eprintln!("   Check {}", app_dir.join(optiwatch_core::config::CONFIG_FILE).display());
            std::process::exit(1);
        }
    };
    let client = ControlClient::new(&config.socket_dir());

    let result = match args.command {
        Some(Commands::Daemon) | None => daemon::run().await,
        Some(Commands::Optimise {
            items,
            ids,
            hide_result,
            downscale,
            speed,
            aggressive,
            copy,
        }) => optimise(&client, items, ids, hide_result, downscale, speed, aggressive, copy).await,
        Some(Commands::Stop { ids, remove }) => client.stop(ids, remove).await.map(|_| {
            println!("🛑 Stop requested.");
        }),
        Some(Commands::Pause { all }) => {
            let scope = if all { PauseScope::All } else { PauseScope::NextEvent };
            client.pause(scope).await.map(|_| {
                if all {
                    println!("⏸️ Watching paused. Run `optiwatch resume` to continue.");
                } else {
                    println!("⏸️ The next watched file will be left alone.");
                }
            })
        }
        Some(Commands::Resume) => client.pause(PauseScope::Resume).await.map(|_| {
            println!("▶️ Watching resumed.");
        }),
        Some(Commands::Enable { file_type }) => enable(&app_dir, file_type),
        Some(Commands::Config) => {
            print_config(&config);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_arguments)]
async fn optimise(
    client: &ControlClient,
    items: Vec<String>,
    ids: Vec<String>,
    hide_result: bool,
    downscale: Option<f64>,
    speed: Option<f64>,
    aggressive: bool,
    copy: bool,
) -> anyhow::Result<()> {
    // The daemon runs elsewhere, so local paths are sent absolute
    let items = items
        .into_iter()
        .map(|raw| match std::fs::canonicalize(&raw) {
            Ok(path) => serde_json::Value::String(path.display().to_string()),
            Err(_) => serde_json::Value::String(raw),
        })
        .collect();

    let options = SubmitOptions {
        hide_result,
        downscale_to: downscale,
        speed_factor: speed,
        aggressive: Some(aggressive),
        copy_to_clipboard: copy,
        ..SubmitOptions::default()
    };

    let responses = client.submit(SubmitRequest { ids, items, options }).await?;
    let mut failed = 0;
    for response in &responses {
        match response.status {
            ResponseStatus::Success if !hide_result => {
                println!("✅ {} -> {}", response.id, response.result.as_deref().unwrap_or("done"));
            }
            ResponseStatus::Success => {}
            ResponseStatus::Failure => {
                failed += 1;
                println!("❌ {}: {}", response.id, response.error.as_deref().unwrap_or("failed"));
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} item(s) failed", failed, responses.len());
    }
    Ok(())
}

/// Burst protection writes its disabled flag to the overrides file, which
/// wins over `optiwatch.toml`, so re-enabling has to go through it too. A
/// running daemon picks the change up on its own.
fn enable(root: &Path, file_type: FileType) -> anyhow::Result<()> {
    OverridesFile::new(root).set_watcher_enabled(file_type, true)?;
    println!("✅ {} watcher enabled.", file_type);
    Ok(())
}

fn print_config(config: &AppConfig) {
    println!("⚙️ Optiwatch configuration\n");
    println!("  sockets: {}", config.socket_dir().display());
    println!("  paused:  {}", config.pause_automatic_optimisations);
    if let Some(limit) = config.session_limit {
        println!("  limit:   {} file(s) per session", limit);
    }
    for file_type in FileType::ALL {
        let request = config.watch_request(file_type);
        let roots: Vec<String> = request.roots.iter().map(|r| r.display().to_string()).collect();
        println!(
            "\n  {:9} enabled={} max={} template={}",
            file_type.as_str(),
            request.enabled,
            request.max_batch_size,
            request.name_template.as_deref().unwrap_or("-"),
        );
        for root in roots {
            println!("    👀 {}", root);
        }
    }
}
