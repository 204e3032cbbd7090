//! Soli Live CLI: mount a server-rendered page and follow its push stream.

use colored::Colorize;
use std::env;
use std::process;
use std::sync::Arc;

use soli_live::live::{FileStorage, LiveRuntime, NavigationSignals};
use soli_live::{logging, LiveConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION", "0.1.0");

/// CLI options parsed from arguments.
struct Options {
    path: String,
    endpoint: Option<String>,
    debug: bool,
    no_sse: bool,
    persist: bool,
    restore: bool,
}

fn print_usage() {
    eprintln!("Soli Live {}", VERSION);
    eprintln!();
    eprintln!("Usage: soli-live <path> [options]");
    eprintln!();
    eprintln!("Fetches <path> from the endpoint, mounts its live components and");
    eprintln!("logs push events until interrupted.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --endpoint URL  Server origin (default: $SOLI_LIVE_ENDPOINT or http://localhost:3000)");
    eprintln!("  --debug         Verbose logging");
    eprintln!("  --no-sse        Do not open the push channel");
    eprintln!("  --persist       Keep snapshots on disk instead of in memory");
    eprintln!("  --restore       Treat the load as a back/forward navigation");
}

fn parse_args() -> Options {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut options = Options {
        path: String::new(),
        endpoint: None,
        debug: false,
        no_sse: false,
        persist: false,
        restore: false,
    };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "--version" => {
                println!("soli-live {}", VERSION);
                process::exit(0);
            }
            "--endpoint" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("--endpoint requires a URL");
                    print_usage();
                    process::exit(64);
                }
                options.endpoint = Some(args[i].clone());
            }
            "--debug" => options.debug = true,
            "--no-sse" => options.no_sse = true,
            "--persist" => options.persist = true,
            "--restore" => options.restore = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                print_usage();
                process::exit(64);
            }
            arg => {
                if !options.path.is_empty() {
                    eprintln!("Unexpected argument: {}", arg);
                    print_usage();
                    process::exit(64);
                }
                options.path = arg.to_string();
            }
        }
        i += 1;
    }

    if options.path.is_empty() {
        print_usage();
        process::exit(64);
    }
    options
}

fn main() {
    let options = parse_args();

    let mut config = LiveConfig::from_env();
    if let Some(endpoint) = options.endpoint.clone() {
        config.endpoint = endpoint;
    }
    config.debug |= options.debug;
    config.disable_sse |= options.no_sse;
    logging::init(&config);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} failed to start async runtime: {}", "error:".red().bold(), e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config, options)) {
        eprintln!("{} {}", "error:".red().bold(), e);
        process::exit(1);
    }
}

async fn run(config: LiveConfig, options: Options) -> Result<(), soli_live::LiveError> {
    let page_url = format!("{}{}", config.endpoint.trim_end_matches('/'), options.path);

    let mut builder = LiveRuntime::builder(config.clone());
    if options.persist {
        if let Some(storage) = FileStorage::default_location() {
            eprintln!("Snapshots: {}", storage.dir().display().to_string().cyan());
            builder = builder.session_storage(Arc::new(storage));
        }
    }
    let live = builder.build()?;

    let response = reqwest::get(&page_url).await?;
    if !response.status().is_success() {
        return Err(soli_live::LiveError::Status {
            status: response.status().as_u16(),
            url: page_url,
        });
    }
    let markup = response.text().await?;

    let report = live.load(&options.path, &markup);
    eprintln!(
        "{} {} ({} component(s))",
        "Mounted".green().bold(),
        page_url,
        report.mounted.len()
    );
    for id in &report.mounted {
        eprintln!("  - {}", id.cyan());
    }

    if options.restore {
        let restored = live.restore(&NavigationSignals::back_forward());
        eprintln!("Restored {} component(s) from snapshot", restored);
    }

    live.start();
    if !config.disable_sse {
        eprintln!("Listening on {}", config.push_url().cyan());
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("{} {}", "warning:".yellow().bold(), e);
    }

    live.teardown();
    live.stop();
    eprintln!("{}", "Stopped".dimmed());
    Ok(())
}
