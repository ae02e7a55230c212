use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Default)]
struct CliArgs {
    config_dir: Option<PathBuf>,
    null_audio: bool,
    verbose: bool,
    paths: Vec<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = parse_args(std::env::args().skip(1).collect())?;

    let default_filter = if args.verbose { "tonearm=debug" } else { "tonearm=warn" };
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("TONEARM_LOG").unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tonearm::app::run(tonearm::app::AppOptions {
        config_dir: args.config_dir,
        null_audio: args.null_audio,
        paths: args.paths,
    })
}

fn parse_args(args: Vec<String>) -> anyhow::Result<CliArgs> {
    let mut out = CliArgs::default();
    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--config-dir" => {
                index += 1;
                let Some(value) = args.get(index) else {
                    anyhow::bail!("--config-dir requires a directory");
                };
                if value.trim().is_empty() {
                    anyhow::bail!("--config-dir cannot be empty");
                }
                out.config_dir = Some(PathBuf::from(value.trim()));
            }
            "--null-audio" => out.null_audio = true,
            "-v" | "--verbose" => out.verbose = true,
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other if other.starts_with('-') => anyhow::bail!("unknown argument {other}"),
            path => out.paths.push(PathBuf::from(path)),
        }
        index += 1;
    }
    Ok(out)
}

fn print_help() {
    println!("tonearm [options] [files or folders...]");
    println!("  --config-dir <dir>   Keep state, history and cache in <dir>");
    println!("  --null-audio         Run without an audio device");
    println!("  -v, --verbose        Debug logging (TONEARM_LOG overrides)");
}
