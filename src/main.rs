use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::{error, info};
use std::path::PathBuf;

use depgraph_monitor::{network::NodePopulation, Config, Monitor};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let matches = Command::new("depgraph-monitor")
        .version("0.1.0")
        .about("Passive service-dependency discovery from live network traffic")
        .subcommand_required(true)
        .subcommand(
            Command::new("load")
                .about("Start capturing and building the dependency graph")
                .arg(
                    Arg::new("interface")
                        .short('i')
                        .long("interface")
                        .value_name("INTERFACE")
                        .help("Network interface to capture from")
                )
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(u64))
                        .help("Snapshot interval in seconds [default: 30]")
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("DIR")
                        .num_args(0..=1)
                        .default_missing_value("")
                        .help("Export a JSON snapshot every cycle, optionally into DIR")
                )
                .arg(
                    Arg::new("verbose")
                        .short('v')
                        .long("verbose")
                        .action(ArgAction::SetTrue)
                        .help("Log every accepted edge")
                )
                .arg(
                    Arg::new("nodes")
                        .long("nodes")
                        .value_name("POLICY")
                        .help("Node population: external, source or endpoints")
                )
                .arg(
                    Arg::new("config")
                        .short('c')
                        .long("config")
                        .value_name("FILE")
                        .help("JSON configuration file; flags override it")
                )
        )
        .get_matches();

    match matches.subcommand() {
        Some(("load", sub_matches)) => {
            let config = build_config(sub_matches)?;
            run_load_mode(config).await
        }
        _ => unreachable!("subcommand is required"),
    }
}

fn build_config(matches: &ArgMatches) -> anyhow::Result<Config> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => Config::default(),
    };

    if let Some(interface) = matches.get_one::<String>("interface") {
        config.capture.interface = interface.clone();
    }
    if let Some(interval) = matches.get_one::<u64>("interval") {
        config.snapshot.interval_secs = *interval;
    }
    if let Some(dir) = matches.get_one::<String>("output") {
        config.snapshot.export_enabled = true;
        if !dir.is_empty() {
            config.snapshot.export_dir = Some(PathBuf::from(dir));
        }
    }
    if matches.get_flag("verbose") {
        config.capture.verbose = true;
    }
    if let Some(policy) = matches.get_one::<String>("nodes") {
        config.capture.node_population = policy.parse::<NodePopulation>()?;
    }

    Ok(config)
}

async fn run_load_mode(config: Config) -> anyhow::Result<()> {
    if config.snapshot.export_enabled {
        let dir = config.snapshot.resolve_export_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create export directory {}", dir.display()))?;
    }

    let monitor = Monitor::new(config.clone())?;
    info!("Dependency graph monitor loaded on: {}", config.capture.interface);

    monitor.run().await?;
    Ok(())
}
