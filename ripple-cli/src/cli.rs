//! Application definition.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Error, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use ripple_net::{Network, ServiceRegistry, SystemWorker, WorkerPool};
use simplelog::{LevelFilter, TermLogger};

use crate::config::Config;
use crate::{chat, grid, util};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

const PING_TIMEOUT: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(1);

pub fn app<'a, 'b>() -> App<'a, 'b> {
    App::new("ripple")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .version(VERSION)
        .author(AUTHORS)
        .about("Run chat servers, grid coordinators and workers from the command line.")
        .arg(Arg::with_name("verbosity")
            .long("verbosity")
            .short("v")
            .takes_value(true)
            .default_value("info")
            .value_name("verb")
            .global(true)
            .help("Set the verbosity of the log output"))
        .arg(Arg::with_name("config")
            .long("config")
            .short("c")
            .takes_value(true)
            .value_name("path")
            .global(true)
            .help("Path to a toml file with network settings"))

        // chat subcommands
        .subcommand(SubCommand::with_name("chat-server")
            .display_order(10)
            .about("Start a chat server")
            .arg(Arg::with_name("address")
                .required(true)
                .value_name("address")
                .help("Address to listen on, e.g. 0.0.0.0:9123")))
        .subcommand(SubCommand::with_name("chat")
            .display_order(11)
            .about("Join a chat room, sending lines typed into the terminal")
            .arg(Arg::with_name("address")
                .required(true)
                .value_name("address")
                .help("Address of the chat server"))
            .arg(Arg::with_name("room")
                .long("room")
                .short("r")
                .takes_value(true)
                .value_name("room")
                .help("Room to join (defaults to the main room)"))
            .arg(Arg::with_name("name")
                .long("name")
                .short("n")
                .takes_value(true)
                .value_name("name")
                .default_value("anonymous")
                .help("Name shown next to your messages")))

        // grid subcommands
        .subcommand(SubCommand::with_name("grid-coord")
            .display_order(20)
            .about("Start a grid coordinator running a distributed prime search")
            .arg(Arg::with_name("address")
                .required(true)
                .value_name("address")
                .help("Address to listen on for workers"))
            .arg(Arg::with_name("limit")
                .long("limit")
                .short("l")
                .takes_value(true)
                .value_name("n")
                .default_value("1000000")
                .help("Search for primes below this number"))
            .arg(Arg::with_name("batch")
                .long("batch")
                .short("b")
                .takes_value(true)
                .value_name("n")
                .default_value("10000")
                .help("Amount of numbers searched in a single job")))
        .subcommand(SubCommand::with_name("grid-worker")
            .display_order(21)
            .about("Start a grid worker computing jobs for a coordinator")
            .arg(Arg::with_name("address")
                .required(true)
                .value_name("address")
                .help("Address of the coordinator"))
            .arg(Arg::with_name("threads")
                .long("threads")
                .short("t")
                .takes_value(true)
                .value_name("n")
                .help("Number of compute threads (defaults to number of processors)")))

        .subcommand(SubCommand::with_name("ping")
            .display_order(30)
            .about("Measure round-trip times to a server using echo messages")
            .arg(Arg::with_name("address")
                .required(true)
                .value_name("address"))
            .arg(Arg::with_name("count")
                .long("count")
                .short("n")
                .takes_value(true)
                .value_name("n")
                .default_value("4")
                .help("Number of echo messages to send")))
}

pub fn app_matches() -> ArgMatches<'static> {
    app().get_matches()
}

/// Runs based on specified subcommand.
pub fn start(matches: ArgMatches) -> Result<()> {
    match matches.subcommand() {
        ("chat-server", Some(m)) => chat::start_server(m, &setup(m)?),
        ("chat", Some(m)) => chat::start_client(m, &setup(m)?),
        ("grid-coord", Some(m)) => grid::start_coordinator(m, &setup(m)?),
        ("grid-worker", Some(m)) => grid::start_worker(m, &setup(m)?),
        ("ping", Some(m)) => start_ping(m, &setup(m)?),
        _ => Ok(()),
    }
}

/// Sets up logging and loads the config file, if any.
fn setup(matches: &ArgMatches) -> Result<Config> {
    setup_log_verbosity(matches);
    let config = Config::load(matches.value_of("config"))?;
    debug!("using config: {:?}", config);
    Ok(config)
}

fn start_ping(matches: &ArgMatches, config: &Config) -> Result<()> {
    let addr = matches
        .value_of("address")
        .ok_or_else(|| Error::msg("missing server address"))?;
    let count: usize = util::parse_arg(matches, "count")?;

    let mut network = Network::client_with_config(addr, config.network_config()?)?;
    let server = network
        .remote_addr()
        .ok_or_else(|| Error::msg("client network has no remote address"))?;
    let system = Arc::new(SystemWorker::new(Arc::new(ServiceRegistry::new(
        network.handle(),
    ))));
    network.start(WorkerPool::with_threads(system.clone(), 1)?)?;

    let mut round_trips = Vec::new();
    for seq in 0..count {
        let sent = Instant::now();
        let pending = system.ping(&server)?;
        match pending.wait_for_response_timeout(PING_TIMEOUT) {
            Some(_) => {
                let rtt = sent.elapsed();
                println!(
                    "echo from {}: seq={} time={:.3} ms",
                    server,
                    seq,
                    rtt.as_secs_f64() * 1000.
                );
                round_trips.push(rtt);
            }
            None => {
                system.cancel_request(&pending);
                println!("echo from {}: seq={} timed out", server, seq);
            }
        }
        if seq + 1 < count {
            thread::sleep(PING_INTERVAL);
        }
    }

    print!("{} sent, {} received", count, round_trips.len());
    if !round_trips.is_empty() {
        let total: Duration = round_trips.iter().sum();
        print!(
            ", average {:.3} ms",
            total.as_secs_f64() * 1000. / round_trips.len() as f64
        );
    }
    println!();
    network.shutdown();
    Ok(())
}

fn setup_log_verbosity(matches: &ArgMatches) {
    let level_filter = match matches.value_of("verbosity") {
        Some(s) => match s {
            "0" | "none" => LevelFilter::Off,
            "1" | "err" | "error" | "min" => LevelFilter::Error,
            "2" | "warn" | "warning" | "default" => LevelFilter::Warn,
            "3" | "info" => LevelFilter::Info,
            "4" | "debug" => LevelFilter::Debug,
            "5" | "trace" | "max" | "all" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        _ => LevelFilter::Warn,
    };
    let mut config_builder = simplelog::ConfigBuilder::new();
    let logger_conf = config_builder
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Debug)
        .set_location_level(LevelFilter::Error)
        .set_time_format_str("%H:%M:%S%.6f")
        .build();
    if TermLogger::init(level_filter, logger_conf, simplelog::TerminalMode::Mixed).is_err() {
        eprintln!("failed initializing terminal logger");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_args_reach_subcommands() {
        let matches = app()
            .get_matches_from_safe(vec![
                "ripple",
                "grid-worker",
                "127.0.0.1:9123",
                "--threads",
                "3",
                "--verbosity",
                "debug",
            ])
            .unwrap();
        let (name, sub) = matches.subcommand();
        let sub = sub.unwrap();
        assert_eq!(name, "grid-worker");
        assert_eq!(sub.value_of("verbosity"), Some("debug"));
        assert_eq!(util::parse_arg::<usize>(sub, "threads").unwrap(), 3);
    }

    #[test]
    fn chat_defaults() {
        let matches = app()
            .get_matches_from_safe(vec!["ripple", "chat", "127.0.0.1:9123"])
            .unwrap();
        let sub = matches.subcommand_matches("chat").unwrap();
        assert_eq!(sub.value_of("name"), Some("anonymous"));
        assert_eq!(sub.value_of("room"), None);
    }
}
