//! Chat server and terminal chat client.

use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Error, Result};
use clap::ArgMatches;
use colored::*;
use crossbeam_channel::{select, tick, unbounded};
use ripple_net::chat::ChatService;
use ripple_net::msg::chat::MAIN_ROOM;
use ripple_net::{Network, ServiceRegistry, SystemWorker, WorkerPool};

use crate::config::Config;
use crate::util;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Runs a chat server until ctrl-c is pressed.
pub fn start_server(matches: &ArgMatches, config: &Config) -> Result<()> {
    let addr = matches
        .value_of("address")
        .ok_or_else(|| Error::msg("missing server address"))?;
    let mut network = Network::server_with_config(addr, config.network_config()?)?;
    let registry = Arc::new(ServiceRegistry::new(network.handle()));
    let chat = Arc::new(ChatService::with_logging(network.handle()));
    registry.set_chat(chat.clone());
    network.start(WorkerPool::with_threads(
        SystemWorker::new(registry),
        config.worker_threads(),
    )?)?;
    println!("listening for chat clients on: {}", network.local_addr());

    let ctrl_c = util::ctrl_channel()?;
    let status = tick(STATUS_INTERVAL);
    loop {
        select! {
            recv(ctrl_c) -> _ => break,
            recv(status) -> _ => info!(
                "{} clients connected, rooms: {:?}",
                network.connections().len(),
                chat.rooms().iter().map(|r| display_room(r)).collect::<Vec<_>>()
            ),
        }
    }

    println!("Initiating graceful shutdown...");
    network.shutdown();
    Ok(())
}

/// Joins a room, sending lines read from stdin and printing whatever gets
/// said in the room.
pub fn start_client(matches: &ArgMatches, config: &Config) -> Result<()> {
    let addr = matches
        .value_of("address")
        .ok_or_else(|| Error::msg("missing server address"))?;
    let room = matches.value_of("room").unwrap_or(MAIN_ROOM).to_string();
    let name = matches.value_of("name").unwrap_or("anonymous").to_string();

    let mut network = Network::client_with_config(addr, config.network_config()?)?;
    let server = network
        .remote_addr()
        .ok_or_else(|| Error::msg("client network has no remote address"))?;
    let registry = Arc::new(ServiceRegistry::new(network.handle()));
    let chat = Arc::new(ChatService::new(network.handle(), |msg: &str, room: &str| {
        println!("{} {}", format!("[{}]", display_room(room)).cyan(), msg)
    }));
    registry.set_chat(chat.clone());
    network.start(WorkerPool::with_threads(SystemWorker::new(registry), 1)?)?;

    chat.join(&room)?;
    println!(
        "joined room {} on {} as {}, type a message and press enter",
        display_room(&room).bold(),
        server,
        name.bold()
    );

    let (line_sender, lines) = unbounded();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_sender.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("failed reading from stdin: {}", e);
                    break;
                }
            }
        }
    });

    let ctrl_c = util::ctrl_channel()?;
    let connection_check = tick(Duration::from_secs(1));
    loop {
        select! {
            recv(lines) -> line => match line {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        chat.say(&format!("{}: {}", name, line), &room)?;
                    }
                }
                // stdin closed
                Err(_) => break,
            },
            recv(ctrl_c) -> _ => break,
            recv(connection_check) -> _ => {
                if !network.is_connected(&server) {
                    println!("{}", "connection to server lost".red());
                    return Ok(());
                }
            }
        }
    }

    chat.leave(&room)?;
    network.shutdown();
    Ok(())
}

fn display_room(room: &str) -> &str {
    if room == MAIN_ROOM {
        "main"
    } else {
        room
    }
}
