//! `raft-cli` — a command-line stand-in for the Tkinter GUI the
//! original source used to drive clients (out of scope per spec.md §1;
//! SPEC_FULL.md keeps the underlying protocol logic and drops only the
//! desktop input form). Reads a client config file in the same shape
//! `client.py` expects (`{port, server_list}`), then issues one GET or
//! SET and prints the result.

extern crate raft_register;

use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::process;
use std::time::Duration;

use clap::{App, Arg, SubCommand};
use serde::Deserialize;

use raft_register::client::RegisterClient;
use raft_register::types::Peer;

#[derive(Debug, Deserialize)]
struct ClientConfig {
    host: IpAddr,
    port: u16,
    server_list: Vec<Peer>,
}

fn main() {
    env_logger::init();

    let matches = App::new("raft-cli")
        .about("Issues a single GET or SET against the replicated register")
        .arg(
            Arg::with_name("config")
                .long("config")
                .value_name("PATH")
                .help("Path to this client's configuration file")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("server-timeout")
                .long("server-timeout")
                .value_name("SECONDS")
                .default_value("1.5"),
        )
        .arg(
            Arg::with_name("time-to-retry")
                .long("time-to-retry")
                .value_name("SECONDS")
                .default_value("5.0"),
        )
        .subcommand(
            SubCommand::with_name("get")
                .about("Reads a slot")
                .arg(Arg::with_name("position").required(true)),
        )
        .subcommand(
            SubCommand::with_name("set")
                .about("Writes a slot")
                .arg(Arg::with_name("position").required(true))
                .arg(Arg::with_name("value").required(true)),
        )
        .get_matches();

    let config_path = Path::new(matches.value_of("config").unwrap());
    let config = load_config(config_path);

    let server_timeout = Duration::from_secs_f64(
        matches.value_of("server-timeout").unwrap().parse().expect("--server-timeout must be a number"),
    );
    let time_to_retry = Duration::from_secs_f64(
        matches.value_of("time-to-retry").unwrap().parse().expect("--time-to-retry must be a number"),
    );

    let mut client = RegisterClient::new((config.host, config.port).into(), config.server_list, server_timeout, time_to_retry)
        .unwrap_or_else(|e| {
            eprintln!("failed to bind client socket: {}", e);
            process::exit(1);
        });

    let result = match matches.subcommand() {
        ("get", Some(sub)) => {
            let position = parse_position(sub.value_of("position").unwrap());
            client.get(position)
        }
        ("set", Some(sub)) => {
            let position = parse_position(sub.value_of("position").unwrap());
            let value = sub.value_of("value").unwrap().to_string();
            client.set(position, value)
        }
        _ => {
            eprintln!("expected a `get` or `set` subcommand");
            process::exit(1);
        }
    };

    match result {
        Ok(response) => println!("{}", response),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}

fn load_config(path: &Path) -> ClientConfig {
    let bytes = fs::read(path).unwrap_or_else(|e| {
        eprintln!("reading {:?}: {}", path, e);
        process::exit(1);
    });
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        eprintln!("parsing {:?}: {}", path, e);
        process::exit(1);
    })
}

fn parse_position(raw: &str) -> u32 {
    raw.parse().unwrap_or_else(|_| {
        eprintln!("position must be a positive integer");
        process::exit(1);
    })
}
