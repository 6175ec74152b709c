//! `raft-server` — Component G's process entry point.
//!
//! Takes one positional argument (path to the node's config file, as
//! spec.md §6 "Process boundary" requires), loads parameters, bootstraps
//! persistent state, binds the socket, and runs the event loop until
//! killed.

extern crate raft_register;

use std::path::Path;
use std::process;

use clap::{App, Arg};
use log::error;

use raft_register::config::{self, Parameters};
use raft_register::errors::*;
use raft_register::node::Node;

fn run() -> Result<()> {
    let matches = App::new("raft-server")
        .about("Runs one node of a replicated key-value register")
        .arg(
            Arg::with_name("config")
                .help("Path to this node's configuration file")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("parameters")
                .long("parameters")
                .value_name("PATH")
                .help("Path to the parameter file (TIME_TO_RETRY, SERVER_TIMEOUT, HEARTBEAT_TIMEOUT, ELECTION_INTERVAL)")
                .takes_value(true)
                .default_value("parameters.json"),
        )
        .get_matches();

    let config_path = Path::new(matches.value_of("config").unwrap());
    let parameters_path = Path::new(matches.value_of("parameters").unwrap());

    let params = Parameters::load(parameters_path)
        .chain_err(|| "loading parameter file")?;
    let boot = config::bootstrap(config_path)
        .chain_err(|| "bootstrapping node from configuration")?;

    let mut node = Node::bootstrap(
        boot,
        params.election_interval(),
        params.heartbeat_timeout(),
        params.read_lease_wait(),
    )
    .chain_err(|| "binding node socket")?;

    node.run()
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        error!("fatal: {}", e);
        for cause in e.iter().skip(1) {
            error!("caused by: {}", cause);
        }
        process::exit(1);
    }
}
