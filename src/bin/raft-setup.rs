//! `raft-setup` — generates a matching set of per-node configuration
//! files (and a parameter file) for a fresh cluster.
//!
//! Grounded on `raft_setup.py`/`configure_servers.py`: for each node,
//! write a config blob naming every *other* node as a peer (never
//! itself), seeded with the same cluster-wide `dict_data`. Restored
//! here as its own binary since spec.md §1 scopes it out of the core
//! consensus engine but SPEC_FULL.md keeps it as the ambient tool that
//! makes the rest of the crate runnable out of the box.

extern crate raft_register;

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

use clap::{App, Arg};

use raft_register::config::ConfigBlob;
use raft_register::types::Peer;

fn main() {
    let matches = App::new("raft-setup")
        .about("Generates per-node configuration files for a new cluster")
        .arg(
            Arg::with_name("nodes")
                .long("nodes")
                .value_name("N")
                .help("Number of server nodes")
                .takes_value(true)
                .default_value("5"),
        )
        .arg(
            Arg::with_name("host")
                .long("host")
                .value_name("IP")
                .help("Address all nodes bind to (typically loopback for local clusters)")
                .takes_value(true)
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::with_name("base-port")
                .long("base-port")
                .value_name("PORT")
                .help("First node gets this port, node i gets base-port + i - 1")
                .takes_value(true)
                .default_value("3001"),
        )
        .arg(
            Arg::with_name("clients")
                .long("clients")
                .value_name("N")
                .help("Number of client configuration files to also generate")
                .takes_value(true)
                .default_value("3"),
        )
        .arg(
            Arg::with_name("client-base-port")
                .long("client-base-port")
                .value_name("PORT")
                .help("First client gets this port, client i gets client-base-port + i - 1")
                .takes_value(true)
                .default_value("4001"),
        )
        .arg(
            Arg::with_name("out-dir")
                .long("out-dir")
                .value_name("DIR")
                .help("Directory to write server-<id>.json, client-<id>.json and parameters.json into")
                .takes_value(true)
                .default_value("configs"),
        )
        .get_matches();

    let nodes: u64 = matches.value_of("nodes").unwrap().parse().expect("--nodes must be an integer");
    let clients: u64 = matches.value_of("clients").unwrap().parse().expect("--clients must be an integer");
    let host: IpAddr = matches.value_of("host").unwrap().parse().expect("--host must be an IP address");
    let base_port: u16 = matches.value_of("base-port").unwrap().parse().expect("--base-port must be a port number");
    let client_base_port: u16 = matches
        .value_of("client-base-port")
        .unwrap()
        .parse()
        .expect("--client-base-port must be a port number");
    let out_dir = PathBuf::from(matches.value_of("out-dir").unwrap());

    fs::create_dir_all(&out_dir).expect("creating output directory");

    let all: Vec<Peer> = (0..nodes)
        .map(|i| Peer { node_id: i + 1, address: (host, base_port + i as u16).into() })
        .collect();

    let dict_data: HashMap<u32, String> = [(1, "Blue"), (2, "Yellow"), (3, "Red"), (4, "Green"), (5, "White")]
        .iter()
        .map(|(position, value)| (*position, value.to_string()))
        .collect();

    for peer in &all {
        let node_list: Vec<Peer> = all.iter().filter(|p| p.node_id != peer.node_id).cloned().collect();
        let blob = ConfigBlob {
            node_id: peer.node_id,
            host,
            port: peer.address.port(),
            node_list,
            term: 0,
            voted_for: None,
            logs: None,
            dict_data: Some(dict_data.clone()),
        };
        let path = out_dir.join(format!("server-{}.json", peer.node_id));
        let json = serde_json::to_string_pretty(&blob).expect("serializing config blob");
        fs::write(&path, json).unwrap_or_else(|e| panic!("writing {:?}: {}", path, e));
        println!("wrote {:?}", path);
    }

    for i in 0..clients {
        let client_config = serde_json::json!({
            "host": host,
            "port": client_base_port + i as u16,
            "server_list": all,
        });
        let path = out_dir.join(format!("client-{}.json", i + 1));
        fs::write(&path, serde_json::to_string_pretty(&client_config).unwrap())
            .unwrap_or_else(|e| panic!("writing {:?}: {}", path, e));
        println!("wrote {:?}", path);
    }

    let parameters = serde_json::json!({
        "TIME_TO_RETRY": 5.0,
        "SERVER_TIMEOUT": 1.5,
        "HEARTBEAT_TIMEOUT": 0.05,
        "ELECTION_INTERVAL": [0.15, 0.3],
    });
    let parameters_path = out_dir.join("parameters.json");
    fs::write(&parameters_path, serde_json::to_string_pretty(&parameters).unwrap())
        .unwrap_or_else(|e| panic!("writing {:?}: {}", parameters_path, e));
    println!("wrote {:?}", parameters_path);
}
