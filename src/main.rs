#[macro_use]
extern crate log;

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, TermLogger, TerminalMode};
use std::io::{self, BufRead, Write};
use std::process;
use std::time::Duration;

use chord_dht::{Config, Key, Node, NodeData};

/// Runs a node of a Chord ring and reads commands from standard input.
#[derive(Parser, Debug)]
#[command(name = "chord-dht")]
struct Args {
    /// Address the node binds and advertises
    #[arg(short = 'a', long = "address")]
    address: String,
    /// Port the node binds and advertises
    #[arg(short = 'p', long = "port")]
    port: u16,
    /// Address of an existing node; leave out to create a new ring
    #[arg(long = "ja")]
    join_address: Option<String>,
    /// Port of the existing node
    #[arg(long = "jp", requires = "join_address")]
    join_port: Option<u16>,
    /// Milliseconds between stabilize rounds
    #[arg(long = "ts", default_value_t = 500)]
    stabilize: u64,
    /// Milliseconds between fix fingers rounds
    #[arg(long = "tff", default_value_t = 500)]
    fix_fingers: u64,
    /// Milliseconds between fix successor list rounds
    #[arg(long = "tfs", default_value_t = 500)]
    fix_successors: u64,
    /// Milliseconds between check predecessor rounds
    #[arg(long = "tcp", default_value_t = 500)]
    check_predecessor: u64,
    /// Number of successors kept in the successor list
    #[arg(short = 'r', default_value_t = 3)]
    successors: usize,
    /// Milliseconds a request waits for its answer
    #[arg(long = "timeout", default_value_t = 5000)]
    timeout: u64,
    /// Milliseconds a liveness probe waits; defaults to a quarter of the request timeout
    #[arg(long = "probe-timeout")]
    probe_timeout: Option<u64>,
    /// Identifier of the node in hex; defaults to the hash of the address
    #[arg(short = 'i', long = "id")]
    id: Option<String>,
    /// One of off, error, warn, info, debug, trace
    #[arg(long = "log-level", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn config(&self) -> chord_dht::Result<Config> {
        let mut config = Config::new(&format!("{}:{}", self.address, self.port));
        config.id = match self.id {
            Some(ref id) => Some(Key::from_hex(id)?),
            None => None,
        };
        config.stabilize_interval = Duration::from_millis(self.stabilize);
        config.fix_fingers_interval = Duration::from_millis(self.fix_fingers);
        config.fix_successors_interval = Duration::from_millis(self.fix_successors);
        config.check_predecessor_interval = Duration::from_millis(self.check_predecessor);
        config.successor_list_size = self.successors;
        config.request_timeout = Duration::from_millis(self.timeout);
        config.probe_timeout = self.probe_timeout.map(Duration::from_millis);
        config.validate()?;
        Ok(config)
    }

    fn bootstrap(&self) -> Option<String> {
        match (&self.join_address, self.join_port) {
            (Some(addr), Some(port)) => Some(format!("{}:{}", addr, port)),
            (Some(addr), None) => Some(addr.clone()),
            _ => None,
        }
    }
}

const HELP: &str = "\
lookup, l <key>            - finds the node serving a resource
storefile, f <key>         - stores a resource in the ring
printstate, p [all]        - prints the ring state of this node
printbucket                - prints the bucket with key hashes
setbucket <key> <id>       - adds an entry to the bucket
setsuccessor, s <addr>     - sets the successor
setpredecessor, pre <addr> - sets the predecessor
findsuccessor <id>         - finds the successor of an id
hash <text>                - hashes the input
notify                     - notifies the successor
ping <addr>                - pings an address
stabilize                  - runs stabilize once
fixfingers                 - runs fix fingers once
fixsuccessors              - runs fix successor list once
checkpredecessor           - runs check predecessor once
quit, q                    - terminates the node
help, h                    - shows this list";

fn print_state(node: &Node, all: bool) {
    let state = node.snapshot();
    match state.predecessor() {
        Some(predecessor) => println!("Pred\t{}\t{:?}", predecessor.addr, predecessor.id),
        None => println!("Pred\t-"),
    }
    println!("This\t{}\t{:?}", state.node_data().addr, state.node_data().id);
    println!("Successor list:");
    for (i, successor) in state.successors().iter().enumerate() {
        println!("{:3}\t{}\t{:?}", i, successor.addr, successor.id);
        if !all {
            break;
        }
    }
    if all {
        println!("Finger table:");
        for (i, finger) in state.fingers().iter().enumerate() {
            if let Some(finger) = finger {
                println!("2^{:3}\t{}\t{}", i, finger.addr, finger.id.short());
            }
        }
    }
}

fn handle_command(node: &Node, args: &[&str]) -> bool {
    let arg = |index: usize| args.get(index).cloned();
    match args[0] {
        "lookup" | "l" => match arg(1) {
            Some(key) => match node.lookup(key) {
                Ok(Some(owner)) => {
                    let serving = node.find_successor(&owner);
                    println!("Key of resource is: {:?}", Key::hash(key.as_bytes()));
                    println!("Served by: {} ({:?})", serving.addr, owner);
                },
                Ok(None) => println!("{} is not stored in the ring", key),
                Err(err) => println!("Lookup failed: {}", err),
            },
            None => println!("usage: lookup <key>"),
        },
        "storefile" | "file" | "f" => match arg(1) {
            Some(key) => match node.store(key) {
                Ok(responsible) => println!("Stored {} at {}", key, responsible),
                Err(err) => println!("Store failed: {}", err),
            },
            None => println!("usage: storefile <key>"),
        },
        "printstate" | "p" => print_state(node, arg(1) == Some("all")),
        "printbucket" => {
            for (key, owner) in node.snapshot().bucket().entries() {
                println!("{}\t{}\t{}", Key::hash(key.as_bytes()).short(), key, owner.short());
            }
        },
        "setbucket" => match (arg(1), arg(2).map(Key::from_hex)) {
            (Some(key), Some(Ok(owner))) => node.insert_entry(key, owner),
            _ => println!("usage: setbucket <key> <hex id>"),
        },
        "setsuccessor" | "succ" | "s" => match arg(1) {
            Some(addr) => {
                node.set_successor(NodeData::from_address(addr));
                print_state(node, false);
            },
            None => println!("usage: setsuccessor <addr>"),
        },
        "setpredecessor" | "pre" => match arg(1) {
            Some(addr) => {
                node.set_predecessor(Some(NodeData::from_address(addr)));
                print_state(node, false);
            },
            None => println!("usage: setpredecessor <addr>"),
        },
        "findsuccessor" => match arg(1).map(Key::from_hex) {
            Some(Ok(id)) => {
                let lookup = node.find_successor_traced(&id);
                println!("{} after {} hops", lookup.node, lookup.hops);
            },
            _ => println!("usage: findsuccessor <hex id>"),
        },
        "hash" => match arg(1) {
            Some(text) => println!("{:?}", Key::hash(text.as_bytes())),
            None => println!("usage: hash <text>"),
        },
        "notify" => node.notify(),
        "ping" => match arg(1) {
            Some(addr) => println!("{}", node.ping(&NodeData::from_address(addr))),
            None => println!("usage: ping <addr>"),
        },
        "stabilize" => node.stabilize(),
        "fixfingers" => node.fix_fingers(),
        "fixsuccessors" => node.fix_successor_list(),
        "checkpredecessor" => node.check_predecessor(),
        "quit" | "q" | "exit" | "x" => return false,
        _ => println!("{}", HELP),
    }
    true
}

fn main() {
    let args = Args::parse();
    let log_level = args.log_level.parse().unwrap_or(LevelFilter::Warn);

    let logger_config = ConfigBuilder::new()
        .set_time_level(LevelFilter::Error)
        .build();
    if let Err(err) = CombinedLogger::init(vec![TermLogger::new(
        log_level,
        logger_config,
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]) {
        eprintln!("Could not initialize logger: {}", err);
    }

    let config = match args.config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(2);
        },
    };
    let bootstrap = args.bootstrap();
    let node = match Node::new(config, bootstrap.as_ref().map(String::as_str)) {
        Ok(node) => node,
        Err(err) => {
            eprintln!("Could not start node: {}", err);
            process::exit(1);
        },
    };
    println!(
        "Chord node started on address {} with id {:?}",
        node.node_data().addr,
        node.id()
    );

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line.to_lowercase(),
            Err(err) => {
                warn!("Could not read command: {}", err);
                break;
            },
        };
        let args: Vec<&str> = line.split_whitespace().collect();
        if args.is_empty() {
            continue;
        }
        if !handle_command(&node, &args) {
            break;
        }
        io::stdout().flush().ok();
    }
    node.kill();
}
