mod remote;

use std::fs::File;
use std::path::PathBuf;

use trollibox_net::Config;

use remote::Command;

const USAGE: &str = "usage: trollibox-remote [-v] [--config <path>] [--player <name>] \
[play|pause|stop|next|prev|volume <0-100>|seek <time>|search <query>|watch]";

fn init_logging(verbose: bool) {
    use simplelog::{LevelFilter, WriteLogger};

    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    let log_path = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trollibox")
        .join("trollibox-remote.log");

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = match File::create(&log_path).or_else(|_| File::create(std::env::temp_dir().join("trollibox-remote.log"))) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Cannot create log file: {}", e);
            return;
        }
    };

    if let Err(e) = WriteLogger::init(log_level, simplelog::Config::default(), log_file) {
        eprintln!("Failed to initialize logger: {}", e);
        return;
    }

    log::info!("trollibox-remote starting (log level: {:?})", log_level);
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");
    init_logging(verbose);

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);
    let player_name = args
        .iter()
        .position(|a| a == "--player")
        .and_then(|i| args.get(i + 1).cloned());

    // Everything that is not a flag or a flag's value.
    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "--player" => {
                iter.next();
            }
            "--verbose" | "-v" => {}
            _ => positional.push(arg.as_str()),
        }
    }

    let command = match Command::parse(&positional) {
        Ok(command) => command,
        Err(msg) => {
            eprintln!("{}\n{}", msg, USAGE);
            std::process::exit(2);
        }
    };

    let mut config = match &config_path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    if let Some(name) = &player_name {
        config.set_player(name);
    }

    remote::run(&config, command)
}
