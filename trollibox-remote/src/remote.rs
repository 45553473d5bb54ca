use std::io;
use std::thread;
use std::time::{Duration, Instant};

use trollibox_net::{Config, ConnectionState, ModelEvent, Player, PlayerField};
use trollibox_types::{format_duration, PlayState};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// How long a one-shot command may take, including the initial load.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetState(PlayState),
    Next,
    Previous,
    Volume(String),
    Seek(String),
    Search(String),
    Watch,
}

impl Command {
    pub fn parse(args: &[&str]) -> Result<Self, String> {
        let Some((name, rest)) = args.split_first() else {
            return Ok(Command::Watch);
        };
        let operand = || match rest {
            [] => Err(format!("{} needs an argument", name)),
            words => Ok(words.join(" ")),
        };
        let no_operand = |command: Command| match rest {
            [] => Ok(command),
            _ => Err(format!("{} takes no argument", name)),
        };
        match *name {
            "play" => no_operand(Command::SetState(PlayState::Playing)),
            "pause" => no_operand(Command::SetState(PlayState::Paused)),
            "stop" => no_operand(Command::SetState(PlayState::Stopped)),
            "next" => no_operand(Command::Next),
            "prev" => no_operand(Command::Previous),
            "volume" => operand().map(Command::Volume),
            "seek" => operand().map(Command::Seek),
            "search" => operand().map(Command::Search),
            "watch" => no_operand(Command::Watch),
            other => Err(format!("unknown command {:?}", other)),
        }
    }
}

pub fn run(config: &Config, command: Command) -> io::Result<()> {
    let mut player = Player::connect(config).map_err(io::Error::other)?;
    log::info!("Running {:?} against player {:?}", command, player.name());

    if command == Command::Watch {
        return watch(&mut player);
    }

    // Apply the command to loaded state, not to defaults.
    settle(&mut player)?;
    match &command {
        Command::SetState(state) => player.set_state(*state),
        Command::Next => {
            player.next();
        }
        Command::Previous => {
            player.previous();
        }
        Command::Volume(input) => player.set_volume_input(input),
        Command::Seek(input) => player.seek_input(input),
        Command::Search(query) => {
            player.search(query);
        }
        Command::Watch => {}
    }
    settle(&mut player)?;

    if let Command::Search(_) = command {
        for result in &player.state().search.results {
            let track = &result.track;
            println!("{}  [{}]", track.display_title(), track.uri);
        }
    }
    Ok(())
}

/// Pump the player until nothing is outstanding. The first error ends it.
fn settle(player: &mut Player) -> io::Result<()> {
    let start = Instant::now();
    loop {
        for event in player.poll() {
            if let ModelEvent::Error(e) = event {
                return Err(io::Error::other(e));
            }
        }
        if player.outstanding() == 0 {
            return Ok(());
        }
        if start.elapsed() > COMMAND_TIMEOUT {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "player did not answer"));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Print what happens on the player until killed.
fn watch(player: &mut Player) -> io::Result<()> {
    loop {
        for event in player.poll() {
            match event {
                ModelEvent::Connection(ConnectionState::Connected) => println!("connected to {}", player.name()),
                ModelEvent::Connection(ConnectionState::Disconnected) => println!("disconnected, retrying"),
                ModelEvent::Connection(ConnectionState::Connecting) => {}
                ModelEvent::Changed { field, .. } => describe(player, field),
                ModelEvent::Error(e) => eprintln!("error: {}", e),
                ModelEvent::FieldError { .. } => {}
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn describe(player: &Player, field: PlayerField) {
    let state = player.state();
    match field {
        PlayerField::State => println!("{}", state.state),
        PlayerField::Volume => println!("volume {:.0}%", state.volume * 100.0),
        PlayerField::Current => match player.current_track() {
            Some(entry) => println!("now playing: {}", entry.track.display_title()),
            None => println!("nothing playing"),
        },
        PlayerField::Playlist => println!("playlist: {} tracks", state.playlist.len()),
        PlayerField::Tracks => println!("library: {} tracks", state.tracks.len()),
        PlayerField::Time => println!("at {}", format_duration(state.time)),
        PlayerField::Search | PlayerField::Art => {}
    }
}
