//! Terminal front end for a tic-tac-toe device
//!
//! `ttt-link list` prints the serial ports. `ttt-link <port> [baud]` connects,
//! polls in the background and reads commands from stdin:
//! `move R C`, `mode N`, `reset`, `rate N`, `ports`, `help`, `quit`.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use ttt_link_core::{BaudRate, GameMode};
use ttt_link_sync::{GameLink, LinkConfig, LinkHealth, Notice, NoticeKind, SyncView};

const USAGE: &str = "usage: ttt-link list | ttt-link <port> [baud]";
const HELP: &str = "commands: move R C | mode N | reset | rate N | ports | help | quit";

/// One line typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Move { row: u8, col: u8 },
    Mode(GameMode),
    Reset,
    Rate(BaudRate),
    Ports,
    Help,
    Quit,
}

/// Parse a command line; `None` for a blank line
fn parse_input(line: &str) -> Result<Option<Input>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let input = match words.as_slice() {
        [] => return Ok(None),
        ["move", row, col] => Input::Move {
            row: row.parse().context("row must be a number")?,
            col: col.parse().context("column must be a number")?,
        },
        ["mode", n] => {
            let n: u8 = n.parse().context("mode must be a number")?;
            Input::Mode(GameMode::try_from(n)?)
        }
        ["reset"] => Input::Reset,
        ["rate", n] => Input::Rate(n.parse()?),
        ["ports"] => Input::Ports,
        ["help" | "?"] => Input::Help,
        ["quit" | "exit"] => Input::Quit,
        _ => bail!("unknown command {:?}; {}", line.trim(), HELP),
    };
    Ok(Some(input))
}

async fn execute(game: &mut GameLink, input: Input) -> ttt_link_core::Result<()> {
    match input {
        Input::Move { row, col } => game.make_move(row, col).await,
        Input::Mode(mode) => game.set_mode(mode).await,
        Input::Reset => game.reset_game().await,
        Input::Rate(rate) => game.set_rate(rate).await,
        Input::Ports => {
            print_ports(game);
            Ok(())
        }
        Input::Help => {
            println!("{}", HELP);
            for mode in GameMode::ALL {
                println!("  mode {} = {}", mode.as_u8(), mode);
            }
            Ok(())
        }
        Input::Quit => Ok(()),
    }
}

fn print_ports(game: &GameLink) {
    let ports = game.list_endpoints();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
}

fn print_view(view: &SyncView) {
    print!("{}", view.board);
    if let Some(mode) = view.mode {
        println!("Mode: {}", mode);
    }
    match view.health {
        LinkHealth::Connected => {}
        LinkHealth::Disconnected => println!("Link closed"),
        LinkHealth::FatalError => println!(
            "Link failed: {}",
            view.last_error.as_deref().unwrap_or("unknown error")
        ),
    }
}

fn print_notice(notice: &Notice) {
    match notice.kind {
        NoticeKind::Win => println!("*** {} ***", notice.text),
        NoticeKind::LinkFault => println!("!!! {}", notice.text),
        NoticeKind::Status | NoticeKind::Mode => println!("> {}", notice.text),
    }
}

async fn run_session(game: &mut GameLink) -> Result<()> {
    let mut updates = game.subscribe().await;
    print_view(&updates.borrow_and_update().clone());
    println!("{}", HELP);

    // Notices without a view change (e.g. a repeated status) surface on this tick
    let mut notices = tokio::time::interval(game.config().poll_period);
    notices.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_input(&line) {
                    Ok(None) => continue,
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(input)) => {
                        if let Err(e) = execute(game, input).await {
                            println!("Error: {}", e);
                        }
                    }
                    Err(e) => println!("{:#}", e),
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = updates.borrow_and_update().clone();
                print_view(&view);
            }
            _ = notices.tick() => {}
        }

        if let Some(notice) = game.take_notice().await {
            print_notice(&notice);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = LinkConfig::from_env();
    let mut game = GameLink::serial(config);

    let mut args = std::env::args().skip(1);
    let Some(port) = args.next() else {
        println!("{}", USAGE);
        return Ok(());
    };
    if port == "list" {
        print_ports(&game);
        return Ok(());
    }

    let rate = match args.next() {
        Some(raw) => raw
            .parse::<BaudRate>()
            .with_context(|| format!("invalid baud rate {:?}", raw))?,
        None => game.config().rate,
    };

    let connection = game
        .connect(&port, rate)
        .await
        .with_context(|| format!("could not open {}", port))?;
    info!("Session started on {}", connection.endpoint);
    game.start_worker()?;

    let result = run_session(&mut game).await;
    game.disconnect().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_input("   ").unwrap(), None);
        assert_eq!(
            parse_input("move 1 2").unwrap(),
            Some(Input::Move { row: 1, col: 2 })
        );
        assert_eq!(
            parse_input("mode 2").unwrap(),
            Some(Input::Mode(GameMode::AiVsAi))
        );
        assert_eq!(parse_input(" reset ").unwrap(), Some(Input::Reset));
        assert_eq!(
            parse_input("rate 115200").unwrap(),
            Some(Input::Rate(BaudRate::B115200))
        );
        assert_eq!(parse_input("exit").unwrap(), Some(Input::Quit));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(parse_input("move 1").is_err());
        assert!(parse_input("move a 1").is_err());
        assert!(parse_input("mode 7").is_err());
        assert!(parse_input("rate 1200").is_err());
        assert!(parse_input("jump").is_err());

        let err = parse_input("rate fast").unwrap_err().to_string();
        assert!(err.contains("\"fast\""), "{}", err);
    }
}
