use crate::messages::SessionCommand;
use crate::session::{SessionHandle, SessionSnapshot};
use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};

/// One parsed console line.
#[derive(Debug, PartialEq)]
enum Action {
    Session(SessionCommand),
    Seek(f64),
    Status,
    Help,
    Quit,
}

/// Line-oriented transport console, standing in for the record and playback
/// views: parses commands from stdin and forwards them to the session, and
/// renders nothing that did not come from a snapshot.
pub async fn run(handle: SessionHandle) -> Result<()> {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();

    print_help();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse(line) {
            Err(message) => println!("{}", message),
            Ok(Action::Help) => print_help(),
            Ok(Action::Status) => print_status(&handle.snapshot()),
            Ok(Action::Quit) => break,
            Ok(Action::Seek(fraction)) => {
                if handle.snapshot().is_loading {
                    println!("busy, try again");
                    continue;
                }
                // The slider gesture collapses to its two phases
                handle.send(SessionCommand::SeekBegin).await?;
                handle.send(SessionCommand::SeekCommit(fraction)).await?;
            }
            Ok(Action::Session(cmd)) => {
                if handle.snapshot().is_loading {
                    println!("busy, try again");
                    continue;
                }
                handle.send(cmd).await?;
            }
        }
    }

    Ok(())
}

fn parse(line: &str) -> Result<Action, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default();

    let action = match verb {
        "record" => Action::Session(SessionCommand::BeginRecording),
        "finish" => Action::Session(SessionCommand::EndRecording),
        "play" => Action::Session(SessionCommand::Play),
        "pause" => Action::Session(SessionCommand::Pause),
        "stop" => Action::Session(SessionCommand::Stop),
        "mute" => Action::Session(SessionCommand::SetMuted(true)),
        "unmute" => Action::Session(SessionCommand::SetMuted(false)),
        "seek" => {
            let fraction = parse_number(words.next(), "usage: seek <0..1>")?;
            Action::Seek(fraction)
        }
        "vol" => {
            let volume = parse_number(words.next(), "usage: vol <0..1>")?;
            Action::Session(SessionCommand::SetVolume(volume as f32))
        }
        "rate" => {
            let rate = parse_number(words.next(), "usage: rate <speed> [pitch]")?;
            let correct_pitch = matches!(words.next(), Some("pitch"));
            Action::Session(SessionCommand::SetRate {
                rate: rate as f32,
                correct_pitch,
            })
        }
        "status" => Action::Status,
        "help" => Action::Help,
        "quit" | "exit" => Action::Quit,
        other => return Err(format!("unknown command: {} (try 'help')", other)),
    };

    if words.next().is_some() && !matches!(action, Action::Session(SessionCommand::SetRate { .. }))
    {
        return Err(format!("too many arguments for '{}'", verb));
    }

    Ok(action)
}

fn parse_number(word: Option<&str>, usage: &str) -> Result<f64, String> {
    word.and_then(|w| w.parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
        .ok_or_else(|| usage.to_string())
}

fn print_help() {
    println!("commands:");
    println!("  record            start a new recording (replaces the loaded clip)");
    println!("  finish            stop recording and load the clip for playback");
    println!("  play / pause / stop");
    println!("  seek <0..1>       jump to a fraction of the clip");
    println!("  vol <0..1>        set playback volume");
    println!("  mute / unmute");
    println!("  rate <speed> [pitch]");
    println!("  status            show session state");
    println!("  quit");
}

fn print_status(snapshot: &SessionSnapshot) {
    if snapshot.is_loading {
        println!("loading...");
        return;
    }
    if snapshot.is_recording {
        println!("recording  {}  LIVE", snapshot.recording_timestamp());
        return;
    }
    if snapshot.playback_allowed {
        println!(
            "{}  {}  vol {:.2}{}  rate {:.2}",
            if snapshot.is_playing { "playing" } else { "paused" },
            snapshot.playback_timestamp(),
            snapshot.volume,
            if snapshot.muted { " (muted)" } else { "" },
            snapshot.rate,
        );
        return;
    }
    println!("idle, nothing recorded yet");
}
