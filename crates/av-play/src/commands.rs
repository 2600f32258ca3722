//! Line-oriented control commands read from stdin.

use std::io::BufRead;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::Sender;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    /// Fraction of the duration, `0.0..=1.0`.
    Seek(f64),
    Speed(f32),
    Status,
    Quit,
}

/// Parse one command line such as `seek 0.5` or `speed 2`.
pub fn parse(line: &str) -> Result<Command> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        bail!("empty command");
    };
    let arg = words.next();
    if words.next().is_some() {
        bail!("too many arguments for {verb}");
    }

    let cmd = match (verb.to_ascii_lowercase().as_str(), arg) {
        ("pause" | "p", None) => Command::Pause,
        ("resume" | "play" | "r", None) => Command::Resume,
        ("status" | "s", None) => Command::Status,
        ("quit" | "stop" | "q", None) => Command::Quit,
        ("seek", Some(v)) => Command::Seek(
            v.parse()
                .with_context(|| format!("seek fraction {v:?}"))?,
        ),
        ("speed", Some(v)) => Command::Speed(v.parse().with_context(|| format!("speed {v:?}"))?),
        ("seek" | "speed", None) => bail!("{verb} needs a value"),
        (other, _) => return Err(anyhow!("unknown command: {other}")),
    };
    Ok(cmd)
}

/// Forward parsed stdin lines to `tx` until stdin closes or the receiver goes away.
pub fn spawn_stdin_reader(tx: Sender<Command>) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("av-play-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse(&line) {
                    Ok(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!("{e:#}"),
                }
            }
            tracing::debug!("stdin closed");
        })
        .context("spawn stdin reader")?;
    Ok(handle)
}
