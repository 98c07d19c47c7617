//! Purpose: `fmq` CLI entry point and command dispatch.
//! Role: Binary crate root; parses args, runs commands, emits JSON on stdout.
//! Invariants: Errors are emitted as JSON on stderr.
//! Invariants: Process exit code is derived from `core::error::to_exit_code`.
use std::io::{self, Read, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use fmq::core::error::{to_exit_code, Error, ErrorKind};
use fmq::core::queue::{Queue, ReadOutcome};

mod queue_info_json;

use queue_info_json::{message_json, queue_info_json, slot_json};

#[derive(Parser)]
#[command(
    name = "fmq",
    version,
    about = "Persistent file-backed message queues for single-writer/multi-reader IPC",
    after_help = r#"EXAMPLES
  $ fmq create /tmp/beams --nslots 1024 --buf-size 1000000
  $ fmq tail /tmp/beams --follow        # Terminal 1: reader waits for messages
  $ echo "beam 42" | fmq publish /tmp/beams   # Terminal 2: writer publishes

A queue lives in two sibling files, <path>.stat and <path>.buf."#,
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh queue, overwriting any existing one at the path
    Create {
        path: PathBuf,
        /// Ring capacity in slots (one per message)
        #[arg(long, default_value_t = 1024)]
        nslots: i32,
        /// Total payload arena size in bytes
        #[arg(long, default_value_t = 10000)]
        buf_size: i64,
    },
    /// Print queue status (and optionally the slot table) as JSON
    Info {
        path: PathBuf,
        /// Include the full slot table
        #[arg(long)]
        slots: bool,
    },
    /// Publish one message, from --text or stdin
    Publish {
        path: PathBuf,
        #[arg(long)]
        text: Option<String>,
    },
    /// Print messages as JSON lines, oldest live entry first
    Tail {
        path: PathBuf,
        /// Keep following the queue instead of exiting at the end; waits
        /// for the queue to be created if it does not exist yet
        #[arg(long)]
        follow: bool,
        /// Poll interval for --follow; non-positive selects the default
        #[arg(long, default_value_t = -1)]
        poll_ms: i64,
        /// Skip the backlog and only print messages published from now on
        #[arg(long)]
        from_end: bool,
    },
    /// Reinitialize a queue in place, discarding all messages
    Clear { path: PathBuf },
}

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("FMQ_LOG"))
        .with_writer(io::stderr)
        .try_init();

    let cli = Cli::parse();
    let exit_code = match run(cli.command) {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run(command: Command) -> Result<(), Error> {
    match command {
        Command::Create {
            path,
            nslots,
            buf_size,
        } => {
            let queue = Queue::create(&path, nslots, buf_size)?;
            print_line(&json!({
                "created": path.display().to_string(),
                "nslots": queue.nslots(),
                "buf_size": queue.buf_size(),
            }))
        }
        Command::Info { path, slots } => {
            let mut queue = Queue::open_read_only(&path)?;
            let status = queue.status()?;
            let mut value = queue_info_json(&path, &status);
            if slots {
                let table = queue.slots()?;
                value["slots"] = table
                    .iter()
                    .enumerate()
                    .map(|(index, slot)| slot_json(index, slot, &status))
                    .collect();
            }
            print_line(&value)
        }
        Command::Publish { path, text } => {
            let payload = match text {
                Some(text) => text.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf).map_err(|err| {
                        Error::new(ErrorKind::Io)
                            .with_message("failed to read payload from stdin")
                            .with_source(err)
                    })?;
                    buf
                }
            };
            let mut queue = Queue::open_existing(&path)?;
            let id = queue.publish(&payload)?;
            print_line(&json!({ "id": id, "len": payload.len() }))
        }
        Command::Tail {
            path,
            follow,
            poll_ms,
            from_end,
        } => {
            let mut queue = if follow {
                Queue::open_blocking(&path, poll_ms)?
            } else {
                Queue::open_read_only(&path)?
            };
            if from_end {
                queue.seek_to_end()?;
            }
            loop {
                match queue.read_next()? {
                    ReadOutcome::Message(message) => print_line(&message_json(&message))?,
                    ReadOutcome::Gap => print_line(&json!({ "gap": true }))?,
                    ReadOutcome::NoNewData => {
                        if !follow {
                            return Ok(());
                        }
                        let message = queue.read_blocking(poll_ms)?;
                        print_line(&message_json(&message))?;
                    }
                }
            }
        }
        Command::Clear { path } => {
            let mut queue = Queue::open_existing(&path)?;
            queue.clear()?;
            print_line(&json!({ "cleared": path.display().to_string() }))
        }
    }
}

fn print_line(value: &serde_json::Value) -> Result<(), Error> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{value}")
        .and_then(|()| stdout.flush())
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to write to stdout")
                .with_source(err)
        })
}

fn emit_error(err: &Error) {
    let value = json!({
        "error": {
            "kind": format!("{:?}", err.kind()),
            "message": err.to_string(),
        }
    });
    eprintln!("{value}");
}

#[cfg(test)]
mod tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn cli_parses_create_with_geometry() {
        let cli = Cli::try_parse_from(["fmq", "create", "/tmp/q", "--nslots", "64", "--buf-size", "65536"])
            .expect("parse");
        match cli.command {
            super::Command::Create {
                nslots, buf_size, ..
            } => {
                assert_eq!(nslots, 64);
                assert_eq!(buf_size, 65536);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn cli_rejects_missing_subcommand() {
        assert!(Cli::try_parse_from(["fmq"]).is_err());
    }
}
