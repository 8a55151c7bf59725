mod command;
mod node;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use env_logger::{Builder, Env};
use log::LevelFilter;

use sleep_core::policy::Capabilities;

use session::Session;

const USAGE: &str = "Usage: sleep-emulator [--node <sensor|repeater|standalone>] [--transcript <path>] [--verbose]";

struct Options {
    capabilities: Capabilities,
    transcript: Option<PathBuf>,
    verbose: bool,
}

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("{USAGE}");
        process::exit(2);
    });
    let default_filter = if options.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    Builder::from_env(Env::default().default_filter_or(default_filter.as_str())).init();

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options.capabilities);
    if let Some(path) = options.transcript.as_deref() {
        session = session.with_transcript(path, "Sleep emulator interactive transcript")?;
    }
    let mut line = String::new();

    writeln!(
        writer,
        "Sleep Emulator ready. Type `help` for commands or `exit` to quit."
    )?;

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<Options, String> {
    let mut options = Options {
        capabilities: Capabilities::sensor_node(),
        transcript: None,
        verbose: false,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--node=") {
            options.capabilities = node_profile(value)?;
        } else if arg == "--node" {
            let value = args.next().ok_or("Expected value after --node")?;
            options.capabilities = node_profile(&value)?;
        } else if arg == "--transcript" {
            let value = args.next().ok_or("Expected path after --transcript")?;
            options.transcript = Some(PathBuf::from(value));
        } else if arg == "--verbose" || arg == "-v" {
            options.verbose = true;
        } else {
            return Err(format!("Unknown argument `{arg}`"));
        }
    }
    Ok(options)
}

fn node_profile(tag: &str) -> Result<Capabilities, String> {
    if tag.eq_ignore_ascii_case("sensor") {
        Ok(Capabilities::sensor_node())
    } else if tag.eq_ignore_ascii_case("repeater") {
        Ok(Capabilities::repeater())
    } else if tag.eq_ignore_ascii_case("standalone") {
        Ok(Capabilities::standalone())
    } else {
        Err(format!("Unknown node profile `{tag}`"))
    }
}
