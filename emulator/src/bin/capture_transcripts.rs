//! Replays the reference sleep scenarios and writes their transcripts.

use std::io;
use std::path::Path;

#[allow(dead_code)]
#[path = "../command.rs"]
mod command;
#[allow(dead_code)]
#[path = "../node.rs"]
mod node;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::Session;
use sleep_core::policy::Capabilities;

const TRANSCRIPT_DIR: &str = "transcripts";

struct Scenario {
    name: &'static str,
    header: &'static str,
    capabilities: Capabilities,
    script: &'static [&'static str],
}

const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "plain-sleep",
        header: "Plain timed sleep on a sensor node",
        capabilities: Capabilities::sensor_node(),
        script: &["sleep 20000", "sleep 20", "status"],
    },
    Scenario {
        name: "smart-sleep",
        header: "Smart sleep handshake",
        capabilities: Capabilities::sensor_node(),
        script: &["sleep 1000 smart", "sleep 300 smart", "status"],
    },
    Scenario {
        name: "refusals",
        header: "Repeater, firmware update and reconnect refusals",
        capabilities: Capabilities::sensor_node(),
        script: &[
            "repeater on",
            "sleep 1500",
            "repeater off",
            "ota on",
            "sleep 3000",
            "ota off",
            "transport down",
            "sleep 800",
            "transport after 300",
            "sleep 1000",
            "status",
        ],
    },
    Scenario {
        name: "stray-interrupts",
        header: "Stray interrupts during a standalone power-down",
        capabilities: Capabilities::standalone(),
        script: &["stray 4", "sleep 48", "sleep 0", "status"],
    },
];

fn main() -> io::Result<()> {
    for scenario in SCENARIOS {
        record(scenario)?;
    }
    Ok(())
}

fn record(scenario: &Scenario) -> io::Result<()> {
    let path = Path::new(TRANSCRIPT_DIR).join(format!("{}.log", scenario.name));
    let mut session = Session::new(scenario.capabilities).with_transcript(&path, scenario.header)?;
    for line in scenario.script {
        let _ = session.handle_command(line)?;
    }
    println!("wrote {}", path.display());
    Ok(())
}
