use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use sleep_core::policy::{Capabilities, SleepRequest};
use sleep_core::telemetry::EventId;

use crate::command::{self, Command, LinkCommand};
use crate::node::{self, SharedNode, VirtualController};

pub const HELP_TOPICS: &[(&str, &str)] = &[
    (
        "sleep",
        "sleep <ms> [smart]          - request a sleep; 0 sleeps until an external event",
    ),
    (
        "repeater",
        "repeater on|off             - toggle the repeater capability",
    ),
    (
        "transport",
        "transport up|down|after <ms> - control the network link",
    ),
    (
        "ota",
        "ota on|off                  - start or finish a firmware update",
    ),
    (
        "stray",
        "stray <n>                   - queue stray interrupts for the next sleep",
    ),
    (
        "status",
        "status                      - show node state and sleep totals",
    ),
    (
        "help",
        "help [topic]                - show help for a command",
    ),
];

pub struct Session {
    node: SharedNode,
    controller: VirtualController,
    transcript: Option<TranscriptLogger>,
    telemetry_cursor: EventId,
}

impl Session {
    pub fn new(capabilities: Capabilities) -> Self {
        let node = node::shared_node();
        let controller = node::controller(&node, capabilities);
        Self {
            node,
            controller,
            transcript: None,
            telemetry_cursor: 0,
        }
    }

    /// Mirrors every command and response into `path`.
    pub fn with_transcript(mut self, path: &Path, header: &str) -> io::Result<Self> {
        self.transcript = Some(TranscriptLogger::create(path, header)?);
        Ok(self)
    }

    pub fn now_ms(&self) -> u32 {
        self.node.borrow().now_ms
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let started_at = self.now_ms();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(started_at, TranscriptRole::Host, trimmed)?;
        }

        let lines = match command::parse(trimmed) {
            Ok(Command::Sleep { duration_ms, smart }) => self.sleep(duration_ms, smart),
            Ok(Command::Repeater(enabled)) => {
                let mut capabilities = self.controller.capabilities();
                capabilities.repeater = enabled;
                self.controller.set_capabilities(capabilities);
                vec![format!("OK repeater {}", on_off(enabled))]
            }
            Ok(Command::Transport(link)) => self.transport(link),
            Ok(Command::Ota(active)) => {
                self.node.borrow_mut().ota_active = active;
                vec![format!("OK ota {}", on_off(active))]
            }
            Ok(Command::Stray(count)) => {
                self.node.borrow_mut().stray_pending = count;
                vec![format!("OK {count} stray interrupt(s) queued")]
            }
            Ok(Command::Status) => self.status(),
            Ok(Command::Help(topic)) => help(topic),
            Ok(Command::Exit) => vec!["Session closed.".to_string()],
            Err(err) => vec![format!("ERR syntax {err}")],
        };

        self.record_output(&lines)?;
        Ok(lines)
    }

    fn sleep(&mut self, duration_ms: u32, smart_sleep: bool) -> Vec<String> {
        let started_at = self.now_ms();
        let outcome = self.controller.request_sleep(SleepRequest {
            duration_ms,
            smart_sleep,
        });
        let elapsed = self.now_ms().wrapping_sub(started_at);

        let mut lines = self.node.borrow_mut().take_events();
        lines.push(format!(
            "OK sleep outcome={} code={} elapsed={elapsed}ms",
            outcome.label(),
            outcome.to_raw()
        ));

        let telemetry = self.controller.telemetry();
        for record in telemetry.since(self.telemetry_cursor) {
            lines.push(format!(
                "  telemetry #{} t={}ms {}",
                record.id, record.timestamp_ms, record.event
            ));
        }
        self.telemetry_cursor = telemetry.next_id();
        lines
    }

    fn transport(&mut self, link: LinkCommand) -> Vec<String> {
        let mut node = self.node.borrow_mut();
        match link {
            LinkCommand::Up => {
                node.link_up = true;
                node.link_up_at = None;
                vec!["OK transport up".to_string()]
            }
            LinkCommand::Down => {
                node.link_up = false;
                node.link_up_at = None;
                vec!["OK transport down".to_string()]
            }
            LinkCommand::After(delay_ms) => {
                let at = node.now_ms.wrapping_add(delay_ms);
                node.link_up = false;
                node.link_up_at = Some(at);
                vec![format!("OK transport up at t={at}ms")]
            }
        }
    }

    fn status(&self) -> Vec<String> {
        let capabilities = self.controller.capabilities();
        let stats = self.controller.telemetry().stats();
        let node = self.node.borrow();
        vec![
            format!(
                "node t={}ms repeater={} network={} firmware-update={}",
                node.now_ms,
                on_off(capabilities.repeater),
                on_off(capabilities.network),
                on_off(capabilities.firmware_update)
            ),
            format!(
                "link={} radio={} ota={} stray-pending={}",
                if node.link_ready() { "up" } else { "down" },
                on_off(node.radio_powered),
                on_off(node.ota_active),
                node.stray_pending
            ),
            format!(
                "wdt=0x{:02x} analog={} interrupts={}",
                node.wdt_control,
                on_off(node.analog_enabled),
                on_off(node.interrupts_enabled)
            ),
            format!(
                "requests={} timer-wakes={} refused={} cycles={} stray={} slept={}ms",
                stats.requests,
                stats.timer_wakes,
                stats.refusals,
                stats.power_down_cycles,
                stats.stray_wakes,
                stats.slept_ms
            ),
        ]
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let now = self.now_ms();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(now, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

const fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

struct TranscriptLogger {
    writer: BufWriter<fs::File>,
}

impl TranscriptLogger {
    fn create(path: &Path, header: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# {header}")?;
        writeln!(logger.writer, "# Timestamps are virtual node milliseconds")?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(&mut self, now_ms: u32, role: TranscriptRole, line: &str) -> io::Result<()> {
        writeln!(self.writer, "[+{now_ms:>8} ms] {} {line}", role.prefix())?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(session: &mut Session, line: &str) -> Vec<String> {
        session.handle_command(line).expect("in-memory session")
    }

    #[test]
    fn plain_sleep_reports_timer_wake() {
        let mut session = Session::new(Capabilities::sensor_node());
        let lines = run(&mut session, "sleep 20000");

        let summary = lines
            .iter()
            .find(|line| line.starts_with("OK sleep"))
            .expect("summary line");
        assert_eq!(summary, "OK sleep outcome=timer-wake code=-1 elapsed=20000ms");
        assert_eq!(
            lines
                .iter()
                .filter(|line| line.contains("wdt: expired"))
                .count(),
            6
        );
        assert!(lines.iter().any(|line| line.contains("radio: reinitialised")));
    }

    #[test]
    fn repeater_refuses_after_waiting() {
        let mut session = Session::new(Capabilities::sensor_node());
        run(&mut session, "repeater on");
        let lines = run(&mut session, "sleep 1500");

        assert!(lines.contains(&"OK sleep outcome=not-possible code=-2 elapsed=1500ms".to_string()));
        assert!(lines.iter().any(|line| line.ends_with("refused repeater")));
        assert_eq!(session.now_ms(), 1_500);
    }

    #[test]
    fn smart_sleep_announces_both_edges() {
        let mut session = Session::new(Capabilities::sensor_node());
        let lines = run(&mut session, "sleep 1000 smart");

        assert!(lines.iter().any(|line| line.contains("pre-sleep notice, listening 500 ms")));
        assert!(lines.iter().any(|line| line.contains("post-sleep notice, slept 1008 ms")));
    }

    #[test]
    fn late_link_shortens_the_power_down() {
        let mut session = Session::new(Capabilities::sensor_node());
        run(&mut session, "transport after 300");
        let lines = run(&mut session, "sleep 1000");

        assert!(lines.iter().any(|line| line.contains("transport-wait elapsed=300ms ready=true")));
        assert!(lines.iter().any(|line| line.contains("power-down budget=700ms")));
    }

    #[test]
    fn stray_interrupts_are_counted() {
        let mut session = Session::new(Capabilities::standalone());
        run(&mut session, "stray 2");
        run(&mut session, "sleep 16");

        let status = run(&mut session, "status");
        assert!(status[3].contains("stray=2"));
        assert!(status[3].contains("slept=16ms"));
        assert!(status[2].starts_with("wdt=0x00 analog=on interrupts=on"));
    }

    #[test]
    fn syntax_errors_are_reported() {
        let mut session = Session::new(Capabilities::sensor_node());
        let lines = run(&mut session, "sleep forever");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERR syntax"));
    }

    #[test]
    fn help_lists_topics() {
        let lines = help(Some("nope"));
        assert_eq!(
            lines[1],
            "Available topics: sleep, repeater, transport, ota, stray, status, help"
        );
        assert_eq!(help(None).len(), HELP_TOPICS.len() + 2);
    }
}
