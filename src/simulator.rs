//! In-memory stand-in for a switch, speaking the same command set.
//!
//! Powers up with every line grounded. Commands it does not understand, or
//! channel lists it cannot parse, are queued as instrument errors and
//! reported through `next?` / `all?` just like the hardware does.

use crate::channel_list::{self, Interval};
use crate::relay::{Relay, RelayState};
use crate::transport::Transport;
use std::collections::VecDeque;
use std::io;
use tracing::warn;

const NO_ERROR: &str = "0, \"No error\"";
const TAPS: u32 = 9;

pub struct Simulator {
    lines: u32,
    relays: RelayState,
    identity: String,
    auto_save: bool,
    error_indicator: bool,
    errors: VecDeque<String>,
    lingering: VecDeque<String>,
}

impl Simulator {
    pub fn new(lines: u32) -> Self {
        Self {
            lines,
            relays: Self::grounded(lines),
            identity: "Quantum Machines,QSwitch,2,0.1.2".to_string(),
            auto_save: false,
            error_indicator: true,
            errors: VecDeque::new(),
            lingering: VecDeque::new(),
        }
    }

    /// Replace the `*IDN?` answer.
    #[cfg(test)]
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    /// Replace the relay state the device reports.
    #[cfg(test)]
    pub fn with_state(mut self, relays: RelayState) -> Self {
        self.relays = relays;
        self
    }

    #[cfg(test)]
    pub fn relays(&self) -> &RelayState {
        &self.relays
    }

    fn grounded(lines: u32) -> RelayState {
        (1..=lines).map(|line| Relay::new(line, 0)).collect()
    }

    fn queue_error(&mut self, error: String) {
        warn!(error = %error, "simulated switch rejected command");
        self.errors.push_back(error);
    }

    fn parse_args(&mut self, args: &str) -> Option<RelayState> {
        let intervals = match channel_list::parse_intervals(args) {
            Ok(intervals) => intervals,
            Err(err) => {
                self.queue_error(format!("-100, \"Command error; {err}\""));
                return None;
            }
        };
        let lines = self.lines;
        if let Some(bad) = intervals
            .iter()
            .find(|i| i.start < 1 || i.end > lines || i.tap > TAPS)
        {
            self.queue_error(format!("-222, \"Data out of range; {bad}\""));
            return None;
        }
        Some(intervals.iter().flat_map(Interval::relays).collect())
    }

    fn on_off(&mut self, args: &str) -> Option<bool> {
        match args {
            "on" => Some(true),
            "off" => Some(false),
            _ => {
                self.queue_error(format!("-224, \"Illegal parameter value; {args}\""));
                None
            }
        }
    }

    fn on_off_str(value: bool) -> String {
        let text = if value { "on" } else { "off" };
        text.to_string()
    }

    /// Execute one command; queries return their response.
    fn execute(&mut self, cmd: &str) -> Option<String> {
        let (header, args) = cmd.split_once(' ').unwrap_or((cmd, ""));
        match header {
            "*IDN?" => Some(self.identity.clone()),
            "stat?" => Some(channel_list::to_compressed(&self.relays)),
            "clos" => {
                if let Some(state) = self.parse_args(args) {
                    self.relays = self.relays.union(&state);
                }
                None
            }
            "open" => {
                if let Some(state) = self.parse_args(args) {
                    self.relays = self.relays.difference(&state);
                }
                None
            }
            "*rst" => {
                self.relays = Self::grounded(self.lines);
                None
            }
            "abor" => None,
            "aut" => {
                if let Some(value) = self.on_off(args) {
                    self.auto_save = value;
                }
                None
            }
            "aut?" => Some(Self::on_off_str(self.auto_save)),
            "beep:stat" => {
                if let Some(value) = self.on_off(args) {
                    self.error_indicator = value;
                }
                None
            }
            "beep:stat?" => Some(Self::on_off_str(self.error_indicator)),
            "next?" => Some(self.errors.pop_front().unwrap_or_else(|| NO_ERROR.to_string())),
            "all?" => {
                if self.errors.is_empty() {
                    Some(NO_ERROR.to_string())
                } else {
                    let all: Vec<String> = self.errors.drain(..).collect();
                    Some(all.join(","))
                }
            }
            _ => {
                self.queue_error(format!("-113, \"Undefined header; {cmd}\""));
                None
            }
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(24)
    }
}

impl Transport for Simulator {
    fn write(&mut self, cmd: &str) -> io::Result<()> {
        if let Some(response) = self.execute(cmd) {
            self.lingering.push_back(response);
        }
        Ok(())
    }

    fn ask(&mut self, cmd: &str) -> io::Result<String> {
        self.execute(cmd).ok_or_else(|| {
            io::Error::new(io::ErrorKind::TimedOut, format!("no response to {cmd:?}"))
        })
    }

    fn clear_read_queue(&mut self) -> io::Result<Vec<String>> {
        Ok(self.lingering.drain(..).collect())
    }
}
