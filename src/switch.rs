//! Reconciliation controller for one switch.
//!
//! The controller owns the last known relay state of the device. Requests to
//! change it are diffed against that cache and turned into at most two
//! commands, `clos` for newly closed relays followed by `open` for released
//! ones. The cache is replaced as a whole once the commands are delivered,
//! and left untouched when anything fails.
//!
//! One controller per device; calls are synchronous and must not overlap.

use crate::arrangement::Arrangement;
use crate::channel_list::{self, Interval};
use crate::diff::{StateDiff, diff};
use crate::error::{Result, SwitchError};
use crate::instrument::Identity;
use crate::relay::{Relay, RelayState};
use crate::transport::Transport;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const GROUND: u32 = 0;
pub const CONNECT: u32 = 9;

/// Device limits and timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchSettings {
    /// Lines are numbered `1..=lines`.
    pub lines: u32,
    /// Taps are numbered `0..=taps`.
    pub taps: u32,
    /// Time the device needs after `*rst`.
    pub reset_delay: Duration,
}

impl Default for SwitchSettings {
    fn default() -> Self {
        Self {
            lines: 24,
            taps: 9,
            reset_delay: Duration::from_secs(1),
        }
    }
}

impl SwitchSettings {
    /// Reject a relay this switch cannot address.
    pub fn check_relay(&self, relay: Relay) -> Result<()> {
        if relay.line < 1 || relay.line > self.lines || relay.tap > self.taps {
            return Err(SwitchError::RelayOutOfRange {
                relay,
                lines: self.lines,
                taps: self.taps,
            });
        }
        Ok(())
    }

    /// Check every range end of a channel list without expanding any range.
    pub fn check_channel_list(&self, text: &str) -> Result<Vec<Interval>> {
        let intervals = channel_list::parse_intervals(text)?;
        for interval in &intervals {
            self.check_relay(Relay::new(interval.start, interval.tap))?;
            self.check_relay(Relay::new(interval.end, interval.tap))?;
        }
        Ok(intervals)
    }

    /// Parse a channel list naming only relays this switch can address.
    pub fn parse_channel_list(&self, text: &str) -> Result<RelayState> {
        let intervals = self.check_channel_list(text)?;
        Ok(intervals.iter().flat_map(Interval::relays).collect())
    }
}

pub struct Switch<T> {
    transport: T,
    settings: SwitchSettings,
    arrangement: Arrangement,
    cache: RelayState,
    synchronized: bool,
}

impl<T: Transport> Switch<T> {
    /// Identify the device, check it is a compatible switch, and read its state.
    pub fn open(transport: T, settings: SwitchSettings) -> Result<Self> {
        let mut switch = Self::unsynchronized(transport, settings);
        let identity = switch.identify()?;
        identity.check_model()?;
        identity.check_firmware()?;
        info!(
            vendor = %identity.vendor,
            serial = %identity.serial,
            firmware = %identity.firmware,
            "connected to {}",
            identity.model
        );
        switch.force_refresh()?;
        Ok(switch)
    }

    /// A controller that has not read the device yet; its cache reads as empty.
    pub fn unsynchronized(transport: T, settings: SwitchSettings) -> Self {
        Self {
            transport,
            settings,
            arrangement: Arrangement::default(),
            cache: RelayState::new(),
            synchronized: false,
        }
    }

    pub fn identify(&mut self) -> Result<Identity> {
        let response = self.transport.ask("*IDN?")?;
        Identity::parse(&response)
    }

    /// Replace the cache with the state the device reports.
    pub fn force_refresh(&mut self) -> Result<()> {
        let response = self.transport.ask("stat?")?;
        let live = self.settings.parse_channel_list(&response)?;
        info!(state = %channel_list::to_compressed(&live), "relay state refreshed");
        self.cache = live;
        self.synchronized = true;
        Ok(())
    }

    pub fn settings(&self) -> &SwitchSettings {
        &self.settings
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Cached relay state. Does not touch the device.
    pub fn relays(&self) -> &RelayState {
        &self.cache
    }

    /// Cached relay state as a compressed channel list.
    pub fn state(&self) -> String {
        channel_list::to_compressed(&self.cache)
    }

    /// Drive the device to exactly `target`.
    pub fn set_state(&mut self, target: RelayState) -> Result<StateDiff> {
        self.check_addressable(&target)?;

        let d = diff(&self.cache, &target);
        if d.is_empty() {
            debug!("already in target state");
            return Ok(d);
        }
        let close = (!d.to_close.is_empty())
            .then(|| format!("clos {}", channel_list::to_compressed(&d.to_close)));
        let open = (!d.to_open.is_empty())
            .then(|| format!("open {}", channel_list::to_compressed(&d.to_open)));
        debug!(close = d.to_close.len(), open = d.to_open.len(), "state diff");

        for cmd in close.iter().chain(open.iter()) {
            if let Err(err) = self.transport.write(cmd) {
                warn!("`{}` failed; refresh before trusting the cached state", cmd);
                self.synchronized = false;
                return Err(err.into());
            }
        }

        self.cache = d.total.clone();
        Ok(d)
    }

    /// Parse a channel list and drive the device to it.
    pub fn set_state_str(&mut self, channel_list: &str) -> Result<StateDiff> {
        let target = self.settings.parse_channel_list(channel_list)?;
        self.set_state(target)
    }

    /// Close `relays` in addition to the cached state.
    pub fn close_relays(&mut self, relays: &RelayState) -> Result<StateDiff> {
        let target = self.cache.union(relays);
        self.set_state(target)
    }

    /// Open `relays`, keeping the rest of the cached state.
    pub fn open_relays(&mut self, relays: &RelayState) -> Result<StateDiff> {
        let target = self.cache.difference(relays);
        self.set_state(target)
    }

    pub fn close_relay(&mut self, line: u32, tap: u32) -> Result<StateDiff> {
        self.close_relays(&RelayState::from_relays([Relay::new(line, tap)]))
    }

    pub fn open_relay(&mut self, line: u32, tap: u32) -> Result<StateDiff> {
        self.open_relays(&RelayState::from_relays([Relay::new(line, tap)]))
    }

    pub fn arrange(&mut self, arrangement: Arrangement) {
        self.arrangement = arrangement;
    }

    pub fn ground<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<StateDiff> {
        let relays = self.relays_at(lines, GROUND)?;
        self.close_relays(&relays)
    }

    pub fn unground<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<StateDiff> {
        let relays = self.relays_at(lines, GROUND)?;
        self.open_relays(&relays)
    }

    pub fn connect<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<StateDiff> {
        let relays = self.relays_at(lines, CONNECT)?;
        self.close_relays(&relays)
    }

    pub fn disconnect<S: AsRef<str>>(&mut self, lines: &[S]) -> Result<StateDiff> {
        let relays = self.relays_at(lines, CONNECT)?;
        self.open_relays(&relays)
    }

    pub fn break_out(&mut self, line: &str, tap: &str) -> Result<StateDiff> {
        let line = self.arrangement.line(line)?;
        let tap = self.arrangement.tap(tap)?;
        self.close_relay(line, tap)
    }

    pub fn unbreak_out(&mut self, line: &str, tap: &str) -> Result<StateDiff> {
        let line = self.arrangement.line(line)?;
        let tap = self.arrangement.tap(tap)?;
        self.open_relay(line, tap)
    }

    /// Reset the device, wait for it to come back, and re-read its state.
    pub fn reset(&mut self) -> Result<()> {
        self.transport.write("*rst")?;
        std::thread::sleep(self.settings.reset_delay);
        self.force_refresh()
    }

    pub fn abort(&mut self) -> Result<()> {
        Ok(self.transport.write("abor")?)
    }

    /// Retrieve and clear all queued device errors.
    pub fn errors(&mut self) -> Result<String> {
        Ok(self.transport.ask("all?")?)
    }

    /// Retrieve the next queued device error.
    pub fn error(&mut self) -> Result<String> {
        Ok(self.transport.ask("next?")?)
    }

    pub fn auto_save(&mut self) -> Result<bool> {
        self.ask_on_off("aut?")
    }

    pub fn set_auto_save(&mut self, on: bool) -> Result<()> {
        Ok(self.transport.write(&format!("aut {}", on_off(on)))?)
    }

    pub fn error_indicator(&mut self) -> Result<bool> {
        self.ask_on_off("beep:stat?")
    }

    pub fn set_error_indicator(&mut self, on: bool) -> Result<()> {
        Ok(self.transport.write(&format!("beep:stat {}", on_off(on)))?)
    }

    /// Responses nobody asked for.
    pub fn clear_read_queue(&mut self) -> Result<Vec<String>> {
        Ok(self.transport.clear_read_queue()?)
    }

    #[cfg(test)]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[cfg(test)]
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn ask_on_off(&mut self, query: &str) -> Result<bool> {
        let response = self.transport.ask(query)?;
        match response.as_str() {
            "on" => Ok(true),
            "off" => Ok(false),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("expected on/off from {query}, got {response:?}"),
            )
            .into()),
        }
    }

    fn relays_at<S: AsRef<str>>(&self, lines: &[S], tap: u32) -> Result<RelayState> {
        let lines = self.arrangement.resolve_lines(lines)?;
        Ok(lines.into_iter().map(|line| Relay::new(line, tap)).collect())
    }

    fn check_addressable(&self, target: &RelayState) -> Result<()> {
        target.iter().try_for_each(|relay| self.settings.check_relay(*relay))
    }
}

pub fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::Simulator;
    use crate::transport::Recorder;
    use pretty_assertions::assert_eq;
    use std::io;

    fn settings() -> SwitchSettings {
        SwitchSettings {
            reset_delay: Duration::ZERO,
            ..SwitchSettings::default()
        }
    }

    /// A freshly opened switch, all lines grounded, recording commands.
    fn qswitch() -> Switch<Recorder<Simulator>> {
        let mut switch = Switch::open(Recorder::new(Simulator::default()), settings()).unwrap();
        switch.transport_mut().start_recording();
        switch
    }

    fn recorded(switch: &mut Switch<Recorder<Simulator>>) -> Vec<String> {
        switch.transport_mut().take_recorded()
    }

    fn assert_no_lingering(switch: &mut Switch<Recorder<Simulator>>) {
        assert!(switch.clear_read_queue().unwrap().is_empty());
    }

    fn mixed_target() -> RelayState {
        RelayState::from_pairs(&[(24, 8), (24, 8), (22, 7), (20, 6), (1, 9), (2, 0)])
    }

    #[test]
    fn cached_state_can_be_updated() {
        let mut switch = qswitch();
        switch.force_refresh().unwrap();
        assert_eq!(recorded(&mut switch), vec!["stat?".to_string()]);
    }

    #[test]
    fn get_state_does_not_touch_the_device() {
        let mut switch = qswitch();
        let state = switch.state();
        assert!(recorded(&mut switch).is_empty());
        assert_eq!(state, "(@1!0:24!0)");
    }

    #[test]
    fn set_state_changes_the_state() {
        let mut switch = qswitch();
        switch.set_state(mixed_target()).unwrap();
        assert_eq!(switch.state(), "(@2!0,20!6,22!7,24!8,1!9)");
        assert_eq!(switch.relays(), &mixed_target());
        assert_eq!(switch.transport().inner().relays(), &mixed_target());
    }

    #[test]
    fn set_state_only_sends_diff() {
        let mut switch = qswitch();
        switch.set_state(mixed_target()).unwrap();
        assert_eq!(
            recorded(&mut switch),
            vec![
                "clos (@20!6,22!7,24!8,1!9)".to_string(),
                "open (@1!0,3!0:24!0)".to_string(),
            ]
        );
        assert_no_lingering(&mut switch);
    }

    #[test]
    fn set_state_ignores_empty_diff() {
        let mut switch = qswitch();
        switch.set_state(mixed_target()).unwrap();
        switch.transport_mut().start_recording();

        let d = switch.set_state(mixed_target()).unwrap();
        assert!(d.is_empty());
        assert!(recorded(&mut switch).is_empty());
    }

    #[test]
    fn states_are_sanitised() {
        let mut switch = qswitch();
        switch
            .set_state(RelayState::from_pairs(&[(24, 8), (22, 7), (20, 6), (1, 9), (2, 0), (24, 8), (20, 6)]))
            .unwrap();
        assert_eq!(
            switch.relays().to_pairs(),
            vec![(1, 9), (2, 0), (20, 6), (22, 7), (24, 8)]
        );
    }

    #[test]
    fn set_state_from_channel_list() {
        let mut switch = qswitch();
        switch.set_state_str("(@1!0:23!0)").unwrap();
        assert_eq!(recorded(&mut switch), vec!["open (@24!0)".to_string()]);
    }

    #[test]
    fn malformed_channel_list_sends_nothing() {
        let mut switch = qswitch();
        let err = switch.set_state_str("(@1!0:3!1)").unwrap_err();
        assert!(matches!(
            err,
            SwitchError::Format(channel_list::FormatError::InconsistentRange(_))
        ));
        assert!(recorded(&mut switch).is_empty());
        assert_eq!(switch.state(), "(@1!0:24!0)");
    }

    #[test]
    fn out_of_range_target_sends_nothing() {
        let mut switch = qswitch();
        for pair in [(25, 0), (0, 0), (3, 10)] {
            let err = switch.close_relay(pair.0, pair.1).unwrap_err();
            assert!(matches!(err, SwitchError::RelayOutOfRange { .. }), "{pair:?}");
        }
        assert!(recorded(&mut switch).is_empty());
        assert_eq!(switch.state(), "(@1!0:24!0)");
    }

    #[test]
    fn oversized_ranges_are_rejected_before_expansion() {
        let mut switch = qswitch();
        let err = switch.set_state_str("(@1!0:30000000!0)").unwrap_err();
        assert!(matches!(
            err,
            SwitchError::RelayOutOfRange { relay, lines: 24, taps: 9 } if relay == Relay::new(30000000, 0)
        ));
        for list in ["(@1!0:4294967295!0)", "(@0!0:3!0)", "(@1!10:2!10)"] {
            let err = switch.set_state_str(list).unwrap_err();
            assert!(matches!(err, SwitchError::RelayOutOfRange { .. }), "{list}");
        }
        assert!(recorded(&mut switch).is_empty());
        assert_eq!(switch.state(), "(@1!0:24!0)");
    }

    #[test]
    fn settings_parse_only_addressable_channel_lists() {
        let settings = settings();
        assert_eq!(
            settings.parse_channel_list("(@1!0:3!0,24!9)").unwrap().to_pairs(),
            vec![(1, 0), (2, 0), (3, 0), (24, 9)]
        );
        assert_eq!(
            settings.check_channel_list("(@5!1:7!1)").unwrap(),
            vec![Interval { start: 5, tap: 1, end: 7 }]
        );
        assert!(matches!(
            settings.parse_channel_list("(@23!0:25!0)"),
            Err(SwitchError::RelayOutOfRange { .. })
        ));
        assert!(matches!(
            settings.parse_channel_list("(@1!0"),
            Err(SwitchError::Format(_))
        ));
    }

    #[test]
    fn individual_relays_can_be_closed() {
        let mut switch = qswitch();
        switch
            .close_relays(&RelayState::from_pairs(&[(14, 1), (22, 7)]))
            .unwrap();
        assert_eq!(recorded(&mut switch), vec!["clos (@14!1,22!7)".to_string()]);
    }

    #[test]
    fn individual_relay_can_be_closed() {
        let mut switch = qswitch();
        switch.close_relay(22, 7).unwrap();
        assert_eq!(recorded(&mut switch), vec!["clos (@22!7)".to_string()]);
    }

    #[test]
    fn individual_relays_can_be_opened() {
        let mut switch = qswitch();
        switch
            .open_relays(&RelayState::from_pairs(&[(14, 0), (22, 0), (1, 1)]))
            .unwrap();
        assert_eq!(recorded(&mut switch), vec!["open (@14!0,22!0)".to_string()]);
    }

    #[test]
    fn individual_relay_can_be_opened() {
        let mut switch = qswitch();
        switch.open_relay(14, 0).unwrap();
        assert_eq!(recorded(&mut switch), vec!["open (@14!0)".to_string()]);
    }

    #[test]
    fn close_and_open_work_from_the_cache_not_the_device() {
        let mut switch = qswitch();
        switch.close_relay(5, 9).unwrap();
        switch.open_relay(5, 0).unwrap();
        assert_eq!(
            recorded(&mut switch),
            vec!["clos (@5!9)".to_string(), "open (@5!0)".to_string()]
        );
    }

    #[test]
    fn ground_and_unground_by_name() {
        let mut switch = qswitch();
        switch.unground(&["15"]).unwrap();
        switch.ground(&["15"]).unwrap();
        switch.unground(&["15", "14"]).unwrap();
        switch.ground(&["15", "14"]).unwrap();
        assert_eq!(
            recorded(&mut switch),
            vec![
                "open (@15!0)".to_string(),
                "clos (@15!0)".to_string(),
                "open (@14!0:15!0)".to_string(),
                "clos (@14!0:15!0)".to_string(),
            ]
        );
    }

    #[test]
    fn connect_and_disconnect_by_name() {
        let mut switch = qswitch();
        switch.connect(&["15"]).unwrap();
        switch.disconnect(&["15"]).unwrap();
        switch.connect(&["15", "14"]).unwrap();
        switch.disconnect(&["15", "14"]).unwrap();
        assert_eq!(
            recorded(&mut switch),
            vec![
                "clos (@15!9)".to_string(),
                "open (@15!9)".to_string(),
                "clos (@14!9:15!9)".to_string(),
                "open (@14!9:15!9)".to_string(),
            ]
        );
    }

    #[test]
    fn break_out_and_back() {
        let mut switch = qswitch();
        switch.break_out("22", "7").unwrap();
        switch.unbreak_out("22", "7").unwrap();
        assert_eq!(
            recorded(&mut switch),
            vec!["clos (@22!7)".to_string(), "open (@22!7)".to_string()]
        );
    }

    #[test]
    fn arrangement_gives_names_to_connections() {
        let mut switch = qswitch();
        switch.arrange(Arrangement::new(&[("plunger", 14), ("sensor", 3)], &[("DMM", 2), ("VNA", 1)]));
        switch.break_out("plunger", "VNA").unwrap();
        switch.unground(&["sensor"]).unwrap();
        assert_eq!(
            recorded(&mut switch),
            vec!["clos (@14!1)".to_string(), "open (@3!0)".to_string()]
        );
    }

    #[test]
    fn unknown_names_give_errors() {
        let mut switch = qswitch();
        let err = switch.break_out("plunger", "1").unwrap_err();
        assert!(err.to_string().contains("Unknown line"));
        let err = switch.break_out("1", "VNA").unwrap_err();
        assert!(err.to_string().contains("Unknown tap"));
        assert!(recorded(&mut switch).is_empty());
    }

    #[test]
    fn instrument_wide_commands() {
        let mut switch = qswitch();
        switch.close_relay(3, 9).unwrap();
        switch.abort().unwrap();
        switch.reset().unwrap();
        assert_eq!(
            recorded(&mut switch),
            vec![
                "clos (@3!9)".to_string(),
                "abor".to_string(),
                "*rst".to_string(),
                "stat?".to_string(),
            ]
        );
        assert_eq!(switch.state(), "(@1!0:24!0)");
        assert_eq!(switch.errors().unwrap(), "0, \"No error\"");
        assert_eq!(switch.error().unwrap(), "0, \"No error\"");
    }

    #[test]
    fn settings_can_be_read_back() {
        let mut switch = qswitch();
        switch.set_auto_save(true).unwrap();
        switch.set_error_indicator(false).unwrap();
        assert!(switch.auto_save().unwrap());
        assert!(!switch.error_indicator().unwrap());
        assert_eq!(
            recorded(&mut switch),
            vec![
                "aut on".to_string(),
                "beep:stat off".to_string(),
                "aut?".to_string(),
                "beep:stat?".to_string(),
            ]
        );
    }

    #[test]
    fn open_rejects_other_instruments() {
        let sim = Simulator::default().with_identity("Quantum Machines,QDAC-II,2,0.1.2");
        assert!(matches!(
            Switch::open(sim, settings()),
            Err(SwitchError::WrongModel(_))
        ));

        let sim = Simulator::default().with_identity("Quantum Machines,QSwitch,2,0.0.3");
        assert!(matches!(
            Switch::open(sim, settings()),
            Err(SwitchError::IncompatibleFirmware { .. })
        ));
    }

    #[test]
    fn open_reads_the_live_state() {
        let live = RelayState::from_pairs(&[(3, 0), (4, 9), (5, 9)]);
        let sim = Simulator::default().with_state(live.clone());
        let mut switch = Switch::open(Recorder::new(sim), settings()).unwrap();
        assert!(switch.is_synchronized());
        assert_eq!(switch.state(), "(@3!0,4!9:5!9)");

        switch.transport_mut().start_recording();
        switch.set_state(live).unwrap();
        assert!(recorded(&mut switch).is_empty());
    }

    #[test]
    fn unsynchronized_cache_reads_empty() {
        let switch = Switch::unsynchronized(Simulator::default(), settings());
        assert!(!switch.is_synchronized());
        assert_eq!(switch.state(), "(@)");
    }

    /// Transport answering `stat?` with a fixed line.
    struct FixedStatus(&'static str);

    impl Transport for FixedStatus {
        fn write(&mut self, _cmd: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"))
        }

        fn ask(&mut self, _cmd: &str) -> io::Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn failed_refresh_leaves_cache_and_state_machine_alone() {
        let mut switch = Switch::unsynchronized(FixedStatus("(@1!0:3!1)"), settings());
        assert!(matches!(switch.force_refresh(), Err(SwitchError::Format(_))));
        assert!(!switch.is_synchronized());
        assert!(switch.relays().is_empty());

        let mut switch = Switch::unsynchronized(FixedStatus("(@1!0:2!0)"), settings());
        switch.force_refresh().unwrap();
        switch.transport_mut().0 = "garbage";
        assert!(switch.force_refresh().is_err());
        assert!(switch.is_synchronized());
        assert_eq!(switch.state(), "(@1!0:2!0)");
    }

    #[test]
    fn failed_send_leaves_cache_alone() {
        let mut switch = Switch::unsynchronized(FixedStatus("(@1!0:2!0)"), settings());
        switch.force_refresh().unwrap();
        assert!(matches!(switch.close_relay(5, 9), Err(SwitchError::Io(_))));
        assert_eq!(switch.state(), "(@1!0:2!0)");
        assert!(!switch.is_synchronized());
    }

    /// Simulated switch whose link drops every `open` command.
    struct DropsOpen(Simulator);

    impl Transport for DropsOpen {
        fn write(&mut self, cmd: &str) -> io::Result<()> {
            if cmd.starts_with("open ") {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link down"));
            }
            self.0.write(cmd)
        }

        fn ask(&mut self, cmd: &str) -> io::Result<String> {
            self.0.ask(cmd)
        }
    }

    #[test]
    fn failed_open_after_close_desynchronizes() {
        let mut switch = Switch::open(DropsOpen(Simulator::default()), settings()).unwrap();
        let err = switch.set_state_str("(@1!0,5!9)").unwrap_err();
        assert!(matches!(err, SwitchError::Io(_)));
        assert!(!switch.is_synchronized());
        assert_eq!(switch.state(), "(@1!0:24!0)");

        // The close went through; a refresh shows what the device really did.
        switch.force_refresh().unwrap();
        assert!(switch.is_synchronized());
        assert_eq!(switch.state(), "(@1!0:24!0,5!9)");
    }
}
