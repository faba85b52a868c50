use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use crate::error::Error;
use crate::protocols::kv::{DeviceId, InboundFrame};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub device_list_timeout: Duration,
    pub result_base_timeout: Duration,
    pub result_per_device_timeout: Duration,
    pub max_frame_size: usize,
}

/// Last known lists, replaced wholesale by each frame that carries them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub devices: Vec<DeviceId>,
    pub updated: Vec<DeviceId>,
}

impl SessionState {
    pub fn apply(mut self, frame: InboundFrame) -> Self {
        if let Some(devices) = frame.devices {
            self.devices = devices;
        }
        if let Some(updated) = frame.updated {
            self.updated = updated;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    /// The TCP connect itself happens in `run_upload_with`, which maps a
    /// failed connect to `Outcome::from_connect_error`. A session starts
    /// here with the stream already connected.
    Connecting,
    AwaitingDeviceList(SessionState),
    SelectingTargets(SessionState),
    AwaitingUpdateResult {
        state: SessionState,
        targets: Vec<DeviceId>,
    },
    Reporting(SessionState),
    Terminal(Outcome),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Terminal(_))
    }

    /// Which bounded wait this phase performs, if any.
    pub fn waiting(&self) -> Option<Waiting> {
        match self {
            Phase::AwaitingDeviceList(_) => Some(Waiting::DeviceList),
            Phase::AwaitingUpdateResult { .. } => Some(Waiting::UpdateResult),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waiting {
    DeviceList,
    UpdateResult,
}

impl fmt::Display for Waiting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Waiting::DeviceList => f.write_str("device list"),
            Waiting::UpdateResult => f.write_str("update result"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Connection refused, nothing was exchanged.
    ServerUnavailable,
    /// No frame arrived within the bound for the given wait.
    NoResponse(Waiting),
    /// The server announced an empty device list, no command was sent.
    NoDevices,
    /// Devices were available but none was selected.
    NothingToDo,
    /// The connect failed for a reason other than a refusal.
    ConnectFailed(String),
    /// Transport failure other than a refused connection or a timeout.
    ConnectionLost(String),
    /// The session could not be set up, nothing was exchanged.
    InvalidConfiguration(String),
    Completed(Report),
}

impl Outcome {
    pub fn from_error(err: Error, waiting: Option<Waiting>) -> Self {
        match (err, waiting) {
            (Error::Timeout | Error::ConnectionClosed, Some(waiting)) => {
                Outcome::NoResponse(waiting)
            }
            (Error::Io(e), _) if e.kind() == ErrorKind::ConnectionRefused => {
                Outcome::ServerUnavailable
            }
            (Error::Configuration(reason), _) => Outcome::InvalidConfiguration(reason),
            (err, _) => Outcome::ConnectionLost(err.to_string()),
        }
    }

    /// Maps an error raised while opening the connection.
    pub fn from_connect_error(err: Error) -> Self {
        match err {
            Error::Io(e) if e.kind() == ErrorKind::ConnectionRefused => Outcome::ServerUnavailable,
            err => Outcome::ConnectFailed(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed(report) if report.is_success())
    }

    pub fn report(&self) -> Option<&Report> {
        match self {
            Outcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::ServerUnavailable => f.write_str("ERROR: Update server not running!"),
            Outcome::NoResponse(waiting) => write!(f, "ERROR: timeout waiting for {}", waiting),
            Outcome::NoDevices => f.write_str(NO_DEVICES),
            Outcome::NothingToDo => f.write_str("Nothing to do: no device selected for update"),
            Outcome::ConnectFailed(reason) => write!(f, "ERROR: failed to connect: {}", reason),
            Outcome::ConnectionLost(reason) => write!(f, "ERROR: connection lost: {}", reason),
            Outcome::InvalidConfiguration(reason) => write!(f, "ERROR: {}", reason),
            Outcome::Completed(report) => fmt::Display::fmt(report, f),
        }
    }
}

const NO_DEVICES: &str = "ERROR: No device(s) available for update!";

/// Requested versus confirmed devices after the update result arrived.
///
/// A device missing from `updated` may have failed or the response may
/// have been truncated; the protocol does not tell these apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub devices: Vec<DeviceId>,
    pub updated: Vec<DeviceId>,
    pub failures: Vec<DeviceId>,
}

impl Report {
    pub fn new(state: SessionState) -> Self {
        let failures = state
            .devices
            .iter()
            .filter(|dev| !state.updated.contains(dev))
            .cloned()
            .collect();

        Self {
            devices: state.devices,
            updated: state.updated,
            failures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.devices.is_empty()
    }

    /// Device list left for a retry pass.
    pub fn retained_devices(&self) -> &[DeviceId] {
        &self.failures
    }

    /// Confirmed devices that were never announced.
    pub fn unexpected(&self) -> Vec<&DeviceId> {
        self.updated
            .iter()
            .filter(|dev| !self.devices.contains(dev))
            .collect()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.failures.is_empty() {
            writeln!(f, "ERROR: Failed to update these devices:")?;
            write_devices(f, &self.failures)
        } else if !self.devices.is_empty() {
            f.write_str("SUCCESS: All devices updated")
        } else {
            f.write_str(NO_DEVICES)
        }
    }
}

pub(crate) fn write_devices(f: &mut impl fmt::Write, devices: &[DeviceId]) -> fmt::Result {
    for dev in devices {
        writeln!(f, "\t{}", dev)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<DeviceId> {
        names.iter().filter_map(DeviceId::new).collect()
    }

    fn state(devices: &[&str], updated: &[&str]) -> SessionState {
        SessionState {
            devices: ids(devices),
            updated: ids(updated),
        }
    }

    #[test]
    fn failures_keep_device_list_order() {
        let report = Report::new(state(&["d3", "d1", "d2", "d4"], &["d2", "d3"]));
        assert_eq!(report.failures, ids(&["d1", "d4"]));
        assert!(!report.is_success());
        assert_eq!(report.retained_devices(), ids(&["d1", "d4"]).as_slice());
    }

    #[test]
    fn superset_of_updated_is_success() {
        let report = Report::new(state(&["a", "b"], &["b", "a", "c"]));
        assert!(report.failures.is_empty());
        assert!(report.is_success());
        assert_eq!(report.unexpected(), vec![&ids(&["c"])[0]]);
        assert_eq!(report.to_string(), "SUCCESS: All devices updated");
    }

    #[test]
    fn empty_device_list_is_not_success() {
        let report = Report::new(state(&[], &["a"]));
        assert!(!report.is_success());
        assert_eq!(report.to_string(), NO_DEVICES);
    }

    #[test]
    fn failure_report_lists_devices() {
        let report = Report::new(state(&["dev1", "dev2", "dev3"], &["dev1", "dev3"]));
        assert_eq!(report.to_string(), "ERROR: Failed to update these devices:\n\tdev2\n");
    }

    #[test]
    fn apply_replaces_only_present_fields() {
        let base = state(&["a"], &["a"]);
        let next = base.apply(InboundFrame {
            devices: Some(ids(&["b", "c"])),
            updated: None,
            ignored_lines: 0,
        });
        assert_eq!(next, state(&["b", "c"], &["a"]));

        let next = next.apply(InboundFrame::default());
        assert_eq!(next, state(&["b", "c"], &["a"]));
    }

    #[test]
    fn refused_connection_maps_to_server_unavailable() {
        let err = Error::Io(std::io::Error::from(ErrorKind::ConnectionRefused));
        assert_eq!(Outcome::from_error(err, None), Outcome::ServerUnavailable);
    }

    #[test]
    fn connect_errors_never_report_lost_connection() {
        let refused = Error::Io(std::io::Error::from(ErrorKind::ConnectionRefused));
        assert_eq!(Outcome::from_connect_error(refused), Outcome::ServerUnavailable);

        let lookup = Error::Io(std::io::Error::new(
            ErrorKind::Other,
            "failed to lookup address information",
        ));
        let outcome = Outcome::from_connect_error(lookup);
        assert!(matches!(outcome, Outcome::ConnectFailed(_)));
        assert!(outcome.to_string().starts_with("ERROR: failed to connect: "));
    }

    #[test]
    fn terminal_phase() {
        assert!(Phase::Terminal(Outcome::NoDevices).is_terminal());
        assert!(!Phase::Connecting.is_terminal());
    }

    #[test]
    fn timeout_maps_to_no_response() {
        assert_eq!(
            Outcome::from_error(Error::Timeout, Some(Waiting::UpdateResult)),
            Outcome::NoResponse(Waiting::UpdateResult)
        );
        assert_eq!(
            Outcome::from_error(Error::ConnectionClosed, Some(Waiting::DeviceList)),
            Outcome::NoResponse(Waiting::DeviceList)
        );
    }
}
