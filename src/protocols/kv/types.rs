use std::fmt;
use std::path::PathBuf;

/// Name of one updatable target as announced by the update server.
///
/// Always trimmed and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(name: impl AsRef<str>) -> Option<Self> {
        let name = name.as_ref().trim();
        if name.is_empty() {
            None
        } else {
            Some(Self(name.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DeviceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Splits a comma separated list, trimming each element and dropping
/// empty ones.
pub fn parse_list(value: &str) -> Vec<DeviceId> {
    value.split(',').filter_map(DeviceId::new).collect()
}

pub fn join_list<T: AsRef<str>>(items: &[T]) -> String {
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(",")
}

/// Fields recognized in one inbound frame.
///
/// `None` means the key did not appear in the frame, which is different
/// from a key with an empty list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundFrame {
    pub devices: Option<Vec<DeviceId>>,
    pub updated: Option<Vec<DeviceId>>,
    /// Non-blank lines without `=` or with an unknown key.
    pub ignored_lines: usize,
}

impl InboundFrame {
    pub fn has_content(&self) -> bool {
        self.devices.is_some() || self.updated.is_some()
    }
}

/// One outbound `key=value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    UpdateDevices(Vec<DeviceId>),
    FirmwareM0(PathBuf),
    FirmwareM4(PathBuf),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::UpdateDevices(targets) => write!(f, "update_devices={}", join_list(targets)),
            Command::FirmwareM0(path) => write!(f, "fw_m0={}", path.display()),
            Command::FirmwareM4(path) => write!(f, "fw_m4={}", path.display()),
        }
    }
}

/// Firmware artifacts for the two slots. Only the paths travel over the
/// wire, the server reads the files itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareSet {
    pub m0: Option<PathBuf>,
    pub m4: PathBuf,
}

impl FirmwareSet {
    pub fn new(m4: impl Into<PathBuf>) -> Self {
        Self { m0: None, m4: m4.into() }
    }

    pub fn with_m0(mut self, m0: impl Into<PathBuf>) -> Self {
        self.m0 = Some(m0.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub targets: Vec<DeviceId>,
    pub firmware: FirmwareSet,
}

impl UpdateRequest {
    pub fn new(targets: Vec<DeviceId>, firmware: FirmwareSet) -> Self {
        Self { targets, firmware }
    }

    pub fn commands(&self) -> Vec<Command> {
        let mut commands = vec![Command::UpdateDevices(self.targets.clone())];
        if let Some(m0) = &self.firmware.m0 {
            commands.push(Command::FirmwareM0(m0.clone()));
        }
        commands.push(Command::FirmwareM4(self.firmware.m4.clone()));
        commands
    }
}
