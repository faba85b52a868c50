//! Mapping of target names to firmware files.
//!
//! A target config has one target per line with whitespace separated
//! fields: the firmware file is the first field and the target name the
//! fourth. Only the two well known targets end up in the update request.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::protocols::kv::FirmwareSet;

pub const PRIMARY_TARGET: &str = "43xx_m0";
pub const SECONDARY_TARGET: &str = "43xx_m4";

const FILE_FIELD: usize = 0;
const TARGET_FIELD: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetMap {
    entries: BTreeMap<String, PathBuf>,
}

impl TargetMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping used when both firmware files are given directly.
    pub fn from_firmware(primary: impl Into<PathBuf>, secondary: impl Into<PathBuf>) -> Self {
        Self::new()
            .with_target(PRIMARY_TARGET, primary)
            .with_target(SECONDARY_TARGET, secondary)
    }

    pub fn with_target(mut self, target: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        self.entries.insert(target.into(), file.into());
        self
    }

    /// Parses config text. Later lines override earlier ones for the same
    /// target; lines with too few fields are skipped.
    pub fn parse(text: &str) -> Self {
        let mut map = Self::new();
        for (n, line) in text.lines().enumerate() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.is_empty() {
                continue;
            }
            if fields.len() <= TARGET_FIELD {
                let expected = TARGET_FIELD + 1;
                warn!("Skipping config line {}: expected at least {} fields", n + 1, expected);
                continue;
            }

            debug!("Target {} -> {}", fields[TARGET_FIELD], fields[FILE_FIELD]);
            map.entries
                .insert(fields[TARGET_FIELD].to_owned(), PathBuf::from(fields[FILE_FIELD]));
        }
        map
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "failed to open config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let map = Self::parse(&text);
        if map.is_empty() {
            return Err(Error::Configuration(format!(
                "no valid target(s) found in config file '{}'",
                path.display()
            )));
        }
        Ok(map)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, target: &str) -> Option<&Path> {
        self.entries.get(target).map(PathBuf::as_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// Checks that every mapped file exists and picks the two firmware
    /// slots. The secondary slot is required.
    pub fn firmware_set(&self) -> Result<FirmwareSet> {
        for (_, file) in self.iter() {
            if !file.is_file() {
                return Err(Error::NotAFile(file.to_path_buf()));
            }
        }

        let m4 = self
            .get(SECONDARY_TARGET)
            .ok_or_else(|| Error::NoFirmwareFile(SECONDARY_TARGET.to_owned()))?;

        Ok(FirmwareSet {
            m0: self.get(PRIMARY_TARGET).map(Path::to_path_buf),
            m4: m4.to_path_buf(),
        })
    }
}
