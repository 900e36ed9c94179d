use crate::assets::{AssetError, read_json};
use crate::error::AppError;
use crate::estimation::device::DeviceState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Devices seen recently enough to keep their history between batches.
///
/// Owns every [`DeviceState`] exclusively, keyed by MAC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkingSet {
    devices: HashMap<String, DeviceState>,
}

impl WorkingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains(&self, mac: &str) -> bool {
        self.devices.contains_key(mac)
    }

    pub fn get(&self, mac: &str) -> Option<&DeviceState> {
        self.devices.get(mac)
    }

    pub fn get_mut(&mut self, mac: &str) -> Option<&mut DeviceState> {
        self.devices.get_mut(mac)
    }

    /// Fetch the device, creating an empty history on first sight.
    pub fn device_mut(&mut self, mac: &str) -> &mut DeviceState {
        self.devices
            .entry(mac.to_string())
            .or_insert_with(|| DeviceState::new(mac))
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    /// Evict every device whose latest fix is older than `reference - retention_secs`.
    /// Returns the number of evicted devices.
    pub fn prune(&mut self, reference: i64, retention_secs: i64) -> usize {
        let before = self.devices.len();
        self.devices
            .retain(|_, device| device.is_recent(reference, retention_secs));
        before - self.devices.len()
    }

    /// Read a snapshot written by [`WorkingSet::persist`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let working_set: WorkingSet = read_json(path)?;
        for (mac, device) in &working_set.devices {
            if device.mac() != mac {
                return Err(AssetError::invalid(
                    path,
                    format!("device stored under {mac} reports mac {}", device.mac()),
                ));
            }
            if !device.is_consistent() {
                return Err(AssetError::invalid(
                    path,
                    format!("device {mac} has mismatched observation and weight counts"),
                ));
            }
        }
        Ok(working_set)
    }

    /// Replace the snapshot at `path`. Writes to a sibling temp file first so a
    /// failure never leaves a truncated snapshot behind.
    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        let write_err = |source| AppError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let encoded = serde_json::to_vec(self)?;
        let staging = staging_path(path);
        let result = fs::File::create(&staging)
            .and_then(|mut file| {
                file.write_all(&encoded)?;
                file.sync_all()
            })
            .and_then(|()| fs::rename(&staging, path));
        if let Err(err) = result {
            let _ = fs::remove_file(&staging);
            return Err(write_err(err));
        }
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
