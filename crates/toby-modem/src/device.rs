//! Device node presence, used to notice the modem dropping off the USB bus
//! and coming back after a restart.

use std::io::ErrorKind;
use std::path::PathBuf;

pub trait DevicePresence: Send + Sync {
    fn is_present(&self) -> bool;
}

/// Presence of a device node on the filesystem.
#[derive(Debug, Clone)]
pub struct DevicePath(PathBuf);

impl DevicePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DevicePath(path.into())
    }
}

impl DevicePresence for DevicePath {
    /// Only a missing node counts as absent; a node that cannot be
    /// inspected is assumed to still be there.
    fn is_present(&self) -> bool {
        match std::fs::metadata(&self.0) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                tracing::debug!(path = %self.0.display(), error = %e, "cannot inspect device node");
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_file_existence() {
        let path = std::env::temp_dir().join(format!("toby-modem-presence-{}", std::process::id()));
        let device = DevicePath::new(&path);
        assert!(!device.is_present());
        std::fs::write(&path, b"").unwrap();
        assert!(device.is_present());
        std::fs::remove_file(&path).unwrap();
        assert!(!device.is_present());
    }

    #[cfg(unix)]
    #[test]
    fn uninspectable_node_is_not_gone() {
        let file = std::env::temp_dir().join(format!("toby-modem-notdir-{}", std::process::id()));
        std::fs::write(&file, b"").unwrap();
        // A regular file used as a directory fails with ENOTDIR, not ENOENT.
        let device = DevicePath::new(file.join("ttyACM0"));
        assert!(device.is_present());
        std::fs::remove_file(&file).unwrap();
        assert!(!device.is_present());
    }
}
