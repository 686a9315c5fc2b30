//! Tachometer inputs backed by the Linux sysfs GPIO interface.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tach_core::{PinError, PinId, PinProvider, TachError, TachInput};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn write_attr(path: &Path, value: &str) -> std::io::Result<()> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)?
        .write_all(value.as_bytes())
}

impl PinProvider for SysfsGpio {
    type Input = SysfsPin;

    fn acquire(&mut self, pin: PinId, label: &str) -> Result<SysfsPin, TachError> {
        let unavailable = |reason: String| TachError::PinUnavailable {
            pin,
            label: label.to_string(),
            reason,
        };

        let dir = self.root.join(format!("gpio{}", pin.0));
        let exported = if dir.is_dir() {
            false
        } else {
            write_attr(&self.root.join("export"), &pin.0.to_string())
                .map_err(|e| unavailable(format!("export: {e}")))?;
            true
        };

        let release = ExportGuard {
            root: self.root.clone(),
            pin,
            exported,
        };

        write_attr(&dir.join("direction"), "in")
            .map_err(|e| unavailable(format!("direction: {e}")))?;
        let value = File::open(dir.join("value"))
            .map_err(|e| unavailable(format!("value: {e}")))?;

        debug!(pin = pin.0, label, exported, "GPIO input claimed");
        Ok(SysfsPin {
            pin,
            value,
            _release: release,
        })
    }
}

/// Unexports the line on drop if this process exported it.
#[derive(Debug)]
struct ExportGuard {
    root: PathBuf,
    pin: PinId,
    exported: bool,
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        if !self.exported {
            return;
        }
        if let Err(e) = write_attr(&self.root.join("unexport"), &self.pin.0.to_string()) {
            warn!(pin = self.pin.0, error = %e, "Failed to unexport GPIO");
        }
    }
}

#[derive(Debug)]
pub struct SysfsPin {
    pin: PinId,
    value: File,
    _release: ExportGuard,
}

impl TachInput for SysfsPin {
    fn pin(&self) -> PinId {
        self.pin
    }

    fn read_level(&mut self) -> Result<bool, PinError> {
        let fail = |reason: String| PinError {
            pin: self.pin,
            reason,
        };
        let mut buf = [0u8; 4];
        self.value
            .seek(SeekFrom::Start(0))
            .map_err(|e| fail(e.to_string()))?;
        let n = self.value.read(&mut buf).map_err(|e| fail(e.to_string()))?;
        match buf[..n].first() {
            Some(b'0') => Ok(false),
            Some(b'1') => Ok(true),
            _ => Err(fail(format!(
                "unexpected value {:?}",
                String::from_utf8_lossy(&buf[..n])
            ))),
        }
    }
}

/// Read access check used at startup to fail early on a missing sysfs tree.
pub fn probe(root: &Path) -> Result<(), TachError> {
    fs::metadata(root).map(|_| ()).map_err(|e| TachError::PinUnavailable {
        pin: PinId(0),
        label: root.display().to_string(),
        reason: format!("GPIO root not accessible: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_line(root: &Path, pin: u32, level: &str) -> PathBuf {
        let dir = root.join(format!("gpio{pin}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("direction"), "out").unwrap();
        fs::write(dir.join("value"), level).unwrap();
        dir
    }

    #[test]
    fn reads_levels_from_value_file() {
        let tmp = TempDir::new().unwrap();
        let dir = fake_line(tmp.path(), 138, "1\n");
        let mut gpio = SysfsGpio::new(tmp.path());
        let mut pin = gpio.acquire(PinId(138), "GPIO_FAN_TACH_1").unwrap();

        assert_eq!(fs::read_to_string(dir.join("direction")).unwrap(), "in");
        assert!(pin.read_level().unwrap());
        fs::write(dir.join("value"), "0\n").unwrap();
        assert!(!pin.read_level().unwrap());
        fs::write(dir.join("value"), "x\n").unwrap();
        assert!(pin.read_level().is_err());
    }

    #[test]
    fn missing_line_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let mut gpio = SysfsGpio::new(tmp.path().join("absent"));
        assert!(matches!(
            gpio.acquire(PinId(139), "GPIO_FAN_TACH_2"),
            Err(TachError::PinUnavailable { pin: PinId(139), .. })
        ));
    }

    #[test]
    fn probe_checks_root() {
        let tmp = TempDir::new().unwrap();
        assert!(probe(tmp.path()).is_ok());
        assert!(probe(&tmp.path().join("absent")).is_err());
    }
}
