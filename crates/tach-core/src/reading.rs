//! Reader side: lock-free lookups of the latched fan speeds.

use crate::error::ReadError;
use crate::hal::{PinId, TachInput};
use crate::monitor::{FanMonitor, FanShared};
use serde::Serialize;
use std::io::{self, Read};
use std::sync::Arc;

#[derive(Debug)]
struct BoardEntry {
    id: String,
    label: String,
    pin: PinId,
    shared: Arc<FanShared>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FanReading {
    pub fan: String,
    pub label: String,
    pub pin: PinId,
    pub transitions: u32,
    pub latches: u64,
    pub read_failures: u64,
}

/// Read-only view of every registered fan, shared with any number of readers.
#[derive(Debug, Clone)]
pub struct SpeedBoard {
    fans: Arc<[BoardEntry]>,
}

impl SpeedBoard {
    pub fn from_monitors<P: TachInput>(monitors: &[FanMonitor<P>]) -> Self {
        let fans: Vec<BoardEntry> = monitors
            .iter()
            .map(|m| BoardEntry {
                id: m.id().to_string(),
                label: m.label().to_string(),
                pin: m.pin(),
                shared: m.shared(),
            })
            .collect();
        Self { fans: fans.into() }
    }

    fn entry(&self, fan_id: &str) -> Result<&BoardEntry, ReadError> {
        self.fans
            .iter()
            .find(|e| e.id == fan_id)
            .ok_or_else(|| ReadError::UnknownFan(fan_id.to_string()))
    }

    fn entry_at(&self, index: usize) -> Result<&BoardEntry, ReadError> {
        index
            .checked_sub(1)
            .and_then(|i| self.fans.get(i))
            .ok_or_else(|| ReadError::UnknownFan(format!("#{index}")))
    }

    /// Transitions counted in the most recently closed window of `fan_id`.
    pub fn read(&self, fan_id: &str) -> Result<u32, ReadError> {
        self.entry(fan_id).map(|e| e.shared.speed())
    }

    /// Same as [`read`](Self::read), addressing fans by 1-based position.
    pub fn read_index(&self, index: usize) -> Result<u32, ReadError> {
        self.entry_at(index).map(|e| e.shared.speed())
    }

    pub fn reading(&self, fan_id: &str) -> Result<FanReading, ReadError> {
        self.entry(fan_id).map(to_reading)
    }

    pub fn snapshot(&self) -> Vec<FanReading> {
        self.fans.iter().map(to_reading).collect()
    }

    pub fn fan_ids(&self) -> impl Iterator<Item = &str> {
        self.fans.iter().map(|e| e.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.fans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fans.is_empty()
    }
}

fn to_reading(entry: &BoardEntry) -> FanReading {
    FanReading {
        fan: entry.id.clone(),
        label: entry.label.clone(),
        pin: entry.pin,
        transitions: entry.shared.speed(),
        latches: entry.shared.latches(),
        read_failures: entry.shared.read_failures(),
    }
}

/// Character-device style session over one fan.
///
/// The first read yields the speed as decimal text plus a newline, cut to
/// the caller's buffer; every later read on the same session reports EOF.
#[derive(Debug)]
pub struct SpeedDevice {
    shared: Arc<FanShared>,
    pos: usize,
}

impl SpeedDevice {
    pub fn open(board: &SpeedBoard, index: usize) -> Result<Self, ReadError> {
        let entry = board.entry_at(index)?;
        Ok(Self {
            shared: Arc::clone(&entry.shared),
            pos: 0,
        })
    }

    pub fn open_id(board: &SpeedBoard, fan_id: &str) -> Result<Self, ReadError> {
        let entry = board.entry(fan_id)?;
        Ok(Self {
            shared: Arc::clone(&entry.shared),
            pos: 0,
        })
    }
}

impl Read for SpeedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos != 0 {
            return Ok(0);
        }
        let text = format!("{}\n", self.shared.speed());
        let len = text.len().min(buf.len());
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
        self.pos += len;
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::tests::Levels;

    fn board_with_speed(speed_edges: &[u8]) -> (Vec<FanMonitor<Levels>>, SpeedBoard) {
        let mut fan1 = FanMonitor::new("fan1", "GPIO_FAN_TACH_1", Levels::new(speed_edges), 4).unwrap();
        for _ in 0..4 {
            fan1.tick();
        }
        let fan2 = FanMonitor::new("fan2", "GPIO_FAN_TACH_2", Levels::new(&[]), 4).unwrap();
        let fans = vec![fan1, fan2];
        let board = SpeedBoard::from_monitors(&fans);
        (fans, board)
    }

    #[test]
    fn reads_latched_value_by_id_and_index() {
        // Three edges in ticks 1..=3, latched on tick 4.
        let (_fans, board) = board_with_speed(&[1, 0, 1, 1]);
        assert_eq!(board.read("fan1"), Ok(3));
        assert_eq!(board.read_index(1), Ok(3));
        assert_eq!(board.read("fan2"), Ok(0));
        assert_eq!(board.read_index(2), Ok(0));
    }

    #[test]
    fn unknown_fan_is_an_error() {
        let (_fans, board) = board_with_speed(&[]);
        assert_eq!(board.read("fan3"), Err(ReadError::UnknownFan("fan3".into())));
        assert!(board.read_index(0).is_err());
        assert!(board.read_index(3).is_err());
        assert!(SpeedDevice::open(&board, 3).is_err());

        let err: io::Error = SpeedDevice::open_id(&board, "fan3").unwrap_err().into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn snapshot_lists_fans_in_order() {
        let (_fans, board) = board_with_speed(&[1]);
        let ids: Vec<&str> = board.fan_ids().collect();
        assert_eq!(ids, ["fan1", "fan2"]);
        let snap = board.snapshot();
        assert_eq!(snap[0].latches, 1);
        assert_eq!(snap[1].latches, 0);
        assert_eq!(snap[0].transitions, 1);
    }

    #[test]
    fn device_reads_once_then_eof() {
        let (_fans, board) = board_with_speed(&[1, 0, 1, 1]);
        let mut dev = SpeedDevice::open(&board, 1).unwrap();
        let mut buf = [0u8; 16];
        let n = dev.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"3\n");
        assert_eq!(dev.read(&mut buf).unwrap(), 0);

        let mut text = String::new();
        SpeedDevice::open_id(&board, "fan1")
            .unwrap()
            .read_to_string(&mut text)
            .unwrap();
        assert_eq!(text, "3\n");
    }

    #[test]
    fn device_truncates_to_buffer() {
        let (_fans, board) = board_with_speed(&[1, 0, 1, 1]);
        let mut dev = SpeedDevice::open(&board, 1).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(dev.read(&mut buf).unwrap(), 1);
        assert_eq!(&buf, b"3");
        assert_eq!(dev.read(&mut buf).unwrap(), 0);
    }
}
