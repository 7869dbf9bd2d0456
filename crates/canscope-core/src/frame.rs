//! CAN / CAN FD frame model
//!
//! A [`Frame`] always carries a payload whose length matches its DLC:
//! classic frames map DLC 0..=8 one-to-one, FD frames use the fixed
//! length table (9 → 12, 10 → 16, ... 15 → 64).

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// Highest 11-bit identifier
pub const MAX_STANDARD_ID: u32 = 0x7FF;
/// Highest 29-bit identifier
pub const MAX_EXTENDED_ID: u32 = 0x1FFF_FFFF;

/// Maximum payload of a classic CAN frame
pub const CLASSIC_MAX_LEN: usize = 8;
/// Maximum payload of a CAN FD frame
pub const FD_MAX_LEN: usize = 64;

const FD_LENGTHS: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Payload length for a DLC, or `None` if the DLC is out of range for the frame type.
pub fn dlc_to_len(dlc: u8, fd: bool) -> Option<usize> {
    match (fd, dlc) {
        (false, 0..=8) => Some(dlc as usize),
        (true, 0..=15) => Some(FD_LENGTHS[dlc as usize]),
        _ => None,
    }
}

/// Smallest DLC whose payload length holds `len` bytes.
///
/// For lengths that appear in the table this is the exact inverse of
/// [`dlc_to_len`]; other FD lengths round up to the next valid size.
pub fn len_to_dlc(len: usize, fd: bool) -> Option<u8> {
    if !fd {
        return (len <= CLASSIC_MAX_LEN).then_some(len as u8);
    }
    FD_LENGTHS
        .iter()
        .position(|&l| l >= len)
        .map(|dlc| dlc as u8)
}

/// Frame type specific flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameKind {
    /// CAN 2.0 frame
    Classic {
        /// Remote transmission request
        #[serde(default)]
        remote: bool,
    },
    /// CAN FD frame
    Fd {
        /// Bit rate switch
        #[serde(default)]
        brs: bool,
        /// Error state indicator
        #[serde(default)]
        esi: bool,
    },
}

/// A CAN or CAN FD frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    id: u32,
    extended: bool,
    kind: FrameKind,
    dlc: u8,
    data: Vec<u8>,
}

impl Frame {
    /// Create a classic data frame. The DLC is the payload length.
    pub fn classic(id: u32, data: &[u8], extended: bool) -> Result<Self, FrameError> {
        check_id(id, extended)?;
        if data.len() > CLASSIC_MAX_LEN {
            return Err(FrameError::PayloadTooLong {
                len: data.len(),
                max: CLASSIC_MAX_LEN,
            });
        }
        Ok(Self {
            id,
            extended,
            kind: FrameKind::Classic { remote: false },
            dlc: data.len() as u8,
            data: data.to_vec(),
        })
    }

    /// Create a classic remote frame. The payload is `dlc` zero bytes.
    pub fn remote(id: u32, dlc: u8, extended: bool) -> Result<Self, FrameError> {
        check_id(id, extended)?;
        let len = dlc_to_len(dlc, false).ok_or(FrameError::InvalidDlc { dlc, fd: false })?;
        Ok(Self {
            id,
            extended,
            kind: FrameKind::Classic { remote: true },
            dlc,
            data: vec![0; len],
        })
    }

    /// Create an FD frame. Payloads between table sizes are zero-padded
    /// up to the next valid FD length.
    pub fn fd(
        id: u32,
        data: &[u8],
        extended: bool,
        brs: bool,
        esi: bool,
    ) -> Result<Self, FrameError> {
        check_id(id, extended)?;
        let dlc = len_to_dlc(data.len(), true).ok_or(FrameError::PayloadTooLong {
            len: data.len(),
            max: FD_MAX_LEN,
        })?;
        let mut payload = data.to_vec();
        payload.resize(FD_LENGTHS[dlc as usize], 0);
        Ok(Self {
            id,
            extended,
            kind: FrameKind::Fd { brs, esi },
            dlc,
            data: payload,
        })
    }

    /// Build a frame from an explicit DLC, zero-padding short payloads.
    ///
    /// Data longer than the DLC's payload length is rejected. Remote frames
    /// ignore `data`.
    pub fn with_dlc(
        id: u32,
        extended: bool,
        kind: FrameKind,
        dlc: u8,
        data: &[u8],
    ) -> Result<Self, FrameError> {
        let fd = matches!(kind, FrameKind::Fd { .. });
        let len = dlc_to_len(dlc, fd).ok_or(FrameError::InvalidDlc { dlc, fd })?;
        if let FrameKind::Classic { remote: true } = kind {
            return Self::remote(id, dlc, extended);
        }
        if data.len() > len {
            return Err(FrameError::PayloadTooLong {
                len: data.len(),
                max: len,
            });
        }
        check_id(id, extended)?;
        let mut payload = data.to_vec();
        payload.resize(len, 0);
        Ok(Self {
            id,
            extended,
            kind,
            dlc,
            data: payload,
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_fd(&self) -> bool {
        matches!(self.kind, FrameKind::Fd { .. })
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.kind, FrameKind::Classic { remote: true })
    }

    /// Bit rate switch flag (always false for classic frames)
    pub fn brs(&self) -> bool {
        matches!(self.kind, FrameKind::Fd { brs: true, .. })
    }

    /// Error state indicator flag (always false for classic frames)
    pub fn esi(&self) -> bool {
        matches!(self.kind, FrameKind::Fd { esi: true, .. })
    }

    pub fn dlc(&self) -> u8 {
        self.dlc
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Identifier key used to group frames: `0x123` for standard,
    /// `0x00000123` for extended identifiers.
    pub fn key(&self) -> IdKey {
        IdKey::new(self.id, self.extended)
    }
}

fn check_id(id: u32, extended: bool) -> Result<(), FrameError> {
    let max = if extended {
        MAX_EXTENDED_ID
    } else {
        MAX_STANDARD_ID
    };
    if id > max {
        return Err(FrameError::IdOutOfRange { id, extended });
    }
    Ok(())
}

/// Hex identifier key; the width distinguishes standard from extended IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdKey(String);

impl IdKey {
    pub fn new(id: u32, extended: bool) -> Self {
        if extended {
            Self(format!("0x{:08X}", id))
        } else {
            Self(format!("0x{:03X}", id))
        }
    }

    /// Parse a user-supplied key, normalising case and width.
    ///
    /// A key with more than three hex digits is taken as extended.
    pub fn parse(s: &str) -> Result<Self, FrameError> {
        let digits = s
            .trim()
            .trim_start_matches("0x")
            .trim_start_matches("0X");
        let id = u32::from_str_radix(digits, 16)
            .map_err(|_| FrameError::InvalidNumber(s.to_string()))?;
        let extended = digits.len() > 3 || id > MAX_STANDARD_ID;
        check_id(id, extended)?;
        Ok(Self::new(id, extended))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction of a frame relative to this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    /// Short label used in frame listings
    pub fn label(self) -> &'static str {
        match self {
            Direction::Inbound => "Rx",
            Direction::Outbound => "Tx",
        }
    }
}

/// A frame observed on the bus, received or transmitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    pub frame: Frame,
    pub direction: Direction,
    /// Driver receive timestamp; absent for outbound echoes and drivers
    /// without hardware timestamps
    pub timestamp: Option<Duration>,
}

impl ReceivedFrame {
    pub fn inbound(frame: Frame, timestamp: Option<Duration>) -> Self {
        Self {
            frame,
            direction: Direction::Inbound,
            timestamp,
        }
    }

    pub fn outbound(frame: Frame) -> Self {
        Self {
            frame,
            direction: Direction::Outbound,
            timestamp: None,
        }
    }

    /// Driver timestamp if present and non-zero
    pub fn driver_timestamp(&self) -> Option<Duration> {
        self.timestamp.filter(|t| !t.is_zero())
    }
}

/// Parse an identifier written as `0x`-prefixed hex or decimal.
pub fn parse_id(text: &str) -> Result<u32, FrameError> {
    let s = text.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse::<u32>(),
    };
    parsed.map_err(|_| FrameError::InvalidNumber(text.to_string()))
}

/// Parse hex bytes separated by spaces, commas or newlines (`"01 02,0A ff"`).
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, FrameError> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let padded;
            let part = if part.len() % 2 == 1 {
                padded = format!("0{}", part);
                padded.as_str()
            } else {
                part
            };
            match hex::decode(part) {
                Ok(bytes) if bytes.len() == 1 => Ok(bytes[0]),
                _ => Err(FrameError::InvalidHex(part.to_string())),
            }
        })
        .collect()
}

/// Format a payload as lower-case hex bytes separated by spaces
pub fn format_data(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
