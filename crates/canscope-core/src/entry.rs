//! User-entered frame definitions
//!
//! A [`FrameEntry`] is the textual form of a frame as typed into a send
//! form or written in a config file. [`FrameEntry::build`] applies the
//! entry rules against the session's protocol mode.

use serde::{Deserialize, Serialize};

use crate::config::ProtocolMode;
use crate::error::FrameError;
use crate::frame::{
    len_to_dlc, parse_hex_bytes, parse_id, Frame, FrameKind, CLASSIC_MAX_LEN, FD_MAX_LEN,
};

/// Frame as entered by a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameEntry {
    /// `0x`-prefixed hex or decimal identifier
    pub id: String,
    pub extended: bool,
    pub fd: bool,
    pub brs: bool,
    pub esi: bool,
    /// Remote transmission request; classic frames only
    pub remote: bool,
    /// Explicit DLC; derived from the data length when absent
    pub dlc: Option<u8>,
    /// Hex bytes separated by spaces, commas or newlines
    pub data: String,
}

impl FrameEntry {
    pub fn new(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            ..Self::default()
        }
    }

    /// Build the frame for a session running in `mode`.
    ///
    /// Data shorter than the DLC's length is zero-padded, longer data is
    /// rejected. Remote frames ignore the data and default to DLC 0. FD
    /// frames have no remote form, so `remote` is ignored for them.
    pub fn build(&self, mode: ProtocolMode) -> Result<Frame, FrameError> {
        if self.fd && mode != ProtocolMode::Fd {
            return Err(FrameError::FdNotAllowed);
        }
        let id = parse_id(&self.id)?;

        if self.fd {
            let kind = FrameKind::Fd {
                brs: self.brs,
                esi: self.esi,
            };
            let data = parse_hex_bytes(&self.data)?;
            let dlc = self.dlc_for(data.len(), true, FD_MAX_LEN)?;
            return Frame::with_dlc(id, self.extended, kind, dlc, &data);
        }

        if self.remote {
            let kind = FrameKind::Classic { remote: true };
            return Frame::with_dlc(id, self.extended, kind, self.dlc.unwrap_or(0), &[]);
        }

        let data = parse_hex_bytes(&self.data)?;
        let dlc = self.dlc_for(data.len(), false, CLASSIC_MAX_LEN)?;
        Frame::with_dlc(id, self.extended, FrameKind::Classic { remote: false }, dlc, &data)
    }

    fn dlc_for(&self, len: usize, fd: bool, max: usize) -> Result<u8, FrameError> {
        match self.dlc {
            Some(dlc) => Ok(dlc),
            None => len_to_dlc(len, fd).ok_or(FrameError::PayloadTooLong { len, max }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn classic_entry_derives_dlc_from_data() {
        let frame = FrameEntry::new("0x123", "01 02,03")
            .build(ProtocolMode::Classic)
            .unwrap();
        assert_eq!(frame.id(), 0x123);
        assert_eq!(frame.dlc(), 3);
        assert_eq!(frame.data(), &[1, 2, 3]);
    }

    #[test]
    fn short_data_is_zero_padded_to_dlc() {
        let entry = FrameEntry {
            dlc: Some(8),
            ..FrameEntry::new("291", "aa\nbb")
        };
        let frame = entry.build(ProtocolMode::Classic).unwrap();
        assert_eq!(frame.id(), 291);
        assert_eq!(frame.data(), &[0xAA, 0xBB, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn data_longer_than_dlc_is_rejected() {
        let entry = FrameEntry {
            dlc: Some(2),
            ..FrameEntry::new("0x10", "01 02 03")
        };
        assert_eq!(
            entry.build(ProtocolMode::Classic),
            Err(FrameError::PayloadTooLong { len: 3, max: 2 })
        );
    }

    #[test]
    fn dlc_ranges_follow_frame_type() {
        let classic = FrameEntry {
            dlc: Some(9),
            ..FrameEntry::new("0x10", "")
        };
        assert_eq!(
            classic.build(ProtocolMode::Fd),
            Err(FrameError::InvalidDlc { dlc: 9, fd: false })
        );

        let fd = FrameEntry {
            fd: true,
            dlc: Some(15),
            ..FrameEntry::new("0x10", "01")
        };
        let frame = fd.build(ProtocolMode::Fd).unwrap();
        assert_eq!(frame.data().len(), 64);

        let too_big = FrameEntry {
            dlc: Some(16),
            ..fd
        };
        assert!(too_big.build(ProtocolMode::Fd).is_err());
    }

    #[test]
    fn remote_entry_ignores_data() {
        let entry = FrameEntry {
            remote: true,
            dlc: Some(4),
            ..FrameEntry::new("0x7DF", "not hex at all")
        };
        let frame = entry.build(ProtocolMode::Classic).unwrap();
        assert!(frame.is_remote());
        assert_eq!(frame.data(), &[0, 0, 0, 0]);
    }

    #[test]
    fn fd_entry_requires_fd_session() {
        let entry = FrameEntry {
            fd: true,
            brs: true,
            ..FrameEntry::new("0x18DAF110", "01")
        };
        assert_eq!(
            entry.build(ProtocolMode::Classic),
            Err(FrameError::FdNotAllowed)
        );
        let entry = FrameEntry {
            extended: true,
            ..entry
        };
        let frame = entry.build(ProtocolMode::Fd).unwrap();
        assert!(frame.is_fd());
        assert!(frame.brs());
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(matches!(
            FrameEntry::new("0xZZ", "").build(ProtocolMode::Classic),
            Err(FrameError::InvalidNumber(_))
        ));
        assert!(matches!(
            FrameEntry::new("0x1", "0g").build(ProtocolMode::Classic),
            Err(FrameError::InvalidHex(_))
        ));
        assert_eq!(
            FrameEntry::new("0x1", "01 02 03 04 05 06 07 08 09").build(ProtocolMode::Classic),
            Err(FrameError::PayloadTooLong { len: 9, max: 8 })
        );
    }

    #[test]
    fn entry_deserializes_with_defaults() {
        let entry: FrameEntry = toml::from_str("id = \"0x100\"\ndata = \"01 02\"").unwrap();
        assert_eq!(entry, FrameEntry::new("0x100", "01 02"));
    }
}
