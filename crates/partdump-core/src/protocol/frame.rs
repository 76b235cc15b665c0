//! Response frame decoding.
//!
//! Every device response carries a 4-byte ASCII status followed by a
//! variable-length payload in the same bulk read. Status comparison happens
//! once here; everything above works on [`FrameStatus`].

use std::fmt;

use super::constants::*;

/// Decoded status tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Okay,
    Fail,
    Info,
    Data,
    Dump,
    /// Any other 4-byte tag.
    Unknown([u8; 4]),
}

impl FrameStatus {
    pub fn from_tag(tag: [u8; 4]) -> Self {
        match &tag {
            STATUS_OKAY => FrameStatus::Okay,
            STATUS_FAIL => FrameStatus::Fail,
            STATUS_INFO => FrameStatus::Info,
            STATUS_DATA => FrameStatus::Data,
            STATUS_DUMP => FrameStatus::Dump,
            _ => FrameStatus::Unknown(tag),
        }
    }
}

impl fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameStatus::Okay => write!(f, "OKAY"),
            FrameStatus::Fail => write!(f, "FAIL"),
            FrameStatus::Info => write!(f, "INFO"),
            FrameStatus::Data => write!(f, "DATA"),
            FrameStatus::Dump => write!(f, "DUMP"),
            FrameStatus::Unknown(tag) => {
                let ascii: String = tag
                    .iter()
                    .map(|&b| {
                        if b.is_ascii_graphic() || b == b' ' {
                            b as char
                        } else {
                            '.'
                        }
                    })
                    .collect();
                write!(f, "UNKNOWN({})", ascii)
            }
        }
    }
}

/// One parsed response.
#[derive(Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub status: FrameStatus,
    pub payload: Vec<u8>,
}

impl ProtocolFrame {
    /// Parse a raw read. Returns `None` when fewer than 4 bytes arrived.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < STATUS_LEN {
            return None;
        }
        let mut tag = [0u8; STATUS_LEN];
        tag.copy_from_slice(&bytes[..STATUS_LEN]);
        Some(Self {
            status: FrameStatus::from_tag(tag),
            payload: bytes[STATUS_LEN..].to_vec(),
        })
    }

    /// Payload decoded as text, invalid UTF-8 replaced, whitespace trimmed.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).trim().to_string()
    }
}

impl fmt::Debug for ProtocolFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolFrame({} {:?})", self.status, self.text())
    }
}

/// Locate the first end marker in a streamed block.
///
/// `UMPEND` takes precedence over `END`; the returned offset is where the
/// winning marker starts.
pub fn find_end_marker(block: &[u8]) -> Option<usize> {
    END_MARKERS.iter().find_map(|marker| find_subslice(block, marker))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_statuses() {
        let frame = ProtocolFrame::parse(b"OKAY0x200").unwrap();
        assert_eq!(frame.status, FrameStatus::Okay);
        assert_eq!(frame.payload, b"0x200");

        assert_eq!(
            ProtocolFrame::parse(b"FAILnope").unwrap().status,
            FrameStatus::Fail
        );
        assert_eq!(
            ProtocolFrame::parse(b"INFO").unwrap().status,
            FrameStatus::Info
        );
        assert_eq!(
            ProtocolFrame::parse(b"DATA00001000").unwrap().status,
            FrameStatus::Data
        );
        assert_eq!(
            ProtocolFrame::parse(b"DUMPSTART").unwrap().status,
            FrameStatus::Dump
        );
    }

    #[test]
    fn test_parse_unknown_and_short() {
        let frame = ProtocolFrame::parse(b"WHAT?").unwrap();
        assert_eq!(frame.status, FrameStatus::Unknown(*b"WHAT"));
        assert_eq!(frame.status.to_string(), "UNKNOWN(WHAT)");

        assert!(ProtocolFrame::parse(b"OKA").is_none());
        assert!(ProtocolFrame::parse(b"").is_none());
    }

    #[test]
    fn test_text_is_trimmed_and_lossy() {
        let frame = ProtocolFrame::parse(b"FAIL not found \r\n").unwrap();
        assert_eq!(frame.text(), "not found");

        let frame = ProtocolFrame::parse(b"INFOa\xffb").unwrap();
        assert_eq!(frame.text(), "a\u{fffd}b");
    }

    #[test]
    fn test_end_marker_precedence() {
        // UMPEND wins even when END appears earlier in the block.
        assert_eq!(find_end_marker(b"xxENDyyUMPEND"), Some(7));
        assert_eq!(find_end_marker(b"worldENDgarbage"), Some(5));
        assert_eq!(find_end_marker(b"DUMPEND"), Some(1));
        assert_eq!(find_end_marker(b"plain data"), None);
        assert_eq!(find_end_marker(b"EN"), None);
    }
}
