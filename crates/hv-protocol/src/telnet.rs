//! Minimal telnet handling.
//!
//! The daemon does not run a telnet state machine. It sends one fixed
//! negotiation when a client connects and afterwards only strips a leading
//! command sequence and trailing NUL padding from each inbound chunk.

/// Interpret As Command.
pub const IAC: u8 = 0xFF;
/// Request the peer to enable an option.
pub const DO: u8 = 0xFD;
/// Offer to enable an option locally.
pub const WILL: u8 = 0xFB;
/// Echo option.
pub const OPT_ECHO: u8 = 0x01;
/// Suppress Go-Ahead option.
pub const OPT_SGA: u8 = 0x03;

/// Sent once per connection: DO ECHO, WILL ECHO, DO SGA, WILL SGA.
pub const NEGOTIATION: [u8; 12] = [
    IAC, DO, OPT_ECHO, //
    IAC, WILL, OPT_ECHO, //
    IAC, DO, OPT_SGA, //
    IAC, WILL, OPT_SGA,
];

fn is_printable(byte: u8) -> bool {
    (0x20..=0x7E).contains(&byte)
}

/// Reduces an inbound chunk to the bytes that should reach the terminal.
///
/// - A chunk starting with `IAC` loses every following byte up to the first
///   printable (or NUL) byte.
/// - A chunk that is then empty or starts with NUL is dropped entirely.
/// - Trailing NUL padding is removed.
/// - The NUL of a CR NUL pair (Enter in character mode) is removed, so a
///   second line in the same chunk does not start with it.
pub fn filter_inbound(chunk: &[u8]) -> Vec<u8> {
    let mut start = 0;
    if chunk.first() == Some(&IAC) {
        while let Some(&byte) = chunk.get(start) {
            if byte == 0 || is_printable(byte) {
                break;
            }
            start += 1;
        }
    }

    let rest = chunk.get(start..).unwrap_or_default();
    match rest.first() {
        None | Some(0) => return Vec::new(),
        Some(_) => {}
    }

    let end = rest.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let mut filtered = Vec::with_capacity(end);
    let mut previous = None;
    for &byte in rest.get(..end).unwrap_or_default() {
        if !(byte == 0 && previous == Some(b'\r')) {
            filtered.push(byte);
        }
        previous = Some(byte);
    }
    filtered
}

/// Number of CR and LF bytes in `bytes`; each one completes a console line.
pub fn count_line_terminators(bytes: &[u8]) -> u64 {
    bytes.iter().filter(|&&b| b == b'\r' || b == b'\n').count() as u64
}

/// True if the chunk ends with CR or LF, i.e. the operator pressed Enter.
pub fn ends_with_line_terminator(bytes: &[u8]) -> bool {
    matches!(bytes.last(), Some(b'\r') | Some(b'\n'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_bytes() {
        assert_eq!(
            NEGOTIATION,
            [0xFF, 0xFD, 0x01, 0xFF, 0xFB, 0x01, 0xFF, 0xFD, 0x03, 0xFF, 0xFB, 0x03]
        );
    }

    #[test]
    fn test_strips_iac_prefix() {
        let chunk = [0xFF, 0x01, 0x02, b'l', b's', b'\r'];
        assert_eq!(filter_inbound(&chunk), b"ls\r");
    }

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(filter_inbound(b"list\r\n"), b"list\r\n");
    }

    #[test]
    fn test_pure_negotiation_reply_is_dropped() {
        let chunk = [0xFF, 0xFC, 0x01, 0xFF, 0xFE, 0x03];
        assert!(filter_inbound(&chunk).is_empty());
    }

    #[test]
    fn test_trailing_nul_padding_removed() {
        assert_eq!(filter_inbound(b"quit\r\0\0"), b"quit\r");
    }

    #[test]
    fn test_cr_nul_between_lines_removed() {
        assert_eq!(filter_inbound(b"vpcs\r\0list\r\0"), b"vpcs\rlist\r");
        assert_eq!(filter_inbound(b"a\r\0\0b\r"), b"a\r\0b\r");
    }

    #[test]
    fn test_leading_nul_drops_chunk() {
        assert!(filter_inbound(b"\0ls\r").is_empty());
        assert!(filter_inbound(b"").is_empty());
    }

    #[test]
    fn test_iac_only_stripped_at_chunk_start() {
        let chunk = [b'a', 0xFF, 0x01, b'\r'];
        assert_eq!(filter_inbound(&chunk), chunk);
    }

    #[test]
    fn test_line_terminator_helpers() {
        assert_eq!(count_line_terminators(b"ls\r\n"), 2);
        assert_eq!(count_line_terminators(b"ls"), 0);
        assert!(ends_with_line_terminator(b"ls\r"));
        assert!(ends_with_line_terminator(b"\n"));
        assert!(!ends_with_line_terminator(b"ls"));
        assert!(!ends_with_line_terminator(b""));
    }
}
