//! Logging utilities for device text so log output stays single-line.
//! The field controller prints free-form boot and debug text; escape it before it reaches a log line.

/// Characters of device text kept in one log line.
pub const MAX_PREVIEW_CHARS: usize = 300;

/// [`escape_preview`] with the default cap.
pub fn escape_log(s: &str) -> String {
    escape_preview(s, MAX_PREVIEW_CHARS)
}

/// Escape `\n`, `\r`, `\t` and backslash; other control characters become `\xNN`.
/// Text past `max_chars` is cut and marked with `…`.
pub fn escape_preview(s: &str, max_chars: usize) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(s.len().min(max_chars) + 8);
    for (i, ch) in s.chars().enumerate() {
        if i == max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex preview of raw bytes that failed UTF-8 decoding on the serial line.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max.min(data.len()))
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::{escape_log, escape_preview, hex_snippet};

    #[test]
    fn escapes_device_boot_banner() {
        let s = "\n\n=== ESP32 AgroSmart - USB Serial Mode ===\r";
        let esc = escape_log(s);
        assert_eq!(esc, "\\n\\n=== ESP32 AgroSmart - USB Serial Mode ===\\r");
    }

    #[test]
    fn escapes_other_control_chars_as_hex() {
        assert_eq!(escape_log("a\u{1b}[0mb"), "a\\x1B[0mb");
    }

    #[test]
    fn truncates_long_lines() {
        let long = "x".repeat(400);
        let esc = escape_log(&long);
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), 301);
        assert_eq!(escape_preview("abcdef", 3), "abc…");
        assert_eq!(escape_preview("abc", 3), "abc");
    }

    #[test]
    fn hex_snippet_caps_length() {
        assert_eq!(hex_snippet(&[0xde, 0xad, 0xbe, 0xef], 2), "dead");
    }
}
