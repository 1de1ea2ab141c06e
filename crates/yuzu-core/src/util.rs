//! Small helpers shared by plugins and the runtime.

use rand::Rng;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Random upper-case hexadecimal id of `len` digits.
pub fn gen_hex_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| HEX[rng.random_range(0..HEX.len())] as char)
        .collect()
}

const SECOND: u64 = 1000;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;

/// Human readable duration, e.g. `5h 30m 20s`, `45m 30s`, `30s` or `100ms`.
pub fn format_elapse(ms: u64) -> String {
    if ms >= HOUR {
        format!(
            "{}h {}m {}s",
            ms / HOUR,
            (ms % HOUR) / MINUTE,
            (ms % MINUTE) / SECOND
        )
    } else if ms >= MINUTE {
        format!("{}m {}s", ms / MINUTE, (ms % MINUTE) / SECOND)
    } else if ms >= SECOND {
        format!("{}s", ms / SECOND)
    } else {
        format!("{ms}ms")
    }
}

/// Shortens `s` to its first and last `len / 2` characters joined by `..`.
pub fn short_to(s: &str, len: usize) -> String {
    let count = s.chars().count();
    if count <= len {
        return s.to_owned();
    }
    let half = len / 2;
    let head: String = s.chars().take(half).collect();
    let tail: String = s.chars().skip(count - half).collect();
    format!("{head}..{tail}")
}
