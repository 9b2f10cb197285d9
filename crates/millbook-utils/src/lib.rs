//! Utility functions and helpers

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Mutex;

/// Characters used by push identifiers, in ascending ASCII order
const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Group the integer digits of a plain number string with a separator
pub fn format_number<T: ToString>(n: T, separator: &str) -> String {
    let s = n.to_string();
    let (sign, digits) = match s.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", s.as_str()),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };

    let mut grouped = String::new();
    let mut count = 0;
    for c in int_part.chars().rev() {
        if count == 3 {
            grouped.push_str(&separator.chars().rev().collect::<String>());
            count = 0;
        }
        grouped.push(c);
        count += 1;
    }
    let mut result: String = sign.to_string();
    result.push_str(&grouped.chars().rev().collect::<String>());
    if let Some(frac) = frac_part {
        result.push('.');
        result.push_str(frac);
    }
    result
}

/// Format a decimal amount with fixed decimal places and grouped thousands
pub fn format_decimal(value: Decimal, decimal_places: u32, separator: &str) -> String {
    let mut rounded = value.round_dp(decimal_places);
    rounded.rescale(decimal_places);
    if rounded.is_zero() {
        rounded.set_sign_positive(true);
    }
    format_number(rounded, separator)
}

/// Current wall-clock time as milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert epoch milliseconds into a UTC instant
pub fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

#[derive(Default)]
struct PushState {
    last_millis: i64,
    suffix: [u8; 12],
}

static PUSH_STATE: Lazy<Mutex<PushState>> = Lazy::new(|| Mutex::new(PushState::default()));

/// Generate a chronologically sortable 20-character child identifier.
///
/// The first eight characters encode the timestamp; the remaining twelve are
/// drawn at random when the millisecond changes and incremented for ids
/// minted within the same millisecond, so ids sort in creation order within
/// one process and do not collide across processes.
pub fn generate_push_id(now_millis: i64) -> String {
    let mut state = PUSH_STATE.lock().unwrap_or_else(|e| e.into_inner());

    let millis = now_millis.max(state.last_millis);
    if millis == state.last_millis {
        for slot in state.suffix.iter_mut().rev() {
            if *slot < 63 {
                *slot += 1;
                break;
            }
            *slot = 0;
        }
    } else {
        let mut rng = rand::thread_rng();
        for slot in state.suffix.iter_mut() {
            *slot = rng.gen_range(0..64);
        }
        // Keep headroom so same-millisecond increments never wrap.
        state.suffix[0] &= 0x1f;
        state.last_millis = millis;
    }

    let mut id = String::with_capacity(20);
    let mut ts = millis.max(0) as u64;
    let mut head = [0u8; 8];
    for slot in head.iter_mut().rev() {
        *slot = PUSH_CHARS[(ts % 64) as usize];
        ts /= 64;
    }
    id.extend(head.iter().map(|&b| b as char));
    id.extend(state.suffix.iter().map(|&i| PUSH_CHARS[i as usize] as char));
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_format_number_groups_thousands() {
        assert_eq!(format_number(1234567, ","), "1,234,567");
        assert_eq!(format_number(999, ","), "999");
        assert_eq!(format_number("-1250.50", ","), "-1,250.50");
    }

    #[test]
    fn test_format_decimal_pads_scale() {
        let v = Decimal::from_str("1250").unwrap();
        assert_eq!(format_decimal(v, 2, ","), "1,250.00");
        let v = Decimal::from_str("-200.456").unwrap();
        assert_eq!(format_decimal(v, 2, ","), "-200.46");
        assert_eq!(format_decimal(Decimal::ZERO, 0, ","), "0");
    }

    #[test]
    fn test_push_ids_are_ordered_and_unique() {
        let a = generate_push_id(1_700_000_000_000);
        let b = generate_push_id(1_700_000_000_000);
        let c = generate_push_id(1_700_000_000_001);
        assert_eq!(a.len(), 20);
        assert_ne!(a, b);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_push_id_suffix_is_random_per_millisecond() {
        let first = generate_push_id(1_800_000_000_000);
        let mut seen = std::collections::HashSet::new();
        seen.insert(first[8..].to_string());
        for i in 1..=32 {
            let id = generate_push_id(1_800_000_000_000 + i);
            assert!(seen.insert(id[8..].to_string()));
        }
    }

    #[test]
    fn test_millis_round_trip() {
        let dt = millis_to_datetime(1_700_000_000_000).unwrap();
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_000);
    }
}
