//! Proof-of-work admission checks for client message submissions.
//!
//! Each store-and-forward submission carries an 8-byte nonce that must
//! hash below a target derived from the message size, its TTL and the
//! current difficulty:
//!
//! ```text
//! payload = timestamp ‖ ttl ‖ recipient ‖ data      (raw string bytes)
//! target  = (2^64 − 1) / (difficulty × (L + ttl_s·L/65535)),  L = |payload| + 8
//! accept  ⇔ SHA512(nonce ‖ SHA512(payload))[0..8] < target    (big-endian)
//! ```
//!
//! Every intermediate step of the target computation is overflow-checked;
//! an overflow rejects the submission outright.

use crate::encoding;
use crate::hash::sha512;
use crate::util;

/// Byte width of the nonce and of the target threshold.
const NONCE_LENGTH: usize = 8;

/// Half-width of the difficulty selection window around a submission
/// timestamp (15 minutes).
pub const TIMESTAMP_VARIANCE_MS: u64 = 15 * 60 * 1000;

/// One entry of the time-indexed difficulty schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PowDifficulty {
    /// Milliseconds since the Unix epoch at which this difficulty takes
    /// effect.
    pub timestamp_ms: u64,
    /// The difficulty value.
    pub difficulty: i32,
}

/// Computes the 8-byte big-endian PoW target.
///
/// Returns `None` when any intermediate multiplication or addition
/// overflows 64 bits, or when the denominator is zero; callers must
/// reject the submission in that case.
#[must_use]
pub fn calc_target(payload_len: usize, ttl_secs: u64, difficulty: i32) -> Option<[u8; 8]> {
    let total_len = (payload_len as u64).checked_add(NONCE_LENGTH as u64)?;
    let ttl_mult = ttl_secs.checked_mul(total_len)?;
    let inner_frac = ttl_mult / u64::from(u16::MAX);
    let len_plus_inner_frac = total_len.checked_add(inner_frac)?;
    let denominator = u64::try_from(difficulty)
        .ok()?
        .checked_mul(len_plus_inner_frac)?;
    let target = u64::MAX.checked_div(denominator)?;
    Some(target.to_be_bytes())
}

/// Verifies a proof-of-work nonce for a message submission.
///
/// Returns the lowercase-hex SHA-512 message hash on success and `None`
/// on any failure: bad base64, a nonce that is not exactly 8 bytes, an
/// unparseable or out-of-range TTL, or target-computation overflow. No
/// distinction between failure modes is reported.
#[must_use]
pub fn check_pow(
    nonce_b64: &str,
    timestamp: &str,
    ttl: &str,
    recipient: &str,
    data: &str,
    difficulty: i32,
) -> Option<String> {
    let mut payload =
        String::with_capacity(timestamp.len() + ttl.len() + recipient.len() + data.len());
    payload.push_str(timestamp);
    payload.push_str(ttl);
    payload.push_str(recipient);
    payload.push_str(data);

    // The TTL string is in milliseconds; the target wants seconds.
    let ttl_secs = util::parse_ttl(ttl)? / 1000;
    let target = calc_target(payload.len(), ttl_secs, difficulty)?;

    let nonce = encoding::from_base64(nonce_b64).ok()?;
    let nonce: [u8; NONCE_LENGTH] = nonce.try_into().ok()?;

    let initial = sha512(payload.as_bytes());
    let mut inner = [0u8; NONCE_LENGTH + 64];
    inner[..NONCE_LENGTH].copy_from_slice(&nonce);
    inner[NONCE_LENGTH..].copy_from_slice(&initial);
    let result = sha512(&inner);

    let head = u64::from_be_bytes(result[..NONCE_LENGTH].try_into().expect("8-byte slice"));
    if head < u64::from_be_bytes(target) {
        Some(encoding::to_hex(&result))
    } else {
        None
    }
}

/// Selects the difficulty applicable to a submission at `timestamp_ms`.
///
/// Takes the minimum difficulty inside a ±15 minute window around the
/// submission, combined with the most recent difficulty strictly before
/// it. The window forgives clients whose clock skew lands them next to
/// a difficulty bump; the recent term covers clients too old to appear
/// in the window at all. An empty history yields `i32::MAX`.
#[must_use]
pub fn valid_difficulty(timestamp_ms: u64, history: &[PowDifficulty]) -> i32 {
    let mut difficulty = i32::MAX;
    let mut most_recent_difficulty = i32::MAX;
    let mut most_recent: u64 = 0;
    let lower = timestamp_ms.saturating_sub(TIMESTAMP_VARIANCE_MS);
    let upper = timestamp_ms.saturating_add(TIMESTAMP_VARIANCE_MS);

    for entry in history {
        let t = entry.timestamp_ms;
        if t < timestamp_ms && t >= most_recent {
            most_recent = t;
            most_recent_difficulty = entry.difficulty;
        }
        if t >= lower && t <= upper {
            difficulty = difficulty.min(entry.difficulty);
        }
    }
    most_recent_difficulty.min(difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_one_day_ttl_difficulty_one() {
        // ttl = 86400 s, empty payload: L = 8,
        // inner = 86400·8/65535 = 10, denom = 18,
        // target = (2^64 − 1)/18.
        let target = calc_target(0, 86_400, 1).unwrap();
        assert_eq!(target, 0x0E38_E38E_38E3_8E38u64.to_be_bytes());
    }

    #[test]
    fn target_overflow_rejected() {
        assert_eq!(calc_target(16, u64::MAX, 1), None);
        assert_eq!(calc_target(usize::MAX, 60, 1), None);
    }

    #[test]
    fn target_zero_difficulty_rejected() {
        assert_eq!(calc_target(0, 86_400, 0), None);
        assert_eq!(calc_target(0, 86_400, -1), None);
    }

    fn now_ms_string() -> String {
        crate::util::get_time_ms().to_string()
    }

    /// Brute-forces a nonce that passes at the given difficulty.
    fn solve(timestamp: &str, ttl: &str, recipient: &str, data: &str, difficulty: i32) -> String {
        for i in 0u64..5_000_000 {
            let nonce_b64 = encoding::to_base64(&i.to_be_bytes());
            if check_pow(&nonce_b64, timestamp, ttl, recipient, data, difficulty).is_some() {
                return nonce_b64;
            }
        }
        panic!("no nonce found at difficulty {difficulty}");
    }

    #[test]
    fn accepted_nonce_yields_full_hash() {
        let ts = now_ms_string();
        let ttl = "60000";
        let recipient = "recipient-key";
        let data = "payload";
        let nonce = solve(&ts, ttl, recipient, data, 1);
        let hash = check_pow(&nonce, &ts, ttl, recipient, data, 1).unwrap();
        assert_eq!(hash.len(), 128);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn acceptance_is_monotone_in_difficulty() {
        let ts = now_ms_string();
        let ttl = "60000";
        let nonce = solve(&ts, ttl, "rcpt", "data", 8);
        // Accepted at difficulty 8 implies accepted at every lower one.
        for d in 1..=8 {
            assert!(
                check_pow(&nonce, &ts, ttl, "rcpt", "data", d).is_some(),
                "rejected at difficulty {d}"
            );
        }
    }

    #[test]
    fn bad_nonce_encodings_rejected() {
        let ts = now_ms_string();
        assert!(check_pow("not base64!", &ts, "60000", "r", "d", 1).is_none());
        // Valid base64 but only 4 bytes.
        let short = encoding::to_base64(&[1, 2, 3, 4]);
        assert!(check_pow(&short, &ts, "60000", "r", "d", 1).is_none());
    }

    #[test]
    fn bad_ttl_rejected() {
        let ts = now_ms_string();
        let nonce = encoding::to_base64(&[0u8; 8]);
        assert!(check_pow(&nonce, &ts, "abc", "r", "d", 1).is_none());
        // Below the 10 s minimum.
        assert!(check_pow(&nonce, &ts, "5000", "r", "d", 1).is_none());
    }

    #[test]
    fn difficulty_window_selection() {
        let history = [
            PowDifficulty { timestamp_ms: 1000, difficulty: 10 },
            PowDifficulty { timestamp_ms: 2000, difficulty: 20 },
            PowDifficulty { timestamp_ms: 3000, difficulty: 5 },
        ];
        // All three are inside the ±15 min window; window min is 5 and
        // the most recent before 2500 carries 20.
        assert_eq!(valid_difficulty(2500, &history), 5);
    }

    #[test]
    fn difficulty_recent_rule_applies_outside_window() {
        let history = [
            PowDifficulty { timestamp_ms: 1000, difficulty: 7 },
            PowDifficulty { timestamp_ms: 2000, difficulty: 9 },
        ];
        // Submission an hour later: window empty, most recent is 9.
        let t = 2000 + 60 * 60 * 1000;
        assert_eq!(valid_difficulty(t, &history), 9);
    }

    #[test]
    fn empty_history_is_int_max() {
        assert_eq!(valid_difficulty(123_456, &[]), i32::MAX);
    }

    #[test]
    fn future_only_history_uses_window() {
        let history = [PowDifficulty { timestamp_ms: 5000, difficulty: 3 }];
        // Entry is after the submission but inside the window.
        assert_eq!(valid_difficulty(4000, &history), 3);
    }
}
