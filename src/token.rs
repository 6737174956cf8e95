use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell_placeholder::IsoTimestampRegex;

/// A resumable cursor over issue `Date`s: base64 of a microsecond-precision
/// UTC ISO-8601 timestamp. Byte-for-byte wire format matters here — clients
/// round-trip this token across polls.
pub fn encode(since: &str) -> String {
    STANDARD.encode(since.as_bytes())
}

pub fn decode(token: &str) -> Option<String> {
    let bytes = STANDARD.decode(token).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    if IsoTimestampRegex::is_match(&text) {
        Some(text)
    } else {
        None
    }
}

mod once_cell_placeholder {
    /// Hand-rolled check instead of pulling in a regex crate for one
    /// fixed-width pattern: `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
    pub struct IsoTimestampRegex;

    impl IsoTimestampRegex {
        pub fn is_match(s: &str) -> bool {
            let bytes = s.as_bytes();
            if bytes.len() != 27 {
                return false;
            }
            let digit = |i: usize| bytes[i].is_ascii_digit();
            let digits = |range: std::ops::Range<usize>| range.clone().all(digit);
            digits(0..4)
                && bytes[4] == b'-'
                && digits(5..7)
                && bytes[7] == b'-'
                && digits(8..10)
                && bytes[10] == b'T'
                && digits(11..13)
                && bytes[13] == b':'
                && digits(14..16)
                && bytes[16] == b':'
                && digits(17..19)
                && bytes[19] == b'.'
                && digits(20..26)
                && bytes[26] == b'Z'
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_valid_timestamp() {
        let ts = "2020-01-02T03:04:05.123456Z";
        let token = encode(ts);
        assert_eq!(decode(&token).as_deref(), Some(ts));
    }

    #[test]
    fn rejects_malformed_decoded_payload() {
        let token = STANDARD.encode(b"not-a-timestamp");
        assert!(decode(&token).is_none());
    }

    #[test]
    fn rejects_non_base64() {
        assert!(decode("not base64!!").is_none());
    }
}
