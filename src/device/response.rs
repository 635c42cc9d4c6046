//! response.rs
//! Pulls fields and numeric triples out of device responses.
//!
//! Responses are semicolon-delimited; vector values come back as a bracketed
//! triple `[x,y,z]`. The historical behavior on malformed input is to read
//! zero and carry on, so the zero-defaulting view lives next to a parser
//! that still says which components actually parsed.

use crate::vec3::Vec3;

/// The `index`-th semicolon-delimited field of `response`, 1-indexed,
/// returned verbatim without the terminating `;`. Runs past the end of a
/// short response into the empty string rather than failing.
pub fn field(response: &str, index: usize) -> &str {
    let mut begin = 0;
    let mut end = response.len();
    let mut remaining = index;
    for _ in 0..index {
        end = begin
            + response[begin..]
                .find(';')
                .unwrap_or(response.len() - begin);
        remaining -= 1;
        if remaining > 0 {
            begin = (end + 1).min(response.len());
        }
    }
    &response[begin.min(end)..end]
}

/// Parse a bracketed triple, reporting per-component success. The scan skips
/// the leading `[`, takes characters up to the first two commas and the
/// closing `]`; a component that does not parse as a float is `None`.
pub fn parse_triple(input: &str) -> [Option<f64>; 3] {
    let mut chars = input.chars();
    chars.next(); // leading '['

    let mut components: [Option<f64>; 3] = [None, None, None];
    let mut current = String::new();
    let mut slot = 0;
    for c in chars {
        let closes = if slot < 2 { c == ',' } else { c == ']' };
        if closes {
            components[slot] = current.trim().parse::<f64>().ok();
            current.clear();
            slot += 1;
            if slot == 3 {
                break;
            }
        } else {
            current.push(c);
        }
    }
    // Unterminated input: whatever accumulated still counts for the open slot.
    if slot < 3 && !current.is_empty() {
        components[slot] = current.trim().parse::<f64>().ok();
    }
    components
}

/// Zero-defaulting view of [`parse_triple`], matching the device's historical
/// tolerance for malformed vectors.
pub fn triple_or_zero(input: &str) -> Vec3 {
    let parsed = parse_triple(input);
    [
        parsed[0].unwrap_or(0.0),
        parsed[1].unwrap_or(0.0),
        parsed[2].unwrap_or(0.0),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triple_parses_mixed_precision_components() {
        assert_eq!(triple_or_zero("[1.5,-2,3.25]"), [1.5, -2.0, 3.25]);
    }

    #[test]
    fn bracketless_garbage_defaults_to_zero() {
        assert_eq!(triple_or_zero("no vector here"), [0.0, 0.0, 0.0]);
        // ...and the parser can still tell that nothing actually parsed.
        assert_eq!(parse_triple("no vector here"), [None, None, None]);
    }

    #[test]
    fn legitimate_zero_is_distinguishable_from_parse_failure() {
        let parsed = parse_triple("[0,junk,0]");
        assert_eq!(parsed[0], Some(0.0));
        assert_eq!(parsed[1], None);
        assert_eq!(parsed[2], Some(0.0));
    }

    #[test]
    fn nth_field_of_multi_field_response() {
        let response = "[1,2,3];[4,5,6];[7,8,9];[10,11,12];";
        assert_eq!(field(response, 1), "[1,2,3]");
        assert_eq!(field(response, 3), "[7,8,9]");
        assert_eq!(field(response, 4), "[10,11,12]");
    }

    #[test]
    fn field_past_the_end_is_empty() {
        assert_eq!(field("one;two;", 5), "");
    }

    #[test]
    fn field_without_terminator_runs_to_end_of_string() {
        assert_eq!(field("true", 1), "true");
    }
}
