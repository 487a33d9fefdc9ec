//! Splitting of raw reads into newline-delimited units.
//!
//! Each read is split independently. Bytes after the last `\n` of a read are
//! discarded rather than carried over into the next read, so a unit split across
//! two reads is lost.

/// The units in a single read, in order.
///
/// Only `\n`-terminated, non-empty units are returned.
pub fn split_units(chunk: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(chunk);

    let Some(terminated) = text.rfind('\n').map(|end| &text[..end]) else {
        return Vec::new();
    };

    terminated
        .split('\n')
        .filter(|unit| !unit.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty() {
        assert!(split_units(b"").is_empty());
    }

    #[test]
    fn single_unit() {
        assert_eq!(split_units(b"hello\n"), vec!["hello"]);
    }

    #[test]
    fn many_units() {
        assert_eq!(split_units(b"a\nbb\nccc\n"), vec!["a", "bb", "ccc"]);
    }

    #[test]
    fn skips_empty_units() {
        assert_eq!(split_units(b"\n\na\n\nb\n"), vec!["a", "b"]);
    }

    #[test]
    fn unterminated_tail_is_dropped() {
        assert_eq!(split_units(b"abc\nde"), vec!["abc"]);
    }

    #[test]
    fn no_newline_yields_nothing() {
        assert!(split_units(b"partial").is_empty());
    }

    #[test]
    fn tail_is_not_carried_into_next_read() {
        let mut units = split_units(b"abc\nde");
        units.extend(split_units(b"f\n"));

        assert_eq!(units, vec!["abc", "f"]);
    }

    #[test]
    fn keeps_carriage_returns() {
        assert_eq!(split_units(b"hi\r\n"), vec!["hi\r"]);
    }
}
