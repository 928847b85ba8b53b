//! ICY metadata block encoding.
//!
//! The Shoutcast/Icecast convention interleaves length-prefixed metadata
//! packets into the audio byte stream: a single length byte counting 16-byte
//! units, then the text padded with `0x00` up to that length.  An empty text
//! is the one-byte packet `[0x00]`.

use bytes::Bytes;

/// Size of one length-byte unit.
pub const BLOCK_UNIT: usize = 16;

/// Maximum encodable payload (255 units of 16 bytes).
pub const MAX_PAYLOAD: usize = 255 * BLOCK_UNIT;

/// Encode `text` as an on-wire ICY metadata block.
///
/// The payload is truncated to [`MAX_PAYLOAD`] bytes; the result is
/// `1 + 16 * ceil(len / 16)` bytes long, or exactly one zero byte for empty
/// input.  Sanitation of the text (quotes, whitespace) is the formatter's
/// job, not the codec's.
pub fn encode_block(text: &str) -> Bytes {
    if text.is_empty() {
        return Bytes::from_static(&[0x00]);
    }

    let mut payload = text.as_bytes();
    if payload.len() > MAX_PAYLOAD {
        payload = &payload[..MAX_PAYLOAD];
    }

    let units = payload.len().div_ceil(BLOCK_UNIT);
    let padded = units * BLOCK_UNIT;

    let mut out = Vec::with_capacity(1 + padded);
    out.push(units as u8);
    out.extend_from_slice(payload);
    out.resize(1 + padded, 0x00);

    Bytes::from(out)
}

/// Find `key='value';` inside a semicolon-separated ICY string.
///
/// Used by the cover endpoint to pull `Artwork='...';` back out of the
/// published text.
pub fn extract_kv<'a>(icy: &'a str, key: &str) -> Option<&'a str> {
    let start = icy.find(&format!("{key}='"))? + key.len() + 2;
    let rest = &icy[start..];
    let end = rest.find("';")?;
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_single_zero_byte() {
        assert_eq!(encode_block("").as_ref(), &[0x00]);
    }

    #[test]
    fn exact_unit_needs_no_padding() {
        let block = encode_block("0123456789abcdef");
        assert_eq!(block.len(), 17);
        assert_eq!(block[0], 1);
        assert_eq!(&block[1..], b"0123456789abcdef");
    }

    #[test]
    fn one_past_unit_pads_fifteen_zeroes() {
        let block = encode_block("0123456789abcdefg");
        assert_eq!(block.len(), 33);
        assert_eq!(block[0], 2);
        assert_eq!(&block[1..18], b"0123456789abcdefg");
        assert!(block[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn max_payload_uses_length_byte_255() {
        let text = "x".repeat(MAX_PAYLOAD);
        let block = encode_block(&text);
        assert_eq!(block.len(), 4081);
        assert_eq!(block[0], 255);
    }

    #[test]
    fn oversized_payload_is_truncated() {
        let text = "y".repeat(5000);
        let block = encode_block(&text);
        assert_eq!(block.len(), 4081);
        assert_eq!(block[0], 255);
        assert!(block[1..].iter().all(|&b| b == b'y'));
    }

    #[test]
    fn length_formula_holds_for_small_inputs() {
        for len in 1..64usize {
            let text = "a".repeat(len);
            let block = encode_block(&text);
            assert_eq!(block.len(), 1 + BLOCK_UNIT * len.div_ceil(BLOCK_UNIT));
        }
    }

    #[test]
    fn extract_kv_finds_value() {
        let icy = "StreamTitle='Miles Davis - So What';Artwork='http://x/c.jpg';";
        assert_eq!(
            extract_kv(icy, "StreamTitle"),
            Some("Miles Davis - So What")
        );
        assert_eq!(extract_kv(icy, "Artwork"), Some("http://x/c.jpg"));
        assert_eq!(extract_kv(icy, "StreamUrl"), None);
    }
}
