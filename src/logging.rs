//! Log sanitization helpers.
//!
//! Full trade ids, transaction hashes and message uids allow correlation
//! across log aggregators. We log truncated forms (head + tail) that are
//! still unique enough for debugging.

/// Sanitize a trade id for logs: first 8 + last 4 chars.
pub fn sanitize_trade_id(trade_id: &str) -> String {
    shorten(trade_id, 8, 4)
}

/// Sanitize a transaction id for logs: first 8 + last 4 chars.
pub fn sanitize_tx_id(tx_id: &str) -> String {
    shorten(tx_id, 8, 4)
}

/// Sanitize a message uid for logs: first 8 chars only.
pub fn sanitize_uid(uid: &str) -> String {
    // Trade ids and uids come off the wire, so slice on char boundaries.
    match uid.char_indices().nth(8) {
        Some((idx, _)) => format!("{}...", &uid[..idx]),
        None => uid.to_string(),
    }
}

fn shorten(value: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= head + tail {
        value.to_string()
    } else {
        let head_part: String = chars[..head].iter().collect();
        let tail_part: String = chars[chars.len() - tail..].iter().collect();
        format!("{}...{}", head_part, tail_part)
    }
}
