/// ANCILLARY DATA HELPERS
///
/// Question encoding for binary queries and the stamp that ties an escalated
/// sub-request back to the request it came from.

use vouch_core::{AncillaryData, RequestKey};

/// Key under which the origin request digest is appended
pub const CHILD_REQUEST_KEY: &str = "childRequest";

/// Length of the stamp appended by `stamp_child_request`
pub const CHILD_STAMP_LEN: usize = 1 + CHILD_REQUEST_KEY.len() + 1 + 64;

/// Ancillary payload for the escalated sub-request of `origin`
pub fn stamp_child_request(origin: &RequestKey) -> AncillaryData {
    origin
        .ancillary
        .append_key_value(CHILD_REQUEST_KEY, &origin.digest_hex())
}

/// Size `ancillary` will have once stamped for escalation
pub fn stamped_len(ancillary: &AncillaryData) -> usize {
    ancillary.len() + CHILD_STAMP_LEN
}

/// Origin digest carried by a stamped payload, if any
pub fn child_request_digest(ancillary: &AncillaryData) -> Option<String> {
    let text = std::str::from_utf8(ancillary.as_bytes()).ok()?;
    let marker = format!("{}:", CHILD_REQUEST_KEY);
    let start = text.rfind(&marker)? + marker.len();
    let digest = &text[start..];
    if digest.len() == 64 && digest.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(digest.to_string())
    } else {
        None
    }
}

/// Encode a yes/no question with the resolution table consumers rely on
pub fn yes_or_no_question(title: &str, description: &str) -> AncillaryData {
    AncillaryData::new(format!(
        "q: title: {}, description: {} res_data: p1: 0, p2: 1, p3: 0.5. \
         Where p1 corresponds to No, p2 to Yes, p3 to unknown",
        title, description
    ))
}
