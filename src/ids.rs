use uuid::Uuid;

/// Length of the hex identifiers handed out for ledgers and installments.
pub const OBJECT_ID_LEN: usize = 24;

/// A fresh 24-character lowercase hex identifier.
///
/// Built from the fully random bytes of a v4 UUID (the version and variant
/// bytes in the middle are skipped), so every character carries entropy.
pub fn new_object_id() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    bytes[..6]
        .iter()
        .chain(bytes[10..].iter())
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// True when `s` has the shape of an identifier this service hands out.
/// Callers answer anything else with "not found".
pub fn is_object_id(s: &str) -> bool {
    s.len() == OBJECT_ID_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
