use crate::error::{DocrestError, Result};

/// Token stored on a freshly created document.
pub fn initial_seq() -> String {
    "1".to_string()
}

/// Advance a sequence token by one.
pub fn next_seq(seq: &str) -> Result<String> {
    let n: i64 = seq
        .parse()
        .map_err(|_| DocrestError::BadRequest(format!("invalid seq '{seq}'")))?;
    let next = n
        .checked_add(1)
        .ok_or_else(|| DocrestError::BadRequest(format!("seq '{seq}' overflows")))?;
    Ok(if next == 0 { 1 } else { next }.to_string())
}
