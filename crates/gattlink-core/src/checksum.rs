/// Computes the inverted 8-bit wrapping sum of `bytes`.
pub fn checksum8(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0_u8, |acc, b| acc.wrapping_add(*b))
}

/// Returns `buffer` with its checksum appended as the final byte.
pub fn append_checksum(buffer: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(buffer.len() + 1);
    out.extend_from_slice(buffer);
    out.push(checksum8(buffer));
    out
}

/// Checks that the trailing byte of `buffer` is the checksum of the bytes before it.
///
/// An empty buffer never verifies.
pub fn verify_checksum(buffer: &[u8]) -> bool {
    match buffer.split_last() {
        Some((crc, body)) => checksum8(body) == *crc,
        None => false,
    }
}

/// Strips and verifies the trailing checksum, returning the message body.
pub fn strip_checksum(buffer: &[u8]) -> Option<&[u8]> {
    if verify_checksum(buffer) {
        Some(&buffer[..buffer.len() - 1])
    } else {
        None
    }
}
