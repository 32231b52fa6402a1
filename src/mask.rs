/// Generates a fresh masking key for an outbound frame.
///
/// Client frames only need keys that are not reused in a predictable pattern, so the
/// thread-local generator of `rand` is sufficient.
#[inline]
pub fn random_mask() -> [u8; 4] {
    rand::random()
}

/// Mask/unmask a payload in place: byte `i` is XOR-ed with `mask[i % 4]`.
///
/// Applying the same key twice yields the original payload.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);

    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]) ^ mask_u32;
        word.copy_from_slice(&value.to_ne_bytes());
    }
    // the tail starts at a multiple of 4, so it lines up with the key again
    apply_mask_bytewise(words.into_remainder(), mask);
}

/// Straightforward byte-at-a-time masking.
#[inline]
fn apply_mask_bytewise(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
