pub mod router;
pub mod transports;

// Just to hash the name into something nice and stable.
pub const fn fnv1a_16(s: &str) -> u16 {
    let mut hash: u32 = 0x811C_9DC5; // 32-bit offset basis
    let mut i = 0;
    let bytes = s.as_bytes();
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(0x0100_0193);
        i += 1;
    }
    (hash & 0xFFFF) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_ids_are_stable_and_distinct() {
        const A: u16 = fnv1a_16("hitucc.peer.v1");
        assert_eq!(A, fnv1a_16("hitucc.peer.v1"));
        assert_ne!(A, fnv1a_16("hitucc.peer.v2"));
    }
}
