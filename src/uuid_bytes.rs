use bincode::{Decode, Encode};
use std::fmt;
use uuid::Uuid;

/// 16 raw uuid bytes. The derived byte-wise ordering is the total order used
/// to break merge negotiation races between peers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Encode, Decode)]
#[repr(transparent)]
pub struct UuidBytes([u8; 16]);

impl UuidBytes {
    pub fn new() -> Self {
        UuidBytes(*Uuid::new_v4().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        UuidBytes(bytes)
    }
}

impl Default for UuidBytes {
    fn default() -> Self {
        Self::new()
    }
}

// Short form for log lines: the first four bytes are plenty to tell peers apart.
impl fmt::Display for UuidBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_bytewise() {
        let mut lo = [0u8; 16];
        let mut hi = [0u8; 16];
        lo[15] = 9;
        hi[0] = 1;
        assert!(UuidBytes::from_bytes(lo) < UuidBytes::from_bytes(hi));
    }

    #[test]
    fn display_is_short_hex() {
        let mut b = [0u8; 16];
        b[0] = 0xab;
        b[3] = 0x01;
        assert_eq!(UuidBytes::from_bytes(b).to_string(), "ab000001");
    }
}
