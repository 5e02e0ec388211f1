use serde::Serialize;
use std::fmt;

/// A deterministic content hash used for change detection.
///
/// Checksums are the first 64 bits of the BLAKE3 digest of a value's canonical JSON encoding, so
/// they are stable across processes as long as the value's set-like fields are sorted before
/// hashing and maps are ordered.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Checksum(u64);

impl Checksum {
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Self {
        let mut hasher = blake3::Hasher::new();
        serde_json::to_writer(&mut hasher, value)
            .expect("model values must serialize with string map keys");
        Self::from_hash(hasher.finalize())
    }

    /// Combines checksums independently of their order.
    ///
    /// The inputs are sorted and hashed as a sequence, so any permutation of the same multiset of
    /// checksums combines to the same value while distinct multisets are not prone to the
    /// cancellation that summing or XOR-ing would have.
    pub fn combine(checksums: impl IntoIterator<Item = Checksum>) -> Self {
        let mut sorted = checksums.into_iter().collect::<Vec<_>>();
        sorted.sort_unstable();

        let mut hasher = blake3::Hasher::new();
        for Checksum(c) in sorted {
            hasher.update(&c.to_be_bytes());
        }
        Self::from_hash(hasher.finalize())
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    fn from_hash(hash: blake3::Hash) -> Self {
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_be_bytes(head))
    }
}

impl From<u64> for Checksum {
    fn from(c: u64) -> Self {
        Self(c)
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_is_order_independent() {
        let a = Checksum::of("a");
        let b = Checksum::of("b");
        let c = Checksum::of("c");
        assert_eq!(
            Checksum::combine([a, b, c]),
            Checksum::combine([c, a, b]),
        );
        assert_ne!(Checksum::combine([a, b]), Checksum::combine([a, b, c]));
    }

    #[test]
    fn combine_does_not_cancel_duplicates() {
        let a = Checksum::of("a");
        let b = Checksum::of("b");
        // XOR-folding would make both of these equal to `b`.
        assert_ne!(Checksum::combine([a, a, b]), Checksum::combine([b]));
        assert_ne!(Checksum::combine([a, a]), Checksum::combine([]));
    }

    #[test]
    fn checksums_are_stable() {
        assert_eq!(Checksum::of(&("svc", 80)), Checksum::of(&("svc", 80)));
        assert_ne!(Checksum::of(&("svc", 80)), Checksum::of(&("svc", 81)));
    }
}
