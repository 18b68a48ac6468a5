use std::cmp::Ordering;
use std::sync::RwLock;

use fxhash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

/// A 16-byte inline string fingerprint: the first eight bytes of the
/// string (zero-padded) followed by the xxh3 hash of the whole string.
///
/// Two strings with the same fingerprint are treated as equal without a
/// table lookup. Ordering compares the prefix first and only falls back
/// to the interned full strings when the prefixes tie.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SiloString(pub [u8; 16]);

pub const SILO_STRING_SIZE: usize = 16;

impl SiloString {
    pub fn new(value: &str) -> Self {
        let mut bytes = [0u8; 16];
        let prefix_len = value.len().min(8);
        bytes[..prefix_len].copy_from_slice(&value.as_bytes()[..prefix_len]);
        bytes[8..].copy_from_slice(&xxh3_64(value.as_bytes()).to_le_bytes());
        SiloString(bytes)
    }

    pub fn prefix(&self) -> &[u8; 8] {
        self.0[..8].try_into().expect("slice length is 8")
    }

    /// Whether ordering against a fingerprint with an equal prefix needs
    /// the full strings: only when the string may extend past the prefix.
    pub fn prefix_is_exhaustive(&self) -> bool {
        self.0[..8].contains(&0)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        SiloString(bytes)
    }
}

/// The process-local table resolving fingerprints back to full strings.
///
/// Shared by all partitions of one STRING column. Writes happen only
/// during ingest and load; the query path reads.
#[derive(Debug, Default)]
pub struct Interner {
    strings: RwLock<FxHashMap<SiloString, String>>,
}

impl Interner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint `value`, remembering the full string for later
    /// resolution.
    pub fn intern(&self, value: &str) -> SiloString {
        let fingerprint = SiloString::new(value);
        let known = self
            .strings
            .read()
            .expect("interner lock poisoned")
            .contains_key(&fingerprint);
        if !known {
            self.strings
                .write()
                .expect("interner lock poisoned")
                .insert(fingerprint, value.to_string());
        }
        fingerprint
    }

    pub fn resolve(&self, fingerprint: &SiloString) -> Option<String> {
        self.strings
            .read()
            .expect("interner lock poisoned")
            .get(fingerprint)
            .cloned()
    }

    /// Order two fingerprints, resolving full strings only when the
    /// prefix comparison ties and may be incomplete.
    pub fn compare(&self, left: &SiloString, right: &SiloString) -> Ordering {
        if left == right {
            return Ordering::Equal;
        }
        match left.prefix().cmp(right.prefix()) {
            Ordering::Equal => {}
            unequal => return unequal,
        }
        if left.prefix_is_exhaustive() && right.prefix_is_exhaustive() {
            // Both strings fit the prefix entirely; equal prefixes with
            // unequal hashes can only come from a hash collision.
            return left.0[8..].cmp(&right.0[8..]);
        }
        let left_full = self.resolve(left);
        let right_full = self.resolve(right);
        left_full.cmp(&right_full)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_equal_strings_share_a_fingerprint() {
        assert_eq!(SiloString::new("Switzerland"), SiloString::new("Switzerland"));
        assert_ne!(SiloString::new("Switzerland"), SiloString::new("Germany"));
    }

    #[test]
    fn test_long_strings_with_shared_prefix_differ_by_hash() {
        let left = SiloString::new("prefix--left");
        let right = SiloString::new("prefix--right");
        assert_eq!(left.prefix(), right.prefix());
        assert_ne!(left, right);
    }

    #[test]
    fn test_intern_and_resolve_round_trip() {
        let interner = Interner::new();
        let fingerprint = interner.intern("Basel-Landschaft");
        assert_eq!(
            interner.resolve(&fingerprint),
            Some("Basel-Landschaft".to_string())
        );
        assert_eq!(interner.resolve(&SiloString::new("unseen")), None);
    }

    #[test]
    fn test_compare_orders_like_strings() {
        let interner = Interner::new();
        let mut values = ["Germany", "Switzerland", "Ghana", "prefix--right", "prefix--left", ""];
        let mut fingerprints: Vec<_> = values.iter().map(|v| interner.intern(v)).collect();
        fingerprints.sort_by(|a, b| interner.compare(a, b));
        values.sort();
        let resolved: Vec<_> = fingerprints
            .iter()
            .map(|f| interner.resolve(f).unwrap())
            .collect();
        assert_eq!(resolved, values);
    }
}
