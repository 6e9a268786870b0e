//! Alphabet policy shared by every graph operation.

/// An alphabet symbol. Both signed and unsigned alphabets of up to 32 bits
/// fit without loss, so ordinary integer comparison orders keys.
pub type Key = i64;

/// Describes the bounds and signedness of the alphabet a machine is built
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyOps {
    signed: bool,
    min_key: Key,
    max_key: Key,
}

impl KeyOps {
    /// Instantiates a new alphabet covering `min_key..=max_key`.
    pub fn new(signed: bool, min_key: Key, max_key: Key) -> Self {
        assert!(min_key <= max_key, "alphabet bounds are inverted");
        Self {
            signed,
            min_key,
            max_key,
        }
    }

    /// An unsigned byte alphabet, `0..=255`.
    pub fn unsigned_byte() -> Self {
        Self::new(false, 0, u8::MAX as Key)
    }

    /// A signed byte alphabet, `-128..=127`.
    pub fn signed_byte() -> Self {
        Self::new(true, i8::MIN as Key, i8::MAX as Key)
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    pub fn min_key(&self) -> Key {
        self.min_key
    }

    pub fn max_key(&self) -> Key {
        self.max_key
    }

    /// Returns the inclusive count of symbols in `low..=high`.
    pub fn span(&self, low: Key, high: Key) -> u64 {
        debug_assert!(low <= high);
        (high - low) as u64 + 1
    }

    /// Returns the number of symbols in the whole alphabet.
    pub fn alphabet_size(&self) -> u64 {
        self.span(self.min_key, self.max_key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.min_key <= key && key <= self.max_key
    }

    pub fn increment(&self, key: Key) -> Key {
        key + 1
    }

    pub fn decrement(&self, key: Key) -> Key {
        key - 1
    }

    /// Returns true if `high` is directly followed by `low` with no symbols
    /// in between.
    pub fn adjacent(&self, high: Key, low: Key) -> bool {
        high < self.max_key && self.increment(high) == low
    }
}

impl Default for KeyOps {
    fn default() -> Self {
        Self::unsigned_byte()
    }
}
