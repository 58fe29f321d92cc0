use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Flags altering the behavior of put, get and listing operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Mode(u32);

impl Mode {
    pub const DEFAULT: Mode = Mode(0);
    /// Listing starts at `from_key` inclusive.
    pub const INCLUSIVE: Mode = Mode(1 << 0);
    /// Put appends to an existing value instead of replacing it.
    pub const APPEND: Mode = Mode(1 << 1);
    /// Get and listing erase what they return.
    pub const CONSUME: Mode = Mode(1 << 2);
    /// Put skips keys that already exist.
    pub const NEW_ONLY: Mode = Mode(1 << 4);
    /// Put skips keys that do not exist.
    pub const EXIST_ONLY: Mode = Mode(1 << 5);
    /// Listing strips the filter from returned keys.
    pub const NO_PREFIX: Mode = Mode(1 << 6);
    /// Listing returns values only.
    pub const IGNORE_KEYS: Mode = Mode(1 << 7);
    /// Like `IGNORE_KEYS`, but the last key of each page is kept so the
    /// caller can resume after it.
    pub const KEEP_LAST: Mode = Mode(1 << 7 | 1 << 8);
    /// The filter matches key suffixes instead of prefixes.
    pub const SUFFIX: Mode = Mode(1 << 9);

    const NAMES: [(Mode, &'static str); 9] = [
        (Mode::INCLUSIVE, "INCLUSIVE"),
        (Mode::APPEND, "APPEND"),
        (Mode::CONSUME, "CONSUME"),
        (Mode::NEW_ONLY, "NEW_ONLY"),
        (Mode::EXIST_ONLY, "EXIST_ONLY"),
        (Mode::NO_PREFIX, "NO_PREFIX"),
        (Mode::IGNORE_KEYS, "IGNORE_KEYS"),
        (Mode::KEEP_LAST, "KEEP_LAST"),
        (Mode::SUFFIX, "SUFFIX"),
    ];

    pub const fn from_bits(bits: u32) -> Mode {
        Mode(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Mode) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Mode) -> Mode {
        Mode(self.0 | other.0)
    }

    /// Bits of `self` that are not in `supported`.
    pub const fn difference(self, supported: Mode) -> Mode {
        Mode(self.0 & !supported.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Mode {
    type Output = Mode;

    fn bitor(self, rhs: Mode) -> Mode {
        self.union(rhs)
    }
}

impl BitOrAssign for Mode {
    fn bitor_assign(&mut self, rhs: Mode) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "Mode(DEFAULT)");
        }
        let mut names: Vec<String> = Mode::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| name.to_string())
            .collect();
        let known = Mode::NAMES.iter().fold(Mode::DEFAULT, |acc, (m, _)| acc | *m);
        let unknown = self.difference(known);
        if !unknown.is_empty() {
            names.push(format!("{:#x}", unknown.0));
        }
        write!(f, "Mode({})", names.join(" | "))
    }
}

/// Key filter applied by listings: a prefix, or a suffix under [`Mode::SUFFIX`].
#[derive(Debug, Clone, Copy)]
pub struct KeyFilter<'a> {
    pattern: &'a [u8],
    suffix: bool,
}

impl<'a> KeyFilter<'a> {
    pub fn new(pattern: &'a [u8], mode: Mode) -> Self {
        Self {
            pattern,
            suffix: mode.contains(Mode::SUFFIX),
        }
    }

    pub fn pattern(&self) -> &'a [u8] {
        self.pattern
    }

    pub fn is_suffix(&self) -> bool {
        self.suffix
    }

    /// The prefix every match shares, usable to bound an ordered scan.
    pub fn scan_prefix(&self) -> &'a [u8] {
        if self.suffix {
            &[]
        } else {
            self.pattern
        }
    }

    pub fn matches(&self, key: &[u8]) -> bool {
        if self.suffix {
            key.ends_with(self.pattern)
        } else {
            key.starts_with(self.pattern)
        }
    }

    /// Removes the matched pattern from a key that [`KeyFilter::matches`].
    pub fn strip<'k>(&self, key: &'k [u8]) -> &'k [u8] {
        if self.suffix {
            &key[..key.len() - self.pattern.len()]
        } else {
            &key[self.pattern.len()..]
        }
    }
}
