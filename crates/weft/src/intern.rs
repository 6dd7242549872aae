//! Name interning for identifiers, field names, and file names.
//!
//! The middle end compares names constantly (candidate lookup, field access,
//! signature matching), so names are stored once in an [`Interner`] and passed
//! around as 4-byte [`NameId`]s. The front end populates the interner while
//! producing the normalized AST; passes only add names when synthesizing
//! functions, wrappers, and temps.
//!
//! A fixed set of names the middle end itself needs (`this`, `advance`,
//! `getValue`, ...) is pre-interned at construction so passes can refer to
//! them through [`WellKnown`] without a lookup.

use ahash::AHashMap;
use strum::{EnumCount, FromRepr, IntoStaticStr};

/// Index into the interner's storage.
///
/// Uses `u32` to save space; the id range is far beyond what a single
/// compilation can produce.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct NameId(u32);

impl NameId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Names the middle end refers to by identity, pre-interned at offset 0.
///
/// The discriminant is the `NameId` index, so conversion is free in both
/// directions. The string form is the source-level spelling.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr, EnumCount)]
pub enum WellKnown {
    #[strum(serialize = "")]
    Empty,
    #[strum(serialize = "this")]
    This,
    #[strum(serialize = "_mt")]
    MethodToken,
    #[strum(serialize = "chpl__initCopy")]
    InitCopy,
    #[strum(serialize = "chpl__autoCopy")]
    AutoCopy,
    #[strum(serialize = "chpl__autoDestroy")]
    AutoDestroy,
    #[strum(serialize = "these")]
    These,
    #[strum(serialize = "advance")]
    Advance,
    #[strum(serialize = "hasMore")]
    HasMore,
    #[strum(serialize = "getValue")]
    GetValue,
    #[strum(serialize = "zip1")]
    Zip1,
    #[strum(serialize = "zip2")]
    Zip2,
    #[strum(serialize = "zip3")]
    Zip3,
    #[strum(serialize = "zip4")]
    Zip4,
    #[strum(serialize = "_getIterator")]
    GetIterator,
    #[strum(serialize = "locale")]
    Locale,
    #[strum(serialize = "addr")]
    Addr,
    #[strum(serialize = "size")]
    Size,
    #[strum(serialize = "value")]
    HeapValue,
    #[strum(serialize = "_endCount")]
    EndCount,
    #[strum(serialize = "_val")]
    RefVal,
    #[strum(serialize = "super")]
    Super,
    #[strum(serialize = "_root")]
    Root,
    #[strum(serialize = "_Program")]
    Program,
    #[strum(serialize = "=")]
    Assign,
    #[strum(serialize = "_construct")]
    Construct,
    #[strum(serialize = "_type_construct")]
    TypeConstruct,
    #[strum(serialize = "~destroy")]
    Destroy,
    #[strum(serialize = "main")]
    Main,
}

impl WellKnown {
    /// The pre-interned id of this name.
    #[inline]
    #[must_use]
    pub fn id(self) -> NameId {
        NameId(self as u32)
    }
}

/// Interner storing each distinct name once.
///
/// Lookup is hash-based; resolution back to `&str` is a vector index. Names
/// are never removed, so `NameId`s stay valid for the life of the program.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Interner {
    names: Vec<Box<str>>,
    #[serde(skip)]
    lookup: AHashMap<Box<str>, u32>,
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl Interner {
    /// Creates an interner with the [`WellKnown`] set pre-seeded.
    #[must_use]
    pub fn new() -> Self {
        let mut interner = Self {
            names: Vec::new(),
            lookup: AHashMap::new(),
        };
        for i in 0..WellKnown::COUNT as u32 {
            let wk = WellKnown::from_repr(i).expect("contiguous discriminants");
            let id = interner.intern(<&'static str>::from(wk));
            debug_assert_eq!(id, wk.id());
        }
        interner
    }

    /// Interns `name`, returning the existing id if it was seen before.
    pub fn intern(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.lookup.get(name) {
            return NameId(id);
        }
        let id = u32::try_from(self.names.len()).expect("interner overflow");
        self.names.push(name.into());
        self.lookup.insert(name.into(), id);
        NameId(id)
    }

    /// Interns the concatenation of `prefix` and `name`.
    ///
    /// Passes use this for derived names (`_local_f`, `wrapf`, `heap_int32`)
    /// without building an intermediate `String` at every call site.
    pub fn intern_prefixed(&mut self, prefix: &str, name: NameId) -> NameId {
        let joined = format!("{prefix}{}", self.resolve(name));
        self.intern(&joined)
    }

    /// Resolves an id back to its string.
    #[must_use]
    pub fn resolve(&self, id: NameId) -> &str {
        &self.names[id.index()]
    }

    /// Number of distinct names interned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if nothing beyond the pre-seeded names is interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.len() <= WellKnown::COUNT
    }

    /// Rebuilds the hash lookup after deserialization.
    pub fn rebuild_lookup(&mut self) {
        self.lookup = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u32))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_stable() {
        let mut interner = Interner::new();
        let a = interner.intern("foo");
        let b = interner.intern("bar");
        let c = interner.intern("foo");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), "foo");
        assert_eq!(interner.resolve(b), "bar");
    }

    #[test]
    fn well_known_ids_resolve_to_spelling() {
        let interner = Interner::new();
        assert_eq!(interner.resolve(WellKnown::This.id()), "this");
        assert_eq!(interner.resolve(WellKnown::GetIterator.id()), "_getIterator");
        assert_eq!(interner.resolve(WellKnown::MethodToken.id()), "_mt");
    }

    #[test]
    fn prefixed_names_share_storage() {
        let mut interner = Interner::new();
        let f = interner.intern("f");
        let local = interner.intern_prefixed("_local_", f);
        assert_eq!(interner.resolve(local), "_local_f");
        assert_eq!(interner.intern("_local_f"), local);
    }
}
