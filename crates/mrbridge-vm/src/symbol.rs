//! Symbol interning

use rustc_hash::FxHashMap;

/// Interned symbol id
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(u32);

impl Sym {
    /// Rebuild a symbol from its raw id
    #[inline]
    pub const fn from_u32(id: u32) -> Self {
        Sym(id)
    }

    /// Raw id
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Bidirectional name table. Ids are dense and never reused.
#[derive(Debug, Default)]
pub struct SymbolTable {
    names: Vec<Box<[u8]>>,
    index: FxHashMap<Box<[u8]>, Sym>,
}

impl SymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning the existing id when already present
    pub fn intern(&mut self, name: &[u8]) -> Sym {
        if let Some(&sym) = self.index.get(name) {
            return sym;
        }
        let sym = Sym(self.names.len() as u32);
        let owned: Box<[u8]> = name.into();
        self.names.push(owned.clone());
        self.index.insert(owned, sym);
        sym
    }

    /// Intern a UTF-8 name
    #[inline]
    pub fn intern_str(&mut self, name: &str) -> Sym {
        self.intern(name.as_bytes())
    }

    /// Look up a name without interning it
    pub fn lookup(&self, name: &[u8]) -> Option<Sym> {
        self.index.get(name).copied()
    }

    /// Name bytes of `sym`
    pub fn name(&self, sym: Sym) -> Option<&[u8]> {
        self.names.get(sym.0 as usize).map(|n| &**n)
    }

    /// Name of `sym` as lossy UTF-8, `"?"` for unknown ids
    pub fn name_lossy(&self, sym: Sym) -> String {
        match self.name(sym) {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => "?".to_string(),
        }
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.intern(b"foo");
        let b = table.intern_str("foo");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_reverse_lookup() {
        let mut table = SymbolTable::new();
        let foo = table.intern(b"foo");
        let bar = table.intern(b"bar");
        assert_ne!(foo, bar);
        assert_eq!(table.name(foo), Some(&b"foo"[..]));
        assert_eq!(table.name(bar), Some(&b"bar"[..]));
        assert_eq!(table.name(Sym::from_u32(99)), None);
        assert_eq!(table.name_lossy(Sym::from_u32(99)), "?");
    }

    #[test]
    fn test_lookup_does_not_intern() {
        let mut table = SymbolTable::new();
        assert_eq!(table.lookup(b"missing"), None);
        assert!(table.is_empty());
        let s = table.intern(b"present");
        assert_eq!(table.lookup(b"present"), Some(s));
    }
}
