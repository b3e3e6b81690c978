//! Interning for the small, high-repetition string sets that flow through
//! every `SecurityDescriptor`: labels (`"secret"`, `"public"`), taint tags
//! (`"src:mcp"`, `"src:exec"`), and source entries (`"cmd:git"`).
//!
//! Descriptors are merged on nearly every value produced by the evaluator, so
//! label/taint membership tests need to be cheap. Rather than hashing and
//! comparing full strings on every `merge`, we hand out small integer ids and
//! compare those instead. The interner is process-wide and append-only: ids
//! are never reused, so an id is valid for the lifetime of the process once
//! issued.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// An interned string id. Cheap to copy, compare, and hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct Interner {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, Symbol>,
}

impl Interner {
    fn new() -> Self {
        Self { strings: Vec::new(), lookup: HashMap::new() }
    }

    fn intern(&mut self, s: &str) -> Symbol {
        if let Some(sym) = self.lookup.get(s) {
            return *sym;
        }
        let sym = Symbol(self.strings.len() as u32);
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, sym);
        sym
    }

    fn resolve(&self, sym: Symbol) -> &str {
        &self.strings[sym.0 as usize]
    }
}

fn interner() -> &'static Mutex<Interner> {
    static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();
    INTERNER.get_or_init(|| Mutex::new(Interner::new()))
}

/// Interns `s`, returning a stable [`Symbol`] for it.
#[must_use]
pub fn intern(s: &str) -> Symbol {
    interner().lock().expect("interner poisoned").intern(s)
}

/// Resolves a previously interned symbol back to its string.
///
/// # Panics
/// Panics if `sym` was not produced by [`intern`] in this process.
#[must_use]
pub fn resolve(sym: Symbol) -> String {
    interner().lock().expect("interner poisoned").resolve(sym).to_string()
}

impl Symbol {
    #[must_use]
    pub fn as_str(self) -> String {
        resolve(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_interns_return_the_same_symbol() {
        let a = intern("src:mcp");
        let b = intern("src:mcp");
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_strings_get_distinct_symbols() {
        let a = intern("src:exec-distinct-test");
        let b = intern("src:http-distinct-test");
        assert_ne!(a, b);
    }

    #[test]
    fn resolve_round_trips() {
        let sym = intern("label:round-trip-test");
        assert_eq!(resolve(sym), "label:round-trip-test");
    }
}
