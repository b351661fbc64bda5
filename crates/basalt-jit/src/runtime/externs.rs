//! Registry of host functions that compiled code may call
//!
//! Lowering resolves calls by name; the backend registers every entry as a
//! symbol with the JIT linker.

use rustc_hash::FxHashMap;

use super::helpers;

/// Name of the helper used for a call with `argc` arguments
pub fn funcall_name(argc: usize) -> String {
    format!("basalt_funcall_{}", argc)
}

/// Name of the throw helper
pub const THROW_HELPER: &str = "basalt_throw";

/// A callable host function. All parameters and the result are `u64`.
#[derive(Debug, Clone)]
pub struct ExternFunction {
    pub name: String,
    pub arity: usize,
    pub address: *const u8,
}

// Safety: `address` points at a host function that outlives every compiled
// method and is never written through.
unsafe impl Send for ExternFunction {}
unsafe impl Sync for ExternFunction {}

/// Name-indexed table of host functions
#[derive(Debug, Clone, Default)]
pub struct ExternTable {
    entries: FxHashMap<String, ExternFunction>,
}

impl ExternTable {
    /// An empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// The helpers in [`helpers`]: `basalt_funcall_0..=3` and `basalt_throw`
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(funcall_name(0), 2, helpers::basalt_funcall_0 as *const u8);
        table.register(funcall_name(1), 3, helpers::basalt_funcall_1 as *const u8);
        table.register(funcall_name(2), 4, helpers::basalt_funcall_2 as *const u8);
        table.register(funcall_name(3), 5, helpers::basalt_funcall_3 as *const u8);
        table.register(THROW_HELPER, 2, helpers::basalt_throw as *const u8);
        table
    }

    /// Register or replace `name`
    pub fn register(&mut self, name: impl Into<String>, arity: usize, address: *const u8) {
        let name = name.into();
        self.entries.insert(
            name.clone(),
            ExternFunction {
                name,
                arity,
                address,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&ExternFunction> {
        self.entries.get(name)
    }

    /// Look up `name` and check it accepts `argc` arguments
    pub fn resolve(&self, name: &str, argc: usize) -> Option<&ExternFunction> {
        self.get(name).filter(|f| f.arity == argc)
    }

    /// Entries sorted by name
    pub fn iter(&self) -> impl Iterator<Item = &ExternFunction> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_table() {
        let table = ExternTable::standard();
        assert_eq!(table.len(), 5);
        assert_eq!(table.get("basalt_funcall_1").map(|f| f.arity), Some(3));
        assert!(table.resolve("basalt_funcall_1", 3).is_some());
        assert!(table.resolve("basalt_funcall_1", 2).is_none());
        assert!(table.get("basalt_funcall_4").is_none());
    }

    #[test]
    fn test_iter_sorted() {
        let names: Vec<_> = ExternTable::standard()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names.first().map(String::as_str), Some("basalt_funcall_0"));
        assert_eq!(names.last().map(String::as_str), Some("basalt_throw"));
    }

    #[test]
    fn test_register_replaces() {
        let mut table = ExternTable::new();
        assert!(table.is_empty());
        table.register("f", 1, std::ptr::null());
        table.register("f", 2, std::ptr::null());
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("f").map(|f| f.arity), Some(2));
    }
}
