//! Deduplicated name tables for tests and origins

use std::collections::HashMap;

/// Interned test name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestId(u32);

/// Interned origin tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OriginId(u32);

/// Append-only string table
#[derive(Debug, Default)]
pub struct Interner {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl Interner {
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.index.get(name).copied()
    }

    pub fn name(&self, id: u32) -> &str {
        self.names.get(id as usize).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Name of the test that always exists for host-wide notifications
pub const WILDCARD_TEST: &str = "*";

/// Test names plus the per-test client persistence flag
#[derive(Debug)]
pub struct TestTable {
    names: Interner,
    client_save: Vec<bool>,
    default_client_save: bool,
}

impl TestTable {
    pub fn new(default_client_save: bool) -> Self {
        let mut table = Self {
            names: Interner::default(),
            client_save: vec![],
            default_client_save,
        };
        table.intern(WILDCARD_TEST);
        table
    }

    pub fn intern(&mut self, name: &str) -> TestId {
        let id = self.names.intern(name);
        if self.client_save.len() <= id as usize {
            self.client_save.push(self.default_client_save);
        }
        TestId(id)
    }

    pub fn lookup(&self, name: &str) -> Option<TestId> {
        self.names.lookup(name).map(TestId)
    }

    pub fn name(&self, id: TestId) -> &str {
        self.names.name(id.0)
    }

    pub fn client_save(&self, id: TestId) -> bool {
        self.client_save.get(id.0 as usize).copied().unwrap_or(false)
    }

    pub fn set_client_save(&mut self, id: TestId, save: bool) {
        if let Some(flag) = self.client_save.get_mut(id.0 as usize) {
            *flag = save;
        }
    }
}

/// Origin tags; the empty origin always exists
#[derive(Debug)]
pub struct OriginTable {
    names: Interner,
}

impl Default for OriginTable {
    fn default() -> Self {
        let mut names = Interner::default();
        names.intern("");
        Self { names }
    }
}

impl OriginTable {
    pub fn intern(&mut self, name: &str) -> OriginId {
        OriginId(self.names.intern(name))
    }

    pub fn lookup(&self, name: &str) -> Option<OriginId> {
        self.names.lookup(name).map(OriginId)
    }

    pub fn name(&self, id: OriginId) -> &str {
        self.names.name(id.0)
    }

    pub fn default_origin(&self) -> OriginId {
        OriginId(0)
    }
}
