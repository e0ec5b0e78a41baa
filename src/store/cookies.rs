//! Acknowledgement cookie index

use std::collections::BTreeMap;

use rand::Rng;

use crate::state_machine::CookieJar;

use super::intern::{OriginId, TestId};

/// How long an issued cookie stays valid
pub const COOKIE_LIFETIME: i64 = 86400;

const COOKIE_RANGE: std::ops::Range<i32> = 1..1_000_000;

/// Identifies one status record across the store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub host: String,
    pub test: TestId,
    pub origin: OriginId,
}

/// Live cookies and the record each belongs to
#[derive(Debug, Default)]
pub struct CookieTable {
    cookies: BTreeMap<i32, RecordKey>,
}

impl CookieTable {
    /// Pick an unused cookie and bind it to `key`
    pub fn issue(&mut self, key: RecordKey) -> i32 {
        let mut rng = rand::rng();
        let mut id = rng.random_range(COOKIE_RANGE);
        while self.cookies.contains_key(&id) {
            id = rng.random_range(COOKIE_RANGE);
        }
        self.cookies.insert(id, key);
        id
    }

    /// Bind an existing cookie, e.g. one restored from a checkpoint
    pub fn register(&mut self, id: i32, key: RecordKey) {
        self.cookies.insert(id, key);
    }

    pub fn revoke(&mut self, id: i32) {
        self.cookies.remove(&id);
    }

    pub fn get(&self, id: i32) -> Option<&RecordKey> {
        self.cookies.get(&id)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn remove_host(&mut self, host: &str) {
        self.cookies.retain(|_, key| key.host != host);
    }

    pub fn remove_test(&mut self, host: &str, test: TestId) {
        self.cookies
            .retain(|_, key| !(key.host == host && key.test == test));
    }

    pub fn rename_host(&mut self, old: &str, new: &str) {
        for key in self.cookies.values_mut().filter(|key| key.host == old) {
            key.host = new.to_string();
        }
    }

    pub fn retest(&mut self, host: &str, old: TestId, new: TestId) {
        for key in self
            .cookies
            .values_mut()
            .filter(|key| key.host == host && key.test == old)
        {
            key.test = new;
        }
    }
}

/// [`CookieJar`] that binds issued cookies to one record
pub struct RecordCookies<'a> {
    pub table: &'a mut CookieTable,
    pub key: RecordKey,
}

impl CookieJar for RecordCookies<'_> {
    fn issue(&mut self) -> i32 {
        self.table.issue(self.key.clone())
    }

    fn revoke(&mut self, id: i32) {
        self.table.revoke(id);
    }
}
