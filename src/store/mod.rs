//! In-memory status store
//!
//! The store owns every [`Host`] and [`StatusRecord`]. It is owned by the
//! daemon actor and never shared, so nothing in here locks.
//!
//! ```text
//! StatusStore
//!  ├── hosts:   BTreeMap<hostname, Host { records: [StatusRecord] }>
//!  ├── tests:   TestTable   (interned names + client persistence flag)
//!  ├── origins: OriginTable (interned origin tags)
//!  ├── cookies: CookieTable (cookie id → RecordKey)
//!  ├── ghosts:  GhostTable  (unknown hostnames)
//!  └── files:   FileCache   (config/download content)
//! ```

pub mod cookies;
pub mod error;
pub mod filecache;
pub mod ghosts;
pub mod intern;
pub mod record;

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::color::ColorPolicy;
use crate::state_machine::{self, Context, Report, StatusEvent};

pub use cookies::{CookieTable, RecordKey};
pub use error::{StoreError, StoreResult};
pub use filecache::FileCache;
pub use ghosts::GhostTable;
pub use intern::{OriginId, OriginTable, TestId, TestTable};
pub use record::{AckInfo, ClientReport, Cookie, Host, HostKind, StatusRecord};

#[derive(Debug)]
pub struct StatusStore {
    hosts: BTreeMap<String, Host>,
    pub tests: TestTable,
    pub origins: OriginTable,
    pub cookies: CookieTable,
    pub ghosts: GhostTable,
    pub files: FileCache,
    hosts_created: usize,
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(false)
    }
}

impl StatusStore {
    pub fn new(default_client_save: bool) -> Self {
        Self {
            hosts: BTreeMap::new(),
            tests: TestTable::new(default_client_save),
            origins: OriginTable::default(),
            cookies: CookieTable::default(),
            ghosts: GhostTable::default(),
            files: FileCache::default(),
            hosts_created: 0,
        }
    }

    /// Number of hosts ever created, used to size output buffers
    pub fn hosts_created(&self) -> usize {
        self.hosts_created
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn hosts_mut(&mut self) -> impl Iterator<Item = &mut Host> {
        self.hosts.values_mut()
    }

    pub fn host_names(&self) -> Vec<String> {
        self.hosts.keys().cloned().collect()
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    pub fn host_mut(&mut self, name: &str) -> Option<&mut Host> {
        self.hosts.get_mut(name)
    }

    pub fn find_or_create_host(&mut self, name: &str, ip: &str, kind: HostKind) -> &mut Host {
        if !self.hosts.contains_key(name) {
            trace!("creating host {name}");
            self.hosts_created += 1;
        }
        self.hosts
            .entry(name.to_string())
            .or_insert_with(|| Host::new(name, ip, kind))
    }

    pub fn find_or_create_test(&mut self, name: &str) -> TestId {
        self.tests.intern(name)
    }

    pub fn find_or_create_origin(&mut self, name: &str) -> OriginId {
        self.origins.intern(name)
    }

    pub fn test_name(&self, id: TestId) -> &str {
        self.tests.name(id)
    }

    pub fn origin_name(&self, id: OriginId) -> &str {
        self.origins.name(id)
    }

    /// Resolve names to a key without creating anything
    pub fn key(&self, host: &str, test: &str, origin: &str) -> Option<RecordKey> {
        let test = self.tests.lookup(test)?;
        let origin = self.origins.lookup(origin)?;
        self.hosts.get(host)?.record(test, origin)?;
        Some(RecordKey {
            host: host.to_string(),
            test,
            origin,
        })
    }

    pub fn find_record(&self, host: &str, test: &str, origin: &str) -> Option<&StatusRecord> {
        let test = self.tests.lookup(test)?;
        let origin = self.origins.lookup(origin)?;
        self.hosts.get(host)?.record(test, origin)
    }

    pub fn record(&self, key: &RecordKey) -> Option<&StatusRecord> {
        self.hosts.get(&key.host)?.record(key.test, key.origin)
    }

    pub fn record_mut(&mut self, key: &RecordKey) -> Option<&mut StatusRecord> {
        self.hosts.get_mut(&key.host)?.record_mut(key.test, key.origin)
    }

    /// Records of `host` for `test`, any origin
    pub fn records_for_test(&self, host: &str, test: &str) -> Vec<RecordKey> {
        let (Some(entry), Some(test)) = (self.hosts.get(host), self.tests.lookup(test)) else {
            return vec![];
        };
        entry
            .records
            .iter()
            .filter(|r| r.test == test)
            .map(|r| RecordKey {
                host: host.to_string(),
                test,
                origin: r.origin,
            })
            .collect()
    }

    pub fn find_or_create_record(
        &mut self,
        host: &str,
        test: TestId,
        origin: OriginId,
    ) -> StoreResult<&mut StatusRecord> {
        let entry = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| StoreError::UnknownHost(host.to_string()))?;
        if entry.record(test, origin).is_none() {
            entry.records.push(StatusRecord::new(test, origin));
        }
        entry
            .record_mut(test, origin)
            .ok_or_else(|| StoreError::UnknownHost(host.to_string()))
    }

    pub fn drop_host(&mut self, name: &str) -> StoreResult<Host> {
        let host = self
            .hosts
            .remove(name)
            .ok_or_else(|| StoreError::UnknownHost(name.to_string()))?;
        self.cookies.remove_host(name);
        debug!("dropped host {name}");
        Ok(host)
    }

    /// Remove every origin's record of `test` on `host`
    pub fn drop_test(&mut self, host: &str, test: &str) -> StoreResult<usize> {
        let test_id = self
            .tests
            .lookup(test)
            .ok_or_else(|| StoreError::UnknownTest(test.to_string()))?;
        let entry = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| StoreError::UnknownHost(host.to_string()))?;
        let before = entry.records.len();
        entry.records.retain(|r| r.test != test_id);
        let removed = before - entry.records.len();
        if removed == 0 {
            return Err(StoreError::UnknownRecord {
                host: host.to_string(),
                test: test.to_string(),
            });
        }
        self.cookies.remove_test(host, test_id);
        debug!("dropped {removed} records of {host}.{test}");
        Ok(removed)
    }

    pub fn rename_host(&mut self, old: &str, new: &str) -> StoreResult<()> {
        if self.hosts.contains_key(new) {
            return Err(StoreError::AlreadyExists(new.to_string()));
        }
        let mut host = self
            .hosts
            .remove(old)
            .ok_or_else(|| StoreError::UnknownHost(old.to_string()))?;
        host.name = new.to_string();
        self.hosts.insert(new.to_string(), host);
        self.cookies.rename_host(old, new);
        Ok(())
    }

    /// Move the records of `old` to the (possibly new) test `new`
    pub fn rename_test(&mut self, host: &str, old: &str, new: &str) -> StoreResult<()> {
        let old_id = self
            .tests
            .lookup(old)
            .ok_or_else(|| StoreError::UnknownTest(old.to_string()))?;
        let new_id = self.tests.intern(new);
        let entry = self
            .hosts
            .get_mut(host)
            .ok_or_else(|| StoreError::UnknownHost(host.to_string()))?;
        if entry.records.iter().any(|r| r.test == new_id) {
            return Err(StoreError::AlreadyExists(format!("{host}.{new}")));
        }
        let mut moved = 0;
        for record in entry.records.iter_mut().filter(|r| r.test == old_id) {
            record.test = new_id;
            moved += 1;
        }
        if moved == 0 {
            return Err(StoreError::UnknownRecord {
                host: host.to_string(),
                test: old.to_string(),
            });
        }
        self.cookies.retest(host, old_id, new_id);
        Ok(())
    }

    /// Record holding a live cookie
    pub fn find_by_cookie(&self, id: i32, now: i64) -> Option<RecordKey> {
        let key = self.cookies.get(id)?;
        let record = self.record(key)?;
        let cookie = record.cookie?;
        (cookie.id == id && cookie.expires >= now).then(|| key.clone())
    }

    pub fn clear_cookie(&mut self, key: &RecordKey) {
        let Some(record) = self.record_mut(key) else {
            return;
        };
        if let Some(cookie) = record.cookie.take() {
            self.cookies.revoke(cookie.id);
        }
    }

    /// Run the state machine on one record
    ///
    /// The record must exist. A client-change event marks the host's client
    /// report as posted.
    pub fn apply_status(
        &mut self,
        key: &RecordKey,
        report: &Report<'_>,
        policy: ColorPolicy,
        now: i64,
    ) -> StoreResult<Vec<StatusEvent>> {
        let client_save = self.tests.client_save(key.test);
        let host = self
            .hosts
            .get_mut(&key.host)
            .ok_or_else(|| StoreError::UnknownHost(key.host.clone()))?;
        let ctx = Context {
            now,
            policy,
            summary: host.is_summary(),
            client_pending: host.client_pending(),
            client_save,
        };
        let test_name = self.tests.name(key.test).to_string();
        let record = host
            .record_mut(key.test, key.origin)
            .ok_or_else(|| StoreError::UnknownRecord {
                host: key.host.clone(),
                test: test_name,
            })?;
        let mut jar = cookies::RecordCookies {
            table: &mut self.cookies,
            key: key.clone(),
        };
        let events = state_machine::apply_status(record, report, &ctx, &mut jar)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;

        if events.contains(&StatusEvent::ClientChange) {
            if let Some(client) = host.client.as_mut() {
                client.posted = true;
            }
        }
        Ok(events)
    }
}
