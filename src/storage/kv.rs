//! Transactional key-value facade over redb.
//!
//! Each bucket is a keyspace, stored as its own redb table. Values handed
//! back to callers are always owned copies: redb's access guards borrow from
//! the transaction and must not outlive it, so nothing in this module lets
//! one escape.
//!
//! redb gives one exclusive writer and any number of snapshot readers.
//! [`KvStore::update`] and [`KvStore::view`] block, so async callers run
//! them inside `spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use redb::{
    Database, ReadOnlyTable, ReadTransaction, ReadableTable, TableDefinition, TableError,
    TableHandle, WriteTransaction,
};

use crate::errors::S3Error;

/// Keyspace holding one entry per bucket.
pub const REGISTRY: &str = "$registry";

type Key = &'static [u8];
type Val = &'static [u8];

fn table(keyspace: &str) -> TableDefinition<'_, Key, Val> {
    TableDefinition::new(keyspace)
}

/// Shared handle to the database.
#[derive(Clone)]
pub struct KvStore {
    db: Arc<Database>,
}

impl KvStore {
    /// Open or create the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let db = Database::create(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        Self::init(db)
    }

    /// A database that lives only in memory, for tests.
    pub fn in_memory() -> anyhow::Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context("creating in-memory database")?;
        Self::init(db)
    }

    fn init(db: Database) -> anyhow::Result<Self> {
        let txn = db.begin_write()?;
        txn.open_table(table(REGISTRY))?;
        txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Run `f` inside one write transaction. Commits when `f` returns `Ok`;
    /// on `Err` the transaction is dropped and nothing is written.
    pub fn update<T>(
        &self,
        f: impl FnOnce(&WriteTx) -> Result<T, S3Error>,
    ) -> Result<T, S3Error> {
        let tx = WriteTx {
            txn: self.db.begin_write()?,
        };
        let out = f(&tx)?;
        tx.txn.commit()?;
        Ok(out)
    }

    /// Run `f` inside one read-only snapshot transaction.
    pub fn view<T>(&self, f: impl FnOnce(&ReadTx) -> Result<T, S3Error>) -> Result<T, S3Error> {
        let tx = ReadTx {
            txn: self.db.begin_read()?,
        };
        f(&tx)
    }
}

// ── Write transactions ──────────────────────────────────────────────

pub struct WriteTx {
    txn: WriteTransaction,
}

impl WriteTx {
    pub fn create_keyspace(&self, keyspace: &str) -> Result<(), S3Error> {
        self.txn.open_table(table(keyspace))?;
        Ok(())
    }

    /// Drop a keyspace and everything in it. Returns false if it was absent.
    pub fn delete_keyspace(&self, keyspace: &str) -> Result<bool, S3Error> {
        Ok(self.txn.delete_table(table(keyspace))?)
    }

    pub fn keyspace_exists(&self, keyspace: &str) -> Result<bool, S3Error> {
        Ok(self.txn.list_tables()?.any(|t| t.name() == keyspace))
    }

    /// Keyspace operations below create the keyspace if it is missing, so
    /// callers check bucket existence first.
    pub fn get(&self, keyspace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, S3Error> {
        let t = self.txn.open_table(table(keyspace))?;
        get_owned(&t, key)
    }

    pub fn put(&self, keyspace: &str, key: &[u8], value: &[u8]) -> Result<(), S3Error> {
        let mut t = self.txn.open_table(table(keyspace))?;
        t.insert(key, value)?;
        Ok(())
    }

    /// Returns true when the key existed.
    pub fn delete(&self, keyspace: &str, key: &[u8]) -> Result<bool, S3Error> {
        let mut t = self.txn.open_table(table(keyspace))?;
        let existed = t.remove(key)?.is_some();
        Ok(existed)
    }

    /// Visit keys starting with `prefix` in order. See [`ReadTx::scan_prefix`].
    pub fn scan_prefix(
        &self,
        keyspace: &str,
        prefix: &[u8],
        f: impl FnMut(&[u8], &[u8]) -> Result<bool, S3Error>,
    ) -> Result<(), S3Error> {
        let t = self.txn.open_table(table(keyspace))?;
        scan(&t, prefix, f)
    }

    /// Remove every key starting with `prefix`, returning how many went.
    pub fn delete_prefix(&self, keyspace: &str, prefix: &[u8]) -> Result<usize, S3Error> {
        let mut keys = Vec::new();
        self.scan_prefix(keyspace, prefix, |k, _| {
            keys.push(k.to_vec());
            Ok(true)
        })?;
        let mut t = self.txn.open_table(table(keyspace))?;
        for k in &keys {
            t.remove(k.as_slice())?;
        }
        Ok(keys.len())
    }
}

// ── Read transactions ───────────────────────────────────────────────

pub struct ReadTx {
    txn: ReadTransaction,
}

impl ReadTx {
    fn open(&self, keyspace: &str) -> Result<Option<ReadOnlyTable<Key, Val>>, S3Error> {
        match self.txn.open_table(table(keyspace)) {
            Ok(t) => Ok(Some(t)),
            Err(TableError::TableDoesNotExist(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn keyspace_exists(&self, keyspace: &str) -> Result<bool, S3Error> {
        Ok(self.open(keyspace)?.is_some())
    }

    pub fn get(&self, keyspace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, S3Error> {
        match self.open(keyspace)? {
            Some(t) => get_owned(&t, key),
            None => Ok(None),
        }
    }

    /// Visit keys starting with `prefix` in key order. The cursor is seeked
    /// to `prefix` and stops at the first key outside it, or when `f`
    /// returns false. The slices passed to `f` are only valid for that call.
    pub fn scan_prefix(
        &self,
        keyspace: &str,
        prefix: &[u8],
        f: impl FnMut(&[u8], &[u8]) -> Result<bool, S3Error>,
    ) -> Result<(), S3Error> {
        match self.open(keyspace)? {
            Some(t) => scan(&t, prefix, f),
            None => Ok(()),
        }
    }
}

/// Point reads available in both transaction kinds.
pub trait KvRead {
    fn get(&self, keyspace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, S3Error>;
}

impl KvRead for ReadTx {
    fn get(&self, keyspace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, S3Error> {
        ReadTx::get(self, keyspace, key)
    }
}

impl KvRead for WriteTx {
    fn get(&self, keyspace: &str, key: &[u8]) -> Result<Option<Vec<u8>>, S3Error> {
        WriteTx::get(self, keyspace, key)
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

fn get_owned(t: &impl ReadableTable<Key, Val>, key: &[u8]) -> Result<Option<Vec<u8>>, S3Error> {
    Ok(t.get(key)?.map(|guard| guard.value().to_vec()))
}

fn scan(
    t: &impl ReadableTable<Key, Val>,
    prefix: &[u8],
    mut f: impl FnMut(&[u8], &[u8]) -> Result<bool, S3Error>,
) -> Result<(), S3Error> {
    for item in t.range(prefix..)? {
        let (k, v) = item?;
        if !k.value().starts_with(prefix) {
            break;
        }
        if !f(k.value(), v.value())? {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(tx: &ReadTx, ks: &str, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        tx.scan_prefix(ks, prefix, |k, v| {
            out.push((k.to_vec(), v.to_vec()));
            Ok(true)
        })
        .unwrap();
        out
    }

    #[test]
    fn test_put_get_delete() {
        let kv = KvStore::in_memory().unwrap();
        kv.update(|tx| {
            tx.create_keyspace("b")?;
            tx.put("b", b"k", b"v")
        })
        .unwrap();

        let got = kv.view(|tx| tx.get("b", b"k")).unwrap();
        assert_eq!(got.as_deref(), Some(&b"v"[..]));

        let existed = kv.update(|tx| tx.delete("b", b"k")).unwrap();
        assert!(existed);
        assert!(kv.view(|tx| tx.get("b", b"k")).unwrap().is_none());
        assert!(!kv.update(|tx| tx.delete("b", b"k")).unwrap());
    }

    #[test]
    fn test_failed_update_rolls_back() {
        let kv = KvStore::in_memory().unwrap();
        kv.update(|tx| tx.create_keyspace("b")).unwrap();

        let result: Result<(), S3Error> = kv.update(|tx| {
            tx.put("b", b"a", b"1")?;
            Err(S3Error::MalformedXML)
        });
        assert!(result.is_err());
        assert!(kv.view(|tx| tx.get("b", b"a")).unwrap().is_none());
    }

    #[test]
    fn test_scan_prefix_ordered_and_bounded() {
        let kv = KvStore::in_memory().unwrap();
        kv.update(|tx| {
            tx.create_keyspace("b")?;
            for k in ["p/c", "a", "p/a", "q", "p/b"] {
                tx.put("b", k.as_bytes(), b"")?;
            }
            Ok(())
        })
        .unwrap();

        let keys: Vec<Vec<u8>> = kv
            .view(|tx| Ok(collect(tx, "b", b"p/")))
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"p/a".to_vec(), b"p/b".to_vec(), b"p/c".to_vec()]);
    }

    #[test]
    fn test_scan_prefix_stops_early() {
        let kv = KvStore::in_memory().unwrap();
        kv.update(|tx| {
            tx.create_keyspace("b")?;
            tx.put("b", b"x1", b"")?;
            tx.put("b", b"x2", b"")
        })
        .unwrap();

        let mut seen = 0;
        kv.view(|tx| {
            tx.scan_prefix("b", b"x", |_, _| {
                seen += 1;
                Ok(false)
            })
        })
        .unwrap();
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_delete_prefix() {
        let kv = KvStore::in_memory().unwrap();
        let removed = kv
            .update(|tx| {
                tx.create_keyspace("b")?;
                tx.put("b", b"d/1", b"")?;
                tx.put("b", b"d/2", b"")?;
                tx.put("b", b"e", b"")?;
                tx.delete_prefix("b", b"d/")
            })
            .unwrap();
        assert_eq!(removed, 2);
        let rest = kv.view(|tx| Ok(collect(tx, "b", b""))).unwrap();
        assert_eq!(rest.len(), 1);
    }

    #[test]
    fn test_keyspaces() {
        let kv = KvStore::in_memory().unwrap();
        assert!(!kv.view(|tx| tx.keyspace_exists("b")).unwrap());
        assert!(kv.view(|tx| tx.get("b", b"k")).unwrap().is_none());

        kv.update(|tx| tx.create_keyspace("b")).unwrap();
        assert!(kv.view(|tx| tx.keyspace_exists("b")).unwrap());
        assert!(kv.update(|tx| tx.keyspace_exists("b")).unwrap());

        assert!(kv.update(|tx| tx.delete_keyspace("b")).unwrap());
        assert!(!kv.view(|tx| tx.keyspace_exists("b")).unwrap());
        assert!(kv.view(|tx| tx.keyspace_exists(REGISTRY)).unwrap());
    }

    #[test]
    fn test_open_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.redb");
        let kv = KvStore::open(&path).unwrap();
        kv.update(|tx| tx.put(REGISTRY, b"k", b"v")).unwrap();
        drop(kv);

        let reopened = KvStore::open(&path).unwrap();
        assert!(reopened.view(|tx| tx.get(REGISTRY, b"k")).unwrap().is_some());
    }
}
