//! In-memory object store with call counting and failure injection.

use crate::services::object_store::{
    LocatorBase, ObjectBody, ObjectStore, StorageError, StorageResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::HashMap,
    io::Cursor,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, (String, Bytes)>>,
    locators: LocatorBase,
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self {
            objects: Mutex::default(),
            locators: LocatorBase::new(Self::BASE_URL).unwrap(),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
        }
    }
}

impl MemoryObjectStore {
    pub const BASE_URL: &'static str = "https://test-bucket.s3.us-east-1.amazonaws.com";

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Total number of put, get and delete calls.
    pub fn calls(&self) -> usize {
        self.puts() + self.gets.load(Ordering::SeqCst) + self.deletes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> StorageResult<String> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Remote("injected put failure".into()));
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (content_type.to_string(), bytes));
        Ok(self.locators.locate(key))
    }

    async fn get(&self, key: &str) -> StorageResult<ObjectBody> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let (content_type, bytes) = self
            .objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        Ok(ObjectBody {
            content_type: Some(content_type),
            reader: Box::pin(Cursor::new(bytes.to_vec())),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Remote("injected delete failure".into()));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    fn key_from_locator(&self, locator: &str) -> StorageResult<String> {
        self.locators.key_of(locator)
    }
}
