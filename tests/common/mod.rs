//! Common test utilities and helpers for ifilesentry tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use assert_fs::prelude::*;
use assert_fs::TempDir;
use async_trait::async_trait;

use ifilesentry::error::{Result, SyncError};
use ifilesentry::{RemoteFileRecord, RemoteStore, Transaction};

/// One call observed by the recording store, in call order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List,
    Begin(usize),
    Create { tx: usize, name: String, content: Vec<u8>, size: u64 },
    Update { tx: usize, name: String, content: Vec<u8>, size: u64 },
    Delete { tx: usize, name: String },
    Commit(usize),
}

/// Failures to inject into the recording store
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub list: bool,
    pub begin: bool,
    /// Commit number (1-based) that fails
    pub commit_number: Option<usize>,
    /// File name whose create or update fails
    pub upload_of: Option<String>,
}

#[derive(Default)]
struct State {
    journal: Vec<Call>,
    /// `(name, checksum)` in listing order; names may repeat
    records: Vec<(String, String)>,
    transactions: usize,
    commits: usize,
    failures: Failures,
}

/// In-memory remote store that records every call
#[derive(Clone, Default)]
pub struct RecordingStore {
    state: Arc<Mutex<State>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `(name, checksum descriptor)` records
    pub fn with_records(records: &[(&str, &str)]) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.lock().unwrap();
            for (name, checksum) in records {
                state.records.push((name.to_string(), checksum.to_string()));
            }
        }
        store
    }

    pub fn fail(&self, failures: Failures) {
        self.state.lock().unwrap().failures = failures;
    }

    pub fn journal(&self) -> Vec<Call> {
        self.state.lock().unwrap().journal.clone()
    }

    pub fn commits(&self) -> usize {
        self.journal()
            .iter()
            .filter(|c| matches!(c, Call::Commit(_)))
            .count()
    }

    pub fn transactions(&self) -> usize {
        self.state.lock().unwrap().transactions
    }

    /// Every create, update and delete, whether committed or not
    pub fn mutations(&self) -> Vec<Call> {
        self.journal()
            .into_iter()
            .filter(|c| matches!(c, Call::Create { .. } | Call::Update { .. } | Call::Delete { .. }))
            .collect()
    }
}

#[async_trait]
impl RemoteStore for RecordingStore {
    async fn list_records(&self) -> Result<Vec<RemoteFileRecord>> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Call::List);
        if state.failures.list {
            return Err(SyncError::RemoteList("device unreachable".to_string()));
        }

        Ok(state
            .records
            .iter()
            .map(|(name, checksum)| RemoteFileRecord::new(name.clone(), checksum.clone()))
            .collect())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        let mut state = self.state.lock().unwrap();
        if state.failures.begin {
            return Err(SyncError::TransactionOpen("device busy".to_string()));
        }

        state.transactions += 1;
        let id = state.transactions;
        state.journal.push(Call::Begin(id));

        Ok(Box::new(RecordingTransaction {
            id,
            state: self.state.clone(),
        }))
    }
}

struct RecordingTransaction {
    id: usize,
    state: Arc<Mutex<State>>,
}

impl RecordingTransaction {
    fn check_upload(state: &State, name: &str) -> Result<()> {
        match &state.failures.upload_of {
            Some(failing) if failing == name => Err(SyncError::upload(name, "upload rejected")),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn create_from_file(&mut self, name: &str, content: Vec<u8>, size: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_upload(&state, name)?;
        state.journal.push(Call::Create {
            tx: self.id,
            name: name.to_string(),
            content,
            size,
        });
        Ok(())
    }

    async fn update_from_file(&mut self, name: &str, content: Vec<u8>, size: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        Self::check_upload(&state, name)?;
        state.journal.push(Call::Update {
            tx: self.id,
            name: name.to_string(),
            content,
            size,
        });
        Ok(())
    }

    async fn delete_by_name(&mut self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.journal.push(Call::Delete {
            tx: self.id,
            name: name.to_string(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.commits += 1;
        if state.failures.commit_number == Some(state.commits) {
            return Err(SyncError::Commit("validation failed".to_string()));
        }
        state.journal.push(Call::Commit(self.id));
        Ok(())
    }
}

/// Scratch directory with the given `(name, content)` files
pub fn directory_with(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    for (name, content) in files {
        dir.child(name)
            .write_binary(content)
            .expect("Failed to write test file");
    }
    dir
}

/// SHA-256 of "hello world"
pub const HELLO_WORLD_SHA256: &str =
    "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
