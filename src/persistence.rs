use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::trusted::domain::request::{CycleId, TransactionType, TrustedBroadcastRequest};

pub const STORE_VERSION: u32 = 1;

/// One registered request with its bookkeeping tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRequest {
    pub cycle: CycleId,
    pub transaction_type: TransactionType,
    pub request: TrustedBroadcastRequest,
}

/// Only the requests are persisted.
/// Transmission markers are rebuilt by polling: a coin that is already spent
/// just gets its transaction resubmitted, which relays tolerate.
#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    requests: Vec<StoredRequest>,
}

/// JSON snapshot of broadcast requests, so a daemon can re-register them after a restart.
pub struct RequestStore {
    path: PathBuf,
}

impl RequestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads every stored request. A missing file is an empty store.
    pub fn load(&self) -> Result<Vec<StoredRequest>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("[STORE] no request file at {:?}, starting empty", self.path);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {:?}", self.path)),
        };

        let file: StoreFile = serde_json::from_slice(&data)
            .with_context(|| format!("parsing {:?}", self.path))?;
        if file.version != STORE_VERSION {
            anyhow::bail!(
                "unsupported request store version {} in {:?}",
                file.version,
                self.path
            );
        }

        log::info!("[STORE] loaded {} requests from {:?}", file.requests.len(), self.path);
        Ok(file.requests)
    }

    /// Replaces the file contents with `requests`.
    pub fn save(&self, requests: &[StoredRequest]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = StoreFile {
            version: STORE_VERSION,
            requests: requests.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&file)?;

        // write-then-rename so a crash never leaves half a file behind
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, data).with_context(|| format!("writing {:?}", tmp))?;
        fs::rename(&tmp, &self.path)?;

        log::debug!("[STORE] saved {} requests to {:?}", requests.len(), self.path);
        Ok(())
    }

    /// Adds one request to the stored set.
    pub fn append(&self, request: StoredRequest) -> Result<()> {
        let mut requests = self.load()?;
        requests.push(request);
        self.save(&requests)
    }
}
