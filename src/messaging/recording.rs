//! An in-memory [`super::MessagingApi`] that records every call, for
//! asserting on what the stream writer sent without a real HTTP endpoint.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::Result;

use super::{Destination, MessagingApi};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Message { dest: Destination, text: String },
    Draft { dest: Destination, text: String },
    Document { dest: Destination, path: PathBuf },
}

/// Test double that records calls instead of performing I/O.
#[derive(Default)]
pub struct RecordingMessagingApi {
    calls: Mutex<Vec<Recorded>>,
}

impl RecordingMessagingApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every call made so far, in order.
    pub fn calls(&self) -> Vec<Recorded> {
        self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl MessagingApi for RecordingMessagingApi {
    async fn send_message(&self, dest: &Destination, text: &str) -> Result<String> {
        let mut calls = self.calls.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = calls.len().to_string();
        calls.push(Recorded::Message {
            dest: dest.clone(),
            text: text.to_owned(),
        });
        Ok(id)
    }

    async fn send_draft(&self, dest: &Destination, text: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Recorded::Draft {
                dest: dest.clone(),
                text: text.to_owned(),
            });
        Ok(())
    }

    async fn send_document(&self, dest: &Destination, path: &Path) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Recorded::Document {
                dest: dest.clone(),
                path: path.to_path_buf(),
            });
        Ok(())
    }
}
