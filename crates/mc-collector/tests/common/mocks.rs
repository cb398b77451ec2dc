// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock sink implementations for testing

use mc_collector::errors::SinkError;
use mc_collector::record::Batch;
use mc_collector::sink::SinkWriter;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Mock sink that records every batch and rejects the first `failures` writes
#[derive(Default)]
pub struct MockSink {
    failures: AtomicU32,
    batches: Mutex<Vec<Batch>>,
}

#[allow(dead_code)]
impl MockSink {
    pub fn failing(failures: u32) -> Self {
        MockSink {
            failures: AtomicU32::new(failures),
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Every batch handed to the sink, including rejected ones
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SinkWriter for MockSink {
    async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(batch.clone());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError::Transport("mock sink unavailable".to_string()));
        }
        Ok(())
    }
}
