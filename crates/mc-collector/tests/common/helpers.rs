// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const ALEX_UUID: &str = "63f167bb-ff0d-4bcb-a09b-ca34f443510b";

/// A throwaway server directory laid out like a real one
pub struct ServerDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl ServerDir {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("logs")).unwrap();
        fs::create_dir_all(dir.path().join("world/stats")).unwrap();
        ServerDir { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_file(&self) -> PathBuf {
        self.path().join("logs/latest.log")
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.path().join("world/stats")
    }

    pub fn usercache_file(&self) -> PathBuf {
        self.path().join("usercache.json")
    }

    pub fn cursor_file(&self) -> PathBuf {
        self.path().join(".log_offset")
    }

    pub fn append_log(&self, text: &str) {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_file())
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    pub fn write_stats(&self, id: &str, body: &str) {
        fs::write(self.stats_dir().join(format!("{id}.json")), body).unwrap();
    }

    pub fn write_usercache(&self, entries: &[(&str, &str)]) {
        let entries: Vec<_> = entries
            .iter()
            .map(|(uuid, name)| {
                serde_json::json!({
                    "name": name,
                    "uuid": uuid,
                    "expiresOn": "2025-05-21 13:56:09 +0200"
                })
            })
            .collect();
        fs::write(
            self.usercache_file(),
            serde_json::to_vec(&entries).unwrap(),
        )
        .unwrap();
    }
}
