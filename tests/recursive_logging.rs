// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs;
use std::sync::Arc;

use logforth_delivery::Append;
use logforth_delivery::Error;
use logforth_delivery::Layout;
use logforth_delivery::append::AsyncBuilder;
use logforth_delivery::append::FileBuilder;
use logforth_delivery::bridge::log::LogBridge;
use logforth_delivery::record::Record;
use tempfile::TempDir;

const META_TARGET: &str = "meta";

#[derive(Debug)]
struct ChattyLayout;

impl Layout for ChattyLayout {
    fn format(&self, record: &Record) -> Result<Vec<u8>, Error> {
        // the layout logs on the consumer thread, but not about its own records
        if record.target() != META_TARGET {
            log::debug!(target: META_TARGET, "formatting {}", record.payload());
        }
        Ok(format!("[{}] {} {}", record.level(), record.target(), record.payload()).into_bytes())
    }
}

struct Thing<'a>(&'a str);

impl std::fmt::Display for Thing<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        log::debug!(target: META_TARGET, "formatting wrapping ({})", self.0);
        f.write_str(self.0)
    }
}

// logging from a layout or a Display impl must neither deadlock nor drop records
#[test]
fn test_meta_logging_in_format_works() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let file = FileBuilder::new(temp_dir.path().join("app.log"))
        .layout(ChattyLayout)
        .build()
        .unwrap();
    let asynchronous = Arc::new(
        AsyncBuilder::new("recursive-logging")
            .append(file)
            .build(),
    );

    let bridge = LogBridge::new(asynchronous.clone()).max_level(log::LevelFilter::Debug);
    logforth_delivery::bridge::log::setup_log_crate(bridge).unwrap();

    for i in 0..16 {
        log::info!(target: "app", "I'm logging {}!", Thing(&i.to_string()));
    }
    // every app record is formatted once the flush returns, so all meta records are queued
    asynchronous.flush().unwrap();
    asynchronous.stop().unwrap();

    let content = fs::read_to_string(temp_dir.path().join("app.log")).unwrap();
    let app = content.lines().filter(|l| l.contains(" app ")).count();
    let meta = content.lines().filter(|l| l.contains(" meta ")).count();
    assert_eq!(app, 16);
    // one record from each Display call and one from each layout call on an app record
    assert_eq!(meta, 32);
    assert!(content.contains("[INFO] app I'm logging 7!"));
}
