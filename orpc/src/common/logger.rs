// Copyright 2025 OPPO.
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

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;

static LOGGER: OnceCell<()> = OnceCell::new();

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConf {
    pub level: String,
    pub display_thread: bool,
    pub display_position: bool,
    pub ansi: bool,
}

impl Default for LogConf {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            display_thread: true,
            display_position: true,
            ansi: false,
        }
    }
}

/// Process wide log setup. `log` records are bridged into `tracing` so both
/// macro families end up in the same formatter.
pub struct Logger;

impl Logger {
    pub fn init(conf: LogConf) {
        LOGGER.get_or_init(|| {
            let level = Level::from_str(&conf.level).unwrap_or(Level::INFO);
            if let Err(e) = tracing_log::LogTracer::init() {
                eprintln!("Log bridge already initialized: {}", e);
            }

            let subscriber = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_thread_names(conf.display_thread)
                .with_file(conf.display_position)
                .with_line_number(conf.display_position)
                .with_ansi(conf.ansi)
                .finish();

            if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!("Logger already initialized: {}", e);
            }
        });
    }

    pub fn init_default() {
        Self::init(LogConf::default())
    }
}
