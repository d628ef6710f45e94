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

use crate::error::GridError;
use crate::GridResult;
use orpc::common::DurationUnit;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Deployment resource mapper configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConf {
    // Period of the greedy distribution stage.
    #[serde(skip)]
    pub greedy_interval: Duration,
    #[serde(alias = "greedy_interval")]
    pub greedy_interval_str: String,
}

impl MapperConf {
    pub fn init(&mut self) -> GridResult<()> {
        self.greedy_interval = DurationUnit::from_str(&self.greedy_interval_str)?.as_duration();
        if self.greedy_interval.is_zero() {
            return Err(GridError::Config(
                "greedy_interval must not be zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MapperConf {
    fn default() -> Self {
        Self {
            greedy_interval: Duration::from_secs(3),
            greedy_interval_str: "3s".to_string(),
        }
    }
}
