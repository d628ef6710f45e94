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

use crate::conf::{LogConf, MapperConf, P2pConf};
use crate::GridResult;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConf {
    // Seed peers contacted at start up.
    pub first_contacts: Vec<String>,

    pub p2p: P2pConf,
    pub mapper: MapperConf,
    pub log: LogConf,
}

impl ClusterConf {
    pub fn from(path: &str) -> GridResult<Self> {
        let content = fs::read_to_string(path)?;
        let conf = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path);
        Ok(conf)
    }

    pub fn from_toml(content: &str) -> GridResult<Self> {
        let mut conf: ClusterConf = toml::from_str(content)?;
        conf.init()?;
        Ok(conf)
    }

    pub fn init(&mut self) -> GridResult<()> {
        self.p2p.init()?;
        self.mapper.init()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parse_toml() {
        let content = r#"
first_contacts = ["peer-b", "peer-c"]

[p2p]
noa = 3
ttl = 4
ttu = "500ms"
exploring_msg_percent = 30
seed = 7

[mapper]
greedy_interval = "1s"

[log]
level = "debug"
"#;
        let conf = ClusterConf::from_toml(content).unwrap();
        assert_eq!(conf.first_contacts, vec!["peer-b", "peer-c"]);
        assert_eq!(conf.p2p.noa, 3);
        assert_eq!(conf.p2p.ttl, 4);
        assert_eq!(conf.p2p.ttu, Duration::from_millis(500));
        assert_eq!(conf.p2p.exploring_msg_percent, 30);
        assert_eq!(conf.p2p.seed, Some(7));
        assert_eq!(conf.p2p.msg_memory, 1000);
        assert_eq!(conf.mapper.greedy_interval, Duration::from_secs(1));
        assert_eq!(conf.log.level, "debug");
    }

    #[test]
    fn invalid_toml_value() {
        let content = r#"
[p2p]
exploring_msg_percent = 150
"#;
        assert!(ClusterConf::from_toml(content).is_err());
    }
}
