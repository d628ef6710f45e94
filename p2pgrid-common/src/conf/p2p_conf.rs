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

/// Tuning knobs of one overlay peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConf {
    // Number of acquaintances a peer tries to keep.
    pub noa: usize,

    // Initial hop budget of flooded messages.
    pub ttl: u32,

    // Gossip period.
    #[serde(skip)]
    pub ttu: Duration,
    #[serde(alias = "ttu")]
    pub ttu_str: String,

    // Number of message ids remembered for duplicate detection.
    pub msg_memory: usize,

    // Acceptance probability, in percent, of an exploring message once the peer is full.
    pub exploring_msg_percent: u8,

    // How long a provider keeps a node booked while waiting for the consumer's answer.
    #[serde(skip)]
    pub acq_timeout: Duration,
    #[serde(alias = "acq_timeout")]
    pub acq_timeout_str: String,

    // Overall deadline of a lookup session.
    #[serde(skip)]
    pub acquisition_timeout: Duration,
    #[serde(alias = "acquisition_timeout")]
    pub acquisition_timeout_str: String,

    // Delay between two broadcasts of the same lookup.
    #[serde(skip)]
    pub lookup_freq: Duration,
    #[serde(alias = "lookup_freq")]
    pub lookup_freq_str: String,

    #[serde(skip)]
    pub rpc_timeout: Duration,
    #[serde(alias = "rpc_timeout")]
    pub rpc_timeout_str: String,

    pub first_contact_retries: u32,

    pub mailbox_capacity: usize,

    // Fixed seed for the peer's random source, mostly for tests.
    pub seed: Option<u64>,
}

impl P2pConf {
    pub fn init(&mut self) -> GridResult<()> {
        self.ttu = Self::parse_duration("ttu", &self.ttu_str)?;
        self.acq_timeout = Self::parse_duration("acq_timeout", &self.acq_timeout_str)?;
        self.acquisition_timeout =
            Self::parse_duration("acquisition_timeout", &self.acquisition_timeout_str)?;
        self.lookup_freq = Self::parse_duration("lookup_freq", &self.lookup_freq_str)?;
        self.rpc_timeout = Self::parse_duration("rpc_timeout", &self.rpc_timeout_str)?;

        if self.noa == 0 {
            return Err(GridError::Config("noa must be greater than 0".to_string()));
        }
        if self.msg_memory == 0 {
            return Err(GridError::Config(
                "msg_memory must be greater than 0".to_string(),
            ));
        }
        if self.exploring_msg_percent > 100 {
            return Err(GridError::Config(format!(
                "exploring_msg_percent must be in 0..=100, got {}",
                self.exploring_msg_percent
            )));
        }
        if self.mailbox_capacity == 0 {
            return Err(GridError::Config(
                "mailbox_capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    fn parse_duration(name: &str, value: &str) -> GridResult<Duration> {
        let duration = DurationUnit::from_str(value)?.as_duration();
        if duration.is_zero() {
            return Err(GridError::Config(format!("{} must not be zero", name)));
        }
        Ok(duration)
    }

    /// Sets every duration at once, keeping the string form in sync. Used by
    /// tests and embedders that build the configuration in code.
    pub fn with_durations(
        mut self,
        ttu: &str,
        acq_timeout: &str,
        acquisition_timeout: &str,
        lookup_freq: &str,
    ) -> GridResult<Self> {
        self.ttu_str = ttu.to_string();
        self.acq_timeout_str = acq_timeout.to_string();
        self.acquisition_timeout_str = acquisition_timeout.to_string();
        self.lookup_freq_str = lookup_freq.to_string();
        self.init()?;
        Ok(self)
    }
}

impl Default for P2pConf {
    fn default() -> Self {
        let mut conf = Self {
            noa: 10,
            ttl: 5,

            ttu: Default::default(),
            ttu_str: "60s".to_string(),

            msg_memory: 1000,
            exploring_msg_percent: 66,

            acq_timeout: Default::default(),
            acq_timeout_str: "2s".to_string(),

            acquisition_timeout: Default::default(),
            acquisition_timeout_str: "180s".to_string(),

            lookup_freq: Default::default(),
            lookup_freq_str: "30s".to_string(),

            rpc_timeout: Default::default(),
            rpc_timeout_str: "5s".to_string(),

            first_contact_retries: 3,
            mailbox_capacity: 4096,
            seed: None,
        };

        conf.ttu = Duration::from_secs(60);
        conf.acq_timeout = Duration::from_secs(2);
        conf.acquisition_timeout = Duration::from_secs(180);
        conf.lookup_freq = Duration::from_secs(30);
        conf.rpc_timeout = Duration::from_secs(5);
        conf
    }
}
