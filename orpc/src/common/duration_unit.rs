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

use crate::{err_box, CommonResult};
use std::fmt;
use std::time::Duration;

/// A human readable duration such as `500ms`, `3s`, `2m`, `1h` or `1d`.
/// A bare number is read as milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationUnit(Duration);

impl DurationUnit {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn from_str(value: &str) -> CommonResult<Self> {
        let value = value.trim().to_lowercase();
        if value.is_empty() {
            return err_box!("Empty duration string");
        }

        let split = value
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(value.len());
        let (num, unit) = value.split_at(split);
        let num: u64 = match num.parse() {
            Ok(v) => v,
            Err(_) => return err_box!("Invalid duration: {}", value),
        };

        let duration = match unit.trim() {
            "" | "ms" => Duration::from_millis(num),
            "s" => Duration::from_secs(num),
            "m" | "min" => Duration::from_secs(num * 60),
            "h" => Duration::from_secs(num * 3600),
            "d" => Duration::from_secs(num * 86400),
            other => return err_box!("Unknown duration unit {} in {}", other, value),
        };

        Ok(Self(duration))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        self.0.as_millis() as u64
    }
}

impl fmt::Display for DurationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let d = DurationUnit::from_str("500ms").unwrap();
        assert_eq!(d.as_duration(), Duration::from_millis(500));

        let d = DurationUnit::from_str("3s").unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(3));

        let d = DurationUnit::from_str(" 2m ").unwrap();
        assert_eq!(d.as_duration(), Duration::from_secs(120));

        let d = DurationUnit::from_str("250").unwrap();
        assert_eq!(d.as_millis(), 250);

        assert!(DurationUnit::from_str("").is_err());
        assert!(DurationUnit::from_str("s").is_err());
        assert!(DurationUnit::from_str("10y").is_err());
    }
}
