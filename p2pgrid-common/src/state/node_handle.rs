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

use crate::GridResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque reference to a remote compute node. Two handles are the same node
/// when their urls are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeHandle {
    url: String,
    // Node family, matched by lookup filters.
    family: String,
}

impl NodeHandle {
    pub fn new<U: Into<String>, F: Into<String>>(url: U, family: F) -> Self {
        Self {
            url: url.into(),
            family: family.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn family(&self) -> &str {
        &self.family
    }
}

impl PartialEq for NodeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for NodeHandle {}

impl Hash for NodeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.url.hash(state)
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.url, self.family)
    }
}

/// Whole-string regular expression on the node family.
#[derive(Debug, Clone)]
pub struct NodeFilter {
    pattern: String,
    regex: Regex,
}

impl NodeFilter {
    pub const ANY: &'static str = ".*";

    pub fn new(pattern: &str) -> GridResult<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn matches(&self, node: &NodeHandle) -> bool {
        self.regex.is_match(node.family())
    }

    pub fn is_any(&self) -> bool {
        self.pattern == Self::ANY
    }
}

impl fmt::Display for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GridError;

    #[test]
    fn filter() {
        let gpu = NodeHandle::new("node://d/1", "gpu-a100");
        let cpu = NodeHandle::new("node://d/2", "cpu");

        let f = NodeFilter::new("gpu-.*").unwrap();
        assert!(f.matches(&gpu));
        assert!(!f.matches(&cpu));

        let f = NodeFilter::new("gpu").unwrap();
        assert!(!f.matches(&gpu));

        let f = NodeFilter::new(NodeFilter::ANY).unwrap();
        assert!(f.is_any());
        assert!(f.matches(&cpu));

        assert!(matches!(
            NodeFilter::new("(unclosed"),
            Err(GridError::InvalidArgument(_))
        ));
    }

    #[test]
    fn identity_is_url() {
        let a = NodeHandle::new("node://x/1", "cpu");
        let b = NodeHandle::new("node://x/1", "gpu");
        assert_eq!(a, b);
    }
}
