use super::known_hosts::HostStatus;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// How server host keys are verified against the known-hosts store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Only keys already in the store are accepted.
    Strict,
    /// Unknown keys are recorded and accepted; changed keys are rejected.
    #[default]
    TrustOnFirstUse,
    /// Every key is accepted and nothing is recorded.
    AcceptAll,
}

impl HostKeyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostKeyPolicy::Strict => "strict",
            HostKeyPolicy::TrustOnFirstUse => "trust-on-first-use",
            HostKeyPolicy::AcceptAll => "accept-all",
        }
    }

    /// Whether this policy needs the known-hosts store at all.
    pub fn uses_store(&self) -> bool {
        !matches!(self, HostKeyPolicy::AcceptAll)
    }

    /// Decide what to do with a key given its status in the store.
    pub fn decide(&self, status: &HostStatus) -> HostKeyDecision {
        match (self, status) {
            (HostKeyPolicy::AcceptAll, _) => HostKeyDecision::Accept,
            (_, HostStatus::Known) => HostKeyDecision::Accept,
            (_, HostStatus::Changed { expected }) => {
                HostKeyDecision::Reject(format!("host key changed, expected {expected}"))
            }
            (HostKeyPolicy::TrustOnFirstUse, HostStatus::Unknown) => HostKeyDecision::Record,
            (HostKeyPolicy::Strict, HostStatus::Unknown) => {
                HostKeyDecision::Reject("unknown host key".to_string())
            }
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(HostKeyPolicy::Strict),
            "trust-on-first-use" | "tofu" => Ok(HostKeyPolicy::TrustOnFirstUse),
            "accept-all" => Ok(HostKeyPolicy::AcceptAll),
            other => Err(format!(
                "unknown host key policy {other:?} (expected strict, trust-on-first-use or accept-all)"
            )),
        }
    }
}

/// Outcome of a host key check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyDecision {
    Accept,
    /// Accept and add the key to the store.
    Record,
    Reject(String),
}
