//! Library rule evaluation
//!
//! Rules are evaluated in order and the last matching rule decides. With no
//! rules at all a library is always allowed; with rules but no match it is
//! not.

use crate::descriptor::{OsRule, Rule, RuleAction};
use regex::Regex;
use std::collections::BTreeMap;
use sysinfo::System;
use tracing::warn;

/// Feature flags matched by `features` rules (`is_demo_user`, ...)
pub type FeatureSet = BTreeMap<String, bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsName {
    Windows,
    Linux,
    Osx,
    Unknown,
}

impl OsName {
    /// Name used in descriptor rules and `natives` maps
    pub fn as_str(self) -> &'static str {
        match self {
            OsName::Windows => "windows",
            OsName::Linux => "linux",
            OsName::Osx => "osx",
            OsName::Unknown => "unknown",
        }
    }
}

/// The machine libraries are selected for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: OsName,
    pub os_version: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: OsName, os_version: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os,
            os_version: os_version.into(),
            arch: arch.into(),
        }
    }

    /// The host this process runs on. The OS version is read through
    /// `sysinfo` and trimmed to its dotted number, e.g. `14.5` or `10.0`.
    pub fn current() -> Self {
        let os = if cfg!(target_os = "windows") {
            OsName::Windows
        } else if cfg!(target_os = "linux") {
            OsName::Linux
        } else if cfg!(target_os = "macos") {
            OsName::Osx
        } else {
            OsName::Unknown
        };

        Self {
            os,
            os_version: System::os_version()
                .map(|v| normalize_os_version(&v))
                .unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Pointer width substituted for `${arch}` in native classifiers
    pub fn arch_bits(&self) -> &'static str {
        match self.arch.as_str() {
            "x86" | "i386" | "i686" | "arm" => "32",
            _ => "64",
        }
    }
}

/// Leading dotted number of an OS version string, with `.0` appended when
/// only a major version is present (`"11 (22631)"` becomes `"11.0"`)
fn normalize_os_version(raw: &str) -> String {
    let version: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let version = version.trim_end_matches('.');
    if version.is_empty() || version.contains('.') {
        version.to_string()
    } else {
        format!("{}.0", version)
    }
}

/// Whether a library with `rules` applies on `platform`
pub fn rules_allow(rules: Option<&[Rule]>, platform: &Platform, features: &FeatureSet) -> bool {
    let Some(rules) = rules else {
        return true;
    };
    if rules.is_empty() {
        return true;
    }

    let mut allowed = false;
    for rule in rules {
        if rule_matches(rule, platform, features) {
            allowed = rule.action == RuleAction::Allow;
        }
    }
    allowed
}

fn rule_matches(rule: &Rule, platform: &Platform, features: &FeatureSet) -> bool {
    if let Some(os) = &rule.os {
        if !os_matches(os, platform) {
            return false;
        }
    }
    if let Some(required) = &rule.features {
        for (name, expected) in required {
            if features.get(name).copied().unwrap_or(false) != *expected {
                return false;
            }
        }
    }
    true
}

fn os_matches(rule: &OsRule, platform: &Platform) -> bool {
    if let Some(name) = rule.name.as_deref() {
        let matches = match (name, platform.os) {
            ("windows", OsName::Windows) | ("linux", OsName::Linux) => true,
            ("osx", OsName::Osx) | ("macos", OsName::Osx) => true,
            _ => false,
        };
        if !matches {
            return false;
        }
    }

    if let Some(pattern) = rule.version.as_deref() {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(&platform.os_version) {
                    return false;
                }
            }
            Err(e) => {
                warn!("Ignoring rule with invalid os version pattern {:?}: {}", pattern, e);
                return false;
            }
        }
    }

    if let Some(arch) = rule.arch.as_deref() {
        if !arch_matches(arch, &platform.arch) {
            return false;
        }
    }

    true
}

fn arch_matches(expected: &str, actual: &str) -> bool {
    if expected.eq_ignore_ascii_case(actual) {
        return true;
    }

    matches!(
        (expected, actual),
        ("x86", "i386")
            | ("x86", "i686")
            | ("x86_64", "amd64")
            | ("amd64", "x86_64")
            | ("arm64", "aarch64")
            | ("aarch64", "arm64")
    )
}
