// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Boolean enumeration with string serialization support
///
/// Represents yes/no values with support for various string representations
/// including "Yes"/"No", "true"/"false", and "1"/"0".
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum YesNo {
    #[serde(
        rename = "Yes",
        alias = "yes",
        alias = "YES",
        alias = "true",
        alias = "True",
        alias = "1"
    )]
    Yes,
    #[serde(
        rename = "No",
        alias = "no",
        alias = "NO",
        alias = "false",
        alias = "False",
        alias = "0"
    )]
    No,
}
impl fmt::Display for YesNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        })
    }
}
impl From<bool> for YesNo {
    fn from(b: bool) -> Self {
        if b { YesNo::Yes } else { YesNo::No }
    }
}
impl YesNo {
    pub fn as_bool(self) -> bool {
        matches!(self, YesNo::Yes)
    }
}

/// TLS peer-verification policy, keyed off the `caFile` sentinel: `"SYSTEM"`
/// selects the platform trust store, `"NONE"` disables verification,
/// anything else names a PEM bundle on disk.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum TlsVerifyPolicy {
    Sentinel(TlsVerifySentinel),
    CustomBundle(String),
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVerifySentinel {
    #[serde(rename = "SYSTEM")]
    SystemDefault,
    #[serde(rename = "NONE")]
    Disabled,
}

impl fmt::Display for TlsVerifyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVerifyPolicy::Sentinel(TlsVerifySentinel::SystemDefault) => f.write_str("SYSTEM"),
            TlsVerifyPolicy::Sentinel(TlsVerifySentinel::Disabled) => f.write_str("NONE"),
            TlsVerifyPolicy::CustomBundle(path) => f.write_str(path),
        }
    }
}

impl Default for TlsVerifyPolicy {
    fn default() -> Self {
        TlsVerifyPolicy::Sentinel(TlsVerifySentinel::SystemDefault)
    }
}

/// Log rendering format for [`crate::cfg::logger`], orthogonal to the
/// rolling-file rotation cadence which the logger module models on its own.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    #[serde(rename = "pretty", alias = "Pretty")]
    Pretty,
    #[serde(rename = "json", alias = "Json", alias = "JSON")]
    Json,
}
