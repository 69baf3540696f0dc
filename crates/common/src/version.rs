//! Version reconciliation
//!
//! Each LiteServ flavour reports its version in a different shape on
//! `GET /`. The functions here extract `(version, build)` from that payload
//! and compare it against what the harness asked for. Everything in this
//! module is pure: the same payload and expectation always give the same
//! answer.

use crate::error::{Error, Result};
use crate::types::Platform;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Vendor name reported by the Objective-C LiteServ (macOS and iOS)
pub const OBJC_VENDOR_NAME: &str = "Couchbase Lite (Objective-C)";

/// Android release whose LiteServ reports a bare version with no build
pub const ANDROID_LEGACY_VERSION: &str = "1.2.1";

/// Token positions of a .NET vendor version once split on `[ /-]`.
///
/// `.NET OS X 10.12/x86_64 1.3.1-build0013/5d1553d` and
/// `.NET Microsoft Windows 10 Enterprise x64 1.4.0-build0043/5cfe25b` carry a
/// different number of tokens before the version, so the indices are listed
/// per sub-platform rather than searched for.
#[derive(Debug, Clone, Copy)]
pub struct DotnetLayout {
    pub prefix: &'static str,
    pub version_index: usize,
    pub build_index: usize,
}

pub const DOTNET_OSX: DotnetLayout = DotnetLayout {
    prefix: ".NET OS X",
    version_index: 5,
    build_index: 6,
};

pub const DOTNET_WINDOWS: DotnetLayout = DotnetLayout {
    prefix: ".NET Microsoft Windows",
    version_index: 6,
    build_index: 7,
};

/// Version and build a running server reported
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub version: String,
    pub build: Option<String>,
}

/// Check that `payload` was produced by the expected platform running the
/// expected version and build.
pub fn reconcile(
    platform: Platform,
    expected_version: &str,
    expected_build: Option<&str>,
    payload: &Value,
) -> Result<Reconciled> {
    match platform {
        Platform::LocalMacos | Platform::Ios => {
            reconcile_objc(expected_version, expected_build, payload)
        }
        Platform::LocalDotnet => {
            reconcile_dotnet(&DOTNET_OSX, expected_version, expected_build, payload)
        }
        Platform::WindowsRemote => {
            reconcile_dotnet(&DOTNET_WINDOWS, expected_version, expected_build, payload)
        }
        Platform::Android => reconcile_android(expected_version, expected_build, payload),
    }
}

fn vendor_field<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload
        .get("vendor")
        .and_then(|v| v.get(field))
        .and_then(|v| v.as_str())
}

fn reconcile_objc(
    expected_version: &str,
    expected_build: Option<&str>,
    payload: &Value,
) -> Result<Reconciled> {
    let name = vendor_field(payload, "name").unwrap_or("<missing>");
    if name != OBJC_VENDOR_NAME {
        return Err(Error::WrongPlatform {
            expected: OBJC_VENDOR_NAME.to_string(),
            actual: name.to_string(),
        });
    }

    let running = vendor_field(payload, "version")
        .ok_or_else(|| Error::MalformedStatus("missing vendor.version".to_string()))?;

    // "1.3.1 (build 6)"
    let (version, build) = match running.split_once(" (build ") {
        Some((version, rest)) => (
            version.to_string(),
            Some(rest.strip_suffix(')').unwrap_or(rest).to_string()),
        ),
        None => (running.to_string(), None),
    };

    let expected = match expected_build {
        Some(build) => format!("{} (build {})", expected_version, build),
        None => expected_version.to_string(),
    };

    if expected != running {
        return Err(Error::VersionMismatch {
            expected,
            actual: running.to_string(),
        });
    }

    Ok(Reconciled { version, build })
}

static DOTNET_SPLITTER: Lazy<Regex> = Lazy::new(|| Regex::new("[ /-]").expect("static regex"));

fn reconcile_dotnet(
    layout: &DotnetLayout,
    expected_version: &str,
    expected_build: Option<&str>,
    payload: &Value,
) -> Result<Reconciled> {
    let running = vendor_field(payload, "version").unwrap_or_default();
    if !running.starts_with(layout.prefix) {
        return Err(Error::WrongPlatform {
            expected: layout.prefix.to_string(),
            actual: running.to_string(),
        });
    }

    let parts: Vec<&str> = DOTNET_SPLITTER.split(running).collect();
    let token = |index: usize| {
        parts.get(index).copied().ok_or_else(|| {
            Error::MalformedStatus(format!("too few tokens in .NET version: {}", running))
        })
    };

    let version = token(layout.version_index)?.to_string();
    let build_token = token(layout.build_index)?;
    let build: u32 = build_token
        .trim_start_matches("build")
        .parse()
        .map_err(|_| Error::MalformedStatus(format!("bad build token: {}", build_token)))?;
    let build = build.to_string();

    let actual = format!("{}-{}", version, build);
    let expected = match expected_build {
        Some(build) => format!("{}-{}", expected_version, build),
        None => expected_version.to_string(),
    };

    if expected != actual {
        return Err(Error::VersionMismatch { expected, actual });
    }

    Ok(Reconciled {
        version,
        build: Some(build),
    })
}

fn reconcile_android(
    expected_version: &str,
    expected_build: Option<&str>,
    payload: &Value,
) -> Result<Reconciled> {
    let running = match payload.get("version").and_then(|v| v.as_str()) {
        Some(running) => running,
        None => {
            return Err(Error::WrongPlatform {
                expected: "android".to_string(),
                actual: vendor_field(payload, "name")
                    .or_else(|| vendor_field(payload, "version"))
                    .unwrap_or("<missing>")
                    .to_string(),
            })
        }
    };

    // 1.2.1 predates the build suffix
    let expected = match expected_build {
        Some(build) if expected_version != ANDROID_LEGACY_VERSION => {
            format!("{}-{}", expected_version, build)
        }
        _ => expected_version.to_string(),
    };

    if expected != running {
        return Err(Error::VersionMismatch {
            expected,
            actual: running.to_string(),
        });
    }

    let (version, build) = match running.split_once('-') {
        Some((version, build)) => (version.to_string(), Some(build.to_string())),
        None => (running.to_string(), None),
    };

    Ok(Reconciled { version, build })
}
