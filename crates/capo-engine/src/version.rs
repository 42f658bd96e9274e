//! Engine version handling for capability gates

use capo_common::{Error, Result};

/// Version of the oVirt engine, ordered component by component
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion {
    /// Major version
    pub major: i64,
    /// Minor version
    pub minor: i64,
    /// Build number
    pub build: i64,
    /// Revision
    pub revision: i64,
}

impl EngineVersion {
    /// Create a version from its four components
    pub const fn new(major: i64, minor: i64, build: i64, revision: i64) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Decode the `version` object of the engine's `product_info`
    ///
    /// The engine renders integers as JSON strings; both forms are accepted.
    /// Every component must be present.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let component = |name: &str| -> Result<i64> {
            let field = value.get(name).ok_or_else(|| {
                Error::serialization_for_kind(
                    "EngineVersion",
                    format!("engine version is missing '{}'", name),
                )
            })?;
            let parsed = match field {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            parsed.ok_or_else(|| {
                Error::serialization_for_kind(
                    "EngineVersion",
                    format!("engine version '{}' is not an integer: {}", name, field),
                )
            })
        };

        Ok(Self {
            major: component("major")?,
            minor: component("minor")?,
            build: component("build")?,
            revision: component("revision")?,
        })
    }
}

impl std::fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

/// Compare two possibly-absent versions
///
/// Returns the difference of the first differing component: zero when equal,
/// negative when `v` is older than `other`, positive when newer. The
/// difference saturates, so only its sign is meaningful for components near
/// the `i64` bounds. An absent version on either side is an error rather than
/// a defaulted comparison.
pub fn version_compare(v: Option<&EngineVersion>, other: Option<&EngineVersion>) -> Result<i64> {
    let (v, other) = match (v, other) {
        (Some(v), Some(other)) => (v, other),
        _ => {
            return Err(Error::internal_with_context(
                "version_compare",
                "can't compare absent versions",
            ))
        }
    };

    let diff = [
        v.major.saturating_sub(other.major),
        v.minor.saturating_sub(other.minor),
        v.build.saturating_sub(other.build),
        v.revision.saturating_sub(other.revision),
    ]
    .into_iter()
    .find(|d| *d != 0)
    .unwrap_or(0);

    Ok(diff)
}
