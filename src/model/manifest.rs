use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::EngineError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PackageKind {
    #[default]
    Translation,
    DomainAllowlist,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackageMeta {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub kind: PackageKind,

    pub version: String,

    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub enabled_by_default: bool,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DomainPackageDescriptor {
    pub id: String,

    pub version: String,

    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub script_version: String,

    #[serde(default)]
    pub generated_at: Option<String>,

    #[serde(default)]
    pub domain_package: Option<DomainPackageDescriptor>,

    #[serde(default)]
    pub packages: Vec<PackageMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    #[serde(default)]
    script_version: String,

    #[serde(default)]
    generated_at: Option<String>,

    #[serde(default)]
    domain_package: Option<Value>,

    #[serde(default)]
    packages: Vec<Value>,
}

impl Manifest {
    /// Validates a manifest from the network. Malformed package entries are
    /// dropped individually so one bad entry cannot hide the rest.
    pub fn from_value(value: Value) -> Result<Manifest, EngineError> {
        let raw: RawManifest = serde_json::from_value(value)?;

        let mut packages = Vec::with_capacity(raw.packages.len());
        for (i, v) in raw.packages.into_iter().enumerate() {
            match serde_json::from_value::<PackageMeta>(v) {
                Ok(meta) if meta.id.trim().is_empty() || meta.version.trim().is_empty() => {
                    warn!(index = i, "manifest entry without id or version, skipped");
                }
                Ok(meta) => packages.push(meta),
                Err(e) => warn!(index = i, error = %e, "invalid manifest entry, skipped"),
            }
        }

        let domain_package = match raw.domain_package {
            None | Some(Value::Null) => None,
            Some(v) => match serde_json::from_value::<DomainPackageDescriptor>(v) {
                Ok(d) => Some(d),
                Err(e) => {
                    warn!(error = %e, "invalid domainPackage descriptor, ignored");
                    None
                }
            },
        };

        Ok(Manifest {
            script_version: raw.script_version,
            generated_at: raw.generated_at,
            domain_package,
            packages,
        })
    }
}
