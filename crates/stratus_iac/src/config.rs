//! Stack configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! reference topology. Files are YAML or TOML, picked by extension.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use stratus_core::Ipv4Cidr;

use crate::error::{ConfigError, ConfigResult};
use crate::network::{SubnetGroupConfig, SubnetType};

/// Top-level stack configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Stack identity; also the manifest and state file name.
    pub stack_name: String,
    /// Target region.
    pub region: String,
    /// Tags applied to every taggable resource.
    pub tags: BTreeMap<String, String>,
    pub network: NetworkConfig,
    pub compute: ComputeConfig,
    pub load_balancer: LoadBalancerConfig,
    pub secret: SecretConfig,
    pub database: DatabaseConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "GeneralImmersionDayStack".to_string(),
            region: "eu-west-1".to_string(),
            tags: BTreeMap::new(),
            network: NetworkConfig::default(),
            compute: ComputeConfig::default(),
            load_balancer: LoadBalancerConfig::default(),
            secret: SecretConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl StackConfig {
    /// Load a configuration file. `.yaml`/`.yml` and `.toml` are supported.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        // The network block is checked on the untyped document first so a
        // malformed CIDR surfaces as a declaration error, not a parse error.
        let config = match extension.as_str() {
            "yaml" | "yml" => {
                let document: serde_yaml::Value = serde_yaml::from_str(&content)?;
                if document.is_null() {
                    Self::default()
                } else {
                    check_network_block(
                        document
                            .get("network")
                            .and_then(|n| n.get("cidr"))
                            .and_then(serde_yaml::Value::as_str),
                    )?;
                    serde_yaml::from_value(document)?
                }
            }
            "toml" => {
                let document: toml::Value = toml::from_str(&content)?;
                check_network_block(
                    document
                        .get("network")
                        .and_then(|n| n.get("cidr"))
                        .and_then(toml::Value::as_str),
                )?;
                document.try_into()?
            }
            other => {
                return Err(ConfigError::UnsupportedFormat(format!(
                    "{} (expected .yaml, .yml or .toml)",
                    if other.is_empty() { "no extension" } else { other }
                )))
            }
        };
        debug!("Loaded stack config from {}", path.display());
        Ok(config)
    }

    pub fn with_stack_name(mut self, name: impl Into<String>) -> Self {
        self.stack_name = name.into();
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Apply `KEY=VALUE` tag overrides.
    pub fn with_tag_overrides<S: AsRef<str>>(mut self, overrides: &[S]) -> ConfigResult<Self> {
        for raw in overrides {
            let (key, value) = parse_tag(raw.as_ref())?;
            self.tags.insert(key, value);
        }
        Ok(self)
    }
}

/// Reject a malformed `network.cidr` before the typed parse sees it.
fn check_network_block(raw: Option<&str>) -> ConfigResult<()> {
    if let Some(raw) = raw {
        raw.parse::<Ipv4Cidr>()?;
    }
    Ok(())
}

/// Parse a `KEY=VALUE` tag override.
pub fn parse_tag(raw: &str) -> ConfigResult<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim().to_string(), value.to_string())),
        _ => Err(ConfigError::InvalidOverride(format!(
            "tag '{}' must look like KEY=VALUE",
            raw
        ))),
    }
}

/// Network layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Value of the VPC `Name` tag.
    pub name: String,
    pub cidr: Ipv4Cidr,
    pub max_azs: u8,
    pub nat_gateways: u8,
    pub subnet_groups: Vec<SubnetGroupConfig>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "ImmersionDayVPC".to_string(),
            cidr: Ipv4Cidr::from_octets([10, 0, 0, 0], 16),
            max_azs: 2,
            nat_gateways: 2,
            subnet_groups: vec![
                SubnetGroupConfig::new("Private", SubnetType::PrivateWithEgress, 24),
                SubnetGroupConfig::new("Public", SubnetType::Public, 24),
            ],
        }
    }
}

/// Instance tier: role, launch template and autoscaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    /// Machine image per region.
    pub machine_images: BTreeMap<String, String>,
    pub instance_type: String,
    /// Left unset, the group may scale to zero.
    pub min_capacity: Option<u32>,
    pub max_capacity: u32,
    pub desired_capacity: Option<u32>,
    pub role_name: String,
    pub security_group_name: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            machine_images: BTreeMap::from([(
                "eu-west-1".to_string(),
                "ami-0198c8ba2ab3402a6".to_string(),
            )]),
            instance_type: "t2.micro".to_string(),
            min_capacity: None,
            max_capacity: 1,
            desired_capacity: None,
            role_name: "ImmersionDayInstanceRole".to_string(),
            security_group_name: "ImmersionDayInstanceSG".to_string(),
        }
    }
}

/// Load balancer, listener and target group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    pub name: String,
    pub security_group_name: String,
    pub target_group_name: String,
    /// Listener port; the target group serves on the same port.
    pub port: u16,
    pub internet_facing: bool,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            name: "ImmersionDayALB".to_string(),
            security_group_name: "ImmersionDayALBSG".to_string(),
            target_group_name: "ImmersionDayTG".to_string(),
            port: 80,
            internet_facing: true,
        }
    }
}

/// Database credential secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretConfig {
    pub name: String,
    pub username: String,
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            name: "mysecret".to_string(),
            username: "awsuser".to_string(),
        }
    }
}

/// Aurora cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub engine_version: String,
    pub instance_type: String,
    pub instances: u32,
    pub port: u16,
    pub default_database_name: String,
    /// Subnet group the cluster is placed in.
    pub subnet_group: String,
    pub security_group_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            engine_version: "5.7.mysql_aurora.2.08.1".to_string(),
            instance_type: "db.t2.small".to_string(),
            instances: 2,
            port: 3306,
            default_database_name: "immersionday".to_string(),
            subnet_group: "Private".to_string(),
            security_group_name: "ImmersionDayAuroraSG".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    use stratus_core::DeclarationError;

    #[test]
    fn test_defaults_match_reference_topology() {
        let config = StackConfig::default();
        assert_eq!(config.stack_name, "GeneralImmersionDayStack");
        assert_eq!(config.network.cidr.to_string(), "10.0.0.0/16");
        assert_eq!(config.network.subnet_groups.len(), 2);
        assert_eq!(config.compute.min_capacity, None);
        assert_eq!(config.compute.max_capacity, 1);
        assert_eq!(config.load_balancer.port, 80);
        assert_eq!(config.database.subnet_group, "Private");
    }

    #[test]
    fn test_load_partial_yaml() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "stack_name: Staging\nregion: eu-west-1\ncompute:\n  max_capacity: 3\n  min_capacity: 1\n"
        )
        .unwrap();

        let config = StackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.stack_name, "Staging");
        assert_eq!(config.compute.max_capacity, 3);
        assert_eq!(config.compute.min_capacity, Some(1));
        assert_eq!(config.compute.instance_type, "t2.micro");
        assert_eq!(config.database.instances, 2);
    }

    #[test]
    fn test_load_toml() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "stack_name = \"Toml\"\n\n[network]\ncidr = \"10.1.0.0/16\"\nnat_gateways = 1\n\n[tags]\nOwner = \"ops\"\n"
        )
        .unwrap();

        let config = StackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.stack_name, "Toml");
        assert_eq!(config.network.cidr.to_string(), "10.1.0.0/16");
        assert_eq!(config.network.nat_gateways, 1);
        assert_eq!(config.tags.get("Owner").map(String::as_str), Some("ops"));
    }

    #[test]
    fn test_malformed_cidr_rejected_at_load() {
        let mut file = Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(file, "network:\n  cidr: 10.0.0.0/40\n").unwrap();
        assert!(matches!(
            StackConfig::from_file(file.path()),
            Err(ConfigError::Declaration(DeclarationError::InvalidCidr(_)))
        ));

        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[network]\ncidr = \"10.0.0/16\"\n").unwrap();
        assert!(matches!(
            StackConfig::from_file(file.path()),
            Err(ConfigError::Declaration(DeclarationError::InvalidCidr(_)))
        ));
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let file = Builder::new().suffix(".yaml").tempfile().unwrap();
        assert_eq!(StackConfig::from_file(file.path()).unwrap(), StackConfig::default());
    }

    #[test]
    fn test_yaml_syntax_error_stays_yaml() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "network: [unclosed").unwrap();
        assert!(matches!(StackConfig::from_file(file.path()), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_unknown_extension() {
        let file = Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(matches!(
            StackConfig::from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_tag_overrides() {
        let config = StackConfig::default()
            .with_tag_overrides(&["Environment=dev", "Team=platform=core"])
            .unwrap();
        assert_eq!(config.tags["Environment"], "dev");
        assert_eq!(config.tags["Team"], "platform=core");

        assert!(StackConfig::default().with_tag_overrides(&["novalue"]).is_err());
        assert!(StackConfig::default().with_tag_overrides(&["=x"]).is_err());
    }
}
