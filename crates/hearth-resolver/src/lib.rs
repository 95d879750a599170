//! Dependency resolver.
//!
//! Validates a manifest's `requires`/`provides`/`conflicts` against the
//! current fleet (with locality-aware lookups for `same-host` requirements)
//! and resolves a deployment's effective configuration.

pub mod error;

pub use error::{Error, Result};

use hearth_proto::{ConfigFieldType, Locality, Manifest, ServiceReq, UserConfig};
use hearth_registry::Registry;
use uuid::Uuid;

/// Outcome of [`validate`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Validation {
    /// Whether the manifest may be installed on the target server as-is.
    pub valid: bool,
    /// Hard failures: a required dependency has no qualifying provider.
    pub errors: Vec<String>,
    /// Soft failures: an optional dependency has no provider.
    pub warnings: Vec<String>,
}

/// Validate a manifest's `requires` entries against the current fleet.
///
/// For each requirement: locate providers via the registry; a `same-host`
/// locality constraint restricts providers to `server_id`; a missing
/// `optional` requirement is a warning, a missing required one is an error.
pub fn validate(manifest: &Manifest, server_id: Uuid, registry: &Registry) -> Result<Validation> {
    let mut out = Validation {
        valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    for req in &manifest.requires {
        let satisfied = has_provider(req, server_id, registry)?;
        if satisfied {
            continue;
        }
        if req.optional {
            out.warnings.push(format!(
                "optional dependency '{}' has no provider",
                req.service
            ));
        } else {
            out.valid = false;
            out.errors.push(format!(
                "required dependency '{}' has no provider",
                req.service
            ));
        }
    }

    Ok(out)
}

fn has_provider(req: &ServiceReq, server_id: Uuid, registry: &Registry) -> Result<bool> {
    match req.locality {
        Some(Locality::SameHost) => Ok(registry
            .find_service_on_server(&req.service, server_id)?
            .is_some()),
        Some(Locality::Any) | None => Ok(!registry.find_all_services(&req.service)?.is_empty()),
    }
}

/// Resolve a manifest's effective configuration for an install.
///
/// Merge order: `configSchema` defaults → values inherited
/// from a dependency's resolved config (`inheritFrom`) → `userConfig`.
/// Generated fields (secrets) are left untouched; the deployer fills those
/// downstream. `userConfig` is schema-validated first (types, required,
/// `select` whitelist).
pub fn resolve(
    manifest: &Manifest,
    server_id: Uuid,
    user_config: &UserConfig,
    registry: &Registry,
) -> Result<UserConfig> {
    validate_user_config(manifest, user_config)?;

    let mut resolved = UserConfig::new();

    for field in &manifest.config_schema {
        if field.generated {
            continue;
        }
        if let Some(default) = &field.default {
            resolved.insert(field.name.clone(), default.clone());
        }
        if let Some(dep_name) = &field.inherit_from {
            if let Some(provider) = registry.find_service(dep_name)? {
                resolved.insert(field.name.clone(), serde_json::json!(provider.host));
            }
        }
    }

    for (key, value) in user_config {
        resolved.insert(key.clone(), value.clone());
    }

    Ok(resolved)
}

fn validate_user_config(manifest: &Manifest, user_config: &UserConfig) -> Result<()> {
    for field in &manifest.config_schema {
        if field.generated {
            continue;
        }
        let value = user_config.get(&field.name);
        if field.required && value.is_none() && field.default.is_none() {
            return Err(Error::Validation(format!(
                "missing required field '{}'",
                field.name
            )));
        }
        let Some(value) = value else { continue };
        let type_ok = match field.field_type {
            ConfigFieldType::String | ConfigFieldType::Password => value.is_string(),
            ConfigFieldType::Number => value.is_number(),
            ConfigFieldType::Boolean => value.is_boolean(),
            ConfigFieldType::Select => {
                value.as_str().is_some_and(|s| field.options.iter().any(|o| o == s))
            }
        };
        if !type_ok {
            return Err(Error::Validation(format!(
                "field '{}' has wrong type or an unlisted select value",
                field.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_proto::{ConfigField, Server};
    use hearth_store::Store;
    use std::collections::HashMap;

    fn manifest_with_requires(requires: Vec<ServiceReq>) -> Manifest {
        Manifest {
            name: "demo".into(),
            display_name: "Demo".into(),
            version: "1.0".into(),
            category: "utility".into(),
            config_schema: vec![],
            provides: vec![],
            requires,
            conflicts: vec![],
            webui: None,
            service_user: None,
            service_group: None,
            data_directories: vec![],
            capabilities: vec![],
            logging: None,
            system: false,
            mandatory: false,
            singleton: false,
        }
    }

    #[test]
    fn missing_required_dependency_is_an_error() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Registry::open(&store, 9000, 9010).unwrap();
        let manifest = manifest_with_requires(vec![ServiceReq {
            service: "postgres".into(),
            optional: false,
            locality: None,
        }]);
        let result = validate(&manifest, Uuid::new_v4(), &registry).unwrap();
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_optional_dependency_is_a_warning_not_an_error() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Registry::open(&store, 9000, 9010).unwrap();
        let manifest = manifest_with_requires(vec![ServiceReq {
            service: "postgres".into(),
            optional: true,
            locality: None,
        }]);
        let result = validate(&manifest, Uuid::new_v4(), &registry).unwrap();
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn same_host_locality_requires_provider_on_target_server() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Registry::open(&store, 9000, 9010).unwrap();
        let server = Server::new("core", None, true);
        registry.put_server(&server).unwrap();
        registry
            .register_service(Uuid::new_v4(), "postgres", server.id, 5432)
            .unwrap();

        let manifest = manifest_with_requires(vec![ServiceReq {
            service: "postgres".into(),
            optional: false,
            locality: Some(Locality::SameHost),
        }]);

        let ok = validate(&manifest, server.id, &registry).unwrap();
        assert!(ok.valid);

        let elsewhere = validate(&manifest, Uuid::new_v4(), &registry).unwrap();
        assert!(!elsewhere.valid);
    }

    #[test]
    fn resolve_merges_defaults_then_user_config() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Registry::open(&store, 9000, 9010).unwrap();
        let manifest = Manifest {
            config_schema: vec![ConfigField {
                name: "port".into(),
                label: "Port".into(),
                field_type: ConfigFieldType::Number,
                required: false,
                default: Some(serde_json::json!(8080)),
                options: vec![],
                generated: false,
                secret: false,
                inherit_from: None,
            }],
            ..manifest_with_requires(vec![])
        };

        let defaulted = resolve(&manifest, Uuid::new_v4(), &HashMap::new(), &registry).unwrap();
        assert_eq!(defaulted.get("port"), Some(&serde_json::json!(8080)));

        let mut user_config = HashMap::new();
        user_config.insert("port".to_string(), serde_json::json!(9090));
        let overridden = resolve(&manifest, Uuid::new_v4(), &user_config, &registry).unwrap();
        assert_eq!(overridden.get("port"), Some(&serde_json::json!(9090)));
    }

    #[test]
    fn resolve_rejects_select_value_outside_whitelist() {
        let store = Store::temporary(&[]).unwrap();
        let registry = Registry::open(&store, 9000, 9010).unwrap();
        let manifest = Manifest {
            config_schema: vec![ConfigField {
                name: "network".into(),
                label: "Network".into(),
                field_type: ConfigFieldType::Select,
                required: true,
                default: None,
                options: vec!["mainnet".into(), "testnet".into()],
                generated: false,
                secret: false,
                inherit_from: None,
            }],
            ..manifest_with_requires(vec![])
        };
        let mut user_config = HashMap::new();
        user_config.insert("network".to_string(), serde_json::json!("regtest"));
        let err = resolve(&manifest, Uuid::new_v4(), &user_config, &registry).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
