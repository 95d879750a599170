//! Environment scrubbing for install/lifecycle scripts.
//!
//! The spawned environment is exactly the static safe set, plus the fixed
//! per-app variables, plus `payload.env` if present. The agent's own
//! process environment is never forwarded.

use std::collections::BTreeMap;

/// Fixed per-app variables derived from the install/configure request.
#[derive(Debug, Clone)]
pub struct AppEnvContext {
    /// Manifest name.
    pub app_name: String,
    /// Manifest version.
    pub app_version: String,
    /// Absolute path to the app's install directory.
    pub app_dir: String,
    /// Unix user the service runs as, if any.
    pub service_user: Option<String>,
    /// Unix group the service runs as, if any.
    pub service_group: Option<String>,
    /// Absolute path to the app's primary data directory.
    pub data_dir: String,
    /// Absolute path to the app's config directory.
    pub config_dir: String,
}

/// The static safe variables carried into every spawned script,
/// independent of which app is being installed.
fn static_safe_vars() -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert("PATH".into(), "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".into());
    vars.insert("HOME".into(), "/root".into());
    vars.insert("LANG".into(), "C.UTF-8".into());
    vars.insert("LC_ALL".into(), "C.UTF-8".into());
    vars
}

/// Build the exact environment a lifecycle script is spawned with: static
/// safe set, then the app context variables, then `payload_env`, in that
/// order so later entries win on key collision.
pub fn build_script_env(ctx: &AppEnvContext, payload_env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut env = static_safe_vars();
    env.insert("APP_NAME".into(), ctx.app_name.clone());
    env.insert("APP_VERSION".into(), ctx.app_version.clone());
    env.insert("APP_DIR".into(), ctx.app_dir.clone());
    if let Some(user) = &ctx.service_user {
        env.insert("SERVICE_USER".into(), user.clone());
    }
    if let Some(group) = &ctx.service_group {
        env.insert("SERVICE_GROUP".into(), group.clone());
    }
    env.insert("DATA_DIR".into(), ctx.data_dir.clone());
    env.insert("CONFIG_DIR".into(), ctx.config_dir.clone());

    for (key, value) in payload_env {
        env.insert(key.clone(), value.clone());
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> AppEnvContext {
        AppEnvContext {
            app_name: "demo".into(),
            app_version: "1.0".into(),
            app_dir: "/opt/hearth/apps/demo".into(),
            service_user: Some("demo-svc".into()),
            service_group: Some("demo-svc".into()),
            data_dir: "/var/lib/hearth/demo".into(),
            config_dir: "/etc/hearth/demo".into(),
        }
    }

    #[test]
    fn env_contains_exactly_the_static_set_plus_app_context() {
        let env = build_script_env(&ctx(), &BTreeMap::new());
        assert_eq!(env.get("APP_NAME").unwrap(), "demo");
        assert_eq!(env.get("SERVICE_USER").unwrap(), "demo-svc");
        assert!(env.contains_key("PATH"));
        assert!(env.contains_key("HOME"));
        assert!(!env.contains_key("RANDOM_HOST_VAR"));
    }

    #[test]
    fn payload_env_overrides_app_context_on_key_collision() {
        let mut payload_env = BTreeMap::new();
        payload_env.insert("APP_NAME".into(), "overridden".into());
        let env = build_script_env(&ctx(), &payload_env);
        assert_eq!(env.get("APP_NAME").unwrap(), "overridden");
    }

    #[test]
    fn never_forwards_the_agents_own_process_environment() {
        // A canary that would only appear if std::env::vars() leaked in.
        unsafe {
            std::env::set_var("HEARTH_TEST_CANARY", "leak-me");
        }
        let env = build_script_env(&ctx(), &BTreeMap::new());
        assert!(!env.contains_key("HEARTH_TEST_CANARY"));
        unsafe {
            std::env::remove_var("HEARTH_TEST_CANARY");
        }
    }
}
