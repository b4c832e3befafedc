use std::path::{Path, PathBuf};

use eyre::OptionExt;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use fob_provision::{Config, RegistryEnvironment};
use serde::Serialize;

/// Prefix of environment overrides, e.g. `FOB_REGISTER_REGISTRY__USERNAME`
const ENV_PREFIX: &str = "FOB_REGISTER_";

/// Returns the base config directory. It also creates the directory if it
/// doesn't exist yet.
pub(crate) fn config_dir() -> eyre::Result<PathBuf> {
    #[allow(deprecated)]
    let dir = std::env::home_dir()
        .ok_or_eyre("home directory not found")?
        .join(".fob-register");
    if !dir.exists() {
        std::fs::create_dir(&dir)?
    }
    Ok(dir)
}

/// Values given on the command line; unset fields leave lower layers alone
#[derive(Debug, Default, Serialize)]
pub(crate) struct Overrides {
    #[serde(skip_serializing_if = "ReaderOverrides::is_empty")]
    pub(crate) reader: ReaderOverrides,
    #[serde(skip_serializing_if = "RegistryOverrides::is_empty")]
    pub(crate) registry: RegistryOverrides,
    #[serde(skip_serializing_if = "StoreOverrides::is_empty")]
    pub(crate) store: StoreOverrides,
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct ReaderOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
}

impl ReaderOverrides {
    const fn is_empty(&self) -> bool {
        self.name.is_none()
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct RegistryOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) environment: Option<RegistryEnvironment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) username: Option<String>,
}

impl RegistryOverrides {
    const fn is_empty(&self) -> bool {
        self.environment.is_none() && self.base_url.is_none() && self.username.is_none()
    }
}

#[derive(Debug, Default, Serialize)]
pub(crate) struct StoreOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) path: Option<PathBuf>,
}

impl StoreOverrides {
    const fn is_empty(&self) -> bool {
        self.path.is_none()
    }
}

/// Layer defaults, the TOML file, the environment and the command line
pub(crate) fn load(file: Option<&Path>, overrides: &Overrides) -> eyre::Result<Config> {
    let file = match file {
        Some(file) => file.to_path_buf(),
        None => config_dir()?.join("config.toml"),
    };
    let mut config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .merge(Serialized::defaults(overrides))
        .extract()?;

    if config.store.path.is_none() {
        config.store.path = Some(config_dir()?.join("fobs.json"));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [reader]
                settle_delay_ms = 200

                [registry]
                environment = "oss"
                username = "file-user"

                [store]
                path = "fobs.json"
                "#,
            )?;
            jail.set_env("FOB_REGISTER_REGISTRY__USERNAME", "env-user");
            jail.set_env("FOB_REGISTER_SECRET__LENGTH", "8");

            let overrides = Overrides {
                reader: ReaderOverrides {
                    name: Some("ACR122U".into()),
                },
                ..Overrides::default()
            };
            let config = load(Some(Path::new("config.toml")), &overrides)
                .map_err(|e| e.to_string())?;

            assert_eq!(config.reader.name.as_deref(), Some("ACR122U"));
            assert_eq!(config.reader.settle_delay_ms, 200);
            assert_eq!(config.reader.response_timeout_ms, 100);
            assert_eq!(config.registry.environment, RegistryEnvironment::Oss);
            assert_eq!(config.registry.username.as_deref(), Some("env-user"));
            assert_eq!(config.secret.length, 8);
            assert_eq!(config.store.path, Some(PathBuf::from("fobs.json")));
            Ok(())
        });
    }

    #[test]
    fn test_flags_win_over_environment() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[store]\npath = \"fobs.json\"\n")?;
            jail.set_env("FOB_REGISTER_REGISTRY__ENVIRONMENT", "oss");

            let overrides = Overrides {
                registry: RegistryOverrides {
                    environment: Some(RegistryEnvironment::Production),
                    ..RegistryOverrides::default()
                },
                ..Overrides::default()
            };
            let config = load(Some(Path::new("config.toml")), &overrides)
                .map_err(|e| e.to_string())?;
            assert_eq!(
                config.registry.environment,
                RegistryEnvironment::Production
            );
            Ok(())
        });
    }
}
