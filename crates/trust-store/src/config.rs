use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{InteractionMode, TrustConfigError};

/// Where the system trust source takes its anchors from. There is no
/// variant for the operating system's store: "system" anchors are always
/// the bundled Mozilla roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRoots {
    /// Mozilla root program bundled through `webpki-roots`.
    Bundled,
    /// No system anchors: only the persistent store and confirmations.
    Disabled,
}

impl Default for SystemRoots {
    fn default() -> Self {
        Self::Bundled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrustStoreConfig {
    pub store_path: PathBuf,
    pub store_password: String,
    pub interaction_mode: InteractionMode,
    pub system_roots: SystemRoots,
}

impl Default for TrustStoreConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::new(),
            store_password: String::new(),
            interaction_mode: InteractionMode::Interactive,
            system_roots: SystemRoots::Bundled,
        }
    }
}

impl TrustStoreConfig {
    pub fn new(store_path: impl Into<PathBuf>, store_password: impl Into<String>) -> Self {
        Self {
            store_path: store_path.into(),
            store_password: store_password.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), TrustConfigError> {
        let rendered = self.store_path.to_string_lossy();
        if rendered.trim().is_empty() {
            return Err(TrustConfigError::EmptyStorePath);
        }
        if rendered.ends_with('/') || rendered.ends_with('\\') || self.store_path.file_name().is_none() {
            return Err(TrustConfigError::StorePathIsDirectory(rendered.into_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SystemRoots, TrustStoreConfig};
    use crate::{InteractionMode, TrustConfigError};

    #[test]
    fn default_config_requires_a_store_path() {
        assert_eq!(
            TrustStoreConfig::default().validate(),
            Err(TrustConfigError::EmptyStorePath)
        );
        assert!(TrustStoreConfig::new("/var/lib/app/accepted.p12", "")
            .validate()
            .is_ok());
    }

    #[test]
    fn directory_like_store_path_is_rejected() {
        for path in ["/var/lib/app/", "/var/lib/app/.."] {
            let error = TrustStoreConfig::new(path, "secret")
                .validate()
                .expect_err("directory-like path");
            assert!(matches!(error, TrustConfigError::StorePathIsDirectory(_)), "{path}");
        }
    }

    #[test]
    fn config_schema_uses_snake_case_and_defaults() {
        let config: TrustStoreConfig = serde_json::from_str(
            r#"{"store_path":"/tmp/accepted.p12","interaction_mode":"non_interactive"}"#,
        )
        .expect("parse config");
        assert_eq!(config.interaction_mode, InteractionMode::NonInteractive);
        assert_eq!(config.system_roots, SystemRoots::Bundled);
        assert_eq!(config.store_password, "");

        let unknown = serde_json::from_str::<TrustStoreConfig>(r#"{"store_paht":"/tmp/x.p12"}"#);
        assert!(unknown.is_err());
    }
}
