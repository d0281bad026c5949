//! Registry credentials resolved from a service account's pull secrets

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::api::Api;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::Reference;
use serde::Deserialize;
use tracing::{debug, warn};

use kiln_common::crd::ServiceAccountRef;
use kiln_common::{Error, Result};

/// Secret type holding a `.dockerconfigjson` document
pub const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";

/// Key of the document inside a dockerconfigjson secret
pub const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";

const DOCKER_HUB: &str = "docker.io";

/// Credentials per registry host
#[derive(Clone, Debug, Default)]
pub struct Keychain {
    auths: HashMap<String, RegistryAuth>,
}

impl Keychain {
    /// Credentials for `registry`, replacing any already held
    pub fn insert(&mut self, registry: &str, auth: RegistryAuth) {
        self.auths.insert(normalize_registry(registry), auth);
    }

    /// Credentials for the registry hosting `image`; anonymous when none are held
    pub fn resolve(&self, image: &str) -> RegistryAuth {
        let registry = match Reference::try_from(image) {
            Ok(reference) => normalize_registry(reference.registry()),
            Err(_) => return RegistryAuth::Anonymous,
        };
        self.auths
            .get(&registry)
            .cloned()
            .unwrap_or(RegistryAuth::Anonymous)
    }

    /// Number of registries with credentials
    pub fn len(&self) -> usize {
        self.auths.len()
    }

    /// Whether no credentials are held
    pub fn is_empty(&self) -> bool {
        self.auths.is_empty()
    }

    fn merge(&mut self, other: Keychain) {
        // First secret listed on the account wins for a given registry
        for (registry, auth) in other.auths {
            self.auths.entry(registry).or_insert(auth);
        }
    }
}

/// `https://index.docker.io/v1/` and `docker.io` name the same registry
fn normalize_registry(registry: &str) -> String {
    let host = registry
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or_default();
    match host {
        "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB.to_string(),
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Deserialize)]
struct DockerAuth {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

/// Parse a `.dockerconfigjson` document into a keychain
pub fn parse_docker_config(raw: &[u8]) -> std::result::Result<Keychain, String> {
    let config: DockerConfig =
        serde_json::from_slice(raw).map_err(|e| format!("invalid dockerconfigjson: {e}"))?;

    let mut keychain = Keychain::default();
    for (registry, entry) in config.auths {
        let auth = match (entry.username, entry.password, entry.auth) {
            (Some(user), Some(pass), _) => RegistryAuth::Basic(user, pass),
            (_, _, Some(encoded)) => {
                let decoded = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| format!("invalid auth for {registry}: {e}"))?;
                let decoded = String::from_utf8(decoded)
                    .map_err(|e| format!("invalid auth for {registry}: {e}"))?;
                let (user, pass) = decoded
                    .split_once(':')
                    .ok_or_else(|| format!("invalid auth for {registry}: expected user:password"))?;
                RegistryAuth::Basic(user.to_string(), pass.to_string())
            }
            _ => RegistryAuth::Anonymous,
        };
        keychain.insert(&registry, auth);
    }
    Ok(keychain)
}

/// Resolves registry credentials for a service account
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeychainFactory: Send + Sync {
    /// Credentials granted by `account`
    ///
    /// Failures are transient: the account or its secrets may not exist yet.
    async fn keychain_for(&self, account: &ServiceAccountRef) -> Result<Keychain>;
}

/// Reads `kubernetes.io/dockerconfigjson` image pull secrets of a service account
pub struct ServiceAccountKeychainFactory {
    client: Client,
}

impl ServiceAccountKeychainFactory {
    /// Create a factory reading through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeychainFactory for ServiceAccountKeychainFactory {
    async fn keychain_for(&self, account: &ServiceAccountRef) -> Result<Keychain> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), &account.namespace);
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &account.namespace);

        let sa = accounts
            .get_opt(&account.name)
            .await
            .map_err(|e| Error::credentials(account.to_string(), e.to_string()))?
            .ok_or_else(|| Error::credentials(account.to_string(), "service account not found"))?;

        let mut keychain = Keychain::default();
        for pull_secret in sa.image_pull_secrets.unwrap_or_default() {
            let name = pull_secret.name;
            let Some(secret) = secrets
                .get_opt(&name)
                .await
                .map_err(|e| Error::credentials(account.to_string(), e.to_string()))?
            else {
                return Err(Error::credentials(
                    account.to_string(),
                    format!("secret {name} not found"),
                ));
            };

            if secret.type_.as_deref() != Some(DOCKER_CONFIG_JSON_TYPE) {
                warn!(account = %account, secret = %name, "skipping pull secret of unsupported type");
                continue;
            }
            let Some(raw) = secret
                .data
                .as_ref()
                .and_then(|d| d.get(DOCKER_CONFIG_JSON_KEY))
            else {
                continue;
            };

            let parsed = parse_docker_config(&raw.0)
                .map_err(|msg| Error::credentials(account.to_string(), msg))?;
            keychain.merge(parsed);
        }

        debug!(account = %account, registries = keychain.len(), "resolved keychain");
        Ok(keychain)
    }
}
