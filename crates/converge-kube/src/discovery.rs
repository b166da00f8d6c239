//! API discovery with an on-disk cache
//!
//! Discovery answers "which REST resource serves this kind". Responses are
//! cached twice per server host, the way kubectl lays them out:
//!
//! - raw responses under `<cache>/.kube/http-cache/<host>/`
//!   (`servergroups.json`, `<group-version>/serverresources.json`)
//! - the derived mapping table under
//!   `<cache>/.kube/cache/discovery/<host>/mappings.json`
//!
//! Cache entries expire after a TTL (10 minutes by default). A kind that is
//! missing from a table loaded from disk triggers one rebuild from the server
//! before the lookup fails, so freshly installed CRDs are picked up.
//!
//! A group version whose resource list cannot be fetched is left out of the
//! table, but the table remembers it: lookups in that group version refetch
//! and surface the server error instead of "not served", and an incomplete
//! table is never written to disk.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, APIResourceList, GroupVersionForDiscovery,
};
use kube::Client;
use kube::discovery::ApiResource;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;

use crate::error::{KubeError, Result};

/// Default lifetime of cached discovery data
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

const SERVER_GROUPS_FILE: &str = "servergroups.json";
const SERVER_RESOURCES_FILE: &str = "serverresources.json";
const MAPPINGS_FILE: &str = "mappings.json";

static UNSAFE_HOST_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^(\w/.)]").expect("valid regex"));

/// Turn a server URL into a directory name.
///
/// `https://api.lab-1.example.com:6443` becomes `api.lab_1.example.com_6443`.
pub fn sanitize_host(server: &str) -> String {
    let host = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    UNSAFE_HOST_CHARS.replace_all(host, "_").into_owned()
}

/// How one kind is served by the API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestMapping {
    pub group: String,
    pub version: String,
    pub kind: String,
    /// Plural resource name used in URLs
    pub resource: String,
    pub singular: String,
    pub namespaced: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub short_names: Vec<String>,
}

impl RestMapping {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Dynamic API descriptor for `kube::Api`
    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.clone(),
            version: self.version.clone(),
            api_version: self.api_version(),
            kind: self.kind.clone(),
            plural: self.resource.clone(),
        }
    }

    fn in_group_version(&self, api_version: &str) -> bool {
        api_version.is_empty() || self.api_version() == api_version
    }

    /// Kind, plural, singular or short name, ignoring case
    fn answers_to(&self, token: &str) -> bool {
        self.kind.eq_ignore_ascii_case(token)
            || self.resource.eq_ignore_ascii_case(token)
            || self.singular.eq_ignore_ascii_case(token)
            || self.short_names.iter().any(|s| s.eq_ignore_ascii_case(token))
    }

    fn from_resource_list(list: &APIResourceList) -> Vec<RestMapping> {
        let (list_group, list_version) = match list.group_version.rsplit_once('/') {
            Some((group, version)) => (group, version),
            None => ("", list.group_version.as_str()),
        };

        list.resources
            .iter()
            // sub-resources such as pods/log
            .filter(|r| !r.name.contains('/'))
            .map(|r| RestMapping {
                group: r.group.clone().unwrap_or_else(|| list_group.to_string()),
                version: r.version.clone().unwrap_or_else(|| list_version.to_string()),
                kind: r.kind.clone(),
                resource: r.name.clone(),
                singular: if r.singular_name.is_empty() {
                    r.kind.to_lowercase()
                } else {
                    r.singular_name.clone()
                },
                namespaced: r.namespaced,
                short_names: r.short_names.clone().unwrap_or_default(),
            })
            .collect()
    }
}

/// Where discovery documents come from
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Server URL the documents describe
    fn host(&self) -> &str;

    /// All API groups, the legacy core group included under the name ""
    async fn server_groups(&self) -> Result<APIGroupList>;

    /// Resources served under one group version
    async fn server_resources(&self, group_version: &str) -> Result<APIResourceList>;
}

/// Discovery against a live API server
#[derive(Clone)]
pub struct ClientDiscovery {
    client: Client,
    host: String,
}

impl ClientDiscovery {
    pub fn new(client: Client, host: impl Into<String>) -> Self {
        Self {
            client,
            host: host.into(),
        }
    }
}

#[async_trait]
impl DiscoverySource for ClientDiscovery {
    fn host(&self) -> &str {
        &self.host
    }

    async fn server_groups(&self) -> Result<APIGroupList> {
        let core = self.client.list_core_api_versions().await?;
        let mut groups = self.client.list_api_groups().await?;

        let legacy = APIGroup {
            name: String::new(),
            versions: core
                .versions
                .iter()
                .map(|v| GroupVersionForDiscovery {
                    group_version: v.clone(),
                    version: v.clone(),
                })
                .collect(),
            ..Default::default()
        };
        groups.groups.insert(0, legacy);
        Ok(groups)
    }

    async fn server_resources(&self, group_version: &str) -> Result<APIResourceList> {
        let list = if group_version.contains('/') {
            self.client.list_api_group_resources(group_version).await?
        } else {
            self.client.list_core_api_resources(group_version).await?
        };
        Ok(list)
    }
}

struct MappingTable {
    mappings: Vec<RestMapping>,
    loaded_at: Instant,
    from_disk: bool,
    /// Group versions whose resources could not be listed
    failed: Vec<String>,
}

impl MappingTable {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }

    /// Whether a miss in `api_version` may be caused by a failed listing
    fn may_be_missing(&self, api_version: &str) -> bool {
        self.failed
            .iter()
            .any(|gv| api_version.is_empty() || gv == api_version)
    }

    fn find<F: Fn(&RestMapping) -> bool>(&self, matches: F) -> Option<&RestMapping> {
        self.mappings.iter().find(|m| matches(m))
    }
}

/// A freshly built table with the errors of the group versions it lacks
struct Loaded {
    table: MappingTable,
    failures: Vec<(String, KubeError)>,
}

/// Error of the first failed group version `api_version` may live in
fn failure_for(failures: Vec<(String, KubeError)>, api_version: &str) -> Option<KubeError> {
    failures
        .into_iter()
        .find(|(gv, _)| api_version.is_empty() || gv == api_version)
        .map(|(gv, err)| err.context("discover", gv))
}

/// Discovery results cached in memory and, when a directory is set, on disk
pub struct DiscoveryCache {
    source: Arc<dyn DiscoverySource>,
    http_dir: Option<PathBuf>,
    mappings_file: Option<PathBuf>,
    ttl: Duration,
    table: RwLock<Option<MappingTable>>,
}

impl DiscoveryCache {
    /// Cache for `source`; without `cache_dir` nothing is written to disk
    pub fn new(source: Arc<dyn DiscoverySource>, cache_dir: Option<&Path>) -> Self {
        let host = sanitize_host(source.host());
        let http_dir = cache_dir.map(|dir| dir.join(".kube").join("http-cache").join(&host));
        let mappings_file = cache_dir.map(|dir| {
            dir.join(".kube")
                .join("cache")
                .join("discovery")
                .join(&host)
                .join(MAPPINGS_FILE)
        });

        Self {
            source,
            http_dir,
            mappings_file,
            ttl: DEFAULT_TTL,
            table: RwLock::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn host(&self) -> &str {
        self.source.host()
    }

    /// Mapping for an exact apiVersion + Kind
    pub async fn lookup(&self, api_version: &str, kind: &str) -> Result<RestMapping> {
        self.resolve(api_version, kind, |m| {
            m.in_group_version(api_version) && m.kind == kind
        })
        .await
    }

    /// Mapping for a kind, plural, singular or short name within a group version
    pub async fn lookup_token(&self, api_version: &str, token: &str) -> Result<RestMapping> {
        self.resolve(api_version, token, |m| {
            m.in_group_version(api_version) && m.answers_to(token)
        })
        .await
    }

    /// Snapshot of the whole table
    pub async fn mappings(&self) -> Result<Vec<RestMapping>> {
        {
            let guard = self.table.read().await;
            if let Some(table) = guard.as_ref().filter(|t| t.is_fresh(self.ttl)) {
                return Ok(table.mappings.clone());
            }
        }
        let mut guard = self.table.write().await;
        if guard.as_ref().is_none_or(|t| !t.is_fresh(self.ttl)) {
            *guard = Some(self.load(false).await?.table);
        }
        Ok(guard
            .as_ref()
            .map(|t| t.mappings.clone())
            .unwrap_or_default())
    }

    /// Drop every cached entry and rebuild from the server
    pub async fn refresh(&self) -> Result<()> {
        let loaded = self.load(true).await?;
        *self.table.write().await = Some(loaded.table);
        Ok(())
    }

    async fn resolve<F>(&self, api_version: &str, what: &str, matches: F) -> Result<RestMapping>
    where
        F: Fn(&RestMapping) -> bool,
    {
        {
            let guard = self.table.read().await;
            if let Some(table) = guard.as_ref().filter(|t| t.is_fresh(self.ttl)) {
                if let Some(found) = table.find(&matches) {
                    return Ok(found.clone());
                }
                if !table.from_disk && !table.may_be_missing(api_version) {
                    return Err(no_match(api_version, what, "not served by the API"));
                }
            }
        }

        let mut guard = self.table.write().await;
        // set once this call has asked the server
        let mut failures = None;
        if guard.as_ref().is_none_or(|t| !t.is_fresh(self.ttl)) {
            let loaded = self.load(false).await?;
            if !loaded.table.from_disk {
                failures = Some(loaded.failures);
            }
            *guard = Some(loaded.table);
        }

        // a table read from disk may predate a CRD; a partial one may have
        // dropped the group version asked for
        let retry = failures.is_none()
            && guard.as_ref().is_some_and(|t| {
                t.find(&matches).is_none() && (t.from_disk || t.may_be_missing(api_version))
            });
        if retry {
            tracing::debug!(
                api_version,
                kind = what,
                "kind missing from cached discovery, refreshing"
            );
            let loaded = self.load(true).await?;
            failures = Some(loaded.failures);
            *guard = Some(loaded.table);
        }

        if let Some(found) = guard.as_ref().and_then(|t| t.find(&matches)) {
            return Ok(found.clone());
        }
        match failures.and_then(|f| failure_for(f, api_version)) {
            Some(err) => Err(err),
            None => Err(no_match(api_version, what, "not served by the API")),
        }
    }

    /// Build a table, from the mappings file when allowed and fresh
    async fn load(&self, bypass_disk: bool) -> Result<Loaded> {
        if !bypass_disk {
            if let Some(path) = &self.mappings_file {
                if let Some((mappings, age)) = read_fresh::<Vec<RestMapping>>(path, self.ttl).await {
                    tracing::debug!(path = %path.display(), count = mappings.len(), "discovery loaded from disk");
                    return Ok(Loaded {
                        table: MappingTable {
                            mappings,
                            loaded_at: Instant::now().checked_sub(age).unwrap_or_else(Instant::now),
                            from_disk: true,
                            failed: Vec::new(),
                        },
                        failures: Vec::new(),
                    });
                }
            }
        }

        let (mappings, failures) = self.fetch(bypass_disk).await?;
        if let Some(path) = &self.mappings_file {
            if failures.is_empty() {
                write_cache(path, &mappings).await;
            }
        }
        tracing::debug!(
            host = self.source.host(),
            count = mappings.len(),
            failed = failures.len(),
            "discovery fetched"
        );

        Ok(Loaded {
            table: MappingTable {
                mappings,
                loaded_at: Instant::now(),
                from_disk: false,
                failed: failures.iter().map(|(gv, _)| gv.clone()).collect(),
            },
            failures,
        })
    }

    /// Mappings of every group version that could be listed, plus the errors
    /// of those that could not
    async fn fetch(&self, bypass_disk: bool) -> Result<(Vec<RestMapping>, Vec<(String, KubeError)>)> {
        let groups_path = self.http_dir.as_ref().map(|d| d.join(SERVER_GROUPS_FILE));
        let groups = match self.cached_raw::<APIGroupList>(groups_path.as_deref(), bypass_disk).await {
            Some(groups) => groups,
            None => {
                let groups = self.source.server_groups().await?;
                if let Some(path) = &groups_path {
                    write_cache(path, &groups).await;
                }
                groups
            }
        };

        let mut mappings = Vec::new();
        let mut failures = Vec::new();
        for group_version in groups
            .groups
            .iter()
            .flat_map(|g| g.versions.iter().map(|v| v.group_version.as_str()))
        {
            let path = self
                .http_dir
                .as_ref()
                .map(|d| d.join(group_version).join(SERVER_RESOURCES_FILE));

            let list = match self.cached_raw::<APIResourceList>(path.as_deref(), bypass_disk).await {
                Some(list) => list,
                None => match self.source.server_resources(group_version).await {
                    Ok(list) => {
                        if let Some(path) = &path {
                            write_cache(path, &list).await;
                        }
                        list
                    }
                    Err(e) => {
                        // an unavailable aggregated API must not hide the rest
                        tracing::warn!(group_version, error = %e, "failed to list group version");
                        failures.push((group_version.to_string(), e));
                        continue;
                    }
                },
            };
            mappings.extend(RestMapping::from_resource_list(&list));
        }

        Ok((mappings, failures))
    }

    async fn cached_raw<T: DeserializeOwned>(&self, path: Option<&Path>, bypass_disk: bool) -> Option<T> {
        if bypass_disk {
            return None;
        }
        read_fresh(path?, self.ttl).await.map(|(value, _)| value)
    }
}

fn no_match(api_version: &str, kind: &str, message: &str) -> KubeError {
    KubeError::Discovery {
        group_version: api_version.to_string(),
        kind: kind.to_string(),
        message: message.to_string(),
    }
}

/// Read a cache file younger than `ttl`, with its age
async fn read_fresh<T: DeserializeOwned>(path: &Path, ttl: Duration) -> Option<(T, Duration)> {
    let metadata = tokio::fs::metadata(path).await.ok()?;
    let modified = metadata.modified().ok()?;
    let age = SystemTime::now().duration_since(modified).unwrap_or_default();
    if age >= ttl {
        return None;
    }

    let bytes = tokio::fs::read(path).await.ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some((value, age)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt discovery cache file");
            None
        }
    }
}

/// Write through a temporary file so concurrent readers never see a partial file
async fn write_cache<T: Serialize>(path: &Path, value: &T) {
    if let Err(e) = try_write_cache(path, value).await {
        tracing::warn!(path = %path.display(), error = %e, "failed to write discovery cache");
    }
}

async fn try_write_cache<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Resolves kinds and short names through a [`DiscoveryCache`]
#[derive(Clone)]
pub struct RestMapper {
    cache: Arc<DiscoveryCache>,
}

impl RestMapper {
    pub fn new(cache: Arc<DiscoveryCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }

    /// Mapping for an exact apiVersion + Kind
    pub async fn mapping_for(&self, api_version: &str, kind: &str) -> Result<RestMapping> {
        self.cache.lookup(api_version, kind).await
    }

    /// Mapping for a Kind, plural, singular or short name
    pub async fn resolve(&self, api_version: &str, token: &str) -> Result<RestMapping> {
        self.cache.lookup_token(api_version, token).await
    }

    /// Expand a short name (`cd`) to its plural resource (`clusterdeployments`).
    ///
    /// Tokens that are not a known short name are returned unchanged.
    pub async fn expand_shortcut(&self, token: &str) -> Result<String> {
        let mappings = self.cache.mappings().await?;
        Ok(mappings
            .iter()
            .find(|m| m.short_names.iter().any(|s| s.eq_ignore_ascii_case(token)))
            .map(|m| m.resource.clone())
            .unwrap_or_else(|| token.to_string()))
    }
}
