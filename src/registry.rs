use crate::config::{AppConfig, ProfileConfig};
use crate::error::ConfigError;
use crate::pipeline::extract::ExtractionPlan;
use crate::pipeline::fetch::FetchLimits;
use crate::pipeline::follow::FollowPlan;
use crate::pipeline::schema::Schema;
use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// A profile with every selector, pattern and default compiled
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub description: String,
    pub source: Option<String>,
    pub plan: ExtractionPlan,
    pub follow: Option<FollowPlan>,
    pub schema: Schema,
}

/// Listing entry for `GET /profiles` and the `profiles` command
#[derive(Debug, Clone, Serialize)]
pub struct ProfileSummary {
    pub name: String,
    pub description: String,
    pub source: Option<String>,
    pub follows_links: bool,
    pub fields: Vec<String>,
}

impl Profile {
    pub fn compile(config: &ProfileConfig) -> Result<Self, ConfigError> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(ConfigError::Setting("profile name must not be empty".to_string()));
        }
        let plan = ExtractionPlan::compile(
            name,
            &config.record,
            config.text_matches.as_deref(),
            &config.fields,
        )?;
        let schema = Schema::compile(name, &config.schema)?;
        if schema.is_empty() {
            return Err(ConfigError::Profile {
                profile: name.to_string(),
                message: "schema declares no fields".to_string(),
            });
        }

        let extracted: Vec<&str> = plan.field_names().collect();
        for field in schema.names() {
            if !extracted.contains(&field) {
                return Err(ConfigError::Profile {
                    profile: name.to_string(),
                    message: format!("schema field '{}' has no extraction rule", field),
                });
            }
        }
        for field in &extracted {
            if schema.field(field).is_none() {
                warn!("registry: profile={} field '{}' is extracted but not in the schema", name, field);
            }
        }

        Ok(Self {
            name: name.to_string(),
            description: config.description.clone(),
            source: config.source.clone(),
            plan,
            follow: config.follow.as_ref().map(|f| f.compile(name)).transpose()?,
            schema,
        })
    }

    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            source: self.source.clone(),
            follows_links: self.follow.is_some(),
            fields: self.schema.names().map(|n| n.to_string()).collect(),
        }
    }
}

/// All compiled profiles plus the fetch limits they run under. Never mutated.
#[derive(Debug)]
pub struct ProfileRegistry {
    profiles: IndexMap<String, Profile>,
    limits: FetchLimits,
}

impl ProfileRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let limits = FetchLimits::from_config(&config.fetch)?;
        let mut profiles = IndexMap::with_capacity(config.profiles.len());
        for profile_config in &config.profiles {
            let profile = Profile::compile(profile_config)?;
            if profiles.contains_key(&profile.name) {
                return Err(ConfigError::DuplicateProfile(profile.name));
            }
            profiles.insert(profile.name.clone(), profile);
        }
        Ok(Self { profiles, limits })
    }

    pub fn get(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn limits(&self) -> &FetchLimits {
        &self.limits
    }
}

/// Shared, atomically swappable registry.
///
/// Readers take an `Arc` snapshot and keep it for a whole invocation, so a
/// reload never changes the profile a running harvest sees.
#[derive(Debug)]
pub struct RegistryHandle {
    path: Option<PathBuf>,
    current: RwLock<Arc<ProfileRegistry>>,
}

impl RegistryHandle {
    pub fn new(registry: ProfileRegistry, path: Option<PathBuf>) -> Self {
        Self {
            path,
            current: RwLock::new(Arc::new(registry)),
        }
    }

    /// Load and compile a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = AppConfig::load(path)?;
        let registry = ProfileRegistry::from_config(&config)?;
        Ok(Self::new(registry, Some(path.to_path_buf())))
    }

    pub fn snapshot(&self) -> Arc<ProfileRegistry> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Re-read the config file the handle was loaded from. The current
    /// registry stays in place unless the new one compiles.
    pub fn reload(&self) -> Result<Arc<ProfileRegistry>, ConfigError> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| ConfigError::Setting("registry was not loaded from a file".to_string()))?;
        let result = AppConfig::load(path).and_then(|config| ProfileRegistry::from_config(&config));
        crate::metrics::registry::reloaded(result.is_ok());
        match result {
            Ok(registry) => {
                info!(
                    "registry: reloaded {} profile(s) from {}",
                    registry.len(),
                    path.display()
                );
                Ok(self.replace(registry))
            }
            Err(e) => {
                warn!("registry: reload of {} failed, keeping current profiles: {}", path.display(), e);
                Err(e)
            }
        }
    }

    pub fn replace(&self, registry: ProfileRegistry) -> Arc<ProfileRegistry> {
        let fresh = Arc::new(registry);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&fresh);
        fresh
    }
}
