//! Configuration system
//!
//! File-backed settings for the batching layer. The instancing policy decides
//! which batch groups are worth drawing with hardware instancing and how large
//! the shared instancing buffer starts out.

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        Self::from_str_with_format(&contents, path)
    }

    /// Parse configuration text, picking the format from the file extension of `path`
    fn from_str_with_format(contents: &str, path: &str) -> Result<Self, ConfigError> {
        if path.ends_with(".toml") {
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its accepted range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Instancing policy shared by every batch queue of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancingConfig {
    /// Minimum number of instances before a group is drawn instanced
    pub min_instance_group_size: usize,
    /// Largest triangle count of a geometry that is still worth instancing
    pub max_instance_triangles: u32,
    /// Initial capacity of the shared instancing buffer, in instances
    pub instancing_buffer_size: usize,
}

impl InstancingConfig {
    /// Create a configuration with explicit thresholds
    pub const fn new(min_instance_group_size: usize, max_instance_triangles: u32) -> Self {
        Self {
            min_instance_group_size,
            max_instance_triangles,
            instancing_buffer_size: DEFAULT_INSTANCING_BUFFER_SIZE,
        }
    }

    /// Set the initial instancing buffer capacity
    pub const fn with_buffer_size(mut self, instancing_buffer_size: usize) -> Self {
        self.instancing_buffer_size = instancing_buffer_size;
        self
    }

    /// Largest index count of a geometry that may be instanced
    pub const fn max_instance_index_count(&self) -> u32 {
        self.max_instance_triangles.saturating_mul(3)
    }

    /// Whether a group of `instance_count` instances of a geometry with
    /// `index_count` indices is drawn with hardware instancing
    pub const fn allows_instancing(&self, instance_count: usize, index_count: u32) -> bool {
        instance_count >= self.min_instance_group_size
            && index_count <= self.max_instance_index_count()
    }

    /// Reject settings that can never produce an instanced draw
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_instance_group_size == 0 {
            return Err(ConfigError::Invalid {
                field: "min_instance_group_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.instancing_buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "instancing_buffer_size",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Default capacity of the shared instancing buffer
pub const DEFAULT_INSTANCING_BUFFER_SIZE: usize = 1024;

impl Default for InstancingConfig {
    fn default() -> Self {
        Self {
            min_instance_group_size: 4,
            max_instance_triangles: 500,
            instancing_buffer_size: DEFAULT_INSTANCING_BUFFER_SIZE,
        }
    }
}

impl Config for InstancingConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = InstancingConfig::default();
        assert_eq!(config.min_instance_group_size, 4);
        assert_eq!(config.max_instance_index_count(), 1500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_allows_instancing_checks_both_thresholds() {
        let config = InstancingConfig::new(2, 10);
        assert!(config.allows_instancing(2, 30));
        assert!(!config.allows_instancing(1, 30));
        assert!(!config.allows_instancing(5, 31));
    }

    #[test]
    fn test_toml_with_missing_fields_uses_defaults() {
        let config = InstancingConfig::from_str_with_format(
            "min_instance_group_size = 8\n",
            "instancing.toml",
        )
        .unwrap();
        assert_eq!(config.min_instance_group_size, 8);
        assert_eq!(config.max_instance_triangles, 500);
    }

    #[test]
    fn test_ron_parsing() {
        let config = InstancingConfig::from_str_with_format(
            "(min_instance_group_size: 3, max_instance_triangles: 100, instancing_buffer_size: 64)",
            "instancing.ron",
        )
        .unwrap();
        assert_eq!(config, InstancingConfig::new(3, 100).with_buffer_size(64));
    }

    #[test]
    fn test_saved_file_loads_back() {
        let config = InstancingConfig::new(6, 250).with_buffer_size(2048);
        for extension in ["toml", "ron"] {
            let name = format!("render_batch_instancing_{}.{}", std::process::id(), extension);
            let path = std::env::temp_dir().join(name).to_string_lossy().into_owned();
            config.save_to_file(&path).unwrap();
            let loaded = InstancingConfig::load_from_file(&path).unwrap();
            std::fs::remove_file(&path).unwrap();
            assert_eq!(loaded, config);
        }
    }

    #[test]
    fn test_save_rejects_unknown_extension() {
        let err = InstancingConfig::default().save_to_file("instancing.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_unsupported_format() {
        let err = InstancingConfig::from_str_with_format("", "instancing.json").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_zero_group_size_is_invalid() {
        let config = InstancingConfig::new(0, 100);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "min_instance_group_size", .. })
        ));
    }
}
