//! Configuration for payload storage, sniffing and the type resource

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PloadError, Result};

/// Default minimum mmap growth block (16 MiB)
pub const DEFAULT_MMAP_MIN_BLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Default number of bytes buffered before content sniffing
pub const DEFAULT_MAGIC_MIN_SIZE: usize = 64;

/// Page size used when the system does not report one
pub const FALLBACK_PAGE_SIZE: usize = 4096;

const BUNDLED_TYPES: &str = include_str!("../resources/payload_types.toml");

/// Runtime parameters of the payload pipeline
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PloadConfig {
    /// Directory for temporary store files
    pub store_path: PathBuf,
    /// Minimum size of each mmap window
    pub mmap_min_block_size: usize,
    /// Bytes required before a magic sniff is attempted
    pub magic_min_size: usize,
    /// Sniffed types that never override a declared MIME type
    pub generic_mime_types: Vec<String>,
    /// Encodings that need no decoder
    pub noop_encodings: Vec<String>,
}

impl Default for PloadConfig {
    fn default() -> Self {
        Self {
            store_path: std::env::temp_dir(),
            mmap_min_block_size: DEFAULT_MMAP_MIN_BLOCK_SIZE,
            magic_min_size: DEFAULT_MAGIC_MIN_SIZE,
            generic_mime_types: vec![
                "binary".to_string(),
                "application/octet-stream".to_string(),
                "text/plain".to_string(),
            ],
            noop_encodings: vec!["7bit".to_string(), "8bit".to_string(), "binary".to_string()],
        }
    }
}

impl PloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document; missing keys keep their defaults
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the directory for store files
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Set the minimum mmap block size
    pub fn with_mmap_min_block_size(mut self, size: usize) -> Self {
        self.mmap_min_block_size = size;
        self
    }

    /// Set the sniffing threshold
    pub fn with_magic_min_size(mut self, size: usize) -> Self {
        self.magic_min_size = size;
        self
    }

    /// Replace the list of generic MIME types
    pub fn with_generic_mime_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generic_mime_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mmap_min_block_size == 0 {
            return Err(PloadError::invalid_parameter(
                "mmap_min_block_size",
                "Block size must be greater than 0",
            ));
        }

        if self.magic_min_size == 0 {
            return Err(PloadError::invalid_parameter(
                "magic_min_size",
                "Magic threshold must be greater than 0",
            ));
        }

        if self.store_path.as_os_str().is_empty() {
            return Err(PloadError::invalid_parameter(
                "store_path",
                "Store path cannot be empty",
            ));
        }

        Ok(())
    }

    /// Whether a sniffed MIME type is too generic to override a declared one
    pub fn is_generic_mime(&self, name: &str) -> bool {
        self.generic_mime_types.iter().any(|g| g == name)
    }

    /// Whether an encoding is a pass-through
    pub fn is_noop_encoding(&self, name: &str) -> bool {
        self.noop_encodings.iter().any(|e| e.eq_ignore_ascii_case(name))
    }
}

/// One `[[payload_types]]` entry
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub description: String,
    pub extension: String,
    pub class: String,
}

/// One `[[mime_types]]` entry
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct MimeDef {
    /// Registered payload type name
    pub name: String,
    pub mime: String,
}

/// Table of payload types and MIME mappings loaded at start
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TypesResource {
    pub payload_types: Vec<TypeDef>,
    pub mime_types: Vec<MimeDef>,
}

impl TypesResource {
    /// The resource shipped with the crate
    pub fn bundled() -> Result<Self> {
        Self::from_toml_str(BUNDLED_TYPES)
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|e| {
            PloadError::from_io(e, &format!("Failed to read resource {}", path.display()))
        })?;
        Self::from_toml_str(&input)
    }
}

/// System page size
pub fn page_size() -> usize {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as usize,
        _ => FALLBACK_PAGE_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PloadConfig::default();
        assert_eq!(config.mmap_min_block_size, 16 * 1024 * 1024);
        assert_eq!(config.magic_min_size, 64);
        assert!(config.is_generic_mime("application/octet-stream"));
        assert!(!config.is_generic_mime("image/gif"));
        assert!(config.is_noop_encoding("7BIT"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let config = PloadConfig::from_toml_str(
            "store_path = \"/var/tmp\"\nmmap_min_block_size = 65536\n",
        )
        .unwrap();
        assert_eq!(config.store_path, PathBuf::from("/var/tmp"));
        assert_eq!(config.mmap_min_block_size, 65536);
        assert_eq!(config.magic_min_size, 64);

        assert!(PloadConfig::from_toml_str("mmap_min_block_size = 0").is_err());
        assert!(PloadConfig::from_toml_str("magic_min_size = \"x\"").is_err());
    }

    #[test]
    fn test_bundled_resource() {
        let resource = TypesResource::bundled().unwrap();
        assert!(resource.payload_types.iter().any(|t| t.name == "gif"));
        assert!(resource
            .mime_types
            .iter()
            .any(|m| m.name == "gif" && m.mime == "image/gif"));
    }

    #[test]
    fn test_page_size() {
        let size = page_size();
        assert!(size.is_power_of_two());
    }
}
