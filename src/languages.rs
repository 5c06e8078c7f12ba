//! Runtime table for the supported languages
//!
//! Loaded once at startup from TOML (embedded `files/languages.toml` unless a
//! path is configured) and read-only afterwards.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::command::CommandTemplate;
use crate::error::RegistryError;

/// Configuration for a supported language runtime
#[derive(Debug, Clone)]
pub struct RuntimeDescriptor {
    /// Canonical language name (e.g., "python")
    pub language: String,
    pub version: String,
    pub aliases: Vec<String>,
    /// Execution image reference
    pub image: String,
    /// Source file extension including the dot (e.g., ".py")
    pub extension: String,
    /// Compile and run are chained in one container
    pub compiled: bool,
    /// Entry symbol (class name) must be extracted from the source
    pub class_based: bool,
    pub compile_command: Option<CommandTemplate>,
    pub run_command: CommandTemplate,
    /// Alternate engine name when it differs from the language (e.g., "node")
    pub runtime: Option<String>,
}

impl RuntimeDescriptor {
    /// Whether `name` is this runtime's language or one of its aliases
    pub fn matches(&self, name: &str) -> bool {
        self.language.eq_ignore_ascii_case(name)
            || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    /// File name used for an unnamed source file
    pub fn default_file_name(&self) -> String {
        let stem = if self.class_based { "Main" } else { "main" };
        format!("{}{}", stem, self.extension)
    }
}

/// Raw TOML configuration for a language
#[derive(Debug, Deserialize)]
struct RawRuntime {
    version: String,
    #[serde(default)]
    aliases: Vec<String>,
    image: String,
    extension: String,
    #[serde(default)]
    compiled: bool,
    #[serde(default)]
    class_based: bool,
    compile_command: Option<CommandTemplate>,
    run_command: CommandTemplate,
    runtime: Option<String>,
}

/// All runtimes known to the service
#[derive(Debug, Clone, Default)]
pub struct RuntimeRegistry {
    runtimes: Vec<RuntimeDescriptor>,
}

impl RuntimeRegistry {
    /// Load the runtime table shipped with the binary
    pub fn embedded() -> Result<Self, RegistryError> {
        let content = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/languages.toml"));
        Self::from_toml_str(content)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, RegistryError> {
        let raw_runtimes: BTreeMap<String, RawRuntime> = toml::from_str(content)?;

        let mut runtimes = Vec::with_capacity(raw_runtimes.len());
        for (name, raw) in raw_runtimes {
            let descriptor = RuntimeDescriptor {
                language: name.to_lowercase(),
                version: raw.version,
                aliases: raw.aliases.iter().map(|a| a.to_lowercase()).collect(),
                image: raw.image,
                extension: raw.extension,
                compiled: raw.compiled,
                class_based: raw.class_based,
                compile_command: raw.compile_command,
                run_command: raw.run_command,
                runtime: raw.runtime,
            };
            validate(&descriptor)?;
            runtimes.push(descriptor);
        }

        Ok(Self { runtimes })
    }

    /// Get a runtime by language name or alias (case-insensitive)
    pub fn lookup(&self, language: &str) -> Option<&RuntimeDescriptor> {
        self.runtimes.iter().find(|rt| rt.matches(language))
    }

    pub fn all(&self) -> &[RuntimeDescriptor] {
        &self.runtimes
    }
}

fn validate(descriptor: &RuntimeDescriptor) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::Invalid {
        language: descriptor.language.clone(),
        reason: reason.to_string(),
    };

    if descriptor.run_command.is_empty() {
        return Err(invalid("run_command is empty"));
    }
    if descriptor.compiled
        && descriptor
            .compile_command
            .as_ref()
            .map_or(true, |cmd| cmd.is_empty())
    {
        return Err(invalid("compiled runtime requires a non-empty compile_command"));
    }
    if !descriptor.extension.starts_with('.') {
        return Err(invalid("extension must start with '.'"));
    }
    Ok(())
}
