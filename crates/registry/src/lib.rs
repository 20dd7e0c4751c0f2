// Copyright 2026 RCE project contributors.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Static mapping from language identifier to sandbox configuration.
//!
//! The registry is built once at process start (see [`LanguageRegistry::with_defaults`])
//! and never mutated afterward: lookups are plain map reads, no locking required.

use std::collections::BTreeMap;
use std::time::Duration;

/// Static configuration for one registered language.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LanguageSpec {
    /// Sandbox image reference, e.g. `python:3.11-slim`.
    pub image: String,
    /// File suffix used when materializing code, including the leading dot.
    pub extension: String,
    /// argv\[0\] inside the sandbox.
    pub executor: String,
    /// Wall-clock cap for execution of this language.
    pub timeout: Duration,
}

impl LanguageSpec {
    fn new(image: &str, extension: &str, executor: &str, timeout: Duration) -> Self {
        Self {
            image: image.to_string(),
            extension: extension.to_string(),
            executor: executor.to_string(),
            timeout,
        }
    }
}

/// Read-only mapping from language identifier to [`LanguageSpec`].
#[derive(Clone, Debug, Default)]
pub struct LanguageRegistry {
    languages: BTreeMap<String, LanguageSpec>,
}

impl LanguageRegistry {
    /// An empty registry, useful for tests that want full control over what's registered.
    pub fn empty() -> Self {
        Self {
            languages: BTreeMap::new(),
        }
    }

    /// The registry used in production: the fixed set of interpreted languages this system
    /// supports. Compiled languages are intentionally excluded, since a compile step inside
    /// the sandbox would need a persistent build cache, which is a documented Non-goal.
    pub fn with_defaults() -> Self {
        let mut languages = BTreeMap::new();
        languages.insert(
            "python".to_string(),
            LanguageSpec::new("python:3.11-slim", ".py", "python3", Duration::from_secs(10)),
        );
        languages.insert(
            "javascript".to_string(),
            LanguageSpec::new("node:20-slim", ".js", "node", Duration::from_secs(10)),
        );
        languages.insert(
            "bash".to_string(),
            LanguageSpec::new("bash:5", ".sh", "bash", Duration::from_secs(10)),
        );
        Self { languages }
    }

    /// Register or override a language. Only used to build custom registries in tests;
    /// the production registry is sealed after [`LanguageRegistry::with_defaults`] returns.
    pub fn register(&mut self, language: impl Into<String>, spec: LanguageSpec) {
        self.languages.insert(language.into(), spec);
    }

    /// Look up a language identifier. `None` means the language is not registered.
    pub fn lookup(&self, language: &str) -> Option<&LanguageSpec> {
        let spec = self.languages.get(language);
        if spec.is_none() {
            log::debug!("language lookup miss for `{language}`");
        }
        spec
    }

    /// The set of currently registered language identifiers, for startup logging.
    pub fn supported(&self) -> Vec<&str> {
        self.languages.keys().map(String::as_str).collect()
    }
}
