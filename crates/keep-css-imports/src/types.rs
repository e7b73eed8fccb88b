use crate::compiler::{CompileError, PostProcessor, StyleCompiler};
use crate::output::OutputError;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Plugin identifier, used in error messages and host-facing metadata.
pub const PLUGIN_NAME: &str = "keep-css-imports";

/// Prefix some Sass compilers attach to entries in a source map's `sources`.
pub const FILE_URL_PREFIX: &str = "file://";

/// Where a style asset is written, relative to the bundle output directory.
#[derive(Clone, Default)]
pub enum OutputPathStrategy {
    /// Mirror the asset's path relative to the module root.
    #[default]
    Keep,
    /// Drop every asset into a fixed directory, losing its original sub-path.
    Fixed(String),
    /// Caller-supplied mapping from the asset's source path to an absolute
    /// output path. The result is trusted but must still lie inside the
    /// bundle output directory.
    Custom(Arc<dyn Fn(&Path) -> PathBuf + Send + Sync>),
}

impl fmt::Debug for OutputPathStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keep => f.write_str("Keep"),
            Self::Fixed(dir) => f.debug_tuple("Fixed").field(dir).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Whether to drop the leading `./` from rewritten import specifiers.
///
/// The pattern of [`SkipCurrentFolderPart::Matching`] is tested against the
/// computed relative path before the prefix decision, never against the
/// prefixed result.
#[derive(Debug, Clone, Default)]
pub enum SkipCurrentFolderPart {
    /// Always prefix bare relative specifiers with `./`.
    #[default]
    Never,
    /// Never add the prefix.
    Always,
    /// Suppress the prefix for specifiers matching the pattern.
    Matching(Regex),
}

/// Source-map output requested for emitted CSS assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceMapOption {
    #[default]
    Disabled,
    /// Emit a sibling `.map` asset and reference it from the CSS.
    External,
    /// Append the map as a base64 data-URI comment.
    Inline,
}

impl SourceMapOption {
    pub fn is_requested(self) -> bool {
        self != Self::Disabled
    }
}

/// Configuration surface of the plugin.
#[derive(Clone)]
pub struct PluginOptions {
    /// Extension given to compiled Sass output, `".css"` by default.
    pub output_ext: String,

    pub output_path: OutputPathStrategy,

    /// Sub-directory of the bundle output directory assets are placed under.
    pub output_dir: PathBuf,

    /// Sass load paths. The current directory is always appended.
    pub include_paths: Vec<PathBuf>,

    /// Import specifiers intercepted by the plugin.
    pub include_regexp: Regex,

    pub source_map: SourceMapOption,

    pub skip_current_folder_part: SkipCurrentFolderPart,

    /// Optional hook run over every compiled stylesheet.
    pub post_processor: Option<Arc<PostProcessor>>,

    /// Passthrough options handed to the style compiler.
    pub sass_options: serde_json::Map<String, serde_json::Value>,

    /// Compiler override; the built-in grass compiler is used when unset.
    pub compiler: Option<Arc<dyn StyleCompiler>>,
}

impl Default for PluginOptions {
    fn default() -> Self {
        Self {
            output_ext: ".css".to_string(),
            output_path: OutputPathStrategy::default(),
            output_dir: PathBuf::from("."),
            include_paths: vec![PathBuf::from("node_modules/")],
            include_regexp: default_include_regexp(),
            source_map: SourceMapOption::default(),
            skip_current_folder_part: SkipCurrentFolderPart::default(),
            post_processor: None,
            sass_options: serde_json::Map::new(),
            compiler: None,
        }
    }
}

fn default_include_regexp() -> Regex {
    Regex::new(r"\.(?:s[ca]|c)ss$").unwrap()
}

/// Error surfaced to the host, identifying the plugin as the source.
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("[keep-css-imports] {0}")]
    Compile(#[from] CompileError),

    #[error("[keep-css-imports] {0}")]
    Output(#[from] OutputError),

    #[error("[keep-css-imports] IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_include_regexp_matches_style_extensions() {
        let options = PluginOptions::default();
        assert!(options.include_regexp.is_match("./sample.css"));
        assert!(options.include_regexp.is_match("./sample.scss"));
        assert!(options.include_regexp.is_match("theme/sample.sass"));
        assert!(!options.include_regexp.is_match("./sample.js"));
        assert!(!options.include_regexp.is_match("./sample.css.js"));
    }

    #[test]
    fn test_error_messages_carry_plugin_prefix() {
        let error = PluginError::from(OutputError::ConflictingOutput("out/a.css".to_string()));
        assert!(error.to_string().starts_with("[keep-css-imports] "));
    }
}
