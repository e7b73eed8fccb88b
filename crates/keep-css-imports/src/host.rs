use crate::output::absolute_path;
use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Options threaded through a resolution call. Re-entrancy is tracked with
/// explicit call-context state instead of a mutated shared flag.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    pub is_entry: bool,
    /// Ask the host to skip this plugin when re-dispatching.
    pub skip_self: bool,
    pub custom: ResolveCustom,
}

/// Plugin-specific call context carried alongside a resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveCustom {
    /// Set while this plugin is re-dispatching one of its own resolutions.
    pub resolving_styles: bool,
}

/// Resolution result, either from the host or claimed by this plugin.
#[derive(Debug, Clone, Default)]
pub struct ResolvedId {
    pub id: String,
    pub external: bool,
    pub meta: Option<StyleMeta>,
}

/// Metadata attached to an import claimed as an external placeholder.
#[derive(Debug, Clone)]
pub struct StyleMeta {
    /// Resolved source path behind the placeholder.
    pub source_id: PathBuf,
}

/// One unit of rendered bundler output.
#[derive(Debug, Clone, Default)]
pub struct RenderedChunk {
    pub file_name: String,
    /// Ids of the modules rendered into this chunk.
    pub modules: Vec<PathBuf>,
    pub imports: Vec<String>,
    /// Imported binding names keyed by import specifier.
    pub imported_bindings: FxHashMap<String, Vec<String>>,
}

/// Host output options in effect for the current write target.
#[derive(Debug, Clone, Default)]
pub struct BundleOutputOptions {
    pub dir: Option<PathBuf>,
    pub file: Option<PathBuf>,
    pub preserve_modules_root: Option<PathBuf>,
}

impl BundleOutputOptions {
    /// Absolute directory the bundle is written to.
    pub fn bundle_out_dir(&self) -> PathBuf {
        let dir = match (&self.dir, &self.file) {
            (Some(dir), _) => dir.clone(),
            (None, Some(file)) => file.parent().map(Path::to_path_buf).unwrap_or_default(),
            (None, None) => PathBuf::from("."),
        };
        absolute_path(&dir)
    }
}

/// Asset handed to the host's `emit_file` collaborator.
#[derive(Debug, Clone)]
pub struct EmittedAsset {
    /// Emission path relative to the bundle output directory, `/`-separated.
    pub file_name: String,
    pub source: String,
}

/// Host bundler surface the lifecycle hooks rely on.
#[async_trait]
pub trait BundlerContext: Send + Sync {
    /// Dispatch a specifier through the host's full resolution pipeline.
    async fn resolve(
        &self,
        source: &str,
        importer: &Path,
        options: ResolveOptions,
    ) -> Option<ResolvedId>;

    fn add_watch_file(&self, path: &Path);

    fn watched_files(&self) -> Vec<PathBuf>;

    fn watch_mode(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_out_dir_prefers_dir_over_file() {
        let options = BundleOutputOptions {
            dir: Some(PathBuf::from("/project/dist")),
            file: Some(PathBuf::from("/project/other/bundle.js")),
            preserve_modules_root: None,
        };
        assert_eq!(options.bundle_out_dir(), PathBuf::from("/project/dist"));
    }

    #[test]
    fn test_bundle_out_dir_falls_back_to_file_parent() {
        let options = BundleOutputOptions {
            dir: None,
            file: Some(PathBuf::from("/project/dist/bundle.js")),
            preserve_modules_root: None,
        };
        assert_eq!(options.bundle_out_dir(), PathBuf::from("/project/dist"));
    }

    #[test]
    fn test_bundle_out_dir_is_absolute() {
        let options = BundleOutputOptions {
            dir: Some(PathBuf::from("dist")),
            file: None,
            preserve_modules_root: None,
        };
        assert!(options.bundle_out_dir().is_absolute());
    }
}
