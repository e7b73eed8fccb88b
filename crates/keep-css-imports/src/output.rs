use crate::host::EmittedAsset;
use crate::registry::StyleRegistry;
use crate::types::{OutputPathStrategy, SkipCurrentFolderPart, SourceMapOption};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rustc_hash::FxHashSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Error types for output-path resolution and emission.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("output path {path} must be in output directory {out_dir}")]
    OutsideOutputDir { path: String, out_dir: String },

    #[error("two or more assets have conflicting output path {0}")]
    ConflictingOutput(String),
}

/// Output-side options shared by the rewriter and the path resolver.
#[derive(Clone)]
pub struct StylesOutputOptions {
    pub output_path: OutputPathStrategy,
    pub output_ext: String,
    pub output_dir: PathBuf,
    pub skip_current_folder_part: SkipCurrentFolderPart,
}

/// Map an asset source path to its absolute output location.
pub fn resolve_output_path(
    asset_path: &Path,
    options: &StylesOutputOptions,
    bundle_out_dir: &Path,
    module_root: &Path,
) -> Result<PathBuf, OutputError> {
    let resolved = match &options.output_path {
        OutputPathStrategy::Custom(resolve) => resolve(asset_path),
        OutputPathStrategy::Keep => {
            let kept = pathdiff::diff_paths(asset_path, module_root)
                .unwrap_or_else(|| asset_path.to_path_buf());
            bundle_out_dir.join(&options.output_dir).join(kept)
        }
        OutputPathStrategy::Fixed(target_dir) => {
            let file_name = asset_path.file_name().unwrap_or(asset_path.as_os_str());
            bundle_out_dir.join(&options.output_dir).join(target_dir).join(file_name)
        }
    };

    assert_location(bundle_out_dir, &resolved)?;
    Ok(remap_extension(&normalize_path(&resolved), &options.output_ext))
}

/// Containment: emitted assets must stay inside the bundle output tree.
pub fn assert_location(out_dir: &Path, asset_path: &Path) -> Result<(), OutputError> {
    if !normalize_path(asset_path).starts_with(normalize_path(out_dir)) {
        return Err(OutputError::OutsideOutputDir {
            path: asset_path.display().to_string(),
            out_dir: out_dir.display().to_string(),
        });
    }
    Ok(())
}

/// Fail fast if two distinct records resolved to the same output path.
pub fn assert_no_duplicate_outputs(registry: &StyleRegistry) -> Result<(), OutputError> {
    let mut seen = FxHashSet::default();
    for record in registry.records_in_order() {
        let Some(output) = record.output_path else { continue };
        if !seen.insert(output.clone()) {
            return Err(OutputError::ConflictingOutput(output.display().to_string()));
        }
    }
    Ok(())
}

/// Append the configured `sourceMappingURL` comment and emit the sibling map
/// asset when external maps were requested. No-op without a map.
pub fn ensure_source_map(
    css: &str,
    map: &str,
    include: SourceMapOption,
    file_name: &str,
    emit_file: &mut dyn FnMut(EmittedAsset),
) -> String {
    if map.is_empty() {
        return css.to_string();
    }

    let mut out = css.to_string();
    match include {
        SourceMapOption::Inline => {
            out.push_str(&format!(
                "\n/*# sourceMappingURL=data:application/json;base64,{}*/",
                BASE64.encode(map.as_bytes())
            ));
        }
        SourceMapOption::External => {
            let base_name = Path::new(file_name)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| file_name.to_string());
            out.push_str(&format!("\n/*# sourceMappingURL={base_name}.map */"));
            emit_file(EmittedAsset {
                file_name: format!("{file_name}.map"),
                source: map.to_string(),
            });
        }
        SourceMapOption::Disabled => {}
    }
    out
}

/// Lexical normalization: resolves `.` and `..` components without touching
/// the filesystem.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Absolute, lexically-normalized form of `path`; relative paths resolve
/// against the current directory.
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        normalize_path(&cwd.join(path))
    }
}

/// Module specifiers always use forward slashes, whatever the host OS.
pub fn to_forward_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn remap_extension(path: &Path, output_ext: &str) -> PathBuf {
    let text = path.to_string_lossy();
    for ext in [".scss", ".sass"] {
        if let Some(stem) = text.strip_suffix(ext) {
            return PathBuf::from(format!("{stem}{output_ext}"));
        }
    }
    path.to_path_buf()
}
