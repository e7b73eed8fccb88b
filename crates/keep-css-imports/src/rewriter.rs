use crate::compiler::SourceMapData;
use crate::host::RenderedChunk;
use crate::output::{resolve_output_path, to_forward_slashes, OutputError, StylesOutputOptions};
use crate::registry::{StyleRegistry, PLACEHOLDER_SUFFIX};
use crate::types::SkipCurrentFolderPart;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Rewrites placeholder style imports in rendered chunks to their final
/// relative asset specifiers.
pub struct ImportRewriter<'a> {
    registry: &'a StyleRegistry,
    output_options: &'a StylesOutputOptions,
}

/// Rewritten chunk text plus a best-effort map of the splices performed.
#[derive(Debug, Clone)]
pub struct RewrittenChunk {
    pub code: String,
    pub map: SourceMapData,
}

/// One pending text replacement. Edits are collected first, then applied in
/// descending start order so pending offsets stay valid.
#[derive(Debug)]
struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

/// Matches placeholder tokens: the NUL sentinel, an index, the fixed suffix.
fn placeholder_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(&format!("\\x00([^\"']+){}", regex::escape(PLACEHOLDER_SUFFIX))).unwrap()
    })
}

impl<'a> ImportRewriter<'a> {
    pub fn new(registry: &'a StyleRegistry, output_options: &'a StylesOutputOptions) -> Self {
        Self { registry, output_options }
    }

    pub fn update_imports(
        &self,
        code: &str,
        chunk: &mut RenderedChunk,
        bundle_out_dir: &Path,
        module_root: &Path,
    ) -> Result<RewrittenChunk, OutputError> {
        let chunk_path = bundle_out_dir.join(&chunk.file_name);
        let chunk_dir = chunk_path.parent().unwrap_or(bundle_out_dir);

        let mut edits: Vec<Edit> = Vec::new();
        for captures in placeholder_regex().captures_iter(code) {
            let Some(matched) = captures.get(0) else { continue };
            // Placeholders that decode to nothing we registered belong to
            // someone else; leave them verbatim.
            let Ok(index) = captures[1].parse::<usize>() else { continue };
            let Some(source_path) = self.registry.source_for_index(index) else { continue };

            let asset_output = resolve_output_path(
                &source_path,
                self.output_options,
                bundle_out_dir,
                module_root,
            )?;

            if let Some(relative) = pathdiff::diff_paths(&asset_output, bundle_out_dir) {
                self.registry.set_output_path(&source_path, relative);
            }

            let mut specifier = to_forward_slashes(
                &pathdiff::diff_paths(&asset_output, chunk_dir)
                    .unwrap_or_else(|| asset_output.clone()),
            );
            if self.should_prefix_current_dir(&specifier)
                && !specifier.starts_with("./")
                && !specifier.starts_with("../")
                && !starts_with_drive_letter(&specifier)
            {
                specifier = format!("./{specifier}");
            }

            rename_chunk_import(chunk, matched.as_str(), &specifier);
            edits.push(Edit { start: matched.start(), end: matched.end(), replacement: specifier });
        }

        tracing::debug!(chunk = %chunk.file_name, splices = edits.len(), "rewrote style imports");

        let code = apply_edits(code, edits);
        let map = line_identity_map(&code, &chunk.file_name);
        Ok(RewrittenChunk { code, map })
    }

    /// The suppression pattern is tested against the relative path before the
    /// prefix decision.
    fn should_prefix_current_dir(&self, specifier: &str) -> bool {
        match &self.output_options.skip_current_folder_part {
            SkipCurrentFolderPart::Never => true,
            SkipCurrentFolderPart::Always => false,
            SkipCurrentFolderPart::Matching(pattern) => !pattern.is_match(specifier),
        }
    }
}

/// Mirror a specifier rename into the chunk's import bookkeeping.
fn rename_chunk_import(chunk: &mut RenderedChunk, import_id: &str, updated: &str) {
    if let Some(bindings) = chunk.imported_bindings.remove(import_id) {
        chunk.imported_bindings.insert(updated.to_string(), bindings);
    }
    if let Some(entry) = chunk.imports.iter_mut().find(|entry| entry.as_str() == import_id) {
        *entry = updated.to_string();
    }
}

fn apply_edits(code: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by(|a, b| b.start.cmp(&a.start));
    let mut out = code.to_string();
    for edit in edits {
        out.replace_range(edit.start..edit.end, &edit.replacement);
    }
    out
}

fn starts_with_drive_letter(specifier: &str) -> bool {
    let bytes = specifier.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Splice replacements never contain newlines, so mapping every output line
/// back to the same input line is exact.
fn line_identity_map(code: &str, file_name: &str) -> SourceMapData {
    let lines = code.split('\n').count();
    let mut mappings = String::from("AAAA");
    for _ in 1..lines {
        mappings.push_str(";AACA");
    }
    SourceMapData {
        file: Some(file_name.to_string()),
        sources: vec![file_name.to_string()],
        mappings,
        ..SourceMapData::new()
    }
}
