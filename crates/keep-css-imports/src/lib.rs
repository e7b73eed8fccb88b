pub mod compiler;
pub mod host;
pub mod output;
pub mod registry;
pub mod rewriter;
pub mod types;

#[cfg(feature = "grass")]
pub use compiler::GrassCompiler;
pub use compiler::{
    CompilationOptions, CompileError, CompileRequest, CompiledStyle, CssOutputStyle, CssProcessor,
    PostProcessor, PriorSourceMap, ProcessContext, ProcessedStyles, ProcessorOutput,
    SourceMapData, SourceMapInput, StyleCompiler,
};
pub use host::{
    BundleOutputOptions, BundlerContext, EmittedAsset, RenderedChunk, ResolveCustom,
    ResolveOptions, ResolvedId, StyleMeta,
};
pub use output::OutputError;
pub use registry::{StyleRecord, StyleRegistry};
pub use rewriter::RewrittenChunk;
pub use types::{
    OutputPathStrategy, PluginError, PluginOptions, SkipCurrentFolderPart, SourceMapOption,
    PLUGIN_NAME,
};

use compiler::compile_style;
use output::{
    absolute_path, assert_no_duplicate_outputs, ensure_source_map, normalize_path,
    to_forward_slashes, StylesOutputOptions,
};
use regex::Regex;
use rewriter::ImportRewriter;
use rustc_hash::FxHashSet;
use std::path::{Path, PathBuf};
use types::FILE_URL_PREFIX;

/// Bundler plugin that keeps stylesheet imports as external on-disk assets.
///
/// The host bundler drives the five lifecycle hooks; all shared state lives in
/// the per-instance [`StyleRegistry`], so several builds can run in one
/// process without cross-talk.
///
/// # Example
/// ```no_run
/// use keep_css_imports::{KeepCssImports, PluginOptions, SourceMapOption};
///
/// let plugin = KeepCssImports::new(PluginOptions {
///     source_map: SourceMapOption::External,
///     ..PluginOptions::default()
/// });
/// ```
pub struct KeepCssImports {
    registry: StyleRegistry,
    styles_output: StylesOutputOptions,
    compilation: CompilationOptions,
    include_regexp: Regex,
    source_map: SourceMapOption,
}

impl KeepCssImports {
    pub fn new(options: PluginOptions) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

        let mut load_paths = options.include_paths;
        load_paths.push(cwd);
        let mut seen = FxHashSet::default();
        load_paths.retain(|path| seen.insert(path.clone()));

        let styles_output = StylesOutputOptions {
            output_path: options.output_path,
            output_ext: options.output_ext.clone(),
            output_dir: options.output_dir,
            skip_current_folder_part: options.skip_current_folder_part,
        };
        let compilation = CompilationOptions {
            output_ext: options.output_ext,
            compiler: options.compiler,
            post_processor: options.post_processor,
            load_paths,
            source_map: options.source_map.is_requested(),
            sass_options: options.sass_options,
        };

        Self {
            registry: StyleRegistry::new(),
            styles_output,
            compilation,
            include_regexp: options.include_regexp,
            source_map: options.source_map,
        }
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn registry(&self) -> &StyleRegistry {
        &self.registry
    }

    /// Module-resolution hook. Claims matching style specifiers as external
    /// placeholder imports; declines everything else.
    pub async fn resolve_id(
        &self,
        source: &str,
        importer: Option<&Path>,
        resolve_options: &ResolveOptions,
        host: &dyn BundlerContext,
    ) -> Result<Option<ResolvedId>, PluginError> {
        let Some(importer) = importer else { return Ok(None) };
        if !self.include_regexp.is_match(source) || source.contains('\0') {
            return Ok(None);
        }
        // Inside one of our own re-dispatched resolutions.
        if resolve_options.custom.resolving_styles {
            return Ok(None);
        }

        let mut nested = resolve_options.clone();
        nested.skip_self = true;
        nested.custom.resolving_styles = true;

        let Some(resolved) = host.resolve(source, importer, nested).await else {
            return Ok(None);
        };
        if resolved.external {
            return Ok(Some(resolved));
        }

        let source_path = absolute_path(Path::new(&resolved.id));
        self.registry.mark_module_with_styles(importer);
        let index = self.registry.register(&source_path, importer);

        self.ensure_code_and_watch_list(&source_path, host.watch_mode()).await?;

        if let Some(record) = self.registry.get(&source_path) {
            for watch_file in &record.watch_list {
                host.add_watch_file(watch_file);
            }
        }

        Ok(Some(ResolvedId {
            id: StyleRegistry::placeholder_token(index),
            external: true,
            meta: Some(StyleMeta { source_id: source_path }),
        }))
    }

    /// Build-start hook. Every rebuild resets the host's watcher, so watch
    /// files need reattaching.
    pub fn build_start(&self, host: &dyn BundlerContext) {
        if !host.watch_mode() {
            return;
        }
        let watched: FxHashSet<PathBuf> =
            host.watched_files().iter().map(|path| normalize_path(path)).collect();
        for record in self.registry.records_in_order() {
            for watch_file in &record.watch_list {
                if !watched.contains(&normalize_path(watch_file)) {
                    host.add_watch_file(watch_file);
                }
            }
        }
    }

    /// Watch-change hook. Recompiles every record whose watch list contains
    /// the changed file; the recompiles are awaited jointly.
    pub async fn watch_change(
        &self,
        id: &Path,
        host: &dyn BundlerContext,
    ) -> Result<(), PluginError> {
        let changed = absolute_path(id);
        let dependents = self.registry.watch_dependents(&changed);
        if dependents.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            changed = %changed.display(),
            count = dependents.len(),
            "recompiling styles for changed file"
        );
        futures::future::try_join_all(
            dependents
                .iter()
                .map(|path| self.ensure_code_and_watch_list(path, host.watch_mode())),
        )
        .await?;
        Ok(())
    }

    /// Chunk-render hook. Returns `None` for chunks without style imports.
    pub fn render_chunk(
        &self,
        code: &str,
        chunk: &mut RenderedChunk,
        output_options: &BundleOutputOptions,
    ) -> Result<Option<RewrittenChunk>, PluginError> {
        if code.is_empty()
            || !chunk.modules.iter().any(|module| self.registry.module_has_styles(module))
        {
            return Ok(None);
        }

        let bundle_out_dir = output_options.bundle_out_dir();
        let module_root = output_options
            .preserve_modules_root
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let rewriter = ImportRewriter::new(&self.registry, &self.styles_output);
        let rewritten = rewriter.update_imports(code, chunk, &bundle_out_dir, &module_root)?;
        Ok(Some(rewritten))
    }

    /// Bundle-finalize hook. Checks for output collisions, then emits one
    /// asset per style record that reached an emitted chunk.
    pub fn generate_bundle(
        &self,
        is_write: bool,
        emit_file: &mut dyn FnMut(EmittedAsset),
    ) -> Result<(), PluginError> {
        if !is_write {
            return Ok(());
        }

        assert_no_duplicate_outputs(&self.registry)?;

        let include = self.emission_source_map();
        for record in self.registry.records_in_order() {
            let Some(output) = &record.output_path else {
                tracing::debug!(
                    path = %record.source_path.display(),
                    "style never reached an emitted chunk; skipping"
                );
                continue;
            };
            let file_name = to_forward_slashes(output);

            let source = if is_plain_css(&record.source_path) {
                record.css.clone()
            } else {
                ensure_source_map(&record.css, &record.map, include, &file_name, emit_file)
            };

            emit_file(EmittedAsset { file_name, source });
        }
        Ok(())
    }

    /// Compile (or read through) one style source and refresh its record.
    async fn ensure_code_and_watch_list(
        &self,
        source_path: &Path,
        is_watch: bool,
    ) -> Result<(), PluginError> {
        if is_plain_css(source_path) {
            let css = std::fs::read_to_string(source_path)?;
            self.registry.update_compiled(
                source_path,
                css,
                None,
                vec![source_path.to_path_buf()],
            );
            return Ok(());
        }

        let mut watch_list = Vec::new();
        let out_watch_list = is_watch.then_some(&mut watch_list);
        let (css, map) = compile_style(source_path, out_watch_list, &self.compilation).await?;
        watch_list.push(source_path.to_path_buf());

        let watch_list = watch_list
            .iter()
            .map(|file| {
                let text = file.to_string_lossy();
                let trimmed = text.strip_prefix(FILE_URL_PREFIX).unwrap_or(text.as_ref());
                absolute_path(Path::new(trimmed))
            })
            .collect();

        self.registry.update_compiled(source_path, css, Some(map), watch_list);
        tracing::debug!(path = %source_path.display(), "compiled style");
        Ok(())
    }

    /// Emission-time map policy: the explicit option wins, with the compiler
    /// passthrough's `sourceMap` as a fallback.
    fn emission_source_map(&self) -> SourceMapOption {
        if self.source_map.is_requested() {
            return self.source_map;
        }
        match self.compilation.sass_options.get("sourceMap") {
            Some(serde_json::Value::Bool(true)) => SourceMapOption::External,
            Some(serde_json::Value::String(value)) if value == "inline" => SourceMapOption::Inline,
            _ => SourceMapOption::Disabled,
        }
    }
}

impl Default for KeepCssImports {
    fn default() -> Self {
        Self::new(PluginOptions::default())
    }
}

fn is_plain_css(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "css")
}
