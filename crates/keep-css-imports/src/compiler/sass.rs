use super::{CompileError, CompileRequest, CompiledStyle, CssOutputStyle, SourceMapData, StyleCompiler};
use async_trait::async_trait;
use grass::{Fs, StdFs};
use rustc_hash::FxHashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Sass compiler backed by the pure-Rust `grass` implementation.
#[derive(Debug, Default)]
pub struct GrassCompiler;

/// Read-through filesystem recording every file grass touches, so the
/// synthesized map's `sources` cover the full `@use`/`@import` closure.
#[derive(Debug)]
struct RecordingFs {
    reads: Mutex<Vec<PathBuf>>,
}

impl RecordingFs {
    fn new() -> Self {
        Self { reads: Mutex::new(Vec::new()) }
    }

    fn into_reads(self) -> Vec<PathBuf> {
        self.reads.into_inner().unwrap_or_default()
    }
}

impl Fs for RecordingFs {
    fn is_dir(&self, path: &Path) -> bool {
        StdFs.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        StdFs.is_file(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push(path.to_path_buf());
        }
        StdFs.read(path)
    }
}

#[async_trait]
impl StyleCompiler for GrassCompiler {
    async fn compile(
        &self,
        path: &Path,
        request: &CompileRequest,
    ) -> Result<CompiledStyle, CompileError> {
        let fs = RecordingFs::new();
        let mut options = grass::Options::default().fs(&fs).style(match request.style {
            CssOutputStyle::Expanded => grass::OutputStyle::Expanded,
            CssOutputStyle::Compressed => grass::OutputStyle::Compressed,
        });
        for load_path in &request.load_paths {
            options = options.load_path(load_path);
        }
        if matches!(request.extra.get("quiet"), Some(serde_json::Value::Bool(true))) {
            options = options.quiet(true);
        }

        let css = grass::from_path(path, &options)
            .map_err(|error| CompileError::Sass(error.to_string()))?;
        drop(options);

        let source_map = request.source_map.then(|| {
            let mut seen = FxHashSet::default();
            let mut sources = Vec::new();
            for read in fs.into_reads() {
                let source = read.to_string_lossy().into_owned();
                if seen.insert(source.clone()) {
                    sources.push(source);
                }
            }
            let sources_content = request.source_map_include_sources.then(|| {
                sources
                    .iter()
                    .map(|source| std::fs::read_to_string(source).unwrap_or_default())
                    .collect()
            });
            SourceMapData {
                file: path.file_name().map(|name| name.to_string_lossy().into_owned()),
                sources,
                sources_content,
                // grass exposes no mapping output; a sources-only map still
                // drives watch tracking and map emission.
                ..SourceMapData::new()
            }
        });

        Ok(CompiledStyle { css, source_map })
    }
}
