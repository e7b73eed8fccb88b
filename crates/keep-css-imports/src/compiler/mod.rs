#[cfg(feature = "grass")]
mod sass;
#[cfg(feature = "grass")]
pub use sass::GrassCompiler;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Error types for style compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error(
        "no Sass compiler available: enable the `grass` cargo feature or pass a `compiler` in the plugin options"
    )]
    MissingCompiler,

    /// Compiler-reported failure, propagated verbatim.
    #[error("{0}")]
    Sass(String),

    #[error("post-processing failed: {0}")]
    PostProcess(String),

    #[error("source map serialization failed: {0}")]
    Map(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structured source map as produced by a style compiler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceMapData {
    pub version: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(default)]
    pub sources: Vec<String>,

    /// Older compilers expose the source list under `_sources`.
    #[serde(default, rename = "_sources", skip_serializing_if = "Vec::is_empty")]
    pub legacy_sources: Vec<String>,

    #[serde(default, rename = "sourcesContent", skip_serializing_if = "Option::is_none")]
    pub sources_content: Option<Vec<String>>,

    #[serde(default)]
    pub names: Vec<String>,

    #[serde(default)]
    pub mappings: String,
}

impl SourceMapData {
    pub fn new() -> Self {
        Self { version: 3, ..Self::default() }
    }

    /// Contributing source files; `sources` wins over the legacy `_sources`.
    pub fn source_files(&self) -> impl Iterator<Item = &str> {
        let list =
            if self.sources.is_empty() { &self.legacy_sources } else { &self.sources };
        list.iter().map(String::as_str).filter(|source| !source.is_empty())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// CSS rendering style requested from the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CssOutputStyle {
    #[default]
    Expanded,
    Compressed,
}

/// Rendering configuration handed to a [`StyleCompiler`].
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    pub load_paths: Vec<PathBuf>,
    pub style: CssOutputStyle,
    /// Maps serve two funneled use cases: explicit map output and watch-mode
    /// dependency tracking. The compiler only knows this one knob.
    pub source_map: bool,
    pub source_map_include_sources: bool,
    /// Passthrough options an implementation may interpret.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct CompiledStyle {
    pub css: String,
    pub source_map: Option<SourceMapData>,
}

/// External Sass compiler collaborator.
#[async_trait]
pub trait StyleCompiler: Send + Sync {
    async fn compile(
        &self,
        path: &Path,
        request: &CompileRequest,
    ) -> Result<CompiledStyle, CompileError>;
}

/// Prior source map handed to a [`CssProcessor`].
#[derive(Debug, Clone)]
pub struct PriorSourceMap<'a> {
    pub prev: &'a str,
    pub inline: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessContext<'a> {
    pub from: &'a Path,
    /// Output file name the processed CSS is headed for.
    pub to: String,
    pub map: Option<PriorSourceMap<'a>>,
}

/// A source map in either of the shapes post-processors hand back.
#[derive(Debug, Clone)]
pub enum SourceMapInput {
    Text(String),
    Data(SourceMapData),
}

impl SourceMapInput {
    pub fn into_text(self) -> Result<String, serde_json::Error> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Data(data) => data.to_json(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessorOutput {
    pub css: String,
    pub map: Option<SourceMapInput>,
}

/// PostCSS-style transformer following the `(css, {from, to, map})` calling
/// convention.
pub trait CssProcessor: Send + Sync {
    fn process(
        &self,
        css: &str,
        context: ProcessContext<'_>,
    ) -> Result<ProcessorOutput, CompileError>;
}

/// The three shapes a post-processor may return.
pub enum ProcessedStyles {
    PlainCss(String),
    CssWithMap { css: String, map: Option<SourceMapInput> },
    Processor(Box<dyn CssProcessor>),
}

/// User-supplied hook run over every compiled stylesheet.
pub type PostProcessor = dyn Fn(String, String) -> BoxFuture<'static, Result<ProcessedStyles, CompileError>>
    + Send
    + Sync;

/// Everything [`compile_style`] needs besides the file itself.
#[derive(Clone)]
pub struct CompilationOptions {
    pub output_ext: String,
    pub compiler: Option<Arc<dyn StyleCompiler>>,
    pub post_processor: Option<Arc<PostProcessor>>,
    pub load_paths: Vec<PathBuf>,
    pub source_map: bool,
    pub sass_options: serde_json::Map<String, serde_json::Value>,
}

fn ensure_compiler(
    options: &CompilationOptions,
) -> Result<Arc<dyn StyleCompiler>, CompileError> {
    if let Some(compiler) = &options.compiler {
        return Ok(Arc::clone(compiler));
    }

    #[cfg(feature = "grass")]
    return Ok(Arc::new(GrassCompiler));

    #[cfg(not(feature = "grass"))]
    Err(CompileError::MissingCompiler)
}

/// Compile one Sass source, optionally collecting the files that must be
/// watched to know when to recompile it, and run the post-processor.
pub async fn compile_style(
    path: &Path,
    out_watch_list: Option<&mut Vec<PathBuf>>,
    options: &CompilationOptions,
) -> Result<(String, String), CompileError> {
    let compiler = ensure_compiler(options)?;
    let watch_list_needed = out_watch_list.is_some();

    let request = CompileRequest {
        load_paths: options.load_paths.clone(),
        style: CssOutputStyle::Expanded,
        source_map: options.source_map || watch_list_needed,
        source_map_include_sources: options.source_map || watch_list_needed,
        extra: options.sass_options.clone(),
    };
    let compiled = compiler.compile(path, &request).await?;

    if let (Some(watch_list), Some(map)) = (out_watch_list, &compiled.source_map) {
        watch_list.extend(map.source_files().map(PathBuf::from));
    }

    let map = match &compiled.source_map {
        Some(data) => data.to_json()?,
        None => String::new(),
    };

    let Some(post_processor) = &options.post_processor else {
        return Ok((compiled.css, if options.source_map { map } else { String::new() }));
    };

    let processed = post_processor(compiled.css.clone(), map.clone()).await?;
    let output = match processed {
        ProcessedStyles::PlainCss(css) => ProcessorOutput { css, map: None },
        ProcessedStyles::CssWithMap { css, map } => ProcessorOutput { css, map },
        ProcessedStyles::Processor(processor) => {
            let prior = (!map.is_empty())
                .then(|| PriorSourceMap { prev: map.as_str(), inline: false });
            let context =
                ProcessContext { from: path, to: output_file_name(path, &options.output_ext), map: prior };
            processor.process(&compiled.css, context)?
        }
    };

    let map_text = match output.map {
        Some(map) if options.source_map => map.into_text()?,
        _ => String::new(),
    };
    Ok((output.css, map_text))
}

fn output_file_name(path: &Path, output_ext: &str) -> String {
    let stem = path.file_stem().and_then(|stem| stem.to_str()).unwrap_or_default();
    format!("{stem}{output_ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Returns canned output so tests control the map contents exactly.
    #[derive(Debug, Default)]
    struct FakeCompiler {
        css: String,
        source_map: Option<SourceMapData>,
    }

    #[async_trait]
    impl StyleCompiler for FakeCompiler {
        async fn compile(
            &self,
            _path: &Path,
            request: &CompileRequest,
        ) -> Result<CompiledStyle, CompileError> {
            let source_map = request.source_map.then(|| self.source_map.clone()).flatten();
            Ok(CompiledStyle { css: self.css.clone(), source_map })
        }
    }

    fn options_with(compiler: FakeCompiler, source_map: bool) -> CompilationOptions {
        CompilationOptions {
            output_ext: ".css".to_string(),
            compiler: Some(Arc::new(compiler)),
            post_processor: None,
            load_paths: Vec::new(),
            source_map,
            sass_options: serde_json::Map::new(),
        }
    }

    fn map_with_sources(sources: &[&str]) -> SourceMapData {
        SourceMapData {
            sources: sources.iter().map(|s| (*s).to_string()).collect(),
            ..SourceMapData::new()
        }
    }

    #[tokio::test]
    async fn test_watch_list_collects_map_sources() {
        let compiler = FakeCompiler {
            css: ".a {}".to_string(),
            source_map: Some(map_with_sources(&["/src/a.scss", "", "/src/_dep.scss"])),
        };
        let options = options_with(compiler, false);

        let mut watch_list = Vec::new();
        let (css, map) =
            compile_style(Path::new("/src/a.scss"), Some(&mut watch_list), &options)
                .await
                .unwrap();

        assert_eq!(css, ".a {}");
        // Empty entries are filtered; maps were never requested explicitly.
        assert_eq!(watch_list, vec![PathBuf::from("/src/a.scss"), PathBuf::from("/src/_dep.scss")]);
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_watch_list_falls_back_to_legacy_sources() {
        let source_map = SourceMapData {
            legacy_sources: vec!["/src/legacy.scss".to_string()],
            ..SourceMapData::new()
        };
        let compiler = FakeCompiler { css: String::new(), source_map: Some(source_map) };
        let options = options_with(compiler, false);

        let mut watch_list = Vec::new();
        compile_style(Path::new("/src/legacy.scss"), Some(&mut watch_list), &options)
            .await
            .unwrap();

        assert_eq!(watch_list, vec![PathBuf::from("/src/legacy.scss")]);
    }

    #[tokio::test]
    async fn test_map_returned_only_when_requested() {
        let compiler = FakeCompiler {
            css: ".a {}".to_string(),
            source_map: Some(map_with_sources(&["/src/a.scss"])),
        };
        let options = options_with(compiler, true);

        let (_, map) = compile_style(Path::new("/src/a.scss"), None, &options).await.unwrap();
        assert!(map.contains("\"sources\":[\"/src/a.scss\"]"));
    }

    #[tokio::test]
    async fn test_post_processor_plain_css_drops_map() {
        let compiler = FakeCompiler {
            css: ".a {}".to_string(),
            source_map: Some(map_with_sources(&["/src/a.scss"])),
        };
        let mut options = options_with(compiler, true);
        options.post_processor = Some(Arc::new(|_css, _map| {
            Box::pin(async { Ok(ProcessedStyles::PlainCss(".b {}".to_string())) })
        }));

        let (css, map) = compile_style(Path::new("/src/a.scss"), None, &options).await.unwrap();
        assert_eq!(css, ".b {}");
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_post_processor_structured_map_serializes() {
        let compiler = FakeCompiler { css: ".a {}".to_string(), source_map: None };
        let mut options = options_with(compiler, true);
        options.post_processor = Some(Arc::new(|css, _map| {
            Box::pin(async move {
                Ok(ProcessedStyles::CssWithMap {
                    css,
                    map: Some(SourceMapInput::Data(SourceMapData {
                        sources: vec!["source.scss".to_string()],
                        mappings: "AAAA".to_string(),
                        ..SourceMapData::new()
                    })),
                })
            })
        }));

        let (css, map) = compile_style(Path::new("/src/a.scss"), None, &options).await.unwrap();
        assert_eq!(css, ".a {}");
        assert!(map.contains("\"version\":3"));
        assert!(map.contains("source.scss"));
    }

    #[tokio::test]
    async fn test_post_processor_map_dropped_when_maps_disabled() {
        let compiler = FakeCompiler { css: ".a {}".to_string(), source_map: None };
        let mut options = options_with(compiler, false);
        options.post_processor = Some(Arc::new(|css, _map| {
            Box::pin(async move {
                Ok(ProcessedStyles::CssWithMap {
                    css,
                    map: Some(SourceMapInput::Text("{\"version\":3}".to_string())),
                })
            })
        }));

        let (_, map) = compile_style(Path::new("/src/a.scss"), None, &options).await.unwrap();
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_post_processor_compatible_shim() {
        #[derive(Debug)]
        struct UpperCaser;

        impl CssProcessor for UpperCaser {
            fn process(
                &self,
                css: &str,
                context: ProcessContext<'_>,
            ) -> Result<ProcessorOutput, CompileError> {
                assert_eq!(context.from, Path::new("/src/widget.module.scss"));
                assert_eq!(context.to, "widget.module.css");
                let prior = context.map.expect("prior map should be passed through");
                assert!(!prior.inline);
                assert!(prior.prev.contains("widget.module.scss"));
                Ok(ProcessorOutput { css: css.to_uppercase(), map: None })
            }
        }

        let compiler = FakeCompiler {
            css: ".a {}".to_string(),
            source_map: Some(map_with_sources(&["/src/widget.module.scss"])),
        };
        let mut options = options_with(compiler, true);
        options.post_processor = Some(Arc::new(|_css, _map| {
            Box::pin(async { Ok(ProcessedStyles::Processor(Box::new(UpperCaser))) })
        }));

        let (css, _) =
            compile_style(Path::new("/src/widget.module.scss"), None, &options).await.unwrap();
        assert_eq!(css, ".A {}");
    }

    #[test]
    fn test_source_map_round_trips_legacy_field() {
        let parsed: SourceMapData =
            serde_json::from_str("{\"version\":3,\"_sources\":[\"a.scss\"],\"mappings\":\"\"}")
                .unwrap();
        assert_eq!(parsed.source_files().collect::<Vec<_>>(), vec!["a.scss"]);
    }
}
