use dashmap::{DashMap, DashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Sentinel starting every placeholder token. Rendered chunk text never
/// contains a literal NUL, so tokens cannot collide with ordinary code.
pub const PLACEHOLDER_SENTINEL: char = '\0';

/// Fixed suffix ending every placeholder token.
pub const PLACEHOLDER_SUFFIX: &str = ".[keep-css-imports-plugin-ext]";

/// Per-asset bookkeeping: source path, compiled output, watch dependencies,
/// final output location.
#[derive(Debug, Clone)]
pub struct StyleRecord {
    /// Absolute path of the `.css`/`.scss`/`.sass` source. Identity key.
    pub source_path: PathBuf,
    /// Stable index encoded into the placeholder token.
    pub placeholder_index: usize,
    /// Referencing modules in discovery order.
    pub importers: Vec<PathBuf>,
    /// Last compiled CSS text; empty until first compilation.
    pub css: String,
    /// Last compiled source map text; empty when maps were not produced.
    pub map: String,
    /// Files whose change invalidates the compiled CSS.
    pub watch_list: Vec<PathBuf>,
    /// Emission path relative to the bundle output directory; set by the
    /// rewrite pass.
    pub output_path: Option<PathBuf>,
}

impl StyleRecord {
    fn new(source_path: PathBuf, placeholder_index: usize) -> Self {
        Self {
            source_path,
            placeholder_index,
            importers: Vec::new(),
            css: String::new(),
            map: String::new(),
            watch_list: Vec::new(),
            output_path: None,
        }
    }
}

/// Build-wide style bookkeeping. One instance per plugin instantiation, so
/// concurrent builds in one process cannot cross-talk; persists across watch
/// rebuilds to keep placeholder identity stable.
pub struct StyleRegistry {
    records: DashMap<PathBuf, StyleRecord>,
    /// Append-only inverse of each record's `placeholder_index`.
    placeholder_paths: DashMap<usize, PathBuf>,
    next_placeholder: AtomicUsize,
    /// Modules known to import at least one style, used to fast-skip chunks.
    modules_with_styles: DashSet<PathBuf>,
}

impl StyleRegistry {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            placeholder_paths: DashMap::new(),
            next_placeholder: AtomicUsize::new(0),
            modules_with_styles: DashSet::new(),
        }
    }

    /// Encode a placeholder index into its opaque token.
    pub fn placeholder_token(index: usize) -> String {
        format!("{PLACEHOLDER_SENTINEL}{index}{PLACEHOLDER_SUFFIX}")
    }

    /// Idempotent upsert: allocates a record with a fresh placeholder index on
    /// first sighting and appends the importer. Index allocation completes
    /// within this call; it is never split across a suspension point.
    pub fn register(&self, source_path: &Path, importer: &Path) -> usize {
        let index = self.ensure_record(source_path);
        if let Some(mut record) = self.records.get_mut(source_path) {
            record.importers.push(importer.to_path_buf());
        }
        index
    }

    /// Stable token for a source path, allocating a record if needed.
    pub fn placeholder_for(&self, source_path: &Path) -> String {
        Self::placeholder_token(self.ensure_record(source_path))
    }

    fn ensure_record(&self, source_path: &Path) -> usize {
        let record = self.records.entry(source_path.to_path_buf()).or_insert_with(|| {
            let index = self.next_placeholder.fetch_add(1, Ordering::SeqCst);
            self.placeholder_paths.insert(index, source_path.to_path_buf());
            tracing::debug!(path = %source_path.display(), index, "registered style import");
            StyleRecord::new(source_path.to_path_buf(), index)
        });
        record.placeholder_index
    }

    pub fn source_for_index(&self, index: usize) -> Option<PathBuf> {
        self.placeholder_paths.get(&index).map(|path| path.clone())
    }

    pub fn get(&self, source_path: &Path) -> Option<StyleRecord> {
        self.records.get(source_path).map(|record| record.clone())
    }

    /// Overwrite the compiled output wholesale. `map: None` leaves the stored
    /// map untouched (plain CSS read-through never produces one).
    pub fn update_compiled(
        &self,
        source_path: &Path,
        css: String,
        map: Option<String>,
        watch_list: Vec<PathBuf>,
    ) {
        if let Some(mut record) = self.records.get_mut(source_path) {
            record.css = css;
            if let Some(map) = map {
                record.map = map;
            }
            record.watch_list = watch_list;
        }
    }

    pub fn set_output_path(&self, source_path: &Path, output: PathBuf) {
        if let Some(mut record) = self.records.get_mut(source_path) {
            record.output_path = Some(output);
        }
    }

    pub fn mark_module_with_styles(&self, module: &Path) {
        self.modules_with_styles.insert(module.to_path_buf());
    }

    pub fn module_has_styles(&self, module: &Path) -> bool {
        self.modules_with_styles.contains(module)
    }

    /// Source paths of every record whose watch list contains `changed`.
    pub fn watch_dependents(&self, changed: &Path) -> Vec<PathBuf> {
        self.records
            .iter()
            .filter(|record| record.watch_list.iter().any(|file| file == changed))
            .map(|record| record.source_path.clone())
            .collect()
    }

    /// Snapshot of all records ordered by placeholder index, for
    /// deterministic emission.
    pub fn records_in_order(&self) -> Vec<StyleRecord> {
        let count = self.next_placeholder.load(Ordering::SeqCst);
        (0..count)
            .filter_map(|index| self.source_for_index(index))
            .filter_map(|path| self.get(&path))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for StyleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_assigns_stable_placeholder() {
        let registry = StyleRegistry::new();
        let first = registry.register(Path::new("/src/a.scss"), Path::new("/src/one.js"));
        let second = registry.register(Path::new("/src/a.scss"), Path::new("/src/two.js"));

        assert_eq!(first, second);
        assert_eq!(
            registry.placeholder_for(Path::new("/src/a.scss")),
            StyleRegistry::placeholder_token(first)
        );
    }

    #[test]
    fn test_placeholder_token_shape() {
        let token = StyleRegistry::placeholder_token(7);
        assert!(token.starts_with(PLACEHOLDER_SENTINEL));
        assert!(token.ends_with(PLACEHOLDER_SUFFIX));
        assert_eq!(token, format!("\u{0}7{PLACEHOLDER_SUFFIX}"));
    }

    #[test]
    fn test_indices_are_distinct_and_invertible() {
        let registry = StyleRegistry::new();
        let a = registry.register(Path::new("/src/a.scss"), Path::new("/src/m.js"));
        let b = registry.register(Path::new("/src/b.css"), Path::new("/src/m.js"));

        assert_ne!(a, b);
        assert_eq!(registry.source_for_index(a), Some(PathBuf::from("/src/a.scss")));
        assert_eq!(registry.source_for_index(b), Some(PathBuf::from("/src/b.css")));
        assert_eq!(registry.source_for_index(99), None);
    }

    #[test]
    fn test_importers_keep_discovery_order() {
        let registry = StyleRegistry::new();
        registry.register(Path::new("/src/a.scss"), Path::new("/src/one.js"));
        registry.register(Path::new("/src/a.scss"), Path::new("/src/two.js"));

        let record = registry.get(Path::new("/src/a.scss")).unwrap();
        assert_eq!(
            record.importers,
            vec![PathBuf::from("/src/one.js"), PathBuf::from("/src/two.js")]
        );
    }

    #[test]
    fn test_watch_dependents_matches_watch_lists() {
        let registry = StyleRegistry::new();
        registry.register(Path::new("/src/a.scss"), Path::new("/src/m.js"));
        registry.register(Path::new("/src/b.scss"), Path::new("/src/m.js"));
        registry.update_compiled(
            Path::new("/src/a.scss"),
            String::new(),
            None,
            vec![PathBuf::from("/src/_shared.scss"), PathBuf::from("/src/a.scss")],
        );
        registry.update_compiled(
            Path::new("/src/b.scss"),
            String::new(),
            None,
            vec![PathBuf::from("/src/_shared.scss"), PathBuf::from("/src/b.scss")],
        );

        let mut dependents = registry.watch_dependents(Path::new("/src/_shared.scss"));
        dependents.sort();
        assert_eq!(dependents, vec![PathBuf::from("/src/a.scss"), PathBuf::from("/src/b.scss")]);

        assert_eq!(registry.watch_dependents(Path::new("/src/a.scss")), vec![PathBuf::from("/src/a.scss")]);
        assert!(registry.watch_dependents(Path::new("/src/unrelated.scss")).is_empty());
    }

    #[test]
    fn test_records_in_order_follows_placeholder_indices() {
        let registry = StyleRegistry::new();
        registry.register(Path::new("/src/z.scss"), Path::new("/src/m.js"));
        registry.register(Path::new("/src/a.scss"), Path::new("/src/m.js"));

        let order: Vec<_> =
            registry.records_in_order().into_iter().map(|record| record.source_path).collect();
        assert_eq!(order, vec![PathBuf::from("/src/z.scss"), PathBuf::from("/src/a.scss")]);
    }

    #[test]
    fn test_module_tracking() {
        let registry = StyleRegistry::new();
        assert!(!registry.module_has_styles(Path::new("/src/m.js")));
        registry.mark_module_with_styles(Path::new("/src/m.js"));
        assert!(registry.module_has_styles(Path::new("/src/m.js")));
    }
}
