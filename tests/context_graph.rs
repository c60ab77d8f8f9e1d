use chromabuddy::cache::TieredCache;
use chromabuddy::indexer::ContextGraph;
use chromabuddy::indexer::scan::ScanOptions;
use chromabuddy::model::SymbolKind;
use std::path::Path;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn setup_project(root: &Path) {
    write(
        root,
        "main.py",
        "from pkg.utils import load\nimport services\n\ndef main():\n    return services.run(load())\n",
    );
    write(
        root,
        "pkg/utils.py",
        "def load():\n    \"\"\"Load data.\"\"\"\n    return []\n\nclass Loader:\n    def fetch(self):\n        return load()\n",
    );
    write(
        root,
        "services.py",
        "from pkg import utils\n\ndef run(items):\n    return len(items)\n",
    );
    write(root, "broken.py", "def broken(:\n    pass\n");
    write(root, "notes.md", "# notes\n");
}

#[test]
fn broken_file_does_not_stop_the_walk() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(dir.path());
    let graph = ContextGraph::build(dir.path(), ScanOptions::default(), None).unwrap();

    let stats = graph.stats();
    assert_eq!(stats.scanned, 4);
    assert_eq!(stats.parse_failures, 1);

    let broken = graph.file("broken.py").unwrap();
    assert!(broken.symbols.is_empty());
    assert!(broken.parse_error.is_some());

    let utils = graph.file("pkg/utils.py").unwrap();
    assert!(utils.parse_error.is_none());
    assert_eq!(utils.functions().count(), 1);
    assert_eq!(utils.methods_of("Loader").count(), 1);

    let summary = graph.summary();
    assert_eq!(summary.total_files, 4);
    assert_eq!(summary.parse_failures, 1);
    assert_eq!(summary.files, vec!["broken.py", "main.py", "pkg/utils.py", "services.py"]);
}

#[test]
fn heuristic_edges_and_related_files() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(dir.path());
    let graph = ContextGraph::build(dir.path(), ScanOptions::default(), None).unwrap();

    let deps: Vec<_> = graph.dependencies().dependencies_of("main.py").cloned().collect();
    assert_eq!(deps, vec!["pkg/utils.py", "services.py"]);
    assert!(
        graph
            .dependencies()
            .edges()
            .iter()
            .all(|edge| edge.from != edge.to)
    );

    let zero = graph.related_files("main.py", 0);
    assert_eq!(zero.len(), 1);
    assert!(zero.contains("main.py"));

    let one = graph.related_files("pkg/utils.py", 1);
    assert!(one.contains("main.py"));
    assert!(one.contains("services.py"));
    assert!(!one.contains("broken.py"));
    assert!(graph.related_files("pkg/utils.py", 5).is_superset(&one));

    let related = graph.related_with_distance("services.py", 2);
    assert_eq!(related[0].path, "services.py");
    assert_eq!(related[0].distance, 0);
    assert!(related.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn symbols_and_complexity() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(dir.path());
    let graph = ContextGraph::build(dir.path(), ScanOptions::default(), None).unwrap();

    let hits = graph.find_symbol("load");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file, "pkg/utils.py");
    assert_eq!(hits[0].kind, SymbolKind::Function);
    assert_eq!(hits[0].line, 1);
    assert!(graph.find_symbol("missing").is_empty());

    let report = graph.complexity_score("main.py");
    assert_eq!(report.symbols, 1);
    assert_eq!(report.dependencies, 2);
    assert_eq!(report.score, 2 + report.imports + 6);
    assert_eq!(graph.complexity_score("nope.py").score, 0);

    assert!(graph.symbol_names(SymbolKind::Class).contains("Loader"));
}

#[test]
fn unchanged_files_come_from_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    setup_project(dir.path());
    let cache_dir = tempfile::tempdir().unwrap();

    let cache = TieredCache::new(cache_dir.path());
    let first = ContextGraph::build(dir.path(), ScanOptions::default(), Some(&cache)).unwrap();
    assert_eq!(first.stats().cached, 0);

    write(dir.path(), "services.py", "def run(items):\n    return items\n");
    let cache = TieredCache::new(cache_dir.path());
    let second = ContextGraph::build(dir.path(), ScanOptions::default(), Some(&cache)).unwrap();
    assert_eq!(second.stats().cached, 3);
    assert_eq!(second.stats().parsed, 1);
    assert_eq!(second.stats().parse_failures, 1);
    assert_eq!(
        second.file("pkg/utils.py").unwrap().symbols,
        first.file("pkg/utils.py").unwrap().symbols
    );
}
