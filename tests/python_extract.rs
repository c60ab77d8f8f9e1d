use chromabuddy::indexer::extract::LanguageExtractor;
use chromabuddy::indexer::python::{PythonExtractor, module_name_from_rel_path};
use chromabuddy::model::SymbolKind;

#[test]
fn module_name_from_path() {
    assert_eq!(module_name_from_rel_path("foo.py"), "foo");
    assert_eq!(module_name_from_rel_path("pkg/__init__.py"), "pkg.__init__");
    assert_eq!(module_name_from_rel_path("pkg/sub/mod.py"), "pkg.sub.mod");
}

#[test]
fn extract_symbols_imports_and_calls() {
    let source = r#"
"""module doc"""
import os, sys as system
from pkg import mod, util as u

class Base:
    pass

class Foo(Base):
    """Foo doc"""
    def method(self, x):
        "method doc"
        return helper(x)

    @property
    def size(self):
        return 1

def func(a, b=2, *args, **kwargs):
    def inner():
        return 0
    return a + b

func(1, 2)
"#;
    let mut extractor = PythonExtractor::new().unwrap();
    let extracted = extractor.extract("pkg/mod.py", source).unwrap();

    let names: Vec<_> = extracted
        .symbols
        .iter()
        .map(|s| (s.kind, s.name.as_str()))
        .collect();
    assert_eq!(
        names,
        vec![
            (SymbolKind::Class, "Base"),
            (SymbolKind::Class, "Foo"),
            (SymbolKind::Method, "method"),
            (SymbolKind::Method, "size"),
            (SymbolKind::Function, "func"),
        ]
    );

    let foo = &extracted.symbols[1];
    assert_eq!(foo.docstring.as_deref(), Some("Foo doc"));
    assert_eq!(foo.members, vec!["method", "size"]);
    assert_eq!(foo.file, "pkg/mod.py");

    let method = &extracted.symbols[2];
    assert_eq!(method.parent.as_deref(), Some("Foo"));
    assert_eq!(method.members, vec!["self", "x"]);
    assert_eq!(method.docstring.as_deref(), Some("method doc"));

    let func = &extracted.symbols[4];
    assert_eq!(func.members, vec!["a", "b", "args", "kwargs"]);
    assert!(func.end_line > func.line);

    for import in ["os", "sys", "pkg", "pkg.mod", "pkg.util"] {
        assert!(extracted.imports.contains(import), "missing import {import}");
    }
    assert!(extracted.calls.contains("func"));
    assert!(extracted.calls.contains("helper"));
}

#[test]
fn syntax_error_is_reported_with_line() {
    let mut extractor = PythonExtractor::new().unwrap();
    let err = extractor
        .extract("broken.py", "def ok():\n    pass\n\ndef broken(:\n    pass\n")
        .unwrap_err();
    assert!(err.to_string().contains("syntax error"), "{err}");
}
