use std::fs;

use cinder::frontend::source::SourceError;
use cinder::{FileSourceProvider, ScriptError, ScriptManager, SourceProvider, Value};

#[test]
fn test_includes_resolve_relative_to_the_including_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("lib")).unwrap();
    fs::write(
        dir.path().join("main.cinder"),
        "include \"lib/math\";\nfunction main() { return square(7) + offset; }\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("lib/math.cinder"),
        "include \"consts.cinder\";\nfunction square(x) { return x * x; }\n",
    )
    .unwrap();
    fs::write(dir.path().join("lib/consts.cinder"), "var offset = 1;\n").unwrap();

    let mut manager = ScriptManager::new(FileSourceProvider::new(dir.path()));
    assert_eq!(manager.run("main").unwrap(), Value::Int(50));
}

#[test]
fn test_cyclic_includes_expand_once() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.cinder"), "include \"b\";\nvar a = 1;\n").unwrap();
    fs::write(dir.path().join("b.cinder"), "include \"a\";\ninclude \"a\";\nvar b = 2;\n").unwrap();

    let lines = FileSourceProvider::new(dir.path()).load("a").unwrap();
    assert_eq!(lines, vec!["var b = 2;".to_string(), "var a = 1;".to_string()]);
}

#[test]
fn test_missing_include_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.cinder"), "include \"nowhere\";\n").unwrap();

    let mut manager = ScriptManager::new(FileSourceProvider::new(dir.path()));
    let err = manager.compile("main").unwrap_err();
    assert!(matches!(
        err.root_cause(),
        ScriptError::Source(SourceError::NotFound(path)) if path.contains("nowhere")
    ));
}

#[test]
fn test_compiled_image_runs_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("main.cinder"),
        "var base = 40;\nfunction main() { return base + 2; }\n",
    )
    .unwrap();

    let mut manager = ScriptManager::new(FileSourceProvider::new(dir.path()));
    let executable = manager.compile("main").unwrap();
    let image_path = dir.path().join("main.img");
    fs::write(&image_path, executable.to_image().unwrap()).unwrap();

    let bytes = fs::read(&image_path).unwrap();
    let restored = std::rc::Rc::new(cinder::Executable::from_image(&bytes, manager.shared()).unwrap());
    manager.initialize(&restored).unwrap();

    let mut interpreter = manager.interpreter(restored, "main", Vec::new()).unwrap();
    assert_eq!(interpreter.run_to_completion().unwrap(), Value::Int(42));
}
