use std::fs;
use std::path::{Path, PathBuf};

fn source_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => panic!("src dir must be readable: {err}"),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            source_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

/// Library code before the first `#[cfg(test)]` module.
fn non_test_code(contents: &str) -> &str {
    contents
        .find("#[cfg(test)]\nmod tests")
        .map_or(contents, |idx| &contents[..idx])
}

#[test]
fn manifest_warns_on_unwrap_and_expect() {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let manifest = match fs::read_to_string(manifest_dir.join("Cargo.toml")) {
        Ok(contents) => contents,
        Err(err) => panic!("package manifest must be readable: {err}"),
    };
    assert!(manifest.contains("[lints.clippy]"));
    assert!(manifest.contains("unwrap_used = \"warn\""));
    assert!(manifest.contains("expect_used = \"warn\""));
}

#[test]
fn library_code_propagates_instead_of_unwrapping() {
    let src = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut files = Vec::new();
    source_files(&src, &mut files);
    assert!(!files.is_empty());

    let mut offenders = Vec::new();
    for path in files {
        let contents = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()));
        for (idx, line) in non_test_code(&contents).lines().enumerate() {
            if line.contains(".unwrap()") || line.contains(".expect(") {
                offenders.push(format!("{}:{}: {}", path.display(), idx + 1, line.trim()));
            }
        }
    }
    assert!(offenders.is_empty(), "unwrap/expect in library code:\n{}", offenders.join("\n"));
}
