use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const DIR_ENV: &str = "SEEDER_EMBEDDED_ARTIFACTS";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed={DIR_ENV}");

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR is set by cargo"));
    let artifacts_dir = env::var_os(DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| manifest_dir.join("artifacts"));

    println!("cargo:rerun-if-changed={}", artifacts_dir.display());
    println!("cargo:rustc-env=SEEDER_EMBEDDED_DIR={}", artifacts_dir.display());

    let mut table = String::from("&[\n");
    if artifacts_dir.is_dir() {
        let mut entries: Vec<PathBuf> = WalkDir::new(&artifacts_dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| !is_hidden(e.path()))
            .map(|e| e.into_path())
            .collect();
        entries.sort();

        for path in entries {
            println!("cargo:rerun-if-changed={}", path.display());
            let key = path
                .file_name()
                .and_then(|n| n.to_str())
                .expect("embedded artifact names must be valid UTF-8");
            let abs = fs::canonicalize(&path).expect("embedded artifact path resolves");
            writeln!(table, "    ({key:?}, include_bytes!({:?}) as &[u8]),", abs.display().to_string())
                .expect("writing to a String cannot fail");
        }
    }
    table.push(']');

    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo")).join("embedded_artifacts.rs");
    fs::write(&out, table).expect("failed to write embedded artifact table");
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true)
}
