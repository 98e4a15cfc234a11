use std::fs;
use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    enforce_quiet_library();
}

/// Library modules report through `log` only; terminal output belongs to the binary.
fn enforce_quiet_library() {
    let forbidden = ["println!", "eprintln!", "print!(", "eprint!(", "dbg!("];
    let binary_entry = Path::new("src").join("main.rs");

    let mut violations = Vec::new();
    let mut stack = vec![PathBuf::from("src")];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("rs") || path == binary_entry {
                continue;
            }
            let src = match fs::read_to_string(&path) {
                Ok(s) => s,
                Err(_) => continue,
            };
            for (line_no, line) in src.lines().enumerate() {
                for token in &forbidden {
                    if line.contains(token) {
                        violations.push(format!(
                            "{}:{} contains '{}'",
                            path.display(),
                            line_no + 1,
                            token
                        ));
                    }
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nerror: terminal output in library modules (use the log macros):");
        for v in violations {
            eprintln!("  - {v}");
        }
        panic!("library modules must not print");
    }
}
