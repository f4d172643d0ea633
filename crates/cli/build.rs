use std::env;
use std::path::Path;
use std::process::Command;

/// Trimmed stdout of a successful `git` invocation in the workspace root.
fn git(root: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .current_dir(root)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    let root = Path::new(&manifest_dir).join("../..");
    for watched in [".git/HEAD", ".git/index"] {
        println!("cargo:rerun-if-changed={}", root.join(watched).display());
    }

    // `opmerge --version` names the commit; uncommitted edits are flagged
    let revision = match git(&root, &["rev-parse", "--short=7", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&root, &["status", "--porcelain", "--untracked-files=no"])
                .is_some_and(|status| !status.is_empty());
            if dirty {
                format!("{hash}-dirty")
            } else {
                hash
            }
        }
        None => "unknown".to_string(),
    };
    println!("cargo:rustc-env=GIT_COMMIT_HASH={revision}");

    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=TARGET={target}");
}
