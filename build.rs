use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let out = Command::new("git").args(args).output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok().map(|s| s.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-env-changed=PROVI_ROOT");

    // Tests that depend on the default root are skipped when PROVI_ROOT overrides it.
    println!("cargo::rustc-check-cfg=cfg(provi_root_set)");
    if std::env::var_os("PROVI_ROOT").is_some() {
        println!("cargo:rustc-cfg=provi_root_set");
    }

    let package = std::env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string());
    let version = match git(&["rev-parse", "--short", "HEAD"]) {
        Some(commit) if !commit.is_empty() => {
            let dirty = git(&["status", "--porcelain"]).is_some_and(|s| !s.is_empty());
            format!("{}+{}{}", package, commit, if dirty { ".dirty" } else { "" })
        }
        _ => package,
    };

    println!("cargo:rustc-env=PROVI_VERSION={}", version);
}
