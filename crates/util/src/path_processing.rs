use std::path::PathBuf;

use dirs_next::home_dir;

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    if p == "~" {
        return home();
    }
    if let Some(rest) = p.strip_prefix("~/").or_else(|| p.strip_prefix("~\\")) {
        return home().join(rest);
    }
    PathBuf::from(p)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn expands_home_prefix() {
        temp_env::with_var("HOME", Some("/home/operator"), || {
            assert_eq!(expand_tilde("~/state"), PathBuf::from("/home/operator/state"));
            assert_eq!(expand_tilde("~"), PathBuf::from("/home/operator"));
            assert_eq!(expand_tilde("/var/lib/skyward"), PathBuf::from("/var/lib/skyward"));
        });
    }
}
