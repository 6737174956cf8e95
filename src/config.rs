use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Loads optional JSON configuration for a named service, trying
/// `~/.minion/<name>.conf` first and falling back to
/// `/etc/minion/<name>.conf`. A missing file is fine — the caller supplies
/// its own defaults. A file that exists but fails to parse is a startup
/// error: this is the one class of failure in the whole system that is
/// allowed to abort the process.
pub fn load<T: DeserializeOwned>(service_name: &str) -> anyhow::Result<Option<T>> {
    for path in config_paths(service_name) {
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
            let parsed = serde_json::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            return Ok(Some(parsed));
        }
    }
    Ok(None)
}

fn config_paths(service_name: &str) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs_home() {
        paths.push(home.join(".minion").join(format!("{service_name}.conf")));
    }
    paths.push(PathBuf::from("/etc/minion").join(format!("{service_name}.conf")));
    paths
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Mutex;

    static HOME_GUARD: Mutex<()> = Mutex::new(());

    #[derive(Debug, Deserialize, PartialEq)]
    struct Example {
        greeting: String,
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let _guard = HOME_GUARD.lock().unwrap();
        let previous = std::env::var_os("HOME");
        std::env::set_var("HOME", "/nonexistent-for-test");
        let loaded: Option<Example> = load("no-such-service").unwrap();
        assert!(loaded.is_none());
        match previous {
            Some(v) => std::env::set_var("HOME", v),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    fn user_config_file_is_parsed() {
        let _guard = HOME_GUARD.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let minion_dir = dir.path().join(".minion");
        std::fs::create_dir_all(&minion_dir).unwrap();
        std::fs::write(
            minion_dir.join("example.conf"),
            r#"{"greeting": "hi"}"#,
        )
        .unwrap();
        let previous = std::env::var_os("HOME");
        std::env::set_var("HOME", dir.path());
        let loaded: Option<Example> = load("example").unwrap();
        assert_eq!(
            loaded,
            Some(Example {
                greeting: "hi".to_string()
            })
        );
        match previous {
            Some(v) => std::env::set_var("HOME", v),
            None => std::env::remove_var("HOME"),
        }
    }
}
