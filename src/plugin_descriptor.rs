use serde::{Deserialize, Serialize};

/// Identifies a plugin class by fully-qualified name. Immutable, registered
/// once at Plugin Service startup — no dynamic plugin discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub class: String,
    pub name: String,
    pub version: String,
}

fn descriptor(name: &str) -> PluginDescriptor {
    PluginDescriptor {
        class: format!("minion.plugins.demo.{name}"),
        name: name.to_string(),
        version: "1.0.0".to_string(),
    }
}

/// Static registry of demo plugin classes. Real scanning logic (HSTS probes,
/// port scanners, and the like) is out of scope; these five names exist so
/// the plan registry resolves and so integration tests have something for
/// the reference plugin-runner to impersonate.
pub fn plugin_registry() -> Vec<PluginDescriptor> {
    vec![
        descriptor("HSTSPlugin"),
        descriptor("XFrameOptionsPlugin"),
        descriptor("FailingPlugin"),
        descriptor("IssueGeneratingPlugin"),
        descriptor("LongRunningPlugin"),
    ]
}

pub fn find_plugin(name: &str) -> Option<PluginDescriptor> {
    plugin_registry().into_iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_plugins() {
        assert!(find_plugin("HSTSPlugin").is_some());
        assert!(find_plugin("no.such.plugin").is_none());
    }
}
