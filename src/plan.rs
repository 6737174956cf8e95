use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One step of a plan: which plugin to run and its base configuration,
/// before the client's own configuration is overlaid at scan creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub plugin_name: String,
    pub description: String,
    pub configuration: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,
    pub description: String,
    pub workflow: Vec<WorkflowStep>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanSummary {
    pub name: String,
    pub description: String,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        PlanSummary {
            name: plan.name.clone(),
            description: plan.description.clone(),
        }
    }
}

fn step(plugin_name: &str, description: &str) -> WorkflowStep {
    WorkflowStep {
        plugin_name: plugin_name.to_string(),
        description: description.to_string(),
        configuration: json!({}),
    }
}

/// Static plan table. Compile-time constant per the data model: a plan
/// registry entry never mutates, and sessions deep-copy it at create time
/// so in-flight scans are immune to later registry changes (there are none,
/// but the copy is what makes that true by construction).
pub fn plan_registry() -> Vec<Plan> {
    vec![
        Plan {
            name: "tickle".to_string(),
            description: "A harmless plan that pokes at a site with only the lightest probes."
                .to_string(),
            workflow: vec![
                step("HSTSPlugin", "Checks for the Strict-Transport-Security header"),
                step("XFrameOptionsPlugin", "Checks for the X-Frame-Options header"),
            ],
        },
        Plan {
            name: "scratch".to_string(),
            description: "A light plan that also exercises incremental issue reporting."
                .to_string(),
            workflow: vec![
                step("HSTSPlugin", "Checks for the Strict-Transport-Security header"),
                step(
                    "IssueGeneratingPlugin",
                    "Emits a handful of synthetic issues over time",
                ),
            ],
        },
        Plan {
            name: "stomp".to_string(),
            description: "A plan that exercises partial failure: one plugin always fails."
                .to_string(),
            workflow: vec![
                step("FailingPlugin", "Always exits with a non-zero status"),
                step("HSTSPlugin", "Checks for the Strict-Transport-Security header"),
            ],
        },
        Plan {
            name: "punch".to_string(),
            description: "A plan built around a single long-running plugin.".to_string(),
            workflow: vec![step(
                "LongRunningPlugin",
                "Runs until stopped or its own timeout elapses",
            )],
        },
        Plan {
            name: "zapspider".to_string(),
            description: "A broader plan combining several probes and a long-running step."
                .to_string(),
            workflow: vec![
                step("HSTSPlugin", "Checks for the Strict-Transport-Security header"),
                step("XFrameOptionsPlugin", "Checks for the X-Frame-Options header"),
                step("LongRunningPlugin", "Runs until stopped or its own timeout elapses"),
            ],
        },
    ]
}

pub fn find_plan(name: &str) -> Option<Plan> {
    plan_registry().into_iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_contains_named_plans() {
        assert!(find_plan("tickle").is_some());
        assert!(find_plan("no-such-plan").is_none());
    }

    #[test]
    fn plan_lookup_is_a_deep_copy() {
        let mut plan = find_plan("tickle").unwrap();
        plan.workflow[0].configuration = json!({"mutated": true});
        let fresh = find_plan("tickle").unwrap();
        assert_eq!(fresh.workflow[0].configuration, json!({}));
    }
}
