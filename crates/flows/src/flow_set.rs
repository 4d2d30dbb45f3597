use std::collections::HashMap;
use std::path::Path;

use crate::definition::{FlowDefinition, is_rollback_step, rollback_target};
use crate::document;
use crate::error::{FlowError, Result};

/// The loaded set of flows.
///
/// Lookups are case-insensitive on the flow name. A `FlowSet` that failed
/// to load is still usable; it is simply empty and reports
/// [`is_loaded`](Self::is_loaded) as false.
#[derive(Debug, Clone, Default)]
pub struct FlowSet {
    loaded: bool,
    version: String,
    flows: Vec<FlowDefinition>,
    by_name: HashMap<String, usize>,
}

impl FlowSet {
    /// An empty, unloaded set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a set from already validated definitions.
    pub fn from_definitions(
        version: impl Into<String>,
        definitions: impl IntoIterator<Item = FlowDefinition>,
    ) -> Self {
        let mut set = Self {
            loaded: true,
            version: version.into(),
            ..Self::default()
        };
        for flow in definitions {
            let key = flow.name.to_lowercase();
            if set.by_name.contains_key(&key) {
                tracing::warn!(flow = %flow.name, "dropping flow whose name is already defined");
                continue;
            }
            set.by_name.insert(key, set.flows.len());
            set.flows.push(flow);
        }
        set.report_dangling_references();
        set
    }

    /// Parses a YAML flow document.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let parsed = document::parse(text)?;
        Ok(Self::from_definitions(parsed.version, parsed.flows))
    }

    /// Reads and parses the flow document at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FlowError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| FlowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Like [`load`](Self::load), but logs failures and returns an empty set
    /// so the host process can keep running without flows.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(set) => {
                tracing::info!(
                    path = %path.display(),
                    version = %set.version,
                    flows = set.len(),
                    "loaded flow definitions"
                );
                set
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "flow definitions not loaded");
                Self::empty()
            }
        }
    }

    /// Whether a document was successfully loaded.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Finds a flow by name, ignoring case.
    pub fn lookup(&self, name: &str) -> Option<&FlowDefinition> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&index| &self.flows[index])
    }

    /// Flows in document order.
    pub fn flows(&self) -> impl Iterator<Item = &FlowDefinition> {
        self.flows.iter()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Logs next-step and next-flow references that point nowhere. Such
    /// references stay in the model and are skipped at dispatch time.
    fn report_dangling_references(&self) {
        for flow in &self.flows {
            for step in &flow.steps {
                for outcome in step.outcomes() {
                    for next in &outcome.next_steps {
                        let target = if is_rollback_step(next) {
                            rollback_target(next).unwrap_or(next.as_str())
                        } else {
                            next.as_str()
                        };
                        if flow.step(target).is_none() {
                            tracing::warn!(
                                flow = %flow.name,
                                step = %step.name,
                                next_step = %next,
                                "next step is not declared in this flow"
                            );
                        }
                    }
                    if let Some(ref next_flow) = outcome.next_flow
                        && self.lookup(next_flow).is_none()
                    {
                        tracing::warn!(
                            flow = %flow.name,
                            step = %step.name,
                            %next_flow,
                            "next flow is not defined"
                        );
                    }
                }
            }
        }
    }
}
