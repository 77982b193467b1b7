//! Stage descriptors and per-stage state.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::context::{RunFlag, RunFlags};

/// Builds the agent for a single-invocation stage.
pub type SingleFactory = Arc<dyn Fn() -> Box<dyn Agent> + Send + Sync>;

/// Builds the agent for one fan-out item, given the item's id.
pub type ItemFactory = Arc<dyn Fn(&str) -> Box<dyn Agent> + Send + Sync>;

/// Key read from each fan-out item unless overridden.
pub const DEFAULT_ITEM_KEY: &str = "id";

/// How a stage invokes its agents.
#[derive(Clone)]
pub enum StageKind {
    /// One agent, invoked with the run's top-level input.
    Single(SingleFactory),
    /// One agent per item of `collection`, each invoked with its own item and
    /// identified as `"<role>:<item[item_key]>"`.
    FanOut {
        role: String,
        collection: String,
        item_key: String,
        factory: ItemFactory,
    },
}

impl fmt::Debug for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Single(_) => f.write_str("Single"),
            StageKind::FanOut {
                role,
                collection,
                item_key,
                ..
            } => f
                .debug_struct("FanOut")
                .field("role", role)
                .field("collection", collection)
                .field("item_key", item_key)
                .finish_non_exhaustive(),
        }
    }
}

/// A named unit of work in the pipeline.
#[derive(Debug, Clone)]
pub struct StageDescriptor {
    name: String,
    kind: StageKind,
    skipped_when: Option<RunFlag>,
}

impl StageDescriptor {
    pub fn single<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: StageKind::Single(Arc::new(factory)),
            skipped_when: None,
        }
    }

    pub fn fan_out<F>(
        name: impl Into<String>,
        role: impl Into<String>,
        collection: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn(&str) -> Box<dyn Agent> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: StageKind::FanOut {
                role: role.into(),
                collection: collection.into(),
                item_key: DEFAULT_ITEM_KEY.to_string(),
                factory: Arc::new(factory),
            },
            skipped_when: None,
        }
    }

    /// Read item ids from `key` instead of `"id"`. No effect on single stages.
    pub fn with_item_key(mut self, key: impl Into<String>) -> Self {
        if let StageKind::FanOut { item_key, .. } = &mut self.kind {
            *item_key = key.into();
        }
        self
    }

    /// Skip this stage, and every stage after it, when `flag` is set for the run.
    pub fn skipped_when(mut self, flag: RunFlag) -> Self {
        self.skipped_when = Some(flag);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &StageKind {
        &self.kind
    }

    pub fn skip_flag(&self) -> Option<RunFlag> {
        self.skipped_when
    }

    /// The flag that makes this stage inapplicable for a run, if it is set.
    pub fn skip_cause(&self, flags: RunFlags) -> Option<RunFlag> {
        self.skipped_when.filter(|flag| flags.is_set(*flag))
    }

    pub fn fan_out_role(&self) -> Option<&str> {
        match &self.kind {
            StageKind::FanOut { role, .. } => Some(role),
            StageKind::Single(_) => None,
        }
    }
}

/// Lifecycle of a stage within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageState {
    pub fn as_str(self) -> &'static str {
        match self {
            StageState::Pending => "pending",
            StageState::Running => "running",
            StageState::Succeeded => "succeeded",
            StageState::Failed => "failed",
            StageState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StageState::Succeeded | StageState::Failed | StageState::Skipped
        )
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final state of one stage plus the agents it invoked, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub state: StageState,
    #[serde(default)]
    pub invocations: Vec<String>,
}

impl StageReport {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StageState::Pending,
            invocations: Vec::new(),
        }
    }
}
