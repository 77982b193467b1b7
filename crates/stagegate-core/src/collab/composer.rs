//! Prompt composition from templates with `<<FIELD>>` placeholders.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context};
use regex::{Captures, Regex};
use serde_json::Value;

/// Placeholder syntax: `<<NAME>>` with an upper-case name.
const PLACEHOLDER_PATTERN: &str = r"<<([A-Z_]+)>>";

/// Name of the preamble template prepended to every stage template.
const BASE_TEMPLATE: &str = "base";

/// Values substituted into a template.
#[derive(Debug, Clone, Default)]
pub struct PromptFields {
    pub agent_role: String,
    pub constraints: String,
    pub rag_context: Vec<String>,
    pub module: Option<Value>,
}

impl PromptFields {
    pub fn new(agent_role: impl Into<String>) -> Self {
        Self {
            agent_role: agent_role.into(),
            ..Self::default()
        }
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = constraints.into();
        self
    }

    pub fn with_context(mut self, snippets: Vec<String>) -> Self {
        self.rag_context = snippets;
        self
    }

    pub fn with_module(mut self, module: Value) -> Self {
        self.module = Some(module);
        self
    }

    fn lookup(&self, name: &str) -> Option<String> {
        match name {
            "AGENT_ROLE" => Some(self.agent_role.clone()),
            "CONSTRAINTS" => Some(self.constraints.clone()),
            "RAG_CONTEXT" => Some(self.rag_context.join("\n---\n")),
            "MODULE" => Some(
                self.module
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_default(),
            ),
            _ => None,
        }
    }
}

/// Turns a stage name and field values into a prompt.
pub trait PromptComposer: Send + Sync {
    fn compose(&self, stage: &str, fields: &PromptFields) -> anyhow::Result<String>;
}

/// Composes `base` + `<stage>` templates and fills known placeholders.
///
/// Unknown placeholders are left in place.
#[derive(Debug, Clone)]
pub struct TemplateComposer {
    templates: BTreeMap<String, String>,
}

impl Default for TemplateComposer {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateComposer {
    /// Templates for the five standard stages.
    pub fn builtin() -> Self {
        let templates = [
            (
                BASE_TEMPLATE,
                "You are <<AGENT_ROLE>> in an embedded firmware pipeline.\nConstraints: <<CONSTRAINTS>>",
            ),
            (
                "architecture",
                "Design the system architecture.\nReference material:\n<<RAG_CONTEXT>>",
            ),
            (
                "code",
                "Write code for module <<MODULE>>.\nReference material:\n<<RAG_CONTEXT>>\n\
                 Separate header and source with ###HEADER### and ###SOURCE###.",
            ),
            (
                "tests",
                "Write unit tests for module <<MODULE>>.\n\
                 Emit ###TEST_CODE### before the code and ###TEST_CASES### before the case table.",
            ),
            (
                "quality",
                "Review the generated modules for quality issues.\n<<RAG_CONTEXT>>",
            ),
            ("build", "Assess build readiness of the generated modules."),
        ];
        Self {
            templates: templates
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Load `*.md` templates from `dir`, keyed by file stem, over the built-ins.
    pub fn load_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut composer = Self::builtin();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("reading template dir {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let body = std::fs::read_to_string(&path)
                .with_context(|| format!("reading template {}", path.display()))?;
            composer.templates.insert(stem.to_string(), body);
        }
        Ok(composer)
    }

    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(name.into(), body.into());
        self
    }
}

impl PromptComposer for TemplateComposer {
    fn compose(&self, stage: &str, fields: &PromptFields) -> anyhow::Result<String> {
        let specific = self
            .templates
            .get(stage)
            .ok_or_else(|| anyhow!("no prompt template for stage '{stage}'"))?;
        let raw = match self.templates.get(BASE_TEMPLATE) {
            Some(base) => format!("{base}\n\n{specific}"),
            None => specific.clone(),
        };

        let placeholder = Regex::new(PLACEHOLDER_PATTERN)?;
        let prompt = placeholder.replace_all(&raw, |caps: &Captures<'_>| {
            fields
                .lookup(&caps[1])
                .unwrap_or_else(|| caps[0].to_string())
        });
        Ok(prompt.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_fills_placeholders() {
        let fields = PromptFields::new("code_agent")
            .with_constraints("no heap")
            .with_context(vec!["a".into(), "b".into()])
            .with_module(serde_json::json!({"id": "imu"}));
        let prompt = TemplateComposer::builtin().compose("code", &fields).unwrap();
        assert!(prompt.starts_with("You are code_agent"));
        assert!(prompt.contains("no heap"));
        assert!(prompt.contains("a\n---\nb"));
        assert!(prompt.contains(r#"{"id":"imu"}"#));
        assert!(!prompt.contains("<<MODULE>>"));
    }

    #[test]
    fn test_unknown_stage_is_an_error() {
        let err = TemplateComposer::builtin()
            .compose("deploy", &PromptFields::new("x"))
            .unwrap_err();
        assert!(err.to_string().contains("deploy"));
    }

    #[test]
    fn test_unknown_placeholder_is_preserved() {
        let composer = TemplateComposer::builtin().with_template("build", "<<BOARD>> <<AGENT_ROLE>>");
        let prompt = composer.compose("build", &PromptFields::new("build_agent")).unwrap();
        assert!(prompt.ends_with("<<BOARD>> build_agent"));
    }

    #[test]
    fn test_load_dir_overrides_builtin() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("quality.md"), "custom <<AGENT_ROLE>>").unwrap();
        let composer = TemplateComposer::load_dir(dir.path()).unwrap();
        let prompt = composer
            .compose("quality", &PromptFields::new("quality_agent"))
            .unwrap();
        assert!(prompt.ends_with("custom quality_agent"));
    }
}
