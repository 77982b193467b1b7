//! Code agent: generates one module's source for the run's target profile.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

use crate::agent::{Agent, AgentError, AgentResult};
use crate::artifact::{resource_dir, write_artifact};
use crate::authz::Resource;
use crate::collab::PromptFields;
use crate::context::RunContext;

use super::architecture::ARCHITECTURE_FILE;
use super::resources::{ARCHITECTURE, MODULE_CODE};
use super::{generate, item_agent_id, retrieve, target_summary, CODE_AGENT};

/// How generated code is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeLayout {
    /// One sketch file with everything integrated (`setup()`/`loop()` style).
    SingleFile,
    /// A `.h`/`.c` pair per module.
    Modular,
}

/// Code layout and framework for a target profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TargetFormat {
    pub layout: CodeLayout,
    pub extension: &'static str,
    pub framework: &'static str,
}

impl TargetFormat {
    const fn single(framework: &'static str) -> Self {
        Self {
            layout: CodeLayout::SingleFile,
            extension: "ino",
            framework,
        }
    }

    const fn modular(framework: &'static str) -> Self {
        Self {
            layout: CodeLayout::Modular,
            extension: "c",
            framework,
        }
    }

    /// Classify a free-form target profile such as `"STM32F401"` or `"esp32-devkit"`.
    ///
    /// First matching row wins; unknown profiles get generic modular C.
    pub fn classify(profile: &str) -> Self {
        const TABLE: &[(&[&str], TargetFormat)] = &[
            (
                &["arduino", "uno", "mega", "nano", "atmega"],
                TargetFormat::single("arduino"),
            ),
            (&["esp32", "esp8266"], TargetFormat::single("arduino-esp32")),
            (&["pico", "rp2040"], TargetFormat::single("arduino-pico")),
            (&["stm32", "stm"], TargetFormat::modular("hal")),
            (&["nrf52", "nrf51", "nordic"], TargetFormat::modular("nordic-sdk")),
            (&["pic32", "pic"], TargetFormat::modular("harmony")),
        ];

        let lower = profile.to_lowercase();
        TABLE
            .iter()
            .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
            .map(|(_, format)| *format)
            .unwrap_or(TargetFormat::modular("generic"))
    }
}

/// Header and source split out of raw generator output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedCode {
    pub header: String,
    pub source: String,
}

/// Line prefixes taken as the start of function definitions.
const DEFINITION_PREFIXES: &[&str] = &["int ", "void ", "uint", "float "];

/// Pull header and source code out of generator output.
///
/// Tried in order: the largest fenced block narrows the text; a JSON object
/// with `header`/`source` keys; `###HEADER###`/`###SOURCE###` markers; sketch
/// code (`setup`/`loop`) as source only; a split at the first definition line.
/// Anything else is treated as source.
pub fn extract_code(raw: &str) -> ExtractedCode {
    let content = largest_fenced_block(raw).unwrap_or(raw);

    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(content.trim()) {
        let field = |k: &str| obj.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
        let code = ExtractedCode {
            header: field("header"),
            source: field("source"),
        };
        if !code.header.is_empty() || !code.source.is_empty() {
            return code;
        }
    }

    if let Some((_, rest)) = content.split_once("###HEADER###") {
        if let Some((header, source)) = rest.split_once("###SOURCE###") {
            return ExtractedCode {
                header: header.trim().to_string(),
                source: source.trim().to_string(),
            };
        }
    }

    if content.contains("void setup(") || content.contains("void loop(") {
        return ExtractedCode {
            header: String::new(),
            source: content.to_string(),
        };
    }

    let lines: Vec<&str> = content.lines().collect();
    match lines
        .iter()
        .position(|l| DEFINITION_PREFIXES.iter().any(|p| l.starts_with(p)))
    {
        Some(split) if split > 0 => ExtractedCode {
            header: lines[..split].join("\n"),
            source: lines[split..].join("\n"),
        },
        _ => ExtractedCode {
            header: String::new(),
            source: content.to_string(),
        },
    }
}

fn largest_fenced_block(raw: &str) -> Option<&str> {
    raw.split("```")
        .skip(1)
        .step_by(2)
        .map(|block| match block.split_once('\n') {
            // The first line is the info string (`c`, `cpp`, ...).
            Some((_, body)) => body,
            None => block,
        })
        .filter(|body| !body.trim().is_empty())
        .max_by_key(|body| body.len())
}

/// Generates code for one module, identified as `code_agent:<module>`.
#[derive(Debug)]
pub struct CodeAgent {
    id: String,
    module_id: String,
}

impl CodeAgent {
    pub fn new(module_id: &str) -> Self {
        Self {
            id: item_agent_id(CODE_AGENT, module_id),
            module_id: module_id.to_string(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    fn architecture_context(&self, ctx: &RunContext) -> Result<Option<String>, AgentError> {
        ctx.authz().check_read(&self.id, ARCHITECTURE, None)?;
        let path = resource_dir(ctx.output_dir(), &Resource::kind_only(ARCHITECTURE))
            .join(ARCHITECTURE_FILE);
        match std::fs::read_to_string(&path) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("reading {}", path.display()))
                .into()),
        }
    }
}

#[async_trait]
impl Agent for CodeAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, ctx: &RunContext, input: &Value) -> Result<AgentResult, AgentError> {
        let target = ctx.params().target_profile.as_deref().unwrap_or("generic");
        let format = TargetFormat::classify(target);
        let module_type = input
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(&self.module_id);

        let query = match format.layout {
            CodeLayout::SingleFile => format!("{} firmware structure", format.framework),
            CodeLayout::Modular => format!("generate {module_type} module code"),
        };
        let mut context = Vec::new();
        if let Some(doc) = self.architecture_context(ctx)? {
            context.push(doc);
        }
        context.extend(retrieve(ctx, &query, Some(module_type)));

        let layout_rule = match format.layout {
            CodeLayout::SingleFile => format!(
                "Generate one .{} file. Framework: {}.",
                format.extension, format.framework
            ),
            CodeLayout::Modular => format!("Generate a .h/.c pair. Framework: {}.", format.framework),
        };
        let fields = PromptFields::new(&self.id)
            .with_constraints(format!("{}. {layout_rule} Return code only.", target_summary(ctx)))
            .with_context(context)
            .with_module(input.clone());
        let raw = generate(ctx, "code", &fields).await?;
        let code = extract_code(&raw);

        let resource = Resource::instance(MODULE_CODE, &self.module_id);
        let meta = Some(json!({
            "module_id": self.module_id,
            "framework": format.framework,
            "layout": format.layout,
        }));

        let files: Vec<(String, String)> = match format.layout {
            CodeLayout::SingleFile => {
                let body = [code.source, code.header]
                    .into_iter()
                    .find(|s| !s.trim().is_empty())
                    .unwrap_or(raw);
                vec![(format!("{}.{}", self.module_id, format.extension), body)]
            }
            CodeLayout::Modular => vec![
                (format!("{}.h", self.module_id), code.header),
                (format!("{}.c", self.module_id), code.source),
            ],
        };

        let mut written = Vec::with_capacity(files.len());
        for (name, body) in &files {
            let record = write_artifact(ctx, &self.id, &resource, name, body.as_bytes(), meta.clone())?;
            written.push(record);
        }

        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        let mut result = AgentResult::ok(format!(
            "{} module code generated: {}",
            format.framework,
            names.join(", ")
        ))
        .with_metadata(json!({
            "module_id": self.module_id,
            "framework": format.framework,
            "layout": format.layout,
            "files": written.iter().map(|r| r.path.display().to_string()).collect::<Vec<_>>(),
        }));
        if let Some(last) = written.last() {
            result = result.with_artifact(&last.path);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_single_file_targets() {
        assert_eq!(TargetFormat::classify("Arduino Uno").framework, "arduino");
        assert_eq!(TargetFormat::classify("ESP32-DevKitC").framework, "arduino-esp32");
        let pico = TargetFormat::classify("Raspberry Pi Pico");
        assert_eq!(pico.framework, "arduino-pico");
        assert_eq!(pico.layout, CodeLayout::SingleFile);
    }

    #[test]
    fn test_classify_modular_targets() {
        assert_eq!(TargetFormat::classify("STM32F401").framework, "hal");
        assert_eq!(TargetFormat::classify("nRF52840").framework, "nordic-sdk");
        assert_eq!(TargetFormat::classify("PIC32MX").framework, "harmony");
        let other = TargetFormat::classify("riscv-custom");
        assert_eq!(other.framework, "generic");
        assert_eq!(other.layout, CodeLayout::Modular);
    }

    #[test]
    fn test_extract_marked_sections() {
        let raw = "noise\n###HEADER###\nint f(void);\n###SOURCE###\nint f(void) { return 1; }\n";
        let code = extract_code(raw);
        assert_eq!(code.header, "int f(void);");
        assert_eq!(code.source, "int f(void) { return 1; }");
    }

    #[test]
    fn test_extract_prefers_largest_fence() {
        let raw = "```c\nint a;\n```\ntext\n```c\n#include <x.h>\nvoid setup() {}\nvoid loop() {}\n```";
        let code = extract_code(raw);
        assert!(code.header.is_empty());
        assert!(code.source.contains("void loop()"));
    }

    #[test]
    fn test_extract_json_object() {
        let code = extract_code(r#"{"header": "void g(void);", "source": "void g(void) {}"}"#);
        assert_eq!(code.header, "void g(void);");
        assert_eq!(code.source, "void g(void) {}");
    }

    #[test]
    fn test_extract_splits_at_first_definition() {
        let raw = "#include <stdint.h>\n#define N 4\nuint8_t buf[N];\nint main(void) { return 0; }";
        let code = extract_code(raw);
        assert_eq!(code.header, "#include <stdint.h>\n#define N 4");
        assert!(code.source.starts_with("uint8_t buf"));
    }

    #[test]
    fn test_extract_plain_text_is_source() {
        let code = extract_code("GENERATED (deterministic): hello");
        assert!(code.header.is_empty());
        assert_eq!(code.source, "GENERATED (deterministic): hello");
    }

    #[test]
    fn test_agent_id_is_item_scoped() {
        let agent = CodeAgent::new("imu");
        assert_eq!(agent.id(), "code_agent:imu");
        assert_eq!(agent.module_id(), "imu");
    }
}
