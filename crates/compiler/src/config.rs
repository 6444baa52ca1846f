//! Compiler configuration
//!
//! Lets embedders extend the type checker with external function
//! signatures (runtime helpers, kernel exports) without modifying the
//! builtin table, and carries the debug-dump switches the driver wires
//! up. Configurations load from TOML:
//!
//! ```toml
//! [[external]]
//! name = "printk"
//! returns = "int"
//! params = ["char*"]
//! ```

use crate::symbols::FunctionSignature;
use crate::types::{BaseType, Type};
use serde::Deserialize;
use std::path::Path;

/// An externally provided function the checker should accept calls to.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalFunction {
    /// Name as it appears in source
    pub name: String,
    /// Return type spelling, e.g. `"int"`, `"void*"`
    #[serde(default = "default_returns")]
    pub returns: String,
    /// Parameter type spellings, in order
    #[serde(default)]
    pub params: Vec<String>,
}

fn default_returns() -> String {
    "int".to_string()
}

/// Parse a type spelling like `"char*"` or `"struct file**"`.
fn parse_spelling(spelling: &str) -> Type {
    let trimmed = spelling.trim();
    let pointer_count = trimmed.chars().rev().take_while(|c| *c == '*').count();
    let base = trimmed[..trimmed.len() - pointer_count].trim();
    if let Some(tag) = base.strip_prefix("struct ") {
        return Type::structure(tag.trim(), pointer_count);
    }
    let base_type = match base {
        "char" => BaseType::Char,
        "void" => BaseType::Void,
        "long" => BaseType::Long,
        "float" => BaseType::Float,
        "double" => BaseType::Double,
        _ => BaseType::Int,
    };
    Type::pointer_to(base_type, pointer_count)
}

impl ExternalFunction {
    pub fn signature(&self) -> FunctionSignature {
        FunctionSignature {
            return_type: parse_spelling(&self.returns),
            params: self.params.iter().map(|p| parse_spelling(p)).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompilerConfig {
    /// External functions registered before analysis
    #[serde(rename = "external", default)]
    pub external_functions: Vec<ExternalFunction>,
    /// Dump the IR module rendering to the driver
    #[serde(default)]
    pub dump_ir: bool,
    /// Dump the assembly text to the driver
    #[serde(default)]
    pub dump_asm: bool,
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_external(mut self, external: ExternalFunction) -> Self {
        self.external_functions.push(external);
        self
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| format!("Failed to parse compiler config: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config '{}': {}", path.display(), e))?;
        Self::from_toml(&content)
    }
}
