//! Language registry and code templates
//!
//! Maps a language identifier to its interpreter command, file extension,
//! wrapping template, and environment allow-list. The registry itself is
//! loaded once from a TOML file at startup and is pure lookup afterwards;
//! template files are read from disk when a request is rendered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::error::RunnerError;

/// Placeholder the user's code is rendered into
const CODE_PLACEHOLDER: &str = "{{code}}";

/// Configuration for a supported language
#[derive(Debug, Clone)]
pub struct LanguageSpec {
    /// Canonical language name (lowercase)
    pub name: String,
    /// Extension of the entry script (e.g. "py")
    pub extension: String,
    /// Interpreter command, resolved on the host PATH inside the sandbox
    pub interpreter: Vec<String>,
    /// Template file the user's code is rendered into
    pub template_path: PathBuf,
    /// Spaces prepended to each user code line inside the template
    pub indent: usize,
    /// Environment allow-list (KEY=VALUE) passed into the sandbox
    pub env: Vec<String>,
}

impl LanguageSpec {
    /// Read the wrapping template and render the user's code into its
    /// placeholder, indenting each non-empty line to fit the template's
    /// surrounding block.
    pub fn render(&self, code: &str) -> Result<String, RunnerError> {
        let template = std::fs::read_to_string(&self.template_path)
            .map_err(|_| RunnerError::TemplateNotFound(self.name.clone()))?;

        let pad = " ".repeat(self.indent);
        let indented = code
            .lines()
            .map(|line| {
                if line.is_empty() {
                    line.to_string()
                } else {
                    format!("{}{}", pad, line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(template.replace(CODE_PLACEHOLDER, &indented))
    }

    /// Name of the entry script inside the sandbox code directory
    pub fn script_name(&self) -> String {
        format!("script.{}", self.extension)
    }
}

/// Raw TOML entry for a language
#[derive(Debug, Deserialize)]
struct RawLanguageSpec {
    extension: String,
    interpreter: String,
    template: String,
    #[serde(default)]
    indent: usize,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default)]
    aliases: Vec<String>,
}

/// Registry of supported languages, keyed by name and alias
pub struct LanguageRegistry {
    languages: HashMap<String, LanguageSpec>,
}

impl LanguageRegistry {
    /// Load the registry from a TOML file. Template paths in the file are
    /// resolved relative to the file's own directory and validated once, so
    /// a broken registry fails startup rather than the first request.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read language registry {:?}", path))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, base)
    }

    fn parse(content: &str, base: &Path) -> anyhow::Result<Self> {
        let raw_specs: HashMap<String, RawLanguageSpec> = toml::from_str(content)?;

        let mut languages = HashMap::new();
        for (name, raw) in raw_specs {
            let template_path = base.join(&raw.template);
            let template = std::fs::read_to_string(&template_path).with_context(|| {
                format!("Failed to read template {:?} for {}", template_path, name)
            })?;
            if !template.contains(CODE_PLACEHOLDER) {
                anyhow::bail!("Template for {} is missing the code placeholder", name);
            }
            if raw.interpreter.trim().is_empty() {
                anyhow::bail!("Interpreter command for {} is empty", name);
            }

            let spec = LanguageSpec {
                name: name.to_lowercase(),
                extension: raw.extension,
                interpreter: raw
                    .interpreter
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                template_path,
                indent: raw.indent,
                env: raw.env,
            };

            for alias in &raw.aliases {
                languages.insert(alias.to_lowercase(), spec.clone());
            }
            languages.insert(spec.name.clone(), spec);
        }

        Ok(Self { languages })
    }

    /// Look up a language by name or alias. Fails closed: an unknown
    /// identifier never reaches the sandbox builder.
    pub fn get(&self, language: &str) -> Result<&LanguageSpec, RunnerError> {
        self.languages
            .get(&language.to_lowercase())
            .ok_or_else(|| RunnerError::UnsupportedLanguage(language.to_string()))
    }

    /// Canonical names of all supported languages
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .languages
            .values()
            .map(|spec| spec.name.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture_registry() -> (TempDir, LanguageRegistry) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("templates")).unwrap();
        fs::write(
            dir.path().join("templates/fake.py"),
            "def main(args):\n{{code}}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("languages.toml"),
            r#"
[python]
extension = "py"
interpreter = "python3 -u"
template = "templates/fake.py"
indent = 4
env = ["PYTHONDONTWRITEBYTECODE=1"]
aliases = ["py", "python3"]
"#,
        )
        .unwrap();
        let registry = LanguageRegistry::load(&dir.path().join("languages.toml")).unwrap();
        (dir, registry)
    }

    #[test]
    fn lookup_is_case_insensitive_and_alias_aware() {
        let (_dir, registry) = fixture_registry();
        assert!(registry.get("Python").is_ok());
        assert!(registry.get("py").is_ok());
        assert_eq!(registry.get("python3").unwrap().name, "python");
    }

    #[test]
    fn unknown_language_fails_closed() {
        let (_dir, registry) = fixture_registry();
        let err = registry.get("cobol").unwrap_err();
        assert!(matches!(err, RunnerError::UnsupportedLanguage(_)));
    }

    #[test]
    fn render_indents_every_code_line() {
        let (_dir, registry) = fixture_registry();
        let spec = registry.get("python").unwrap();
        let rendered = spec.render("x = 1\n\nprint(x)").unwrap();
        assert!(rendered.contains("    x = 1"));
        assert!(rendered.contains("    print(x)"));
        // Blank lines stay blank
        assert!(rendered.contains("    x = 1\n\n    print(x)"));
        assert!(!rendered.contains("{{code}}"));
    }

    #[test]
    fn render_reports_missing_template() {
        let (dir, registry) = fixture_registry();
        fs::remove_file(dir.path().join("templates/fake.py")).unwrap();
        let spec = registry.get("python").unwrap();
        let err = spec.render("print(1)").unwrap_err();
        assert!(matches!(err, RunnerError::TemplateNotFound(_)));
    }

    #[test]
    fn interpreter_command_is_split() {
        let (_dir, registry) = fixture_registry();
        let spec = registry.get("python").unwrap();
        assert_eq!(spec.interpreter, vec!["python3", "-u"]);
        assert_eq!(spec.script_name(), "script.py");
    }

    #[test]
    fn registry_rejects_template_without_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.py"), "print('no placeholder')\n").unwrap();
        fs::write(
            dir.path().join("languages.toml"),
            r#"
[python]
extension = "py"
interpreter = "python3"
template = "broken.py"
"#,
        )
        .unwrap();
        assert!(LanguageRegistry::load(&dir.path().join("languages.toml")).is_err());
    }

    #[test]
    fn shipped_registry_loads() {
        let registry = testing::shipped_registry();
        assert!(registry.get("python").is_ok());
        assert!(registry.get("php").is_ok());
    }
}
