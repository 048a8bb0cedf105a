use crate::settings::error::SettingsError;
use std::{collections::HashMap, fs, path::Path};

/// Variables available to `${NAME}` references in graph and settings files:
/// the process environment, optionally extended by a `.env` file.
#[derive(Debug, Clone, Default)]
pub struct EnvVars {
    vars: HashMap<String, String>,
}

impl EnvVars {
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    pub fn from_map(vars: HashMap<String, String>) -> Self {
        Self { vars }
    }

    /// Loads `KEY=VALUE` lines; later definitions override earlier ones.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        self.parse(&content)
            .map_err(|reason| SettingsError::EnvFile {
                path: path.display().to_string(),
                reason,
            })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Expands every `${NAME}`; `$$` is a literal `$`. All undefined names
    /// are reported together.
    pub fn substitute(&self, input: &str) -> Result<String, SettingsError> {
        let mut out = String::with_capacity(input.len());
        let mut missing = Vec::new();
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            if let Some(after) = tail.strip_prefix("$$") {
                out.push('$');
                rest = after;
            } else if let Some((body, end)) = tail
                .strip_prefix("${")
                .and_then(|body| body.find('}').map(|end| (body, end)))
            {
                let name = &body[..end];
                match self.vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => missing.push(name.to_string()),
                }
                rest = &body[end + 1..];
            } else {
                out.push('$');
                rest = &tail[1..];
            }
        }
        out.push_str(rest);

        if missing.is_empty() {
            Ok(out)
        } else {
            missing.sort();
            missing.dedup();
            Err(SettingsError::UndefinedVariables(missing))
        }
    }

    fn parse(&mut self, content: &str) -> Result<(), String> {
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(format!(
                    "malformed line {} (expected KEY=VALUE)",
                    line_num + 1
                ));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(format!("empty key at line {}", line_num + 1));
            }
            self.vars.insert(key.to_string(), unquote(value));
        }
        Ok(())
    }
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_values_and_comments() {
        let mut env = EnvVars::default();
        env.parse(
            r#"
# Comment
QUOTED="value with spaces"
SINGLE='single quoted'
UNQUOTED=no_spaces
        "#,
        )
        .unwrap();
        assert_eq!(env.get("QUOTED"), Some("value with spaces"));
        assert_eq!(env.get("SINGLE"), Some("single quoted"));
        assert_eq!(env.get("UNQUOTED"), Some("no_spaces"));
        assert!(env.parse("INVALID LINE WITHOUT EQUALS").is_err());
    }

    #[test]
    fn substitutes_variables() {
        let mut env = EnvVars::default();
        env.set("DIR", "/data");
        assert_eq!(
            env.substitute("${DIR}/in.csv costs $$5 and $x").unwrap(),
            "/data/in.csv costs $5 and $x"
        );
        match env.substitute("${A}/${B}/${A}") {
            Err(SettingsError::UndefinedVariables(names)) => {
                assert_eq!(names, vec!["A".to_string(), "B".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
