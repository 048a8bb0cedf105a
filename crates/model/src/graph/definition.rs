use serde::{Deserialize, Serialize};

/// Immutable description of one transformation: steps and the hops
/// between them. Loaded once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub name: String,
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub hops: Vec<HopDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    /// Registry identifier of the step implementation, e.g. `text-file-input`.
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default = "default_copies")]
    pub copies: u32,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

fn default_copies() -> u32 {
    1
}

/// Per-step tolerance for row-level errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHandling {
    /// Number of row errors tolerated before the step fails. `None` fails on
    /// the first error.
    #[serde(default)]
    pub max_errors: Option<u64>,
    #[serde(default)]
    pub max_percent_errors: Option<u32>,
    /// Rows that must be read before the percentage check applies.
    #[serde(default)]
    pub min_rows_for_percent: u64,
}

impl ErrorHandling {
    pub fn tolerated_errors(&self) -> u64 {
        self.max_errors.unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopDefinition {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: HopKind,
    #[serde(default)]
    pub distribution: Distribution,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopKind {
    #[default]
    Data,
    Info,
    Error,
}

/// How rows leaving a producer copy are spread over consumer copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum Distribution {
    CopyToAll,
    #[default]
    RoundRobin,
    KeyPartitioned { fields: Vec<String> },
}

impl Distribution {
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Distribution::KeyPartitioned { .. })
    }
}

impl HopDefinition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: HopKind::Data,
            distribution: Distribution::RoundRobin,
            enabled: true,
        }
    }

    pub fn kind(mut self, kind: HopKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    /// Info hops always replicate: every consumer copy needs the full lookup stream.
    pub fn effective_distribution(&self) -> Distribution {
        match self.kind {
            HopKind::Info => Distribution::CopyToAll,
            _ => self.distribution.clone(),
        }
    }
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            step_type: step_type.into(),
            copies: 1,
            config: serde_json::Value::Null,
            error_handling: ErrorHandling::default(),
        }
    }

    pub fn copies(mut self, copies: u32) -> Self {
        self.copies = copies;
        self
    }

    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn error_handling(mut self, error_handling: ErrorHandling) -> Self {
        self.error_handling = error_handling;
        self
    }
}

impl GraphDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            hops: Vec::new(),
        }
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn hop(mut self, hop: HopDefinition) -> Self {
        self.hops.push(hop);
        self
    }

    pub fn find_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn enabled_hops(&self) -> impl Iterator<Item = &HopDefinition> {
        self.hops.iter().filter(|h| h.enabled)
    }

    pub fn incoming<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a HopDefinition> {
        self.enabled_hops().filter(move |h| h.to == step)
    }

    pub fn outgoing<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a HopDefinition> {
        self.enabled_hops().filter(move |h| h.from == step)
    }

    /// A step with no enabled incoming hops of any kind.
    pub fn is_source(&self, step: &str) -> bool {
        self.incoming(step).next().is_none()
    }

    /// Steps whose incoming data hop is key-partitioned; their copy count is
    /// their partition count.
    pub fn partitioned_steps(&self) -> Vec<&StepDefinition> {
        self.steps
            .iter()
            .filter(|s| {
                self.incoming(&s.name)
                    .any(|h| h.kind == HopKind::Data && h.distribution.is_partitioned())
            })
            .collect()
    }

    /// Stable content digest of the canonical JSON form.
    pub fn hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }
}
