use thiserror::Error;

pub type Result<T, E = GrammarError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("syntax error in [{intent}] line {line}: {message}")]
    Syntax {
        intent: String,
        line: usize,
        message: String,
    },
    #[error("unresolved reference {reference} in [{intent}]")]
    UnresolvedReference { reference: String, intent: String },
    #[error("cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
    #[error("malformed path: {0}")]
    MalformedPath(String),
    #[error("path enumeration exhausted: {0}")]
    Exhaustion(String),
    #[error("missing compiled automaton for {0}")]
    MissingArtifact(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("config error: {0}")]
    Config(String),
}

impl GrammarError {
    pub(crate) fn syntax(intent: &str, line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            intent: intent.to_string(),
            line,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for GrammarError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GrammarError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for GrammarError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<regex::Error> for GrammarError {
    fn from(err: regex::Error) -> Self {
        Self::Config(err.to_string())
    }
}
