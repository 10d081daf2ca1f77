use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse advisor output: {source}\n  line: {line}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("advisor did not answer within {0} ms")]
    Timeout(u64),
}
