use thiserror::Error;

pub const ENV_PREFIX: &str = "PARLEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Invalid server address: {0}")]
    InvalidAddress(#[from] std::net::AddrParseError),
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets the given setting.
///
/// Accepts a dotted path (`dial.endpoint`) or the bare field name serde reports
/// when a required value is missing.
pub fn to_env_var(field: &str) -> String {
    let path = match field {
        "dial" | "endpoint" => "dial.endpoint",
        "mcp_url" => "code_interpreter.mcp_url",
        other => other,
    };
    let key = path
        .split('.')
        .map(str::to_uppercase)
        .collect::<Vec<_>>()
        .join("__");
    format!("{}_{}", ENV_PREFIX, key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("dial.endpoint"), "PARLEY_DIAL__ENDPOINT");
        assert_eq!(to_env_var("endpoint"), "PARLEY_DIAL__ENDPOINT");
        assert_eq!(to_env_var("mcp_url"), "PARLEY_CODE_INTERPRETER__MCP_URL");
        assert_eq!(to_env_var("server.port"), "PARLEY_SERVER__PORT");
    }
}
