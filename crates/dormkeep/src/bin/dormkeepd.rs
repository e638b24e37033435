//! dormkeepd: the Dormkeep allocation service.

use std::time::Duration;

use clap::Parser;
use dormkeep::logging::{self, LogFormat};
use dormkeep::prelude::*;

#[derive(Parser)]
#[command(name = "dormkeepd")]
#[command(about = "Dormitory room allocation service", long_about = None)]
#[command(version)]
struct Cli {
    /// Listen address
    #[arg(long, env = "DORMKEEP_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// How long one operation may wait for its locks
    #[arg(long, env = "DORMKEEP_LOCK_TIMEOUT_MS", default_value_t = 3000)]
    lock_timeout_ms: u64,

    /// How long a new client has to say Hello
    #[arg(long, env = "DORMKEEP_HANDSHAKE_TIMEOUT_MS", default_value_t = 5000)]
    handshake_timeout_ms: u64,

    /// Close connections silent for this long
    #[arg(long, env = "DORMKEEP_IDLE_TIMEOUT_SECS", default_value_t = 300)]
    idle_timeout_secs: u64,

    /// Who may change rooms and students
    #[arg(long, value_enum, env = "DORMKEEP_ACCESS", default_value_t = AccessPolicy::AdminWrites)]
    access: AccessPolicy,

    /// Token granting the admin role
    #[arg(long, env = "DORMKEEP_ADMIN_TOKEN")]
    admin_token: Option<String>,

    /// Student token as NAME:TOKEN (repeatable)
    #[arg(long, env = "DORMKEEP_STUDENT_TOKENS", value_delimiter = ',', value_parser = parse_student_token)]
    student_token: Vec<(String, String)>,

    /// Log output format
    #[arg(long, value_enum, env = "DORMKEEP_LOG_FORMAT", default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn parse_student_token(value: &str) -> Result<(String, String), String> {
    match value.split_once(':') {
        Some((name, token)) if !name.is_empty() && !token.is_empty() => {
            Ok((name.to_string(), token.to_string()))
        }
        _ => Err(format!("expected NAME:TOKEN, got {value:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), DormkeepError> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    let mut auth = TokenAuthenticator::new();
    match cli.admin_token {
        Some(token) => auth = auth.with_token(token, Caller::admin("admin")),
        None if cli.access == AccessPolicy::AdminWrites => {
            tracing::warn!("no --admin-token given; every mutation will be refused");
        }
        None => {}
    }
    for (name, token) in cli.student_token {
        auth = auth.with_token(token, Caller::student(name));
    }
    if auth.is_empty() {
        tracing::warn!("no tokens configured; every handshake will be refused");
    }

    let engine = EngineConfig {
        lock_timeout: Duration::from_millis(cli.lock_timeout_ms),
        ..EngineConfig::default()
    };
    let server = DormkeepServer::builder()
        .bind(&cli.bind)
        .handshake_timeout(Duration::from_millis(cli.handshake_timeout_ms))
        .idle_timeout(Duration::from_secs(cli.idle_timeout_secs))
        .access(cli.access)
        .engine_config(engine)
        .build(auth)
        .await?;

    if let Ok(addr) = server.local_addr() {
        tracing::info!(%addr, version = env!("CARGO_PKG_VERSION"), "dormkeepd listening");
    }

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_token_parsing() {
        assert_eq!(
            parse_student_token("ada:k1"),
            Ok(("ada".to_string(), "k1".to_string()))
        );
        assert!(parse_student_token("ada").is_err());
        assert!(parse_student_token(":k1").is_err());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["dormkeepd"]);
        assert_eq!(cli.bind, "127.0.0.1:8080");
        assert_eq!(cli.access, AccessPolicy::AdminWrites);
        assert_eq!(cli.log_format, LogFormat::Pretty);
        assert!(cli.student_token.is_empty());
    }

    #[test]
    fn test_cli_repeated_student_tokens() {
        let cli = Cli::parse_from([
            "dormkeepd",
            "--access",
            "open",
            "--student-token",
            "ada:k1,bob:k2",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.access, AccessPolicy::Open);
        assert_eq!(cli.student_token.len(), 2);
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
