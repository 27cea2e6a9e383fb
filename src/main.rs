//!
//! projectdesk server binary
//! -------------------------
//! Command-line entry point. Configuration comes from environment variables
//! (see `projectdesk::config`); a few CLI flags override them.

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use projectdesk::config::Settings;

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag
            && i + 1 < args.len() {
                return args[i + 1].parse::<u16>().ok();
            }
        i += 1;
    }
    None
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

const USAGE: &str = "projectdesk\n\nUSAGE:\n  projectdesk [--port N] [--memory] [--secure-cookies]\n\nOPTIONS:\n  --port N            HTTP port (env: PROJECTDESK_HTTP_PORT, default 8000)\n  --memory            Use the in-memory store instead of PostgreSQL (env: PROJECTDESK_STORE=memory)\n  --secure-cookies    Issue cookies with the Secure flag (env: COOKIE_SECURE)\n\nENVIRONMENT:\n  AUTH_SECRET         Cookie signing key (required)\n  DATABASE_URL        PostgreSQL connection string (required unless --memory)\n  COOKIE_MAX_AGE_DAYS Session lifetime in days (default 30)\n";

#[tokio::main]
async fn main() -> Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    // CLI flags override the environment. `--memory` must apply before
    // validation, otherwise a missing DATABASE_URL would abort start-up.
    let memory = has_flag(&args, "--memory");
    let mut settings = Settings::from_lookup(|name| {
        if memory && name == "PROJECTDESK_STORE" {
            return Some("memory".to_string());
        }
        std::env::var(name).ok()
    })?;
    if let Some(port) = parse_port_arg(&args, "--port") {
        settings.http_port = port;
    }
    if has_flag(&args, "--secure-cookies") {
        settings.cookie_secure = true;
    }
    settings.validate()?;

    info!(
        target: "projectdesk",
        "projectdesk starting: http_port={}, store={:?}, secure_cookies={}",
        settings.http_port,
        settings.backend,
        settings.cookie_secure
    );

    projectdesk::server::run(settings).await
}
