use std::net::SocketAddr;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Reads `DATABASE_URL` and `BIND_ADDR`, falling back to local defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://tasks.db".to_string());
        let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3000".to_string());
        let bind_addr = bind_addr.parse().with_context(|| format!("invalid BIND_ADDR {bind_addr:?}"))?;
        Ok(Self { database_url, bind_addr })
    }
}

/// Makes sure a file-backed SQLite URL points at a file that can be opened.
pub fn prepare_sqlite_file(database_url: &str) -> anyhow::Result<()> {
    if database_url.contains(":memory:") { return Ok(()); }
    if let Some(path) = database_url.strip_prefix("sqlite://") {
        // On Windows, absolute paths may look like /C:/path; strip the leading slash
        let path = if cfg!(windows) && path.len() >= 3 && path.as_bytes()[0] == b'/' && path.as_bytes()[2] == b':' {
            &path[1..]
        } else {
            path
        };
        use std::{fs, fs::OpenOptions, path::Path};
        let p = Path::new(path);
        if let Some(parent) = p.parent() { if !parent.as_os_str().is_empty() { fs::create_dir_all(parent)?; } }
        if !p.exists() {
            OpenOptions::new().create(true).append(true).open(p)
                .with_context(|| format!("cannot create database file {}", p.display()))?;
        }
    }
    Ok(())
}
