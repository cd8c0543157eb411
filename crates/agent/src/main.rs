// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use agent_core::agent_info::AgentInfo;
use agent_core::communicator::Credentials;
use agent_core::config::{AgentConfig, Cli};
use agent_core::http::HttpClient;
use agent_core::instance;
use agent_core::persistence::SqlitePersistence;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = rustls::crypto::ring::default_provider().install_default() {
        error!("failed to install rustls crypto provider: {err:?}");
        std::process::exit(1);
    }

    if let Err(err) = cli.validate() {
        error!("{err}");
        std::process::exit(1);
    }

    let result = run(cli).await;
    if let Err(err) = result {
        error!("fatal: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config_file {
        Some(path) => AgentConfig::load(path)?,
        None => AgentConfig::default(),
    };

    if cli.status {
        let status = instance::get_agent_status(&config.agent.path.run)?;
        println!("{status}");
        return Ok(());
    }

    if cli.register_agent {
        return register_agent(&cli, &config).await;
    }

    let credentials = Credentials::UuidAndKey {
        uuid: agent_uuid(&config).await?,
        key: agent_key(&config).await?,
    };

    // A "restart" control command tears the agent down and brings a fresh
    // one up in its place rather than exiting the process (§4.I).
    loop {
        let agent = agent_core::Agent::start(config.clone(), credentials.clone()).await?;
        let restart = agent.run_until_stopped().await;
        agent.shutdown().await;
        if !restart {
            break;
        }
    }
    Ok(())
}

async fn register_agent(cli: &Cli, config: &AgentConfig) -> anyhow::Result<()> {
    let url = cli.url.as_deref().unwrap_or(&config.agent.server_url);
    let user = cli.user.as_deref().unwrap_or_default();
    let password = cli.password.as_deref().unwrap_or_default();

    std::fs::create_dir_all(&config.agent.path.data)?;
    let persistence = SqlitePersistence::open(&config.agent.path.data.join("agent.db"))?;
    let info = AgentInfo::new(persistence).await?;

    info.set_key(cli.key.as_deref()).await?;
    if let Some(name) = &cli.name {
        info.set_name(name).await?;
    }

    let http = HttpClient::new();
    info.enroll(&http, url, user, password).await?;
    println!("agent enrolled successfully");
    Ok(())
}

async fn agent_uuid(config: &AgentConfig) -> anyhow::Result<String> {
    let persistence = SqlitePersistence::open(&config.agent.path.data.join("agent.db"))?;
    let info = AgentInfo::new(persistence).await?;
    info.uuid().await?.ok_or_else(|| anyhow::anyhow!("agent has not been enrolled"))
}

async fn agent_key(config: &AgentConfig) -> anyhow::Result<String> {
    let persistence = SqlitePersistence::open(&config.agent.path.data.join("agent.db"))?;
    let info = AgentInfo::new(persistence).await?;
    info.key().await?.ok_or_else(|| anyhow::anyhow!("agent has not been enrolled"))
}
