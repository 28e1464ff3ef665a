// SPDX-License-Identifier: GPL-3.0-only

use clap::Parser as _;
use smtpd_config::Settings;
use smtpd_server::Server;
use smtpd_spf::TrustDnsResolver;
use smtpd_storage::Storage;
use std::path::PathBuf;

/// Inbound SMTP receiver.
#[derive(clap::Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "./config.conf")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config);
    tracing::info!(?settings, "configuration loaded");

    let mut storage = Storage::new(settings.db_conn_str.clone());
    if !storage.connect().await {
        tracing::error!("failed to connect to database, exiting");
        std::process::exit(1);
    }
    storage.init_prepared_statements();

    let resolver = TrustDnsResolver::from_system_conf()?;
    let server = Server::new(settings, resolver, storage);
    server.run().await
}
