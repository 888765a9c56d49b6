// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.


use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use figment::providers::Serialized;
use figment::Figment;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tessera_core::network::RpcServerBuilder;
use tessera_partition_server::{LocalStoreFactory, Server, StaticCoordinator};
use tessera_tracing_instrumentation::init_tracing_and_logging;
use tessera_types::config::Configuration;
use tessera_types::config_loader::ConfigLoaderBuilder;
use tessera_types::partition::Replica;

mod signal;

const EXIT_CODE_FAILURE: i32 = 1;

#[derive(Debug, clap::Parser)]
#[command(author, version, about)]
struct TesseraArguments {
    /// Set a configuration file to use for the server.
    #[arg(
        short,
        long = "config-file",
        env = "TESSERA_CONFIG",
        value_name = "FILE"
    )]
    config_file: Option<PathBuf>,

    /// Dumps the loaded configuration (or default if no config-file is set) to stdout and exits.
    /// Defaults will include any values overridden by environment variables.
    #[clap(long)]
    dump_config: bool,

    #[clap(flatten)]
    overrides: CliOverrides,
}

/// Command line values that take precedence over the configuration file and the environment.
#[derive(Debug, Clone, Default, clap::Args, Serialize)]
#[serde(rename_all = "kebab-case")]
struct CliOverrides {
    /// Unique name of this node.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    node_name: Option<String>,

    /// Raft level identity of this node.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    node_id: Option<u64>,

    #[arg(long, value_name = "DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    base_dir: Option<PathBuf>,

    #[clap(flatten)]
    partition_server: PartitionServerOverrides,
}

#[derive(Debug, Clone, Default, clap::Args, Serialize)]
#[serde(rename_all = "kebab-case")]
struct PartitionServerOverrides {
    /// Address the partition server listens on.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    bind_address: Option<SocketAddr>,

    /// Directory holding the hosted partitions.
    #[arg(long, value_name = "DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    data_dir: Option<PathBuf>,
}

fn main() {
    let cli_args = TesseraArguments::parse();

    let config_loader = ConfigLoaderBuilder::default()
        .load_env(true)
        .path(cli_args.config_file.clone())
        .overrides(Figment::from(Serialized::defaults(&cli_args.overrides)))
        .build();
    let config = match config_loader
        .map_err(anyhow::Error::from)
        .and_then(|loader| Ok(loader.load_once()?))
    {
        Ok(config) => config,
        Err(err) => {
            // We cannot use tracing here as it's not configured yet
            eprintln!("{err:#}");
            std::process::exit(EXIT_CODE_FAILURE);
        }
    };

    if cli_args.dump_config {
        match config.dump() {
            Ok(dump) => {
                println!("{dump}");
                std::process::exit(0);
            }
            Err(err) => {
                eprintln!("Cannot dump configuration: {err}");
                std::process::exit(EXIT_CODE_FAILURE);
            }
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tessera")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to build Tokio runtime: {err}");
            std::process::exit(EXIT_CODE_FAILURE);
        }
    };

    if let Err(err) = runtime.block_on(run(config)) {
        // logging may not be set up if the failure happened early
        eprintln!("tessera server failed: {err:#}");
        std::process::exit(EXIT_CODE_FAILURE);
    }
}

async fn run(config: Configuration) -> anyhow::Result<()> {
    let _tracing_guard = init_tracing_and_logging(&config.common, "tessera-server")?;

    info!("Starting tessera server {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration dump (MAY CONTAIN SENSITIVE DATA!):\n{}",
        config.dump().map_err(|err| anyhow::anyhow!(err))?
    );

    let node_id = config.common.node_id;
    let coordinator = StaticCoordinator::new(
        config
            .partition_server
            .static_peers
            .iter()
            .cloned()
            .chain([Replica::new(node_id, config.advertised_address())]),
    );
    let server = Server::new(
        &config,
        Arc::new(LocalStoreFactory::new(node_id)),
        Arc::new(coordinator),
    );

    let mut builder = RpcServerBuilder::new(config.networking.clone());
    server.start(&mut builder);
    let rpc_server = builder.build();

    let bind_address = config.partition_server.bind_address;
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("cannot bind partition server to {bind_address}"))?;

    let cancel = CancellationToken::new();
    let mut serving = tokio::spawn(rpc_server.serve(listener, cancel.clone()));

    let finished = tokio::select! {
        _ = signal::shutdown() => None,
        () = signal::sigusr1_dump_config(&config) => None,
        result = &mut serving => Some(result),
    };

    cancel.cancel();
    let drain = async {
        server.shutdown().await;
        let result = match finished {
            Some(result) => result,
            None => serving.await,
        };
        anyhow::Ok(result??)
    };

    match tokio::time::timeout(config.common.shutdown_grace_period(), drain).await {
        Ok(result) => {
            result.context("partition server stopped unexpectedly")?;
            info!("tessera server has been gracefully shut down.");
        }
        Err(_) => warn!("Could not gracefully shut down tessera server, terminating now."),
    }
    Ok(())
}
