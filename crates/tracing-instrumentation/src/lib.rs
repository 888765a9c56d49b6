// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.


//! Process wide logging setup.

use std::fmt::Display;

use tracing::{info, Level};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

use tessera_types::config::{CommonOptions, LogFormat};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot parse log filter: {0}")]
    LogDirectiveParseError(#[from] ParseError),
    #[error("cannot install the global subscriber: {0}")]
    AlreadyInitialized(#[from] TryInitError),
    #[error("cannot reload the log filter: {0}")]
    Reload(#[from] tracing_subscriber::reload::Error),
}

fn build_filter(common_opts: &CommonOptions) -> Result<EnvFilter, Error> {
    Ok(EnvFilter::try_new(&common_opts.log_filter)?)
}

fn build_logging_layer<S>(common_opts: &CommonOptions) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    let ansi = !common_opts.log_disable_ansi_codes;
    match common_opts.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_writer(
                // Write WARN and ERR to stderr, everything else to stdout
                std::io::stderr
                    .with_max_level(Level::WARN)
                    .or_else(std::io::stdout),
            )
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(ansi)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .boxed(),
    }
}

/// Installs the global logging subscriber. The returned [`TracingGuard`] allows changing the
/// log filter of the running process.
///
/// Fails if a global subscriber is installed already.
pub fn init_tracing_and_logging(
    common_opts: &CommonOptions,
    service_name: impl Display,
) -> Result<TracingGuard, Error> {
    let (filter, reload_handle) =
        tracing_subscriber::reload::Layer::new(build_filter(common_opts)?);

    tracing_subscriber::registry()
        .with(build_logging_layer(common_opts).with_filter(filter))
        .try_init()?;

    info!(
        service = %service_name,
        node = common_opts.node_name(),
        filter = %common_opts.log_filter,
        "Logging initialized"
    );
    Ok(TracingGuard { reload_handle })
}

#[derive(Debug)]
pub struct TracingGuard {
    reload_handle: Handle<EnvFilter, Registry>,
}

impl TracingGuard {
    /// Replaces the active log filter. An invalid filter leaves the active one in place.
    pub fn reload_log_filter(&self, common_opts: &CommonOptions) -> Result<(), Error> {
        let filter = build_filter(common_opts)?;
        info!("Setting log filter to '{}'", common_opts.log_filter);
        self.reload_handle.reload(filter)?;
        Ok(())
    }
}
