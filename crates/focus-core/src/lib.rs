pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod error;
pub mod filter;
pub mod render;
pub mod session;
pub mod store;
pub mod subscription;
pub mod task;
pub mod view_model;

use std::ffi::OsString;
use std::io;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::backend::Backend;
use crate::config::BackendConfig;
use crate::view_model::{
  Capability,
  ViewModel
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    headless = cli.headless,
    "starting focus"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.focusrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let interactive = !cli.headless
    && cfg
      .get_bool("ui.interactive")
      .unwrap_or(true);
  let capability = if interactive {
    Capability::Interactive
  } else {
    Capability::NonInteractive
  };

  let vm =
    ViewModel::new(capability, || {
      let backend_cfg =
        BackendConfig::resolve(&cfg)?;
      Backend::connect(
        &backend_cfg,
        &data_dir
      )
    });

  let renderer =
    render::Renderer::new(&cfg)?;
  let mut stdout = io::stdout().lock();

  if capability
    == Capability::NonInteractive
  {
    renderer.print_view(
      &mut stdout,
      &vm.state(),
      Utc::now()
    )?;
    info!("done");
    return Ok(());
  }

  commands::repl(
    &vm,
    &renderer,
    io::stdin().lock(),
    &mut stdout
  )?;

  info!("done");
  Ok(())
}
