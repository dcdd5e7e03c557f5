mod app;
mod cli;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use flux::provider::Registry;
use flux::{config, paths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let candidates = match args.config.clone() {
        Some(p) => vec![p],
        None => paths::config_candidates()?,
    };
    let cfg = config::Config::load(&candidates)?;
    tracing::debug!(?candidates, provider = cfg.provider_name(), "resolved config");

    let registry = Registry::builtin();
    let http = app::build_http(&cfg)?;

    match args.cmd {
        Some(cli::Command::Providers) => {
            return app::list_providers(&registry, &cfg, &mut std::io::stdout());
        }
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => {
            let rt = app::build_runtime(
                &registry,
                &http,
                &cfg,
                args.provider.as_deref(),
                args.model.as_deref(),
                args.system.as_deref(),
            )?;
            return tui::run_tui(rt).await;
        }
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: flux \"Hello\" or `flux tui`");
    }

    let rt = app::build_runtime(
        &registry,
        &http,
        &cfg,
        args.provider.as_deref(),
        args.model.as_deref(),
        args.system.as_deref(),
    )
    .context("could not prepare provider")?;

    let mut stdout = std::io::stdout();
    if args.no_stream {
        app::run_complete(rt, prompt, &mut stdout).await
    } else {
        app::run_streaming(rt, prompt, &mut stdout).await
    }
}
