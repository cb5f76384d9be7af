use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pocket_sync::app::{self, AppContext};
use pocket_sync::cli::commands::{self, ListFilter};
use pocket_sync::cli::{Cli, Commands};
use pocket_sync::config::Config;
use pocket_sync::domain::MutationOp;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let data_dir = match cli.data_dir.clone() {
        Some(dir) => dir,
        None => AppContext::default_data_dir()?,
    };

    // Must work even when the cache cannot be opened.
    if let Commands::Reset { yes } = cli.command {
        commands::reset(&data_dir, yes)?;
        return Ok(());
    }

    let ctx = AppContext::new(config, Some(data_dir))?;
    let result = run(&ctx, &cli.command).await;
    let closed = ctx.shutdown().await;
    app::keep_command_error(result, closed)?;

    Ok(())
}

async fn run(ctx: &AppContext, command: &Commands) -> pocket_sync::app::Result<()> {
    match command {
        Commands::Login => commands::login(ctx).await,
        Commands::Logout { purge } => commands::logout(ctx, *purge).await,
        Commands::Whoami => commands::whoami(ctx),
        Commands::Sync => commands::sync_items(ctx).await,
        Commands::List {
            archived,
            unread,
            favorites,
        } => commands::list_items(
            ctx,
            ListFilter {
                archived: *archived,
                unread: *unread,
                favorites: *favorites,
            },
        ),
        Commands::Add { url } => commands::add_item(ctx, url).await,
        Commands::Watch {
            interval,
            no_initial_sync,
        } => commands::watch(ctx, interval.as_deref(), !no_initial_sync).await,
        Commands::Archive { id } => commands::mutate_item(ctx, id, MutationOp::Archive).await,
        Commands::Readd { id } => commands::mutate_item(ctx, id, MutationOp::Readd).await,
        Commands::Favorite { id } => commands::mutate_item(ctx, id, MutationOp::Favorite).await,
        Commands::Unfavorite { id } => {
            commands::mutate_item(ctx, id, MutationOp::Unfavorite).await
        }
        Commands::Delete { id } => commands::mutate_item(ctx, id, MutationOp::Delete).await,
        // Handled before the store is opened.
        Commands::Reset { .. } => Ok(()),
    }
}
