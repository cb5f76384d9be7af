use std::path::Path;

use tracing::warn;

use crate::app::{AppContext, PocketSyncError, Result};
use crate::domain::{Item, ItemStatus, MutationOp, PendingOp, SyncState};
use crate::scheduler::{SchedulerConfig, SyncScheduler};
use crate::store::{Notice, SqliteStore};
use crate::view::ConsoleView;

pub async fn login(ctx: &AppContext) -> Result<()> {
    ctx.require_consumer_key()?;

    let token = ctx.auth.begin_auth().await?;
    let url = ctx.auth.authorize_url(&token)?;

    println!("Open this page to authorize pocket-sync:\n  {}", url);
    if let Err(e) = open::that(url.as_str()) {
        warn!("Could not open browser: {}", e);
    }
    println!("Press Enter once you have granted access (Ctrl-D to cancel)...");

    let confirmed = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|n| n > 0)
    })
    .await
    .map_err(|e| PocketSyncError::Other(e.to_string()))??;

    if !confirmed {
        ctx.auth.abandon(&token)?;
        return Err(PocketSyncError::AuthExchange("login cancelled".into()));
    }

    let credential = ctx.auth.handle_redirect().await?;
    ctx.credentials.save(&credential)?;
    println!("Logged in as {}", credential.username);

    sync_items(ctx).await
}

pub async fn logout(ctx: &AppContext, purge: bool) -> Result<()> {
    let previous = ctx.credentials.load().ok().flatten();
    ctx.credentials.clear()?;

    if purge {
        ctx.store.purge().await?;
        println!("Deleted cached items");
    }

    match previous {
        Some(credential) => println!("Logged out {}", credential.username),
        None => println!("Not logged in"),
    }
    Ok(())
}

pub fn whoami(ctx: &AppContext) -> Result<()> {
    match ctx.credentials.load()? {
        Some(credential) => println!("{}", credential.username),
        None => println!("Not logged in"),
    }
    Ok(())
}

pub async fn sync_items(ctx: &AppContext) -> Result<()> {
    let credential = ctx.connect()?;
    let pending = ctx.store.pending_count();
    if pending > 0 {
        println!("Sending {} pending changes...", pending);
    }

    let result = ctx.store.sync(&credential).await;
    ctx.store.wait_idle().await;
    let failures = report_notices(ctx);

    let report = result?;
    println!("Sync complete: {}", report.summary());
    if failures > 0 {
        println!("{} changes could not be applied", failures);
    }
    Ok(())
}

/// Which cached items `list` prints.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    pub archived: bool,
    pub unread: bool,
    pub favorites: bool,
}

impl ListFilter {
    pub fn matches(&self, item: &Item) -> bool {
        if self.archived && item.status != ItemStatus::Archived {
            return false;
        }
        if self.unread && item.status != ItemStatus::Unread {
            return false;
        }
        !self.favorites || item.favorite
    }
}

pub fn list_items(ctx: &AppContext, filter: ListFilter) -> Result<()> {
    let items = ctx.store.list();
    let shown: Vec<&Item> = items.iter().filter(|i| filter.matches(i)).collect();

    if shown.is_empty() {
        println!("No items");
        return Ok(());
    }

    for item in shown {
        println!("{}", format_item_line(item));
    }
    Ok(())
}

/// `● ★ 2024-01-31 Title  (id)`: unread dot, favorite star, pending marker.
pub fn format_item_line(item: &Item) -> String {
    let read_marker = if item.status == ItemStatus::Unread { "●" } else { " " };
    let favorite_marker = if item.favorite { "★" } else { " " };
    let pending = match item.sync_state {
        SyncState::Synced => "",
        SyncState::PendingCreate => " [saving]",
        SyncState::PendingUpdate => " [pending]",
        SyncState::PendingDelete => " [deleting]",
    };

    format!(
        "{} {} {} {}  ({}){}",
        read_marker,
        favorite_marker,
        item.added_at.format("%Y-%m-%d"),
        item.display_title(),
        item.id,
        pending
    )
}

pub async fn add_item(ctx: &AppContext, url: &str) -> Result<()> {
    let credential = ctx.connect()?;
    let local_id = ctx.store.add(&credential, url)?;
    println!("Saving {}...", url);

    ctx.store.wait_idle().await;
    if report_notices(ctx) == 0 && ctx.store.get(&local_id).is_none() {
        println!("Saved");
    }
    Ok(())
}

pub async fn mutate_item(ctx: &AppContext, item_id: &str, op: MutationOp) -> Result<()> {
    let credential = ctx.connect()?;
    let title = ctx
        .store
        .get(item_id)
        .map(|i| i.display_title().to_string())
        .unwrap_or_else(|| item_id.to_string());

    ctx.store.dispatch(&credential, item_id, op)?;
    ctx.store.wait_idle().await;

    if report_notices(ctx) == 0 {
        println!("{}: {}", past_tense(op), title);
    }
    Ok(())
}

fn past_tense(op: MutationOp) -> &'static str {
    match op {
        MutationOp::Archive => "Archived",
        MutationOp::Readd => "Re-added",
        MutationOp::Favorite => "Favorited",
        MutationOp::Unfavorite => "Unfavorited",
        MutationOp::Delete => "Deleted",
    }
}

pub async fn watch(ctx: &AppContext, interval: Option<&str>, initial_sync: bool) -> Result<()> {
    ctx.connect()?;

    let mut config = SchedulerConfig::from_config(&ctx.config.sync)?;
    if let Some(interval) = interval {
        let secs = SchedulerConfig::parse_interval(interval).map_err(PocketSyncError::Config)?;
        config.interval = std::time::Duration::from_secs(secs);
    }
    config.sync_on_start = initial_sync;

    let handle = ctx.views.register_view(ConsoleView::stdout("pocket"))?;
    let scheduler = SyncScheduler::new(ctx.store.clone(), ctx.credentials.clone(), config);

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted");
        }
    }

    ctx.views.unregister_view(&handle);
    ctx.store.wait_idle().await;
    Ok(())
}

/// Delete the item cache without opening it.
pub fn reset(data_dir: &Path, yes: bool) -> Result<()> {
    let path = AppContext::database_path_in(data_dir);
    if !yes {
        return Err(PocketSyncError::Other(format!(
            "This deletes {} and every unsent change; re-run with --yes",
            path.display()
        )));
    }

    SqliteStore::destroy(&path)?;
    println!("Deleted {}", path.display());
    Ok(())
}

/// Print and drain notices. Returns how many were mutation failures.
fn report_notices(ctx: &AppContext) -> usize {
    let mut failures = 0;
    for notice in ctx.store.take_notices() {
        if let Notice::MutationFailed { op, .. } = &notice {
            failures += 1;
            if *op == PendingOp::Add {
                eprintln!("! {} (the URL was not saved)", notice);
                continue;
            }
        }
        eprintln!("! {}", notice);
    }
    failures
}
