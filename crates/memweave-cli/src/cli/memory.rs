//! Memory inspection and cleanup commands: search, count, clear, drop.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use memweave_core::memory::store::MemoryStore;
use memweave_infra::factory::{build_embedder, build_vector_store};
use memweave_types::memory::ScoredRecord;

use crate::state::AppState;

/// Embed `query` and list the closest memories of `user`.
pub async fn search_memories(
    state: &AppState,
    user: &str,
    query: &str,
    top_k: usize,
    json: bool,
) -> Result<()> {
    let backend = build_vector_store(&state.config, &state.secrets).await?;
    let collection = &state.config.store.collection;
    if !backend.has_collection(collection).await? {
        return report_missing_collection(collection, json);
    }

    let embedder = build_embedder(&state.config, &state.secrets).await?;
    let store = MemoryStore::new(backend, collection.clone(), embedder.dimension());

    let vector = embedder
        .embed_one(query)
        .await
        .context("Failed to embed query")?;
    let hits = store
        .search(user, &vector, top_k, state.config.pipeline.similarity_threshold)
        .await?;

    if json {
        let rows: Vec<_> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "id": hit.record.id,
                    "content": hit.record.content,
                    "similarity": hit.similarity,
                    "created_at": hit.record.created_at,
                    "updated_at": hit.record.updated_at,
                    "details": hit.record.details,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!();
        println!(
            "  {} No memories for '{}' match that query.",
            style("i").blue().bold(),
            style(user).cyan(),
        );
        println!();
        return Ok(());
    }

    println!();
    println!("  Memories for '{}'", style(user).cyan().bold());
    println!();
    println!("{}", hits_table(&hits));
    println!();

    Ok(())
}

pub async fn count_memories(state: &AppState, user: &str, json: bool) -> Result<()> {
    let backend = build_vector_store(&state.config, &state.secrets).await?;
    let collection = &state.config.store.collection;

    let count = if backend.has_collection(collection).await? {
        MemoryStore::new(backend, collection.clone(), state.config.embedding.dimension)
            .count(user)
            .await?
    } else {
        0
    };

    if json {
        let body = serde_json::json!({ "user_id": user, "count": count });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "  {} memor{} for '{}'",
            style(count).bold(),
            if count == 1 { "y" } else { "ies" },
            style(user).cyan()
        );
    }
    Ok(())
}

/// Delete every memory of one user, leaving other namespaces intact.
pub async fn clear_memories(state: &AppState, user: &str, json: bool) -> Result<()> {
    let backend = build_vector_store(&state.config, &state.secrets).await?;
    let collection = &state.config.store.collection;
    if !backend.has_collection(collection).await? {
        return report_missing_collection(collection, json);
    }

    let store = MemoryStore::new(backend, collection.clone(), state.config.embedding.dimension);
    let removed = store
        .clear_user(user)
        .await
        .with_context(|| format!("Failed to clear memories of '{user}'"))?;
    tracing::info!(user_id = %user, removed, "user memories cleared");

    if json {
        let body = serde_json::json!({ "user_id": user, "removed": removed });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "  {} Removed {} memor{} for '{}'",
            style("✓").green().bold(),
            style(removed).bold(),
            if removed == 1 { "y" } else { "ies" },
            style(user).cyan()
        );
    }
    Ok(())
}

pub async fn drop_collection(state: &AppState, force: bool, json: bool) -> Result<()> {
    let backend = build_vector_store(&state.config, &state.secrets).await?;
    let collection = &state.config.store.collection;

    if !backend.has_collection(collection).await? {
        return report_missing_collection(collection, json);
    }
    if !force && !json {
        println!(
            "  {} Dropping '{}' on {}. Pass --force to skip this notice.",
            style("!").yellow().bold(),
            style(collection).cyan(),
            backend.backend_name()
        );
    }

    backend
        .drop_collection(collection)
        .await
        .with_context(|| format!("Failed to drop collection '{collection}'"))?;
    tracing::info!(
        collection = %collection,
        backend = backend.backend_name(),
        "collection dropped"
    );

    if json {
        let body = serde_json::json!({ "collection": collection, "dropped": true });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "  {} Dropped collection '{}'",
            style("✓").green().bold(),
            style(collection).cyan()
        );
    }
    Ok(())
}

fn report_missing_collection(collection: &str, json: bool) -> Result<()> {
    if json {
        let body = serde_json::json!({ "collection": collection, "exists": false });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "  {} Collection '{}' does not exist yet.",
            style("i").blue().bold(),
            style(collection).cyan()
        );
    }
    Ok(())
}

fn hits_table(hits: &[ScoredRecord]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Memory").fg(Color::White),
        Cell::new("Score").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
        Cell::new("ID").fg(Color::White),
    ]);

    for hit in hits {
        let content = if hit.record.content.chars().count() > 60 {
            let head: String = hit.record.content.chars().take(57).collect();
            format!("{head}...")
        } else {
            hit.record.content.clone()
        };
        table.add_row(vec![
            Cell::new(content).fg(Color::White),
            Cell::new(format!("{:.3}", hit.similarity)).fg(Color::Yellow),
            Cell::new(hit.record.updated_at.format("%Y-%m-%d").to_string())
                .fg(Color::DarkGrey),
            Cell::new(&hit.record.id).fg(Color::DarkGrey),
        ]);
    }
    table
}
