#![deny(warnings)]

use persistence::default_sqlite_url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("COLONY_DATABASE_URL").ok())
        .unwrap_or_else(|| default_sqlite_url().to_string());
    // SQLite creates the file but not its directory.
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .filter(|p| !p.starts_with(":memory:"));
    if let Some(parent) = path.and_then(|p| std::path::Path::new(p).parent()) {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = persistence::init_db(&url).await?;
    let prices = store.list_prices().await?;
    println!("DB migrated at {} ({} price rows)", url, prices.len());
    Ok(())
}
