use crate::cache::{FileCache, TtlCache};
use crate::error::Result;
use crate::settings::load_settings;

pub fn clear() -> Result<()> {
    let settings = load_settings();
    let cache = FileCache::new(settings.cache_dir(), settings.cache_ttl());
    let removed = cache.clear()?;
    println!("Removed {removed} cached entries from {}", settings.cache_dir().display());
    Ok(())
}
