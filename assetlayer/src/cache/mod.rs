//! Layered content cache.
//!
//! Every layer shares the same eviction engine: a [`CacheMap`] keyed by
//! [`Fingerprint`](crate::fingerprint::Fingerprint) whose admission and
//! eviction are decided by a pluggable [`CachePolicy`] (the default is
//! [`LruPolicy`]). Layers are composed into a [`CacheChain`]:
//!
//! ```text
//! MemoryCacheLayer ──► DiskCacheLayer ──► NetworkCacheLayer
//!   SparseData          <hex> / .part        service candidates
//! ```
//!
//! # Example
//!
//! ```ignore
//! let chain = CacheChain::new(vec![
//!     Arc::new(MemoryCacheLayer::new(256 * 1024 * 1024, 0.25)),
//!     Arc::new(DiskCacheLayer::open(dir, 4 * 1024 * 1024 * 1024, 0.25)?),
//!     Arc::new(NetworkCacheLayer::new(download_services)),
//! ]);
//! let hit = chain.get_data(&id, &Range::with_length(2, 12, false)).await;
//! ```

mod disk;
mod layer;
mod lru;
mod map;
mod memory;
mod network;
mod policy;

pub use disk::{DiskCacheError, DiskCacheLayer, DiskEntry};
pub use layer::{CacheChain, CacheLayer, ChainHit, LayerStats};
pub use lru::LruPolicy;
pub use map::{CacheMap, CacheReader, CacheWriter};
pub use memory::MemoryCacheLayer;
pub use network::NetworkCacheLayer;
pub use policy::{CachePolicy, PolicyData};
