pub mod entry;
pub mod eviction;
pub mod evictor;
pub mod key;
pub mod record;
pub mod store;

pub use eviction::EvictionConfig;
pub use evictor::CacheEvictor;
pub use key::BeaconKey;
pub use record::BeaconCacheRecord;
pub use store::BeaconCache;
