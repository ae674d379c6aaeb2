mod backend;
mod file;
mod record;
mod store;
#[cfg(test)]
mod tests;

pub use backend::{KeyValueStore, MemoryKvStore, QuotaEstimate};
pub use file::FileKvStore;
pub use record::{AssetKey, StoredAssetRecord};
pub use store::{AssetStats, FormatBreakdown, LocalAssetStore, NewAsset, StoreCounters};
