mod encoder;
mod strategy;
#[cfg(test)]
mod tests;

pub use encoder::{EncodedFormat, ImageCrateEncoder, ImageEncoder, SupportedFormatSet};
pub use strategy::{AssetVersionSet, AssetVersioningStrategy, EncodedAsset, VersionKind};
