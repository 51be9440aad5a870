pub mod cache;
pub mod engine;

pub use cache::AssetCache;
pub use engine::ProxyGateway;
