//! 发布：渲染llms.txt、版本化替换输出目录、站点地图发现与对象存储上传

pub mod renderer;
pub mod sitemap;
pub mod tree;
pub mod uploader;
pub mod versioning;

pub use sitemap::SitemapDiscovery;
pub use uploader::ObjectStoreUploader;
pub use versioning::{OutputVersionManager, PublishReport, VERSION_FORMAT};
