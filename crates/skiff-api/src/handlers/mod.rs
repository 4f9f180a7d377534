pub mod chunked_upload;
pub mod direct_upload;
pub mod download;
pub mod files;
