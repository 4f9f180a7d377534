//! Domain models shared across Skiff components.

pub mod file;
pub mod upload;
pub mod user;

pub use file::{FileRecord, FileResponse, UpdateFileRequest, Visibility};
pub use upload::{
    CompletePart, CompleteUploadRequest, PartTargetResponse, ReceivePartResponse, SessionStatus,
    StartUploadRequest, StartUploadResponse, UploadProgressResponse, UploadedFileResponse,
};
pub use user::User;
