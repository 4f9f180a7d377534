//! OpenAPI document assembly.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::chunked_upload::start_upload,
        crate::handlers::chunked_upload::part_target,
        crate::handlers::chunked_upload::receive_part,
        crate::handlers::chunked_upload::upload_progress,
        crate::handlers::chunked_upload::complete_upload,
        crate::handlers::chunked_upload::abort_upload,
        crate::handlers::direct_upload::upload_file,
        crate::handlers::download::download_file,
        crate::handlers::files::list_files,
        crate::handlers::files::update_file,
        crate::handlers::files::delete_file,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        skiff_core::models::file::FileResponse,
        skiff_core::models::file::UpdateFileRequest,
        skiff_core::models::file::Visibility,
        skiff_core::models::upload::CompletePart,
        skiff_core::models::upload::CompleteUploadRequest,
        skiff_core::models::upload::PartTargetResponse,
        skiff_core::models::upload::ReceivePartResponse,
        skiff_core::models::upload::SessionStatus,
        skiff_core::models::upload::StartUploadRequest,
        skiff_core::models::upload::StartUploadResponse,
        skiff_core::models::upload::UploadProgressResponse,
        skiff_core::models::upload::UploadedFileResponse,
    )),
    tags(
        (name = "uploads", description = "Resumable chunked uploads"),
        (name = "files", description = "File records and retrieval")
    )
)]
pub struct ApiDoc;
