use axum::extract::{Json, Multipart, State};
use serde_json::Value;
use tracing::{error, info};

use crate::access::{authorize, Action, Resource};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::{self, UploadRequest, DEFAULT_FOLDER};

/// Stores one photo or document and returns the storage service's result
/// verbatim; clients read `secure_url` from it.
pub async fn upload_asset(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    authorize(&user.principal(), Action::UploadAsset, &Resource::None)?;
    let assets = state.assets()?.clone();

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut folder = DEFAULT_FOLDER.to_string();

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        match field.name() {
            Some("file") => {
                filename = field.file_name().map(|name| name.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("folder") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid folder: {err}"))
                })?;
                let value = value.trim().trim_matches('/');
                if !value.is_empty() {
                    if !storage::is_valid_folder(value) {
                        return Err(AppError::bad_request(
                            "folder may only contain letters, digits, '-', '_' and '/'",
                        ));
                    }
                    folder = value.to_string();
                }
            }
            _ => {}
        }
    }

    let bytes = file_bytes
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::bad_request("No file uploaded"))?;
    let filename = filename
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = content_type
        .filter(|mime| !mime.is_empty() && mime != "application/octet-stream")
        .unwrap_or_else(|| {
            mime_guess::from_path(&filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });

    let size = bytes.len();
    let request = UploadRequest {
        bytes,
        filename: filename.clone(),
        content_type: content_type.clone(),
        folder: folder.clone(),
    };

    let result = assets.upload(request).await.map_err(|err| {
        error!(
            error = %err,
            backend = assets.backend(),
            filename = %filename,
            "asset upload failed"
        );
        AppError::external("Failed to upload file")
    })?;

    info!(
        user_id = %user.user_id,
        backend = assets.backend(),
        folder = %folder,
        content_type = %content_type,
        bytes = size,
        url = storage::uploaded_url(&result).unwrap_or_default(),
        "asset uploaded"
    );
    Ok(Json(result))
}
