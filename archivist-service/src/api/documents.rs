//! Document API endpoints.
//!
//! Upload, processing dispatch, lookup, cascade deletes and context
//! retrieval.

use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::Document;
use crate::error::ServiceError;
use crate::service::UploadScope;
use crate::vector_store::{SearchHit, SearchRequest};

use super::AppState;

/// Request to (re)process a document from a source
#[derive(Deserialize)]
pub struct ProcessDocumentRequest {
    pub document_id: String,
    #[serde(default)]
    pub source_uri: Option<String>,
}

#[derive(Serialize)]
pub struct ProcessDocumentResponse {
    pub document_id: String,
    pub status: String,
}

/// Response for delete operations
#[derive(Serialize)]
pub struct DeleteDocumentsResponse {
    pub success: bool,
    pub deleted_count: usize,
    pub message: String,
}

fn invalid(e: impl std::fmt::Display) -> ServiceError {
    ServiceError::invalid_request(e.to_string())
}

/// Upload a new document (multipart: file, workspace_id, conversation_id, user_id)
pub async fn upload_document_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), ServiceError> {
    let mut file_data: Option<(Vec<u8>, String, Option<String>)> = None;
    let mut scope = UploadScope::default();

    while let Some(field) = multipart.next_field().await.map_err(invalid)? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("document").to_string();
                let content_type = field.content_type().map(String::from);
                let data = field.bytes().await.map_err(invalid)?;
                file_data = Some((data.to_vec(), filename, content_type));
            }
            "workspace_id" => scope.workspace_id = field.text().await.map_err(invalid)?,
            "conversation_id" => {
                let value = field.text().await.map_err(invalid)?;
                scope.conversation_id = Some(value).filter(|v| !v.is_empty());
            }
            "user_id" => {
                let value = field.text().await.map_err(invalid)?;
                scope.user_id = Some(value).filter(|v| !v.is_empty());
            }
            _ => {}
        }
    }

    let (data, filename, content_type) =
        file_data.ok_or_else(|| ServiceError::invalid_request("No file provided"))?;

    // Generic binary types say nothing; fall back to the extension
    let declared = content_type
        .as_deref()
        .filter(|t| *t != "application/octet-stream");

    let document = state
        .service
        .upload_document(&data, &filename, declared, scope)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(document)))
}

/// Queue processing of an existing document
pub async fn process_document_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProcessDocumentRequest>,
) -> Result<(StatusCode, Json<ProcessDocumentResponse>), ServiceError> {
    let source_uri = request.source_uri.filter(|s| !s.trim().is_empty());
    state
        .service
        .dispatch(&request.document_id, source_uri)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessDocumentResponse {
            document_id: request.document_id,
            status: "queued".to_string(),
        }),
    ))
}

pub async fn get_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ServiceError> {
    Ok(Json(state.service.get_document(&id)?))
}

pub async fn list_workspace_documents_handler(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<Vec<Document>>, ServiceError> {
    Ok(Json(state.service.list_workspace_documents(&workspace_id)?))
}

/// Delete a document; unknown ids succeed with a zero count
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeleteDocumentsResponse>, ServiceError> {
    let deleted = state.service.delete_document(&id).await?;

    Ok(Json(DeleteDocumentsResponse {
        success: true,
        deleted_count: usize::from(deleted),
        message: format!("Document {} deleted", id),
    }))
}

pub async fn delete_workspace_documents_handler(
    State(state): State<Arc<AppState>>,
    Path(workspace_id): Path<String>,
) -> Result<Json<DeleteDocumentsResponse>, ServiceError> {
    let count = state.service.purge_workspace(&workspace_id).await?;

    Ok(Json(DeleteDocumentsResponse {
        success: true,
        deleted_count: count,
        message: format!("Deleted {} documents of workspace {}", count, workspace_id),
    }))
}

pub async fn delete_conversation_documents_handler(
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<DeleteDocumentsResponse>, ServiceError> {
    let count = state.service.purge_conversation(&conversation_id).await?;

    Ok(Json(DeleteDocumentsResponse {
        success: true,
        deleted_count: count,
        message: format!(
            "Deleted {} documents of conversation {}",
            count, conversation_id
        ),
    }))
}

/// Context retrieval for callers building prompts; never fails on backend errors
pub async fn retrieve_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<Vec<SearchHit>>, ServiceError> {
    request.validate()?;
    Ok(Json(state.service.retrieve_context(&request).await))
}
