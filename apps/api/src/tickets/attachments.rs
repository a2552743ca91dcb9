use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::ticket::Attachment;
use crate::tickets::repository;

pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file received from a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Keeps the last path segment and replaces anything unusual in an object key.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

pub fn object_key(company_id: Uuid, ticket_id: Uuid, attachment_id: Uuid, file_name: &str) -> String {
    format!(
        "attachments/{company_id}/{ticket_id}/{attachment_id}-{}",
        sanitize_file_name(file_name)
    )
}

pub fn object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    format!("{}/{bucket}/{key}", endpoint.trim_end_matches('/'))
}

pub fn validate_upload(file: &UploadedFile) -> Result<(), AppError> {
    if file.data.is_empty() {
        return Err(AppError::Validation("Uploaded file is empty".into()));
    }
    if file.data.len() > MAX_ATTACHMENT_BYTES {
        return Err(AppError::Validation(format!(
            "File exceeds the {} MB limit",
            MAX_ATTACHMENT_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// A message can only carry attachments of the ticket it was posted on.
pub fn ensure_message_on_ticket(
    message_id: Uuid,
    message_ticket: Option<Uuid>,
    ticket_id: Uuid,
) -> Result<(), AppError> {
    match message_ticket {
        Some(owner) if owner == ticket_id => Ok(()),
        _ => Err(AppError::NotFound(format!(
            "Message {message_id} not found on ticket {ticket_id}"
        ))),
    }
}

pub struct AttachmentStore<'a> {
    pub db: &'a PgPool,
    pub s3: &'a aws_sdk_s3::Client,
    pub bucket: &'a str,
    pub endpoint: &'a str,
}

impl AttachmentStore<'_> {
    /// Uploads the object first, then records it. A failed insert leaves an
    /// orphaned object but never a row pointing at nothing.
    pub async fn upload(
        &self,
        company_id: Uuid,
        ticket_id: Uuid,
        message_id: Option<Uuid>,
        file: UploadedFile,
    ) -> Result<Attachment, AppError> {
        validate_upload(&file)?;
        repository::get_ticket(self.db, company_id, ticket_id).await?;
        if let Some(message_id) = message_id {
            let owner: Option<Uuid> =
                sqlx::query_scalar("SELECT ticket_id FROM messages WHERE id = $1")
                    .bind(message_id)
                    .fetch_optional(self.db)
                    .await?;
            ensure_message_on_ticket(message_id, owner, ticket_id)?;
        }

        let attachment_id = Uuid::new_v4();
        let key = object_key(company_id, ticket_id, attachment_id, &file.file_name);
        let content_type = file
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let size = file.data.len() as i64;

        self.s3
            .put_object()
            .bucket(self.bucket)
            .key(&key)
            .body(ByteStream::from(file.data))
            .content_type(&content_type)
            .send()
            .await
            .map_err(|e| AppError::Storage(format!("S3 upload failed: {e}")))?;
        info!("Uploaded attachment to s3://{}/{}", self.bucket, key);

        let attachment: Attachment = sqlx::query_as(
            r#"
            INSERT INTO attachments (id, ticket_id, message_id, file_name, file_type, file_size, file_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(attachment_id)
        .bind(ticket_id)
        .bind(message_id)
        .bind(&file.file_name)
        .bind(&content_type)
        .bind(size)
        .bind(object_url(self.endpoint, self.bucket, &key))
        .fetch_one(self.db)
        .await
        .map_err(|e| AppError::from_db(e, "The referenced message does not exist"))?;

        Ok(attachment)
    }
}
