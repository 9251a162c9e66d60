use std::convert::TryFrom;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::{
    application::repos::{CreateNoteParams, NotesRepo, NotesWriteRepo, RepoError},
    domain::{
        entities::NoteRecord,
        types::{NoteId, UserId},
    },
};

use super::{PostgresRepositories, map_sqlx_error, util::count_from_db};

#[derive(sqlx::FromRow)]
struct NoteRow {
    id: i64,
    author_id: i64,
    title: String,
    content: String,
    img_url: Option<String>,
    like_count: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<NoteRow> for NoteRecord {
    type Error = RepoError;

    fn try_from(row: NoteRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: NoteId::new(row.id).map_err(RepoError::from_persistence)?,
            author_id: UserId::new(row.author_id).map_err(RepoError::from_persistence)?,
            title: row.title,
            content: row.content,
            img_url: row.img_url,
            like_count: count_from_db(row.like_count)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
impl NotesRepo for PostgresRepositories {
    async fn find_note(&self, id: NoteId) -> Result<Option<NoteRecord>, RepoError> {
        let row = sqlx::query_as::<_, NoteRow>(
            r#"
            SELECT id, author_id, title, content, img_url, like_count, created_at, updated_at
            FROM notes
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        row.map(NoteRecord::try_from).transpose()
    }
}

#[async_trait]
impl NotesWriteRepo for PostgresRepositories {
    async fn create_note(&self, params: CreateNoteParams) -> Result<NoteRecord, RepoError> {
        let row = sqlx::query_as::<_, NoteRow>(
            r#"
            INSERT INTO notes (author_id, title, content, img_url)
            VALUES ($1, $2, $3, $4)
            RETURNING id, author_id, title, content, img_url, like_count, created_at, updated_at
            "#,
        )
        .bind(params.author_id.get())
        .bind(params.title)
        .bind(params.content)
        .bind(params.img_url)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        NoteRecord::try_from(row)
    }

    async fn update_like_count(&self, id: NoteId, count: u64) -> Result<(), RepoError> {
        let count = i64::try_from(count).map_err(|_| RepoError::InvalidInput {
            message: format!("like count {count} exceeds supported range"),
        })?;

        let result = sqlx::query("UPDATE notes SET like_count = $2 WHERE id = $1")
            .bind(id.get())
            .bind(count)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
